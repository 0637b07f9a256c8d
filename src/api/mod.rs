mod handlers;
mod health;
mod routes;

pub use handlers::{SendMessageRequest, SendMessageResponse};
pub use routes::api_routes;
