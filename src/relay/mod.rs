mod router;
mod types;

pub use router::{MessageRouter, RouteOutcome, RouterStats, RouterStatsSnapshot};
pub use types::{MessageRecord, NewMessage};
