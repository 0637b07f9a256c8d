mod machine;
mod supervisor;

pub use machine::{transition, Effect, SlotEvent, SlotState};
pub use supervisor::LifecycleSupervisor;
