//! Topic-based notification bus.
//!
//! Subscribers pick the topics they care about; publishing is best-effort
//! and never blocks a workflow.

mod bus;
mod types;

pub use bus::{Event, EventBus, Topic};
pub use types::{DamageEvent, ReactionEvent, WorkflowEvent};
