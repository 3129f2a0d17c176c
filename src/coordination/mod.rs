pub mod deadlock;
pub mod engine;
pub mod mailbox;
pub mod scheduling;
pub mod service;

pub use deadlock::WaitForGraph;
pub use engine::{CoordinationEngine, CoordinationStats, MaintenanceReport};
pub use mailbox::{Mailbox, MessageEnvelope};
pub use scheduling::{AgentLoad, LeastLoaded, RoundRobin, SchedulingPolicy};
pub use service::{CoordinationService, COORDINATION_SERVICE};
