pub mod circuit_breaker;
pub mod health;
pub mod managed;
pub mod state_machine;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use health::{HealthOutcome, HealthRecord, HealthTracker};
pub use managed::{ManagedService, StateTransition};
pub use state_machine::{LifecycleEvent, ServiceStateMachine};
