pub mod conflict;
pub mod metrics;
pub mod resource;
pub mod task;

pub use conflict::{ConflictReport, ConflictType};
pub use metrics::{ComponentHealth, ServiceMetrics};
pub use resource::{ResourceSnapshot, WaiterSnapshot};
pub use task::{Task, TaskStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

pub type AgentId = String;
pub type TaskId = String;
pub type ResourceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,     // Initial and terminal
    Starting,    // Start implementation in flight
    Running,     // Operational, health checked
    Stopping,    // Stop implementation in flight
    Error,       // Failed start/stop or failed health check
    Maintenance, // Operator hold, health checks paused
}

impl ServiceState {
    pub fn as_str(&self) -> &str {
        match self {
            ServiceState::Stopped => "Stopped",
            ServiceState::Starting => "Starting",
            ServiceState::Running => "Running",
            ServiceState::Stopping => "Stopping",
            ServiceState::Error => "Error",
            ServiceState::Maintenance => "Maintenance",
        }
    }

    /// Running or held in maintenance; both still own live resources.
    pub fn is_active(&self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Maintenance)
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Stopping)
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        ServiceState::Stopped
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
