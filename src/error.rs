use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{AgentId, ResourceId, ServiceState, TaskId};

/// Why a lifecycle operation failed, independent of which operation it was.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FailureCause {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{hook} hook failed: {message}")]
    Hook { hook: &'static str, message: String },

    #[error("{0}")]
    Implementation(String),

    #[error("implementation panicked")]
    Panicked,
}

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service '{name}' failed to start: {cause}")]
    Startup { name: String, cause: FailureCause },

    #[error("service '{name}' failed to stop: {cause}")]
    Shutdown { name: String, cause: FailureCause },

    #[error("service '{name}' failed to restart: {reason}")]
    Restart { name: String, reason: String },

    #[error("service '{name}' cannot {action} while {state}")]
    InvalidState {
        name: String,
        action: &'static str,
        state: ServiceState,
    },

    #[error("service '{name}' has no transition from {from} on {event}")]
    Transition {
        name: String,
        from: ServiceState,
        event: String,
    },
}

impl ServiceError {
    pub fn service_name(&self) -> &str {
        match self {
            ServiceError::Startup { name, .. }
            | ServiceError::Shutdown { name, .. }
            | ServiceError::Restart { name, .. }
            | ServiceError::InvalidState { name, .. }
            | ServiceError::Transition { name, .. } => name,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ServiceError::Startup {
                cause: FailureCause::Timeout(_),
                ..
            } | ServiceError::Shutdown {
                cause: FailureCause::Timeout(_),
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cyclic dependency detected at '{node}': {}", .cycle.join(" -> "))]
pub struct CyclicDependencyError {
    pub node: String,
    pub cycle: Vec<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SystemError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    #[error("component '{0}' is already registered")]
    DuplicateComponent(String),

    #[error("critical components missing or not initialized: {}", .0.join(", "))]
    CriticalComponentsMissing(Vec<String>),

    #[error("circuit breaker for '{0}' is open")]
    CircuitOpen(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Aborts a whole phase: component initialization, service startup or orchestration.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error(transparent)]
    Cyclic(#[from] CyclicDependencyError),

    #[error("required component '{component}' failed to initialize after {attempts} attempt(s): {reason}")]
    ComponentFailed {
        component: String,
        attempts: u32,
        reason: String,
    },

    #[error("required service '{service}' failed to start: {source}")]
    ServiceFailed {
        service: String,
        source: ServiceError,
    },

    #[error("required services not healthy after startup: {}", .0.join(", "))]
    UnhealthyServices(Vec<String>),

    #[error("failed to construct service '{service}': {reason}")]
    ServiceConstruction { service: String, reason: String },

    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("unknown agent '{0}'")]
    UnknownAgent(AgentId),

    #[error("agent '{0}' is already registered")]
    DuplicateAgent(AgentId),

    #[error("unknown task '{0}'")]
    UnknownTask(TaskId),

    #[error("task '{task_id}' is already assigned to agent '{agent_id}'")]
    TaskConflict { task_id: TaskId, agent_id: AgentId },

    #[error("task '{task_id}' is not live and assigned to agent '{agent_id}'")]
    TaskNotAssigned { task_id: TaskId, agent_id: AgentId },

    #[error("no agent available to take task '{0}'")]
    NoAgentAvailable(TaskId),

    #[error("agent '{agent_id}' does not hold resource '{resource_id}'")]
    NotHolder {
        resource_id: ResourceId,
        agent_id: AgentId,
        holder: Option<AgentId>,
    },

    #[error("agent '{agent_id}' is already waiting for resource '{resource_id}'")]
    AlreadyWaiting {
        resource_id: ResourceId,
        agent_id: AgentId,
    },

    #[error("deadlock: agent '{agent_id}' waiting for '{resource_id}' would close {}", .cycle.join(" -> "))]
    Deadlock {
        resource_id: ResourceId,
        agent_id: AgentId,
        cycle: Vec<AgentId>,
    },

    #[error("agent '{agent_id}' timed out after {timeout:?} waiting for resource '{resource_id}'")]
    Timeout {
        resource_id: ResourceId,
        agent_id: AgentId,
        timeout: Duration,
    },

    #[error("wait by agent '{agent_id}' for resource '{resource_id}' was aborted: {reason}")]
    WaitAborted {
        resource_id: ResourceId,
        agent_id: AgentId,
        reason: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoordinationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoordinationError::Timeout { .. })
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self, CoordinationError::Deadlock { .. })
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Cyclic(#[from] CyclicDependencyError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = BackendError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_error_names_cycle() {
        let err = CyclicDependencyError {
            node: "x".to_string(),
            cycle: vec!["x".to_string(), "y".to_string(), "x".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency detected at 'x': x -> y -> x"
        );
    }

    #[test]
    fn test_timeout_detection() {
        let err = ServiceError::Startup {
            name: "memory".to_string(),
            cause: FailureCause::Timeout(Duration::from_secs(5)),
        };
        assert!(err.is_timeout());
        assert_eq!(err.service_name(), "memory");

        let err = ServiceError::Startup {
            name: "memory".to_string(),
            cause: FailureCause::Implementation("boom".to_string()),
        };
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_critical_components_message() {
        let err = SystemError::CriticalComponentsMissing(vec![
            "logging".to_string(),
            "event_bus".to_string(),
        ]);
        assert!(err.to_string().contains("logging, event_bus"));
    }
}
