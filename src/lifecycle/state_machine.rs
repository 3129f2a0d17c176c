use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ServiceError;
use crate::types::ServiceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    StartRequested,
    Started,
    StopRequested,
    Stopped,
    Failed,
    HealthCheckFailed,
    EnterMaintenance,
    ExitMaintenance,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct ServiceStateMachine;

impl ServiceStateMachine {
    /// Target state for `event` in `state`, or `None` when the pair is not a
    /// legal edge.
    pub fn next(state: ServiceState, event: LifecycleEvent) -> Option<ServiceState> {
        let next = match (state, event) {
            (ServiceState::Stopped | ServiceState::Error, LifecycleEvent::StartRequested) => {
                ServiceState::Starting
            }
            (ServiceState::Starting, LifecycleEvent::Started) => ServiceState::Running,
            (ServiceState::Starting, LifecycleEvent::Failed) => ServiceState::Error,

            (
                ServiceState::Running | ServiceState::Maintenance | ServiceState::Error,
                LifecycleEvent::StopRequested,
            ) => ServiceState::Stopping,
            (ServiceState::Stopping, LifecycleEvent::Stopped) => ServiceState::Stopped,
            (ServiceState::Stopping, LifecycleEvent::Failed) => ServiceState::Error,

            (ServiceState::Running, LifecycleEvent::HealthCheckFailed) => ServiceState::Error,

            (ServiceState::Running, LifecycleEvent::EnterMaintenance) => ServiceState::Maintenance,
            (ServiceState::Maintenance, LifecycleEvent::ExitMaintenance) => ServiceState::Running,

            _ => return None,
        };
        Some(next)
    }

    pub fn transition(
        name: &str,
        state: &mut ServiceState,
        event: LifecycleEvent,
    ) -> Result<ServiceState, ServiceError> {
        let next = Self::next(*state, event).ok_or_else(|| ServiceError::Transition {
            name: name.to_string(),
            from: *state,
            event: event.to_string(),
        })?;

        log::debug!("Service {} transition {} -> {} ({})", name, state, next, event);
        *state = next;
        Ok(next)
    }
}
