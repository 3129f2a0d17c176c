//! Typed event bus shared by every managed unit.
//!
//! Lifecycle, orchestration and coordination events are variants of one closed
//! enum, so each payload shape is fixed at compile time. The bus is a tokio
//! broadcast channel: every subscriber sees every event published after it
//! subscribed, in publish order.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::coordination::MessageEnvelope;
use crate::orchestrator::OrchestrationReport;
use crate::types::{AgentId, ConflictReport, ResourceId, TaskId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendEvent {
    ServiceStarted { name: String },
    ServiceStopped { name: String },
    ServiceError { name: String, error: String },
    ServiceRestarted { name: String, restart_count: u32 },
    ServiceFailed { name: String, reason: String },
    /// A concrete service reports itself operational.
    ServiceReady { name: String },

    BackendInitialized { components: Vec<String> },
    InitializationFailed { error: String },
    BackendShutdown,
    OrchestrationComplete { report: OrchestrationReport },
    ComponentRestarted { name: String },

    TaskAssigned { task_id: TaskId, agent_id: AgentId },
    TaskCancelled { task_id: TaskId, reason: Option<String> },
    TaskCompleted { task_id: TaskId, agent_id: AgentId },
    ResourceAcquired { resource_id: ResourceId, agent_id: AgentId },
    ResourceReleased { resource_id: ResourceId, agent_id: AgentId },
    DeadlockPrevented {
        resource_id: ResourceId,
        agent_id: AgentId,
        cycle: Vec<AgentId>,
    },
    ConflictReported { report: ConflictReport },
    AgentMessage { envelope: MessageEnvelope },
}

impl BackendEvent {
    pub fn topic(&self) -> String {
        let topic = match self {
            BackendEvent::ServiceStarted { .. } => "service:started",
            BackendEvent::ServiceStopped { .. } => "service:stopped",
            BackendEvent::ServiceError { .. } => "service:error",
            BackendEvent::ServiceRestarted { .. } => "service:restarted",
            BackendEvent::ServiceFailed { .. } => "service:failed",
            BackendEvent::ServiceReady { name } => return format!("{}:ready", name),
            BackendEvent::BackendInitialized { .. } => "backend:initialized",
            BackendEvent::InitializationFailed { .. } => "backend:initialization_failed",
            BackendEvent::BackendShutdown => "backend:shutdown",
            BackendEvent::OrchestrationComplete { .. } => "backend:orchestration_complete",
            BackendEvent::ComponentRestarted { .. } => "backend:component_restarted",
            BackendEvent::TaskAssigned { .. } => "coordination:task_assigned",
            BackendEvent::TaskCancelled { .. } => "coordination:task_cancelled",
            BackendEvent::TaskCompleted { .. } => "coordination:task_completed",
            BackendEvent::ResourceAcquired { .. } => "coordination:resource_acquired",
            BackendEvent::ResourceReleased { .. } => "coordination:resource_released",
            BackendEvent::DeadlockPrevented { .. } => "coordination:deadlock_prevented",
            BackendEvent::ConflictReported { .. } => "coordination:conflict",
            BackendEvent::AgentMessage { .. } => "coordination:message",
        };
        topic.to_string()
    }

    /// Name of the service or component the event is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            BackendEvent::ServiceStarted { name }
            | BackendEvent::ServiceStopped { name }
            | BackendEvent::ServiceError { name, .. }
            | BackendEvent::ServiceRestarted { name, .. }
            | BackendEvent::ServiceFailed { name, .. }
            | BackendEvent::ServiceReady { name }
            | BackendEvent::ComponentRestarted { name } => Some(name),
            _ => None,
        }
    }
}

/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BackendEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// losing the oldest events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.sender.subscribe()
    }

    /// Publishes to all current subscribers and returns how many received it.
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: BackendEvent) -> usize {
        let topic = event.topic();
        match self.sender.send(event) {
            Ok(receivers) => {
                log::trace!("Published {} to {} subscriber(s)", topic, receivers);
                receivers
            }
            Err(_) => {
                log::trace!("Published {} with no subscribers", topic);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        let delivered = bus.publish(BackendEvent::BackendShutdown);
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(BackendEvent::ServiceStarted {
            name: "a".to_string(),
        });
        bus.publish(BackendEvent::ServiceStopped {
            name: "a".to_string(),
        });

        assert_eq!(rx.recv().await.unwrap().topic(), "service:started");
        assert_eq!(rx.recv().await.unwrap().topic(), "service:stopped");
    }

    #[test]
    fn test_ready_topic_uses_service_name() {
        let event = BackendEvent::ServiceReady {
            name: "coordination".to_string(),
        };
        assert_eq!(event.topic(), "coordination:ready");
        assert_eq!(event.subject(), Some("coordination"));
    }

    #[test]
    fn test_clone_shares_channel() {
        let bus = EventBus::new(4);
        let other = bus.clone();
        let _rx = bus.subscribe();
        assert_eq!(other.subscriber_count(), 1);
    }
}
