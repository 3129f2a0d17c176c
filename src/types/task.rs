use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Assigned,
    Cancelled,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Assigned => "Assigned",
            TaskStatus::Cancelled => "Cancelled",
            TaskStatus::Completed => "Completed",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Assigned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub priority: u8,
    pub agent_id: Option<AgentId>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancellation_reason: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            priority: 0,
            agent_id: None,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            cancellation_reason: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn is_assigned_to(&self, agent_id: &str) -> bool {
        self.agent_id.as_deref() == Some(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending_and_unassigned() {
        let task = Task::new("t-1", "index repository").with_priority(7);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.agent_id.is_none());
        assert_eq!(task.priority, 7);
        assert!(task.is_live());
    }

    #[test]
    fn test_terminal_statuses_are_not_live() {
        assert!(!TaskStatus::Cancelled.is_live());
        assert!(!TaskStatus::Completed.is_live());
        assert!(TaskStatus::Assigned.is_live());
    }
}
