use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Resource,
    Task,
}

impl ConflictType {
    pub fn as_str(&self) -> &str {
        match self {
            ConflictType::Resource => "resource",
            ConflictType::Task => "task",
        }
    }
}

/// Informational record of contention between agents. Never blocks anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflict_type: ConflictType,
    pub target_id: String,
    pub agents: BTreeSet<AgentId>,
    pub timestamp: DateTime<Utc>,
}

impl ConflictReport {
    pub fn new<I, A>(conflict_type: ConflictType, target_id: impl Into<String>, agents: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AgentId>,
    {
        Self {
            conflict_type,
            target_id: target_id.into(),
            agents: agents.into_iter().map(Into::into).collect(),
            timestamp: Utc::now(),
        }
    }

    pub fn involves(&self, agent_id: &str) -> bool {
        self.agents.contains(agent_id)
    }
}
