use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, ResourceId};

/// Point-in-time view of a resource's ownership and wait queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub holder: Option<AgentId>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub waiters: Vec<WaiterSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiterSnapshot {
    pub agent_id: AgentId,
    pub requested_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl ResourceSnapshot {
    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }

    pub fn waiting_agents(&self) -> Vec<AgentId> {
        self.waiters.iter().map(|w| w.agent_id.clone()).collect()
    }
}
