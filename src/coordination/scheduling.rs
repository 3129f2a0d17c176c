//! Pluggable agent selection for [`CoordinationEngine::schedule_task`].
//!
//! [`CoordinationEngine::schedule_task`]: super::CoordinationEngine::schedule_task

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::{AgentId, Task};

/// A registered agent and how many live tasks it currently owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLoad {
    pub agent_id: AgentId,
    pub live_tasks: usize,
}

pub trait SchedulingPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Picks an agent for `task`. `candidates` is in registration order and
    /// never empty.
    fn select(&self, task: &Task, candidates: &[AgentLoad]) -> Option<AgentId>;
}

/// Cycles through agents in registration order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulingPolicy for RoundRobin {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn select(&self, _task: &Task, candidates: &[AgentLoad]) -> Option<AgentId> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].agent_id.clone())
    }
}

/// Picks the agent with the fewest live tasks.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl SchedulingPolicy for LeastLoaded {
    fn name(&self) -> &str {
        "least_loaded"
    }

    fn select(&self, _task: &Task, candidates: &[AgentLoad]) -> Option<AgentId> {
        // min_by_key keeps the first of equal minima, so ties go to the
        // earliest registered agent.
        candidates
            .iter()
            .min_by_key(|c| c.live_tasks)
            .map(|c| c.agent_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loads(entries: &[(&str, usize)]) -> Vec<AgentLoad> {
        entries
            .iter()
            .map(|(id, live)| AgentLoad {
                agent_id: id.to_string(),
                live_tasks: *live,
            })
            .collect()
    }

    #[test]
    fn test_round_robin_cycles() {
        let policy = RoundRobin::new();
        let task = Task::new("t", "work");
        let candidates = loads(&[("a", 0), ("b", 0)]);

        let picks: Vec<_> = (0..3)
            .map(|_| policy.select(&task, &candidates).unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_least_loaded_prefers_lightest() {
        let policy = LeastLoaded;
        let task = Task::new("t", "work");
        let candidates = loads(&[("a", 3), ("b", 1), ("c", 1)]);
        assert_eq!(policy.select(&task, &candidates).as_deref(), Some("b"));
    }

    #[test]
    fn test_empty_candidates() {
        let task = Task::new("t", "work");
        assert!(RoundRobin::new().select(&task, &[]).is_none());
        assert!(LeastLoaded.select(&task, &[]).is_none());
    }
}
