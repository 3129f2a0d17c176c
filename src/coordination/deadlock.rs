use std::collections::{HashMap, HashSet};

use crate::types::AgentId;

/// Edges run from a waiting agent to every agent that has to be done with the
/// resource before it: the holder and the waiters queued ahead.
#[derive(Debug, Clone, Default)]
pub struct WaitForGraph {
    edges: HashMap<AgentId, HashSet<AgentId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, waiter: impl Into<AgentId>, holder: impl Into<AgentId>) {
        self.edges
            .entry(waiter.into())
            .or_default()
            .insert(holder.into());
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    /// The cycle that adding `waiter -> holder` would close, starting and
    /// ending at `waiter`, or `None` if the edge is safe.
    pub fn cycle_if_added(&self, waiter: &str, holder: &str) -> Option<Vec<AgentId>> {
        if waiter == holder {
            return Some(vec![waiter.to_string(), holder.to_string()]);
        }

        // A path holder ->* waiter plus the new edge is a cycle.
        let mut path = vec![waiter.to_string()];
        let mut visited = HashSet::new();
        if self.find_path(holder, waiter, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    /// Like [`cycle_if_added`](Self::cycle_if_added) for a wait behind
    /// several agents at once.
    pub fn cycle_if_waiting_on<'a, I>(&self, waiter: &str, blockers: I) -> Option<Vec<AgentId>>
    where
        I: IntoIterator<Item = &'a AgentId>,
    {
        blockers
            .into_iter()
            .find_map(|blocker| self.cycle_if_added(waiter, blocker))
    }

    fn find_path(
        &self,
        from: &str,
        target: &str,
        visited: &mut HashSet<AgentId>,
        path: &mut Vec<AgentId>,
    ) -> bool {
        path.push(from.to_string());
        if from == target {
            return true;
        }
        if !visited.insert(from.to_string()) {
            path.pop();
            return false;
        }

        if let Some(next) = self.edges.get(from) {
            let mut next: Vec<_> = next.iter().collect();
            next.sort();
            for agent in next {
                if self.find_path(agent, target, visited, path) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_agent_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge("agent-1", "agent-2");

        let cycle = graph.cycle_if_added("agent-2", "agent-1").unwrap();
        assert_eq!(cycle, vec!["agent-2", "agent-1", "agent-2"]);
    }

    #[test]
    fn test_three_agent_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");

        let cycle = graph.cycle_if_added("c", "a").unwrap();
        assert_eq!(cycle, vec!["c", "a", "b", "c"]);
    }

    #[test]
    fn test_chain_without_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");

        assert!(graph.cycle_if_added("d", "a").is_none());
        assert!(graph.cycle_if_added("a", "c").is_none());
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_cycle_through_any_blocker() {
        let mut graph = WaitForGraph::new();
        graph.add_edge("b", "a");

        let blockers = vec!["x".to_string(), "b".to_string()];
        let cycle = graph.cycle_if_waiting_on("a", &blockers).unwrap();
        assert_eq!(cycle, vec!["a", "b", "a"]);
        assert!(graph
            .cycle_if_waiting_on("c", &blockers)
            .is_none());
    }

    #[test]
    fn test_self_wait_is_cycle() {
        let graph = WaitForGraph::new();
        assert!(graph.cycle_if_added("a", "a").is_some());
    }
}
