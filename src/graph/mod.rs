//! Dependency ordering for services and components.
//!
//! Nodes are visited depth-first in registration order with three-color
//! marking; each node is appended only after all of its dependencies, so the
//! result is a valid start order and its reverse a valid stop order.

use std::collections::HashMap;

use crate::error::CyclicDependencyError;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    edges: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, or replaces the dependencies of an existing one while
    /// keeping its registration position.
    pub fn add_node<I, S>(&mut self, name: impl Into<String>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let dependencies = dependencies.into_iter().map(Into::into).collect();
        if !self.edges.contains_key(&name) {
            self.nodes.push(name.clone());
        }
        self.edges.insert(name, dependencies);
    }

    pub fn remove_node(&mut self, name: &str) -> bool {
        if self.edges.remove(name).is_none() {
            return false;
        }
        self.nodes.retain(|n| n != name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.edges.get(name).map(Vec::as_slice)
    }

    /// Node names in registration order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Start order: every dependency precedes its dependents. Ties follow
    /// registration order. Dependencies on names outside the graph are
    /// logged and skipped.
    pub fn order(&self) -> Result<Vec<String>, CyclicDependencyError> {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.nodes.len());
        let mut path: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        for name in &self.nodes {
            self.visit(name, &mut marks, &mut path, &mut order)?;
        }

        Ok(order)
    }

    /// Start order for `roots` and everything they depend on, transitively.
    /// Unknown roots are ignored.
    pub fn order_for<S: AsRef<str>>(
        &self,
        roots: &[S],
    ) -> Result<Vec<String>, CyclicDependencyError> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        let mut order = Vec::new();

        for root in roots {
            if let Some((name, _)) = self.edges.get_key_value(root.as_ref()) {
                self.visit(name, &mut marks, &mut path, &mut order)?;
            }
        }

        Ok(order)
    }

    pub fn stop_order(&self) -> Result<Vec<String>, CyclicDependencyError> {
        let mut order = self.order()?;
        order.reverse();
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), CyclicDependencyError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Err(CyclicDependencyError {
                    node: name.to_string(),
                    cycle,
                });
            }
            None => {}
        }

        marks.insert(name, Mark::InProgress);
        path.push(name);

        if let Some(dependencies) = self.edges.get(name) {
            for dependency in dependencies {
                if !self.edges.contains_key(dependency) {
                    log::warn!(
                        "Dependency {} of {} is not registered, skipping",
                        dependency,
                        name
                    );
                    continue;
                }
                self.visit(dependency, marks, path, order)?;
            }
        }

        path.pop();
        marks.insert(name, Mark::Done);
        order.push(name.to_string());
        Ok(())
    }
}
