//! Target dependency graph
//!
//! Edge direction: target -> dependency. Edge weights record the position of
//! the dependency in the target's declaration so traversal can follow the
//! declared order.

use crate::error::{ConfigError, ConfigResult, CycleError};
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Acyclic graph of target names
#[derive(Debug, Default)]
pub struct TargetGraph {
    graph: StableDiGraph<String, usize>,
    nodes: HashMap<String, NodeIndex>,
}

impl TargetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dependencies of `name`, replacing any previous ones.
    ///
    /// Fails without touching the graph if the new edges would close a loop.
    pub fn add_and_verify(&mut self, name: &str, dependencies: &[String]) -> Result<(), CycleError> {
        for dep in dependencies {
            if dep == name {
                return Err(CycleError {
                    target: name.to_string(),
                    dependency: dep.clone(),
                });
            }
            if let (Some(&from), Some(&to)) = (self.nodes.get(dep), self.nodes.get(name)) {
                // dep already reaches name; name -> dep would close the loop
                if has_path_connecting(&self.graph, from, to, None) {
                    return Err(CycleError {
                        target: name.to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let node = self.ensure_node(name);
        let stale: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }

        let mut seen = HashSet::new();
        for (position, dep) in dependencies.iter().enumerate() {
            if !seen.insert(dep.as_str()) {
                continue;
            }
            let dep_node = self.ensure_node(dep);
            self.graph.add_edge(node, dep_node, position);
        }

        Ok(())
    }

    fn ensure_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct dependencies in declaration order
    pub fn dependencies_of(&self, name: &str) -> ConfigResult<Vec<String>> {
        let node = self.node(name)?;
        Ok(self
            .ordered_neighbors(node)
            .into_iter()
            .map(|n| self.graph[n].clone())
            .collect())
    }

    /// Every target reachable from `name`, dependencies first.
    ///
    /// Each target appears once; `name` itself is not included.
    pub fn descendants(&self, name: &str) -> ConfigResult<Vec<String>> {
        let start = self.node(name)?;
        let mut visited = HashSet::new();
        let mut order = Vec::new();

        visited.insert(start);
        for next in self.ordered_neighbors(start) {
            self.postorder(next, &mut visited, &mut order);
        }

        Ok(order)
    }

    fn postorder(&self, node: NodeIndex, visited: &mut HashSet<NodeIndex>, order: &mut Vec<String>) {
        if !visited.insert(node) {
            return;
        }
        for next in self.ordered_neighbors(node) {
            self.postorder(next, visited, order);
        }
        order.push(self.graph[node].clone());
    }

    fn ordered_neighbors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (*e.weight(), e.target()))
            .collect();
        edges.sort_by_key(|(position, _)| *position);
        edges.into_iter().map(|(_, target)| target).collect()
    }

    fn node(&self, name: &str) -> ConfigResult<NodeIndex> {
        self.nodes
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::TargetNotFound(name.to_string()))
    }
}
