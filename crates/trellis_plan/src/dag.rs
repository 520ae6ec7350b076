//! Dependency edges between sibling nodes.
//!
//! Edges are inferred once, at validation time, from name matching between
//! each node's input schema and its siblings' keys. Execution never
//! re-derives them.

use indexmap::{IndexMap, IndexSet};
use trellis_core::Key;

/// Dependency structure of one graph level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dag {
    /// All edges, in discovery order
    pub edges: Vec<Edge>,
    /// node -> nodes it depends on
    dependencies: IndexMap<Key, IndexSet<Key>>,
    /// node -> nodes that depend on it
    dependents: IndexMap<Key, IndexSet<Key>>,
}

impl Dag {
    /// Create a new empty DAG
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node with no edges yet
    pub fn add_node(&mut self, key: Key) {
        self.dependencies.entry(key.clone()).or_default();
        self.dependents.entry(key).or_default();
    }

    /// Add an edge; duplicate edges are ignored
    pub fn add_edge(&mut self, edge: Edge) {
        let fresh = self
            .dependencies
            .entry(edge.to.clone())
            .or_default()
            .insert(edge.from.clone());
        if fresh {
            self.dependents
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
            self.edges.push(edge);
        }
    }

    /// Nodes the given node depends on
    pub fn dependencies<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Key> + use<'a> {
        self.dependencies.get(key).into_iter().flatten()
    }

    /// Nodes that depend on the given node
    pub fn dependents<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Key> + use<'a> {
        self.dependents.get(key).into_iter().flatten()
    }

    /// Nodes with no dependencies
    pub fn entry_nodes(&self) -> impl Iterator<Item = &Key> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(k, _)| k)
    }

    /// Nodes nothing depends on
    pub fn exit_nodes(&self) -> impl Iterator<Item = &Key> {
        self.dependents
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(k, _)| k)
    }

    /// Get total node count
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.dependencies.len()
    }

    /// Get total edge count
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Check if DAG is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// `to` reads the value produced by `from`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Producing node
    pub from: Key,
    /// Consuming node
    pub to: Key,
    /// Whether the consumer reads nested sub-keys of the producer's value
    pub nested: bool,
}

impl Edge {
    /// Create a new edge
    #[must_use]
    pub fn new(from: Key, to: Key) -> Self {
        Self {
            from,
            to,
            nested: false,
        }
    }

    /// Create an edge that reads nested sub-keys
    #[must_use]
    pub fn nested(from: Key, to: Key) -> Self {
        Self {
            from,
            to,
            nested: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<'a>(it: impl Iterator<Item = &'a Key>) -> Vec<&'a str> {
        it.map(Key::as_str).collect()
    }

    #[test]
    fn test_dag_new() {
        let dag = Dag::new();
        assert!(dag.is_empty());
        assert_eq!(dag.node_count(), 0);
        assert_eq!(dag.edge_count(), 0);
    }

    #[test]
    fn test_dag_edges_and_neighbours() {
        let mut dag = Dag::new();
        for k in ["a", "b", "c"] {
            dag.add_node(Key::from(k));
        }
        dag.add_edge(Edge::new(Key::from("a"), Key::from("b")));
        dag.add_edge(Edge::new(Key::from("a"), Key::from("c")));

        assert_eq!(dag.edge_count(), 2);
        assert_eq!(keys(dag.dependencies("b")), vec!["a"]);
        assert_eq!(keys(dag.dependents("a")), vec!["b", "c"]);
        assert_eq!(keys(dag.entry_nodes()), vec!["a"]);
        assert_eq!(keys(dag.exit_nodes()), vec!["b", "c"]);
    }

    #[test]
    fn test_dag_duplicate_edge_ignored() {
        let mut dag = Dag::new();
        dag.add_edge(Edge::new(Key::from("a"), Key::from("b")));
        dag.add_edge(Edge::nested(Key::from("a"), Key::from("b")));
        assert_eq!(dag.edge_count(), 1);
    }

    #[test]
    fn test_dag_unknown_node() {
        let dag = Dag::new();
        assert_eq!(dag.dependencies("nope").count(), 0);
    }
}
