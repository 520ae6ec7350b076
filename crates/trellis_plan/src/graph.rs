//! Canonical, validated graphs.

use crate::dag::Dag;
use crate::raw::{RawGraph, RawNode};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use trellis_core::{Entry, IoSchema, Key, NodeFn, Schema};

/// A node of a canonical graph
#[derive(Clone)]
pub enum Node {
    /// A node function
    Leaf(Arc<dyn NodeFn>),
    /// A nested graph, seen from outside as a single node
    Subgraph(Arc<Graph>),
}

impl Node {
    /// Entry this node contributes to its graph's output schema
    #[must_use]
    pub fn output_entry(&self) -> Entry {
        let output = self.output_schema();
        if output.is_empty() {
            Entry::Required
        } else {
            Entry::Nested(output.clone())
        }
    }

    /// Whether this node is a leaf
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }
}

impl IoSchema for Node {
    fn input_schema(&self) -> &Schema {
        match self {
            Self::Leaf(f) => f.input_schema(),
            Self::Subgraph(g) => g.input_schema(),
        }
    }

    fn output_schema(&self) -> &Schema {
        match self {
            Self::Leaf(f) => f.output_schema(),
            Self::Subgraph(g) => g.output_schema(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(node) => f
                .debug_struct("Leaf")
                .field("input", node.input_schema())
                .field("output", node.output_schema())
                .finish(),
            Self::Subgraph(graph) => f.debug_tuple("Subgraph").field(graph).finish(),
        }
    }
}

/// A validated graph.
///
/// Nodes are stored in topological evaluation order: every node comes
/// after all siblings it depends on. Immutable once built.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) nodes: IndexMap<Key, Node>,
    pub(crate) dag: Dag,
    pub(crate) input: Schema,
    pub(crate) output: Schema,
}

impl Graph {
    /// Nodes in evaluation order
    pub fn nodes(&self) -> impl Iterator<Item = (&Key, &Node)> {
        self.nodes.iter()
    }

    /// Evaluation order
    pub fn order(&self) -> impl Iterator<Item = &Key> {
        self.nodes.keys()
    }

    /// Get a node by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    /// Position of a node in evaluation order
    #[must_use]
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.nodes.get_index_of(key)
    }

    /// Dependency edges between the nodes of this level
    #[must_use]
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Siblings the given node reads from
    pub fn dependencies<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Key> + use<'a> {
        self.dag.dependencies(key)
    }

    /// Siblings reading from the given node
    pub fn dependents<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Key> + use<'a> {
        self.dag.dependents(key)
    }

    /// Nodes with no sibling dependencies
    pub fn entry_nodes(&self) -> impl Iterator<Item = &Key> {
        self.dag.entry_nodes()
    }

    /// Nodes no sibling reads; their values only surface in the output
    pub fn exit_nodes(&self) -> impl Iterator<Item = &Key> {
        self.dag.exit_nodes()
    }

    /// Number of nodes at this level
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a key is bound at this level or in any nested subgraph
    #[must_use]
    pub fn binds_deep(&self, key: &str) -> bool {
        self.nodes.iter().any(|(k, node)| {
            k.as_str() == key
                || match node {
                    Node::Subgraph(g) => g.binds_deep(key),
                    Node::Leaf(_) => false,
                }
        })
    }

    /// Slash-joined paths of every leaf, at any depth, in evaluation order
    #[must_use]
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_leaf_paths("", &mut paths);
        paths
    }

    fn collect_leaf_paths(&self, prefix: &str, paths: &mut Vec<String>) {
        for (key, node) in &self.nodes {
            let path = join_path(prefix, key);
            match node {
                Node::Leaf(_) => paths.push(path),
                Node::Subgraph(g) => g.collect_leaf_paths(&path, paths),
            }
        }
    }

    /// Back to a raw mapping (nested graphs become nested mappings)
    #[must_use]
    pub fn to_raw(&self) -> RawGraph {
        let mut raw = RawGraph::new();
        for (key, node) in &self.nodes {
            let node = match node {
                Node::Leaf(f) => RawNode::Leaf(Arc::clone(f)),
                Node::Subgraph(g) => RawNode::Nested(g.to_raw()),
            };
            raw.insert(key.clone(), node);
        }
        raw
    }
}

impl IoSchema for Graph {
    fn input_schema(&self) -> &Schema {
        &self.input
    }

    fn output_schema(&self) -> &Schema {
        &self.output
    }
}

/// Input schema of a graph or node
pub fn input_schema<T: IoSchema + ?Sized>(node: &T) -> &Schema {
    node.input_schema()
}

/// Output schema of a graph or node
pub fn output_schema<T: IoSchema + ?Sized>(node: &T) -> &Schema {
    node.output_schema()
}

pub(crate) fn join_path(prefix: &str, key: &Key) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::build_graph;
    use trellis_core::{FnNode, Value};

    fn leaf(input: Schema) -> FnNode {
        FnNode::new(input, |_| Ok(Value::null()))
    }

    fn sample() -> Graph {
        let inner = RawGraph::new()
            .leaf("p", leaf(Schema::new().required("a")))
            .leaf("q", leaf(Schema::new().required("p")));
        let raw = RawGraph::new()
            .leaf("a", leaf(Schema::new().required("input")))
            .subgraph("sub", inner)
            .leaf(
                "z",
                leaf(Schema::new().nested("sub", Schema::new().required("q"))),
            );
        build_graph(&raw).unwrap()
    }

    #[test]
    fn test_graph_introspection() {
        let graph = sample();
        let order: Vec<_> = graph.order().map(Key::as_str).collect();
        assert_eq!(order, vec!["a", "sub", "z"]);
        assert_eq!(graph.index_of("z"), Some(2));

        let deps: Vec<_> = graph.dependencies("z").map(Key::as_str).collect();
        assert_eq!(deps, vec!["sub"]);
        let entry: Vec<_> = graph.entry_nodes().map(Key::as_str).collect();
        assert_eq!(entry, vec!["a"]);
        let exit: Vec<_> = graph.exit_nodes().map(Key::as_str).collect();
        assert_eq!(exit, vec!["z"]);
    }

    #[test]
    fn test_graph_io_schemata() {
        let graph = sample();
        let (input, output) = trellis_core::io_schemata(&graph);

        assert_eq!(input_schema(&graph), input);
        assert_eq!(output_schema(&graph), output);
        assert_eq!(input.keys().map(Key::as_str).collect::<Vec<_>>(), vec!["input"]);
        assert_eq!(
            output.get("sub"),
            Some(&Entry::Nested(Schema::new().required("p").required("q")))
        );
        assert_eq!(output.get("a"), Some(&Entry::Required));
    }

    #[test]
    fn test_leaf_paths_and_binds_deep() {
        let graph = sample();
        assert_eq!(graph.leaf_paths(), vec!["a", "sub/p", "sub/q", "z"]);
        assert!(graph.binds_deep("q"));
        assert!(!graph.binds_deep("input"));
    }

    #[test]
    fn test_to_raw_round_trips_structure() {
        let graph = sample();
        let rebuilt = build_graph(&graph.to_raw()).unwrap();
        assert_eq!(rebuilt.leaf_paths(), graph.leaf_paths());
        assert_eq!(rebuilt.input_schema(), graph.input_schema());
    }
}
