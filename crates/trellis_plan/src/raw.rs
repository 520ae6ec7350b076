//! Author-facing raw mappings.
//!
//! A raw graph is whatever the author wrote down: names bound to leaves,
//! nested mappings, or already-built graphs, in any order. Nothing is
//! checked until it goes through the [`Validator`](crate::Validator).

use crate::graph::Graph;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use trellis_core::{Key, NodeFn};

/// One binding in a raw mapping
#[derive(Clone)]
pub enum RawNode {
    /// A node function
    Leaf(Arc<dyn NodeFn>),
    /// A nested raw mapping
    Nested(RawGraph),
    /// A graph that has already been validated
    Graph(Arc<Graph>),
}

impl fmt::Debug for RawNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(node) => f
                .debug_struct("Leaf")
                .field("input", node.input_schema())
                .field("output", node.output_schema())
                .finish(),
            Self::Nested(raw) => f.debug_tuple("Nested").field(raw).finish(),
            Self::Graph(graph) => f.debug_tuple("Graph").field(graph).finish(),
        }
    }
}

/// Ordered mapping from keys to raw nodes
#[derive(Debug, Clone, Default)]
pub struct RawGraph {
    nodes: IndexMap<Key, RawNode>,
}

impl RawGraph {
    /// Create an empty mapping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a leaf node function
    #[must_use]
    pub fn leaf(self, key: impl Into<Key>, node: impl NodeFn + 'static) -> Self {
        self.node(key, Arc::new(node))
    }

    /// Bind a shared node function
    #[must_use]
    pub fn node(mut self, key: impl Into<Key>, node: Arc<dyn NodeFn>) -> Self {
        self.insert(key, RawNode::Leaf(node));
        self
    }

    /// Bind a nested mapping
    #[must_use]
    pub fn subgraph(mut self, key: impl Into<Key>, raw: RawGraph) -> Self {
        self.insert(key, RawNode::Nested(raw));
        self
    }

    /// Bind an already-built graph as a subgraph
    #[must_use]
    pub fn graph(mut self, key: impl Into<Key>, graph: Arc<Graph>) -> Self {
        self.insert(key, RawNode::Graph(graph));
        self
    }

    /// Bind any raw node, replacing a previous binding of the same key
    /// in place
    pub fn insert(&mut self, key: impl Into<Key>, node: RawNode) -> Option<RawNode> {
        self.nodes.insert(key.into(), node)
    }

    /// Get a binding
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RawNode> {
        self.nodes.get(key)
    }

    /// Iterate over bindings in declared order
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &RawNode)> {
        self.nodes.iter()
    }

    /// Declared keys in order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.nodes.keys()
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
