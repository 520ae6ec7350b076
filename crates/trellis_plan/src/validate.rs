//! Graph validation and topological ordering.
//!
//! Validation runs depth-first: nested mappings become subgraphs first, then
//! edges are inferred by name matching, a recursion-stack DFS finds an
//! evaluation order (or the cycle that prevents one), and the composite
//! schemas are folded over that order.

use crate::dag::{Dag, Edge};
use crate::graph::{Graph, Node, join_path};
use crate::raw::{RawGraph, RawNode};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use trellis_core::{CoreError, CoreResult, Entry, IoSchema, Key, Schema};

/// How the author's declared order is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderMode {
    /// Reorder nodes into a computed topological order
    #[default]
    Lenient,
    /// Require the declared order to already be topological
    Strict,
}

/// Validator turning raw mappings into canonical graphs
#[derive(Debug, Clone, Default)]
pub struct Validator {
    /// Declared-order policy, applied at every nesting level
    pub mode: OrderMode,
}

impl Validator {
    /// Create a lenient validator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a strict validator
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: OrderMode::Strict,
        }
    }

    /// Validate a raw mapping into a canonical graph
    ///
    /// # Errors
    ///
    /// Returns `Cycle`, `Order` (strict mode only) or `Schema` for the first
    /// problem found, at any nesting depth
    pub fn validate(&self, raw: &RawGraph) -> CoreResult<Graph> {
        self.validate_at(raw, "")
    }

    fn validate_at(&self, raw: &RawGraph, prefix: &str) -> CoreResult<Graph> {
        let declared = self.canonicalize_nodes(raw, prefix)?;
        let dag = infer_edges(&declared, prefix)?;
        let order = topological_order(&declared, &dag)?;

        if self.mode == OrderMode::Strict {
            check_declared_order(&declared, &dag)?;
        }

        let mut declared = declared;
        let nodes: IndexMap<Key, Node> = order
            .into_iter()
            .filter_map(|key| declared.swap_remove(key.as_str()).map(|node| (key, node)))
            .collect();

        let mut input = Schema::new();
        let mut output = Schema::new();
        for (key, node) in &nodes {
            input.merge_inputs(node.input_schema(), |k| nodes.contains_key(k.as_str()));
            output.insert(key.clone(), node.output_entry());
        }

        let level = if prefix.is_empty() { "<root>" } else { prefix };
        tracing::debug!(
            graph = level,
            nodes = nodes.len(),
            edges = dag.edge_count(),
            order = ?nodes.keys().map(Key::as_str).collect::<Vec<_>>(),
            "graph validated"
        );

        Ok(Graph {
            nodes,
            dag,
            input,
            output,
        })
    }

    /// Nested mappings become subgraphs; leaves are checked for well-formed
    /// schemas
    fn canonicalize_nodes(&self, raw: &RawGraph, prefix: &str) -> CoreResult<IndexMap<Key, Node>> {
        let mut nodes = IndexMap::with_capacity(raw.len());
        for (key, raw_node) in raw.iter() {
            let path = join_path(prefix, key);
            if !key.is_valid() {
                return Err(CoreError::schema(path, "node key must be non-empty"));
            }
            let node = match raw_node {
                RawNode::Leaf(f) => {
                    let (input, output) = f.io_schemata();
                    if !input.is_well_formed() || !output.is_well_formed() {
                        return Err(CoreError::schema(path, "leaf schema has an empty key"));
                    }
                    Node::Leaf(Arc::clone(f))
                }
                RawNode::Nested(sub) => Node::Subgraph(Arc::new(self.validate_at(sub, &path)?)),
                RawNode::Graph(g) => Node::Subgraph(Arc::clone(g)),
            };
            nodes.insert(key.clone(), node);
        }
        Ok(nodes)
    }
}

/// Edges from name matching between input schemas and sibling keys
fn infer_edges(nodes: &IndexMap<Key, Node>, prefix: &str) -> CoreResult<Dag> {
    let mut dag = Dag::new();
    for key in nodes.keys() {
        dag.add_node(key.clone());
    }

    for (key, node) in nodes {
        for (wanted, entry) in node.input_schema() {
            if wanted == key {
                return Err(CoreError::Cycle {
                    path: vec![key.clone(), key.clone()],
                });
            }
            let Some(producer) = nodes.get(wanted.as_str()) else {
                continue;
            };
            match entry {
                Entry::Nested(sub) => {
                    producer.output_schema().resolve(sub).map_err(|missing| {
                        CoreError::schema(
                            join_path(prefix, key),
                            format!("`{wanted}.{missing}` is not produced by `{wanted}`"),
                        )
                    })?;
                    dag.add_edge(Edge::nested(wanted.clone(), key.clone()));
                }
                _ => dag.add_edge(Edge::new(wanted.clone(), key.clone())),
            }
        }
    }
    Ok(dag)
}

/// Post-order DFS over dependencies, visiting roots in declared order
fn topological_order(nodes: &IndexMap<Key, Node>, dag: &Dag) -> CoreResult<IndexSet<Key>> {
    let mut order = IndexSet::with_capacity(nodes.len());
    let mut rec_stack = IndexSet::new();

    for key in nodes.keys() {
        visit(key, dag, &mut order, &mut rec_stack)?;
    }
    Ok(order)
}

fn visit(
    key: &Key,
    dag: &Dag,
    order: &mut IndexSet<Key>,
    rec_stack: &mut IndexSet<Key>,
) -> CoreResult<()> {
    if order.contains(key) {
        return Ok(());
    }
    if let Some(start) = rec_stack.get_index_of(key) {
        let mut path: Vec<Key> = rec_stack.iter().skip(start).cloned().collect();
        path.push(key.clone());
        return Err(CoreError::Cycle { path });
    }

    rec_stack.insert(key.clone());
    for dep in dag.dependencies(key.as_str()) {
        visit(dep, dag, order, rec_stack)?;
    }
    rec_stack.shift_remove(key);
    order.insert(key.clone());
    Ok(())
}

/// Every producer must be declared before its consumers
fn check_declared_order(nodes: &IndexMap<Key, Node>, dag: &Dag) -> CoreResult<()> {
    for (index, key) in nodes.keys().enumerate() {
        for dep in dag.dependencies(key.as_str()) {
            if nodes.get_index_of(dep.as_str()).is_none_or(|at| at > index) {
                return Err(CoreError::Order {
                    node: key.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Build a graph, reordering nodes into evaluation order
///
/// # Errors
///
/// Returns `Cycle` or `Schema` errors
pub fn build_graph(raw: &RawGraph) -> CoreResult<Graph> {
    Validator::new().validate(raw)
}

/// Build a graph whose declared order must already be an evaluation order
///
/// # Errors
///
/// Returns `Cycle`, `Order` or `Schema` errors
pub fn build_ordered_graph(raw: &RawGraph) -> CoreResult<Graph> {
    Validator::strict().validate(raw)
}

/// Whether a raw node is structurally acceptable: a leaf with well-formed
/// schemas, a built graph, or a mapping of valid keys to acceptable nodes
#[must_use]
pub fn is_graph(node: &RawNode) -> bool {
    match node {
        RawNode::Leaf(f) => f.input_schema().is_well_formed() && f.output_schema().is_well_formed(),
        RawNode::Graph(_) => true,
        RawNode::Nested(raw) => raw.iter().all(|(k, n)| k.is_valid() && is_graph(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use trellis_core::{FnNode, Value};

    fn leaf(input: Schema) -> FnNode {
        FnNode::new(input, |_| Ok(Value::null()))
    }

    fn reads(keys: &[&str]) -> FnNode {
        leaf(keys.iter().fold(Schema::new(), |s, k| s.required(*k)))
    }

    fn order(graph: &Graph) -> Vec<&str> {
        graph.order().map(Key::as_str).collect()
    }

    #[test]
    fn test_lenient_reorders() {
        let raw = RawGraph::new()
            .leaf("y", reads(&["x"]))
            .leaf("x", reads(&["a"]));

        let graph = build_graph(&raw).unwrap();
        assert_eq!(order(&graph), vec!["x", "y"]);
        assert_eq!(graph.input_schema(), &Schema::new().required("a"));
        assert_eq!(graph.output_schema(), &Schema::new().required("x").required("y"));
    }

    #[test]
    fn test_strict_rejects_out_of_order() {
        let raw = RawGraph::new()
            .leaf("y", reads(&["x"]))
            .leaf("x", reads(&["a"]));

        let err = build_ordered_graph(&raw).unwrap_err();
        assert_eq!(
            err,
            CoreError::Order {
                node: Key::from("y"),
                dependency: Key::from("x"),
            }
        );
    }

    #[test]
    fn test_strict_accepts_topological_order() {
        let raw = RawGraph::new()
            .leaf("x", reads(&["a"]))
            .leaf("y", reads(&["x"]));
        let graph = build_ordered_graph(&raw).unwrap();
        assert_eq!(order(&graph), vec!["x", "y"]);
    }

    #[test]
    fn test_cycle_under_both_modes() {
        let raw = RawGraph::new()
            .leaf("x", reads(&["y"]))
            .leaf("y", reads(&["x"]));

        for result in [build_graph(&raw), build_ordered_graph(&raw)] {
            match result.unwrap_err() {
                CoreError::Cycle { path } => {
                    let path: Vec<_> = path.iter().map(Key::as_str).collect();
                    assert_eq!(path, vec!["x", "y", "x"]);
                }
                other => panic!("expected cycle, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let raw = RawGraph::new().leaf("x", reads(&["x"]));
        assert!(matches!(build_graph(&raw), Err(CoreError::Cycle { path }) if path.len() == 2));
    }

    #[test]
    fn test_cycle_inside_subgraph() {
        let inner = RawGraph::new()
            .leaf("p", reads(&["q"]))
            .leaf("q", reads(&["p"]));
        let raw = RawGraph::new().subgraph("sub", inner);
        assert!(matches!(build_graph(&raw), Err(CoreError::Cycle { .. })));
    }

    #[test]
    fn test_unresolved_nested_reference() {
        let stats = FnNode::new(Schema::new().required("xs"), |_| Ok(Value::null()))
            .with_output(Schema::new().required("mean"));
        let raw = RawGraph::new()
            .leaf("stats", stats)
            .leaf("z", leaf(Schema::new().nested("stats", Schema::new().required("median"))));

        match build_graph(&raw).unwrap_err() {
            CoreError::Schema { at, reason } => {
                assert_eq!(at, "z");
                assert!(reason.contains("stats.median"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_reference_into_opaque_value() {
        let raw = RawGraph::new()
            .leaf("a", reads(&[]))
            .leaf("z", leaf(Schema::new().nested("a", Schema::new().required("b"))));
        assert!(matches!(build_graph(&raw), Err(CoreError::Schema { .. })));
    }

    #[test]
    fn test_nested_reference_into_subgraph() {
        let inner = RawGraph::new().leaf("mean", reads(&["xs"]));
        let raw = RawGraph::new()
            .leaf("z", leaf(Schema::new().nested("stats", Schema::new().required("mean"))))
            .subgraph("stats", inner);

        let graph = build_graph(&raw).unwrap();
        assert_eq!(order(&graph), vec!["stats", "z"]);
        assert!(graph.dag().edges.iter().all(|e| e.nested));
        assert_eq!(graph.input_schema(), &Schema::new().required("xs"));
    }

    #[test]
    fn test_optional_sub_key_need_not_resolve() {
        let stats = reads(&[]).with_output(Schema::new().required("mean"));
        let raw = RawGraph::new().leaf("stats", stats).leaf(
            "z",
            leaf(Schema::new().nested("stats", Schema::new().optional("median", 0))),
        );
        assert!(build_graph(&raw).is_ok());
    }

    #[test]
    fn test_composite_input_required_wins() {
        let raw = RawGraph::new()
            .leaf("a", leaf(Schema::new().optional("k", 1)))
            .leaf("b", leaf(Schema::new().required("k")))
            .leaf("c", leaf(Schema::new().optional("j", 2)));

        let graph = build_graph(&raw).unwrap();
        assert_eq!(graph.input_schema().get("k"), Some(&Entry::Required));
        assert_eq!(graph.input_schema().get("j"), Some(&Entry::Optional(Value::from(2))));
    }

    #[test]
    fn test_empty_key_is_schema_error() {
        let raw = RawGraph::new().subgraph("outer", RawGraph::new().leaf("", reads(&[])));
        match build_graph(&raw).unwrap_err() {
            CoreError::Schema { at, .. } => assert_eq!(at, "outer/"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_is_graph() {
        let good = RawNode::Nested(RawGraph::new().leaf("a", reads(&["x"])));
        assert!(is_graph(&good));

        let bad_leaf = RawNode::Nested(RawGraph::new().leaf("a", reads(&[""])));
        assert!(!is_graph(&bad_leaf));

        let bad_key = RawNode::Nested(RawGraph::new().leaf("", reads(&[])));
        assert!(!is_graph(&bad_key));
    }

    /// Random DAG: node `n{i}` may only read nodes with a smaller index, so
    /// any declaration order is acyclic
    fn random_dag() -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<usize>)> {
        (1usize..12).prop_flat_map(|n| {
            let deps = (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>();
            let perm = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
            (deps, perm)
        })
    }

    proptest! {
        #[test]
        fn test_lenient_order_is_topological((deps, perm) in random_dag()) {
            let mut raw = RawGraph::new();
            for &i in &perm {
                let names: Vec<String> = deps[i]
                    .iter()
                    .filter(|&&d| d < i)
                    .map(|d| format!("n{d}"))
                    .collect();
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                raw = raw.leaf(format!("n{i}"), reads(&names));
            }

            let graph = build_graph(&raw).unwrap();
            prop_assert_eq!(graph.len(), perm.len());
            for (key, _) in graph.nodes() {
                let at = graph.index_of(key.as_str()).unwrap();
                for dep in graph.dependencies(key.as_str()) {
                    prop_assert!(graph.index_of(dep.as_str()).unwrap() < at);
                }
            }

            // canonical graphs always pass strict validation
            prop_assert!(build_ordered_graph(&graph.to_raw()).is_ok());
        }
    }
}
