//! Per-leaf timing instrumentation.
//!
//! [`with_profiling`] rewrites a graph so that a fresh [`ProfileLog`] is
//! created at the start of every call, every leaf at any depth records its
//! wall-clock duration into it, and the log itself is returned under the
//! profiling key. The rewrite happens on the graph, so it works under every
//! compilation strategy.

use crate::graph::{Graph, Node, join_path};
use crate::raw::{RawGraph, RawNode};
use crate::validate::build_graph;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trellis_core::{CoreError, CoreResult, Entry, Extension, IoSchema, Key, NodeFn, Record, Schema, Value};

/// Durations recorded during one call, keyed by slash-joined leaf path
#[derive(Debug, Default)]
pub struct ProfileLog {
    entries: Mutex<IndexMap<String, Duration>>,
}

impl ProfileLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a leaf's duration
    pub fn record(&self, path: impl Into<String>, elapsed: Duration) {
        self.entries.lock().insert(path.into(), elapsed);
    }

    /// Duration recorded for a leaf path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Duration> {
        self.entries.lock().get(path).copied()
    }

    /// Snapshot of all entries in completion order
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Duration)> {
        self.entries
            .lock()
            .iter()
            .map(|(path, d)| (path.clone(), *d))
            .collect()
    }

    /// Number of recorded leaves
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sum of all recorded durations
    #[must_use]
    pub fn total(&self) -> Duration {
        self.entries.lock().values().sum()
    }
}

impl Extension for ProfileLog {
    fn to_json(&self) -> serde_json::Value {
        self.entries
            .lock()
            .iter()
            .map(|(path, d)| (path.clone(), serde_json::json!(d.as_secs_f64() * 1000.0)))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Node creating the per-call log
#[derive(Debug, Default)]
struct ProfileSource {
    schema: Schema,
}

impl IoSchema for ProfileSource {
    fn input_schema(&self) -> &Schema {
        &self.schema
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}

impl NodeFn for ProfileSource {
    fn call(&self, _input: &Record) -> CoreResult<Value> {
        Ok(Value::extension(Arc::new(ProfileLog::new())))
    }
}

/// Leaf wrapper recording its inner node's duration
struct Profiled {
    inner: Arc<dyn NodeFn>,
    path: String,
    profile_key: Key,
    input: Schema,
}

impl Profiled {
    fn new(inner: Arc<dyn NodeFn>, path: String, profile_key: Key) -> Self {
        let mut input = inner.input_schema().clone();
        input.insert(profile_key.clone(), Entry::Required);
        Self {
            inner,
            path,
            profile_key,
            input,
        }
    }
}

impl IoSchema for Profiled {
    fn input_schema(&self) -> &Schema {
        &self.input
    }

    fn output_schema(&self) -> &Schema {
        self.inner.output_schema()
    }
}

impl NodeFn for Profiled {
    fn call(&self, input: &Record) -> CoreResult<Value> {
        let log = input
            .require(self.profile_key.as_str())?
            .downcast_ref::<ProfileLog>()
            .ok_or_else(|| {
                CoreError::runtime(format!("`{}` does not hold a profile log", self.profile_key))
            })?;

        let inner_input = input.without(self.profile_key.as_str());
        let start = Instant::now();
        let result = self.inner.call(&inner_input);
        log.record(self.path.clone(), start.elapsed());
        result
    }
}

/// Instrument every leaf of a graph with timing.
///
/// The returned graph produces everything the input graph does plus `key`,
/// bound to the call's [`ProfileLog`].
///
/// # Errors
///
/// Returns `Schema` if `key` is empty, bound as a node at any depth, or read
/// as a graph input
pub fn with_profiling(key: impl Into<Key>, graph: &Graph) -> CoreResult<Graph> {
    let key = key.into();
    if !key.is_valid() {
        return Err(CoreError::schema("", "profiling key must be non-empty"));
    }
    if graph.binds_deep(key.as_str()) || graph.input_schema().contains_key(key.as_str()) {
        return Err(CoreError::schema(
            key.as_str(),
            "profiling key is already used by the graph",
        ));
    }

    let mut raw = RawGraph::new().node(key.clone(), Arc::new(ProfileSource::default()));
    for (k, node) in instrument(graph, "", &key).iter() {
        raw.insert(k.clone(), node.clone());
    }
    build_graph(&raw)
}

fn instrument(graph: &Graph, prefix: &str, key: &Key) -> RawGraph {
    let mut raw = RawGraph::new();
    for (k, node) in graph.nodes() {
        let path = join_path(prefix, k);
        let wrapped = match node {
            Node::Leaf(f) => RawNode::Leaf(Arc::new(Profiled::new(Arc::clone(f), path, key.clone()))),
            Node::Subgraph(g) => RawNode::Nested(instrument(g, &path, key)),
        };
        raw.insert(k.clone(), wrapped);
    }
    raw
}
