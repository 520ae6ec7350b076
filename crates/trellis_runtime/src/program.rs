//! Flattened, index-addressed form of one graph level.
//!
//! Every strategy compiles a graph into the same program: node functions in
//! evaluation order with dependency indices resolved, nested subgraphs
//! already compiled into opaque node functions.

use crate::config::Strategy;
use crate::monitor::ExecutionMonitor;
use indexmap::IndexMap;
use std::sync::Arc;
use trellis_core::{CoreResult, IoSchema, Key, NodeFn, Record, Schema, Value};
use trellis_plan::{Graph, Node};

/// One node of a program
pub(crate) struct Unit {
    pub key: Key,
    pub func: Arc<dyn NodeFn>,
    /// Indices of sibling units this one reads
    pub deps: Vec<usize>,
    /// Indices of sibling units reading this one
    pub dependents: Vec<usize>,
}

pub(crate) struct Program {
    pub strategy: Strategy,
    pub units: Vec<Unit>,
    positions: IndexMap<Key, usize>,
    pub input: Schema,
    pub output: Schema,
}

impl Program {
    /// Flatten a graph; `compile_subgraph` turns each nested graph into a
    /// node function of the same strategy
    pub fn build(
        graph: &Graph,
        strategy: Strategy,
        mut compile_subgraph: impl FnMut(&Arc<Graph>) -> Arc<dyn NodeFn>,
    ) -> Self {
        let index = |key: &Key| graph.index_of(key.as_str()).unwrap_or_default();
        let units: Vec<Unit> = graph
            .nodes()
            .map(|(key, node)| Unit {
                key: key.clone(),
                func: match node {
                    Node::Leaf(f) => Arc::clone(f),
                    Node::Subgraph(g) => compile_subgraph(g),
                },
                deps: graph.dependencies(key.as_str()).map(index).collect(),
                dependents: graph.dependents(key.as_str()).map(index).collect(),
            })
            .collect();

        let positions = units
            .iter()
            .enumerate()
            .map(|(i, unit)| (unit.key.clone(), i))
            .collect();

        Self {
            strategy,
            units,
            positions,
            input: graph.input_schema().clone(),
            output: graph.output_schema().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Extract a unit's arguments. Keys produced by a sibling resolve
    /// through `produced` (by unit index); everything else comes from the
    /// call input.
    pub fn gather(
        &self,
        unit: usize,
        input: &Record,
        produced: impl Fn(usize) -> Option<Value>,
    ) -> CoreResult<Record> {
        let Unit { key, func, .. } = &self.units[unit];
        func.input_schema()
            .select(|k| match self.index_of(k.as_str()) {
                Some(i) => produced(i),
                None => input.get(k.as_str()).cloned(),
            })
            .map_err(|err| err.at_node(key))
    }

    /// Invoke a unit, counting and logging the outcome; errors come back
    /// tagged with the unit's key
    pub fn execute(&self, unit: usize, args: &Record, monitor: &ExecutionMonitor) -> CoreResult<Value> {
        self.start(unit, monitor);
        self.complete(unit, self.units[unit].func.call(args), monitor)
    }

    pub fn start(&self, unit: usize, monitor: &ExecutionMonitor) {
        monitor.record_execution();
        tracing::debug!(node = %self.units[unit].key, strategy = %self.strategy, "node started");
    }

    /// Count and log the outcome of a started unit
    pub fn complete(
        &self,
        unit: usize,
        result: CoreResult<Value>,
        monitor: &ExecutionMonitor,
    ) -> CoreResult<Value> {
        let key = &self.units[unit].key;
        match result {
            Ok(value) => {
                monitor.record_completion();
                tracing::debug!(node = %key, strategy = %self.strategy, "node finished");
                Ok(value)
            }
            Err(err) => {
                monitor.record_failure();
                let err = err.at_node(key);
                tracing::warn!(node = %key, strategy = %self.strategy, error = %err, "node failed");
                Err(err)
            }
        }
    }

    /// Assemble the output record from per-unit values
    pub fn collect(&self, values: impl IntoIterator<Item = Value>) -> Record {
        self.units
            .iter()
            .zip(values)
            .map(|(unit, value)| (unit.key.clone(), value))
            .collect()
    }
}
