//! Eager compilation.
//!
//! Every node runs, in evaluation order, before the call returns. Latency is
//! the sum of all node durations.

use crate::config::Strategy;
use crate::monitor::ExecutionMonitor;
use crate::program::Program;
use std::sync::Arc;
use trellis_core::{CoreResult, IoSchema, NodeFn, Record, Schema, Value};
use trellis_plan::Graph;

/// A graph compiled for in-order evaluation
pub struct EagerGraph {
    program: Program,
    monitor: ExecutionMonitor,
}

impl EagerGraph {
    /// Compile a graph; nested subgraphs are compiled eagerly too
    #[must_use]
    pub fn new(graph: &Graph) -> Self {
        let program = Program::build(graph, Strategy::Eager, |sub| Arc::new(Self::new(sub)));
        Self {
            program,
            monitor: ExecutionMonitor::new(),
        }
    }

    /// Evaluate every node and return the produced record
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` if the input lacks a required key, or the first
    /// node error in evaluation order
    pub fn run(&self, input: &Record) -> CoreResult<Record> {
        self.program.input.check(input)?;
        self.monitor.record_call();

        let mut values: Vec<Value> = Vec::with_capacity(self.program.len());
        for unit in 0..self.program.len() {
            let args = self
                .program
                .gather(unit, input, |i| values.get(i).cloned())?;
            values.push(self.program.execute(unit, &args, &self.monitor)?);
        }
        Ok(self.program.collect(values))
    }

    /// Execution counters
    #[must_use]
    pub fn monitor(&self) -> &ExecutionMonitor {
        &self.monitor
    }
}

impl IoSchema for EagerGraph {
    fn input_schema(&self) -> &Schema {
        &self.program.input
    }

    fn output_schema(&self) -> &Schema {
        &self.program.output
    }
}

impl NodeFn for EagerGraph {
    fn call(&self, input: &Record) -> CoreResult<Value> {
        self.run(input).map(Value::Record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::tests::{counted, stats_graph, stats_input};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_core::{CoreError, FnNode};
    use trellis_plan::{RawGraph, build_graph};

    #[test]
    fn test_eager_stats() {
        let graph = EagerGraph::new(&stats_graph());
        let out = graph.run(&stats_input()).unwrap();

        assert_eq!(out.i64("n").unwrap(), 4);
        assert_eq!(out.f64("m").unwrap(), 3.0);
        assert_eq!(out.f64("m2").unwrap(), 12.5);
        assert_eq!(out.f64("v").unwrap(), 3.5);
        assert!(!out.contains_key("xs"));
    }

    #[test]
    fn test_eager_runs_every_node_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let raw = RawGraph::new()
            .leaf("a", counted(&calls, Schema::new().required("x")))
            .leaf("b", counted(&calls, Schema::new().required("x")))
            .leaf("c", counted(&calls, Schema::new().required("a").required("b")));
        let graph = EagerGraph::new(&build_graph(&raw).unwrap());

        graph.run(&Record::new().with("x", 1)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(graph.monitor().metrics().nodes_completed, 3);
    }

    #[test]
    fn test_eager_missing_input() {
        let graph = EagerGraph::new(&stats_graph());
        let err = graph.run(&Record::new()).unwrap_err();
        assert_eq!(err, CoreError::missing("xs"));
        assert_eq!(graph.monitor().metrics().calls, 0);
    }

    #[test]
    fn test_eager_optional_default() {
        let raw = RawGraph::new().leaf(
            "scaled",
            FnNode::new(Schema::new().required("x").optional("k", 10), |r| {
                Ok(Value::from(r.i64("x")? * r.i64("k")?))
            }),
        );
        let graph = EagerGraph::new(&build_graph(&raw).unwrap());

        let out = graph.run(&Record::new().with("x", 2)).unwrap();
        assert_eq!(out.i64("scaled").unwrap(), 20);
        let out = graph.run(&Record::new().with("x", 2).with("k", 3)).unwrap();
        assert_eq!(out.i64("scaled").unwrap(), 6);
    }

    #[test]
    fn test_eager_error_tagged_with_path() {
        let inner = RawGraph::new().leaf(
            "boom",
            FnNode::new(Schema::new().required("x"), |_| Err(CoreError::failed("bad input"))),
        );
        let raw = RawGraph::new().subgraph("outer", inner);
        let graph = EagerGraph::new(&build_graph(&raw).unwrap());

        let err = graph.run(&Record::new().with("x", 1)).unwrap_err();
        assert_eq!(
            err,
            CoreError::NodeExecution {
                node: "outer/boom".to_string(),
                message: "bad input".to_string(),
            }
        );
    }
}
