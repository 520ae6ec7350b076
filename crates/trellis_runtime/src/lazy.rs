//! Lazy compilation.
//!
//! A call returns immediately with one unforced cell per node. Reading a
//! cell forces its dependencies first, runs the node once, and caches the
//! result; later reads (from the caller or from other nodes) reuse it.
//! Everything happens on the reading thread.

use crate::cell::{Claim, LazyCell};
use crate::config::Strategy;
use crate::monitor::ExecutionMonitor;
use crate::program::Program;
use std::fmt;
use std::sync::Arc;
use trellis_core::{CoreError, CoreResult, IoSchema, Key, NodeFn, Record, Schema, Value};
use trellis_plan::Graph;

/// A graph compiled for on-demand evaluation
pub struct LazyGraph {
    program: Program,
    monitor: ExecutionMonitor,
}

impl LazyGraph {
    /// Compile a graph; nested subgraphs are compiled lazily too
    #[must_use]
    pub fn new(graph: &Graph) -> Self {
        let program = Program::build(graph, Strategy::Lazy, |sub| Arc::new(Self::new(sub)));
        Self {
            program,
            monitor: ExecutionMonitor::new(),
        }
    }

    /// Bind the input and return unforced cells
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` if the input lacks a required key
    pub fn call_deferred(&self, input: &Record) -> CoreResult<LazyRecord<'_>> {
        self.program.input.check(input)?;
        self.monitor.record_call();

        Ok(LazyRecord {
            graph: self,
            input: input.clone(),
            cells: (0..self.program.len()).map(|_| LazyCell::new()).collect(),
        })
    }

    /// Force every node and return the produced record
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` for an incomplete input, or the first node error
    /// in evaluation order
    pub fn run(&self, input: &Record) -> CoreResult<Record> {
        self.call_deferred(input)?.force_all()
    }

    /// Execution counters
    #[must_use]
    pub fn monitor(&self) -> &ExecutionMonitor {
        &self.monitor
    }
}

impl IoSchema for LazyGraph {
    fn input_schema(&self) -> &Schema {
        &self.program.input
    }

    fn output_schema(&self) -> &Schema {
        &self.program.output
    }
}

impl NodeFn for LazyGraph {
    fn call(&self, input: &Record) -> CoreResult<Value> {
        self.run(input).map(Value::Record)
    }
}

/// Output record of one lazy call
pub struct LazyRecord<'g> {
    graph: &'g LazyGraph,
    input: Record,
    cells: Vec<LazyCell>,
}

impl LazyRecord<'_> {
    /// Read a produced key, forcing it (and its dependencies) if needed
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` if the graph does not produce `key`, otherwise
    /// whatever forcing the node returns
    pub fn get(&self, key: &str) -> CoreResult<Value> {
        let unit = self
            .graph
            .program
            .index_of(key)
            .ok_or_else(|| CoreError::missing(key))?;
        self.force(unit)
    }

    /// Whether a key has been forced
    #[must_use]
    pub fn is_realized(&self, key: &str) -> bool {
        self.graph
            .program
            .index_of(key)
            .is_some_and(|unit| self.cells[unit].is_finished())
    }

    /// Produced keys, in evaluation order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.graph.program.units.iter().map(|u| &u.key)
    }

    /// Force every node, in evaluation order
    ///
    /// # Errors
    ///
    /// Returns the first node error in evaluation order
    pub fn force_all(&self) -> CoreResult<Record> {
        let values = (0..self.cells.len())
            .map(|unit| self.force(unit))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(self.graph.program.collect(values))
    }

    fn force(&self, unit: usize) -> CoreResult<Value> {
        match self.cells[unit].claim() {
            Claim::Acquired => {}
            Claim::Ready(result) => return result,
            Claim::Busy => {
                return Err(CoreError::runtime(format!(
                    "node `{}` was read while it was being computed",
                    self.graph.program.units[unit].key
                )));
            }
        }

        let program = &self.graph.program;
        for &dep in &program.units[unit].deps {
            if let Err(err) = self.force(dep) {
                self.graph.monitor.record_skip();
                return self.cells[unit].finish(Err(err));
            }
        }

        let result = program
            .gather(unit, &self.input, |i| self.cells[i].get().and_then(Result::ok))
            .and_then(|args| program.execute(unit, &args, &self.graph.monitor));
        self.cells[unit].finish(result)
    }
}

impl fmt::Debug for LazyRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (unit, key) in self.keys().enumerate() {
            match self.cells[unit].get() {
                Some(Ok(value)) => map.entry(key, &value),
                Some(Err(err)) => map.entry(key, &err),
                None => map.entry(key, &format_args!("<deferred>")),
            };
        }
        map.finish()
    }
}
