//! The node function contract.
//!
//! Every computation a graph composes (a hand-written leaf, a compiled
//! graph, an instrumented wrapper) satisfies the same two traits, so the
//! planner and runtime never need to ask which kind of node they hold.

use crate::error::CoreResult;
use crate::record::Record;
use crate::schema::Schema;
use crate::value::Value;
use std::fmt;

/// Anything exposing an input and output schema
pub trait IoSchema {
    /// Keys read, each required, optional-with-default, or nested
    fn input_schema(&self) -> &Schema;

    /// Fields of the produced value (empty for an opaque value)
    fn output_schema(&self) -> &Schema;

    /// Both schemas at once
    fn io_schemata(&self) -> (&Schema, &Schema) {
        (self.input_schema(), self.output_schema())
    }
}

/// A record-to-value callable annotated with schemas
pub trait NodeFn: IoSchema + Send + Sync {
    /// Invoke with a record holding (at least) the keys of the input schema
    ///
    /// # Errors
    ///
    /// Returns error if the node's own logic fails or a required key is absent
    fn call(&self, input: &Record) -> CoreResult<Value>;
}

/// Input and output schema of any node or graph
pub fn io_schemata<T: IoSchema + ?Sized>(node: &T) -> (&Schema, &Schema) {
    node.io_schemata()
}

type LeafFn = dyn Fn(&Record) -> CoreResult<Value> + Send + Sync;

/// Leaf node backed by a closure
pub struct FnNode {
    input: Schema,
    output: Schema,
    f: Box<LeafFn>,
}

impl FnNode {
    /// Leaf producing an opaque value
    pub fn new<F>(input: Schema, f: F) -> Self
    where
        F: Fn(&Record) -> CoreResult<Value> + Send + Sync + 'static,
    {
        Self {
            input,
            output: Schema::new(),
            f: Box::new(f),
        }
    }

    /// Declare the fields of the produced value
    #[must_use]
    pub fn with_output(mut self, output: Schema) -> Self {
        self.output = output;
        self
    }
}

impl IoSchema for FnNode {
    fn input_schema(&self) -> &Schema {
        &self.input
    }

    fn output_schema(&self) -> &Schema {
        &self.output
    }
}

impl NodeFn for FnNode {
    fn call(&self, input: &Record) -> CoreResult<Value> {
        (self.f)(input)
    }
}

impl fmt::Debug for FnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNode")
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}
