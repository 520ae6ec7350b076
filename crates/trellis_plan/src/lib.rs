//! Trellis Planner
//!
//! Turns an author's raw mapping of names to node functions (and nested
//! mappings) into a validated, topologically ordered graph with an inferred
//! composite input/output schema.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dag;
pub mod graph;
pub mod profile;
pub mod raw;
pub mod validate;

pub use dag::{Dag, Edge};
pub use graph::{Graph, Node, input_schema, output_schema};
pub use profile::{ProfileLog, with_profiling};
pub use raw::{RawGraph, RawNode};
pub use trellis_core::io_schemata;
pub use validate::{OrderMode, Validator, build_graph, build_ordered_graph, is_graph};
