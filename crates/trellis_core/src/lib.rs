//! Trellis Core Types
//!
//! Keys, values, records and schemas shared by every Trellis crate, plus the
//! node contract: anything callable with a [`Record`] that can also report
//! its input and output [`Schema`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod node;
pub mod record;
pub mod schema;
pub mod value;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use key::Key;
pub use node::{FnNode, IoSchema, NodeFn, io_schemata};
pub use record::Record;
pub use schema::{Entry, Schema};
pub use value::{Extension, Value};
