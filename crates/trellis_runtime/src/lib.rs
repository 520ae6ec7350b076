//! Trellis Runtime
//!
//! Compiles validated graphs into callable node functions. Three strategies
//! share one contract and produce identical results: eager evaluates every
//! node in order before returning, lazy defers each node until its value is
//! read, and parallel schedules one blocking task per node as soon as its
//! dependencies finish.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod compile;
pub mod config;
pub mod eager;
pub mod lazy;
pub mod monitor;
pub mod parallel;
mod program;
pub mod scheduler;

pub use cell::{CellState, Claim, LazyCell, SyncCell};
pub use compile::{Compiled, compile, compile_eager, compile_lazy, compile_parallel};
pub use config::{CompileOptions, ParallelConfig, Strategy};
pub use eager::EagerGraph;
pub use lazy::{LazyGraph, LazyRecord};
pub use monitor::{ExecutionMonitor, Metrics};
pub use parallel::{ParallelGraph, PendingRecord};
pub use scheduler::Scheduler;
