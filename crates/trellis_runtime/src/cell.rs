//! Write-once memo cells.
//!
//! A cell moves `Unstarted -> Running -> Done | Failed` exactly once. The
//! first caller of `claim` wins the right to compute; everyone else either
//! reads the stored result or (for the thread-safe cell) waits for it.

use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use trellis_core::{CoreError, CoreResult, Value};

/// Lifecycle of one node's result within one call
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellState {
    /// Not yet claimed
    #[default]
    Unstarted,
    /// Claimed; the value is being computed
    Running,
    /// Computed successfully
    Done(Value),
    /// Computation failed
    Failed(CoreError),
}

impl CellState {
    /// Move to `Running` if unclaimed; returns whether the caller won
    pub fn acquire(&mut self) -> bool {
        if matches!(self, Self::Unstarted) {
            *self = Self::Running;
            true
        } else {
            false
        }
    }

    /// Stored result, if finished
    #[must_use]
    pub fn result(&self) -> Option<CoreResult<Value>> {
        match self {
            Self::Done(value) => Some(Ok(value.clone())),
            Self::Failed(err) => Some(Err(err.clone())),
            Self::Unstarted | Self::Running => None,
        }
    }

    /// Whether a result is stored
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }

    fn finish(&mut self, result: &CoreResult<Value>) {
        *self = match result {
            Ok(value) => Self::Done(value.clone()),
            Err(err) => Self::Failed(err.clone()),
        };
    }
}

/// Outcome of trying to claim a cell
#[derive(Debug)]
pub enum Claim {
    /// The caller must compute and then `finish` the cell
    Acquired,
    /// Someone else is computing
    Busy,
    /// Result already stored
    Ready(CoreResult<Value>),
}

fn claim(state: &mut CellState) -> Claim {
    if state.acquire() {
        return Claim::Acquired;
    }
    match state.result() {
        Some(result) => Claim::Ready(result),
        None => Claim::Busy,
    }
}

/// Single-threaded cell for lazy evaluation
#[derive(Debug, Default)]
pub struct LazyCell {
    state: RefCell<CellState>,
}

impl LazyCell {
    /// Create an unclaimed cell
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the cell for computation
    pub fn claim(&self) -> Claim {
        claim(&mut self.state.borrow_mut())
    }

    /// Store the result and hand it back
    pub fn finish(&self, result: CoreResult<Value>) -> CoreResult<Value> {
        self.state.borrow_mut().finish(&result);
        result
    }

    /// Stored result, if finished
    #[must_use]
    pub fn get(&self) -> Option<CoreResult<Value>> {
        self.state.borrow().result()
    }

    /// Whether a result is stored
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_finished()
    }
}

/// Thread-safe cell with blocking readers
#[derive(Debug, Default)]
pub struct SyncCell {
    state: Mutex<CellState>,
    finished: Condvar,
}

impl SyncCell {
    /// Create an unclaimed cell
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the cell for computation
    pub fn claim(&self) -> Claim {
        claim(&mut self.state.lock())
    }

    /// Store the result and wake every waiter
    pub fn finish(&self, result: CoreResult<Value>) {
        let mut state = self.state.lock();
        state.finish(&result);
        self.finished.notify_all();
    }

    /// Block until a result is stored
    pub fn wait(&self) -> CoreResult<Value> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.result() {
                return result;
            }
            self.finished.wait(&mut state);
        }
    }

    /// Stored result, if finished
    #[must_use]
    pub fn get(&self) -> Option<CoreResult<Value>> {
        self.state.lock().result()
    }

    /// Whether a result is stored
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.lock().is_finished()
    }
}
