//! Dataflow scheduler for one parallel call.
//!
//! The scheduler tracks, per node, how many dependencies are still
//! outstanding. Finishing a node (successfully or not) releases its
//! dependents; a dependent is ready exactly when its counter reaches zero,
//! so every node is handed out once and only after all of its inputs are
//! settled. All operations are lock-free and may run on any worker.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-call dependency countdown
#[derive(Debug)]
pub struct Scheduler {
    /// Outstanding dependencies per node
    remaining: Vec<AtomicUsize>,
    /// Nodes finished successfully
    completed: AtomicUsize,
    /// Nodes finished with an error
    failed: AtomicUsize,
}

impl Scheduler {
    /// Create a scheduler from each node's dependency count
    #[must_use]
    pub fn new(dependency_counts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            remaining: dependency_counts.into_iter().map(AtomicUsize::new).collect(),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Nodes with no dependencies, ready at the start of the call
    #[must_use]
    pub fn initial(&self) -> Vec<usize> {
        self.remaining
            .iter()
            .enumerate()
            .filter(|(_, r)| r.load(Ordering::Acquire) == 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Mark a node as completed; returns dependents that became ready
    pub fn mark_complete(&self, dependents: &[usize]) -> Vec<usize> {
        self.completed.fetch_add(1, Ordering::AcqRel);
        self.release(dependents)
    }

    /// Mark a node as failed; returns dependents that became ready (they
    /// observe the failure instead of running)
    pub fn mark_failed(&self, dependents: &[usize]) -> Vec<usize> {
        self.failed.fetch_add(1, Ordering::AcqRel);
        self.release(dependents)
    }

    fn release(&self, dependents: &[usize]) -> Vec<usize> {
        dependents
            .iter()
            .copied()
            .filter(|&d| self.remaining[d].fetch_sub(1, Ordering::AcqRel) == 1)
            .collect()
    }

    #[must_use]
    fn completed_count(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    #[must_use]
    fn failed_count(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    /// Check if every node has finished
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_count() + self.failed_count() == self.remaining.len()
    }

    /// Check if any node failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }
}
