//! Execution monitor for metrics.
//!
//! Each compiled graph owns one monitor, shared by every call and every
//! worker thread. Counters cover the nodes of that graph's own level; a
//! nested subgraph counts as one node here and keeps its own monitor.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Execution metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Calls accepted (input check passed)
    pub calls: u64,
    /// Node functions invoked
    pub nodes_executed: u64,
    /// Node functions that returned a value
    pub nodes_completed: u64,
    /// Node functions that failed or panicked
    pub nodes_failed: u64,
    /// Nodes not run because a dependency failed
    pub nodes_skipped: u64,
}

impl Metrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.nodes_executed == 0 {
            return 1.0;
        }
        self.nodes_completed as f64 / self.nodes_executed as f64
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.nodes_executed == 0 {
            return 0.0;
        }
        self.nodes_failed as f64 / self.nodes_executed as f64
    }
}

/// Execution monitor
#[derive(Debug, Default)]
pub struct ExecutionMonitor {
    calls: AtomicU64,
    executed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl ExecutionMonitor {
    /// Create a new monitor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted call
    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a node invocation
    pub fn record_execution(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a node completion
    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a node failure
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a node skipped after an upstream failure
    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current metrics
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        Metrics {
            calls: self.calls.load(Ordering::Relaxed),
            nodes_executed: self.executed.load(Ordering::Relaxed),
            nodes_completed: self.completed.load(Ordering::Relaxed),
            nodes_failed: self.failed.load(Ordering::Relaxed),
            nodes_skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}
