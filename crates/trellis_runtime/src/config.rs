//! Compilation options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use trellis_core::{CoreError, CoreResult, Key};

/// Execution strategy of a compiled graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Evaluate every node in order before returning
    #[default]
    Eager,
    /// Evaluate each node on first read, at most once
    Lazy,
    /// Evaluate independent nodes concurrently
    Parallel,
}

impl Strategy {
    /// All strategies
    pub const ALL: [Strategy; 3] = [Self::Eager, Self::Lazy, Self::Parallel];

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eager => "eager",
            Self::Lazy => "lazy",
            Self::Parallel => "parallel",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            "parallel" => Ok(Self::Parallel),
            other => Err(CoreError::runtime(format!("unknown strategy `{other}`"))),
        }
    }
}

/// Worker pool settings for the parallel strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Upper bound on concurrently running leaf functions
    pub max_blocking_threads: usize,
    /// Name given to worker threads
    pub thread_name: String,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_blocking_threads: 64,
            thread_name: "trellis-worker".to_string(),
        }
    }
}

/// Options for [`compile`](crate::compile)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Execution strategy
    pub strategy: Strategy,
    /// Wrap the graph with per-leaf timing under this key
    pub profile_key: Option<Key>,
    /// Parallel worker pool settings
    pub parallel: ParallelConfig,
}

impl CompileOptions {
    /// Options for a strategy with no profiling
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Enable profiling under a key
    #[must_use]
    pub fn with_profiling(mut self, key: impl Into<Key>) -> Self {
        self.profile_key = Some(key.into());
        self
    }

    /// Set parallel worker pool settings
    #[must_use]
    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    /// Load from JSON; absent fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
