//! Core error types for Trellis.
//!
//! Errors are `Clone` so a failed computation cell can hand the identical
//! error to every dependent and every reader.

use crate::key::Key;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// No topological order exists
    #[error("cycle detected: {}", join_path(path, " -> "))]
    Cycle {
        /// Nodes on the cycle, first node repeated at the end
        path: Vec<Key>,
    },

    /// Strict construction found a node declared before one of its producers
    #[error("node `{node}` is declared before its dependency `{dependency}`")]
    Order {
        /// The consuming node
        node: Key,
        /// The producer declared later
        dependency: Key,
    },

    /// Malformed node or unresolvable nested key reference
    #[error("schema error at `{at}`: {reason}")]
    Schema {
        /// Dotted location of the problem
        at: String,
        /// What is wrong
        reason: String,
    },

    /// Required key absent at call time
    #[error("missing required key `{path}`")]
    MissingKey {
        /// Dotted key path
        path: String,
    },

    /// A node function's own logic failed
    #[error("node `{node}` failed: {message}")]
    NodeExecution {
        /// Slash-joined path of the failing node (empty until tagged)
        node: String,
        /// Error message
        message: String,
    },

    /// Execution machinery failure (worker pool, re-entrant forcing)
    #[error("runtime error: {message}")]
    Runtime {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Error raised from inside a node function
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: String::new(),
            message: message.into(),
        }
    }

    /// Schema error at a location
    #[must_use]
    pub fn schema(at: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            at: at.into(),
            reason: reason.into(),
        }
    }

    /// Missing key at a dotted path
    #[must_use]
    pub fn missing(path: impl Into<String>) -> Self {
        Self::MissingKey { path: path.into() }
    }

    /// Runtime machinery error
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Tag a node execution error with the key of the node it passed through.
    ///
    /// Paths grow outward: an error raised in `inner` and propagated through
    /// `outer` reads `outer/inner`. Other variants are returned unchanged.
    #[must_use]
    pub fn at_node(self, key: &Key) -> Self {
        match self {
            Self::NodeExecution { node, message } => {
                let node = if node.is_empty() {
                    key.to_string()
                } else {
                    format!("{key}/{node}")
                };
                Self::NodeExecution { node, message }
            }
            other => other,
        }
    }

    /// Whether this error was detected while building a graph
    #[must_use]
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. } | Self::Order { .. } | Self::Schema { .. }
        )
    }
}

fn join_path(path: &[Key], sep: &str) -> String {
    path.iter()
        .map(Key::as_str)
        .collect::<Vec<_>>()
        .join(sep)
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::schema("json", err.to_string())
    }
}
