//! Error types for jitscope-graph

use thiserror::Error;

/// Errors raised by graph queries and scope planning
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Trace edge with a missing identifier
    #[error("Invalid edge #{index}: {reason}")]
    InvalidEdge { index: usize, reason: String },

    /// Unit absent from every trace and never registered
    #[error("Unknown target unit: {0}")]
    UnknownTargetUnit(String),

    /// Deny filters would remove the unit a breakpoint lives in
    #[error("Target unit {target} excluded by deny pattern '{pattern}'")]
    TargetExcluded { target: String, pattern: String },

    /// Glob pattern that failed to compile
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl GraphError {
    pub fn invalid_pattern<E: std::fmt::Display>(pattern: &str, e: E) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        }
    }
}

/// Result type alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
