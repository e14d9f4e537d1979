use jitscope_graph::GraphError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::{BreakpointError, InterpretError};
use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid state transition for {unit}: {from} -> {to}")]
    InvalidStateTransition {
        unit: String,
        from: String,
        to: String,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Debug session has ended")]
    SessionEnded,

    #[error("Coordinator service is not running")]
    ServiceClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Trace source error: {0}")]
    TraceSource(#[source] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordinatorError {
    /// Stable identifier used in API error replies
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::Graph(GraphError::UnknownTargetUnit(_)) => "unknown_target_unit",
            CoordinatorError::Graph(GraphError::TargetExcluded { .. }) => "target_excluded",
            CoordinatorError::Graph(_) => "graph",
            CoordinatorError::Config(_) => "config",
            CoordinatorError::InvalidStateTransition { .. } => "invalid_state_transition",
            CoordinatorError::Timeout(_) => "timeout",
            CoordinatorError::Cancelled(_) => "cancelled",
            CoordinatorError::SessionEnded => "session_ended",
            CoordinatorError::ServiceClosed => "service_closed",
            CoordinatorError::Protocol(_) => "protocol",
            CoordinatorError::TraceSource(_) => "trace_source",
            CoordinatorError::Serialization(_) => "parse",
            CoordinatorError::Io(_) => "io",
        }
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// May succeed on a later attempt (timeout, paused process)
    Transient,
    /// Will fail again until something changes (compile error, bad target)
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a unit or breakpoint was not honored
///
/// Carried as data inside `CoordinationResult`; never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    UnknownTargetUnit {
        unit: String,
    },
    TargetExcluded {
        unit: String,
        pattern: String,
    },
    InvalidPattern {
        message: String,
    },
    InvalidTrace {
        message: String,
    },
    Interpret {
        message: String,
    },
    Breakpoint {
        message: String,
    },
    UnsafeMutationWindow {
        process_ids: Vec<String>,
        attempts: u32,
    },
    Timeout {
        operation: String,
        after_ms: u64,
    },
    Cancelled {
        operation: String,
    },
    /// Breakpoint target did not reach the interpreted state
    NotInterpreted {
        unit: String,
    },
    SessionEnded,
}

impl FailureReason {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FailureReason::Timeout { .. } | FailureReason::UnsafeMutationWindow { .. } => {
                ErrorCategory::Transient
            }
            _ => ErrorCategory::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::UnknownTargetUnit { unit } => write!(f, "unknown target unit {}", unit),
            FailureReason::TargetExcluded { unit, pattern } => {
                write!(f, "{} excluded by deny pattern '{}'", unit, pattern)
            }
            FailureReason::InvalidPattern { message } => write!(f, "invalid pattern: {}", message),
            FailureReason::InvalidTrace { message } => write!(f, "invalid trace: {}", message),
            FailureReason::Interpret { message } => write!(f, "interpret failed: {}", message),
            FailureReason::Breakpoint { message } => write!(f, "breakpoint failed: {}", message),
            FailureReason::UnsafeMutationWindow {
                process_ids,
                attempts,
            } => write!(
                f,
                "paused processes [{}] still inside unit after {} attempts",
                process_ids.join(", "),
                attempts
            ),
            FailureReason::Timeout {
                operation,
                after_ms,
            } => write!(f, "{} timed out after {}ms", operation, after_ms),
            FailureReason::Cancelled { operation } => write!(f, "{} cancelled", operation),
            FailureReason::NotInterpreted { unit } => write!(f, "unit {} is not interpreted", unit),
            FailureReason::SessionEnded => write!(f, "debug session has ended"),
        }
    }
}

impl From<GraphError> for FailureReason {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::UnknownTargetUnit(unit) => FailureReason::UnknownTargetUnit { unit },
            GraphError::TargetExcluded { target, pattern } => FailureReason::TargetExcluded {
                unit: target,
                pattern,
            },
            GraphError::InvalidPattern { pattern, message } => FailureReason::InvalidPattern {
                message: format!("{}: {}", pattern, message),
            },
            GraphError::InvalidEdge { index, reason } => FailureReason::InvalidTrace {
                message: format!("edge #{}: {}", index, reason),
            },
        }
    }
}

impl From<InterpretError> for FailureReason {
    fn from(err: InterpretError) -> Self {
        FailureReason::Interpret {
            message: err.to_string(),
        }
    }
}

impl From<BreakpointError> for FailureReason {
    fn from(err: BreakpointError) -> Self {
        FailureReason::Breakpoint {
            message: err.to_string(),
        }
    }
}
