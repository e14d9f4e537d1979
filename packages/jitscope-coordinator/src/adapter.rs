//! Execution Adapter contract
//!
//! Narrow interface to the runtime that actually swaps a unit's code path
//! and pauses processes. Implementations usually cross a process or network
//! boundary, so every call is async and the coordinator wraps each one in a
//! deadline.
//!
//! Reinterpreting a unit drops every breakpoint previously set on it; the
//! coordinator relies on this and restores breakpoints itself.

use async_trait::async_trait;
use jitscope_graph::Unit;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime refused or failed to interpret a unit
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpretError {
    #[error("compile error in {unit}: {message}")]
    Compile { unit: String, message: String },
    #[error("unit not loaded: {0}")]
    NotLoaded(String),
    #[error("runtime refused {unit}: {message}")]
    Refused { unit: String, message: String },
}

/// Breakpoint could not be set or cleared
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BreakpointError {
    #[error("no executable code at {unit}:{line}")]
    InvalidLine { unit: String, line: u32 },
    #[error("unit is not interpreted: {0}")]
    NotInterpreted(String),
    #[error("breakpoint request failed: {0}")]
    Other(String),
}

/// Process currently paused at a line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedLocation {
    pub process_id: String,
    pub unit_name: String,
    pub line: u32,
}

impl PausedLocation {
    pub fn new(process_id: impl Into<String>, unit_name: impl Into<String>, line: u32) -> Self {
        Self {
            process_id: process_id.into(),
            unit_name: unit_name.into(),
            line,
        }
    }
}

/// Runtime interpreter toggle (external collaborator)
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Switch a unit into interpreted mode (also used to reinterpret)
    async fn interpret(&self, unit: &str) -> Result<Unit, InterpretError>;

    /// Switch a unit back to native execution
    async fn uninterpret(&self, unit: &str) -> Result<(), InterpretError>;

    async fn set_breakpoint(&self, unit: &str, line: u32) -> Result<(), BreakpointError>;

    /// Remove every breakpoint of a unit
    async fn clear_breakpoints(&self, unit: &str) -> Result<(), BreakpointError>;

    /// Processes paused right now, with the unit and line they sit in
    async fn list_paused_locations(&self) -> Vec<PausedLocation>;
}
