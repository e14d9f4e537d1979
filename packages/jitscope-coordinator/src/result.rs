//! Request and result payloads of the coordination operations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::FailureReason;
use crate::resolver::BreakpointLocation;

/// One breakpoint the developer wants honored
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointRequest {
    pub location: BreakpointLocation,
    pub line: u32,
}

impl BreakpointRequest {
    pub fn new(unit: impl Into<String>, line: u32) -> Self {
        Self {
            location: BreakpointLocation::Unit(unit.into()),
            line,
        }
    }

    pub fn in_file(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            location: BreakpointLocation::File(file.into()),
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BreakpointStatus {
    Installed,
    /// Already set on an interpreted unit; no adapter call made
    AlreadySet,
    /// Coordination disabled
    Skipped,
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointOutcome {
    pub location: BreakpointLocation,
    pub line: u32,
    /// Owning unit, when resolution succeeded
    pub unit: Option<String>,
    #[serde(flatten)]
    pub status: BreakpointStatus,
}

impl BreakpointOutcome {
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            BreakpointStatus::Installed | BreakpointStatus::AlreadySet
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit: String,
    pub reason: FailureReason,
}

impl UnitFailure {
    pub fn new(unit: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            unit: unit.into(),
            reason,
        }
    }
}

/// Unit is interpreted but some of its breakpoints could not be restored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreWarning {
    pub unit: String,
    pub lost_lines: Vec<u32>,
    pub reason: String,
}

impl RestoreWarning {
    pub fn kind(&self) -> &'static str {
        "partial_restore"
    }
}

impl std::fmt::Display for RestoreWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "partial restore of {}: lines {:?} lost ({})",
            self.unit, self.lost_lines, self.reason
        )
    }
}

/// Outcome of one coordination request
///
/// Partial success is the normal case: every failed unit and breakpoint is
/// listed, the rest proceeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationResult {
    pub sequence: u64,
    /// Units newly interpreted (or reinterpreted) by this request
    pub interpreted: Vec<String>,
    pub failed: Vec<UnitFailure>,
    pub breakpoints: Vec<BreakpointOutcome>,
    pub warnings: Vec<RestoreWarning>,
    pub total_time_ms: u64,
}

impl CoordinationResult {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self
                .breakpoints
                .iter()
                .all(|b| !matches!(b.status, BreakpointStatus::Failed { .. }))
    }

    /// Any failure a later attempt could fix
    pub fn has_transient_failures(&self) -> bool {
        self.failed.iter().any(|f| f.reason.is_transient())
    }

    pub fn failure_for(&self, unit: &str) -> Option<&FailureReason> {
        self.failed.iter().find(|f| f.unit == unit).map(|f| &f.reason)
    }

    /// Fold an earlier attempt of the same request into this one
    pub fn absorb_earlier(&mut self, earlier: CoordinationResult) {
        let mut interpreted = earlier.interpreted;
        for unit in self.interpreted.drain(..) {
            if !interpreted.contains(&unit) {
                interpreted.push(unit);
            }
        }
        self.interpreted = interpreted;

        let mut warnings = earlier.warnings;
        warnings.append(&mut self.warnings);
        self.warnings = warnings;

        self.total_time_ms += earlier.total_time_ms;
    }
}
