//! Interpretation state
//!
//! Per-session authority over which units are interpreted and which
//! breakpoints are set. Only the coordinator mutates it, under its mutation
//! lock; readers get `StatusSnapshot`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoordinatorError, FailureReason, Result};

/// Per-unit lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Uninterpreted,
    /// Mutation in flight
    Interpreting,
    Interpreted,
    /// Session teardown (terminal)
    Unloaded,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Uninterpreted => "uninterpreted",
            UnitState::Interpreting => "interpreting",
            UnitState::Interpreted => "interpreted",
            UnitState::Unloaded => "unloaded",
        }
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
struct UnitRecord {
    state: UnitState,
    /// State before the in-flight mutation started
    entered_from: UnitState,
    breakpoints: BTreeSet<u32>,
    /// Why the last interpretation failed; cleared on success
    last_error: Option<FailureReason>,
    updated_at: DateTime<Utc>,
}

impl UnitRecord {
    fn new() -> Self {
        Self {
            state: UnitState::Uninterpreted,
            entered_from: UnitState::Uninterpreted,
            breakpoints: BTreeSet::new(),
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Read-only view published after every mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub session_id: Uuid,
    pub interpreted_count: usize,
    /// Sorted by name
    pub interpreted_units: Vec<String>,
    pub sequence_number: u64,
    pub breakpoints: BTreeMap<String, Vec<u32>>,
    /// Last interpretation failure of each uninterpreted unit
    pub last_errors: BTreeMap<String, FailureReason>,
    pub enabled: bool,
    pub session_ended: bool,
    pub updated_at: DateTime<Utc>,
}

/// Session-scoped interpretation state
#[derive(Debug)]
pub struct InterpretationState {
    session_id: Uuid,
    sequence: u64,
    units: BTreeMap<String, UnitRecord>,
    ended: bool,
    /// Set by any change since `begin_request`
    dirty: bool,
    updated_at: DateTime<Utc>,
}

impl Default for InterpretationState {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpretationState {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            sequence: 0,
            units: BTreeMap::new(),
            ended: false,
            dirty: false,
            updated_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Start a coordination request; returns its tentative sequence number
    pub fn begin_request(&mut self) -> u64 {
        self.dirty = false;
        self.sequence + 1
    }

    /// Close a request: the sequence advances only if the state changed, so
    /// a no-op request leaves the published status untouched
    pub fn finish_request(&mut self) -> u64 {
        if self.dirty {
            self.sequence += 1;
            self.dirty = false;
        }
        self.sequence
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.ended {
            return Err(CoordinatorError::SessionEnded);
        }
        Ok(())
    }

    pub fn state_of(&self, unit: &str) -> UnitState {
        self.units
            .get(unit)
            .map(|r| r.state)
            .unwrap_or(UnitState::Uninterpreted)
    }

    pub fn is_interpreted(&self, unit: &str) -> bool {
        self.state_of(unit) == UnitState::Interpreted
    }

    pub fn interpreted_units(&self) -> Vec<String> {
        self.units
            .iter()
            .filter(|(_, r)| r.state == UnitState::Interpreted)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn interpreted_set(&self) -> HashSet<String> {
        self.interpreted_units().into_iter().collect()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Transitions
    // ═══════════════════════════════════════════════════════════════════

    /// Transition: UNINTERPRETED | INTERPRETED → INTERPRETING
    pub fn begin_interpret(&mut self, unit: &str) -> Result<()> {
        self.ensure_active()?;
        let record = self.units.entry(unit.to_string()).or_insert_with(UnitRecord::new);
        match record.state {
            UnitState::Uninterpreted | UnitState::Interpreted => {
                record.entered_from = record.state;
                record.state = UnitState::Interpreting;
                record.updated_at = Utc::now();
                self.dirty = true;
                debug!(unit, from = record.entered_from.as_str(), "Unit interpreting");
                Ok(())
            }
            other => Err(invalid(unit, other, UnitState::Interpreting)),
        }
    }

    /// Transition: INTERPRETING → INTERPRETED
    pub fn finish_interpret(&mut self, unit: &str) -> Result<()> {
        self.transition(unit, UnitState::Interpreting, UnitState::Interpreted)?;
        if let Some(record) = self.units.get_mut(unit) {
            record.last_error = None;
        }
        Ok(())
    }

    /// Transition: INTERPRETING → UNINTERPRETED
    ///
    /// The runtime no longer holds any breakpoint of the unit; the failure
    /// is kept until the next successful interpretation.
    pub fn fail_interpret(&mut self, unit: &str, reason: FailureReason) -> Result<()> {
        self.transition(unit, UnitState::Interpreting, UnitState::Uninterpreted)?;
        if let Some(record) = self.units.get_mut(unit) {
            record.breakpoints.clear();
            record.last_error = Some(reason);
        }
        Ok(())
    }

    pub fn last_error(&self, unit: &str) -> Option<&FailureReason> {
        self.units.get(unit).and_then(|r| r.last_error.as_ref())
    }

    /// Transition: INTERPRETING → state before the mutation
    ///
    /// Used when the mutation never reached the runtime.
    pub fn abort_interpret(&mut self, unit: &str) -> Result<()> {
        let back_to = self
            .units
            .get(unit)
            .map(|r| r.entered_from)
            .unwrap_or(UnitState::Uninterpreted);
        self.transition(unit, UnitState::Interpreting, back_to)
    }

    /// Transition: * → UNLOADED (all units, session end)
    ///
    /// Returns the units that were interpreted.
    pub fn unload_all(&mut self) -> Vec<String> {
        let interpreted = self.interpreted_units();
        let now = Utc::now();
        for record in self.units.values_mut() {
            record.state = UnitState::Unloaded;
            record.breakpoints.clear();
            record.updated_at = now;
        }
        self.ended = true;
        self.dirty = true;
        self.updated_at = now;
        interpreted
    }

    fn transition(&mut self, unit: &str, from: UnitState, to: UnitState) -> Result<()> {
        match self.units.get_mut(unit) {
            Some(record) if record.state == from => {
                record.state = to;
                record.updated_at = Utc::now();
                self.updated_at = record.updated_at;
                self.dirty = true;
                debug!(unit, from = from.as_str(), to = to.as_str(), "Unit transition");
                Ok(())
            }
            Some(record) => Err(invalid(unit, record.state, to)),
            None => Err(invalid(unit, UnitState::Uninterpreted, to)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Breakpoints
    // ═══════════════════════════════════════════════════════════════════

    pub fn breakpoints(&self, unit: &str) -> BTreeSet<u32> {
        self.units
            .get(unit)
            .map(|r| r.breakpoints.clone())
            .unwrap_or_default()
    }

    pub fn has_breakpoint(&self, unit: &str, line: u32) -> bool {
        self.units
            .get(unit)
            .map(|r| r.breakpoints.contains(&line))
            .unwrap_or(false)
    }

    /// Record an installed breakpoint; the unit must be interpreted
    pub fn add_breakpoint(&mut self, unit: &str, line: u32) -> Result<()> {
        match self.units.get_mut(unit) {
            Some(record) if record.state == UnitState::Interpreted => {
                record.breakpoints.insert(line);
                record.updated_at = Utc::now();
                self.updated_at = record.updated_at;
                self.dirty = true;
                Ok(())
            }
            Some(record) => Err(invalid(unit, record.state, UnitState::Interpreted)),
            None => Err(invalid(unit, UnitState::Uninterpreted, UnitState::Interpreted)),
        }
    }

    pub fn set_breakpoints(&mut self, unit: &str, lines: BTreeSet<u32>) {
        if let Some(record) = self.units.get_mut(unit) {
            if record.breakpoints != lines {
                record.breakpoints = lines;
                self.dirty = true;
            }
            record.updated_at = Utc::now();
            self.updated_at = record.updated_at;
        }
    }

    /// Forget every breakpoint of a unit, returning the removed lines
    pub fn clear_breakpoints(&mut self, unit: &str) -> BTreeSet<u32> {
        match self.units.get_mut(unit) {
            Some(record) if !record.breakpoints.is_empty() => {
                self.updated_at = Utc::now();
                self.dirty = true;
                std::mem::take(&mut record.breakpoints)
            }
            Some(_) => BTreeSet::new(),
            None => BTreeSet::new(),
        }
    }

    pub fn snapshot(&self, enabled: bool) -> StatusSnapshot {
        let interpreted_units = self.interpreted_units();
        let breakpoints = self
            .units
            .iter()
            .filter(|(_, r)| !r.breakpoints.is_empty())
            .map(|(name, r)| (name.clone(), r.breakpoints.iter().copied().collect()))
            .collect();
        let last_errors = self
            .units
            .iter()
            .filter_map(|(name, r)| r.last_error.clone().map(|e| (name.clone(), e)))
            .collect();

        StatusSnapshot {
            session_id: self.session_id,
            interpreted_count: interpreted_units.len(),
            interpreted_units,
            sequence_number: self.sequence,
            breakpoints,
            last_errors,
            enabled,
            session_ended: self.ended,
            updated_at: self.updated_at,
        }
    }
}

fn invalid(unit: &str, from: UnitState, to: UnitState) -> CoordinatorError {
    CoordinatorError::InvalidStateTransition {
        unit: unit.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    }
}
