//! Shared models: units, trace edges, graph versions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Monotonic graph version (bumped on every ingest that adds an edge)
pub type GraphVersion = u64;

/// How a unit entered the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOrigin {
    /// Named by at least one ingested trace edge
    Traced,
    /// Resolved through the module lookup service
    Registered,
    /// Auto-created by a query for an unknown name
    Stub,
}

impl UnitOrigin {
    /// Traced/registered units are resolvable; stubs are not
    pub fn is_known(&self) -> bool {
        !matches!(self, UnitOrigin::Stub)
    }

    /// Keep the strongest origin when a unit is seen again
    pub(crate) fn promote(self, other: UnitOrigin) -> UnitOrigin {
        match (self, other) {
            (UnitOrigin::Traced, _) | (_, UnitOrigin::Traced) => UnitOrigin::Traced,
            (UnitOrigin::Registered, _) | (_, UnitOrigin::Registered) => UnitOrigin::Registered,
            _ => UnitOrigin::Stub,
        }
    }
}

/// Addressable code module that can be toggled into interpreted mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub name: String,
    pub interpreted: bool,
    #[serde(default)]
    pub breakpoints: BTreeSet<u32>,
}

impl Unit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interpreted: false,
            breakpoints: BTreeSet::new(),
        }
    }

    pub fn interpreted(name: impl Into<String>) -> Self {
        Self {
            interpreted: true,
            ..Self::new(name)
        }
    }
}

/// Kind of depends-on relation observed in a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    StaticCall,
    DynamicDispatchHint,
    AliasUse,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::StaticCall => "static_call",
            EdgeKind::DynamicDispatchHint => "dynamic_dispatch_hint",
            EdgeKind::AliasUse => "alias_use",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confidence tag of an edge
///
/// `Definite` edges feed the minimal scope; `Conservative` edges are only
/// followed by the conservative and transitive policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStrength {
    Definite,
    Conservative,
}

impl Default for EdgeStrength {
    fn default() -> Self {
        EdgeStrength::Definite
    }
}

/// Directed `caller → callee` relation
///
/// Edges are immutable values; identity is the full tuple, so a batch that
/// repeats an edge coalesces into one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub caller: String,
    pub callee: String,
    pub kind: EdgeKind,
    #[serde(default)]
    pub strength: EdgeStrength,
}

impl Edge {
    pub fn new(caller: impl Into<String>, callee: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            caller: caller.into(),
            callee: callee.into(),
            kind,
            strength: EdgeStrength::Definite,
        }
    }

    /// Statically observed call (definite)
    pub fn call(caller: impl Into<String>, callee: impl Into<String>) -> Self {
        Self::new(caller, callee, EdgeKind::StaticCall)
    }

    /// Dynamic dispatch hint (conservative-only)
    pub fn dispatch_hint(caller: impl Into<String>, callee: impl Into<String>) -> Self {
        Self::new(caller, callee, EdgeKind::DynamicDispatchHint).with_strength(EdgeStrength::Conservative)
    }

    pub fn with_strength(mut self, strength: EdgeStrength) -> Self {
        self.strength = strength;
        self
    }

    /// Reject edges with missing identifiers (self-references are allowed)
    pub(crate) fn validate(&self) -> Option<String> {
        if self.caller.trim().is_empty() {
            return Some(format!("empty caller (callee: '{}')", self.callee));
        }
        if self.callee.trim().is_empty() {
            return Some(format!("empty callee (caller: '{}')", self.caller));
        }
        None
    }
}
