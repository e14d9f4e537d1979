//! Scope Planner
//!
//! Translates a `ScopeRequest` into the set of units that must be
//! interpreted so a breakpoint in the target unit is honored.
//!
//! Policies:
//! - minimal:       target + definite direct dependencies
//! - conservative:  target + all direct dependencies + reverse dependencies
//! - transitive[d]: target + breadth-first closure bounded by `d`
//!
//! Results are cached per request and invalidated by graph version.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::dependency_graph::DependencyGraph;
use crate::errors::{GraphError, Result};
use crate::models::{EdgeStrength, GraphVersion};
use crate::patterns::PatternFilter;

/// Default heuristic cost of interpreting one unit
pub const DEFAULT_COST_PER_UNIT_MS: u64 = 25;

/// How far the dependency closure extends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePolicy {
    Minimal,
    Conservative,
    /// Negative depth is unbounded
    Transitive { depth: i32 },
}

impl Default for ScopePolicy {
    fn default() -> Self {
        ScopePolicy::Conservative
    }
}

impl std::fmt::Display for ScopePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopePolicy::Minimal => write!(f, "minimal"),
            ScopePolicy::Conservative => write!(f, "conservative"),
            ScopePolicy::Transitive { depth } => write!(f, "transitive[{}]", depth),
        }
    }
}

impl FromStr for ScopePolicy {
    type Err = String;

    /// Parses `minimal`, `conservative`, `transitive` (unbounded) or `transitive[3]`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "minimal" => return Ok(ScopePolicy::Minimal),
            "conservative" => return Ok(ScopePolicy::Conservative),
            "transitive" => return Ok(ScopePolicy::Transitive { depth: -1 }),
            _ => {}
        }

        s.strip_prefix("transitive[")
            .and_then(|rest| rest.strip_suffix(']'))
            .and_then(|depth| depth.trim().parse::<i32>().ok())
            .map(|depth| ScopePolicy::Transitive { depth })
            .ok_or_else(|| {
                format!(
                    "Unknown policy '{}'. Valid policies: minimal, conservative, transitive[depth]",
                    s
                )
            })
    }
}

/// Size classification used to choose immediate vs. background execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Complexity {
    pub fn from_unit_count(count: usize) -> Self {
        match count {
            0..=4 => Complexity::Low,
            5..=14 => Complexity::Medium,
            15..=39 => Complexity::High,
            _ => Complexity::VeryHigh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
            Complexity::VeryHigh => "very_high",
        }
    }
}

/// Scope request (immutable, built per call)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRequest {
    pub target: String,
    pub policy: ScopePolicy,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ScopeRequest {
    pub fn new(target: impl Into<String>, policy: ScopePolicy) -> Self {
        Self {
            target: target.into(),
            policy,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    pub fn minimal(target: impl Into<String>) -> Self {
        Self::new(target, ScopePolicy::Minimal)
    }

    pub fn conservative(target: impl Into<String>) -> Self {
        Self::new(target, ScopePolicy::Conservative)
    }

    pub fn transitive(target: impl Into<String>, depth: i32) -> Self {
        Self::new(target, ScopePolicy::Transitive { depth })
    }

    pub fn allow(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allow.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn deny(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deny.extend(patterns.into_iter().map(Into::into));
        self
    }
}

/// Units to interpret for one target, in discovery order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeResult {
    pub target: String,
    /// Target first, then dependencies in discovery order
    pub units: Vec<String>,
    pub policy: ScopePolicy,
    pub estimated_interpretation_time_ms: u64,
    pub complexity: Complexity,
    /// Graph version the result was computed at
    pub graph_version: GraphVersion,
    /// Units removed by allow/deny filters
    pub excluded: Vec<String>,
}

impl ScopeResult {
    pub fn contains(&self, unit: &str) -> bool {
        self.units.iter().any(|u| u == unit)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Union of several scopes minus units that are already interpreted
///
/// Order follows first appearance; as a set the merge is commutative and
/// idempotent.
pub fn merge_scopes<'a>(
    results: impl IntoIterator<Item = &'a ScopeResult>,
    already_interpreted: &HashSet<String>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for result in results {
        for unit in &result.units {
            if already_interpreted.contains(unit) {
                continue;
            }
            if seen.insert(unit.as_str()) {
                merged.push(unit.clone());
            }
        }
    }

    merged
}

/// Scope Planner over a shared Dependency Graph Store
pub struct ScopePlanner {
    graph: Arc<DependencyGraph>,
    cost_per_unit_ms: u64,
    cache: DashMap<ScopeRequest, ScopeResult>,
}

impl ScopePlanner {
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        Self::with_cost(graph, DEFAULT_COST_PER_UNIT_MS)
    }

    pub fn with_cost(graph: Arc<DependencyGraph>, cost_per_unit_ms: u64) -> Self {
        Self {
            graph,
            cost_per_unit_ms,
            cache: DashMap::new(),
        }
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Compute (or reuse) the scope for a request
    pub fn plan(&self, request: &ScopeRequest) -> Result<ScopeResult> {
        if !self.graph.is_known(&request.target) {
            return Err(GraphError::UnknownTargetUnit(request.target.clone()));
        }

        let version = self.graph.version();
        if let Some(cached) = self.cache.get(request) {
            if cached.graph_version == version {
                debug!("Scope cache hit for {} ({})", request.target, request.policy);
                return Ok(cached.clone());
            }
        }

        let result = self.compute(request, version)?;
        self.cache.insert(request.clone(), result.clone());
        Ok(result)
    }

    /// Drop every cached result
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn compute(&self, request: &ScopeRequest, version: GraphVersion) -> Result<ScopeResult> {
        let filter = PatternFilter::new(&request.allow, &request.deny)?;
        let target = request.target.as_str();

        if let Some(pattern) = filter.denied_by(target) {
            return Err(GraphError::TargetExcluded {
                target: target.to_string(),
                pattern: pattern.to_string(),
            });
        }

        let raw = match request.policy {
            ScopePolicy::Minimal => self
                .graph
                .direct_dependencies_with(target, EdgeStrength::Definite),
            ScopePolicy::Conservative => {
                let mut units = self.graph.direct_dependencies(target);
                units.extend(self.graph.reverse_dependencies(target));
                units
            }
            ScopePolicy::Transitive { depth } => self.graph.transitive_dependencies(target, depth),
        };

        let mut seen = HashSet::from([target.to_string()]);
        let mut units = vec![target.to_string()];
        let mut excluded = Vec::new();

        for unit in raw {
            if !seen.insert(unit.clone()) {
                continue;
            }
            if filter.is_allowed(&unit) && filter.denied_by(&unit).is_none() {
                units.push(unit);
            } else {
                excluded.push(unit);
            }
        }

        debug!(
            "Planned {} scope for {}: {} units, {} excluded",
            request.policy,
            target,
            units.len(),
            excluded.len()
        );

        Ok(ScopeResult {
            target: target.to_string(),
            estimated_interpretation_time_ms: units.len() as u64 * self.cost_per_unit_ms,
            complexity: Complexity::from_unit_count(units.len()),
            units,
            policy: request.policy,
            graph_version: version,
            excluded,
        })
    }
}
