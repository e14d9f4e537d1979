//! Coordination strategies
//!
//! A closed set of variants with one decision: given the merged scope of
//! new breakpoints, which policy to plan with and whether to run now or in
//! the background.

use jitscope_graph::{Complexity, ScopePolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{ConfigError, ConfigResult};

/// How a request is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Awaited by the caller, never retried past its deadline
    Immediate,
    /// Spawned; transient failures retried with linear backoff
    Background { max_retries: u32, backoff: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPlan {
    pub policy: ScopePolicy,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStrategy {
    /// Configured policy, applied immediately
    DemandDriven,
    /// Pre-interprets callees up to `depth` levels deep
    Predictive { depth: i32 },
    /// Large scopes move to the background and retry transient failures
    Adaptive {
        background_threshold: Complexity,
        max_retries: u32,
        backoff_ms: u64,
    },
}

impl Default for CoordinationStrategy {
    fn default() -> Self {
        CoordinationStrategy::DemandDriven
    }
}

impl CoordinationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CoordinationStrategy::DemandDriven => "demand_driven",
            CoordinationStrategy::Predictive { .. } => "predictive",
            CoordinationStrategy::Adaptive { .. } => "adaptive",
        }
    }

    /// Decide policy and execution mode for a preview of the merged scope
    pub fn plan(&self, default_policy: ScopePolicy, complexity: Complexity) -> StrategyPlan {
        match self {
            CoordinationStrategy::DemandDriven => StrategyPlan {
                policy: default_policy,
                mode: ExecutionMode::Immediate,
            },
            CoordinationStrategy::Predictive { depth } => StrategyPlan {
                policy: ScopePolicy::Transitive { depth: *depth },
                mode: ExecutionMode::Immediate,
            },
            CoordinationStrategy::Adaptive {
                background_threshold,
                max_retries,
                backoff_ms,
            } => {
                let mode = if complexity >= *background_threshold {
                    ExecutionMode::Background {
                        max_retries: *max_retries,
                        backoff: Duration::from_millis(*backoff_ms),
                    }
                } else {
                    ExecutionMode::Immediate
                };
                StrategyPlan {
                    policy: default_policy,
                    mode,
                }
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            CoordinationStrategy::DemandDriven => Ok(()),
            CoordinationStrategy::Predictive { depth } if *depth < 0 => Err(ConfigError::Range {
                field: "strategy.predictive.depth".to_string(),
                value: depth.to_string(),
                hint: "Predictive pre-interpretation needs a bounded depth (>= 0).".to_string(),
            }),
            CoordinationStrategy::Predictive { .. } => Ok(()),
            CoordinationStrategy::Adaptive { backoff_ms: 0, max_retries, .. } if *max_retries > 0 => {
                Err(ConfigError::Range {
                    field: "strategy.adaptive.backoff_ms".to_string(),
                    value: "0".to_string(),
                    hint: "Retries need a non-zero backoff.".to_string(),
                })
            }
            CoordinationStrategy::Adaptive { .. } => Ok(()),
        }
    }
}
