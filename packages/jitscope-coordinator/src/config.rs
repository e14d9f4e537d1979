//! Coordinator configuration
//!
//! YAML schema v1:
//!
//! ```yaml
//! version: 1
//! default_policy: conservative
//! allow_patterns: ["MyApp.*"]
//! max_concurrent_mutations: 4
//! adapter_timeout_ms: 2000
//! strategy:
//!   adaptive:
//!     background_threshold: high
//!     max_retries: 3
//!     backoff_ms: 200
//! ```
//!
//! Missing fields fall back to `CoordinatorConfig::default()`; unknown fields
//! are rejected.

use jitscope_graph::{PatternFilter, ScopePolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::strategy::CoordinationStrategy;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid value for field '{field}': {value}. {hint}")]
    Range {
        field: String,
        value: String,
        hint: String,
    },

    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    /// Allow/deny glob that does not compile
    #[error("Invalid pattern in '{field}': {message}")]
    Pattern { field: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration result type
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// What `planAndApply` does while coordination is switched off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBehavior {
    /// Report every breakpoint as skipped, touch nothing
    Passthrough,
    /// Interpret every known unit matching the allow patterns
    InterpretPatterns,
}

impl Default for DisabledBehavior {
    fn default() -> Self {
        DisabledBehavior::Passthrough
    }
}

/// Interpretation Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Schema version (always 1 for v1)
    pub version: u32,

    /// Initial coordination mode
    pub enabled: bool,

    /// Policy used by `planAndApply` when the strategy does not override it
    pub default_policy: ScopePolicy,

    pub allow_patterns: Vec<String>,
    pub deny_patterns: Vec<String>,

    /// Upper bound on concurrent Execution Adapter mutations
    pub max_concurrent_mutations: usize,

    /// Deadline of each Execution Adapter call
    pub adapter_timeout_ms: u64,

    /// Deadline of each trace pull
    pub trace_timeout_ms: u64,

    /// Re-polls of paused locations before giving up on a unit
    pub unsafe_window_retries: u32,

    /// Poll interval while waiting for a resume event
    pub unsafe_window_poll_ms: u64,

    /// Heuristic planner cost per unit
    pub cost_per_unit_ms: u64,

    pub disabled_behavior: DisabledBehavior,

    pub strategy: CoordinationStrategy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            version: 1,
            enabled: true,
            default_policy: ScopePolicy::Conservative,
            allow_patterns: Vec::new(),
            deny_patterns: Vec::new(),
            max_concurrent_mutations: 4,
            adapter_timeout_ms: 2_000,
            trace_timeout_ms: 5_000,
            unsafe_window_retries: 5,
            unsafe_window_poll_ms: 100,
            cost_per_unit_ms: jitscope_graph::scope::DEFAULT_COST_PER_UNIT_MS,
            disabled_behavior: DisabledBehavior::Passthrough,
            strategy: CoordinationStrategy::DemandDriven,
        }
    }
}

impl CoordinatorConfig {
    /// Load from a YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: CoordinatorConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        if self.max_concurrent_mutations == 0 {
            return Err(ConfigError::Range {
                field: "max_concurrent_mutations".to_string(),
                value: "0".to_string(),
                hint: "At least one mutation must be allowed in flight.".to_string(),
            });
        }

        for (field, value) in [
            ("adapter_timeout_ms", self.adapter_timeout_ms),
            ("trace_timeout_ms", self.trace_timeout_ms),
            ("unsafe_window_poll_ms", self.unsafe_window_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Range {
                    field: field.to_string(),
                    value: "0".to_string(),
                    hint: "Every external call needs a non-zero deadline.".to_string(),
                });
            }
        }

        for (field, patterns) in [
            ("allow_patterns", &self.allow_patterns),
            ("deny_patterns", &self.deny_patterns),
        ] {
            PatternFilter::validate(patterns).map_err(|e| ConfigError::Pattern {
                field: field.to_string(),
                message: e.to_string(),
            })?;
        }

        self.strategy.validate()
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn trace_timeout(&self) -> Duration {
        Duration::from_millis(self.trace_timeout_ms)
    }

    pub fn unsafe_window_poll(&self) -> Duration {
        Duration::from_millis(self.unsafe_window_poll_ms)
    }

    // Builder-style overrides

    pub fn with_policy(mut self, policy: ScopePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_allow(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allow_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deny(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deny_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: CoordinationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_adapter_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.adapter_timeout_ms = timeout_ms;
        self
    }

    pub fn with_unsafe_window(mut self, retries: u32, poll_ms: u64) -> Self {
        self.unsafe_window_retries = retries;
        self.unsafe_window_poll_ms = poll_ms;
        self
    }

    pub fn with_disabled_behavior(mut self, behavior: DisabledBehavior) -> Self {
        self.disabled_behavior = behavior;
        self
    }
}
