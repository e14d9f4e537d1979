//! Glob allow/deny filters over unit names
//!
//! `MyApp.*` keeps every unit under the `MyApp` namespace. Patterns are
//! matched against the whole unit name; `*` also crosses `.` and `/`.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::{GraphError, Result};

/// Compiled allow/deny pattern lists
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    allow: Option<CompiledPatterns>,
    deny: Option<CompiledPatterns>,
}

#[derive(Debug, Clone)]
struct CompiledPatterns {
    sources: Vec<String>,
    set: GlobSet,
}

impl CompiledPatterns {
    fn compile(patterns: &[String]) -> Result<Option<Self>> {
        if patterns.is_empty() {
            return Ok(None);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| GraphError::invalid_pattern(pattern, e))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| GraphError::invalid_pattern(&patterns.join(","), e))?;

        Ok(Some(Self {
            sources: patterns.to_vec(),
            set,
        }))
    }

    /// First source pattern matching `name`
    fn first_match(&self, name: &str) -> Option<&str> {
        self.set
            .matches(name)
            .into_iter()
            .min()
            .map(|i| self.sources[i].as_str())
    }
}

impl PatternFilter {
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self> {
        Ok(Self {
            allow: CompiledPatterns::compile(allow)?,
            deny: CompiledPatterns::compile(deny)?,
        })
    }

    /// Filter that keeps everything
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Check that every pattern compiles (used by config validation)
    pub fn validate(patterns: &[String]) -> Result<()> {
        CompiledPatterns::compile(patterns).map(|_| ())
    }

    pub fn has_allow_list(&self) -> bool {
        self.allow.is_some()
    }

    /// True when no allow list is set or a pattern matches
    pub fn is_allowed(&self, name: &str) -> bool {
        match &self.allow {
            Some(allow) => allow.set.is_match(name),
            None => true,
        }
    }

    /// Deny pattern that matches `name`, if any
    pub fn denied_by(&self, name: &str) -> Option<&str> {
        self.deny.as_ref().and_then(|deny| deny.first_match(name))
    }
}
