//! Breakpoint location → owning unit resolution
//!
//! Static module/file-name resolution is owned by an external lookup
//! service; `UnitResolver` is its port. `StaticResolver` covers the common
//! case of a precomputed file → module table.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Where a breakpoint was requested
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointLocation {
    Unit(String),
    File(PathBuf),
}

impl std::fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakpointLocation::Unit(name) => write!(f, "{}", name),
            BreakpointLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Port: module lookup service
pub trait UnitResolver: Send + Sync {
    /// Unit that owns the location, if it can be resolved
    fn resolve(&self, location: &BreakpointLocation) -> Option<String>;
}

/// Resolver that knows nothing; only traced units are accepted
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl UnitResolver for NoResolver {
    fn resolve(&self, _location: &BreakpointLocation) -> Option<String> {
        None
    }
}

/// In-memory file → unit table plus a set of loadable unit names
#[derive(Debug, Default)]
pub struct StaticResolver {
    files: RwLock<HashMap<PathBuf, String>>,
    units: RwLock<HashSet<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, file: impl Into<PathBuf>, unit: impl Into<String>) -> Self {
        self.insert_file(file, unit);
        self
    }

    pub fn with_unit(self, unit: impl Into<String>) -> Self {
        self.units.write().insert(unit.into());
        self
    }

    pub fn insert_file(&self, file: impl Into<PathBuf>, unit: impl Into<String>) {
        let unit = unit.into();
        self.units.write().insert(unit.clone());
        self.files.write().insert(file.into(), unit);
    }

    fn lookup_file(&self, file: &Path) -> Option<String> {
        self.files.read().get(file).cloned()
    }
}

impl UnitResolver for StaticResolver {
    fn resolve(&self, location: &BreakpointLocation) -> Option<String> {
        match location {
            BreakpointLocation::Unit(name) => self.units.read().get(name).cloned(),
            BreakpointLocation::File(path) => self.lookup_file(path),
        }
    }
}
