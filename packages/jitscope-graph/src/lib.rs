/*
 * Jitscope Graph - Dependency tracking for on-demand module interpretation
 *
 * Architecture:
 * - models/           : Unit, Edge, GraphVersion (shared with the coordinator)
 * - dependency_graph/ : Append-only call/reference graph with versioning
 * - patterns/         : Glob allow/deny filters over unit names
 * - scope/            : Policy-driven scope planning (minimal/conservative/transitive)
 *
 * The graph is read concurrently by many planners; only ingestion and
 * stub registration take the write lock.
 */

pub mod dependency_graph;
pub mod errors;
pub mod models;
pub mod patterns;
pub mod scope;

// Re-exports
pub use dependency_graph::{DependencyGraph, IngestReport, InvalidEdge};
pub use errors::{GraphError, Result};
pub use models::{Edge, EdgeKind, EdgeStrength, GraphVersion, Unit, UnitOrigin};
pub use patterns::PatternFilter;
pub use scope::{merge_scopes, Complexity, ScopePlanner, ScopePolicy, ScopeRequest, ScopeResult};
