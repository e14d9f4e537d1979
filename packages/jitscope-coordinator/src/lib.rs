/*
 * Jitscope Coordinator - On-demand module interpretation for live debugging
 *
 * Decides which units must run interpreted as breakpoints are set, keeps
 * that set minimal and incrementally updated, and mutates it safely while
 * the debugged program keeps running.
 *
 * Architecture:
 * - Interpretation Coordinator (serialized mutations, snapshot status)
 * - Per-unit state machine + breakpoint bookkeeping
 * - Execution Adapter port (runtime interpreter toggle)
 * - Coordination strategies (demand-driven / predictive / adaptive)
 * - Trace ingestion (pull + push)
 * - Mailbox service + JSON-lines transport
 */

// Public modules
pub mod adapter;
pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod resolver;
pub mod result;
pub mod state;
pub mod strategy;
pub mod telemetry;
pub mod trace;

// Re-exports
pub use adapter::{BreakpointError, ExecutionAdapter, InterpretError, PausedLocation};
pub use api::{
    serve_json_lines, Ack, CoordinationRequest, CoordinationResponse, CoordinatorHandle,
    CoordinatorService, WireError,
};
pub use config::{ConfigError, ConfigResult, CoordinatorConfig, DisabledBehavior};
pub use coordinator::{ApplyOptions, InterpretationCoordinator, Submission};
pub use error::{CoordinatorError, ErrorCategory, FailureReason, Result};
pub use resolver::{BreakpointLocation, NoResolver, StaticResolver, UnitResolver};
pub use result::{
    BreakpointOutcome, BreakpointRequest, BreakpointStatus, CoordinationResult, RestoreWarning,
    UnitFailure,
};
pub use state::{InterpretationState, StatusSnapshot, UnitState};
pub use strategy::{CoordinationStrategy, ExecutionMode, StrategyPlan};
pub use trace::{TraceIngestor, TraceSource};

// Graph types used across the public API
pub use jitscope_graph::{
    Complexity, DependencyGraph, Edge, EdgeKind, EdgeStrength, IngestReport, ScopePolicy,
    ScopeResult, Unit,
};
