//! Shared fakes for coordinator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use jitscope_coordinator::{
    BreakpointError, CoordinatorConfig, DependencyGraph, Edge, ExecutionAdapter,
    InterpretError, InterpretationCoordinator, PausedLocation, Unit,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Interpret(String),
    Uninterpret(String),
    SetBreakpoint(String, u32),
    ClearBreakpoints(String),
    ListPaused,
}

impl AdapterCall {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, AdapterCall::ListPaused)
    }
}

/// Recording Execution Adapter with scripted failures, delays and pauses
#[derive(Default)]
pub struct FakeAdapter {
    calls: Mutex<Vec<AdapterCall>>,
    interpret_failures: Mutex<HashMap<String, InterpretError>>,
    rejected_lines: Mutex<HashSet<(String, u32)>>,
    interpret_delays: Mutex<HashMap<String, Duration>>,
    failing_clears: Mutex<HashSet<String>>,
    paused: Mutex<Vec<PausedLocation>>,
    /// Fired once the next paused-location query has answered
    cancel_after_poll: Mutex<Option<CancellationToken>>,
    cancel_after_clear: Mutex<Option<CancellationToken>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    /// Calls that reach the runtime's mutating surface
    pub fn mutation_calls(&self) -> Vec<AdapterCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn interpreted_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                AdapterCall::Interpret(unit) => Some(unit.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail_interpret(&self, unit: &str, error: InterpretError) {
        self.interpret_failures.lock().insert(unit.to_string(), error);
    }

    pub fn heal_interpret(&self, unit: &str) {
        self.interpret_failures.lock().remove(unit);
    }

    pub fn reject_line(&self, unit: &str, line: u32) {
        self.rejected_lines.lock().insert((unit.to_string(), line));
    }

    pub fn delay_interpret(&self, unit: &str, delay: Duration) {
        self.interpret_delays.lock().insert(unit.to_string(), delay);
    }

    pub fn fail_clear(&self, unit: &str) {
        self.failing_clears.lock().insert(unit.to_string());
    }

    /// Cancel `token` right after the next safe-window check passes
    pub fn cancel_after_poll(&self, token: CancellationToken) {
        *self.cancel_after_poll.lock() = Some(token);
    }

    /// Cancel `token` right after the next breakpoint clear
    pub fn cancel_after_clear(&self, token: CancellationToken) {
        *self.cancel_after_clear.lock() = Some(token);
    }

    /// Highest number of interpret calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn pause(&self, process_id: &str, unit: &str, line: u32) {
        self.paused
            .lock()
            .push(PausedLocation::new(process_id, unit, line));
    }

    pub fn resume_all(&self) {
        self.paused.lock().clear();
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ExecutionAdapter for FakeAdapter {
    async fn interpret(&self, unit: &str) -> Result<Unit, InterpretError> {
        self.record(AdapterCall::Interpret(unit.to_string()));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = self.interpret_delays.lock().get(unit).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.interpret_failures.lock().get(unit).cloned() {
            return Err(error);
        }
        Ok(Unit::interpreted(unit))
    }

    async fn uninterpret(&self, unit: &str) -> Result<(), InterpretError> {
        self.record(AdapterCall::Uninterpret(unit.to_string()));
        Ok(())
    }

    async fn set_breakpoint(&self, unit: &str, line: u32) -> Result<(), BreakpointError> {
        self.record(AdapterCall::SetBreakpoint(unit.to_string(), line));
        if self.rejected_lines.lock().contains(&(unit.to_string(), line)) {
            return Err(BreakpointError::InvalidLine {
                unit: unit.to_string(),
                line,
            });
        }
        Ok(())
    }

    async fn clear_breakpoints(&self, unit: &str) -> Result<(), BreakpointError> {
        self.record(AdapterCall::ClearBreakpoints(unit.to_string()));
        if let Some(token) = self.cancel_after_clear.lock().take() {
            token.cancel();
        }
        if self.failing_clears.lock().contains(unit) {
            return Err(BreakpointError::Other("debugger detached".to_string()));
        }
        Ok(())
    }

    async fn list_paused_locations(&self) -> Vec<PausedLocation> {
        self.record(AdapterCall::ListPaused);
        let paused = self.paused.lock().clone();
        if paused.is_empty() {
            if let Some(token) = self.cancel_after_poll.lock().take() {
                token.cancel();
            }
        }
        paused
    }
}

/// Small deadlines so failure paths finish quickly
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_adapter_timeout_ms(200)
        .with_unsafe_window(3, 20)
}

/// `User → Order`, `User → Payment`, `Checkout → User`
pub fn shop_edges() -> Vec<Edge> {
    vec![
        Edge::call("MyApp.User", "MyApp.Order"),
        Edge::call("MyApp.User", "MyApp.Payment"),
        Edge::call("MyApp.Checkout", "MyApp.User"),
    ]
}

pub fn setup(
    edges: Vec<Edge>,
    config: CoordinatorConfig,
) -> (Arc<FakeAdapter>, Arc<InterpretationCoordinator>) {
    let adapter = FakeAdapter::new();
    let graph = Arc::new(DependencyGraph::from_edges(edges));
    let coordinator = InterpretationCoordinator::new(config, graph, adapter.clone())
        .expect("valid test config");
    (adapter, Arc::new(coordinator))
}
