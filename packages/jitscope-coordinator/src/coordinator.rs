//! Interpretation Coordinator
//!
//! The stateful authority over which units are interpreted and which
//! breakpoints are set, and the only caller of the Execution Adapter's
//! mutating operations.
//!
//! Flow of `plan_and_apply`:
//! 1. resolve each breakpoint to its owning unit
//! 2. plan one scope per distinct target
//! 3. merge the scopes and drop already-interpreted units (the delta)
//! 4. interpret the delta, in parallel up to `max_concurrent_mutations`
//! 5. install breakpoints not already set
//!
//! Mutations are serialized by a FIFO lock; status snapshots are published
//! through a watch channel so readers never wait behind a mutation.

use futures::stream::{self, StreamExt};
use jitscope_graph::{
    merge_scopes, Complexity, DependencyGraph, Edge, GraphError, IngestReport, PatternFilter,
    ScopePlanner, ScopePolicy, ScopeRequest, ScopeResult,
};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::ExecutionAdapter;
use crate::config::{CoordinatorConfig, DisabledBehavior};
use crate::error::{CoordinatorError, FailureReason, Result};
use crate::resolver::{BreakpointLocation, NoResolver, UnitResolver};
use crate::result::{
    BreakpointOutcome, BreakpointRequest, BreakpointStatus, CoordinationResult, RestoreWarning,
    UnitFailure,
};
use crate::state::{InterpretationState, StatusSnapshot};
use crate::strategy::ExecutionMode;
use crate::trace::TraceIngestor;

/// Per-call overrides of `plan_and_apply` and `reinterpret`
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Overrides `default_policy`
    pub policy: Option<ScopePolicy>,
    /// Skip the safe-mutation-window check
    pub force: bool,
    /// Aborts pending adapter calls
    pub cancel: Option<CancellationToken>,
}

impl ApplyOptions {
    pub fn with_policy(mut self, policy: ScopePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Result of a strategy-driven submission
#[derive(Debug)]
pub enum Submission {
    Completed(CoordinationResult),
    Background(JoinHandle<Result<CoordinationResult>>),
}

struct CallContext {
    cancel: CancellationToken,
    force: bool,
}

impl CallContext {
    fn new(options: &ApplyOptions) -> Self {
        Self {
            cancel: options.cancel.clone().unwrap_or_default(),
            force: options.force,
        }
    }
}

enum MutationError {
    /// Never reached the runtime; the unit keeps its previous state
    NotStarted(FailureReason),
    Failed(FailureReason),
}

impl MutationError {
    fn into_reason(self) -> FailureReason {
        match self {
            MutationError::NotStarted(reason) | MutationError::Failed(reason) => reason,
        }
    }
}

type Lost = Vec<(u32, FailureReason)>;

pub struct InterpretationCoordinator {
    config: CoordinatorConfig,
    graph: Arc<DependencyGraph>,
    planner: ScopePlanner,
    adapter: Arc<dyn ExecutionAdapter>,
    resolver: Arc<dyn UnitResolver>,
    state: Mutex<InterpretationState>,
    status: watch::Sender<StatusSnapshot>,
    enabled: AtomicBool,
    resumed: Notify,
    session: CancellationToken,
}

impl InterpretationCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        graph: Arc<DependencyGraph>,
        adapter: Arc<dyn ExecutionAdapter>,
    ) -> Result<Self> {
        config.validate()?;

        let state = InterpretationState::new();
        let (status, _) = watch::channel(state.snapshot(config.enabled));
        info!(
            "Coordinator session {} started (policy: {}, strategy: {})",
            state.session_id(),
            config.default_policy,
            config.strategy.name()
        );

        Ok(Self {
            planner: ScopePlanner::with_cost(graph.clone(), config.cost_per_unit_ms),
            enabled: AtomicBool::new(config.enabled),
            graph,
            adapter,
            resolver: Arc::new(NoResolver),
            state: Mutex::new(state),
            status,
            resumed: Notify::new(),
            session: CancellationToken::new(),
            config,
        })
    }

    /// Module lookup service for file locations and untraced units
    pub fn with_resolver(mut self, resolver: Arc<dyn UnitResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn planner(&self) -> &ScopePlanner {
        &self.planner
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Read-only surface (never waits on a mutation)
    // ═══════════════════════════════════════════════════════════════════

    pub fn get_status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Preview the scope of a target without applying it
    pub fn analyze_dependencies(
        &self,
        target: &str,
        policy: Option<ScopePolicy>,
    ) -> Result<ScopeResult> {
        let unit = self
            .resolve(&BreakpointLocation::Unit(target.to_string()))
            .map_err(|_| GraphError::UnknownTargetUnit(target.to_string()))?;
        let policy = policy.unwrap_or(self.config.default_policy);
        Ok(self.planner.plan(&self.scope_request(&unit, policy))?)
    }

    /// Merge a trace batch into the graph
    pub fn ingest(&self, edges: Vec<Edge>) -> IngestReport {
        let report = self.graph.ingest(edges);
        if !report.is_clean() {
            warn!(
                "Trace batch had {} invalid edges (version {})",
                report.errors.len(),
                report.version
            );
        }
        report
    }

    /// Trace ingestor over this coordinator's graph, bounded by
    /// `trace_timeout_ms` and stopped by `end_session`
    pub fn trace_ingestor(&self) -> TraceIngestor {
        TraceIngestor::from_config(self.graph.clone(), &self.config)
            .with_cancel(self.session.child_token())
    }

    /// Toggle coordination; waits for the in-flight mutation so no result
    /// is published under a mode it did not run with
    pub async fn set_mode(&self, enabled: bool) {
        let state = self.state.lock().await;
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!("Coordination {}", if enabled { "enabled" } else { "disabled" });
        }
        self.publish(&state);
    }

    /// Resume/step event: wakes mutations queued behind a paused process
    pub fn notify_resumed(&self) {
        self.resumed.notify_waiters();
    }

    // ═══════════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════════

    pub async fn plan_and_apply(
        &self,
        breakpoints: Vec<BreakpointRequest>,
    ) -> Result<CoordinationResult> {
        self.plan_and_apply_with(breakpoints, ApplyOptions::default())
            .await
    }

    pub async fn plan_and_apply_with(
        &self,
        breakpoints: Vec<BreakpointRequest>,
        options: ApplyOptions,
    ) -> Result<CoordinationResult> {
        let started = Instant::now();
        let mut state = self.lock_active().await?;
        let seq = state.begin_request();
        let ctx = CallContext::new(&options);
        let mut result = CoordinationResult::new(seq);

        if self.is_enabled() {
            let policy = options.policy.unwrap_or(self.config.default_policy);
            self.apply_scoped(&mut state, breakpoints, policy, &ctx, &mut result)
                .await;
        } else {
            self.apply_disabled(&mut state, breakpoints, &ctx, &mut result)
                .await;
        }

        result.sequence = state.finish_request();
        result.total_time_ms = started.elapsed().as_millis() as u64;
        self.publish(&state);

        info!(
            seq,
            interpreted = result.interpreted.len(),
            failed = result.failed.len(),
            "plan_and_apply finished in {}ms",
            result.total_time_ms
        );
        Ok(result)
    }

    /// Module-change event: reinterpret units, preserving their breakpoints
    pub async fn reinterpret(&self, units: Vec<String>) -> Result<CoordinationResult> {
        self.reinterpret_with(units, ApplyOptions::default()).await
    }

    pub async fn reinterpret_with(
        &self,
        units: Vec<String>,
        options: ApplyOptions,
    ) -> Result<CoordinationResult> {
        let started = Instant::now();
        let mut state = self.lock_active().await?;
        let seq = state.begin_request();
        let ctx = CallContext::new(&options);
        let mut result = CoordinationResult::new(seq);

        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for unit in units {
            if !seen.insert(unit.clone()) {
                continue;
            }
            if !state.is_interpreted(&unit) {
                debug!(unit = unit.as_str(), seq, "Not interpreted, nothing to reinterpret");
                continue;
            }
            let lines = state.breakpoints(&unit);
            match state.begin_interpret(&unit) {
                Ok(()) => jobs.push((unit, lines)),
                Err(e) => warn!(seq, "{}", e),
            }
        }

        let outcomes: Vec<(String, BTreeSet<u32>, std::result::Result<Lost, MutationError>)> =
            stream::iter(jobs)
                .map(|(unit, lines)| {
                    let ctx = &ctx;
                    async move {
                        let outcome = self.reinterpret_unit(&unit, &lines, ctx).await;
                        (unit, lines, outcome)
                    }
                })
                .buffered(self.config.max_concurrent_mutations)
                .collect()
                .await;

        for (unit, lines, outcome) in outcomes {
            match outcome {
                Ok(lost) => {
                    log_transition(state.finish_interpret(&unit));
                    let lost_lines: Vec<u32> = lost.iter().map(|(line, _)| *line).collect();
                    let kept = lines
                        .iter()
                        .copied()
                        .filter(|line| !lost_lines.contains(line))
                        .collect();
                    state.set_breakpoints(&unit, kept);

                    if !lost.is_empty() {
                        let reason = lost
                            .iter()
                            .map(|(line, reason)| format!("line {}: {}", line, reason))
                            .collect::<Vec<_>>()
                            .join("; ");
                        warn!(unit = unit.as_str(), seq, "Partial restore: {}", reason);
                        result.warnings.push(RestoreWarning {
                            unit: unit.clone(),
                            lost_lines,
                            reason,
                        });
                    }
                    result.interpreted.push(unit);
                }
                Err(MutationError::NotStarted(reason)) => {
                    log_transition(state.abort_interpret(&unit));
                    result.failed.push(UnitFailure::new(unit, reason));
                }
                Err(MutationError::Failed(reason)) => {
                    log_transition(state.fail_interpret(&unit, reason.clone()));
                    warn!(
                        unit = unit.as_str(),
                        seq,
                        "Reinterpretation failed, breakpoints {:?} dropped: {}",
                        lines,
                        reason
                    );
                    result.failed.push(UnitFailure::new(unit, reason));
                }
            }
        }

        result.sequence = state.finish_request();
        result.total_time_ms = started.elapsed().as_millis() as u64;
        self.publish(&state);
        info!(
            seq,
            reinterpreted = result.interpreted.len(),
            warnings = result.warnings.len(),
            "reinterpret finished in {}ms",
            result.total_time_ms
        );
        Ok(result)
    }

    /// Remove every breakpoint of a unit
    pub async fn clear_breakpoints(&self, unit: &str) -> Result<CoordinationResult> {
        let started = Instant::now();
        let mut state = self.lock_active().await?;
        let seq = state.begin_request();
        let ctx = CallContext::new(&ApplyOptions::default());
        let mut result = CoordinationResult::new(seq);

        if !state.breakpoints(unit).is_empty() {
            match self
                .adapter_call(
                    "clear_breakpoints",
                    &ctx.cancel,
                    self.adapter.clear_breakpoints(unit),
                )
                .await
            {
                Ok(()) => {
                    let removed = state.clear_breakpoints(unit);
                    info!(unit, seq, "Cleared breakpoints {:?}", removed);
                }
                Err(e) => {
                    let reason = e.into_reason();
                    warn!(unit, seq, "Clearing breakpoints failed: {}", reason);
                    result.failed.push(UnitFailure::new(unit, reason));
                }
            }
        }

        result.sequence = state.finish_request();
        result.total_time_ms = started.elapsed().as_millis() as u64;
        self.publish(&state);
        Ok(result)
    }

    /// Tear the session down: uninterpret everything, move all units to
    /// unloaded. Later mutations fail with `SessionEnded`.
    ///
    /// Returns the units that were interpreted.
    pub async fn end_session(&self) -> Vec<String> {
        self.session.cancel();
        let mut state = self.state.lock().await;
        if state.is_ended() {
            return Vec::new();
        }

        let units = state.interpreted_units();
        let deadline = self.config.adapter_timeout();
        for unit in &units {
            match tokio::time::timeout(deadline, self.adapter.uninterpret(unit)).await {
                Ok(Ok(())) => debug!(unit = unit.as_str(), "Uninterpreted"),
                Ok(Err(e)) => warn!(unit = unit.as_str(), "Uninterpret failed: {}", e),
                Err(_) => warn!(
                    unit = unit.as_str(),
                    "Uninterpret timed out after {}ms", self.config.adapter_timeout_ms
                ),
            }
        }

        state.begin_request();
        state.unload_all();
        state.finish_request();
        self.planner.invalidate();
        self.publish(&state);
        info!(
            "Coordinator session {} ended ({} units unloaded)",
            state.session_id(),
            units.len()
        );
        units
    }

    // ═══════════════════════════════════════════════════════════════════
    // Strategy-driven submission
    // ═══════════════════════════════════════════════════════════════════

    /// Apply the configured strategy: immediate requests are awaited,
    /// background requests are spawned and retry transient failures
    pub async fn submit(self: &Arc<Self>, breakpoints: Vec<BreakpointRequest>) -> Result<Submission> {
        let complexity = self.preview_complexity(&breakpoints, self.config.default_policy);
        let plan = self
            .config
            .strategy
            .plan(self.config.default_policy, complexity);
        let options = ApplyOptions::default().with_policy(plan.policy);

        match plan.mode {
            ExecutionMode::Immediate => Ok(Submission::Completed(
                self.plan_and_apply_with(breakpoints, options).await?,
            )),
            ExecutionMode::Background {
                max_retries,
                backoff,
            } => {
                info!(
                    "Scheduling {} breakpoints in background ({} scope, policy {})",
                    breakpoints.len(),
                    complexity.as_str(),
                    plan.policy
                );
                let coordinator = Arc::clone(self);
                Ok(Submission::Background(tokio::spawn(async move {
                    coordinator
                        .run_with_retries(breakpoints, options, max_retries, backoff)
                        .await
                })))
            }
        }
    }

    /// Size class of the delta the breakpoints would produce right now
    pub fn preview_complexity(
        &self,
        breakpoints: &[BreakpointRequest],
        policy: ScopePolicy,
    ) -> Complexity {
        let interpreted: HashSet<String> =
            self.get_status().interpreted_units.into_iter().collect();
        let scopes: Vec<ScopeResult> = breakpoints
            .iter()
            .filter_map(|bp| self.resolve(&bp.location).ok())
            .filter_map(|unit| self.planner.plan(&self.scope_request(&unit, policy)).ok())
            .collect();
        Complexity::from_unit_count(merge_scopes(&scopes, &interpreted).len())
    }

    async fn run_with_retries(
        &self,
        breakpoints: Vec<BreakpointRequest>,
        options: ApplyOptions,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<CoordinationResult> {
        let mut attempt = 0u32;
        let mut earlier: Option<CoordinationResult> = None;

        loop {
            let mut result = self
                .plan_and_apply_with(breakpoints.clone(), options.clone())
                .await?;
            if let Some(previous) = earlier.take() {
                result.absorb_earlier(previous);
            }
            if !result.has_transient_failures() || attempt >= max_retries {
                return Ok(result);
            }

            attempt += 1;
            warn!(
                attempt,
                max_retries,
                "Transient failures in background coordination, retrying"
            );
            tokio::time::sleep(backoff * attempt).await;
            earlier = Some(result);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    async fn lock_active(&self) -> Result<tokio::sync::MutexGuard<'_, InterpretationState>> {
        let state = self.state.lock().await;
        if self.session.is_cancelled() {
            return Err(CoordinatorError::SessionEnded);
        }
        state.ensure_active()?;
        Ok(state)
    }

    fn publish(&self, state: &InterpretationState) {
        self.status.send_replace(state.snapshot(self.is_enabled()));
    }

    fn scope_request(&self, target: &str, policy: ScopePolicy) -> ScopeRequest {
        ScopeRequest::new(target, policy)
            .allow(self.config.allow_patterns.iter().cloned())
            .deny(self.config.deny_patterns.iter().cloned())
    }

    /// Owning unit of a breakpoint location; resolved units are registered
    fn resolve(&self, location: &BreakpointLocation) -> std::result::Result<String, FailureReason> {
        if let BreakpointLocation::Unit(name) = location {
            if self.graph.is_known(name) {
                return Ok(name.clone());
            }
        }

        match self.resolver.resolve(location) {
            Some(unit) => {
                debug!("Resolved {} to {}", location, unit);
                self.graph.register_unit(&unit);
                Ok(unit)
            }
            None => Err(FailureReason::UnknownTargetUnit {
                unit: location.to_string(),
            }),
        }
    }

    async fn apply_scoped(
        &self,
        state: &mut InterpretationState,
        breakpoints: Vec<BreakpointRequest>,
        policy: ScopePolicy,
        ctx: &CallContext,
        result: &mut CoordinationResult,
    ) {
        let resolved: Vec<_> = breakpoints
            .into_iter()
            .map(|bp| {
                let target = self.resolve(&bp.location);
                (bp, target)
            })
            .collect();

        let mut planned = HashSet::new();
        let mut scopes = Vec::new();
        for (bp, target) in &resolved {
            match target {
                Ok(unit) => {
                    if !planned.insert(unit.clone()) {
                        continue;
                    }
                    match self.planner.plan(&self.scope_request(unit, policy)) {
                        Ok(scope) => scopes.push(scope),
                        Err(e) => {
                            warn!(unit = unit.as_str(), seq = result.sequence, "{}", e);
                            result.failed.push(UnitFailure::new(unit, e.into()));
                        }
                    }
                }
                Err(reason) => {
                    let name = bp.location.to_string();
                    if result.failure_for(&name).is_none() {
                        warn!(seq = result.sequence, "{}", reason);
                        result.failed.push(UnitFailure::new(name, reason.clone()));
                    }
                }
            }
        }

        let delta = merge_scopes(&scopes, &state.interpreted_set());
        self.interpret_delta(state, delta, ctx, result).await;

        for (bp, target) in resolved {
            let outcome = match target {
                Ok(unit) => {
                    let status = self.install_breakpoint(state, &unit, bp.line, ctx, result).await;
                    BreakpointOutcome {
                        location: bp.location,
                        line: bp.line,
                        unit: Some(unit),
                        status,
                    }
                }
                Err(reason) => BreakpointOutcome {
                    location: bp.location,
                    line: bp.line,
                    unit: None,
                    status: BreakpointStatus::Failed { reason },
                },
            };
            result.breakpoints.push(outcome);
        }
    }

    async fn apply_disabled(
        &self,
        state: &mut InterpretationState,
        breakpoints: Vec<BreakpointRequest>,
        ctx: &CallContext,
        result: &mut CoordinationResult,
    ) {
        if self.config.disabled_behavior == DisabledBehavior::InterpretPatterns {
            match PatternFilter::new(&self.config.allow_patterns, &self.config.deny_patterns) {
                Ok(filter) => {
                    if !filter.has_allow_list() {
                        debug!(
                            seq = result.sequence,
                            "No allow patterns, interpreting every known unit"
                        );
                    }
                    let interpreted = state.interpreted_set();
                    let delta: Vec<String> = self
                        .graph
                        .units()
                        .into_iter()
                        .filter(|unit| {
                            self.graph.is_known(unit)
                                && filter.is_allowed(unit)
                                && filter.denied_by(unit).is_none()
                                && !interpreted.contains(unit)
                        })
                        .collect();
                    self.interpret_delta(state, delta, ctx, result).await;
                }
                Err(e) => result.failed.push(UnitFailure::new("*", e.into())),
            }
        }

        for bp in breakpoints {
            let unit = self.resolve(&bp.location).ok();
            let status = match &unit {
                Some(unit) if state.is_interpreted(unit) => {
                    self.install_breakpoint(state, unit, bp.line, ctx, result).await
                }
                _ => BreakpointStatus::Skipped,
            };
            result.breakpoints.push(BreakpointOutcome {
                location: bp.location,
                line: bp.line,
                unit,
                status,
            });
        }
    }

    async fn interpret_delta(
        &self,
        state: &mut InterpretationState,
        delta: Vec<String>,
        ctx: &CallContext,
        result: &mut CoordinationResult,
    ) {
        if delta.is_empty() {
            debug!(seq = result.sequence, "Empty delta, nothing to interpret");
            return;
        }

        let mut pending = Vec::with_capacity(delta.len());
        for unit in delta {
            match state.begin_interpret(&unit) {
                Ok(()) => pending.push(unit),
                Err(e) => warn!(seq = result.sequence, "{}", e),
            }
        }
        debug!(seq = result.sequence, "Interpreting delta {:?}", pending);

        let outcomes: Vec<(String, std::result::Result<(), MutationError>)> = stream::iter(pending)
            .map(|unit| async move {
                let outcome = self.interpret_unit(&unit, ctx).await;
                (unit, outcome)
            })
            .buffered(self.config.max_concurrent_mutations)
            .collect()
            .await;

        for (unit, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    log_transition(state.finish_interpret(&unit));
                    result.interpreted.push(unit);
                }
                Err(MutationError::NotStarted(reason)) => {
                    log_transition(state.abort_interpret(&unit));
                    result.failed.push(UnitFailure::new(unit, reason));
                }
                Err(MutationError::Failed(reason)) => {
                    warn!(unit = unit.as_str(), seq = result.sequence, "{}", reason);
                    log_transition(state.fail_interpret(&unit, reason.clone()));
                    result.failed.push(UnitFailure::new(unit, reason));
                }
            }
        }
    }

    async fn install_breakpoint(
        &self,
        state: &mut InterpretationState,
        unit: &str,
        line: u32,
        ctx: &CallContext,
        result: &CoordinationResult,
    ) -> BreakpointStatus {
        if let Some(reason) = result.failure_for(unit) {
            return BreakpointStatus::Failed {
                reason: reason.clone(),
            };
        }
        if !state.is_interpreted(unit) {
            return BreakpointStatus::Failed {
                reason: FailureReason::NotInterpreted {
                    unit: unit.to_string(),
                },
            };
        }
        if state.has_breakpoint(unit, line) {
            return BreakpointStatus::AlreadySet;
        }

        match self
            .adapter_call(
                "set_breakpoint",
                &ctx.cancel,
                self.adapter.set_breakpoint(unit, line),
            )
            .await
        {
            Ok(()) => match state.add_breakpoint(unit, line) {
                Ok(()) => BreakpointStatus::Installed,
                Err(e) => BreakpointStatus::Failed {
                    reason: FailureReason::Breakpoint {
                        message: e.to_string(),
                    },
                },
            },
            Err(e) => {
                let reason = e.into_reason();
                warn!(unit, line, seq = result.sequence, "{}", reason);
                BreakpointStatus::Failed { reason }
            }
        }
    }

    async fn interpret_unit(
        &self,
        unit: &str,
        ctx: &CallContext,
    ) -> std::result::Result<(), MutationError> {
        if !ctx.force {
            self.await_safe_window(unit, &ctx.cancel)
                .await
                .map_err(MutationError::NotStarted)?;
        }

        self.adapter_call("interpret", &ctx.cancel, self.adapter.interpret(unit))
            .await?;
        Ok(())
    }

    /// Snapshot → clear → interpret → restore, as one logical operation
    ///
    /// Returns the lines that could not be restored.
    async fn reinterpret_unit(
        &self,
        unit: &str,
        lines: &BTreeSet<u32>,
        ctx: &CallContext,
    ) -> std::result::Result<Lost, MutationError> {
        if !ctx.force {
            self.await_safe_window(unit, &ctx.cancel)
                .await
                .map_err(MutationError::NotStarted)?;
        }

        let cleared = match self
            .adapter_call(
                "clear_breakpoints",
                &ctx.cancel,
                self.adapter.clear_breakpoints(unit),
            )
            .await
        {
            Ok(()) => true,
            Err(MutationError::NotStarted(reason)) => {
                return Err(MutationError::NotStarted(reason));
            }
            // Interpreting drops the unit's breakpoints anyway
            Err(MutationError::Failed(reason)) => {
                warn!(unit, "Clearing before reinterpretation failed: {}", reason);
                false
            }
        };

        match self
            .adapter_call("interpret", &ctx.cancel, self.adapter.interpret(unit))
            .await
        {
            Ok(_) => {}
            Err(MutationError::NotStarted(reason)) if cleared => {
                // Old code still loaded, but its breakpoints are gone
                return Ok(lines.iter().map(|&line| (line, reason.clone())).collect());
            }
            Err(e) => return Err(e),
        }

        let mut lost = Vec::new();
        for &line in lines {
            if let Err(e) = self
                .adapter_call(
                    "set_breakpoint",
                    &ctx.cancel,
                    self.adapter.set_breakpoint(unit, line),
                )
                .await
            {
                lost.push((line, e.into_reason()));
            }
        }
        Ok(lost)
    }

    /// Wait until no process is paused inside `unit`
    async fn await_safe_window(
        &self,
        unit: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), FailureReason> {
        let mut attempt = 0u32;
        loop {
            let paused = self
                .guarded(
                    "list_paused_locations",
                    cancel,
                    self.adapter.list_paused_locations(),
                )
                .await
                .map_err(MutationError::into_reason)?;
            let blocking: Vec<String> = paused
                .into_iter()
                .filter(|location| location.unit_name == unit)
                .map(|location| location.process_id)
                .collect();

            if blocking.is_empty() {
                return Ok(());
            }
            if attempt >= self.config.unsafe_window_retries {
                warn!(
                    unit,
                    attempt,
                    "Processes {:?} still paused inside unit, giving up",
                    blocking
                );
                return Err(FailureReason::UnsafeMutationWindow {
                    process_ids: blocking,
                    attempts: attempt + 1,
                });
            }

            attempt += 1;
            debug!(unit, attempt, "Processes {:?} paused inside unit, waiting for resume", blocking);
            tokio::select! {
                _ = self.resumed.notified() => {}
                _ = tokio::time::sleep(self.config.unsafe_window_poll()) => {}
                _ = cancel.cancelled() => {
                    return Err(FailureReason::Cancelled {
                        operation: "safe_window_wait".to_string(),
                    });
                }
                _ = self.session.cancelled() => return Err(FailureReason::SessionEnded),
            }
        }
    }

    async fn adapter_call<T, E>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        call: impl Future<Output = std::result::Result<T, E>>,
    ) -> std::result::Result<T, MutationError>
    where
        E: Into<FailureReason>,
    {
        self.guarded(operation, cancel, call)
            .await?
            .map_err(|e| MutationError::Failed(e.into()))
    }

    /// Bound an external call by the adapter deadline and both cancel tokens
    ///
    /// A cancellation observed before the call was first polled is
    /// `NotStarted`; once the call has begun, the runtime may have acted on it.
    async fn guarded<T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        call: impl Future<Output = T>,
    ) -> std::result::Result<T, MutationError> {
        let started = AtomicBool::new(false);
        let tracked = async {
            started.store(true, Ordering::SeqCst);
            call.await
        };
        let interrupted = |reason: FailureReason| {
            if started.load(Ordering::SeqCst) {
                MutationError::Failed(reason)
            } else {
                MutationError::NotStarted(reason)
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(interrupted(FailureReason::Cancelled {
                operation: operation.to_string(),
            })),
            _ = self.session.cancelled() => Err(interrupted(FailureReason::SessionEnded)),
            outcome = tokio::time::timeout(self.config.adapter_timeout(), tracked) => {
                outcome.map_err(|_| {
                    warn!("{} timed out after {}ms", operation, self.config.adapter_timeout_ms);
                    MutationError::Failed(FailureReason::Timeout {
                        operation: operation.to_string(),
                        after_ms: self.config.adapter_timeout_ms,
                    })
                })
            }
        }
    }
}

fn log_transition(outcome: Result<()>) {
    if let Err(e) = outcome {
        warn!("{}", e);
    }
}
