//! End-to-end coordination scenarios against the recording fake adapter

mod common;

use common::{fast_config, setup, shop_edges, AdapterCall, FakeAdapter};
use async_trait::async_trait;
use jitscope_coordinator::{
    ApplyOptions, BreakpointRequest, BreakpointStatus, Complexity, CoordinationStrategy,
    CoordinatorConfig, CoordinatorError, DependencyGraph, DisabledBehavior, Edge,
    FailureReason, InterpretError, InterpretationCoordinator, ScopePolicy, StaticResolver,
    Submission, TraceSource,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const USER: &str = "MyApp.User";
const ORDER: &str = "MyApp.Order";
const PAYMENT: &str = "MyApp.Payment";
const CHECKOUT: &str = "MyApp.Checkout";

#[tokio::test]
async fn test_plan_and_apply_interprets_conservative_scope() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());

    let result = coordinator
        .plan_and_apply(vec![BreakpointRequest::new(USER, 10)])
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.interpreted, vec![USER, ORDER, PAYMENT, CHECKOUT]);
    assert_eq!(result.breakpoints.len(), 1);
    assert_eq!(result.breakpoints[0].status, BreakpointStatus::Installed);
    assert!(adapter
        .calls()
        .contains(&AdapterCall::SetBreakpoint(USER.to_string(), 10)));

    let status = coordinator.get_status();
    assert_eq!(status.interpreted_count, 4);
    assert_eq!(status.breakpoints.get(USER), Some(&vec![10]));
}

#[tokio::test]
async fn test_second_identical_apply_makes_no_adapter_calls() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    let breakpoints = vec![
        BreakpointRequest::new(USER, 10),
        BreakpointRequest::new(ORDER, 3),
    ];

    coordinator.plan_and_apply(breakpoints.clone()).await.unwrap();
    let status_before = coordinator.get_status();
    adapter.reset_calls();

    let second = coordinator.plan_and_apply(breakpoints).await.unwrap();

    assert!(second.interpreted.is_empty());
    assert!(second
        .breakpoints
        .iter()
        .all(|b| b.status == BreakpointStatus::AlreadySet));
    assert!(adapter.calls().is_empty());
    assert_eq!(coordinator.get_status(), status_before);
}

#[tokio::test]
async fn test_overlapping_breakpoints_merge_scopes() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());

    let result = coordinator
        .plan_and_apply_with(
            vec![
                BreakpointRequest::new(USER, 1),
                BreakpointRequest::new(ORDER, 2),
                BreakpointRequest::new(USER, 5),
            ],
            ApplyOptions::default().with_policy(ScopePolicy::Minimal),
        )
        .await
        .unwrap();

    // Each unit is interpreted exactly once even though scopes overlap
    assert_eq!(result.interpreted, vec![USER, ORDER, PAYMENT]);
    assert_eq!(adapter.interpreted_calls(), vec![USER, ORDER, PAYMENT]);
    assert!(result.breakpoints.iter().all(|b| b.is_active()));
}

#[tokio::test]
async fn test_breakpoints_survive_reinterpretation() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator
        .plan_and_apply(vec![
            BreakpointRequest::new(ORDER, 10),
            BreakpointRequest::new(ORDER, 20),
        ])
        .await
        .unwrap();
    adapter.reset_calls();

    let result = coordinator.reinterpret(vec![ORDER.to_string()]).await.unwrap();

    assert!(result.is_success());
    assert!(result.warnings.is_empty());
    assert_eq!(result.interpreted, vec![ORDER]);
    assert_eq!(
        adapter.mutation_calls(),
        vec![
            AdapterCall::ClearBreakpoints(ORDER.to_string()),
            AdapterCall::Interpret(ORDER.to_string()),
            AdapterCall::SetBreakpoint(ORDER.to_string(), 10),
            AdapterCall::SetBreakpoint(ORDER.to_string(), 20),
        ]
    );
    assert_eq!(coordinator.get_status().breakpoints.get(ORDER), Some(&vec![10, 20]));
}

#[tokio::test]
async fn test_failed_restore_is_partial_restore_warning() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator
        .plan_and_apply(vec![
            BreakpointRequest::new(ORDER, 10),
            BreakpointRequest::new(ORDER, 20),
        ])
        .await
        .unwrap();
    adapter.reject_line(ORDER, 20);

    let result = coordinator.reinterpret(vec![ORDER.to_string()]).await.unwrap();

    assert!(result.failed.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].unit, ORDER);
    assert_eq!(result.warnings[0].lost_lines, vec![20]);
    assert_eq!(result.warnings[0].kind(), "partial_restore");

    let status = coordinator.get_status();
    assert!(status.interpreted_units.contains(&ORDER.to_string()));
    assert_eq!(status.breakpoints.get(ORDER), Some(&vec![10]));
}

#[tokio::test]
async fn test_reinterpret_failure_returns_unit_to_uninterpreted() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator
        .plan_and_apply(vec![BreakpointRequest::new(ORDER, 10)])
        .await
        .unwrap();
    adapter.fail_interpret(
        ORDER,
        InterpretError::Compile {
            unit: ORDER.to_string(),
            message: "undefined function".to_string(),
        },
    );

    let result = coordinator.reinterpret(vec![ORDER.to_string()]).await.unwrap();

    assert!(matches!(
        result.failure_for(ORDER),
        Some(FailureReason::Interpret { .. })
    ));
    let status = coordinator.get_status();
    assert!(!status.interpreted_units.contains(&ORDER.to_string()));
    assert!(status.breakpoints.get(ORDER).is_none());
}

#[tokio::test]
async fn test_reinterpret_waits_for_paused_process() {
    // Long poll interval: only the resume event can release the mutation quickly
    let config = CoordinatorConfig::default().with_unsafe_window(50, 1_000);
    let (adapter, coordinator) = setup(shop_edges(), config);
    coordinator
        .plan_and_apply(vec![BreakpointRequest::new(ORDER, 5)])
        .await
        .unwrap();
    adapter.pause("<0.42.0>", ORDER, 5);
    adapter.reset_calls();

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.reinterpret(vec![ORDER.to_string()]).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(adapter.interpreted_calls().is_empty());
    assert!(adapter.calls().contains(&AdapterCall::ListPaused));

    adapter.resume_all();
    coordinator.notify_resumed();

    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("reinterpretation released by resume")
        .unwrap()
        .unwrap();

    assert_eq!(result.interpreted, vec![ORDER]);
    assert_eq!(adapter.interpreted_calls(), vec![ORDER]);
    assert_eq!(coordinator.get_status().breakpoints.get(ORDER), Some(&vec![5]));
}

#[tokio::test]
async fn test_unsafe_window_exhausted_then_forced() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator
        .plan_and_apply(vec![BreakpointRequest::new(ORDER, 5)])
        .await
        .unwrap();
    adapter.pause("<0.42.0>", ORDER, 5);

    let result = coordinator.reinterpret(vec![ORDER.to_string()]).await.unwrap();

    assert_eq!(
        result.failure_for(ORDER),
        Some(&FailureReason::UnsafeMutationWindow {
            process_ids: vec!["<0.42.0>".to_string()],
            attempts: 4,
        })
    );
    assert!(result.has_transient_failures());
    // Nothing reached the runtime: still interpreted, breakpoint intact
    assert_eq!(coordinator.get_status().breakpoints.get(ORDER), Some(&vec![5]));

    let forced = coordinator
        .reinterpret_with(vec![ORDER.to_string()], ApplyOptions::default().forced())
        .await
        .unwrap();
    assert_eq!(forced.interpreted, vec![ORDER]);
}

#[tokio::test]
async fn test_unit_failure_does_not_abort_batch() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    adapter.fail_interpret(
        PAYMENT,
        InterpretError::Refused {
            unit: PAYMENT.to_string(),
            message: "sticky module".to_string(),
        },
    );

    let result = coordinator
        .plan_and_apply(vec![BreakpointRequest::new(USER, 10)])
        .await
        .unwrap();

    assert_eq!(result.interpreted, vec![USER, ORDER, CHECKOUT]);
    assert_eq!(result.failed.len(), 1);
    assert!(matches!(
        result.failure_for(PAYMENT),
        Some(FailureReason::Interpret { .. })
    ));
    assert_eq!(result.breakpoints[0].status, BreakpointStatus::Installed);

    let status = coordinator.get_status();
    assert_eq!(status.interpreted_count, 3);
    assert!(matches!(
        status.last_errors.get(PAYMENT),
        Some(FailureReason::Interpret { .. })
    ));
    assert_eq!(status.last_errors.len(), 1);
}

#[tokio::test]
async fn test_breakpoint_on_failed_target_reports_reason() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    adapter.fail_interpret(USER, InterpretError::NotLoaded(USER.to_string()));

    let result = coordinator
        .plan_and_apply(vec![BreakpointRequest::new(USER, 10)])
        .await
        .unwrap();

    match &result.breakpoints[0].status {
        BreakpointStatus::Failed { reason } => {
            assert!(reason.to_string().contains("not loaded"))
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert!(!adapter
        .calls()
        .iter()
        .any(|c| matches!(c, AdapterCall::SetBreakpoint(..))));
}

#[tokio::test]
async fn test_adapter_timeout_is_reported_not_retried() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    adapter.delay_interpret(ORDER, Duration::from_secs(2));

    let result = coordinator
        .plan_and_apply(vec![BreakpointRequest::new(USER, 10)])
        .await
        .unwrap();

    assert_eq!(
        result.failure_for(ORDER),
        Some(&FailureReason::Timeout {
            operation: "interpret".to_string(),
            after_ms: 200,
        })
    );
    assert_eq!(
        adapter
            .interpreted_calls()
            .iter()
            .filter(|u| u.as_str() == ORDER)
            .count(),
        1
    );
    assert!(!coordinator
        .get_status()
        .interpreted_units
        .contains(&ORDER.to_string()));
}

#[tokio::test]
async fn test_unknown_and_excluded_targets() {
    let config = fast_config().with_deny([USER]);
    let (adapter, coordinator) = setup(shop_edges(), config);

    let result = coordinator
        .plan_and_apply(vec![
            BreakpointRequest::new("MyApp.Ghost", 1),
            BreakpointRequest::new(USER, 2),
            BreakpointRequest::new(ORDER, 3),
        ])
        .await
        .unwrap();

    assert_eq!(
        result.failure_for("MyApp.Ghost"),
        Some(&FailureReason::UnknownTargetUnit {
            unit: "MyApp.Ghost".to_string()
        })
    );
    assert_eq!(
        result.failure_for(USER),
        Some(&FailureReason::TargetExcluded {
            unit: USER.to_string(),
            pattern: USER.to_string(),
        })
    );
    // Order proceeds; its reverse dependency User is filtered out
    assert_eq!(result.interpreted, vec![ORDER]);
    assert_eq!(result.breakpoints[2].status, BreakpointStatus::Installed);
    assert_eq!(adapter.interpreted_calls(), vec![ORDER]);
}

#[tokio::test]
async fn test_file_breakpoint_resolved_through_lookup_service() {
    let adapter = FakeAdapter::new();
    let graph = Arc::new(DependencyGraph::new());
    let resolver = StaticResolver::new().with_file("lib/my_app/standalone.ex", "MyApp.Standalone");
    let coordinator = InterpretationCoordinator::new(fast_config(), graph.clone(), adapter.clone())
        .unwrap()
        .with_resolver(Arc::new(resolver));

    let result = coordinator
        .plan_and_apply(vec![BreakpointRequest::in_file("lib/my_app/standalone.ex", 3)])
        .await
        .unwrap();

    assert_eq!(result.interpreted, vec!["MyApp.Standalone"]);
    assert_eq!(result.breakpoints[0].unit.as_deref(), Some("MyApp.Standalone"));
    assert_eq!(result.breakpoints[0].status, BreakpointStatus::Installed);
    assert!(graph.is_known("MyApp.Standalone"));
    assert_eq!(graph.version(), 0);
}

#[tokio::test]
async fn test_disabled_passthrough_skips_everything() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator.set_mode(false).await;

    let result = coordinator
        .plan_and_apply(vec![BreakpointRequest::new(USER, 10)])
        .await
        .unwrap();

    assert_eq!(result.breakpoints[0].status, BreakpointStatus::Skipped);
    assert!(adapter.calls().is_empty());
    assert_eq!(coordinator.get_status().interpreted_count, 0);

    coordinator.set_mode(true).await;
    let result = coordinator
        .plan_and_apply(vec![BreakpointRequest::new(USER, 10)])
        .await
        .unwrap();
    assert_eq!(result.breakpoints[0].status, BreakpointStatus::Installed);
}

#[tokio::test]
async fn test_disabled_interpret_patterns() {
    let mut config = fast_config()
        .with_disabled_behavior(DisabledBehavior::InterpretPatterns)
        .with_allow([ORDER, PAYMENT]);
    config.enabled = false;
    let (_, coordinator) = setup(shop_edges(), config);

    let result = coordinator
        .plan_and_apply(vec![
            BreakpointRequest::new(ORDER, 3),
            BreakpointRequest::new(USER, 4),
        ])
        .await
        .unwrap();

    assert_eq!(result.interpreted, vec![ORDER, PAYMENT]);
    assert_eq!(result.breakpoints[0].status, BreakpointStatus::Installed);
    assert_eq!(result.breakpoints[1].status, BreakpointStatus::Skipped);
}

#[tokio::test]
async fn test_status_and_ingest_not_blocked_by_mutation() {
    let (adapter, coordinator) = setup(shop_edges(), CoordinatorConfig::default());
    adapter.delay_interpret(ORDER, Duration::from_millis(400));

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .plan_and_apply(vec![BreakpointRequest::new(USER, 10)])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let status = coordinator.get_status();
    let report = coordinator.ingest(vec![Edge::call(ORDER, "MyApp.Repo")]);
    assert!(started.elapsed() < Duration::from_millis(100));

    // Pre-mutation snapshot, never a torn intermediate
    assert_eq!(status.interpreted_count, 0);
    assert_eq!(status.sequence_number, 0);
    assert_eq!(report.added, 1);

    let result = task.await.unwrap().unwrap();
    assert_eq!(result.interpreted.len(), 4);
    assert_eq!(coordinator.get_status().interpreted_count, 4);
    assert_eq!(coordinator.get_status().sequence_number, 1);
}

#[tokio::test]
async fn test_concurrent_requests_are_serialized() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    adapter.delay_interpret(USER, Duration::from_millis(50));

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .plan_and_apply(vec![BreakpointRequest::new(USER, 1)])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = coordinator
        .plan_and_apply(vec![BreakpointRequest::new(ORDER, 2)])
        .await
        .unwrap();
    let first = first.await.unwrap().unwrap();

    // The second request saw the first one's units as already interpreted
    assert_eq!(first.sequence, 1);
    assert_eq!(second.sequence, 2);
    assert!(second.interpreted.is_empty());
    assert_eq!(adapter.interpreted_calls().len(), 4);
}

#[tokio::test]
async fn test_cancelled_request_leaves_units_uninterpreted() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = coordinator
        .plan_and_apply_with(
            vec![BreakpointRequest::new(USER, 10)],
            ApplyOptions::default().with_cancel(cancel),
        )
        .await
        .unwrap();

    assert_eq!(result.failed.len(), 4);
    assert!(result
        .failed
        .iter()
        .all(|f| matches!(f.reason, FailureReason::Cancelled { .. })));
    assert!(adapter.interpreted_calls().is_empty());
    assert_eq!(coordinator.get_status().interpreted_count, 0);
}

#[tokio::test]
async fn test_end_session_unloads_everything() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator
        .plan_and_apply(vec![BreakpointRequest::new(ORDER, 1)])
        .await
        .unwrap();

    let mut unloaded = coordinator.end_session().await;
    unloaded.sort();
    assert_eq!(unloaded, vec![ORDER, USER]);
    assert!(adapter
        .calls()
        .contains(&AdapterCall::Uninterpret(ORDER.to_string())));

    let status = coordinator.get_status();
    assert!(status.session_ended);
    assert_eq!(status.interpreted_count, 0);
    assert!(status.breakpoints.is_empty());

    assert!(matches!(
        coordinator
            .plan_and_apply(vec![BreakpointRequest::new(ORDER, 1)])
            .await,
        Err(CoordinatorError::SessionEnded)
    ));
    assert!(coordinator.end_session().await.is_empty());
}

#[tokio::test]
async fn test_demand_driven_submit_completes_immediately() {
    let (_, coordinator) = setup(shop_edges(), fast_config());

    match coordinator
        .submit(vec![BreakpointRequest::new(USER, 10)])
        .await
        .unwrap()
    {
        Submission::Completed(result) => assert_eq!(result.interpreted.len(), 4),
        Submission::Background(_) => panic!("demand-driven requests run immediately"),
    }
}

#[tokio::test]
async fn test_predictive_submit_goes_deeper() {
    let edges = vec![Edge::call("A", "B"), Edge::call("B", "C"), Edge::call("C", "D")];
    let config = fast_config().with_strategy(CoordinationStrategy::Predictive { depth: 1 });
    let (_, coordinator) = setup(edges, config);

    match coordinator
        .submit(vec![BreakpointRequest::new("A", 1)])
        .await
        .unwrap()
    {
        Submission::Completed(result) => assert_eq!(result.interpreted, vec!["A", "B", "C"]),
        Submission::Background(_) => panic!("predictive requests run immediately"),
    }
}

#[tokio::test]
async fn test_adaptive_background_retries_transient_failures() {
    let config = CoordinatorConfig::default()
        .with_unsafe_window(0, 10)
        .with_strategy(CoordinationStrategy::Adaptive {
            background_threshold: Complexity::Low,
            max_retries: 3,
            backoff_ms: 100,
        });
    let (adapter, coordinator) = setup(shop_edges(), config);
    adapter.pause("<0.7.0>", ORDER, 12);

    let submission = coordinator
        .submit(vec![BreakpointRequest::new(USER, 10)])
        .await
        .unwrap();
    let Submission::Background(handle) = submission else {
        panic!("low threshold moves every request to the background");
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    adapter.resume_all();

    let result = handle.await.unwrap().unwrap();
    assert!(result.is_success());
    assert_eq!(result.interpreted.len(), 4);
    assert!(result.interpreted.contains(&ORDER.to_string()));
    assert_eq!(coordinator.get_status().interpreted_count, 4);
}

#[tokio::test]
async fn test_cancel_before_runtime_call_keeps_state() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator
        .plan_and_apply(vec![BreakpointRequest::new(ORDER, 10)])
        .await
        .unwrap();

    // Fires between the safe-window check and the first mutating call
    let cancel = CancellationToken::new();
    adapter.cancel_after_poll(cancel.clone());
    adapter.reset_calls();

    let result = coordinator
        .reinterpret_with(
            vec![ORDER.to_string()],
            ApplyOptions::default().with_cancel(cancel),
        )
        .await
        .unwrap();

    assert!(matches!(
        result.failure_for(ORDER),
        Some(FailureReason::Cancelled { .. })
    ));
    assert!(adapter.mutation_calls().is_empty());

    let status = coordinator.get_status();
    assert!(status.interpreted_units.contains(&ORDER.to_string()));
    assert_eq!(status.breakpoints.get(ORDER), Some(&vec![10]));
    assert!(status.last_errors.is_empty());
}

#[tokio::test]
async fn test_cancel_before_interpret_leaves_unit_untouched() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    let cancel = CancellationToken::new();
    adapter.cancel_after_poll(cancel.clone());

    let result = coordinator
        .plan_and_apply_with(
            vec![BreakpointRequest::new(USER, 10)],
            ApplyOptions::default().with_cancel(cancel),
        )
        .await
        .unwrap();

    assert!(result.interpreted.is_empty());
    assert!(result
        .failed
        .iter()
        .all(|f| matches!(f.reason, FailureReason::Cancelled { .. })));
    assert!(adapter.interpreted_calls().is_empty());

    let status = coordinator.get_status();
    assert_eq!(status.interpreted_count, 0);
    assert!(status.last_errors.is_empty());
}

#[tokio::test]
async fn test_cancel_after_clear_reports_lost_breakpoints() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator
        .plan_and_apply(vec![
            BreakpointRequest::new(ORDER, 10),
            BreakpointRequest::new(ORDER, 20),
        ])
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    adapter.cancel_after_clear(cancel.clone());
    adapter.reset_calls();

    let result = coordinator
        .reinterpret_with(
            vec![ORDER.to_string()],
            ApplyOptions::default().with_cancel(cancel),
        )
        .await
        .unwrap();

    // Old code still loaded with its breakpoints gone
    assert!(result.failed.is_empty());
    assert_eq!(result.interpreted, vec![ORDER]);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].lost_lines, vec![10, 20]);
    assert!(adapter.interpreted_calls().is_empty());

    let status = coordinator.get_status();
    assert!(status.interpreted_units.contains(&ORDER.to_string()));
    assert_eq!(status.breakpoints.get(ORDER), None);
}

#[tokio::test]
async fn test_failed_clear_still_reinterprets() {
    let (adapter, coordinator) = setup(shop_edges(), fast_config());
    coordinator
        .plan_and_apply(vec![
            BreakpointRequest::new(ORDER, 10),
            BreakpointRequest::new(ORDER, 20),
        ])
        .await
        .unwrap();
    adapter.fail_clear(ORDER);
    adapter.reset_calls();

    let result = coordinator.reinterpret(vec![ORDER.to_string()]).await.unwrap();

    assert!(result.is_success());
    assert!(result.warnings.is_empty());
    assert_eq!(adapter.interpreted_calls(), vec![ORDER]);
    assert_eq!(coordinator.get_status().breakpoints.get(ORDER), Some(&vec![10, 20]));
}

#[tokio::test]
async fn test_mutations_bounded_by_max_concurrent() {
    let mut edges = Vec::new();
    for i in 0..10 {
        edges.push(Edge::call("App.Hub", format!("App.Dep{}", i)));
    }
    let mut config = fast_config().with_policy(ScopePolicy::Minimal);
    config.max_concurrent_mutations = 2;
    let (adapter, coordinator) = setup(edges, config);
    adapter.delay_interpret("App.Hub", Duration::from_millis(20));
    for i in 0..10 {
        adapter.delay_interpret(&format!("App.Dep{}", i), Duration::from_millis(20));
    }

    let result = coordinator
        .plan_and_apply(vec![BreakpointRequest::new("App.Hub", 1)])
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.interpreted.len(), 11);
    assert_eq!(adapter.max_in_flight(), 2);
}

struct StalledTrace;

#[async_trait]
impl TraceSource for StalledTrace {
    async fn get_trace(&self) -> anyhow::Result<Vec<Edge>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec![Edge::call("App.Late", "App.Never")])
    }
}

#[tokio::test]
async fn test_trace_ingestor_follows_config_and_session() {
    let mut config = fast_config();
    config.trace_timeout_ms = 40;
    let (_adapter, coordinator) = setup(shop_edges(), config);
    let ingestor = coordinator.trace_ingestor();

    let started = Instant::now();
    match ingestor.pull(&StalledTrace).await {
        Err(CoordinatorError::Timeout(message)) => assert!(message.contains("40ms")),
        other => panic!("expected timeout, got {:?}", other.map(|r| r.added)),
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    coordinator.end_session().await;
    assert!(matches!(
        ingestor.pull(&StalledTrace).await,
        Err(CoordinatorError::Cancelled(_))
    ));
    assert!(!coordinator.graph().is_known("App.Late"));
}

#[tokio::test]
async fn test_set_mode_waits_for_running_mutation() {
    let (adapter, coordinator) = setup(shop_edges(), CoordinatorConfig::default());
    adapter.delay_interpret(ORDER, Duration::from_millis(150));

    let applying = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .plan_and_apply(vec![BreakpointRequest::new(USER, 10)])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    coordinator.set_mode(false).await;

    assert!(applying.is_finished());
    let status = coordinator.get_status();
    assert!(!status.enabled);
    assert_eq!(status.interpreted_count, 4);
    assert_eq!(applying.await.unwrap().unwrap().sequence, 1);
}
