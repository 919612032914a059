//! Orchestrator behavior through the public API.
//!
//! Ordering is checked against the instants recorded by the scripted
//! executor, so these tests observe what actually ran rather than what the
//! scheduler intended.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use cadence::{
    AgentStatus, Context, DagBuilder, Error, ExecutionMode, OrchestrationEvent, OverallStatus,
    SkipReason,
};

use crate::fixtures::{
    agent, dag, fan_in, orchestrator, parallel_config, Behavior, ScriptedExecutor,
};

/// Test: Fan-in runs concurrently
/// Given A and B independent and C depending on both, max concurrency 2
/// When the run executes
/// Then A and B overlap and C starts only after both finished
#[tokio::test]
async fn test_fan_in_runs_dependencies_concurrently() {
    let executor = ScriptedExecutor::new(40).into_arc();
    let result = assert_ok!(
        orchestrator(parallel_config(2), &executor)
            .run(&fan_in(true), &Context::new())
            .await
    );

    assert!(result.is_success());
    let a = executor.span("a").unwrap();
    let b = executor.span("b").unwrap();
    let c = executor.span("c").unwrap();
    assert!(a.overlaps(&b), "A and B should run concurrently");
    assert!(c.start >= a.end && c.start >= b.end, "C must wait for A and B");
}

/// Test: Optional failure
/// Given A optional and failing
/// When the run executes
/// Then C is skipped, B still succeeds, and there is no abort
#[tokio::test]
async fn test_fan_in_optional_failure_skips_dependent() {
    let executor = ScriptedExecutor::new(10).failing("a").into_arc();
    let result = assert_ok!(
        orchestrator(parallel_config(2), &executor)
            .execute(&fan_in(false), &Context::new())
            .await
    );

    assert_eq!(result.status_of("a"), Some(AgentStatus::Failed));
    assert_eq!(result.status_of("b"), Some(AgentStatus::Success));
    assert_eq!(result.status_of("c"), Some(AgentStatus::Skipped));
    assert!(!executor.ran("c"));
    assert!(!result.is_aborted());
}

/// Test: Required failure
/// Given A required and failing fast while B is slow
/// When the run executes
/// Then B still finishes, C is skipped, and the abort references A
#[tokio::test]
async fn test_fan_in_required_failure_aborts_run() {
    let executor = ScriptedExecutor::new(10)
        .script("a", Behavior::Fail("a exploded".into()), 5)
        .script("b", Behavior::Succeed(serde_json::json!("b done")), 60)
        .into_arc();

    let err = assert_err!(
        orchestrator(parallel_config(2), &executor)
            .run(&fan_in(true), &Context::new())
            .await
    );

    let result = err.partial_result().expect("partial result attached");
    assert_eq!(result.overall_status, OverallStatus::Failed);
    assert_eq!(result.abort_reason.as_ref().unwrap().agent, "a");
    assert_eq!(result.status_of("b"), Some(AgentStatus::Success));
    assert_eq!(result.status_of("c"), Some(AgentStatus::Skipped));
    assert!(err.to_string().contains("a exploded"));
}

/// Test: Timeout
/// Given X with a 1 second timeout whose work never returns
/// When the run executes
/// Then X is TimedOut shortly after one second
#[tokio::test]
async fn test_hanging_agent_times_out() {
    let executor = ScriptedExecutor::new(0).script("x", Behavior::Hang, 0).into_arc();
    let graph = dag(vec![agent("x", &[])
        .optional()
        .with_timeout(Duration::from_secs(1))]);

    let started = Instant::now();
    let result = assert_ok!(
        orchestrator(parallel_config(1), &executor)
            .run(&graph, &Context::new())
            .await
    );
    let elapsed = started.elapsed();

    assert_eq!(result.status_of("x"), Some(AgentStatus::TimedOut));
    assert!(elapsed >= Duration::from_millis(950), "ended early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1800), "ended late: {elapsed:?}");
}

/// Test: Required timeout aborts like a failure
#[tokio::test]
async fn test_required_timeout_aborts() {
    let executor = ScriptedExecutor::new(0).script("slow", Behavior::Hang, 0).into_arc();
    let graph = dag(vec![
        agent("slow", &[]).with_timeout(Duration::from_millis(100)),
        agent("after", &["slow"]),
    ]);

    match orchestrator(parallel_config(2), &executor)
        .run(&graph, &Context::new())
        .await
    {
        Err(Error::RequiredAgentFailed { agent, result, .. }) => {
            assert_eq!(agent, "slow");
            assert_eq!(result.status_of("slow"), Some(AgentStatus::TimedOut));
            assert_eq!(result.status_of("after"), Some(AgentStatus::Skipped));
        }
        other => panic!("expected required failure, got {other:?}"),
    }
}

/// Test: No node left pending
/// Given a larger graph with mixed failures and conditions
/// When the run executes
/// Then every node has exactly one terminal result
#[tokio::test]
async fn test_every_node_reaches_terminal_status() {
    let executor = ScriptedExecutor::new(5).failing("b").into_arc();
    let graph = DagBuilder::new(vec![
        agent("a", &[]),
        agent("b", &["a"]).optional(),
        agent("c", &["a"]).with_condition("ship".parse().unwrap()),
        agent("d", &["b", "c"]).optional(),
        agent("e", &["c"]),
        agent("f", &[]),
    ])
    .build()
    .unwrap();

    let result = assert_ok!(
        orchestrator(parallel_config(3), &executor)
            .execute(&graph, &Context::new())
            .await
    );

    assert_eq!(result.results.len(), graph.len());
    assert!(result.results.values().all(|r| r.status.is_terminal()));
    assert_eq!(
        result.get("c").unwrap().skip_reason,
        Some(SkipReason::Condition)
    );
    assert_eq!(result.status_of("d"), Some(AgentStatus::Skipped));
    assert_eq!(result.status_of("e"), Some(AgentStatus::Success));
    assert!(result.is_success());
}

/// Test: Dependencies always finish first, in every mode
#[tokio::test]
async fn test_no_agent_starts_before_its_dependencies() {
    for mode in [
        ExecutionMode::Sequential,
        ExecutionMode::Parallel,
        ExecutionMode::Hybrid,
    ] {
        let executor = ScriptedExecutor::new(8).into_arc();
        let graph = dag(vec![
            agent("root", &[]),
            agent("l1", &["root"]),
            agent("l2", &["root"]),
            agent("deep", &["l1"]),
            agent("join", &["deep", "l2"]),
            agent("solo", &[]),
        ]);
        let config = parallel_config(3).with_mode(mode);
        assert_ok!(
            orchestrator(config, &executor)
                .run(&graph, &Context::new())
                .await
        );

        for node in graph.agents() {
            let span = executor.span(&node.name).unwrap();
            for dep in &node.dependencies {
                let dep_span = executor.span(dep).unwrap();
                assert!(
                    dep_span.end <= span.start,
                    "{mode}: {} started before {dep} finished",
                    node.name
                );
            }
        }
    }
}

/// Test: Sequential mode is deterministic
#[tokio::test]
async fn test_sequential_order_is_topological_with_declaration_tie_break() {
    let executor = ScriptedExecutor::new(2).into_arc();
    let graph = dag(vec![
        agent("docs", &["build"]),
        agent("fetch", &[]),
        agent("build", &["fetch"]),
        agent("lint", &[]),
    ]);
    let config = parallel_config(4).with_mode(ExecutionMode::Sequential);
    assert_ok!(
        orchestrator(config, &executor)
            .run(&graph, &Context::new())
            .await
    );

    assert_eq!(executor.started(), vec!["fetch", "build", "docs", "lint"]);
    assert_eq!(executor.peak_concurrency(), 1);
}

/// Test: Concurrency bound holds
#[tokio::test]
async fn test_parallel_never_exceeds_max_concurrency() {
    let executor = ScriptedExecutor::new(25).into_arc();
    let graph = dag((0..8).map(|i| agent(&format!("job{i}"), &[])).collect());
    assert_ok!(
        orchestrator(parallel_config(3), &executor)
            .run(&graph, &Context::new())
            .await
    );

    assert_eq!(executor.started().len(), 8);
    assert!(executor.peak_concurrency() <= 3);
}

/// Test: Conditions read the caller's context
#[tokio::test]
async fn test_condition_uses_context() {
    let graph = dag(vec![
        agent("deploy", &[]).with_condition("env == 'prod' && !dry_run".parse().unwrap())
    ]);

    let executor = ScriptedExecutor::new(1).into_arc();
    let mut context = Context::new();
    context.insert("env".into(), serde_json::json!("prod"));
    let result = assert_ok!(
        orchestrator(parallel_config(1), &executor)
            .run(&graph, &context)
            .await
    );
    assert_eq!(result.status_of("deploy"), Some(AgentStatus::Success));

    context.insert("dry_run".into(), serde_json::json!(true));
    let result = assert_ok!(
        orchestrator(parallel_config(1), &executor)
            .run(&graph, &context)
            .await
    );
    assert_eq!(result.status_of("deploy"), Some(AgentStatus::Skipped));
}

/// Test: Event stream
/// Given an event channel
/// When a required agent fails
/// Then dispatch, finish, abort and completion are all reported
#[tokio::test]
async fn test_event_stream_reports_abort() {
    let executor = ScriptedExecutor::new(1).failing("a").into_arc();
    let (tx, mut rx) = mpsc::channel(32);
    let graph = dag(vec![agent("a", &[]), agent("b", &["a"])]);

    let result = assert_ok!(
        orchestrator(parallel_config(2), &executor)
            .with_events(tx)
            .execute(&graph, &Context::new())
            .await
    );
    assert!(result.is_aborted());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events.first(),
        Some(&OrchestrationEvent::AgentDispatched { agent: "a".into() })
    );
    assert!(events.contains(&OrchestrationEvent::RunAborted { agent: "a".into() }));
    assert!(events.contains(&OrchestrationEvent::AgentFinished {
        agent: "b".into(),
        status: AgentStatus::Skipped
    }));
    assert_eq!(
        events.last(),
        Some(&OrchestrationEvent::RunComplete {
            status: OverallStatus::Failed
        })
    );
}
