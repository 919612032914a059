//! Wave strategy tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use cadence::orchestration::{StrategyAbort, WaveReport};
use cadence::{
    get_strategy, AgentStatus, Context, Error, OrchestrationEvent, OverallStatus, WaveStrategy,
};

use crate::fixtures::{agent, dag, orchestrator, parallel_config, Behavior, ScriptedExecutor};

/// Test: Progressive gate failure
/// Given 2 waves where the gate rejects wave 0
/// When the progressive strategy runs
/// Then wave 1 never executes and the result reflects only wave 0
#[tokio::test]
async fn test_progressive_gate_failure_stops_second_wave() {
    let executor = ScriptedExecutor::new(5).into_arc();
    let graph = dag(vec![
        agent("compile", &[]),
        agent("unit", &[]),
        agent("package", &["compile", "unit"]),
    ]);
    let calls = AtomicUsize::new(0);
    let gate = |wave: &WaveReport| {
        calls.fetch_add(1, Ordering::SeqCst);
        wave.index > 0
    };

    let result = assert_ok!(
        WaveStrategy::Progressive
            .execute(
                &orchestrator(parallel_config(2), &executor),
                &graph,
                &Context::new(),
                Some(&gate),
            )
            .await
    );

    assert_eq!(result.planned_waves, 2);
    assert_eq!(result.waves.len(), 1);
    assert!(!result.is_complete());
    assert_eq!(result.waves[0].gate_passed, Some(false));
    assert_eq!(result.abort_reason, Some(StrategyAbort::GateFailed { wave: 0 }));
    assert_eq!(result.overall_status, OverallStatus::Failed);
    assert!(!executor.ran("package"));
    assert!(result.result("package").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test: Progressive runs each wave's agents concurrently
#[tokio::test]
async fn test_progressive_waves_are_barriers() {
    let executor = ScriptedExecutor::new(20)
        .script("slow", Behavior::Succeed(serde_json::Value::Null), 60)
        .into_arc();
    let graph = dag(vec![
        agent("fast", &[]),
        agent("slow", &[]),
        agent("next", &["fast"]),
    ]);

    let result = assert_ok!(
        WaveStrategy::Progressive
            .execute(
                &orchestrator(parallel_config(4), &executor),
                &graph,
                &Context::new(),
                None,
            )
            .await
    );

    assert!(result.is_success());
    let fast = executor.span("fast").unwrap();
    let slow = executor.span("slow").unwrap();
    let next = executor.span("next").unwrap();
    assert!(fast.overlaps(&slow));
    assert!(next.start >= slow.end, "wave 1 must wait for all of wave 0");
}

/// Test: Systematic executes the whole plan
#[tokio::test]
async fn test_systematic_runs_all_waves_without_gate() {
    let executor = ScriptedExecutor::new(2).failing("docs").into_arc();
    let graph = dag(vec![
        agent("fetch", &[]),
        agent("build", &["fetch"]),
        agent("docs", &["fetch"]).optional(),
        agent("release", &["build"]),
    ]);

    let strategy = assert_ok!(get_strategy("Systematic"));
    let result = assert_ok!(
        strategy
            .execute(
                &orchestrator(parallel_config(2), &executor),
                &graph,
                &Context::new(),
                None,
            )
            .await
    );

    assert_eq!(result.strategy, "systematic");
    assert!(result.is_complete());
    assert!(result.waves.iter().all(|w| w.gate_passed.is_none()));
    assert_eq!(result.result("docs").unwrap().status, AgentStatus::Failed);
    assert_eq!(result.result("release").unwrap().status, AgentStatus::Success);
    assert!(result.is_success());
    assert_eq!(result.all_results().len(), 4);
}

/// Test: Strategy event stream
/// Given an event channel and a two-wave DAG
/// When either strategy runs to the end
/// Then the stream closes with exactly one RunComplete carrying the overall status
#[tokio::test]
async fn test_strategies_emit_run_complete_once() {
    for (strategy, failing, expected) in [
        (WaveStrategy::Systematic, None, OverallStatus::Success),
        (WaveStrategy::Progressive, Some("build"), OverallStatus::Failed),
    ] {
        let mut executor = ScriptedExecutor::new(1);
        if let Some(name) = failing {
            executor = executor.failing(name);
        }
        let executor = executor.into_arc();
        let graph = dag(vec![agent("build", &[]), agent("ship", &["build"])]);
        let (tx, mut rx) = mpsc::channel(64);

        let result = assert_ok!(
            strategy
                .execute(
                    &orchestrator(parallel_config(2), &executor).with_events(tx),
                    &graph,
                    &Context::new(),
                    None,
                )
                .await
        );
        assert_eq!(result.overall_status, expected);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let completions = events
            .iter()
            .filter(|e| matches!(e, OrchestrationEvent::RunComplete { .. }))
            .count();
        assert_eq!(completions, 1, "{strategy}: {events:?}");
        assert_eq!(
            events.last(),
            Some(&OrchestrationEvent::RunComplete { status: expected })
        );
    }
}

/// Test: Plan matches the DAG's waves
#[test]
fn test_plan_matches_waves() {
    let graph = dag(vec![
        agent("a", &[]),
        agent("b", &["a"]),
        agent("c", &[]),
        agent("d", &["b", "c"]),
    ]);
    let plan = WaveStrategy::Systematic.plan(&graph);
    let names: Vec<Vec<String>> = plan
        .iter()
        .map(|w| w.iter().map(|t| t.agent.name.clone()).collect())
        .collect();
    assert_eq!(names, vec![vec!["a", "c"], vec!["b"], vec!["d"]]);
}

#[test]
fn test_unknown_strategy_rejected() {
    let err = assert_err!(get_strategy("eager"));
    assert!(matches!(err, Error::InvalidArgument(ref msg) if msg.contains("progressive, systematic")));
}
