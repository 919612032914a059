//! Shell executor driven by a real config file.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_test::assert_ok;

use cadence::{
    AgentStatus, Config, Context, DagBuilder, Orchestrator, OverallStatus, ShellExecutor,
};

use crate::fixtures::ConfigFile;

const SHELL_PIPELINE: &str = r#"
[[agents]]
name = "write"
command = "echo built > artifact.txt"

[[agents]]
name = "read"
depends_on = ["write"]
command = "cat artifact.txt"

[[agents]]
name = "report"
depends_on = ["read"]
command = "printf '{\"target\": \"%s\"}' \"$CADENCE_TARGET\""

[[agents]]
name = "flaky"
required = false
command = "exit 7"

[[agents]]
name = "sleepy"
required = false
timeout_seconds = 0.2
command = "sleep 5"
"#;

#[tokio::test]
async fn test_shell_pipeline_end_to_end() {
    let file = ConfigFile::new("cadence.toml", SHELL_PIPELINE);
    let config = assert_ok!(Config::load(&file.path));
    let graph = assert_ok!(DagBuilder::from_config(&config).build());
    let executor = ShellExecutor::new().with_working_dir(file.dir.path());

    let mut context = Context::new();
    context.insert("target".into(), json!("staging"));

    let started = Instant::now();
    let result = assert_ok!(
        Orchestrator::new(config.orchestration.clone(), Arc::new(executor))
            .run(&graph, &context)
            .await
    );

    assert_eq!(result.overall_status, OverallStatus::Success);
    assert_eq!(result.get("read").unwrap().output, json!("built"));
    assert_eq!(
        result.get("report").unwrap().output,
        json!({ "target": "staging" })
    );
    assert_eq!(result.status_of("flaky"), Some(AgentStatus::Failed));
    assert_eq!(
        result.get("flaky").unwrap().error.as_deref(),
        Some("command exited with code 7")
    );
    assert_eq!(result.status_of("sleepy"), Some(AgentStatus::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(3));
}
