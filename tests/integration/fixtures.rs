//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building agents and DAGs tersely
//! - A scripted executor that records start/finish instants per agent
//! - Writing config documents to temporary directories

use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cadence::orchestration::ExecutionOutcome;
use cadence::{
    get_default_config, AgentConfig, AgentDag, AgentExecutor, Context, DagBuilder,
    ExecutionMode, OrchestrationConfig, Orchestrator,
};

/// A required agent with the given dependencies.
pub fn agent(name: &str, deps: &[&str]) -> AgentConfig {
    AgentConfig::new(name).depends_on(deps.iter().copied())
}

/// Build a DAG, panicking on invalid input.
pub fn dag(agents: Vec<AgentConfig>) -> AgentDag {
    DagBuilder::new(agents).build().expect("valid DAG")
}

/// `a`, `b` independent; `c` depends on both.
pub fn fan_in(a_required: bool) -> AgentDag {
    let a = if a_required {
        agent("a", &[])
    } else {
        agent("a", &[]).optional()
    };
    dag(vec![a, agent("b", &[]), agent("c", &["a", "b"])])
}

pub fn parallel_config(max_concurrency: usize) -> OrchestrationConfig {
    get_default_config()
        .with_mode(ExecutionMode::Parallel)
        .with_max_concurrency(max_concurrency)
}

/// What a scripted agent does when executed.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(Value),
    Fail(String),
    /// Never returns; only a deadline ends it.
    Hang,
}

/// When one agent's unit of work ran.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Executor whose per-agent behavior and delay are scripted up front.
///
/// Unscripted agents succeed with `{"agent": name}` after the default delay.
pub struct ScriptedExecutor {
    behaviors: HashMap<String, (Behavior, Duration)>,
    default_delay: Duration,
    spans: Mutex<Vec<(String, Span)>>,
}

impl ScriptedExecutor {
    pub fn new(default_delay_ms: u64) -> Self {
        Self {
            behaviors: HashMap::new(),
            default_delay: Duration::from_millis(default_delay_ms),
            spans: Mutex::new(Vec::new()),
        }
    }

    pub fn script(mut self, name: &str, behavior: Behavior, delay_ms: u64) -> Self {
        self.behaviors
            .insert(name.to_string(), (behavior, Duration::from_millis(delay_ms)));
        self
    }

    pub fn failing(self, name: &str) -> Self {
        let delay = self.default_delay.as_millis() as u64;
        self.script(name, Behavior::Fail(format!("{} failed", name)), delay)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Agents whose unit of work completed, in start order.
    pub fn started(&self) -> Vec<String> {
        let mut spans = self.spans.lock().unwrap().clone();
        spans.sort_by_key(|(_, span)| span.start);
        spans.into_iter().map(|(name, _)| name).collect()
    }

    pub fn span(&self, name: &str) -> Option<Span> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, span)| *span)
    }

    pub fn ran(&self, name: &str) -> bool {
        self.span(name).is_some()
    }

    /// Peak number of simultaneously running agents.
    pub fn peak_concurrency(&self) -> usize {
        let spans = self.spans.lock().unwrap();
        spans
            .iter()
            .map(|(_, s)| {
                spans
                    .iter()
                    .filter(|(_, o)| o.start <= s.start && s.start < o.end)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    fn record(&self, name: &str, start: Instant) {
        self.spans.lock().unwrap().push((
            name.to_string(),
            Span {
                start,
                end: Instant::now(),
            },
        ));
    }
}

impl AgentExecutor for ScriptedExecutor {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentConfig,
        _context: &'a Context,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, ExecutionOutcome> {
        Box::pin(async move {
            let start = Instant::now();
            let (behavior, delay) = self
                .behaviors
                .get(&agent.name)
                .cloned()
                .unwrap_or((Behavior::Succeed(json!({ "agent": agent.name })), self.default_delay));

            tokio::time::sleep(delay).await;
            let outcome = match behavior {
                Behavior::Succeed(value) => Ok(value),
                Behavior::Fail(error) => Err(error),
                Behavior::Hang => futures::future::pending().await,
            };
            self.record(&agent.name, start);
            outcome
        })
    }
}

/// Orchestrator over a shared scripted executor.
pub fn orchestrator(config: OrchestrationConfig, executor: &Arc<ScriptedExecutor>) -> Orchestrator {
    Orchestrator::new(config, Arc::clone(executor) as Arc<dyn AgentExecutor>)
}

/// A temporary directory holding one config document.
pub struct ConfigFile {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl ConfigFile {
    pub fn new(file_name: &str, contents: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join(file_name);
        std::fs::write(&path, contents).expect("Failed to write config");
        Self { dir, path }
    }
}

/// A small pipeline used across suites.
pub const PIPELINE_TOML: &str = r#"
mode = "parallel"
max_concurrency = 2

[defaults]
timeout_seconds = 30

[[agents]]
name = "fetch"

[[agents]]
name = "lint"
depends_on = ["fetch"]
required = false

[[agents]]
name = "build"
depends_on = ["fetch"]

[[agents]]
name = "test"
depends_on = ["build"]
retries = 1

[[agents]]
name = "deploy"
depends_on = ["test", "lint"]
condition = "env == 'prod'"
"#;
