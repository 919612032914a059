//! Orchestrator for dependency-ordered agent execution.
//!
//! The Orchestrator walks an [`AgentDag`], dispatching agents whose
//! dependencies are satisfied to a bounded [`WorkerPool`] and recording every
//! terminal result. All bookkeeping (ready set, unresolved-dependency counts,
//! results) lives in one scheduling loop; runners only report back through
//! the pool, so concurrent completions can never race on shared state.

use petgraph::graph::NodeIndex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, ExecutionMode, OrchestrationConfig};
use crate::core::condition::Context;
use crate::core::dag::AgentDag;
use crate::core::status::{
    AbortReason, AgentResult, AgentStatus, OrchestrationResult, OverallStatus, SkipReason,
};
use crate::error::{Error, Result};
use crate::orchestration::pool::WorkerPool;
use crate::orchestration::runner::{AgentExecutor, AgentRunner};

/// Progress notifications emitted while a run executes.
///
/// Sent with `try_send`: a slow or full receiver drops events rather than
/// stalling the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum OrchestrationEvent {
    /// An agent was handed to the worker pool.
    AgentDispatched { agent: String },
    /// An agent reached a terminal status (including skips).
    AgentFinished { agent: String, status: AgentStatus },
    /// A required agent failed; nothing new will be dispatched.
    RunAborted { agent: String },
    /// The run is over.
    RunComplete { status: OverallStatus },
}

/// Results for one scheduled subset of a DAG.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeOutcome {
    pub results: BTreeMap<String, AgentResult>,
    pub abort: Option<AbortReason>,
}

/// Drives a validated DAG to completion.
///
/// # Example
///
/// ```ignore
/// let dag = DagBuilder::from_config(&config).build()?;
/// let orchestrator = Orchestrator::new(config.orchestration.clone(), executor);
/// let result = orchestrator.run(&dag, &context).await?;
/// ```
pub struct Orchestrator {
    config: OrchestrationConfig,
    runner: AgentRunner,
    event_tx: Option<mpsc::Sender<OrchestrationEvent>>,
}

impl Orchestrator {
    pub fn new(config: OrchestrationConfig, executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            config,
            runner: AgentRunner::new(executor),
            event_tx: None,
        }
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<OrchestrationEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    /// Execute every agent of the DAG.
    ///
    /// A required-agent failure does not produce an error here: the result
    /// comes back with `overall_status = Failed` and `abort_reason` set.
    /// Errors are reserved for internal scheduling inconsistencies.
    pub async fn execute(&self, dag: &AgentDag, context: &Context) -> Result<OrchestrationResult> {
        let mut result = OrchestrationResult::new();
        info!(
            run = %result.run_id.short(),
            agents = dag.len(),
            mode = %self.config.mode,
            "orchestration started"
        );

        let scope: Vec<NodeIndex> = dag.node_indices().collect();
        let outcome = self
            .execute_scope(dag, &scope, &BTreeMap::new(), context, self.config.mode)
            .await?;

        result.results = outcome.results;
        result.abort_reason = outcome.abort;
        result.finalize(|name| dag.get(name).is_some_and(|a| a.required));

        info!(
            run = %result.run_id.short(),
            status = %result.overall_status,
            succeeded = result.count(AgentStatus::Success),
            failed = result.failed_agents().len(),
            skipped = result.count(AgentStatus::Skipped),
            "orchestration finished"
        );
        self.emit(OrchestrationEvent::RunComplete {
            status: result.overall_status,
        });
        Ok(result)
    }

    /// Execute every agent, surfacing a required-agent failure as an error.
    ///
    /// # Errors
    ///
    /// `Error::RequiredAgentFailed` with the partial result attached when a
    /// required agent fails or times out.
    pub async fn run(&self, dag: &AgentDag, context: &Context) -> Result<OrchestrationResult> {
        let result = self.execute(dag, context).await?;
        match result.abort_reason.clone() {
            Some(abort) => Err(Error::RequiredAgentFailed {
                agent: abort.agent,
                cause: abort.error,
                result: Box::new(result),
            }),
            None => Ok(result),
        }
    }

    /// Execute a subset of the DAG.
    ///
    /// Dependencies outside `scope` must already have a result in `prior`;
    /// they count as satisfied or blocking exactly like in-scope ones.
    pub(crate) async fn execute_scope(
        &self,
        dag: &AgentDag,
        scope: &[NodeIndex],
        prior: &BTreeMap<String, AgentResult>,
        context: &Context,
        mode: ExecutionMode,
    ) -> Result<ScopeOutcome> {
        let mut state = RunState::new(
            dag,
            scope,
            prior,
            self.config.continue_on_optional_failure,
            self.event_tx.as_ref(),
        )?;

        let mut pool = WorkerPool::new(self.config.concurrency_for(mode));
        let context = Arc::new(context.clone());

        loop {
            if state.abort.is_none() {
                while pool.has_capacity() {
                    let Some(node) = state.next_ready(mode) else {
                        break;
                    };
                    let agent = dag.agent(node).clone();
                    debug!(agent = %agent.name, wave = dag.wave_of(node), "dispatching agent");
                    state.emit(OrchestrationEvent::AgentDispatched {
                        agent: agent.name.clone(),
                    });

                    let runner = self.runner.clone();
                    let context = Arc::clone(&context);
                    let name = agent.name.clone();
                    pool.spawn(&name, async move {
                        run_with_retries(runner, agent, context).await
                    })?;
                }
            }

            let Some(result) = pool.join_next().await else {
                break;
            };
            let node = dag.index_of(&result.agent_name).ok_or_else(|| {
                Error::Orchestration(format!(
                    "finished agent '{}' is not in the graph",
                    result.agent_name
                ))
            })?;

            if result.status.is_failure() && dag.agent(node).required && state.abort.is_none() {
                let error = result.error.clone().unwrap_or_default();
                warn!(
                    agent = %result.agent_name,
                    status = %result.status,
                    error = %error,
                    "required agent failed, aborting run"
                );
                state.abort = Some(AbortReason {
                    agent: result.agent_name.clone(),
                    status: result.status,
                    error,
                });
                state.emit(OrchestrationEvent::RunAborted {
                    agent: result.agent_name.clone(),
                });
            }

            state.complete(node, result);
        }

        if let Some(abort) = state.abort.clone() {
            state.abandon_remaining(&abort.agent);
        }

        if state.unresolved > 0 {
            return Err(Error::Orchestration(format!(
                "scheduling stalled with {} agent(s) unresolved",
                state.unresolved
            )));
        }

        Ok(ScopeOutcome {
            results: state.results,
            abort: state.abort,
        })
    }

    pub(crate) fn emit(&self, event: OrchestrationEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Run an agent, re-running failures up to `agent.retries` extra times.
async fn run_with_retries(
    runner: AgentRunner,
    agent: AgentConfig,
    context: Arc<Context>,
) -> AgentResult {
    let mut attempt = 1;
    let mut first_started = None;
    loop {
        let mut result = runner.run(&agent, &context).await;
        if result.status == AgentStatus::Skipped {
            return result;
        }
        first_started = first_started.or(result.started_at);
        result.started_at = first_started;
        result.attempts = attempt;

        if result.status.is_failure() && attempt <= agent.retries {
            warn!(
                agent = %agent.name,
                attempt,
                retries = agent.retries,
                status = %result.status,
                "retrying agent"
            );
            attempt += 1;
            continue;
        }
        return result;
    }
}

/// Scheduling bookkeeping for one scope. Owned by the scheduling loop.
struct RunState<'a> {
    dag: &'a AgentDag,
    scope: Vec<NodeIndex>,
    in_scope: Vec<bool>,
    resolved: Vec<bool>,
    /// In-scope dependencies that have not reached a terminal status yet.
    pending_deps: Vec<usize>,
    ready: BTreeSet<NodeIndex>,
    unresolved: usize,
    results: BTreeMap<String, AgentResult>,
    abort: Option<AbortReason>,
    allow_optional_failures: bool,
    event_tx: Option<&'a mpsc::Sender<OrchestrationEvent>>,
}

impl<'a> RunState<'a> {
    fn new(
        dag: &'a AgentDag,
        scope: &[NodeIndex],
        prior: &BTreeMap<String, AgentResult>,
        allow_optional_failures: bool,
        event_tx: Option<&'a mpsc::Sender<OrchestrationEvent>>,
    ) -> Result<Self> {
        let n = dag.len();
        let mut in_scope = vec![false; n];
        let mut scope: Vec<NodeIndex> = scope.to_vec();
        scope.sort();
        scope.dedup();
        for node in &scope {
            in_scope[node.index()] = true;
        }

        let mut state = Self {
            dag,
            in_scope,
            resolved: vec![false; n],
            pending_deps: vec![0; n],
            ready: BTreeSet::new(),
            unresolved: scope.len(),
            results: BTreeMap::new(),
            abort: None,
            allow_optional_failures,
            event_tx,
            scope,
        };

        let mut blocked = Vec::new();
        for &node in &state.scope {
            let mut pending = 0;
            for dep in dag.dependency_indices(node) {
                if state.in_scope[dep.index()] {
                    pending += 1;
                    continue;
                }
                let dep_name = &dag.agent(dep).name;
                let prior_result = prior.get(dep_name).ok_or_else(|| {
                    Error::Orchestration(format!(
                        "dependency '{}' of '{}' is outside the scheduled set and has no result",
                        dep_name,
                        dag.agent(node).name
                    ))
                })?;
                if !state.satisfies(dep, prior_result) && !blocked.iter().any(|(n, _)| *n == node)
                {
                    blocked.push((node, dep_name.clone()));
                }
            }
            state.pending_deps[node.index()] = pending;
        }

        for &node in &state.scope {
            if state.pending_deps[node.index()] == 0 && !blocked.iter().any(|(n, _)| *n == node) {
                state.ready.insert(node);
            }
        }
        for (node, dependency) in blocked {
            state.skip(node, SkipReason::DependencyNotSatisfied { dependency });
        }

        Ok(state)
    }

    fn satisfies(&self, dep: NodeIndex, result: &AgentResult) -> bool {
        let allow_failed = self.allow_optional_failures && !self.dag.agent(dep).required;
        result.satisfies_dependents(allow_failed)
    }

    /// Pick the next ready node: lowest declaration index, restricted to the
    /// lowest unfinished wave in hybrid mode.
    fn next_ready(&mut self, mode: ExecutionMode) -> Option<NodeIndex> {
        let node = match mode {
            ExecutionMode::Hybrid => {
                let wave = self
                    .scope
                    .iter()
                    .filter(|n| !self.resolved[n.index()])
                    .map(|&n| self.dag.wave_of(n))
                    .min()?;
                self.ready
                    .iter()
                    .copied()
                    .find(|&n| self.dag.wave_of(n) == wave)?
            }
            ExecutionMode::Sequential | ExecutionMode::Parallel => *self.ready.first()?,
        };
        self.ready.remove(&node);
        Some(node)
    }

    /// Record a terminal result and update dependents.
    ///
    /// Blocked dependents are skipped through a worklist, so a long chain of
    /// skips never grows the call stack.
    fn complete(&mut self, node: NodeIndex, result: AgentResult) {
        let mut pending = VecDeque::from([(node, result)]);
        while let Some((node, result)) = pending.pop_front() {
            if self.resolved[node.index()] {
                continue;
            }
            for (dependent, reason) in self.record(node, result) {
                pending.push_back((dependent, self.skipped(dependent, reason)));
            }
        }
    }

    /// Store one result and return the dependents it blocks.
    fn record(&mut self, node: NodeIndex, result: AgentResult) -> Vec<(NodeIndex, SkipReason)> {
        self.resolved[node.index()] = true;
        self.unresolved -= 1;
        self.ready.remove(&node);

        let satisfied = self.satisfies(node, &result);
        let name = result.agent_name.clone();
        debug!(agent = %name, status = %result.status, "agent finished");
        self.emit(OrchestrationEvent::AgentFinished {
            agent: name.clone(),
            status: result.status,
        });
        self.results.insert(name.clone(), result);

        let mut blocked = Vec::new();
        for dependent in self.dag.dependent_indices(node) {
            if !self.in_scope[dependent.index()] || self.resolved[dependent.index()] {
                continue;
            }
            if satisfied {
                let pending = &mut self.pending_deps[dependent.index()];
                *pending = pending.saturating_sub(1);
                if *pending == 0 {
                    self.ready.insert(dependent);
                }
            } else {
                blocked.push((
                    dependent,
                    SkipReason::DependencyNotSatisfied {
                        dependency: name.clone(),
                    },
                ));
            }
        }
        blocked
    }

    fn skipped(&self, node: NodeIndex, reason: SkipReason) -> AgentResult {
        let name = &self.dag.agent(node).name;
        debug!(agent = %name, reason = %reason, "skipping agent");
        AgentResult::skipped(name, reason)
    }

    fn skip(&mut self, node: NodeIndex, reason: SkipReason) {
        let result = self.skipped(node, reason);
        self.complete(node, result);
    }

    /// Mark every unresolved node as skipped because of an abort.
    fn abandon_remaining(&mut self, failed_agent: &str) {
        let pending: Vec<NodeIndex> = self
            .scope
            .iter()
            .copied()
            .filter(|n| !self.resolved[n.index()])
            .collect();
        for node in pending {
            let name = self.dag.agent(node).name.clone();
            self.resolved[node.index()] = true;
            self.unresolved -= 1;
            self.ready.remove(&node);
            self.emit(OrchestrationEvent::AgentFinished {
                agent: name.clone(),
                status: AgentStatus::Skipped,
            });
            let result = AgentResult::skipped(
                &name,
                SkipReason::Aborted {
                    agent: failed_agent.to_string(),
                },
            );
            self.results.insert(name, result);
        }
    }

    fn emit(&self, event: OrchestrationEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}
