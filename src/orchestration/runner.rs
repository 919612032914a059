//! Single-agent execution under a deadline.
//!
//! The runner never knows what an agent actually does: callers supply an
//! [`AgentExecutor`] and the runner wraps each invocation with condition
//! evaluation, a deadline, and best-effort cancellation.

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::core::condition::Context;
use crate::core::status::{AgentResult, SkipReason};

/// Deadlines further out than this are treated as "never".
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What an executor returns: an opaque output payload, or an error message.
pub type ExecutionOutcome = std::result::Result<Value, String>;

/// Performs the unit of work behind an agent.
///
/// `cancel` is triggered when the deadline elapses; implementations that can
/// stop early should watch it.
pub trait AgentExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentConfig,
        context: &'a Context,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, ExecutionOutcome>;
}

/// Executor backed by an async closure. See [`from_fn`].
pub struct FnExecutor<F> {
    f: F,
}

/// Adapt an async closure into an [`AgentExecutor`].
///
/// ```ignore
/// let executor = from_fn(|agent, _ctx, _cancel| async move {
///     Ok(serde_json::json!({ "agent": agent.name }))
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(AgentConfig, Context, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionOutcome> + Send + 'static,
{
    FnExecutor { f }
}

impl<F, Fut> AgentExecutor for FnExecutor<F>
where
    F: Fn(AgentConfig, Context, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionOutcome> + Send + 'static,
{
    fn execute<'a>(
        &'a self,
        agent: &'a AgentConfig,
        context: &'a Context,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, ExecutionOutcome> {
        Box::pin((self.f)(agent.clone(), context.clone(), cancel))
    }
}

/// Runs one agent invocation to a terminal [`AgentResult`].
#[derive(Clone)]
pub struct AgentRunner {
    executor: Arc<dyn AgentExecutor>,
}

impl AgentRunner {
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self { executor }
    }

    /// Run with a deadline of `agent.timeout` from now.
    pub async fn run(&self, agent: &AgentConfig, context: &Context) -> AgentResult {
        self.run_until(agent, context, deadline_after(agent.timeout))
            .await
    }

    /// Run against an explicit deadline.
    ///
    /// A false condition returns `Skipped` without calling the executor.
    /// When the deadline passes first the executor's cancellation token is
    /// triggered, the in-flight future is dropped, and the result is `TimedOut`.
    pub async fn run_until(
        &self,
        agent: &AgentConfig,
        context: &Context,
        deadline: Instant,
    ) -> AgentResult {
        if let Some(condition) = &agent.condition {
            if !condition.evaluate(context) {
                debug!(agent = %agent.name, condition = %condition, "condition false, skipping");
                return AgentResult::skipped(&agent.name, SkipReason::Condition);
            }
        }

        let started_at = Utc::now();
        let clock = StdInstant::now();
        let cancel = CancellationToken::new();
        debug!(agent = %agent.name, "agent running");

        let work = self.executor.execute(agent, context, cancel.clone());
        match tokio::time::timeout_at(deadline, work).await {
            Ok(Ok(output)) => {
                debug!(agent = %agent.name, elapsed_ms = clock.elapsed().as_millis() as u64, "agent succeeded");
                AgentResult::success(&agent.name, output, started_at)
            }
            Ok(Err(error)) => {
                warn!(agent = %agent.name, error = %error, "agent failed");
                AgentResult::failed(&agent.name, &error, started_at)
            }
            Err(_) => {
                cancel.cancel();
                let elapsed = clock.elapsed();
                warn!(agent = %agent.name, elapsed_ms = elapsed.as_millis() as u64, "agent timed out");
                AgentResult::timed_out(
                    &agent.name,
                    &format!("timed out after {:.3}s", elapsed.as_secs_f64()),
                    started_at,
                )
            }
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE))
        .unwrap_or_else(|| now + FAR_FUTURE)
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner").finish_non_exhaustive()
    }
}
