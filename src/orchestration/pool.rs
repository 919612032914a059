//! Bounded worker pool for agent runs.
//!
//! The `WorkerPool` owns the in-flight runner tasks, enforces the
//! concurrency limit, and hands finished results back one at a time to the
//! single scheduling loop that owns all bookkeeping.

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::{Id, JoinSet};
use tracing::error;

use crate::core::status::AgentResult;
use crate::error::{Error, Result};

/// Runs agent futures with at most `max_concurrent` in flight.
///
/// # Example
///
/// ```ignore
/// let mut pool = WorkerPool::new(2);
/// pool.spawn("lint", async move { runner.run(&agent, &ctx).await })?;
/// while let Some(result) = pool.join_next().await {
///     println!("{} -> {}", result.agent_name, result.status);
/// }
/// ```
pub struct WorkerPool {
    /// In-flight runner tasks.
    tasks: JoinSet<AgentResult>,
    /// Agent name per task, so a panicking runner still yields a named result.
    running: HashMap<Id, String>,
    /// Maximum number of concurrent runs allowed.
    max_concurrent: usize,
}

impl WorkerPool {
    /// Create a pool; a capacity of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            running: HashMap::new(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_concurrent
    }

    /// Check if another run can be started.
    pub fn has_capacity(&self) -> bool {
        self.running.len() < self.max_concurrent
    }

    /// Number of runs currently in flight.
    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }

    /// Names of agents currently in flight.
    pub fn running_agents(&self) -> Vec<&str> {
        self.running.values().map(String::as_str).collect()
    }

    /// Start a run for `agent`.
    ///
    /// # Errors
    ///
    /// Returns `Error::PoolFull` if the pool is at capacity.
    pub fn spawn<F>(&mut self, agent: &str, work: F) -> Result<()>
    where
        F: Future<Output = AgentResult> + Send + 'static,
    {
        if !self.has_capacity() {
            return Err(Error::PoolFull {
                max: self.max_concurrent,
            });
        }

        let handle = self.tasks.spawn(work);
        self.running.insert(handle.id(), agent.to_string());
        Ok(())
    }

    /// Wait for the next run to finish. `None` once the pool is empty.
    ///
    /// A runner task that panics or is aborted is reported as a `Failed`
    /// result for its agent.
    pub async fn join_next(&mut self) -> Option<AgentResult> {
        match self.tasks.join_next_with_id().await? {
            Ok((id, result)) => {
                self.running.remove(&id);
                Some(result)
            }
            Err(join_err) => {
                let agent = self.running.remove(&join_err.id()).unwrap_or_default();
                error!(agent = %agent, error = %join_err, "runner task did not complete");
                Some(AgentResult::failed(
                    &agent,
                    &format!("runner task failed: {}", join_err),
                    Utc::now(),
                ))
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("active", &self.active_count())
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}
