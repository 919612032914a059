//! Agent statuses and run results.
//!
//! An agent moves through `Pending -> Running -> {Success, Failed, TimedOut}`,
//! or straight from `Pending` to `Skipped`. Terminal states are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new unique run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a single agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Not yet started.
    #[default]
    Pending,
    /// Unit of work in flight.
    Running,
    /// Finished within its deadline.
    Success,
    /// Finished with an error.
    Failed,
    /// Deadline elapsed before the work finished.
    TimedOut,
    /// Never executed.
    Skipped,
}

impl AgentStatus {
    /// Success, Failed, TimedOut and Skipped are terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::Pending | AgentStatus::Running)
    }

    /// Failed and TimedOut count as failures for aggregation.
    pub fn is_failure(&self) -> bool {
        matches!(self, AgentStatus::Failed | AgentStatus::TimedOut)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Pending => write!(f, "pending"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Success => write!(f, "success"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::TimedOut => write!(f, "timed_out"),
            AgentStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why an agent ended up `Skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    /// The agent's own condition evaluated to false.
    Condition,
    /// A dependency did not reach a satisfying state.
    DependencyNotSatisfied {
        /// The dependency that blocked this agent.
        dependency: String,
    },
    /// The run was aborted by a required agent failure before this agent started.
    Aborted {
        /// The required agent whose failure aborted the run.
        agent: String,
    },
}

impl SkipReason {
    /// Condition skips satisfy dependents; every other skip blocks them.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, SkipReason::Condition)
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Condition => write!(f, "condition not met"),
            SkipReason::DependencyNotSatisfied { dependency } => {
                write!(f, "dependency '{}' not satisfied", dependency)
            }
            SkipReason::Aborted { agent } => write!(f, "run aborted by '{}'", agent),
        }
    }
}

/// Outcome of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    /// Name of the agent.
    pub agent_name: String,
    /// Terminal status.
    pub status: AgentStatus,
    /// Opaque payload returned by the executor.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    /// Error text, present iff the status is a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set iff the status is `Skipped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Number of executions, including retries. Zero for skipped agents.
    pub attempts: u32,
    /// When the unit of work started (absent for skipped agents).
    pub started_at: Option<DateTime<Utc>>,
    /// When the result became terminal.
    pub finished_at: DateTime<Utc>,
}

impl AgentResult {
    pub fn success(name: &str, output: Value, started_at: DateTime<Utc>) -> Self {
        Self {
            agent_name: name.to_string(),
            status: AgentStatus::Success,
            output,
            error: None,
            skip_reason: None,
            attempts: 1,
            started_at: Some(started_at),
            finished_at: Utc::now(),
        }
    }

    pub fn failed(name: &str, error: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            agent_name: name.to_string(),
            status: AgentStatus::Failed,
            output: Value::Null,
            error: Some(error.to_string()),
            skip_reason: None,
            attempts: 1,
            started_at: Some(started_at),
            finished_at: Utc::now(),
        }
    }

    pub fn timed_out(name: &str, error: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            status: AgentStatus::TimedOut,
            ..Self::failed(name, error, started_at)
        }
    }

    pub fn skipped(name: &str, reason: SkipReason) -> Self {
        Self {
            agent_name: name.to_string(),
            status: AgentStatus::Skipped,
            output: Value::Null,
            error: None,
            skip_reason: Some(reason),
            attempts: 0,
            started_at: None,
            finished_at: Utc::now(),
        }
    }

    /// Whether dependents of this agent may run.
    ///
    /// `allow_failed` lets a failed agent count as satisfied; the scheduler
    /// only passes `true` for optional agents when configured to do so.
    pub fn satisfies_dependents(&self, allow_failed: bool) -> bool {
        match self.status {
            AgentStatus::Success => true,
            AgentStatus::Skipped => self
                .skip_reason
                .as_ref()
                .is_some_and(SkipReason::satisfies_dependents),
            AgentStatus::Failed | AgentStatus::TimedOut => allow_failed,
            AgentStatus::Pending | AgentStatus::Running => false,
        }
    }

    /// Execution time in milliseconds, zero when the agent never ran.
    pub fn duration_ms(&self) -> u64 {
        self.started_at
            .map(|s| (self.finished_at - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// Aggregate status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    Success,
    Failed,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallStatus::Success => write!(f, "success"),
            OverallStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The required agent failure that stopped a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    /// The required agent that failed.
    pub agent: String,
    /// Its terminal status (`Failed` or `TimedOut`).
    pub status: AgentStatus,
    /// The underlying error text.
    pub error: String,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "required agent '{}' {}: {}",
            self.agent, self.status, self.error
        )
    }
}

/// Results of a full orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub run_id: RunId,
    /// One entry per scheduled agent.
    pub results: BTreeMap<String, AgentResult>,
    pub overall_status: OverallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OrchestrationResult {
    pub fn new() -> Self {
        Self {
            run_id: RunId::new(),
            results: BTreeMap::new(),
            overall_status: OverallStatus::Success,
            abort_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Look up one agent's result.
    pub fn get(&self, name: &str) -> Option<&AgentResult> {
        self.results.get(name)
    }

    /// Status of one agent, `None` if it was never scheduled.
    pub fn status_of(&self, name: &str) -> Option<AgentStatus> {
        self.results.get(name).map(|r| r.status)
    }

    /// Number of agents that ended with the given status.
    pub fn count(&self, status: AgentStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    /// Names of agents that failed or timed out.
    pub fn failed_agents(&self) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.status.is_failure())
            .map(|r| r.agent_name.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.overall_status == OverallStatus::Success
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    /// Compute the overall status and stamp the finish time.
    ///
    /// The run succeeds iff every required agent (as reported by
    /// `is_required`) reached `Success` or was skipped by its own condition.
    pub fn finalize(&mut self, is_required: impl Fn(&str) -> bool) {
        let required_ok = self
            .results
            .values()
            .filter(|r| is_required(&r.agent_name))
            .all(|r| match r.status {
                AgentStatus::Success => true,
                AgentStatus::Skipped => r.skip_reason == Some(SkipReason::Condition),
                _ => false,
            });

        self.overall_status = if required_ok && self.abort_reason.is_none() {
            OverallStatus::Success
        } else {
            OverallStatus::Failed
        };
        self.finished_at = Some(Utc::now());
    }
}

impl Default for OrchestrationResult {
    fn default() -> Self {
        Self::new()
    }
}
