//! Wave strategies: execution policies layered over the DAG's topological
//! levels.
//!
//! Progressive runs one wave at a time and consults a validation gate before
//! moving on. Systematic precomputes the whole plan and runs every wave back
//! to back without gating.

use petgraph::graph::NodeIndex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::{AgentConfig, ExecutionMode};
use crate::core::condition::Context;
use crate::core::dag::AgentDag;
use crate::core::status::{AbortReason, AgentResult, OverallStatus};
use crate::error::{Error, Result};
use crate::orchestration::scheduler::{OrchestrationEvent, Orchestrator};

/// An agent scheduled into a wave.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub agent: AgentConfig,
    pub wave: usize,
}

/// What happened in one executed wave.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveReport {
    pub index: usize,
    pub tasks: Vec<Task>,
    pub results: BTreeMap<String, AgentResult>,
    /// Gate verdict; `None` when the strategy does not gate.
    pub gate_passed: Option<bool>,
}

impl WaveReport {
    /// Whether a required agent in this wave failed or timed out.
    pub fn required_failed(&self) -> bool {
        self.tasks.iter().any(|task| {
            task.agent.required
                && self
                    .results
                    .get(&task.agent.name)
                    .is_some_and(|r| r.status.is_failure())
        })
    }
}

/// Why a strategy stopped before its last wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StrategyAbort {
    /// The validation gate rejected a wave.
    GateFailed { wave: usize },
    /// A required agent failed inside a wave.
    RequiredAgentFailed { reason: AbortReason },
}

impl std::fmt::Display for StrategyAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyAbort::GateFailed { wave } => {
                write!(f, "validation gate failed on wave {}", wave)
            }
            StrategyAbort::RequiredAgentFailed { reason } => write!(f, "{}", reason),
        }
    }
}

/// Outcome of a strategy run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyResult {
    pub strategy: String,
    /// Executed waves only, in order.
    pub waves: Vec<WaveReport>,
    /// Number of waves in the plan.
    pub planned_waves: usize,
    pub overall_status: OverallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<StrategyAbort>,
}

impl StrategyResult {
    pub fn is_success(&self) -> bool {
        self.overall_status == OverallStatus::Success
    }

    /// Whether every planned wave was executed.
    pub fn is_complete(&self) -> bool {
        self.waves.len() == self.planned_waves
    }

    /// Look up one agent's result across all executed waves.
    pub fn result(&self, name: &str) -> Option<&AgentResult> {
        self.waves.iter().find_map(|w| w.results.get(name))
    }

    /// Results of all executed waves, flattened.
    pub fn all_results(&self) -> BTreeMap<String, AgentResult> {
        self.waves
            .iter()
            .flat_map(|w| w.results.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }
}

/// Decides whether a progressive run may continue past a wave.
pub trait ValidationGate: Send + Sync {
    fn validate(&self, wave: &WaveReport) -> bool;
}

impl<F> ValidationGate for F
where
    F: Fn(&WaveReport) -> bool + Send + Sync,
{
    fn validate(&self, wave: &WaveReport) -> bool {
        self(wave)
    }
}

/// Passes a wave iff none of its required agents failed or timed out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredAgentsGate;

impl ValidationGate for RequiredAgentsGate {
    fn validate(&self, wave: &WaveReport) -> bool {
        !wave.required_failed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStrategy {
    /// One wave at a time, gated.
    Progressive,
    /// Whole plan up front, no gating.
    Systematic,
}

/// Resolve a strategy by name (case-insensitive).
///
/// # Errors
///
/// `Error::InvalidArgument` naming the valid choices for anything else.
pub fn get_strategy(name: &str) -> Result<WaveStrategy> {
    match name.trim().to_ascii_lowercase().as_str() {
        "progressive" => Ok(WaveStrategy::Progressive),
        "systematic" => Ok(WaveStrategy::Systematic),
        other => Err(Error::InvalidArgument(format!(
            "unknown strategy '{}' (valid: progressive, systematic)",
            other
        ))),
    }
}

impl FromStr for WaveStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        get_strategy(s)
    }
}

impl std::fmt::Display for WaveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl WaveStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            WaveStrategy::Progressive => "progressive",
            WaveStrategy::Systematic => "systematic",
        }
    }

    /// The wave plan: every agent as a [`Task`], grouped by wave.
    pub fn plan(&self, dag: &AgentDag) -> Vec<Vec<Task>> {
        dag.wave_indices()
            .iter()
            .enumerate()
            .map(|(wave, nodes)| tasks_for(dag, nodes, wave))
            .collect()
    }

    /// Run the DAG wave by wave.
    ///
    /// `gate` only applies to the progressive strategy; when absent the
    /// [`RequiredAgentsGate`] is used. Both strategies stop after a wave in
    /// which a required agent failed.
    pub async fn execute(
        &self,
        orchestrator: &Orchestrator,
        dag: &AgentDag,
        context: &Context,
        gate: Option<&dyn ValidationGate>,
    ) -> Result<StrategyResult> {
        let plan = dag.wave_indices();
        let mode = match self {
            WaveStrategy::Progressive => ExecutionMode::Parallel,
            WaveStrategy::Systematic => orchestrator.config().mode,
        };
        let gate: &dyn ValidationGate = gate.unwrap_or(&RequiredAgentsGate);

        info!(
            strategy = self.name(),
            waves = plan.len(),
            agents = dag.len(),
            "wave strategy started"
        );

        let mut completed: BTreeMap<String, AgentResult> = BTreeMap::new();
        let mut waves = Vec::with_capacity(plan.len());
        let mut abort_reason = None;

        for (index, nodes) in plan.iter().enumerate() {
            let outcome = orchestrator
                .execute_scope(dag, nodes, &completed, context, mode)
                .await?;
            completed.extend(outcome.results.iter().map(|(k, v)| (k.clone(), v.clone())));

            let mut report = WaveReport {
                index,
                tasks: tasks_for(dag, nodes, index),
                results: outcome.results,
                gate_passed: None,
            };

            if let Some(reason) = outcome.abort {
                warn!(
                    strategy = self.name(),
                    wave = index,
                    agent = %reason.agent,
                    "required agent failed, stopping"
                );
                if *self == WaveStrategy::Progressive {
                    report.gate_passed = Some(gate.validate(&report));
                }
                waves.push(report);
                abort_reason = Some(StrategyAbort::RequiredAgentFailed { reason });
                break;
            }

            if *self == WaveStrategy::Progressive {
                let passed = gate.validate(&report);
                report.gate_passed = Some(passed);
                waves.push(report);
                if !passed {
                    warn!(wave = index, "validation gate failed, stopping");
                    abort_reason = Some(StrategyAbort::GateFailed { wave: index });
                    break;
                }
                info!(wave = index, "wave passed validation");
            } else {
                waves.push(report);
            }
        }

        let required_ok = completed.values().all(|r| {
            !dag.get(&r.agent_name).is_some_and(|a| a.required) || r.satisfies_dependents(false)
        });
        let overall_status = if abort_reason.is_none() && required_ok {
            OverallStatus::Success
        } else {
            OverallStatus::Failed
        };

        info!(
            strategy = self.name(),
            executed = waves.len(),
            planned = plan.len(),
            status = %overall_status,
            "wave strategy finished"
        );
        orchestrator.emit(OrchestrationEvent::RunComplete {
            status: overall_status,
        });

        Ok(StrategyResult {
            strategy: self.name().to_string(),
            waves,
            planned_waves: plan.len(),
            overall_status,
            abort_reason,
        })
    }
}

fn tasks_for(dag: &AgentDag, nodes: &[NodeIndex], wave: usize) -> Vec<Task> {
    nodes
        .iter()
        .map(|&node| Task {
            agent: dag.agent(node).clone(),
            wave,
        })
        .collect()
}
