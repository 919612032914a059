//! Core domain models for cadence orchestration.
//!
//! This module contains the agent DAG, the condition language that gates
//! agents, and the status/result types produced by a run.

pub mod condition;
pub mod dag;
pub mod status;

pub use condition::{Condition, Context};
pub use dag::{validate_dag_config, AgentDag, DagBuilder};
pub use status::{
    AbortReason, AgentResult, AgentStatus, OrchestrationResult, OverallStatus, RunId, SkipReason,
};
