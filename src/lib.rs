//! cadence: dependency-aware orchestration of agent steps.
//!
//! A declarative set of named agents with dependencies is validated into a
//! DAG and executed in dependency order with bounded concurrency, per-agent
//! timeouts, conditions, and required-vs-optional failure policy.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;

pub use config::{
    get_default_config, load_config, load_config_from_dict, load_config_from_str,
    merge_with_defaults, AgentConfig, AgentDefaults, AgentSpec, Config, ExecutionMode,
    OrchestrationConfig,
};
pub use core::{
    validate_dag_config, AbortReason, AgentDag, AgentResult, AgentStatus, Condition, Context,
    DagBuilder, OrchestrationResult, OverallStatus, RunId, SkipReason,
};
pub use error::{Error, Result};
pub use orchestration::{
    from_fn, get_strategy, AgentExecutor, OrchestrationEvent, Orchestrator, ShellExecutor,
    StrategyResult, ValidationGate, WaveStrategy,
};
