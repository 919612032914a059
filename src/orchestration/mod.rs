//! Orchestration layer: running agents, pooling them, and scheduling the DAG.
//!
//! - [`runner`]: one agent invocation under a deadline, behind the
//!   [`AgentExecutor`] seam.
//! - [`pool`]: bounded set of in-flight runs.
//! - [`scheduler`]: the [`Orchestrator`] that walks the DAG.
//! - [`strategy`]: wave-by-wave execution policies.
//! - [`shell`]: an executor that runs shell commands.

pub mod pool;
pub mod runner;
pub mod scheduler;
pub mod shell;
pub mod strategy;

pub use pool::WorkerPool;
pub use runner::{from_fn, AgentExecutor, AgentRunner, ExecutionOutcome, FnExecutor};
pub use scheduler::{OrchestrationEvent, Orchestrator};
pub use shell::ShellExecutor;
pub use strategy::{
    get_strategy, RequiredAgentsGate, StrategyAbort, StrategyResult, Task, ValidationGate,
    WaveReport, WaveStrategy,
};
