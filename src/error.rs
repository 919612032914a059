use thiserror::Error;

use crate::core::status::OrchestrationResult;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Required agent '{agent}' failed: {cause}")]
    RequiredAgentFailed {
        agent: String,
        cause: String,
        result: Box<OrchestrationResult>,
    },

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Worker pool is full (max: {max})")]
    PoolFull { max: usize },

    #[error("No home directory")]
    NoHomeDir,
}

impl Error {
    /// The partial run attached to a required-agent failure, if any.
    pub fn partial_result(&self) -> Option<&OrchestrationResult> {
        match self {
            Error::RequiredAgentFailed { result, .. } => Some(result),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
