//! Executor that runs an agent's `command` through a shell.
//!
//! Context entries are exported as `CADENCE_<KEY>` environment variables.
//! Stdout becomes the agent output (parsed as JSON when it is JSON, otherwise
//! kept as trimmed text); a non-zero exit is a failure carrying stderr.

use futures::future::BoxFuture;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::AgentConfig;
use crate::core::condition::Context;
use crate::orchestration::runner::{AgentExecutor, ExecutionOutcome};

const ENV_PREFIX: &str = "CADENCE_";

/// Runs `sh -c <command>` for each agent.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    working_dir: Option<PathBuf>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
        }
    }

    /// Use a different shell binary (must accept `-c`).
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    async fn run(
        &self,
        agent: &AgentConfig,
        context: &Context,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let script = agent
            .command
            .as_deref()
            .ok_or_else(|| format!("agent '{}' has no command", agent.name))?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .env(format!("{}AGENT", ENV_PREFIX), &agent.name);
        for (key, value) in context {
            cmd.env(env_key(key), env_value(value));
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(agent = %agent.name, command = %script, "spawning shell command");

        let output = tokio::select! {
            output = cmd.output() => output.map_err(|e| format!("failed to spawn '{}': {}", self.shell, e))?,
            _ = cancel.cancelled() => return Err("command cancelled".to_string()),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(if stderr.trim().is_empty() {
                format!(
                    "command exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            });
        }

        let text = stdout.trim();
        Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
    }
}

impl AgentExecutor for ShellExecutor {
    fn execute<'a>(
        &'a self,
        agent: &'a AgentConfig,
        context: &'a Context,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, ExecutionOutcome> {
        Box::pin(self.run(agent, context, cancel))
    }
}

/// `deploy.env` -> `CADENCE_DEPLOY_ENV`
fn env_key(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", ENV_PREFIX, suffix)
}

fn env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
