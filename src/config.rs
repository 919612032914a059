//! Orchestration configuration.
//!
//! Raw documents (TOML files, JSON files, or an already-parsed
//! `serde_json::Value`) are deserialized into loosely typed specs, then
//! validated and merged with defaults into [`OrchestrationConfig`] and a list
//! of [`AgentConfig`]s. Everything is rejected here, before any scheduling.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::core::condition::Condition;
use crate::{Error, Result};

/// Default per-agent timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default worker pool size for parallel modes.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// How many ready agents may execute at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One agent at a time, in topological order with declaration-order tie-break.
    Sequential,
    /// Up to `max_concurrency` ready agents at once.
    #[default]
    Parallel,
    /// Like `Parallel`, but never dispatches past the lowest unfinished wave.
    Hybrid,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            "hybrid" => Ok(ExecutionMode::Hybrid),
            other => Err(Error::Config(format!(
                "unknown mode '{}' (expected sequential, parallel or hybrid)",
                other
            ))),
        }
    }
}

/// Values applied to agents that leave a field unspecified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(rename = "timeout_seconds", with = "duration_secs")]
    pub timeout: Duration,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub retries: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            required: true,
            condition: None,
            retries: 0,
        }
    }
}

/// Orchestration-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub mode: ExecutionMode,
    /// Worker pool size; ignored in `Sequential` mode.
    pub max_concurrency: usize,
    /// Let dependents of a failed optional agent run anyway.
    pub continue_on_optional_failure: bool,
    pub defaults: AgentDefaults,
}

impl OrchestrationConfig {
    /// Pool size actually used for dispatch.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency_for(self.mode)
    }

    /// Pool size for a run in `mode`, which may differ from the configured one.
    pub fn concurrency_for(&self, mode: ExecutionMode) -> usize {
        match mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel | ExecutionMode::Hybrid => self.max_concurrency.max(1),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_continue_on_optional_failure(mut self, allow: bool) -> Self {
        self.continue_on_optional_failure = allow;
        self
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        get_default_config()
    }
}

/// A fully resolved agent declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(rename = "depends_on")]
    pub dependencies: Vec<String>,
    pub required: bool,
    #[serde(rename = "timeout_seconds", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub retries: u32,
    /// Opaque to the orchestrator; consumed by executors that need it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl AgentConfig {
    /// Create a required agent with default timeout and no dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        let defaults = AgentDefaults::default();
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            required: defaults.required,
            timeout: defaults.timeout,
            condition: None,
            retries: defaults.retries,
            command: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    /// Mark the agent optional: its failure is recorded but never aborts the run.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// An agent as written in a document; unspecified fields come from defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: Option<String>,
    #[serde(default, alias = "dependencies")]
    pub depends_on: Vec<String>,
    pub required: Option<bool>,
    pub timeout_seconds: Option<f64>,
    pub condition: Option<String>,
    pub retries: Option<u32>,
    pub command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDefaults {
    timeout_seconds: Option<f64>,
    required: Option<bool>,
    condition: Option<String>,
    retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    mode: Option<String>,
    max_concurrency: Option<i64>,
    continue_on_optional_failure: Option<bool>,
    #[serde(default)]
    defaults: RawDefaults,
    agents: Option<Vec<AgentSpec>>,
}

/// A loaded configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub orchestration: OrchestrationConfig,
    pub agents: Vec<AgentConfig>,
}

impl Config {
    pub fn cadence_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".cadence"))
    }

    /// Location used by the CLI when no config path is given.
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::cadence_dir()?.join("cadence.toml"))
    }

    /// Load a TOML or JSON document from disk, chosen by file extension.
    pub fn load(path: &Path) -> Result<Self> {
        load_config(path)
    }

    /// Look up an agent by name.
    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let base = get_default_config();

        let mode = match raw.mode {
            Some(m) => m.parse()?,
            None => base.mode,
        };

        let max_concurrency = match raw.max_concurrency {
            Some(n) if n <= 0 => {
                return Err(Error::Config(format!(
                    "max_concurrency must be a positive integer, got {}",
                    n
                )));
            }
            Some(n) => n as usize,
            None => base.max_concurrency,
        };

        let defaults = AgentDefaults {
            timeout: match raw.defaults.timeout_seconds {
                Some(secs) => parse_timeout(secs, "defaults")?,
                None => base.defaults.timeout,
            },
            required: raw.defaults.required.unwrap_or(base.defaults.required),
            condition: raw
                .defaults
                .condition
                .as_deref()
                .map(Condition::parse)
                .transpose()?,
            retries: raw.defaults.retries.unwrap_or(base.defaults.retries),
        };

        let specs = raw
            .agents
            .ok_or_else(|| Error::Config("missing required field `agents`".to_string()))?;

        let mut seen = HashSet::new();
        let mut agents = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let agent = merge_with_defaults(spec, &defaults)
                .map_err(|e| Error::Config(format!("agent #{}: {}", i + 1, strip_prefix(e))))?;
            if !seen.insert(agent.name.clone()) {
                return Err(Error::Config(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
            agents.push(agent);
        }

        debug!(
            mode = %mode,
            max_concurrency,
            agents = agents.len(),
            "configuration loaded"
        );

        Ok(Self {
            orchestration: OrchestrationConfig {
                mode,
                max_concurrency,
                continue_on_optional_failure: raw
                    .continue_on_optional_failure
                    .unwrap_or(base.continue_on_optional_failure),
                defaults,
            },
            agents,
        })
    }
}

/// Default orchestration settings: parallel mode, default timeout, required agents.
pub fn get_default_config() -> OrchestrationConfig {
    OrchestrationConfig {
        mode: ExecutionMode::Parallel,
        max_concurrency: DEFAULT_MAX_CONCURRENCY,
        continue_on_optional_failure: false,
        defaults: AgentDefaults::default(),
    }
}

/// Resolve an agent spec against defaults without touching either input.
pub fn merge_with_defaults(spec: &AgentSpec, defaults: &AgentDefaults) -> Result<AgentConfig> {
    let name = spec
        .name
        .as_deref()
        .ok_or_else(|| Error::Config("missing required field `name`".to_string()))?
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(Error::Config("agent name must not be empty".to_string()));
    }

    let timeout = match spec.timeout_seconds {
        Some(secs) => parse_timeout(secs, &name)?,
        None => defaults.timeout,
    };

    let condition = match spec.condition.as_deref() {
        Some(expr) => Some(Condition::parse(expr).map_err(|e| {
            Error::Config(format!("agent '{}': {}", name, strip_prefix(e)))
        })?),
        None => defaults.condition.clone(),
    };

    let mut dependencies: Vec<String> = Vec::with_capacity(spec.depends_on.len());
    for dep in &spec.depends_on {
        let dep = dep.trim().to_string();
        if !dependencies.contains(&dep) {
            dependencies.push(dep);
        }
    }

    Ok(AgentConfig {
        name,
        dependencies,
        required: spec.required.unwrap_or(defaults.required),
        timeout,
        condition,
        retries: spec.retries.unwrap_or(defaults.retries),
        command: spec.command.clone(),
    })
}

/// Parse a configuration from an already-decoded key-value document.
pub fn load_config_from_dict(value: &serde_json::Value) -> Result<Config> {
    let raw = RawConfig::deserialize(value).map_err(|e| Error::Config(e.to_string()))?;
    Config::from_raw(raw)
}

/// Parse a TOML configuration document.
pub fn load_config_from_str(text: &str) -> Result<Config> {
    let raw: RawConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
    Config::from_raw(raw)
}

/// Load a configuration file. `.json` files are read as JSON, anything else as TOML.
pub fn load_config(path: &Path) -> Result<Config> {
    debug!(path = %path.display(), "loading configuration");
    let text = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        load_config_from_dict(&value)
    } else {
        load_config_from_str(&text)
    }
}

fn parse_timeout(secs: f64, owner: &str) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::Config(format!(
            "timeout_seconds for '{}' must be positive, got {}",
            owner, secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| {
        Error::Config(format!(
            "timeout_seconds for '{}' is out of range, got {}",
            owner, secs
        ))
    })
}

fn strip_prefix(err: Error) -> String {
    match err {
        Error::Config(msg) => msg,
        other => other.to_string(),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(serde::de::Error::custom("timeout must be positive"));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom("timeout is out of range"))
    }
}
