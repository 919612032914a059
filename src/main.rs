use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use cadence::config::Config;
use cadence::core::status::AgentResult;
use cadence::orchestration::{OrchestrationEvent, Orchestrator, ShellExecutor, StrategyResult};
use cadence::{
    get_strategy, AgentDag, AgentStatus, Context, DagBuilder, Error, ExecutionMode,
    OrchestrationResult, Result,
};

/// Cadence - dependency-aware orchestration of agent steps
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CADENCE_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter entirely")]
pub struct Cli {
    /// Enable debug logging (stderr)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate a config file and its dependency graph
    Validate {
        /// Config file (defaults to ~/.cadence/cadence.toml)
        config: Option<PathBuf>,
    },

    /// Print the execution plan (topological order and waves)
    Plan {
        /// Config file (defaults to ~/.cadence/cadence.toml)
        config: Option<PathBuf>,

        /// Output JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Execute every agent's command
    Run {
        /// Config file (defaults to ~/.cadence/cadence.toml)
        config: Option<PathBuf>,

        /// Run wave by wave: progressive or systematic
        #[arg(long, short = 's')]
        strategy: Option<String>,

        /// Override the configured mode: sequential, parallel or hybrid
        #[arg(long, short = 'm')]
        mode: Option<String>,

        /// Context entry for conditions and commands (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Output JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    cadence::log::init_with_debug(cli.debug);

    match dispatch(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run a subcommand; `Ok(false)` means it completed but the run failed.
fn dispatch(command: Command) -> Result<bool> {
    match command {
        Command::Validate { config } => run_validate(config),
        Command::Plan { config, json } => run_plan(config, json),
        Command::Run {
            config,
            strategy,
            mode,
            set,
            json,
        } => run_agents(config, strategy, mode, set, json),
    }
}

fn resolve_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => Config::default_path(),
    }
}

fn load(path: Option<PathBuf>) -> Result<(Config, AgentDag)> {
    let path = resolve_path(path)?;
    debug!(path = %path.display(), "loading config");
    let config = Config::load(&path)?;
    let dag = DagBuilder::from_config(&config).build()?;
    Ok((config, dag))
}

fn run_validate(path: Option<PathBuf>) -> Result<bool> {
    let (config, dag) = load(path)?;
    println!(
        "OK: {} agents, {} dependencies, {} waves (mode: {})",
        dag.len(),
        dag.dependency_count(),
        dag.wave_count(),
        config.orchestration.mode
    );
    Ok(true)
}

fn run_plan(path: Option<PathBuf>, json: bool) -> Result<bool> {
    let (_, dag) = load(path)?;

    if json {
        let planned = dag.waves();
        let topo = dag.topological_order();
        let waves: Vec<Vec<&str>> = planned
            .iter()
            .map(|w| w.iter().map(|a| a.name.as_str()).collect())
            .collect();
        let order: Vec<&str> = topo.iter().map(|a| a.name.as_str()).collect();
        let output = serde_json::json!({ "order": order, "waves": waves });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(true);
    }

    for (index, wave) in dag.waves().iter().enumerate() {
        println!("Wave {}:", index);
        for agent in wave {
            let deps = if agent.dependencies.is_empty() {
                String::new()
            } else {
                format!(" <- {}", agent.dependencies.join(", "))
            };
            let optional = if agent.required { "" } else { " (optional)" };
            println!("  {}{}{}", agent.name, optional, deps);
        }
    }
    Ok(true)
}

fn run_agents(
    path: Option<PathBuf>,
    strategy: Option<String>,
    mode: Option<String>,
    set: Vec<String>,
    json: bool,
) -> Result<bool> {
    let path = resolve_path(path)?;
    let config = Config::load(&path)?;
    let dag = DagBuilder::from_config(&config).build()?;
    let context = parse_context(&set)?;
    let strategy = strategy.as_deref().map(get_strategy).transpose()?;

    let mut orchestration = config.orchestration.clone();
    if let Some(mode) = mode {
        orchestration.mode = mode.parse::<ExecutionMode>()?;
    }

    let executor = ShellExecutor::new().with_working_dir(config_dir(&path));
    info!(config = %path.display(), agents = dag.len(), "starting run");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (tx, rx) = mpsc::channel(256);
        let printer = (!json).then(|| tokio::spawn(print_events(rx)));
        let orchestrator = Orchestrator::new(orchestration, Arc::new(executor)).with_events(tx);

        let outcome = match strategy {
            Some(strategy) => strategy
                .execute(&orchestrator, &dag, &context, None)
                .await
                .map(Outcome::Waves),
            None => orchestrator.execute(&dag, &context).await.map(Outcome::Run),
        };

        // Closing the channel ends the printer.
        drop(orchestrator);
        if let Some(printer) = printer {
            let _ = printer.await;
        }

        let outcome = outcome?;
        if json {
            println!("{}", outcome.to_json()?);
        } else {
            outcome.print_summary();
        }
        Ok(outcome.is_success())
    })
}

enum Outcome {
    Run(OrchestrationResult),
    Waves(StrategyResult),
}

impl Outcome {
    fn is_success(&self) -> bool {
        match self {
            Outcome::Run(r) => r.is_success(),
            Outcome::Waves(r) => r.is_success(),
        }
    }

    fn to_json(&self) -> Result<String> {
        Ok(match self {
            Outcome::Run(r) => serde_json::to_string_pretty(r)?,
            Outcome::Waves(r) => serde_json::to_string_pretty(r)?,
        })
    }

    fn print_summary(&self) {
        println!();
        match self {
            Outcome::Run(result) => {
                println!("  Run:     {}", result.run_id.short());
                println!("  Status:  {}", result.overall_status);
                if let Some(abort) = &result.abort_reason {
                    println!("  Aborted: {}", abort);
                }
                print_results(result.results.values());
            }
            Outcome::Waves(result) => {
                println!("  Strategy: {}", result.strategy);
                println!("  Waves:    {}/{}", result.waves.len(), result.planned_waves);
                println!("  Status:   {}", result.overall_status);
                if let Some(abort) = &result.abort_reason {
                    println!("  Stopped:  {}", abort);
                }
                for wave in &result.waves {
                    let gate = match wave.gate_passed {
                        Some(true) => " [gate passed]",
                        Some(false) => " [gate failed]",
                        None => "",
                    };
                    println!();
                    println!("  Wave {}{}", wave.index, gate);
                    print_results(wave.results.values());
                }
            }
        }
    }
}

fn print_results<'a>(results: impl Iterator<Item = &'a AgentResult>) {
    for result in results {
        let detail = match (&result.error, &result.skip_reason) {
            (Some(error), _) => format!(": {}", error),
            (None, Some(reason)) => format!(" ({})", reason),
            (None, None) => format!(" ({} ms)", result.duration_ms()),
        };
        println!(
            "    {} {:<20} {}{}",
            status_icon(result.status),
            result.agent_name,
            result.status,
            detail
        );
    }
}

async fn print_events(mut rx: mpsc::Receiver<OrchestrationEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            OrchestrationEvent::AgentDispatched { agent } => println!("  ▸ {}", agent),
            OrchestrationEvent::AgentFinished { agent, status } => {
                println!("  {} {} {}", status_icon(status), agent, status)
            }
            OrchestrationEvent::RunAborted { agent } => {
                println!("  ! required agent '{}' failed, aborting", agent)
            }
            OrchestrationEvent::RunComplete { .. } => {}
        }
    }
}

fn status_icon(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Success => "✓",
        AgentStatus::Failed | AgentStatus::TimedOut => "✗",
        AgentStatus::Skipped => "-",
        AgentStatus::Pending | AgentStatus::Running => "·",
    }
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type,
/// anything else is a string.
fn parse_context(pairs: &[String]) -> Result<Context> {
    let mut context = Context::new();
    for pair in pairs {
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            Error::InvalidArgument(format!("expected KEY=VALUE, got '{}'", pair))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidArgument(format!("empty key in '{}'", pair)));
        }
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.to_string(), value);
    }
    Ok(context)
}

/// Commands run relative to the directory holding the config file.
fn config_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
