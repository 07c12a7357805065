use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::Level;

use relay_backends::BackendRegistry;
use relay_core::agent::{AgentConfig, SandboxMode};
use relay_core::defaults::AgenticDefaults;
use relay_core::events::AgenticEvent;
use relay_core::session::SessionEndReason;
use relay_engine::{Orchestrator, SessionConfig};
use relay_server::{DashboardEventSink, ServerConfig};
use relay_store::Database;
use relay_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "relay", version, about = "Multi-agent @mention orchestration")]
struct Cli {
    /// Log info-level detail to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run agents on a prompt until they converge.
    Run(RunArgs),
    /// Serve the read API and live event stream.
    Dashboard(DashboardArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Agent as role:backend[:model]. Repeat for each agent.
    #[arg(short, long = "agent", value_name = "ROLE:BACKEND[:MODEL]", required = true, value_parser = AgentConfig::parse_roster_entry)]
    agents: Vec<AgentConfig>,

    /// Shared initial prompt.
    #[arg(short, long)]
    prompt: String,

    #[arg(long, default_value_t = AgenticDefaults::MAX_TURNS)]
    max_turns: u32,

    /// Session wall-clock limit in seconds.
    #[arg(long, value_name = "SECS", default_value_t = AgenticDefaults::TIMEOUT.as_secs())]
    timeout: u64,

    /// Working directory handed to every agent.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    #[arg(long, default_value_t = SandboxMode::ReadOnly)]
    sandbox: SandboxMode,

    /// Stream tokens from backends that support it.
    #[arg(long)]
    stream: bool,

    #[arg(long)]
    db: Option<PathBuf>,

    /// Forward events to a running dashboard, e.g. http://127.0.0.1:7777.
    #[arg(long, value_name = "URL")]
    dashboard: Option<String>,
}

#[derive(Args)]
struct DashboardArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 7777)]
    port: u16,

    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_telemetry(TelemetryConfig {
        log_level: if cli.verbose { Level::INFO } else { Level::WARN },
        json: cli.json_logs,
        ..Default::default()
    });

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Dashboard(args) => dashboard(args).await,
    }
}

fn open_db(path: Option<PathBuf>) -> anyhow::Result<Database> {
    let path = path.unwrap_or_else(relay_store::database::default_path);
    Database::open(&path).with_context(|| format!("opening database at {}", path.display()))
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let db = open_db(args.db)?;
    let registry = Arc::new(BackendRegistry::with_defaults());

    let mut orchestrator = Orchestrator::new(registry, db);
    let dashboard = args.dashboard.as_deref().map(|url| Arc::new(DashboardEventSink::start(url)));
    if let Some(sink) = &dashboard {
        orchestrator = orchestrator.with_sink(sink.clone());
    }

    let mut config = SessionConfig::new(args.prompt, args.agents)
        .with_max_turns(args.max_turns)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_repo_path(args.repo);
    config.sandbox = args.sandbox;
    config.streaming = args.stream;

    let session = orchestrator.run(config).context("starting session")?;
    let mut events = session.events()?;

    let stop = session.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("stopping after the current turn...");
            stop.cancel();
        }
    });

    while let Some(event) = events.next().await {
        print_event(&event);
    }
    let reason = session.wait().await;

    if let Some(sink) = dashboard {
        sink.close().await;
    }

    Ok(match reason? {
        SessionEndReason::Converged | SessionEndReason::MaxTurns | SessionEndReason::Timeout => {
            ExitCode::SUCCESS
        }
        SessionEndReason::Stopped => ExitCode::from(130),
        SessionEndReason::Error => ExitCode::FAILURE,
    })
}

async fn dashboard(args: DashboardArgs) -> anyhow::Result<ExitCode> {
    let db = open_db(args.db)?;
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        ..Default::default()
    };
    let handle = relay_server::start(config, db)
        .await
        .context("starting dashboard server")?;
    println!("relay dashboard listening on {}", handle.url());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    handle.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

fn print_event(event: &AgenticEvent) {
    match event {
        AgenticEvent::SessionStart {
            session_id, agents, ..
        } => {
            let roster = agents
                .iter()
                .map(|a| format!("{} ({})", a.name, a.backend))
                .collect::<Vec<_>>()
                .join(", ");
            println!("session {session_id} started: {roster}");
        }
        AgenticEvent::Message {
            from,
            to,
            content,
            turn,
            ..
        } => {
            println!("[{turn}] {from} -> {to}:");
            for line in content.lines() {
                println!("    {line}");
            }
        }
        AgenticEvent::AgentStatus { agent, status, .. } => {
            println!("    {agent} is {status}");
        }
        AgenticEvent::TurnComplete {
            turn, pending_count, ..
        } => {
            println!("--- turn {turn} complete, {pending_count} pending");
        }
        AgenticEvent::Guardrail { guard, detail, .. } => {
            println!("guardrail {guard}: {detail}");
        }
        AgenticEvent::Error { agent, error, .. } => match agent {
            Some(agent) => eprintln!("error from {agent}: {error}"),
            None => eprintln!("error: {error}"),
        },
        AgenticEvent::SessionEnd {
            reason,
            turn,
            elapsed,
            ..
        } => {
            println!(
                "session ended: {reason} after {turn} turns ({:.1}s)",
                *elapsed as f64 / 1000.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_parse() {
        let cli = Cli::try_parse_from([
            "relay",
            "run",
            "--agent",
            "security:claude",
            "--agent",
            "perf:ollama:llama3",
            "--prompt",
            "Review auth.py",
            "--max-turns",
            "5",
            "--sandbox",
            "workspace-write",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.agents.len(), 2);
        assert_eq!(args.agents[1].model.as_deref(), Some("llama3"));
        assert_eq!(args.max_turns, 5);
        assert_eq!(args.timeout, 900);
        assert_eq!(args.sandbox, SandboxMode::WorkspaceWrite);
    }

    #[test]
    fn run_requires_an_agent() {
        assert!(Cli::try_parse_from(["relay", "run", "--prompt", "hi"]).is_err());
        assert!(Cli::try_parse_from(["relay", "run", "--agent", "nobackend", "--prompt", "hi"]).is_err());
    }

    #[test]
    fn dashboard_defaults() {
        let cli = Cli::try_parse_from(["relay", "dashboard"]).unwrap();
        let Command::Dashboard(args) = cli.command else {
            panic!("expected dashboard");
        };
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 7777);
    }
}
