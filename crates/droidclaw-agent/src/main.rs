use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use droidclaw_agent::{dispatch, BackendBinding, CommandRouter};
use droidclaw_channel::{ChannelSettings, ReliableChannel};
use droidclaw_device::RecordingBackend;
use droidclaw_types::{AgentConfig, BackendKind, GoalSession};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// droidclaw -- device-resident remote-control agent.
#[derive(Parser, Debug)]
#[command(name = "droidclaw-agent", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the control server and serve commands until Ctrl-C
    Run {
        /// Path to the TOML configuration file
        #[arg(long, env = "DROIDCLAW_CONFIG")]
        config: Option<PathBuf>,

        /// Override the control server URL
        #[arg(long)]
        server_url: Option<String>,

        /// Bind an in-memory backend that logs every call
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Path to the TOML configuration file
        #[arg(long, env = "DROIDCLAW_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            server_url,
            dry_run,
        } => {
            let mut config = load_config(config)?;
            if let Some(url) = server_url {
                config.server.url = url;
                config.validate().context("invalid --server-url")?;
            }
            if dry_run {
                config.backend.kind = BackendKind::DryRun;
            }
            run(config).await
        }
        Commands::Config { config } => {
            let config = load_config(config)?;
            let text = toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{text}");
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AgentConfig> {
    AgentConfig::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to load default config".to_string(),
    })
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let settings = ChannelSettings::from_config(&config).context("invalid server settings")?;
    if config.server.token_env.is_some() && settings.token.is_none() {
        warn!(
            token_env = config.server.token_env.as_deref().unwrap_or(""),
            "bearer token variable is unset, connecting without authorization"
        );
    }

    let binding = BackendBinding::new();
    match config.backend.kind {
        BackendKind::DryRun => {
            info!("dry run: binding logging backend");
            binding.bind(Arc::new(RecordingBackend::logging_only()));
        }
        BackendKind::None => {
            info!("no device backend configured, actions will fail until one is bound");
        }
    }

    let (channel, inbound, supervisor) = ReliableChannel::spawn(settings);
    let router = CommandRouter::new(channel.clone(), binding, config.executor.clone());
    let goal_log = tokio::spawn(log_goal_changes(router.subscribe()));

    tokio::select! {
        _ = dispatch::run(&router, inbound, channel.subscribe_status()) => {
            warn!("dispatch loop ended unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("shutting down");
        }
    }

    channel.shutdown();
    supervisor.await.context("channel supervisor panicked")?;
    goal_log.abort();
    Ok(())
}

/// Stand-in presentation layer: log every goal session change.
async fn log_goal_changes(mut goal: watch::Receiver<GoalSession>) {
    while goal.changed().await.is_ok() {
        let session = goal.borrow_and_update().clone();
        info!(
            status = ?session.status,
            goal = %session.goal,
            session_id = session.session_id.as_deref().unwrap_or(""),
            steps = session.steps.len(),
            "goal session updated"
        );
    }
}
