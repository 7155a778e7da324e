use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod actions;
mod bridge;
mod config;
#[cfg(unix)]
mod daemon;
mod dedup;
mod dispatch;
mod notify;
mod telegram;
#[cfg(test)]
mod testing;
mod tmux;

use bridge::{Bridge, BridgeSettings};
use config::Config;
use telegram::{HttpBotApi, TelegramTransport};
use tmux::TmuxClient;

/// Drive a tmux-hosted coding agent from Telegram
#[derive(Debug, Parser)]
#[command(name = "couch-relay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay in the foreground
    Run {
        /// Log to the relay's log file instead of stdout
        #[arg(long)]
        daemon: bool,
    },
    /// Start the relay in the background
    Start,
    /// Stop the background relay
    Stop,
    /// Report whether the background relay is running
    Status,
    /// Send the agent's last reply to the chat (for lifecycle hooks)
    Notify {
        #[arg(default_value = "completed")]
        kind: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run { daemon: false }) {
        Command::Run { daemon } => {
            let config = Config::load()?;
            init_logging(&config, daemon)?;
            let result = run_bridge(config).await;
            #[cfg(unix)]
            if daemon {
                daemon::release_pid_file();
            }
            result?;
        }
        Command::Notify { kind } => return Ok(notify::run_hook(&kind).await),
        control => daemon_control(control)?,
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(unix)]
fn daemon_control(command: Command) -> Result<()> {
    use daemon::DaemonState;

    match command {
        Command::Start => {
            Config::load()?.validate()?;
            let pid = daemon::start()?;
            println!("couch-relay started (pid {})", pid);
            println!("Logs: {}", config::log_path().display());
        }
        Command::Stop => match daemon::stop()? {
            Some(pid) => println!("couch-relay stopped (pid {})", pid),
            None => println!("couch-relay is not running"),
        },
        Command::Status => match daemon::state() {
            DaemonState::Running(pid) => println!("couch-relay is running (pid {})", pid),
            DaemonState::Stale(pid) => {
                println!("couch-relay is not running (stale pid file for {})", pid)
            }
            DaemonState::Stopped => println!("couch-relay is not running"),
        },
        Command::Run { .. } | Command::Notify { .. } => {}
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemon_control(_command: Command) -> Result<()> {
    anyhow::bail!("background mode needs a Unix host; use `couch-relay run` instead")
}

fn init_logging(config: &Config, daemon: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let under_systemd =
        std::env::var_os("INVOCATION_ID").is_some() || std::env::var_os("JOURNAL_STREAM").is_some();

    if daemon && !under_systemd {
        let path = config::log_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn run_bridge(config: Config) -> Result<()> {
    config.validate()?;

    let terminal = Arc::new(TmuxClient::new(config.tmux_session.clone()));
    if !terminal.session_exists().await {
        warn!(
            "tmux session '{}' not found yet; commands will fail until it exists",
            terminal.session()
        );
    }

    let api = HttpBotApi::new(&config.bot_token).context("Failed to build HTTP client")?;
    let chat = Arc::new(TelegramTransport::new(api, config.chat_id, config.poll_backoff()));

    info!(
        "couch-relay starting (session={}, log_level={})",
        config.tmux_session, config.log_level
    );
    Bridge::new(terminal, chat, BridgeSettings::from_config(&config))
        .run(shutdown_signal())
        .await
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
