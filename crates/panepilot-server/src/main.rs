//! panepilotd: session state engine for terminal coding agents.
//!
//! Keeps agents alive inside tmux sessions (local or over ssh), infers
//! whether each one is idle or busy from its pane, and serves a JSON
//! control protocol on a Unix socket.

mod agent;
mod config;
mod dispatch;
mod history;
mod lifecycle;
mod notify;
mod registry;
mod server;
mod tasks;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use dispatch::Dispatcher;
use history::HistoryStore;
use lifecycle::LifecycleManager;
use notify::{ActivityNotifier, LogNotifier, TelegramNotifier};
use registry::SessionRegistry;
use server::ControlServer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use transport::local::LocalTmux;
use transport::router::Router;
use transport::TerminalTransport;

/// Bound on any single local tmux invocation.
const LOCAL_TMUX_TIMEOUT: Duration = Duration::from_secs(10);

/// panepilotd — agent session daemon
#[derive(Parser, Debug)]
#[command(name = "panepilotd", version, about = "Agent session daemon")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.panepilot/config.toml")]
    config: String,

    /// Control socket path
    #[arg(long)]
    socket: Option<String>,

    /// Session registry file
    #[arg(long)]
    registry: Option<String>,

    /// Conversation history directory
    #[arg(long)]
    history_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting panepilotd");

    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(
        Some(&config_path),
        CliOverrides {
            socket: cli.socket,
            registry: cli.registry,
            history_dir: cli.history_dir,
        },
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let local = LocalTmux::new(config.tmux.clone(), LOCAL_TMUX_TIMEOUT);
    if let Err(e) = local.ensure_server().await {
        // Sessions can still be created later; tmux starts its own server.
        warn!(error = %e, "could not prepare tmux server");
    }
    let local: Arc<dyn TerminalTransport> = Arc::new(local);
    let router = Router::with_ssh(local, config.remote.clone());

    let registry = Arc::new(SessionRegistry::new(config.registry_path.clone()));
    let history = match HistoryStore::open(config.history_dir.clone()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, dir = %config.history_dir.display(), "failed to open history");
            std::process::exit(1);
        }
    };

    let notifier: Arc<dyn ActivityNotifier> = match &config.telegram {
        Some(settings) => {
            info!(chat_id = settings.chat_id, "telegram notifications enabled");
            Arc::new(TelegramNotifier::new(settings))
        }
        None => Arc::new(LogNotifier),
    };

    let lifecycle = Arc::new(LifecycleManager::new(
        router,
        registry.clone(),
        config.agent.clone(),
        &config.timings,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        lifecycle,
        history,
        notifier,
        config.timings.clone(),
    ));
    let server = ControlServer::new(config.socket_path.clone(), dispatcher);

    let failed = tokio::select! {
        result = server.run() => match result {
            Ok(()) => false,
            Err(e) => {
                error!(error = %e, "server error");
                true
            }
        },
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            false
        }
    };

    server.shutdown().await;
    info!("panepilotd stopped");
    if failed {
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            ctrl_c.await.ok();
        }
    }
}
