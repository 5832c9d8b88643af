//! panepilot — control-socket client for panepilotd.
//!
//! Lists sessions, sends prompts to agents (blocking or not), reads their
//! conversation history, answers their pick-one questions and follows
//! status changes.

mod client;
mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::Context;
use std::path::PathBuf;
use tracing::error;

/// panepilot — talk to agents managed by panepilotd
#[derive(Parser, Debug)]
#[command(name = "panepilot", version, about = "Talk to agents managed by panepilotd")]
struct Cli {
    /// Control socket path
    #[arg(long, global = true)]
    socket: Option<String>,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Agent label recorded with ask/send
    #[arg(long, global = true)]
    from: Option<String>,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Check that the daemon is up
    Ping,

    /// List sessions with live status
    Sessions,

    /// Send a prompt and wait for the reply
    Ask { session: String, text: String },

    /// Send a prompt without waiting
    Send { session: String, text: String },

    /// Restart the agent, continuing its last conversation
    Continue { session: String },

    /// Kill the session and hide it from listings
    Kill { session: String },

    /// Show conversation history
    History {
        session: String,
        /// Only records with a larger id
        #[arg(long)]
        after: Option<i64>,
        /// Newest N records
        #[arg(long)]
        limit: Option<usize>,
        /// Only records from this sender
        #[arg(long, value_parser = ["human", "assistant", "claude", "api"])]
        sender: Option<String>,
    },

    /// Print the session's pane
    Screenshot {
        session: String,
        #[arg(long)]
        lines: Option<usize>,
    },

    /// Show the agent's pending question
    Questions { session: String },

    /// Pick an option (0-based) in the pending question
    Answer {
        session: String,
        option: usize,
        #[arg(long, default_value_t = 0)]
        question: usize,
    },

    /// Deliver a message as the operator, with crash recovery
    Forward {
        session: String,
        text: String,
        /// File to attach
        #[arg(long)]
        attach: Option<PathBuf>,
    },

    /// Follow status changes (all sessions when none given)
    Subscribe { sessions: Vec<String> },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("panepilot=debug,panepilot_cli=debug,panepilot_core=debug")
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("panepilot=warn,panepilot_cli=warn")
            .with_target(false)
            .init();
    }

    let config_path = cli
        .config
        .as_deref()
        .map(config::expand_tilde)
        .unwrap_or_else(config::default_path);
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("panepilot: {e:#}");
            std::process::exit(1);
        }
    };

    let ctx = Context {
        socket: cfg.socket_path(cli.socket.as_deref()),
        from: cfg.from_label(cli.from.as_deref()),
        json: cli.json,
    };

    let result = match cli.command {
        Command::Ping => commands::status::run_ping(&ctx).await,
        Command::Sessions => commands::status::run_sessions(&ctx).await,
        Command::Ask { session, text } => commands::message::run_ask(&ctx, &session, &text).await,
        Command::Send { session, text } => {
            commands::message::run_send(&ctx, &session, &text).await
        }
        Command::Continue { session } => commands::session::run_continue(&ctx, &session).await,
        Command::Kill { session } => commands::session::run_kill(&ctx, &session).await,
        Command::History {
            session,
            after,
            limit,
            sender,
        } => commands::history::run(&ctx, &session, after, limit, sender.as_deref()).await,
        Command::Screenshot { session, lines } => {
            commands::session::run_screenshot(&ctx, &session, lines).await
        }
        Command::Questions { session } => commands::session::run_questions(&ctx, &session).await,
        Command::Answer {
            session,
            option,
            question,
        } => commands::session::run_answer(&ctx, &session, option, question).await,
        Command::Forward {
            session,
            text,
            attach,
        } => commands::message::run_forward(&ctx, &session, &text, attach.as_deref()).await,
        Command::Subscribe { sessions } => commands::subscribe::run(&ctx, sessions).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("panepilot: {e:#}");
        std::process::exit(1);
    }
}
