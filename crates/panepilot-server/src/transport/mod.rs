//! Terminal transport: one interface over tmux, executed locally or over ssh.
//!
//! Business logic never branches on local vs remote. It asks the
//! [`router::Router`] for a [`TerminalHandle`] and drives that.

pub mod local;
pub mod remote;
pub mod router;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use panepilot_core::{PilotError, PilotResult};
use std::path::Path;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Delay between typing text and pressing Enter, so the agent has taken
/// the whole paste before the submit arrives.
pub const SUBMIT_SETTLE: Duration = Duration::from_secs(2);

/// Gap between the two submit keystrokes.
pub const DOUBLE_ENTER_GAP: Duration = Duration::from_millis(50);

/// Operations on named terminal-multiplexer sessions.
#[async_trait]
pub trait TerminalTransport: Send + Sync {
    /// Whether the named session exists. A clean "no" is `Ok(false)`;
    /// failure to ask at all is an error.
    async fn session_exists(&self, name: &str) -> PilotResult<bool>;

    /// Create a detached session in `cwd` and run `command` in its shell.
    async fn create_session(&self, name: &str, cwd: &str, command: &str) -> PilotResult<()>;

    /// Type `text` literally, without interpreting key names.
    async fn send_literal_text(&self, name: &str, text: &str) -> PilotResult<()>;

    /// Press Enter twice; the agent's input box needs both.
    async fn send_submit(&self, name: &str) -> PilotResult<()>;

    /// Send tmux key names (`Down`, `Enter`, `C-m`, or a word typed as-is).
    async fn send_keys(&self, name: &str, keys: &[&str]) -> PilotResult<()>;

    /// The last `lines` lines of the pane, trailing newlines trimmed.
    async fn capture_pane(&self, name: &str, lines: usize) -> PilotResult<String>;

    async fn kill_session(&self, name: &str) -> PilotResult<()>;

    /// Make sure a working directory exists before a session starts in it.
    async fn prepare_directory(&self, path: &str) -> PilotResult<()>;

    /// Make a local file available at `remote_path` on the session's machine.
    async fn stage_file(&self, local_path: &Path, remote_path: &str) -> PilotResult<()>;

    /// Type `text`, wait for it to settle, then submit it.
    async fn deliver(&self, name: &str, text: &str) -> PilotResult<()> {
        self.send_literal_text(name, text).await?;
        tokio::time::sleep(SUBMIT_SETTLE).await;
        self.send_submit(name).await
    }
}

/// A live capability over one named session, re-resolved per request.
#[derive(Clone)]
pub struct TerminalHandle {
    transport: Arc<dyn TerminalTransport>,
    tmux_name: String,
}

impl TerminalHandle {
    pub fn new(transport: Arc<dyn TerminalTransport>, tmux_name: String) -> Self {
        Self {
            transport,
            tmux_name,
        }
    }

    pub fn tmux_name(&self) -> &str {
        &self.tmux_name
    }

    pub async fn exists(&self) -> PilotResult<bool> {
        self.transport.session_exists(&self.tmux_name).await
    }

    pub async fn create(&self, cwd: &str, command: &str) -> PilotResult<()> {
        self.transport.prepare_directory(cwd).await?;
        self.transport
            .create_session(&self.tmux_name, cwd, command)
            .await
    }

    pub async fn capture(&self, lines: usize) -> PilotResult<String> {
        self.transport.capture_pane(&self.tmux_name, lines).await
    }

    pub async fn deliver(&self, text: &str) -> PilotResult<()> {
        self.transport.deliver(&self.tmux_name, text).await
    }

    pub async fn send_keys(&self, keys: &[&str]) -> PilotResult<()> {
        self.transport.send_keys(&self.tmux_name, keys).await
    }

    pub async fn kill(&self) -> PilotResult<()> {
        self.transport.kill_session(&self.tmux_name).await
    }

    pub async fn stage_file(&self, local_path: &Path, remote_path: &str) -> PilotResult<()> {
        self.transport.stage_file(local_path, remote_path).await
    }
}

impl std::fmt::Debug for TerminalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalHandle")
            .field("tmux_name", &self.tmux_name)
            .finish()
    }
}

/// Run a prepared command with a deadline. The child is killed if the
/// deadline passes.
pub(crate) async fn run_bounded(
    cmd: &mut Command,
    what: &str,
    limit: Duration,
) -> PilotResult<Output> {
    cmd.kill_on_drop(true);
    tokio::time::timeout(limit, cmd.output())
        .await
        .map_err(|_| PilotError::Transport(format!("{what} timed out after {limit:?}")))?
        .map_err(|e| PilotError::Transport(format!("{what} failed to run: {e}")))
}

/// Map a finished command to its trimmed stdout, or a transport error
/// carrying stderr.
pub(crate) fn expect_success(output: Output, what: &str) -> PilotResult<String> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end_matches('\n')
            .to_string());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    Err(PilotError::Transport(if stderr.is_empty() {
        format!("{what} failed: {}", output.status)
    } else {
        format!("{what} failed: {stderr}")
    }))
}

/// Whether a creation error means the session already exists.
pub fn is_duplicate_session(err: &PilotError) -> bool {
    err.to_string().contains("duplicate session")
}
