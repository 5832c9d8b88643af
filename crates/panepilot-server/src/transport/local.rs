//! tmux on this machine.

use super::{expect_success, run_bounded, TerminalTransport, DOUBLE_ENTER_GAP};
use crate::config::{expand_tilde_str, TmuxSettings};
use async_trait::async_trait;
use panepilot_core::{PilotError, PilotResult};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Name of the throwaway session used to bring a tmux server up.
const INIT_SESSION: &str = "panepilot-init";

/// Delay between creating a session and typing the launch command into it.
const LAUNCH_DELAY: Duration = Duration::from_millis(200);

/// Runs tmux against an explicit server socket.
pub struct LocalTmux {
    settings: TmuxSettings,
    timeout: Duration,
}

impl LocalTmux {
    pub fn new(settings: TmuxSettings, timeout: Duration) -> Self {
        Self { settings, timeout }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        if self.settings.verbose {
            // tmux -v writes its log files into the working directory.
            cmd.arg("-v").current_dir(&self.settings.log_dir);
        }
        cmd.arg("-S").arg(&self.settings.socket).args(args);
        cmd
    }

    async fn run(&self, args: &[&str]) -> PilotResult<String> {
        let what = format!("tmux {}", args.first().copied().unwrap_or_default());
        let output = run_bounded(&mut self.command(args), &what, self.timeout).await?;
        expect_success(output, &what)
    }

    /// Start a tmux server if its socket directory is missing (first use
    /// after boot). Also prepares the verbose log directory.
    pub async fn ensure_server(&self) -> PilotResult<()> {
        use std::os::unix::fs::PermissionsExt;

        if self.settings.verbose {
            tokio::fs::create_dir_all(&self.settings.log_dir).await?;
        }

        let Some(socket_dir) = self.settings.socket.parent() else {
            return Ok(());
        };
        if tokio::fs::try_exists(socket_dir).await.unwrap_or(false) {
            return Ok(());
        }

        tokio::fs::create_dir_all(socket_dir).await?;
        tokio::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700)).await?;

        self.run(&["new-session", "-d", "-s", INIT_SESSION])
            .await
            .map_err(|e| PilotError::Transport(format!("failed to start tmux server: {e}")))?;
        if let Err(e) = self.run(&["kill-session", "-t", INIT_SESSION]).await {
            debug!(error = %e, "could not remove init session");
        }
        info!(socket = %self.settings.socket.display(), "started tmux server");
        Ok(())
    }
}

#[async_trait]
impl TerminalTransport for LocalTmux {
    async fn session_exists(&self, name: &str) -> PilotResult<bool> {
        self.ensure_server().await?;
        let output = run_bounded(
            &mut self.command(&["has-session", "-t", name]),
            "tmux has-session",
            self.timeout,
        )
        .await?;
        Ok(output.status.success())
    }

    async fn create_session(&self, name: &str, cwd: &str, command: &str) -> PilotResult<()> {
        self.ensure_server().await?;
        self.run(&["new-session", "-d", "-s", name, "-c", cwd]).await?;

        if let Err(e) = self.run(&["set-option", "-t", name, "mouse", "on"]).await {
            debug!(session = %name, error = %e, "could not enable mouse mode");
        }

        tokio::time::sleep(LAUNCH_DELAY).await;
        self.run(&["send-keys", "-t", name, command, "C-m"]).await?;
        info!(session = %name, cwd = %cwd, "created tmux session");
        Ok(())
    }

    async fn send_literal_text(&self, name: &str, text: &str) -> PilotResult<()> {
        self.run(&["send-keys", "-t", name, "-l", text]).await.map(|_| ())
    }

    async fn send_submit(&self, name: &str) -> PilotResult<()> {
        self.run(&["send-keys", "-t", name, "C-m"]).await?;
        tokio::time::sleep(DOUBLE_ENTER_GAP).await;
        self.run(&["send-keys", "-t", name, "C-m"]).await.map(|_| ())
    }

    async fn send_keys(&self, name: &str, keys: &[&str]) -> PilotResult<()> {
        let mut args = vec!["send-keys", "-t", name];
        args.extend_from_slice(keys);
        self.run(&args).await.map(|_| ())
    }

    async fn capture_pane(&self, name: &str, lines: usize) -> PilotResult<String> {
        let start = format!("-{lines}");
        self.run(&["capture-pane", "-t", name, "-p", "-S", &start])
            .await
            .map_err(|e| PilotError::Transport(format!("failed to capture pane: {e}")))
    }

    async fn kill_session(&self, name: &str) -> PilotResult<()> {
        self.run(&["kill-session", "-t", name]).await.map(|_| ())
    }

    async fn prepare_directory(&self, path: &str) -> PilotResult<()> {
        tokio::fs::create_dir_all(expand_tilde_str(path)).await?;
        Ok(())
    }

    async fn stage_file(&self, local_path: &Path, remote_path: &str) -> PilotResult<()> {
        let target = expand_tilde_str(remote_path);
        if target != local_path {
            tokio::fs::copy(local_path, &target).await?;
        }
        Ok(())
    }
}
