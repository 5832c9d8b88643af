//! tmux on another machine, driven through non-interactive ssh.
//!
//! Every operation is one `ssh` invocation running a login shell, so the
//! remote user's PATH (nvm, homebrew, …) applies to tmux and the agent.

use super::{expect_success, run_bounded, TerminalTransport};
use crate::config::RemoteSettings;
use async_trait::async_trait;
use base64::Engine;
use panepilot_core::{PilotError, PilotResult};
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Captures up to this many lines are state probes and get the short deadline.
const PROBE_WINDOW: usize = 30;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// tmux behind `ssh ADDRESS`.
pub struct RemoteShell {
    address: String,
    settings: RemoteSettings,
}

impl RemoteShell {
    pub fn new(address: impl Into<String>, settings: RemoteSettings) -> Self {
        Self {
            address: address.into(),
            settings,
        }
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_secs),
        ]
    }

    async fn output(&self, script: &str, limit: Duration) -> PilotResult<Output> {
        let mut cmd = Command::new(&self.settings.ssh);
        cmd.args(self.common_options())
            .arg(&self.address)
            .arg(format!("bash -i -l -c {}", shell_quote(script)));

        debug!(address = %self.address, script = %script, "ssh");
        run_bounded(&mut cmd, &self.what(), limit).await
    }

    async fn run(&self, script: &str, limit: Duration) -> PilotResult<String> {
        let output = self.output(script, limit).await?;
        expect_success(output, &self.what()).map(|s| s.trim().to_string())
    }

    fn what(&self) -> String {
        format!("ssh {}", self.address)
    }

    async fn run_default(&self, script: &str) -> PilotResult<String> {
        self.run(script, self.settings.command_timeout).await
    }
}

#[async_trait]
impl TerminalTransport for RemoteShell {
    async fn session_exists(&self, name: &str) -> PilotResult<bool> {
        let script = format!("tmux has-session -t {}", shell_quote(name));
        let output = self.output(&script, self.settings.command_timeout).await?;
        exists_from_output(output, &self.what())
    }

    async fn create_session(&self, name: &str, cwd: &str, command: &str) -> PilotResult<()> {
        let quoted = shell_quote(name);
        self.run_default(&format!(
            "tmux new-session -d -s {quoted} -c {}",
            shell_quote(cwd)
        ))
        .await
        .map_err(|e| PilotError::Transport(format!("failed to create tmux session: {e}")))?;

        if let Err(e) = self
            .run_default(&format!("tmux set-option -t {quoted} mouse on"))
            .await
        {
            debug!(session = %name, error = %e, "could not enable mouse mode");
        }

        self.run_default(&format!(
            "tmux send-keys -t {quoted} {} C-m",
            shell_quote(command)
        ))
        .await?;
        info!(address = %self.address, session = %name, cwd = %cwd, "created remote tmux session");
        Ok(())
    }

    async fn send_literal_text(&self, name: &str, text: &str) -> PilotResult<()> {
        self.run_default(&literal_text_script(name, text))
            .await
            .map(|_| ())
    }

    async fn send_submit(&self, name: &str) -> PilotResult<()> {
        self.run_default(&submit_script(name)).await.map(|_| ())
    }

    async fn send_keys(&self, name: &str, keys: &[&str]) -> PilotResult<()> {
        let keys: Vec<String> = keys.iter().map(|k| shell_quote(k)).collect();
        let script = format!("tmux send-keys -t {} {}", shell_quote(name), keys.join(" "));
        self.run_default(&script).await.map(|_| ())
    }

    async fn capture_pane(&self, name: &str, lines: usize) -> PilotResult<String> {
        let script = format!("tmux capture-pane -t {} -p -S -{lines}", shell_quote(name));
        let limit = if lines <= PROBE_WINDOW {
            PROBE_TIMEOUT
        } else {
            self.settings.command_timeout
        };
        self.run(&script, limit)
            .await
            .map_err(|e| PilotError::Transport(format!("failed to capture pane: {e}")))
    }

    async fn kill_session(&self, name: &str) -> PilotResult<()> {
        self.run_default(&format!("tmux kill-session -t {}", shell_quote(name)))
            .await
            .map(|_| ())
    }

    async fn prepare_directory(&self, path: &str) -> PilotResult<()> {
        // eval lets `~` expand on the remote side.
        self.run_default(&format!("mkdir -p \"$(eval echo {})\"", shell_quote(path)))
            .await
            .map(|_| ())
    }

    async fn stage_file(&self, local_path: &Path, remote_path: &str) -> PilotResult<()> {
        let mut cmd = Command::new(&self.settings.scp);
        cmd.args(self.common_options())
            .arg(local_path)
            .arg(format!("{}:{}", self.address, remote_path));

        let what = format!("scp to {}", self.address);
        let output = run_bounded(&mut cmd, &what, self.settings.transfer_timeout).await?;
        expect_success(output, &what)?;
        info!(address = %self.address, path = %remote_path, "staged file");
        Ok(())
    }
}

/// ssh's own exit status for connection and protocol failures.
const SSH_ERROR_EXIT: i32 = 255;

/// `has-session` over ssh: a remote non-zero exit is the clean "no", while
/// ssh's 255 means the host was never asked.
fn exists_from_output(output: Output, what: &str) -> PilotResult<bool> {
    match output.status.code() {
        Some(0) => Ok(true),
        Some(SSH_ERROR_EXIT) | None => expect_success(output, what).map(|_| false),
        Some(_) => Ok(false),
    }
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

/// Base64 keeps arbitrary text intact through two layers of shell quoting.
fn literal_text_script(name: &str, text: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
    format!(
        "echo {encoded} | base64 -d | xargs -0 tmux send-keys -t {} -l",
        shell_quote(name)
    )
}

fn submit_script(name: &str) -> String {
    let quoted = shell_quote(name);
    format!("tmux send-keys -t {quoted} C-m && sleep 0.05 && tmux send-keys -t {quoted} C-m")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn literal_text_is_base64_encoded() {
        let script = literal_text_script("claude-web", "rm -rf 'x' && echo $HOME");
        assert!(!script.contains("$HOME"));
        assert!(script.contains("base64 -d | xargs -0 tmux send-keys -t 'claude-web' -l"));

        let encoded = script
            .strip_prefix("echo ")
            .and_then(|s| s.split(' ').next())
            .unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, b"rm -rf 'x' && echo $HOME");
    }

    fn finished(code: i32, stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn ssh_failure_is_not_a_missing_session() {
        assert!(exists_from_output(finished(0, ""), "ssh box").unwrap());
        assert!(!exists_from_output(finished(1, "can't find session: claude-x"), "ssh box").unwrap());

        let err = exists_from_output(
            finished(255, "ssh: connect to host box port 22: Connection refused"),
            "ssh box",
        )
        .unwrap_err();
        assert!(matches!(err, PilotError::Transport(_)));
        assert!(err.to_string().contains("Connection refused"), "{err}");
    }

    #[test]
    fn submit_presses_enter_twice() {
        let script = submit_script("claude-a");
        assert_eq!(script.matches("C-m").count(), 2);
        assert!(script.contains("sleep 0.05"));
    }
}
