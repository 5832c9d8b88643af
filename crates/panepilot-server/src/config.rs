//! Daemon configuration: TOML file + CLI overrides.

use panepilot_core::{PilotError, PilotResult, DEFAULT_SOCKET_NAME};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tmux: TmuxSection,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub ask: AskSection,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub typing: TypingSection,
    #[serde(default)]
    pub notify: NotifySection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_socket")]
    pub socket: String,
    #[serde(default = "default_registry")]
    pub registry: String,
    #[serde(default = "default_history_dir")]
    pub history_dir: String,
    #[serde(default = "default_subscribe_interval")]
    pub subscribe_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            registry: default_registry(),
            history_dir: default_history_dir(),
            subscribe_interval_secs: default_subscribe_interval(),
        }
    }
}

/// `[tmux]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TmuxSection {
    #[serde(default = "default_tmux_binary")]
    pub binary: String,
    /// Server socket; empty means `/tmp/tmux-<uid>/default`.
    #[serde(default)]
    pub socket: String,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_tmux_log_dir")]
    pub log_dir: String,
}

impl Default for TmuxSection {
    fn default() -> Self {
        Self {
            binary: default_tmux_binary(),
            socket: String::new(),
            verbose: false,
            log_dir: default_tmux_log_dir(),
        }
    }
}

/// `[remote]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_ssh")]
    pub ssh: String,
    #[serde(default = "default_scp")]
    pub scp: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            ssh: default_ssh(),
            scp: default_scp(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
        }
    }
}

/// `[agent]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_continue_flag")]
    pub continue_flag: String,
    #[serde(default = "default_true")]
    pub confirm_bypass_prompt: bool,
    #[serde(default = "default_startup_settle")]
    pub startup_settle_secs: u64,
    #[serde(default = "default_restart_settle")]
    pub restart_settle_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            continue_flag: default_continue_flag(),
            confirm_bypass_prompt: true,
            startup_settle_secs: default_startup_settle(),
            restart_settle_secs: default_restart_settle(),
        }
    }
}

/// `[ask]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AskSection {
    #[serde(default = "default_ask_warmup")]
    pub warmup_ms: u64,
    #[serde(default = "default_two")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_five_minutes")]
    pub timeout_secs: u64,
}

impl Default for AskSection {
    fn default() -> Self {
        Self {
            warmup_ms: default_ask_warmup(),
            poll_interval_secs: 2,
            timeout_secs: default_five_minutes(),
        }
    }
}

/// `[capture]` section: the background capture after `send`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    #[serde(default = "default_one")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_three")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_five_minutes")]
    pub timeout_secs: u64,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            initial_delay_secs: 1,
            poll_interval_secs: 3,
            timeout_secs: default_five_minutes(),
        }
    }
}

/// `[typing]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TypingSection {
    #[serde(default = "default_two")]
    pub check_interval_secs: u64,
    #[serde(default = "default_four")]
    pub signal_interval_secs: u64,
    #[serde(default = "default_typing_cap")]
    pub max_duration_secs: u64,
}

impl Default for TypingSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 2,
            signal_interval_secs: 4,
            max_duration_secs: default_typing_cap(),
        }
    }
}

/// `[notify]` section. An empty token disables Telegram delivery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySection {
    #[serde(default)]
    pub telegram_token: String,
    #[serde(default)]
    pub chat_id: i64,
}

fn default_socket() -> String {
    format!("~/{DEFAULT_SOCKET_NAME}")
}
fn default_registry() -> String {
    "~/.panepilot/registry.json".to_string()
}
fn default_history_dir() -> String {
    "~/.panepilot/history".to_string()
}
fn default_subscribe_interval() -> u64 {
    5
}
fn default_tmux_binary() -> String {
    "tmux".to_string()
}
fn default_tmux_log_dir() -> String {
    "~/.panepilot/tmux-logs".to_string()
}
fn default_ssh() -> String {
    "ssh".to_string()
}
fn default_scp() -> String {
    "scp".to_string()
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_command_timeout() -> u64 {
    10
}
fn default_transfer_timeout() -> u64 {
    10
}
fn default_agent_command() -> String {
    "claude --dangerously-skip-permissions".to_string()
}
fn default_continue_flag() -> String {
    "-c".to_string()
}
fn default_startup_settle() -> u64 {
    5
}
fn default_restart_settle() -> u64 {
    3
}
fn default_ask_warmup() -> u64 {
    500
}
fn default_one() -> u64 {
    1
}
fn default_two() -> u64 {
    2
}
fn default_three() -> u64 {
    3
}
fn default_four() -> u64 {
    4
}
fn default_five_minutes() -> u64 {
    300
}
fn default_typing_cap() -> u64 {
    600
}
fn default_true() -> bool {
    true
}

impl ConfigFile {
    /// Poll periods and ceilings must be positive.
    fn validate(&self) -> PilotResult<()> {
        let positive = [
            ("ask.poll_interval_secs", self.ask.poll_interval_secs),
            ("ask.timeout_secs", self.ask.timeout_secs),
            ("capture.poll_interval_secs", self.capture.poll_interval_secs),
            ("capture.timeout_secs", self.capture.timeout_secs),
            ("typing.check_interval_secs", self.typing.check_interval_secs),
            ("typing.signal_interval_secs", self.typing.signal_interval_secs),
            ("typing.max_duration_secs", self.typing.max_duration_secs),
            ("server.subscribe_interval_secs", self.server.subscribe_interval_secs),
        ];
        match positive.iter().find(|(_, value)| *value == 0) {
            Some((key, _)) => Err(PilotError::Other(format!("config: {key} must be at least 1"))),
            None => Ok(()),
        }
    }
}

/// Poll-loop timings, resolved to durations.
#[derive(Debug, Clone)]
pub struct Timings {
    pub ask_warmup: Duration,
    pub ask_interval: Duration,
    pub ask_timeout: Duration,
    pub capture_delay: Duration,
    pub capture_interval: Duration,
    pub capture_timeout: Duration,
    pub typing_check: Duration,
    pub typing_signal: Duration,
    pub typing_cap: Duration,
    pub startup_settle: Duration,
    pub restart_settle: Duration,
    pub subscribe_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from_file(&ConfigFile::default())
    }
}

impl Timings {
    fn from_file(file: &ConfigFile) -> Self {
        Self {
            ask_warmup: Duration::from_millis(file.ask.warmup_ms),
            ask_interval: Duration::from_secs(file.ask.poll_interval_secs),
            ask_timeout: Duration::from_secs(file.ask.timeout_secs),
            capture_delay: Duration::from_secs(file.capture.initial_delay_secs),
            capture_interval: Duration::from_secs(file.capture.poll_interval_secs),
            capture_timeout: Duration::from_secs(file.capture.timeout_secs),
            typing_check: Duration::from_secs(file.typing.check_interval_secs),
            typing_signal: Duration::from_secs(file.typing.signal_interval_secs),
            typing_cap: Duration::from_secs(file.typing.max_duration_secs),
            startup_settle: Duration::from_secs(file.agent.startup_settle_secs),
            restart_settle: Duration::from_secs(file.agent.restart_settle_secs),
            subscribe_interval: Duration::from_secs(file.server.subscribe_interval_secs),
        }
    }
}

/// How the agent is launched inside a fresh terminal session.
#[derive(Debug, Clone)]
pub struct AgentLaunch {
    pub command: String,
    pub continue_flag: String,
    pub confirm_bypass_prompt: bool,
}

impl Default for AgentLaunch {
    fn default() -> Self {
        let section = AgentSection::default();
        Self {
            command: section.command,
            continue_flag: section.continue_flag,
            confirm_bypass_prompt: section.confirm_bypass_prompt,
        }
    }
}

impl AgentLaunch {
    /// Shell command line that starts the agent.
    pub fn command_line(&self, continue_conversation: bool) -> String {
        if continue_conversation && !self.continue_flag.is_empty() {
            format!("{} {}", self.command, self.continue_flag)
        } else {
            self.command.clone()
        }
    }
}

/// Local tmux settings, paths expanded.
#[derive(Debug, Clone)]
pub struct TmuxSettings {
    pub binary: String,
    pub socket: PathBuf,
    pub verbose: bool,
    pub log_dir: PathBuf,
}

/// Remote shell settings.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub ssh: String,
    pub scp: String,
    pub connect_timeout_secs: u64,
    pub command_timeout: Duration,
    pub transfer_timeout: Duration,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        let section = RemoteSection::default();
        Self {
            ssh: section.ssh,
            scp: section.scp,
            connect_timeout_secs: section.connect_timeout_secs,
            command_timeout: Duration::from_secs(section.command_timeout_secs),
            transfer_timeout: Duration::from_secs(section.transfer_timeout_secs),
        }
    }
}

/// Telegram credentials, if configured.
#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_id: i64,
}

/// Resolved daemon configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub registry_path: PathBuf,
    pub history_dir: PathBuf,
    pub tmux: TmuxSettings,
    pub remote: RemoteSettings,
    pub agent: AgentLaunch,
    pub timings: Timings,
    pub telegram: Option<TelegramSettings>,
}

/// Values given on the daemon command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub socket: Option<String>,
    pub registry: Option<String>,
    pub history_dir: Option<String>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: CliOverrides) -> PilotResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| PilotError::Other(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        file_config.validate()?;
        Ok(Self::from_file(file_config, overrides))
    }

    fn from_file(file: ConfigFile, overrides: CliOverrides) -> Self {
        let socket = overrides.socket.unwrap_or_else(|| file.server.socket.clone());
        let registry = overrides
            .registry
            .unwrap_or_else(|| file.server.registry.clone());
        let history_dir = overrides
            .history_dir
            .unwrap_or_else(|| file.server.history_dir.clone());

        let tmux_socket = if file.tmux.socket.is_empty() {
            default_tmux_socket()
        } else {
            expand_tilde_str(&file.tmux.socket)
        };

        let telegram = if file.notify.telegram_token.is_empty() {
            None
        } else {
            Some(TelegramSettings {
                token: file.notify.telegram_token.clone(),
                chat_id: file.notify.chat_id,
            })
        };

        Self {
            socket_path: expand_tilde_str(&socket),
            registry_path: expand_tilde_str(&registry),
            history_dir: expand_tilde_str(&history_dir),
            tmux: TmuxSettings {
                binary: file.tmux.binary.clone(),
                socket: tmux_socket,
                verbose: file.tmux.verbose,
                log_dir: expand_tilde_str(&file.tmux.log_dir),
            },
            remote: RemoteSettings {
                ssh: file.remote.ssh.clone(),
                scp: file.remote.scp.clone(),
                connect_timeout_secs: file.remote.connect_timeout_secs,
                command_timeout: Duration::from_secs(file.remote.command_timeout_secs),
                transfer_timeout: Duration::from_secs(file.remote.transfer_timeout_secs),
            },
            agent: AgentLaunch {
                command: file.agent.command.clone(),
                continue_flag: file.agent.continue_flag.clone(),
                confirm_bypass_prompt: file.agent.confirm_bypass_prompt,
            },
            timings: Timings::from_file(&file),
            telegram,
        }
    }
}

/// tmux's own default server socket for the current user.
fn default_tmux_socket() -> PathBuf {
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/tmux-{uid}/default"))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

pub fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
