//! Control-socket message types.
//!
//! Requests are flat JSON objects keyed by `cmd`; every response carries
//! `ok`, and the subscribe stream emits objects tagged by `event`.

use crate::error::{PilotError, PilotResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version string reported by `ping`.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Socket file name under the user's home directory.
pub const DEFAULT_SOCKET_NAME: &str = ".panepilot.sock";

// ── Commands ────────────────────────────────────────────────────────

/// Every command the control socket understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    Sessions,
    Ask,
    Send,
    Continue,
    History,
    Screenshot,
    Questions,
    Answer,
    Subscribe,
    Kill,
    Forward,
}

impl Command {
    pub const ALL: [Command; 12] = [
        Command::Ping,
        Command::Sessions,
        Command::Ask,
        Command::Send,
        Command::Continue,
        Command::History,
        Command::Screenshot,
        Command::Questions,
        Command::Answer,
        Command::Subscribe,
        Command::Kill,
        Command::Forward,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Sessions => "sessions",
            Command::Ask => "ask",
            Command::Send => "send",
            Command::Continue => "continue",
            Command::History => "history",
            Command::Screenshot => "screenshot",
            Command::Questions => "questions",
            Command::Answer => "answer",
            Command::Subscribe => "subscribe",
            Command::Kill => "kill",
            Command::Forward => "forward",
        }
    }
}

impl FromStr for Command {
    type Err = PilotError;

    fn from_str(s: &str) -> PilotResult<Self> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| PilotError::UnknownCommand(s.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Request ─────────────────────────────────────────────────────────

/// One request line. `cmd` stays a string so an unknown command still
/// parses and can be answered with an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Label of the calling agent, stored on `api` history records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_index: Option<usize>,
    /// Local file delivered alongside `forward` text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

impl Request {
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd: cmd.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn command(&self) -> PilotResult<Command> {
        self.cmd.parse()
    }

    /// The `session` field, rejecting a missing or empty value.
    pub fn require_session(&self) -> PilotResult<&str> {
        match self.session.as_deref() {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(PilotError::InvalidRequest("session required".into())),
        }
    }

    /// Both `session` and `text`, rejecting missing or empty values.
    pub fn require_session_and_text(&self) -> PilotResult<(&str, &str)> {
        match (self.session.as_deref(), self.text.as_deref()) {
            (Some(s), Some(t)) if !s.is_empty() && !t.is_empty() => Ok((s, t)),
            _ => Err(PilotError::InvalidRequest(
                "session and text required".into(),
            )),
        }
    }
}

// ── Response ────────────────────────────────────────────────────────

/// One response line. Only `ok` is always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<HistoryRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions_active: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<Question>>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Turn an `ok:false` response into an error carrying its message.
    pub fn into_result(self) -> PilotResult<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(PilotError::Other(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            ))
        }
    }
}

impl From<PilotError> for Response {
    fn from(e: PilotError) -> Self {
        Response::error(e.to_string())
    }
}

// ── Subscribe stream ────────────────────────────────────────────────

/// Events written on a `subscribe` connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    Subscribed { sessions: Vec<String> },
    Status { session: String, status: SessionStatus },
}

/// Externally reported status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The agent is working on a turn.
    Active,
    Idle,
    /// The lifecycle manager is creating or restarting the session.
    Starting,
    /// No terminal-multiplexer session exists.
    Stopped,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Starting => "starting",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `sessions` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub name: String,
    /// `local` or the host name.
    pub host: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cwd: String,
    /// Unix seconds of the newest history file, 0 when there is none.
    #[serde(default)]
    pub last_activity: i64,
}

// ── History ─────────────────────────────────────────────────────────

/// Who produced a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Human,
    #[serde(alias = "claude")]
    Assistant,
    Api,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::Human => "human",
            Sender::Assistant => "assistant",
            Sender::Api => "api",
        }
    }
}

impl FromStr for Sender {
    type Err = PilotError;

    fn from_str(s: &str) -> PilotResult<Self> {
        match s {
            "human" => Ok(Sender::Human),
            "assistant" | "claude" => Ok(Sender::Assistant),
            "api" => Ok(Sender::Api),
            other => Err(PilotError::InvalidRequest(format!(
                "unknown sender: {other}"
            ))),
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of media attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Text,
    Voice,
    Photo,
    Document,
    #[serde(other)]
    Other,
}

/// One persisted history line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    /// Unix seconds.
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub from: Sender,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<MediaKind>,
    #[serde(rename = "path", default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

// ── Questions ───────────────────────────────────────────────────────

/// A multiple-choice prompt currently shown by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub index: usize,
    pub question: String,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub index: usize,
    pub label: String,
    /// Whether the selection cursor is on this option.
    #[serde(default)]
    pub selected: bool,
}
