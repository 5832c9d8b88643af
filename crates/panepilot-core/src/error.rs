use thiserror::Error;

/// Errors produced by the panepilot engine and protocol layer.
#[derive(Debug, Error)]
pub enum PilotError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("host not configured: {0}")]
    HostNotConfigured(String),

    #[error("{0}")]
    Transport(String),

    #[error("failed to start session: {0}")]
    StartFailed(String),

    #[error("failed to restart agent in {0}")]
    RestartFailed(String),

    #[error("timeout waiting for response")]
    Timeout,

    #[error("history error: {0}")]
    History(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for PilotError {
    fn from(e: serde_json::Error) -> Self {
        PilotError::Codec(e.to_string())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
