//! panepilot-core: shared protocol library for the panepilot control socket.
//!
//! Provides the request/response/event message types, the newline-delimited
//! JSON codec, and the error taxonomy used by both the daemon and the CLI.

pub mod codec;
pub mod error;
pub mod protocol;

// Re-export commonly used items at crate root.
pub use codec::{line_decode, line_encode, LineDecoder, MAX_LINE_BYTES};
pub use error::{PilotError, PilotResult};
pub use protocol::{
    Command, Event, HistoryRecord, MediaKind, Question, QuestionOption, Request, Response,
    Sender, SessionStatus, SessionSummary, DEFAULT_SOCKET_NAME, PROTOCOL_VERSION,
};
