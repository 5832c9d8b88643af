//! Inference over captured pane text.
//!
//! The agent offers no API: everything here works from a rectangle of
//! recent terminal output.

pub mod artifact;
pub mod extractor;
pub mod poll;
pub mod questions;
pub mod state;

pub use state::AgentState;
