//! Idle/busy classification and crash detection.

use crate::transport::TerminalHandle;
use tracing::debug;

/// The agent's input-line marker.
pub const PROMPT_GLYPH: &str = "❯";

/// Lines captured for an idle/busy reading.
pub const STATE_WINDOW: usize = 15;

/// Lines captured when checking whether the agent is running at all.
pub const RUNNING_WINDOW: usize = 30;

/// Shown below the prompt while a turn is in progress.
const BUSY_MARKERS: &[&str] = &["ctrl+c to interrupt", "✽", "✻", "Running…", "Thinking…"];

/// Any of these means the agent's UI is on screen rather than a bare shell.
const UI_INDICATORS: &[&str] = &[
    PROMPT_GLYPH,
    "bypass permissions",
    "shift+tab to cycle",
    "ctrl+c to interrupt",
    "●",
    "✽",
    "✻",
    "⎿",
];

/// Observed state of the agent in one session at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Busy,
    /// No prompt visible; not enough signal to say.
    Unknown,
}

/// Index of the last line that is the bare input prompt.
pub fn find_prompt_line(lines: &[&str]) -> Option<usize> {
    lines.iter().rposition(|line| {
        let trimmed = line.trim();
        trimmed == PROMPT_GLYPH || trimmed == ">"
    })
}

/// Classify a pane capture as idle, busy or unknown.
pub fn classify(pane: &str) -> AgentState {
    let lines: Vec<&str> = pane.split('\n').collect();
    let Some(prompt) = find_prompt_line(&lines) else {
        return AgentState::Unknown;
    };

    for line in &lines[prompt + 1..] {
        // Separator rules and the permissions status bar sit below the
        // prompt in every state.
        if line.trim_start().starts_with('─') || line.contains("bypass permissions") {
            continue;
        }
        if BUSY_MARKERS.iter().any(|m| line.contains(m)) {
            return AgentState::Busy;
        }
    }
    AgentState::Idle
}

/// Whether the agent's UI is visible at all.
pub fn is_running(pane: &str) -> bool {
    UI_INDICATORS.iter().any(|m| pane.contains(m))
}

/// Capture and classify. A failed capture reads as `Unknown`.
pub async fn probe_state(handle: &TerminalHandle) -> AgentState {
    match handle.capture(STATE_WINDOW).await {
        Ok(pane) => classify(&pane),
        Err(e) => {
            debug!(session = %handle.tmux_name(), error = %e, "state probe failed");
            AgentState::Unknown
        }
    }
}

/// Capture and check for the agent's UI. A failed capture reads as not running.
pub async fn probe_running(handle: &TerminalHandle) -> bool {
    match handle.capture(RUNNING_WINDOW).await {
        Ok(pane) => is_running(&pane),
        Err(e) => {
            debug!(session = %handle.tmux_name(), error = %e, "running probe failed");
            false
        }
    }
}
