//! Recovering the agent's latest reply from the pane.

use super::artifact::clean_line;
use super::state::PROMPT_GLYPH;
use crate::transport::TerminalHandle;
use std::time::Duration;
use tracing::debug;

/// Capture sizes tried in order. The reply may have scrolled out of a
/// smaller window by the time we look.
pub const CAPTURE_WINDOWS: [usize; 3] = [200, 500, 500];

/// Pause between capture attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Extract the reply to `sent_text`, retrying with wider captures.
/// Returns an empty string when nothing usable was found.
pub async fn extract_response(handle: &TerminalHandle, sent_text: &str) -> String {
    for (attempt, &window) in CAPTURE_WINDOWS.iter().enumerate() {
        if attempt > 0 {
            debug!(session = %handle.tmux_name(), attempt, window, "retrying response capture");
            tokio::time::sleep(RETRY_DELAY).await;
        }

        match handle.capture(window).await {
            Ok(pane) => {
                let response = parse_response(&pane, sent_text);
                if !response.is_empty() {
                    return response;
                }
            }
            Err(e) => debug!(session = %handle.tmux_name(), error = %e, "response capture failed"),
        }
    }
    debug!(session = %handle.tmux_name(), "no response found");
    String::new()
}

/// Collect the text between the latest prompt line and the one before it.
pub fn parse_response(pane: &str, sent_text: &str) -> String {
    let mut collected = Vec::new();
    let mut in_response = false;

    for line in pane.split('\n').rev() {
        if line.contains(PROMPT_GLYPH) {
            if in_response {
                break;
            }
            in_response = true;
            continue;
        }
        if !in_response {
            continue;
        }
        if let Some(kept) = clean_line(line) {
            collected.push(kept);
        }
    }

    collected.reverse();
    let response = collected.join("\n").trim().to_string();
    if is_echo(&response, sent_text) {
        debug!(response = %response, "capture is an echo of the sent text");
        return String::new();
    }
    response
}

/// Whether `response` is just the operator's own input (or a wrapped piece
/// of it).
pub fn is_echo(response: &str, sent_text: &str) -> bool {
    let sent = sent_text.trim();
    if sent.is_empty() || response.is_empty() {
        return false;
    }
    response == sent
        || sent.ends_with(response)
        || sent.starts_with(response)
        || response.ends_with(sent)
}
