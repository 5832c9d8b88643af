//! Multiple-choice prompts raised by the agent.
//!
//! The picker renders as numbered options, the highlighted one led by the
//! prompt glyph, above an "Enter to select" footer:
//!
//! ```text
//!  Which database should the service use?
//!
//!  ❯ 1. Postgres
//!       Battle-tested, needs a server
//!    2. SQLite
//!
//!  Enter to select · ↑/↓ to navigate · Esc to cancel
//! ```

use super::state::PROMPT_GLYPH;
use panepilot_core::{PilotError, PilotResult, Question, QuestionOption};

/// Lines captured when looking for a pending question.
pub const QUESTION_WINDOW: usize = 40;

const FOOTER: &str = "Enter to select";

/// The pending question on screen, if any. The agent shows one at a time.
pub fn parse_questions(pane: &str) -> Vec<Question> {
    let lines: Vec<&str> = pane.split('\n').collect();
    let Some(footer) = lines.iter().rposition(|l| l.contains(FOOTER)) else {
        return Vec::new();
    };

    let mut options: Vec<QuestionOption> = Vec::new();
    let mut option_indent = 0;
    let mut question = String::new();

    for line in lines[..footer].iter().rev() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some((number, label, selected)) = parse_option(line) {
            option_indent = indent_of(line);
            options.push(QuestionOption {
                index: number.saturating_sub(1),
                label: label.to_string(),
                selected,
            });
            continue;
        }
        if options.is_empty() {
            // Hints between the last option and the footer.
            continue;
        }
        if indent_of(line) > option_indent {
            // Description under an option.
            continue;
        }
        if !trimmed.chars().all(|c| c == '─') {
            question = trimmed.trim_start_matches(&['☐', '☒', '✔'][..]).trim().to_string();
        }
        break;
    }

    if options.is_empty() {
        return Vec::new();
    }
    options.reverse();
    vec![Question {
        index: 0,
        question,
        options,
    }]
}

/// `[❯] N. label` → (N, label, highlighted).
fn parse_option(line: &str) -> Option<(usize, &str, bool)> {
    let mut rest = line.trim_start();
    let selected = match rest.strip_prefix(PROMPT_GLYPH) {
        Some(after) => {
            rest = after.trim_start();
            true
        }
        None => false,
    };

    let digits = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let number: usize = rest[..digits].parse().ok()?;
    let label = rest[digits..].strip_prefix(". ")?.trim();
    if label.is_empty() {
        return None;
    }
    Some((number, label, selected))
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Keystrokes that move the picker's cursor to `option_index` and confirm.
///
/// With a parsed question the cursor moves from its current position;
/// otherwise it is assumed to start on the first option.
pub fn navigation_keys(
    question: Option<&Question>,
    option_index: usize,
) -> PilotResult<Vec<&'static str>> {
    let current = match question {
        Some(q) => {
            if option_index >= q.options.len() {
                return Err(PilotError::InvalidRequest(format!(
                    "option_index {option_index} out of range (question has {} options)",
                    q.options.len()
                )));
            }
            q.options
                .iter()
                .position(|o| o.selected)
                .unwrap_or(0)
        }
        None => 0,
    };

    let mut keys = Vec::new();
    if option_index >= current {
        keys.extend(std::iter::repeat("Down").take(option_index - current));
    } else {
        keys.extend(std::iter::repeat("Up").take(current - option_index));
    }
    keys.push("Enter");
    Ok(keys)
}
