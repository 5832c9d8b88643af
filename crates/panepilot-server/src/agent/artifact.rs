//! Separating the agent's UI chrome from its prose.

/// Leading bullet the agent puts on its own text and on tool calls.
pub const BULLET: char = '●';

/// Words that open a "thought for N" statistics line.
const THINKING_STATS: &[&str] = &[
    "Cogitated",
    "Brewed",
    "Cooked",
    "Churned",
    "Marinated",
    "Cultivated",
];

/// Glyphs that open a spinner or thinking line.
const SPINNER_PREFIXES: &[&str] = &["✶", "✢", "✽", "✻", "·", "* "];

/// Tool summary lines that follow the bullet.
const TOOL_SUMMARIES: &[&str] = &["Searched ", "Wrote ", "Read "];

/// Whether a pane line is UI chrome rather than response text.
pub fn is_ui_artifact(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }

    // Separator rule.
    if trimmed.chars().all(|c| c == '─') {
        return true;
    }

    if let Some(rest) = trimmed.strip_prefix(BULLET) {
        let rest = rest.trim();
        if is_tool_call(rest) || TOOL_SUMMARIES.iter().any(|p| rest.starts_with(p)) {
            return true;
        }
    }

    // Nested tool output.
    if trimmed.starts_with('⎿') {
        return true;
    }

    // Collapsed tool output continuation.
    if line.starts_with("     ")
        && !trimmed.starts_with(BULLET)
        && (trimmed.contains("(ctrl+o to expand)") || trimmed.starts_with('…'))
    {
        return true;
    }

    if SPINNER_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return true;
    }

    // Status bar.
    if trimmed.starts_with('⏵') {
        return true;
    }

    if is_thinking_stats(trimmed) {
        return true;
    }

    if line.contains("ctrl+c to interrupt") || line.contains("bypass permissions") {
        return true;
    }

    trimmed.contains("(ctrl+o to expand)")
        || trimmed.starts_with("(timeout ")
        || trimmed == "(No content)"
}

/// `Bash(…)`, `Update:` and friends: ASCII letters then `(` or `:`.
fn is_tool_call(rest: &str) -> bool {
    for c in rest.chars() {
        if c == '(' || c == ':' {
            return true;
        }
        if !c.is_ascii_alphabetic() {
            return false;
        }
    }
    false
}

fn is_thinking_stats(trimmed: &str) -> bool {
    trimmed.contains(" for ")
        && (trimmed.ends_with('s') || trimmed.ends_with('m'))
        && THINKING_STATS.iter().any(|w| trimmed.starts_with(w))
}

/// Filter one line for the response body. UI chrome is dropped and the
/// bullet prefix is removed from prose; the result is stable under
/// re-filtering.
pub fn clean_line(line: &str) -> Option<String> {
    if is_ui_artifact(line) {
        return None;
    }
    let trimmed = line.trim();
    if !trimmed.starts_with(BULLET) {
        return Some(line.to_string());
    }

    let mut rest = trimmed;
    while let Some(after) = rest.strip_prefix(BULLET) {
        rest = after.trim_start();
    }
    // A stacked bullet may have been hiding a tool call.
    if is_ui_artifact(rest) || is_ui_artifact(&format!("{BULLET} {rest}")) {
        None
    } else {
        Some(rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_lines() {
        for line in [
            "",
            "   ",
            "──────────",
            "● Bash(cargo test)",
            "● Update(src/main.rs)",
            "● Searched for 3 patterns",
            "● Read 120 lines",
            "  ⎿  Added 16 lines",
            "     … +56 lines (ctrl+o to expand)",
            "✻ Cogitating… (4s)",
            "· Pondering…",
            "* Cogitating…",
            "  ⏵⏵ bypass permissions on",
            "Brewed for 1m 19s",
            "Cooked for 30s",
            "esc to interrupt · ctrl+c to interrupt",
            "(timeout 15s)",
            "(No content)",
        ] {
            assert!(is_ui_artifact(line), "expected chrome: {line:?}");
        }
    }

    #[test]
    fn prose_lines() {
        for line in [
            "● The build is green.",
            "● Done",
            "Here is what changed:",
            "     indented code sample",
            "- bullet list item",
            "I cooked up a fix for the parser",
        ] {
            assert!(!is_ui_artifact(line), "expected prose: {line:?}");
        }
    }

    #[test]
    fn bullet_is_stripped() {
        assert_eq!(clean_line("● All 42 tests pass.").as_deref(), Some("All 42 tests pass."));
        assert_eq!(clean_line("  plain text").as_deref(), Some("  plain text"));
        assert_eq!(clean_line("●").as_deref(), None);
    }

    #[test]
    fn stacked_bullets_do_not_leak_chrome() {
        assert_eq!(clean_line("● ● Bash(ls)"), None);
        assert_eq!(clean_line("● * Thinking…"), None);
    }

    #[test]
    fn filtering_is_idempotent() {
        let lines = [
            "● Summary of the change",
            "● ● Edit(file.rs)",
            "● ● nested bullet prose",
            "     … more",
            "  two-space indent",
            "● ✻ odd",
            "Plain",
        ];
        for line in lines {
            let once = clean_line(line);
            if let Some(ref kept) = once {
                assert_eq!(clean_line(kept).as_ref(), Some(kept), "unstable: {line:?}");
            }
        }
    }
}
