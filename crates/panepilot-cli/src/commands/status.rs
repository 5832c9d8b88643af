//! `panepilot ping` / `panepilot sessions`.

use super::Context;
use anyhow::Result;
use panepilot_core::{Command, Request, SessionSummary};

pub async fn run_ping(ctx: &Context) -> Result<()> {
    let resp = ctx.request(Request::new(Command::Ping)).await?;
    if !ctx.json {
        println!(
            "panepilotd {} up {}, {} active session(s)",
            resp.version.unwrap_or_default(),
            format_age(resp.uptime_seconds.unwrap_or(0) as i64),
            resp.sessions_active.unwrap_or(0)
        );
    }
    Ok(())
}

pub async fn run_sessions(ctx: &Context) -> Result<()> {
    let resp = ctx.request(Request::new(Command::Sessions)).await?;
    if !ctx.json {
        let now = chrono::Utc::now().timestamp();
        print!("{}", render_sessions(&resp.sessions.unwrap_or_default(), now));
    }
    Ok(())
}

pub fn render_sessions(sessions: &[SessionSummary], now: i64) -> String {
    let mut out = format!(
        "{:<24} {:<12} {:<9} {:<10} {}\n",
        "SESSION", "HOST", "STATUS", "ACTIVITY", "CWD"
    );
    if sessions.is_empty() {
        out.push_str("(no sessions)\n");
        return out;
    }
    for s in sessions {
        let activity = if s.last_activity > 0 {
            format!("{} ago", format_age(now - s.last_activity))
        } else {
            "-".to_string()
        };
        out.push_str(&format!(
            "{:<24} {:<12} {:<9} {:<10} {}\n",
            s.name,
            s.host,
            s.status.as_str(),
            activity,
            s.cwd
        ));
    }
    out
}

/// `42s`, `7m`, `3h`, `2d`.
pub fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panepilot_core::SessionStatus;

    #[test]
    fn ages() {
        assert_eq!(format_age(-3), "0s");
        assert_eq!(format_age(59), "59s");
        assert_eq!(format_age(600), "10m");
        assert_eq!(format_age(7200), "2h");
        assert_eq!(format_age(200_000), "2d");
    }

    #[test]
    fn session_table() {
        let rows = vec![
            SessionSummary {
                name: "web".into(),
                host: "local".into(),
                status: SessionStatus::Active,
                cwd: "/srv/web".into(),
                last_activity: 1_000,
            },
            SessionSummary {
                name: "box:api".into(),
                host: "box".into(),
                status: SessionStatus::Stopped,
                cwd: String::new(),
                last_activity: 0,
            },
        ];
        let table = render_sessions(&rows, 1_120);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("SESSION"));
        assert!(lines[1].contains("active") && lines[1].contains("2m ago"));
        assert!(lines[2].contains("stopped") && lines[2].contains(" - "));
    }

    #[test]
    fn empty_table() {
        assert!(render_sessions(&[], 0).contains("(no sessions)"));
    }
}
