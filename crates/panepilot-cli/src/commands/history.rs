//! `panepilot history` — read a session's conversation log.

use super::{one_line, Context};
use anyhow::Result;
use chrono::{Local, TimeZone};
use panepilot_core::{Command, HistoryRecord, MediaKind, Request};

const TEXT_WIDTH: usize = 72;

pub async fn run(
    ctx: &Context,
    session: &str,
    after: Option<i64>,
    limit: Option<usize>,
    from: Option<&str>,
) -> Result<()> {
    let request = Request {
        after,
        limit,
        from_filter: from.map(str::to_string),
        ..Request::new(Command::History).with_session(session)
    };
    let resp = ctx.request(request).await?;
    if !ctx.json {
        print!("{}", render_history(&resp.messages.unwrap_or_default()));
    }
    Ok(())
}

pub fn render_history(records: &[HistoryRecord]) -> String {
    let mut out = format!(
        "{:<6} {:<16} {:<10} {}\n",
        "ID", "TIME", "FROM", "TEXT"
    );
    if records.is_empty() {
        out.push_str("(no messages)\n");
        return out;
    }
    for r in records {
        let from = match r.agent.as_deref() {
            Some(agent) if !agent.is_empty() => agent.to_string(),
            _ => r.from.as_str().to_string(),
        };
        out.push_str(&format!(
            "{:<6} {:<16} {:<10} {}\n",
            r.id,
            format_time(r.timestamp),
            from,
            summary(r)
        ));
    }
    out
}

fn format_time(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => ts.to_string(),
    }
}

fn summary(record: &HistoryRecord) -> String {
    let text = one_line(&record.text, TEXT_WIDTH);
    let tag = match record.media_kind {
        Some(MediaKind::Photo) => "[photo] ",
        Some(MediaKind::Voice) => "[voice] ",
        Some(MediaKind::Document) => "[file] ",
        Some(MediaKind::Other) => "[media] ",
        Some(MediaKind::Text) | None => "",
    };
    format!("{tag}{text}")
}
