//! `panepilot subscribe` — follow status changes until interrupted.

use super::Context;
use anyhow::{bail, Result};
use panepilot_core::{Command, Event, Request, Response};
use serde_json::Value;

pub async fn run(ctx: &Context, sessions: Vec<String>) -> Result<()> {
    let request = Request {
        sessions: (!sessions.is_empty()).then_some(sessions),
        ..Request::new(Command::Subscribe)
    };
    let mut client = ctx.connect().await?;
    client.send(&request).await?;

    while let Some(line) = client.next::<Value>().await? {
        if ctx.json {
            println!("{line}");
            continue;
        }
        if line.get("event").is_none() {
            // The daemon answers with a plain response when it refuses.
            let resp: Response = serde_json::from_value(line)?;
            bail!("{}", resp.error.unwrap_or_else(|| "subscribe refused".into()));
        }
        let event: Event = serde_json::from_value(line)?;
        println!("{}", render_event(&event));
    }
    Ok(())
}

pub fn render_event(event: &Event) -> String {
    match event {
        Event::Subscribed { sessions } if sessions.is_empty() => {
            "watching no sessions".to_string()
        }
        Event::Subscribed { sessions } => format!("watching {}", sessions.join(", ")),
        Event::Status { session, status } => format!("{session}: {status}"),
    }
}
