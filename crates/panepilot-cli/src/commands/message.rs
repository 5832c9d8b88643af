//! `panepilot ask` / `send` / `forward` — deliver text to an agent.

use super::Context;
use anyhow::{Context as _, Result};
use panepilot_core::{Command, Request};
use std::path::Path;

fn message(ctx: &Context, cmd: Command, session: &str, text: &str) -> Request {
    Request {
        from: ctx.from.clone(),
        ..Request::new(cmd).with_session(session).with_text(text)
    }
}

/// Blocks until the agent settles, then prints its reply.
pub async fn run_ask(ctx: &Context, session: &str, text: &str) -> Result<()> {
    let resp = ctx.request(message(ctx, Command::Ask, session, text)).await?;
    if !ctx.json {
        match resp.response.as_deref() {
            Some(reply) if !reply.is_empty() => println!("{reply}"),
            _ => eprintln!("(no response captured)"),
        }
    }
    Ok(())
}

pub async fn run_send(ctx: &Context, session: &str, text: &str) -> Result<()> {
    let resp = ctx.request(message(ctx, Command::Send, session, text)).await?;
    if !ctx.json {
        println!("sent to {session} (message {})", resp.message_id.unwrap_or(0));
    }
    Ok(())
}

pub async fn run_forward(
    ctx: &Context,
    session: &str,
    text: &str,
    attach: Option<&Path>,
) -> Result<()> {
    let attachment = match attach {
        Some(path) => Some(
            std::fs::canonicalize(path)
                .with_context(|| format!("cannot read attachment {}", path.display()))?
                .to_string_lossy()
                .into_owned(),
        ),
        None => None,
    };
    let request = Request {
        attachment,
        ..Request::new(Command::Forward)
            .with_session(session)
            .with_text(text)
    };
    let resp = ctx.request(request).await?;
    if !ctx.json {
        println!(
            "forwarded to {session} (message {})",
            resp.message_id.unwrap_or(0)
        );
    }
    Ok(())
}
