//! Session control: `continue`, `kill`, `screenshot`, `questions`, `answer`.

use super::Context;
use anyhow::Result;
use panepilot_core::{Command, Question, Request};

pub async fn run_continue(ctx: &Context, session: &str) -> Result<()> {
    ctx.request(Request::new(Command::Continue).with_session(session))
        .await?;
    if !ctx.json {
        println!("{session}: agent restarted");
    }
    Ok(())
}

pub async fn run_kill(ctx: &Context, session: &str) -> Result<()> {
    ctx.request(Request::new(Command::Kill).with_session(session))
        .await?;
    if !ctx.json {
        println!("{session}: killed");
    }
    Ok(())
}

pub async fn run_screenshot(ctx: &Context, session: &str, lines: Option<usize>) -> Result<()> {
    let request = Request {
        limit: lines,
        ..Request::new(Command::Screenshot).with_session(session)
    };
    let resp = ctx.request(request).await?;
    if !ctx.json {
        println!("{}", resp.response.unwrap_or_default());
    }
    Ok(())
}

pub async fn run_questions(ctx: &Context, session: &str) -> Result<()> {
    let resp = ctx
        .request(Request::new(Command::Questions).with_session(session))
        .await?;
    if !ctx.json {
        print!("{}", render_questions(&resp.questions.unwrap_or_default()));
    }
    Ok(())
}

pub async fn run_answer(
    ctx: &Context,
    session: &str,
    option: usize,
    question: usize,
) -> Result<()> {
    let request = Request {
        question_index: Some(question),
        option_index: Some(option),
        ..Request::new(Command::Answer).with_session(session)
    };
    let resp = ctx.request(request).await?;
    if !ctx.json {
        println!("{}", resp.response.unwrap_or_default());
    }
    Ok(())
}

pub fn render_questions(questions: &[Question]) -> String {
    if questions.is_empty() {
        return "(no pending question)\n".to_string();
    }
    let mut out = String::new();
    for q in questions {
        out.push_str(&format!("[{}] {}\n", q.index, q.question));
        for o in &q.options {
            let cursor = if o.selected { '❯' } else { ' ' };
            out.push_str(&format!("  {cursor} {}. {}\n", o.index, o.label));
        }
    }
    out
}
