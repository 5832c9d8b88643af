//! CLI subcommand implementations.

pub mod history;
pub mod message;
pub mod session;
pub mod status;
pub mod subscribe;

use crate::client::ControlClient;
use anyhow::{bail, Result};
use panepilot_core::{Request, Response};
use std::path::PathBuf;

/// What every subcommand needs from the global flags.
#[derive(Debug, Clone)]
pub struct Context {
    pub socket: PathBuf,
    pub from: Option<String>,
    /// Print raw JSON responses instead of formatted output.
    pub json: bool,
}

impl Context {
    pub async fn connect(&self) -> Result<ControlClient> {
        ControlClient::connect(&self.socket).await
    }

    /// One request on a fresh connection. An `ok:false` reply is an error.
    pub async fn request(&self, request: Request) -> Result<Response> {
        let mut client = self.connect().await?;
        let response = client.call(&request).await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        if !response.ok {
            bail!(
                "{}",
                response.error.as_deref().unwrap_or("request failed")
            );
        }
        Ok(response)
    }
}

/// Cut `text` to its first line and at most `max` characters.
pub fn one_line(text: &str, max: usize) -> String {
    let first = text.lines().next().unwrap_or_default();
    let mut out: String = first.chars().take(max).collect();
    if first.chars().count() > max || text.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_line_truncates() {
        assert_eq!(one_line("short", 10), "short");
        assert_eq!(one_line("abcdefghij", 4), "abcd…");
        assert_eq!(one_line("first\nsecond", 20), "first…");
        assert_eq!(one_line("", 5), "");
    }
}
