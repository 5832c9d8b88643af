//! Best-effort signals to the messaging side: "typing" indicators while
//! the agent works, and plain-text notices about crashes and restarts.

use crate::config::TelegramSettings;
use crate::registry::ResolvedSession;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receiver of activity signals. Implementations swallow their own errors.
#[async_trait]
pub trait ActivityNotifier: Send + Sync {
    /// The agent is working on a turn for this session.
    async fn activity(&self, session: &ResolvedSession);

    /// A human-readable notice for the session's conversation.
    async fn notice(&self, session: &ResolvedSession, text: &str);
}

/// Logs signals instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl ActivityNotifier for LogNotifier {
    async fn activity(&self, session: &ResolvedSession) {
        debug!(session = %session.name, "agent activity");
    }

    async fn notice(&self, session: &ResolvedSession, text: &str) {
        info!(session = %session.name, notice = %text, "session notice");
    }
}

#[derive(Debug, Deserialize)]
struct BotReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers signals through the Telegram Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    base_url: String,
    chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(settings: &TelegramSettings) -> Self {
        Self::with_base_url(
            format!("https://api.telegram.org/bot{}", settings.token),
            settings.chat_id,
        )
    }

    pub fn with_base_url(base_url: String, chat_id: i64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url,
            chat_id,
        }
    }

    async fn call(&self, method: &str, payload: Value) {
        let url = format!("{}/{method}", self.base_url.trim_end_matches('/'));
        let result = self.client.post(&url).json(&payload).send().await;
        match result {
            Ok(response) => match response.json::<BotReply>().await {
                Ok(reply) if reply.ok => {}
                Ok(reply) => warn!(
                    method,
                    error = %reply.description.unwrap_or_default(),
                    "telegram rejected request"
                ),
                Err(e) => warn!(method, error = %e, "unreadable telegram reply"),
            },
            Err(e) => warn!(method, error = %e, "telegram request failed"),
        }
    }
}

#[async_trait]
impl ActivityNotifier for TelegramNotifier {
    async fn activity(&self, session: &ResolvedSession) {
        self.call("sendChatAction", chat_action_payload(self.chat_id, session))
            .await;
    }

    async fn notice(&self, session: &ResolvedSession, text: &str) {
        self.call("sendMessage", message_payload(self.chat_id, session, text))
            .await;
    }
}

/// Forum topic of the session's conversation, when it has a numeric one.
pub fn thread_id(session: &ResolvedSession) -> Option<i64> {
    session
        .conversation_ref
        .as_deref()
        .and_then(|r| r.parse::<i64>().ok())
        .filter(|id| *id > 0)
}

fn chat_action_payload(chat_id: i64, session: &ResolvedSession) -> Value {
    let mut payload = json!({ "chat_id": chat_id, "action": "typing" });
    if let Some(thread) = thread_id(session) {
        payload["message_thread_id"] = json!(thread);
    }
    payload
}

fn message_payload(chat_id: i64, session: &ResolvedSession, text: &str) -> Value {
    let mut payload = json!({ "chat_id": chat_id, "text": text });
    if let Some(thread) = thread_id(session) {
        payload["message_thread_id"] = json!(thread);
    }
    payload
}


#[cfg(test)]
mod tests {
    use super::*;

    fn session(conversation_ref: Option<&str>) -> ResolvedSession {
        ResolvedSession {
            name: "web".into(),
            tmux_name: "claude-web".into(),
            cwd: "/srv/web".into(),
            address: None,
            host_label: "local".into(),
            conversation_ref: conversation_ref.map(str::to_string),
        }
    }

    #[test]
    fn numeric_refs_become_threads() {
        assert_eq!(thread_id(&session(Some("812"))), Some(812));
        assert_eq!(thread_id(&session(Some("general"))), None);
        assert_eq!(thread_id(&session(Some("0"))), None);
        assert_eq!(thread_id(&session(None)), None);
    }

    #[test]
    fn payloads_carry_thread_only_when_known() {
        let with = chat_action_payload(-100, &session(Some("5")));
        assert_eq!(with["action"], "typing");
        assert_eq!(with["message_thread_id"], 5);

        let without = message_payload(-100, &session(None), "restarting");
        assert_eq!(without["text"], "restarting");
        assert!(without.get("message_thread_id").is_none());
    }

    #[tokio::test]
    async fn unreachable_api_is_swallowed() {
        let notifier = TelegramNotifier::with_base_url("http://127.0.0.1:9".into(), 1);
        notifier.activity(&session(Some("3"))).await;
        notifier.notice(&session(None), "hello").await;
    }
}
