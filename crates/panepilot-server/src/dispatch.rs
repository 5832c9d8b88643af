//! Control-socket command handlers.
//!
//! Each request is answered from fresh state: the registry is re-read,
//! routing is re-resolved and the pane is re-probed. `ask` blocks until
//! the agent settles; `send` returns as soon as the text is delivered.

use crate::agent::extractor::extract_response;
use crate::agent::poll::{wait_until_settled, PollOutcome, PollPolicy};
use crate::agent::questions::{navigation_keys, parse_questions, QUESTION_WINDOW};
use crate::agent::state::probe_state;
use crate::config::Timings;
use crate::history::{HistoryStore, NewRecord, DEFAULT_READ_LIMIT};
use crate::lifecycle::LifecycleManager;
use crate::notify::ActivityNotifier;
use crate::registry::{RegistrySnapshot, ResolvedSession, SessionRegistry};
use crate::tasks::{spawn_capture, CaptureGuard, TypingRegistry};
use crate::transport::TerminalHandle;
use panepilot_core::{
    line_encode, Command, Event, HistoryRecord, MediaKind, PilotError, PilotResult, Request,
    Response, Sender, SessionStatus, SessionSummary, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lines returned by `screenshot` when no limit is given.
const DEFAULT_SCREENSHOT_LINES: usize = 50;

/// Gap between picker navigation keys.
const ANSWER_KEY_GAP: Duration = Duration::from_millis(50);

/// Agent label used when a request carries no `from`.
const DEFAULT_AGENT_LABEL: &str = "api";

/// Shared services behind every connection.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    history: Arc<HistoryStore>,
    captures: Arc<CaptureGuard>,
    typing: Arc<TypingRegistry>,
    notifier: Arc<dyn ActivityNotifier>,
    timings: Timings,
    started_at: Instant,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        lifecycle: Arc<LifecycleManager>,
        history: Arc<HistoryStore>,
        notifier: Arc<dyn ActivityNotifier>,
        timings: Timings,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            history,
            captures: Arc::new(CaptureGuard::new()),
            typing: Arc::new(TypingRegistry::new(&timings)),
            notifier,
            timings,
            started_at: Instant::now(),
        }
    }

    pub fn typing(&self) -> &Arc<TypingRegistry> {
        &self.typing
    }

    pub fn captures(&self) -> &Arc<CaptureGuard> {
        &self.captures
    }

    /// Answer one request. Failures become `{ok:false, error}`.
    pub async fn dispatch(&self, req: &Request) -> Response {
        let cmd = match req.command() {
            Ok(cmd) => cmd,
            Err(e) => return e.into(),
        };
        debug!(cmd = %cmd, session = ?req.session, "dispatching");

        let result = match cmd {
            Command::Ping => self.ping().await,
            Command::Sessions => self.sessions().await,
            Command::Ask => self.ask(req).await,
            Command::Send => self.send(req).await,
            Command::Continue => self.continue_session(req).await,
            Command::History => self.history(req).await,
            Command::Screenshot => self.screenshot(req).await,
            Command::Questions => self.questions(req).await,
            Command::Answer => self.answer(req).await,
            Command::Kill => self.kill(req).await,
            Command::Forward => self.forward(req).await,
            Command::Subscribe => Err(PilotError::InvalidRequest(
                "subscribe takes over its connection".into(),
            )),
        };

        result.unwrap_or_else(|e| {
            debug!(cmd = %cmd, error = %e, "request failed");
            e.into()
        })
    }

    async fn snapshot(&self) -> PilotResult<RegistrySnapshot> {
        self.registry.snapshot().await
    }

    async fn resolve(&self, name: &str) -> PilotResult<ResolvedSession> {
        self.snapshot().await?.resolve(name)
    }

    async fn ping(&self) -> PilotResult<Response> {
        let active = self.snapshot().await?.active_count();
        Ok(Response {
            version: Some(PROTOCOL_VERSION.to_string()),
            uptime_seconds: Some(self.started_at.elapsed().as_secs()),
            sessions_active: Some(active),
            ..Response::ok()
        })
    }

    async fn sessions(&self) -> PilotResult<Response> {
        let snapshot = self.snapshot().await?;
        let mut sessions = Vec::new();
        for name in snapshot.active_names() {
            let session = match snapshot.resolve(&name) {
                Ok(session) => session,
                Err(e) => {
                    warn!(session = %name, error = %e, "skipping unresolvable session");
                    continue;
                }
            };
            sessions.push(SessionSummary {
                status: self.lifecycle.status(&session).await,
                last_activity: self.history.last_activity(&session.conversation_key()).await,
                host: session.host_label.clone(),
                cwd: session.cwd.clone(),
                name,
            });
        }
        Ok(Response {
            sessions: Some(sessions),
            ..Response::ok()
        })
    }

    /// The shared front half of `ask` and `send`: bring the agent up, log
    /// and mirror the text, then type it in.
    async fn deliver(
        &self,
        req: &Request,
    ) -> PilotResult<(ResolvedSession, TerminalHandle, HistoryRecord)> {
        let (name, text) = req.require_session_and_text()?;
        let session = self.resolve(name).await?;
        let handle = self.lifecycle.ensure_running(&session).await?;

        let label = req
            .from
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_AGENT_LABEL);
        if session.conversation_ref.is_some() {
            self.notifier
                .notice(&session, &format!("🤖 [{label}] {text}"))
                .await;
        }

        let record = self
            .history
            .append(
                &session.conversation_key(),
                NewRecord {
                    agent: Some(label.to_string()),
                    ..NewRecord::text(Sender::Api, text)
                },
            )
            .await?;

        self.start_typing(&session, &handle);
        if let Err(e) = handle.deliver(text).await {
            self.typing.stop(&session.name);
            return Err(PilotError::Transport(format!("failed to send: {e}")));
        }
        info!(session = %session.name, id = record.id, agent = %label, "message delivered");
        Ok((session, handle, record))
    }

    async fn ask(&self, req: &Request) -> PilotResult<Response> {
        let started = Instant::now();
        let (session, handle, sent) = self.deliver(req).await?;

        let policy = PollPolicy {
            initial_delay: self.timings.ask_warmup,
            interval: self.timings.ask_interval,
            ceiling: self.timings.ask_timeout,
        };
        if wait_until_settled(policy, || probe_state(&handle)).await == PollOutcome::TimedOut {
            warn!(session = %session.name, "ask timed out");
            self.typing.stop(&session.name);
            return Err(PilotError::Timeout);
        }

        let response = extract_response(&handle, &sent.text).await;
        let message_id = if response.is_empty() {
            sent.id
        } else {
            self.history
                .append(
                    &session.conversation_key(),
                    NewRecord::text(Sender::Assistant, &response),
                )
                .await?
                .id
        };

        Ok(Response {
            response: Some(response),
            message_id: Some(message_id),
            duration_ms: Some(started.elapsed().as_millis() as u64),
            ..Response::ok()
        })
    }

    async fn send(&self, req: &Request) -> PilotResult<Response> {
        let (session, handle, sent) = self.deliver(req).await?;

        if session.is_remote() {
            match self.captures.try_acquire(&session.name) {
                Some(permit) => {
                    spawn_capture(
                        permit,
                        handle,
                        Arc::clone(&self.history),
                        session.conversation_key(),
                        sent.text.clone(),
                        &self.timings,
                    );
                }
                None => debug!(session = %session.name, "capture already in flight"),
            }
        }

        Ok(Response {
            message_id: Some(sent.id),
            ..Response::ok()
        })
    }

    async fn continue_session(&self, req: &Request) -> PilotResult<Response> {
        let name = req.require_session()?;
        let session = self.snapshot().await?.resolve_including_deleted(name)?;
        self.lifecycle.continue_session(&session).await?;
        Ok(Response::ok())
    }

    async fn kill(&self, req: &Request) -> PilotResult<Response> {
        let session = self.resolve(req.require_session()?).await?;
        self.typing.stop(&session.name);
        self.lifecycle.kill(&session).await?;
        Ok(Response::ok())
    }

    async fn history(&self, req: &Request) -> PilotResult<Response> {
        let session = self.resolve(req.require_session()?).await?;
        let from_filter = req
            .from_filter
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(str::parse::<Sender>)
            .transpose()?;

        let messages = self
            .history
            .read(
                &session.conversation_key(),
                req.after.unwrap_or(0),
                req.limit.unwrap_or(DEFAULT_READ_LIMIT),
                from_filter,
            )
            .await?;
        Ok(Response {
            messages: Some(messages),
            ..Response::ok()
        })
    }

    async fn screenshot(&self, req: &Request) -> PilotResult<Response> {
        let session = self.resolve(req.require_session()?).await?;
        let lines = req
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_SCREENSHOT_LINES);
        let pane = self.lifecycle.handle(&session).capture(lines).await?;
        Ok(Response {
            response: Some(pane),
            ..Response::ok()
        })
    }

    async fn questions(&self, req: &Request) -> PilotResult<Response> {
        let session = self.resolve(req.require_session()?).await?;
        let pane = self
            .lifecycle
            .handle(&session)
            .capture(QUESTION_WINDOW)
            .await?;
        Ok(Response {
            questions: Some(parse_questions(&pane)),
            ..Response::ok()
        })
    }

    async fn answer(&self, req: &Request) -> PilotResult<Response> {
        let name = req.require_session()?;
        let question_index = req.question_index.unwrap_or(0);
        if question_index != 0 {
            return Err(PilotError::InvalidRequest(format!(
                "question_index {question_index} out of range"
            )));
        }
        let option_index = req
            .option_index
            .ok_or_else(|| PilotError::InvalidRequest("option_index required".into()))?;

        let session = self.resolve(name).await?;
        let handle = self.lifecycle.handle(&session);
        let pane = handle.capture(QUESTION_WINDOW).await?;
        let questions = parse_questions(&pane);
        let question = questions.first();
        let keys = navigation_keys(question, option_index)?;

        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                sleep(ANSWER_KEY_GAP).await;
            }
            handle.send_keys(&[*key]).await?;
        }

        let label = question
            .and_then(|q| q.options.get(option_index))
            .map(|o| o.label.clone())
            .unwrap_or_else(|| format!("option {}", option_index + 1));
        info!(session = %session.name, option = %label, "question answered");
        Ok(Response {
            response: Some(format!("selected: {label}")),
            ..Response::ok()
        })
    }

    async fn forward(&self, req: &Request) -> PilotResult<Response> {
        let (name, text) = req.require_session_and_text()?;
        let session = self.resolve(name).await?;
        let handle = self
            .lifecycle
            .recover_for_delivery(&session, self.notifier.as_ref())
            .await?;

        let mut record = NewRecord::text(Sender::Human, text);
        let mut prompt = text.to_string();
        if let Some(path) = req.attachment.as_deref().filter(|p| !p.is_empty()) {
            let local = Path::new(path);
            if !tokio::fs::try_exists(local).await.unwrap_or(false) {
                return Err(PilotError::InvalidRequest(format!(
                    "attachment not found: {path}"
                )));
            }
            if session.is_remote() {
                handle.stage_file(local, path).await?;
            }
            record.media_kind = Some(media_kind_for(path));
            record.media_path = Some(path.to_string());
            prompt = format!("{text} {path}");
        }

        let stored = self
            .history
            .append(&session.conversation_key(), record)
            .await?;
        self.start_typing(&session, &handle);
        if let Err(e) = handle.deliver(&prompt).await {
            self.typing.stop(&session.name);
            return Err(PilotError::Transport(format!("failed to send: {e}")));
        }
        info!(session = %session.name, id = stored.id, "message forwarded");
        Ok(Response {
            message_id: Some(stored.id),
            ..Response::ok()
        })
    }

    fn start_typing(&self, session: &ResolvedSession, handle: &TerminalHandle) {
        if session.conversation_ref.is_none() {
            return;
        }
        self.typing.start(
            session.clone(),
            handle.clone(),
            Arc::clone(&self.notifier),
        );
    }

    /// Stream status changes for the requested sessions (all active ones
    /// when none are named) until the writer fails.
    pub async fn subscribe<W>(&self, req: &Request, writer: &mut W) -> PilotResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let names = match req.sessions.as_ref().filter(|s| !s.is_empty()) {
            Some(names) => names.clone(),
            None => self.snapshot().await?.active_names(),
        };
        write_event(writer, &Event::Subscribed { sessions: names.clone() }).await?;
        info!(sessions = names.len(), "subscriber attached");

        let mut last: HashMap<String, SessionStatus> = HashMap::new();
        let mut ticker = interval(self.timings.subscribe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of `interval` is immediate.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = match self.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(error = %e, "subscribe could not read registry");
                    continue;
                }
            };
            for name in &names {
                let Ok(session) = snapshot.resolve(name) else {
                    continue;
                };
                let status = self.lifecycle.status(&session).await;
                if last.get(name) == Some(&status) {
                    continue;
                }
                last.insert(name.clone(), status);
                write_event(
                    writer,
                    &Event::Status {
                        session: name.clone(),
                        status,
                    },
                )
                .await?;
            }
        }
    }
}

async fn write_event<W: AsyncWrite + Unpin>(writer: &mut W, event: &Event) -> PilotResult<()> {
    let line = line_encode(event)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Media kind recorded for an attachment, from its extension.
pub fn media_kind_for(path: &str) -> MediaKind {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" => MediaKind::Photo,
        "ogg" | "oga" | "opus" | "mp3" | "m4a" | "wav" => MediaKind::Voice,
        _ => MediaKind::Document,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentLaunch;
    use crate::notify::recording::RecordingNotifier;
    use crate::registry::{Host, RegistryFile, Session};
    use crate::transport::fake::{Call, FakeTerminal};
    use crate::transport::router::Router;
    use crate::transport::TerminalTransport;
    use panepilot_core::line_decode;

    const IDLE_EMPTY: &str = "❯ \n  ⏵⏵ bypass permissions on";
    const BUSY: &str = "❯\n  ctrl+c to interrupt";
    const REPLIED: &str = "❯ fix the build\n● Fixed the missing import.\n❯ \n";

    struct Fixture {
        dir: tempfile::TempDir,
        fake: Arc<FakeTerminal>,
        notifier: Arc<RecordingNotifier>,
        history: Arc<HistoryStore>,
        dispatcher: Dispatcher,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RegistryFile::default();
        file.hosts.insert(
            "box".into(),
            Host {
                address: "dev@box".into(),
                projects_dir: "~/src".into(),
            },
        );
        file.sessions.insert(
            "web".into(),
            Session {
                conversation_ref: Some("42".into()),
                path: "/srv/web".into(),
                ..Session::default()
            },
        );
        file.sessions.insert(
            "box:api".into(),
            Session {
                host: "box".into(),
                ..Session::default()
            },
        );
        file.sessions.insert(
            "gone".into(),
            Session {
                path: "/srv/gone".into(),
                deleted: true,
                ..Session::default()
            },
        );
        let registry_path = dir.path().join("registry.json");
        std::fs::write(&registry_path, serde_json::to_vec(&file).unwrap()).unwrap();
        let registry = Arc::new(SessionRegistry::new(registry_path));

        let history = Arc::new(
            HistoryStore::open(dir.path().join("history"))
                .await
                .unwrap(),
        );
        let fake = Arc::new(FakeTerminal::new());
        let local: Arc<dyn TerminalTransport> = fake.clone();
        let remote = local.clone();
        let router = Router::new(local, Arc::new(move |_: &str| remote.clone()));
        let timings = Timings::default();
        let lifecycle = Arc::new(LifecycleManager::new(
            router,
            registry.clone(),
            AgentLaunch::default(),
            &timings,
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Dispatcher::new(
            registry,
            lifecycle,
            history.clone(),
            notifier.clone(),
            timings,
        );
        Fixture {
            dir,
            fake,
            notifier,
            history,
            dispatcher,
        }
    }

    fn req(json: &str) -> Request {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn ping_reports_active_sessions() {
        let f = fixture().await;
        let resp = f.dispatcher.dispatch(&req(r#"{"cmd":"ping"}"#)).await;
        assert!(resp.ok);
        assert_eq!(resp.sessions_active, Some(2));
        assert_eq!(resp.version.as_deref(), Some(PROTOCOL_VERSION));
        assert!(f.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn protocol_errors() {
        let f = fixture().await;
        let resp = f.dispatcher.dispatch(&req(r#"{"cmd":"reboot"}"#)).await;
        assert_eq!(resp.error.as_deref(), Some("unknown command: reboot"));

        let resp = f.dispatcher.dispatch(&req(r#"{"cmd":"ask","session":"web"}"#)).await;
        assert_eq!(resp.error.as_deref(), Some("session and text required"));

        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"send","session":"gone","text":"hi"}"#))
            .await;
        assert_eq!(resp.error.as_deref(), Some("session not found: gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_lists_live_status() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.set_pane("claude-web", BUSY);

        let resp = f.dispatcher.dispatch(&req(r#"{"cmd":"sessions"}"#)).await;
        let sessions = resp.sessions.unwrap();
        let by_name: HashMap<_, _> = sessions.iter().map(|s| (s.name.as_str(), s)).collect();
        assert_eq!(by_name["web"].status, SessionStatus::Active);
        assert_eq!(by_name["web"].host, "local");
        assert_eq!(by_name["box:api"].status, SessionStatus::Stopped);
        assert_eq!(by_name["box:api"].host, "box");
        assert!(!by_name.contains_key("gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn ask_waits_for_settle_and_records_both_sides() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.set_pane("claude-web", REPLIED);

        let resp = f
            .dispatcher
            .dispatch(&req(
                r#"{"cmd":"ask","session":"web","text":"fix the build","from":"planner"}"#,
            ))
            .await;
        assert!(resp.ok, "{:?}", resp.error);
        assert_eq!(resp.response.as_deref(), Some("Fixed the missing import."));
        // 2s submit settle, 500ms warm-up, then two idle polls 2s apart.
        assert_eq!(resp.duration_ms, Some(6_500));

        let records = f.history.read("42", 0, 0, None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].from, Sender::Api);
        assert_eq!(records[0].agent.as_deref(), Some("planner"));
        assert_eq!(records[1].from, Sender::Assistant);
        assert_eq!(resp.message_id, Some(records[1].id));

        assert!(f.fake.calls().contains(&Call::Literal {
            name: "claude-web".into(),
            text: "fix the build".into(),
        }));
        assert_eq!(f.notifier.notices(), ["🤖 [planner] fix the build"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_ask_with_same_reply_records_each_turn() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.set_pane("claude-web", REPLIED);

        let ask = r#"{"cmd":"ask","session":"web","text":"fix the build"}"#;
        let first = f.dispatcher.dispatch(&req(ask)).await;
        let second = f.dispatcher.dispatch(&req(ask)).await;
        assert!(first.ok && second.ok);
        assert_eq!(first.response, second.response);
        assert!(second.message_id > first.message_id);

        let replies = f
            .history
            .read("42", 0, 0, Some(Sender::Assistant))
            .await
            .unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(second.message_id, Some(replies[1].id));
    }

    #[tokio::test(start_paused = true)]
    async fn ask_times_out_without_prompt() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.set_pane("claude-web", "● working");

        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"ask","session":"web","text":"hello"}"#))
            .await;
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("timeout waiting for response"));
        assert!(!f.dispatcher.typing().is_running("web"));
        // The outgoing message stays recorded.
        assert_eq!(f.history.read("42", 0, 0, None).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_send_spawns_one_capture() {
        let f = fixture().await;
        f.fake.add_session("claude-api");
        f.fake.set_pane("claude-api", BUSY);

        let send = r#"{"cmd":"send","session":"box:api","text":"run tests"}"#;
        let first = f.dispatcher.dispatch(&req(send)).await;
        assert!(first.ok, "{:?}", first.error);
        assert!(f.dispatcher.captures().is_active("box:api"));

        let second = f.dispatcher.dispatch(&req(send)).await;
        assert!(second.ok);
        assert!(second.message_id > first.message_id);
        assert!(f.dispatcher.captures().is_active("box:api"));
    }

    #[tokio::test(start_paused = true)]
    async fn local_send_does_not_capture() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.set_pane("claude-web", IDLE_EMPTY);

        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"send","session":"web","text":"go"}"#))
            .await;
        assert!(resp.ok);
        assert!(!f.dispatcher.captures().is_active("web"));
        assert_eq!(f.fake.count(|c| matches!(c, Call::Submit(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn history_filters_by_sender() {
        let f = fixture().await;
        f.history
            .append("42", NewRecord::text(Sender::Human, "hi"))
            .await
            .unwrap();
        f.history.append_assistant_dedup("42", "hello").await.unwrap();

        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"history","session":"web","from_filter":"claude"}"#))
            .await;
        let messages = resp.messages.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello");

        let bad = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"history","session":"web","from_filter":"bot"}"#))
            .await;
        assert!(!bad.ok);
    }

    #[tokio::test]
    async fn history_of_deleted_session_is_not_found() {
        let f = fixture().await;
        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"history","session":"gone"}"#))
            .await;
        assert_eq!(resp.error.as_deref(), Some("session not found: gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn screenshot_defaults_to_fifty_lines() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.set_pane("claude-web", "pane text");

        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"screenshot","session":"web"}"#))
            .await;
        assert_eq!(resp.response.as_deref(), Some("pane text"));
        assert!(f.fake.calls().contains(&Call::Capture {
            name: "claude-web".into(),
            lines: 50,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn answer_moves_cursor_and_confirms() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.set_pane(
            "claude-web",
            " Pick a runtime\n ❯ 1. tokio\n   2. async-std\n   3. smol\n Enter to select · Esc to cancel",
        );

        let questions = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"questions","session":"web"}"#))
            .await
            .questions
            .unwrap();
        assert_eq!(questions[0].question, "Pick a runtime");

        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"answer","session":"web","question_index":0,"option_index":2}"#))
            .await;
        assert_eq!(resp.response.as_deref(), Some("selected: smol"));
        let keys: Vec<Vec<String>> = f
            .fake
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Keys { keys, .. } => Some(keys),
                _ => None,
            })
            .collect();
        assert_eq!(keys, [vec!["Down"], vec!["Down"], vec!["Enter"]]);

        let bad = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"answer","session":"web","question_index":1,"option_index":0}"#))
            .await;
        assert!(!bad.ok);
    }

    #[tokio::test(start_paused = true)]
    async fn forward_restarts_crashed_agent_and_records_attachment() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake
            .push_panes("claude-web", &["user@host:/srv/web$ ", IDLE_EMPTY]);
        let image = f.dir.path().join("shot.png");
        std::fs::write(&image, b"png").unwrap();

        let request = Request {
            attachment: Some(image.display().to_string()),
            ..Request::new(Command::Forward)
                .with_session("web")
                .with_text("what is this?")
        };
        let resp = f.dispatcher.dispatch(&request).await;
        assert!(resp.ok, "{:?}", resp.error);

        let notices = f.notifier.notices();
        assert_eq!(notices.len(), 2);
        let records = f.history.read("42", 0, 0, None).await.unwrap();
        assert_eq!(records[0].media_kind, Some(MediaKind::Photo));
        assert!(f.fake.calls().iter().any(|c| matches!(
            c,
            Call::Literal { text, .. } if text.starts_with("what is this? /")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn kill_soft_deletes_and_continue_revives() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.set_pane("claude-web", IDLE_EMPTY);

        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"kill","session":"web"}"#))
            .await;
        assert!(resp.ok);
        let resp = f.dispatcher.dispatch(&req(r#"{"cmd":"ping"}"#)).await;
        assert_eq!(resp.sessions_active, Some(1));

        let resp = f
            .dispatcher
            .dispatch(&req(r#"{"cmd":"continue","session":"web"}"#))
            .await;
        assert!(resp.ok, "{:?}", resp.error);
        let resp = f.dispatcher.dispatch(&req(r#"{"cmd":"ping"}"#)).await;
        assert_eq!(resp.sessions_active, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_emits_changes_only() {
        let f = fixture().await;
        f.fake.add_session("claude-web");
        f.fake.push_panes("claude-web", &[BUSY, BUSY, IDLE_EMPTY]);

        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = req(r#"{"cmd":"subscribe","sessions":["web"]}"#);
        let stream = async {
            let _ = f.dispatcher.subscribe(&request, &mut server).await;
        };
        // Four polls: busy, busy, idle, idle.
        let _ = tokio::time::timeout(Duration::from_secs(21), stream).await;

        let mut buf = vec![0u8; 4096];
        let n = tokio::io::AsyncReadExt::read(&mut client, &mut buf).await.unwrap();
        let events: Vec<Event> = buf[..n]
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| line_decode(l).unwrap())
            .collect();
        assert_eq!(
            events,
            [
                Event::Subscribed {
                    sessions: vec!["web".into()]
                },
                Event::Status {
                    session: "web".into(),
                    status: SessionStatus::Active
                },
                Event::Status {
                    session: "web".into(),
                    status: SessionStatus::Idle
                },
            ]
        );
    }

    #[test]
    fn attachment_kinds() {
        assert_eq!(media_kind_for("/tmp/a.JPG"), MediaKind::Photo);
        assert_eq!(media_kind_for("/tmp/note.ogg"), MediaKind::Voice);
        assert_eq!(media_kind_for("/tmp/notes.pdf"), MediaKind::Document);
        assert_eq!(media_kind_for("/tmp/noext"), MediaKind::Document);
    }
}
