//! Keeping a session's terminal and agent alive.
//!
//! Every entry point re-resolves routing through the [`Router`]. A crashed
//! agent gets exactly one restart per request; a second failure is returned
//! to the caller.

use crate::agent::state::{probe_running, probe_state, AgentState};
use crate::config::{AgentLaunch, Timings};
use crate::notify::ActivityNotifier;
use crate::registry::{ResolvedSession, SessionRegistry};
use crate::transport::router::Router;
use crate::transport::{is_duplicate_session, TerminalHandle};
use panepilot_core::{PilotError, PilotResult, SessionStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Wait before answering the permissions confirmation on a fresh agent.
const BYPASS_PROMPT_DELAY: Duration = Duration::from_secs(2);

/// Gap between the keys that accept the permissions confirmation.
const BYPASS_KEY_GAP: Duration = Duration::from_millis(100);

/// Creates, verifies and restarts agent sessions.
pub struct LifecycleManager {
    router: Router,
    registry: Arc<SessionRegistry>,
    agent: AgentLaunch,
    startup_settle: Duration,
    restart_settle: Duration,
    /// Sessions being created or restarted right now, with the number of
    /// overlapping attempts.
    starting: Arc<Mutex<HashMap<String, usize>>>,
}

/// Marks a session as starting until dropped.
struct StartingMark {
    marks: Arc<Mutex<HashMap<String, usize>>>,
    name: String,
}

impl Drop for StartingMark {
    fn drop(&mut self) {
        let mut marks = lock(&self.marks);
        if let Some(count) = marks.get_mut(&self.name) {
            *count -= 1;
            if *count == 0 {
                marks.remove(&self.name);
            }
        }
    }
}

fn lock(marks: &Mutex<HashMap<String, usize>>) -> MutexGuard<'_, HashMap<String, usize>> {
    marks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LifecycleManager {
    pub fn new(
        router: Router,
        registry: Arc<SessionRegistry>,
        agent: AgentLaunch,
        timings: &Timings,
    ) -> Self {
        Self {
            router,
            registry,
            agent,
            startup_settle: timings.startup_settle,
            restart_settle: timings.restart_settle,
            starting: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A handle on the session without touching it.
    pub fn handle(&self, session: &ResolvedSession) -> TerminalHandle {
        self.router.handle(session)
    }

    /// Make sure the terminal session exists and the agent is up in it.
    pub async fn ensure_running(&self, session: &ResolvedSession) -> PilotResult<TerminalHandle> {
        self.bring_up(session, None).await
    }

    /// Like [`ensure_running`](Self::ensure_running), but a crashed agent is
    /// reported through `notifier` before and after the restart.
    pub async fn recover_for_delivery(
        &self,
        session: &ResolvedSession,
        notifier: &dyn ActivityNotifier,
    ) -> PilotResult<TerminalHandle> {
        self.bring_up(session, Some(notifier)).await
    }

    async fn bring_up(
        &self,
        session: &ResolvedSession,
        notifier: Option<&dyn ActivityNotifier>,
    ) -> PilotResult<TerminalHandle> {
        let handle = self.router.handle(session);

        if !handle.exists().await? {
            let _mark = self.mark_starting(&session.name);
            if self.create(&handle, session).await? {
                // Only a session we created needs time to boot.
                sleep(self.startup_settle).await;
            }
        }

        if probe_running(&handle).await {
            return Ok(handle);
        }

        warn!(session = %session.name, "agent not running, restarting");
        if let Some(notifier) = notifier {
            notifier
                .notice(session, "🔄 Session interrupted, restarting...")
                .await;
        }

        let restarted = {
            let _mark = self.mark_starting(&session.name);
            self.restart(&handle, session).await
        };
        if let Some(notifier) = notifier {
            let text = match &restarted {
                Ok(()) => "✅ Session restarted",
                Err(_) => "❌ Failed to restart the agent. Use continue to restart manually.",
            };
            notifier.notice(session, text).await;
        }
        restarted.map(|()| handle)
    }

    /// Tear the terminal down and start the agent again, continuing its
    /// last conversation. Revives a soft-deleted session.
    pub async fn continue_session(&self, session: &ResolvedSession) -> PilotResult<()> {
        self.registry.set_deleted(&session.name, false).await?;

        let handle = self.router.handle(session);
        let _mark = self.mark_starting(&session.name);

        if handle.exists().await? {
            handle.kill().await?;
        }
        self.create(&handle, session).await?;
        sleep(self.startup_settle).await;

        if !probe_running(&handle).await {
            self.restart(&handle, session).await?;
        }
        info!(session = %session.name, "session continued");
        Ok(())
    }

    /// Kill the terminal session and soft-delete the registry entry.
    pub async fn kill(&self, session: &ResolvedSession) -> PilotResult<()> {
        let handle = self.router.handle(session);
        if handle.exists().await? {
            handle.kill().await?;
        }
        self.registry.set_deleted(&session.name, true).await?;
        info!(session = %session.name, "session killed");
        Ok(())
    }

    /// Externally reported status, probed live.
    pub async fn status(&self, session: &ResolvedSession) -> SessionStatus {
        if self.is_starting(&session.name) {
            return SessionStatus::Starting;
        }
        let handle = self.router.handle(session);
        match handle.exists().await {
            Ok(true) => {}
            Ok(false) => return SessionStatus::Stopped,
            Err(e) => {
                debug!(session = %session.name, error = %e, "status probe failed");
                return SessionStatus::Stopped;
            }
        }
        status_of(probe_state(&handle).await)
    }

    pub fn is_starting(&self, name: &str) -> bool {
        lock(&self.starting).contains_key(name)
    }

    fn mark_starting(&self, name: &str) -> StartingMark {
        *lock(&self.starting).entry(name.to_string()).or_insert(0) += 1;
        StartingMark {
            marks: Arc::clone(&self.starting),
            name: name.to_string(),
        }
    }

    /// Create the terminal session and launch the agent, continuing its
    /// previous conversation. False when someone else created it first.
    async fn create(&self, handle: &TerminalHandle, session: &ResolvedSession) -> PilotResult<bool> {
        let command = self.agent.command_line(true);
        match handle.create(&session.cwd, &command).await {
            Ok(()) => {}
            Err(e) if is_duplicate_session(&e) => {
                debug!(session = %session.name, "session created concurrently");
                return Ok(false);
            }
            Err(e) => return Err(PilotError::StartFailed(e.to_string())),
        }
        info!(session = %session.name, cwd = %session.cwd, "agent launched");

        if self.agent.confirm_bypass_prompt {
            sleep(BYPASS_PROMPT_DELAY).await;
            if let Err(e) = self.accept_bypass_prompt(handle).await {
                debug!(session = %session.name, error = %e, "could not answer permissions prompt");
            }
        }
        Ok(true)
    }

    async fn accept_bypass_prompt(&self, handle: &TerminalHandle) -> PilotResult<()> {
        handle.send_keys(&["Down"]).await?;
        sleep(BYPASS_KEY_GAP).await;
        handle.send_keys(&["Enter"]).await
    }

    /// The single restart attempt: relaunch in the existing shell and check.
    async fn restart(&self, handle: &TerminalHandle, session: &ResolvedSession) -> PilotResult<()> {
        let command = self.agent.command_line(true);
        handle.send_keys(&[command.as_str(), "C-m"]).await?;
        sleep(self.restart_settle).await;

        if probe_running(handle).await {
            info!(session = %session.name, "agent restarted");
            Ok(())
        } else {
            Err(PilotError::RestartFailed(session.name.clone()))
        }
    }
}

/// Map an inferred agent state to the reported status.
pub fn status_of(state: AgentState) -> SessionStatus {
    match state {
        AgentState::Busy => SessionStatus::Active,
        AgentState::Idle | AgentState::Unknown => SessionStatus::Idle,
    }
}
