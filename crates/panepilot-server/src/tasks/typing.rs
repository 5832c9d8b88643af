//! Typing indicator while the agent works.
//!
//! One task per session. Starting a new one cancels the previous task for
//! that session; a task also ends on a settled idle reading or at its cap.

use crate::agent::poll::IdleDebouncer;
use crate::agent::state::{probe_state, AgentState};
use crate::config::Timings;
use crate::notify::ActivityNotifier;
use crate::registry::ResolvedSession;
use crate::transport::TerminalHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Tasks {
    next_generation: u64,
    by_session: HashMap<String, Entry>,
}

/// Per-session typing tasks and their cancellation tokens.
#[derive(Debug)]
pub struct TypingRegistry {
    tasks: Mutex<Tasks>,
    check_interval: Duration,
    signal_interval: Duration,
    cap: Duration,
}

impl TypingRegistry {
    pub fn new(timings: &Timings) -> Self {
        Self {
            tasks: Mutex::new(Tasks::default()),
            check_interval: timings.typing_check,
            signal_interval: timings.typing_signal,
            cap: timings.typing_cap,
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start signalling for `session`, replacing any running task for it.
    pub fn start(
        self: &Arc<Self>,
        session: ResolvedSession,
        handle: TerminalHandle,
        notifier: Arc<dyn ActivityNotifier>,
    ) -> JoinHandle<()> {
        let token = CancellationToken::new();
        let generation = {
            let mut tasks = self.tasks();
            tasks.next_generation += 1;
            let generation = tasks.next_generation;
            let previous = tasks.by_session.insert(
                session.name.clone(),
                Entry {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.token.cancel();
            }
            generation
        };

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry
                .run(&session, &handle, notifier.as_ref(), &token)
                .await;
            registry.finish(&session.name, generation);
        })
    }

    /// Cancel the task for `session`, if any.
    pub fn stop(&self, session: &str) {
        if let Some(entry) = self.tasks().by_session.remove(session) {
            entry.token.cancel();
        }
    }

    pub fn stop_all(&self) {
        for (_, entry) in self.tasks().by_session.drain() {
            entry.token.cancel();
        }
    }

    pub fn is_running(&self, session: &str) -> bool {
        self.tasks().by_session.contains_key(session)
    }

    /// Forget the entry unless a newer task has replaced it.
    fn finish(&self, session: &str, generation: u64) {
        let mut tasks = self.tasks();
        if tasks
            .by_session
            .get(session)
            .is_some_and(|e| e.generation == generation)
        {
            tasks.by_session.remove(session);
        }
    }

    async fn run(
        &self,
        session: &ResolvedSession,
        handle: &TerminalHandle,
        notifier: &dyn ActivityNotifier,
        token: &CancellationToken,
    ) {
        notifier.activity(session).await;

        let start = Instant::now();
        let deadline = start + self.cap;
        let mut check = interval_at(start + self.check_interval, self.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_signal = start;
        let mut debouncer = IdleDebouncer::default();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(session = %session.name, "typing cancelled");
                    return;
                }
                _ = sleep_until(deadline) => {
                    debug!(session = %session.name, "typing reached its cap");
                    return;
                }
                _ = check.tick() => {
                    let state = probe_state(handle).await;
                    if debouncer.observe(state) {
                        debug!(session = %session.name, "agent settled, typing stopped");
                        return;
                    }
                    if state == AgentState::Busy && last_signal.elapsed() >= self.signal_interval {
                        notifier.activity(session).await;
                        last_signal = Instant::now();
                    }
                }
            }
        }
    }
}
