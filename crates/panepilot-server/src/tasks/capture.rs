//! Background reply capture for non-blocking sends to remote sessions.
//!
//! At most one capture runs per session. The permit taken before spawning
//! is released when the task ends, however it ends.

use crate::agent::extractor::extract_response;
use crate::agent::poll::{wait_until_settled, PollOutcome, PollPolicy};
use crate::agent::state::probe_state;
use crate::config::Timings;
use crate::history::{HistoryStore, Stored};
use crate::transport::TerminalHandle;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Set of sessions with a capture in flight.
#[derive(Debug, Default)]
pub struct CaptureGuard {
    active: Mutex<HashSet<String>>,
}

impl CaptureGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the session, or `None` if a capture already holds it.
    pub fn try_acquire(self: &Arc<Self>, session: &str) -> Option<CapturePermit> {
        if !self.active().insert(session.to_string()) {
            return None;
        }
        Some(CapturePermit {
            guard: Arc::clone(self),
            session: session.to_string(),
        })
    }

    pub fn release(&self, session: &str) {
        self.active().remove(session);
    }

    pub fn is_active(&self, session: &str) -> bool {
        self.active().contains(session)
    }
}

/// Exclusive claim on one session's capture slot.
#[derive(Debug)]
pub struct CapturePermit {
    guard: Arc<CaptureGuard>,
    session: String,
}

impl CapturePermit {
    pub fn session(&self) -> &str {
        &self.session
    }
}

impl Drop for CapturePermit {
    fn drop(&mut self) {
        self.guard.release(&self.session);
    }
}

/// Wait for the agent to settle, then store its reply unless an identical
/// one is already the newest assistant record.
pub fn spawn_capture(
    permit: CapturePermit,
    handle: TerminalHandle,
    history: Arc<HistoryStore>,
    conversation: String,
    sent_text: String,
    timings: &Timings,
) -> JoinHandle<()> {
    let policy = PollPolicy {
        initial_delay: timings.capture_delay,
        interval: timings.capture_interval,
        ceiling: timings.capture_timeout,
    };

    tokio::spawn(async move {
        // Dropped with the task, freeing the slot.
        let permit = permit;
        let session = permit.session();

        if wait_until_settled(policy, || probe_state(&handle)).await == PollOutcome::TimedOut {
            warn!(session = %session, "background capture timed out");
            return;
        }

        let response = extract_response(&handle, &sent_text).await;
        if response.is_empty() {
            debug!(session = %session, "background capture found no reply");
            return;
        }

        match history.append_assistant_dedup(&conversation, &response).await {
            Ok(Stored::Appended(id)) => info!(session = %session, id, "captured reply"),
            Ok(Stored::Duplicate(id)) => {
                debug!(session = %session, id, "reply already stored")
            }
            Err(e) => warn!(session = %session, error = %e, "failed to store captured reply"),
        }
    })
}
