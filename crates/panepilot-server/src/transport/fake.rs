//! Scripted in-memory transport for tests.

use super::TerminalTransport;
use async_trait::async_trait;
use panepilot_core::{PilotError, PilotResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Exists(String),
    Create { name: String, cwd: String, command: String },
    Literal { name: String, text: String },
    Submit(String),
    Keys { name: String, keys: Vec<String> },
    Capture { name: String, lines: usize },
    Kill(String),
    Prepare(String),
    Stage { local: String, remote: String },
}

#[derive(Default)]
struct State {
    sessions: HashSet<String>,
    /// Queued pane frames; the last one repeats once the queue drains.
    panes: HashMap<String, VecDeque<String>>,
    calls: Vec<Call>,
    create_error: Option<String>,
}

/// Records calls and serves pane captures from a per-session queue.
#[derive(Default)]
pub struct FakeTerminal {
    state: Mutex<State>,
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, name: &str) {
        self.state.lock().unwrap().sessions.insert(name.to_string());
    }

    pub fn has_session(&self, name: &str) -> bool {
        self.state.lock().unwrap().sessions.contains(name)
    }

    /// Queue frames served by successive captures.
    pub fn push_panes(&self, name: &str, frames: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let queue = state.panes.entry(name.to_string()).or_default();
        queue.extend(frames.iter().map(|f| f.to_string()));
    }

    /// Replace the queue with a single repeating frame.
    pub fn set_pane(&self, name: &str, frame: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .panes
            .insert(name.to_string(), VecDeque::from([frame.to_string()]));
    }

    pub fn fail_create(&self, message: &str) {
        self.state.lock().unwrap().create_error = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl TerminalTransport for FakeTerminal {
    async fn session_exists(&self, name: &str) -> PilotResult<bool> {
        self.record(Call::Exists(name.to_string()));
        Ok(self.has_session(name))
    }

    async fn create_session(&self, name: &str, cwd: &str, command: &str) -> PilotResult<()> {
        self.record(Call::Create {
            name: name.to_string(),
            cwd: cwd.to_string(),
            command: command.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.create_error.clone() {
            return Err(PilotError::Transport(message));
        }
        state.sessions.insert(name.to_string());
        Ok(())
    }

    async fn send_literal_text(&self, name: &str, text: &str) -> PilotResult<()> {
        self.record(Call::Literal {
            name: name.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_submit(&self, name: &str) -> PilotResult<()> {
        self.record(Call::Submit(name.to_string()));
        Ok(())
    }

    async fn send_keys(&self, name: &str, keys: &[&str]) -> PilotResult<()> {
        self.record(Call::Keys {
            name: name.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        });
        Ok(())
    }

    async fn capture_pane(&self, name: &str, lines: usize) -> PilotResult<String> {
        self.record(Call::Capture {
            name: name.to_string(),
            lines,
        });
        let mut state = self.state.lock().unwrap();
        if !state.sessions.contains(name) {
            return Err(PilotError::Transport(format!(
                "failed to capture pane: can't find session: {name}"
            )));
        }
        let Some(queue) = state.panes.get_mut(name) else {
            return Ok(String::new());
        };
        let frame = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(frame.unwrap_or_default())
    }

    async fn kill_session(&self, name: &str) -> PilotResult<()> {
        self.record(Call::Kill(name.to_string()));
        self.state.lock().unwrap().sessions.remove(name);
        Ok(())
    }

    async fn prepare_directory(&self, path: &str) -> PilotResult<()> {
        self.record(Call::Prepare(path.to_string()));
        Ok(())
    }

    async fn stage_file(&self, local_path: &Path, remote_path: &str) -> PilotResult<()> {
        self.record(Call::Stage {
            local: local_path.display().to_string(),
            remote: remote_path.to_string(),
        });
        Ok(())
    }
}
