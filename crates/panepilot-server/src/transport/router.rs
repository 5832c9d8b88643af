//! Picks the local or remote transport for a session.

use super::remote::RemoteShell;
use super::{TerminalHandle, TerminalTransport};
use crate::config::RemoteSettings;
use crate::registry::ResolvedSession;
use std::sync::Arc;

/// Builds a transport for a remote address.
pub type RemoteConnector = Arc<dyn Fn(&str) -> Arc<dyn TerminalTransport> + Send + Sync>;

/// The single local/remote routing decision.
#[derive(Clone)]
pub struct Router {
    local: Arc<dyn TerminalTransport>,
    connect_remote: RemoteConnector,
}

impl Router {
    pub fn new(local: Arc<dyn TerminalTransport>, connect_remote: RemoteConnector) -> Self {
        Self {
            local,
            connect_remote,
        }
    }

    /// Route remote sessions through ssh with the given settings.
    pub fn with_ssh(local: Arc<dyn TerminalTransport>, settings: RemoteSettings) -> Self {
        let connect_remote: RemoteConnector = Arc::new(move |address: &str| {
            Arc::new(RemoteShell::new(address, settings.clone())) as Arc<dyn TerminalTransport>
        });
        Self::new(local, connect_remote)
    }

    pub fn handle(&self, session: &ResolvedSession) -> TerminalHandle {
        let transport = match &session.address {
            Some(address) => (self.connect_remote)(address),
            None => Arc::clone(&self.local),
        };
        TerminalHandle::new(transport, session.tmux_name.clone())
    }
}
