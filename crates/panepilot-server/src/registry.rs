//! Session and host registry.
//!
//! The registry is a small JSON document owned by the operator's tooling.
//! It is re-read wholesale whenever a request needs it, and rewritten only to
//! flip a session's soft-delete marker.

use panepilot_core::{PilotError, PilotResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Prefix of every terminal-multiplexer session this daemon manages.
pub const TMUX_PREFIX: &str = "claude-";

/// A named remote execution target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Remote shell destination (`user@host`).
    pub address: String,
    /// Default working-directory root for projects on this host.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub projects_dir: String,
}

/// A named unit of agent work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Id of the messaging thread tied to this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_ref: Option<String>,
    /// Working directory of the agent. Empty means `<projects_dir>/<project>`.
    #[serde(default)]
    pub path: String,
    /// Host name, empty for local sessions.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Soft-delete marker.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// On-disk registry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
    #[serde(default)]
    pub hosts: BTreeMap<String, Host>,
}

/// Everything needed to reach one session, resolved from a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSession {
    pub name: String,
    pub tmux_name: String,
    pub cwd: String,
    /// Remote shell destination, `None` for local sessions.
    pub address: Option<String>,
    /// Host name as listed by `sessions` (`local` for local ones).
    pub host_label: String,
    pub conversation_ref: Option<String>,
}

impl ResolvedSession {
    pub fn is_remote(&self) -> bool {
        self.address.is_some()
    }

    /// Key of this session's history partition.
    pub fn conversation_key(&self) -> String {
        match &self.conversation_ref {
            Some(r) if !r.is_empty() => r.clone(),
            _ => format!("session-{}", self.name.replace(&['/', ':'][..], "_")),
        }
    }
}

/// A point-in-time view of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    file: RegistryFile,
}

impl RegistrySnapshot {
    pub fn new(file: RegistryFile) -> Self {
        Self { file }
    }

    /// Names of sessions that are not soft-deleted, sorted.
    pub fn active_names(&self) -> Vec<String> {
        self.file
            .sessions
            .iter()
            .filter(|(_, s)| !s.deleted)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.file.sessions.values().filter(|s| !s.deleted).count()
    }

    /// Resolve a non-deleted session.
    pub fn resolve(&self, name: &str) -> PilotResult<ResolvedSession> {
        match self.file.sessions.get(name) {
            Some(session) if !session.deleted => self.resolve_entry(name, session),
            _ => Err(PilotError::SessionNotFound(name.to_string())),
        }
    }

    /// Resolve a session even if it is soft-deleted.
    pub fn resolve_including_deleted(&self, name: &str) -> PilotResult<ResolvedSession> {
        let session = self
            .file
            .sessions
            .get(name)
            .ok_or_else(|| PilotError::SessionNotFound(name.to_string()))?;
        self.resolve_entry(name, session)
    }

    pub fn is_deleted(&self, name: &str) -> bool {
        self.file.sessions.get(name).is_some_and(|s| s.deleted)
    }

    fn resolve_entry(&self, name: &str, session: &Session) -> PilotResult<ResolvedSession> {
        let (_, project) = parse_session_target(name);

        let (address, projects_dir) = if session.host.is_empty() {
            (None, String::new())
        } else {
            let host = self
                .file
                .hosts
                .get(&session.host)
                .filter(|h| !h.address.is_empty())
                .ok_or_else(|| PilotError::HostNotConfigured(session.host.clone()))?;
            (Some(host.address.clone()), host.projects_dir.clone())
        };

        let cwd = if !session.path.is_empty() {
            session.path.clone()
        } else {
            default_working_directory(project, address.is_some(), &projects_dir)
        };

        Ok(ResolvedSession {
            name: name.to_string(),
            tmux_name: tmux_session_name(name),
            cwd,
            host_label: if session.host.is_empty() {
                "local".to_string()
            } else {
                session.host.clone()
            },
            address,
            conversation_ref: session.conversation_ref.clone(),
        })
    }
}

/// Loads and updates the registry file.
pub struct SessionRegistry {
    path: PathBuf,
    /// Serializes read-modify-write cycles from this process.
    write_lock: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Read the whole registry. A missing file is an empty registry.
    pub async fn snapshot(&self) -> PilotResult<RegistrySnapshot> {
        Ok(RegistrySnapshot::new(self.read_file().await?))
    }

    /// Set or clear a session's soft-delete marker.
    pub async fn set_deleted(&self, name: &str, deleted: bool) -> PilotResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        let session = file
            .sessions
            .get_mut(name)
            .ok_or_else(|| PilotError::SessionNotFound(name.to_string()))?;
        if session.deleted == deleted {
            return Ok(());
        }
        session.deleted = deleted;
        self.write_file(&file).await?;
        info!(session = %name, deleted, "registry updated");
        Ok(())
    }

    async fn read_file(&self) -> PilotResult<RegistryFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PilotError::Other(format!(
                    "registry parse error in {}: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "registry not found, treating as empty");
                Ok(RegistryFile::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, file: &RegistryFile) -> PilotResult<()> {
        use std::os::unix::fs::PermissionsExt;

        let data = serde_json::to_vec_pretty(file)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Split `host:project` into its parts. Paths (`/…`, `~/…`) are never
/// host-qualified.
pub fn parse_session_target(input: &str) -> (Option<&str>, &str) {
    if input.starts_with('/') || input.starts_with("~/") {
        return (None, input);
    }
    match input.find(':') {
        Some(idx) if idx > 0 => (Some(&input[..idx]), &input[idx + 1..]),
        _ => (None, input),
    }
}

/// Terminal-multiplexer session name for a registry name.
///
/// Dots become underscores since tmux reads them as window/pane separators.
pub fn tmux_session_name(name: &str) -> String {
    let (_, project) = parse_session_target(name);
    let base = Path::new(project)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| project.to_string());
    format!("{TMUX_PREFIX}{}", base.replace('.', "_"))
}

fn default_working_directory(project: &str, remote: bool, projects_dir: &str) -> String {
    if project.starts_with('/') {
        return project.to_string();
    }
    if remote {
        if project.starts_with("~/") {
            return project.to_string();
        }
        let root = if projects_dir.is_empty() { "~" } else { projects_dir };
        return format!("{}/{}", root.trim_end_matches('/'), project);
    }
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    match project.strip_prefix("~/") {
        Some(rest) => home.join(rest).to_string_lossy().into_owned(),
        None => home.join(project).to_string_lossy().into_owned(),
    }
}
