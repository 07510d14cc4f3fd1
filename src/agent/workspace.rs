//! `WorkspaceManager` — routes `(channel, chatID, sender, is_group)` to a
//! `Workspace` + `Session` pair (spec §4.5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::agent::session::{Session, SessionId};
use crate::config::WorkspaceConfigEntry;
use crate::model::{Workspace, WorkspaceOverrides};

/// A resolved workspace + its session for one `(channel, chat)` pair.
pub struct Resolved {
    pub workspace: Arc<Workspace>,
    pub session: Arc<Session>,
}

struct TrackedSession {
    session: Arc<Session>,
    last_touched: Instant,
}

const DEFAULT_WORKSPACE_ID: &str = "default";

/// Holds the statically-configured workspace table and lazily creates one
/// `Session` per `(workspace, channel, chat)` that routes to it.
pub struct WorkspaceManager {
    workspaces: HashMap<String, (Arc<Workspace>, WorkspaceConfigEntry)>,
    sessions: RwLock<HashMap<SessionId, TrackedSession>>,
    sessions_dir: Option<PathBuf>,
    idle_ttl: Duration,
}

impl WorkspaceManager {
    pub fn new(entries: &[WorkspaceConfigEntry], sessions_dir: Option<PathBuf>, idle_ttl: Duration) -> Self {
        let mut workspaces = HashMap::new();
        for entry in entries {
            let workspace = Arc::new(Workspace {
                id: entry.id.clone(),
                display_name: entry.display_name.clone(),
                overrides: WorkspaceOverrides {
                    instructions: entry.instructions.clone(),
                    model: entry.model.clone(),
                    language: entry.language.clone(),
                    trigger: entry.trigger.clone(),
                    skill_allowlist: entry.skill_allowlist.clone(),
                    root_dir: entry.root_dir.clone(),
                },
            });
            workspaces.insert(entry.id.clone(), (workspace, entry.clone()));
        }
        workspaces.entry(DEFAULT_WORKSPACE_ID.to_string()).or_insert_with(|| {
            let entry = WorkspaceConfigEntry {
                id: DEFAULT_WORKSPACE_ID.to_string(),
                display_name: "Default".to_string(),
                ..Default::default()
            };
            let workspace = Arc::new(Workspace {
                id: entry.id.clone(),
                display_name: entry.display_name.clone(),
                overrides: WorkspaceOverrides::default(),
            });
            (workspace, entry)
        });

        Self {
            workspaces,
            sessions: RwLock::new(HashMap::new()),
            sessions_dir,
            idle_ttl,
        }
    }

    /// Resolution order: `groups[chat] → members[sender] → default`.
    fn resolve_workspace_id(&self, chat_id: &str, sender_id: &str, is_group: bool) -> String {
        for (id, (_, entry)) in &self.workspaces {
            if is_group && entry.groups.iter().any(|g| g == chat_id) {
                return id.clone();
            }
        }
        for (id, (_, entry)) in &self.workspaces {
            if !is_group && entry.members.iter().any(|m| m == sender_id) {
                return id.clone();
            }
        }
        DEFAULT_WORKSPACE_ID.to_string()
    }

    fn journal_path(&self, session_id: &SessionId) -> Option<PathBuf> {
        self.sessions_dir
            .as_ref()
            .map(|dir| dir.join(session_id.as_filename()))
    }

    fn create_session(&self, session_id: SessionId) -> Arc<Session> {
        match self.journal_path(&session_id) {
            Some(path) if path.exists() => Arc::new(Session::load(session_id, path)),
            Some(path) => Arc::new(Session::with_journal(session_id, path)),
            None => Arc::new(Session::new(session_id)),
        }
    }

    /// Resolve `(channel, chatID, sender, is_group)` to a workspace and its
    /// fetched-or-created session.
    pub fn resolve(&self, channel: &str, chat_id: &str, sender_id: &str, is_group: bool) -> Resolved {
        let workspace_id = self.resolve_workspace_id(chat_id, sender_id, is_group);
        let (workspace, _) = self
            .workspaces
            .get(&workspace_id)
            .or_else(|| self.workspaces.get(DEFAULT_WORKSPACE_ID))
            .expect("default workspace entry is always present");

        let session_id = SessionId::new(workspace_id, channel, chat_id);

        {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            if let Some(tracked) = sessions.get_mut(&session_id) {
                tracked.last_touched = Instant::now();
                return Resolved {
                    workspace: workspace.clone(),
                    session: tracked.session.clone(),
                };
            }
        }

        let session = self.create_session(session_id.clone());
        self.sessions.write().unwrap_or_else(|e| e.into_inner()).insert(
            session_id,
            TrackedSession {
                session: session.clone(),
                last_touched: Instant::now(),
            },
        );

        Resolved {
            workspace: workspace.clone(),
            session,
        }
    }

    pub fn get_workspace(&self, id: &str) -> Option<Arc<Workspace>> {
        self.workspaces.get(id).map(|(w, _)| w.clone())
    }

    /// Drop in-memory session objects idle longer than `idle_ttl`. Their
    /// journal files (if any) persist on disk and are reloaded lazily on
    /// the next `resolve`.
    pub fn prune_idle(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, tracked| tracked.last_touched.elapsed() < self.idle_ttl);
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
