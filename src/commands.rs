//! `CommandInterpreter` — the closed set of admin/user commands recognized
//! before a message reaches the agent (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::access::AccessManager;
use crate::agent::runner::RunHandle;
use crate::agent::session::Session;
use crate::agent::workspace::WorkspaceManager;
use crate::compaction::Compactor;
use crate::event_bus::{AppEvent, EventBus};
use crate::model::{AccessLevel, ThinkingLevel};

/// A recognized command plus its arguments, prior to execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Allow { target: String },
    Block { target: String },
    Admin { target: String },
    Users,
    Status,
    Help,
    WorkspaceCreate { id: String },
    WorkspaceAssign { id: String, target: String },
    WorkspaceList,
    WorkspaceInfo { id: String },
    GroupAllow { chat_id: String },
    GroupBlock { chat_id: String },
    Think { level: ThinkingLevel },
    Stop,
    Compact,
    Approve,
    Deny,
    New,
    Reset,
}

/// Minimum caller level a command requires.
fn min_level(cmd: &Command) -> AccessLevel {
    use Command::*;
    match cmd {
        Allow { .. } | Block { .. } => AccessLevel::Admin,
        Admin { .. } => AccessLevel::Owner,
        Users | Status | Help => AccessLevel::User,
        WorkspaceCreate { .. } | WorkspaceAssign { .. } | WorkspaceList | WorkspaceInfo { .. } => AccessLevel::Admin,
        GroupAllow { .. } | GroupBlock { .. } => AccessLevel::Admin,
        Think { .. } | Stop | Compact | Approve | Deny | New | Reset => AccessLevel::User,
    }
}

/// Parse `content` as a recognized command. Returns `None` for anything
/// that doesn't start with `/` or doesn't match a known command shape —
/// the caller should fall through to the agent in that case.
pub fn parse(content: &str) -> Option<Command> {
    let content = content.trim();
    if !content.starts_with('/') {
        return None;
    }
    let mut parts = content.splitn(2, char::is_whitespace);
    let cmd = parts.next()?.to_lowercase();
    let rest = parts.next().unwrap_or("").trim();

    match cmd.as_str() {
        "/allow" if !rest.is_empty() => Some(Command::Allow { target: rest.to_string() }),
        "/block" if !rest.is_empty() => Some(Command::Block { target: rest.to_string() }),
        "/admin" if !rest.is_empty() => Some(Command::Admin { target: rest.to_string() }),
        "/users" => Some(Command::Users),
        "/status" => Some(Command::Status),
        "/help" => Some(Command::Help),
        "/ws" => parse_ws(rest),
        "/group" => parse_group(rest),
        "/think" => parse_think(rest),
        "/stop" => Some(Command::Stop),
        "/compact" => Some(Command::Compact),
        "/approve" => Some(Command::Approve),
        "/deny" => Some(Command::Deny),
        "/new" => Some(Command::New),
        "/reset" => Some(Command::Reset),
        _ => None,
    }
}

fn parse_ws(rest: &str) -> Option<Command> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    match parts.next()? {
        "create" => Some(Command::WorkspaceCreate { id: parts.next()?.trim().to_string() }),
        "assign" => {
            let mut args = parts.next()?.trim().splitn(2, char::is_whitespace);
            Some(Command::WorkspaceAssign {
                id: args.next()?.to_string(),
                target: args.next()?.trim().to_string(),
            })
        }
        "list" => Some(Command::WorkspaceList),
        "info" => Some(Command::WorkspaceInfo { id: parts.next()?.trim().to_string() }),
        _ => None,
    }
}

fn parse_group(rest: &str) -> Option<Command> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    match parts.next()? {
        "allow" => Some(Command::GroupAllow { chat_id: parts.next()?.trim().to_string() }),
        "block" => Some(Command::GroupBlock { chat_id: parts.next()?.trim().to_string() }),
        _ => None,
    }
}

fn parse_think(rest: &str) -> Option<Command> {
    let level = match rest {
        "off" => ThinkingLevel::Off,
        "low" => ThinkingLevel::Low,
        "medium" => ThinkingLevel::Medium,
        "high" => ThinkingLevel::High,
        _ => return None,
    };
    Some(Command::Think { level })
}

/// Error returned when a caller's access level is insufficient for the
/// command they issued.
#[derive(Debug, thiserror::Error)]
#[error("this command requires {required:?} access; you have {caller:?}")]
pub struct InsufficientLevel {
    pub caller: AccessLevel,
    pub required: AccessLevel,
}

/// Tracks the one pending tool-confirmation request per session, so
/// `/approve` and `/deny` know which `request_id` to resolve (spec §4.3,
/// §4.10). Populated by the assistant from `AppEvent::ConfirmationRequested`
/// and cleared once answered.
#[derive(Default)]
pub struct PendingConfirmations {
    by_session: Mutex<HashMap<String, String>>,
}

impl PendingConfirmations {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, session_id: &str, request_id: &str) {
        self.by_session.lock().unwrap_or_else(|e| e.into_inner()).insert(session_id.to_string(), request_id.to_string());
    }

    pub fn take(&self, session_id: &str) -> Option<String> {
        self.by_session.lock().unwrap_or_else(|e| e.into_inner()).remove(session_id)
    }
}

/// Executes parsed [`Command`]s against the assistant's shared state.
pub struct CommandInterpreter {
    access: Arc<AccessManager>,
    workspaces: Arc<WorkspaceManager>,
    bus: Arc<dyn EventBus>,
    pending_confirmations: Arc<PendingConfirmations>,
    active_runs: Arc<Mutex<HashMap<String, RunHandle>>>,
    compactor: Arc<Compactor>,
}

impl CommandInterpreter {
    pub fn new(
        access: Arc<AccessManager>,
        workspaces: Arc<WorkspaceManager>,
        bus: Arc<dyn EventBus>,
        pending_confirmations: Arc<PendingConfirmations>,
        active_runs: Arc<Mutex<HashMap<String, RunHandle>>>,
        compactor: Arc<Compactor>,
    ) -> Self {
        Self { access, workspaces, bus, pending_confirmations, active_runs, compactor }
    }

    /// Execute `cmd` on behalf of `caller_level`/`session_id`, returning the
    /// reply text. `session` is the caller's resolved session, used for
    /// `/think`, `/stop`, `/compact`, `/new`, `/reset`.
    pub async fn execute(
        &self,
        cmd: Command,
        caller_level: AccessLevel,
        session_id: &str,
        session: &Session,
    ) -> Result<String, InsufficientLevel> {
        let required = min_level(&cmd);
        if caller_level < required {
            return Err(InsufficientLevel { caller: caller_level, required });
        }

        Ok(match cmd {
            Command::Allow { target } => match self.access.allow(caller_level, &target) {
                Ok(()) => format!("Allowed {target}."),
                Err(e) => format!("Could not allow {target}: {e}"),
            },
            Command::Block { target } => match self.access.block(caller_level, &target) {
                Ok(()) => format!("Blocked {target}."),
                Err(e) => format!("Could not block {target}: {e}"),
            },
            Command::Admin { target } => match self.access.promote_admin(caller_level, &target) {
                Ok(()) => format!("Promoted {target} to admin."),
                Err(e) => format!("Could not promote {target}: {e}"),
            },
            Command::Users => {
                let s = self.access.summary();
                format!(
                    "owners={} admins={} allowed_users={} allowed_groups={} blocked={}",
                    s.owners, s.admins, s.allowed_users, s.allowed_groups, s.blocked
                )
            }
            Command::Status => format!("Active sessions: {}", self.workspaces.session_count()),
            Command::Help => HELP_TEXT.to_string(),
            Command::WorkspaceCreate { id } => {
                format!("Workspace '{id}' must be added to the configuration file and reloaded; dynamic creation is not supported.")
            }
            Command::WorkspaceAssign { id, target } => {
                format!("Assignment of '{target}' to workspace '{id}' must be made via the configuration file.")
            }
            Command::WorkspaceList => {
                if self.workspaces.session_count() == 0 {
                    "No active sessions.".to_string()
                } else {
                    format!("{} active session(s).", self.workspaces.session_count())
                }
            }
            Command::WorkspaceInfo { id } => match self.workspaces.get_workspace(&id) {
                Some(ws) => format!("Workspace '{}': {}", ws.id, ws.display_name),
                None => format!("No such workspace: {id}"),
            },
            Command::GroupAllow { chat_id } => match self.access.allow_group(caller_level, &chat_id) {
                Ok(()) => format!("Allowed group {chat_id}."),
                Err(e) => format!("Could not allow group {chat_id}: {e}"),
            },
            Command::GroupBlock { chat_id } => match self.access.block_group(caller_level, &chat_id) {
                Ok(()) => format!("Blocked group {chat_id}."),
                Err(e) => format!("Could not block group {chat_id}: {e}"),
            },
            Command::Think { level } => {
                *session.thinking_level.lock().unwrap_or_else(|e| e.into_inner()) = level;
                format!("Thinking level set to {level:?}.")
            }
            Command::Stop => {
                let runs = self.active_runs.lock().unwrap_or_else(|e| e.into_inner());
                match runs.get(session_id) {
                    Some(handle) => {
                        handle.cancel();
                        "Stopping the active run.".to_string()
                    }
                    None => "No active run to stop.".to_string(),
                }
            }
            Command::Compact => self.compactor.force_compact(session).await,
            Command::Approve => match self.pending_confirmations.take(session_id) {
                Some(request_id) => {
                    let _ = self.bus.publish(AppEvent::ConfirmationResponse { request_id, approved: true });
                    "Approved.".to_string()
                }
                None => "Nothing is waiting for approval.".to_string(),
            },
            Command::Deny => match self.pending_confirmations.take(session_id) {
                Some(request_id) => {
                    let _ = self.bus.publish(AppEvent::ConfirmationResponse { request_id, approved: false });
                    "Denied.".to_string()
                }
                None => "Nothing is waiting for approval.".to_string(),
            },
            Command::New | Command::Reset => {
                session.clear_history();
                "Session cleared.".to_string()
            }
        })
    }
}

const HELP_TEXT: &str = "\
Commands:
  /allow <id>, /block <id>   manage user access (admin)
  /admin <id>                promote a user to admin (owner)
  /users, /status, /help     read-only reports
  /ws create|assign|list|info  workspace management (admin)
  /group allow|block <id>    group access (admin)
  /think off|low|medium|high set the session's thinking level
  /stop                      cancel the active run
  /compact                   force history compaction
  /approve, /deny            resolve a pending tool confirmation
  /new, /reset               clear the session";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse("/status"), Some(Command::Status));
        assert_eq!(parse("/stop"), Some(Command::Stop));
        assert_eq!(parse("not a command"), None);
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(parse("/allow user123"), Some(Command::Allow { target: "user123".to_string() }));
        assert_eq!(parse("/block user123"), Some(Command::Block { target: "user123".to_string() }));
        assert_eq!(parse("/admin user123"), Some(Command::Admin { target: "user123".to_string() }));
    }

    #[test]
    fn parses_think_levels() {
        assert_eq!(parse("/think high"), Some(Command::Think { level: ThinkingLevel::High }));
        assert_eq!(parse("/think bogus"), None);
    }

    #[test]
    fn parses_workspace_subcommands() {
        assert_eq!(parse("/ws list"), Some(Command::WorkspaceList));
        assert_eq!(parse("/ws info team-a"), Some(Command::WorkspaceInfo { id: "team-a".to_string() }));
        assert_eq!(
            parse("/ws assign team-a user1"),
            Some(Command::WorkspaceAssign { id: "team-a".to_string(), target: "user1".to_string() })
        );
    }

    #[test]
    fn parses_group_subcommands() {
        assert_eq!(parse("/group allow g1"), Some(Command::GroupAllow { chat_id: "g1".to_string() }));
        assert_eq!(parse("/group block g1"), Some(Command::GroupBlock { chat_id: "g1".to_string() }));
    }

    #[test]
    fn min_level_matches_spec_table() {
        assert_eq!(min_level(&Command::Allow { target: "x".into() }), AccessLevel::Admin);
        assert_eq!(min_level(&Command::Admin { target: "x".into() }), AccessLevel::Owner);
        assert_eq!(min_level(&Command::Status), AccessLevel::User);
        assert_eq!(min_level(&Command::Stop), AccessLevel::User);
    }

    #[test]
    fn pending_confirmations_round_trip() {
        let pending = PendingConfirmations::new();
        pending.record("s1", "req-1");
        assert_eq!(pending.take("s1"), Some("req-1".to_string()));
        assert_eq!(pending.take("s1"), None);
    }
}
