//! `AccessManager` — per-sender allow/deny/ask decisions (spec §4.2).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::model::{AccessLevel, AccessPolicy};

/// Persisted membership state for the [`AccessManager`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccessState {
    owners: HashSet<String>,
    admins: HashSet<String>,
    allowed_users: HashSet<String>,
    allowed_groups: HashSet<String>,
    blocked: HashSet<String>,
    /// Senders we've already sent a one-time pending-access notice to under
    /// policy=`ask` (spec §4.1 step 1 / §9 open question ii).
    asked: HashSet<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("caller level {caller:?} may not perform this mutation (requires {required:?})")]
    InsufficientLevel {
        caller: AccessLevel,
        required: AccessLevel,
    },
    #[error("failed to persist access state: {0}")]
    Persist(#[from] std::io::Error),
    #[error("failed to serialize access state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Decides and atomically mutates per-sender access.
///
/// State is persisted to `state_path` (a JSON file) after every mutation, as
/// the spec calls out explicitly ("the manager persists its membership
/// state to disk after every mutation").
pub struct AccessManager {
    state: Mutex<AccessState>,
    default_policy: AccessPolicy,
    state_path: Option<PathBuf>,
}

impl AccessManager {
    pub fn new(default_policy: AccessPolicy) -> Self {
        Self {
            state: Mutex::new(AccessState::default()),
            default_policy,
            state_path: None,
        }
    }

    /// Create a manager that persists mutations to `state_path`, loading any
    /// existing state from it first.
    pub fn with_persistence(default_policy: AccessPolicy, state_path: PathBuf) -> Self {
        let state = std::fs::read_to_string(&state_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            state: Mutex::new(state),
            default_policy,
            state_path: Some(state_path),
        }
    }

    /// Seed the manager's lists from a loaded [`Config`](crate::config::Config).
    pub fn seed(
        &self,
        owners: &[String],
        admins: &[String],
        allowed_users: &[String],
        allowed_groups: &[String],
        blocked: &[String],
    ) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.owners = owners.iter().cloned().collect();
        state.admins = admins.iter().cloned().collect();
        state.allowed_users = allowed_users.iter().cloned().collect();
        state.allowed_groups = allowed_groups.iter().cloned().collect();
        state.blocked = blocked.iter().cloned().collect();
    }

    fn persist(&self, state: &AccessState) -> Result<(), AccessError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Decide the access level for `sender`, given whether this is a group
    /// chat (group ids are checked against `allowed_groups`).
    pub fn decide(&self, sender: &str, chat_id: &str, is_group: bool) -> AccessLevel {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.owners.contains(sender) {
            return AccessLevel::Owner;
        }
        if state.admins.contains(sender) {
            return AccessLevel::Admin;
        }
        if state.blocked.contains(sender) {
            return AccessLevel::Blocked;
        }
        let explicitly_allowed = if is_group {
            state.allowed_groups.contains(chat_id)
        } else {
            state.allowed_users.contains(sender)
        };
        if explicitly_allowed {
            return AccessLevel::User;
        }
        match self.default_policy {
            AccessPolicy::Allow => AccessLevel::User,
            AccessPolicy::Deny | AccessPolicy::Ask => AccessLevel::Blocked,
        }
    }

    /// Whether the default policy is `ask` (pipeline step 1 needs this to
    /// decide between a silent drop and a one-time pending-access notice).
    pub fn is_ask_policy(&self) -> bool {
        matches!(self.default_policy, AccessPolicy::Ask)
    }

    /// Record that `sender` has already received the pending-access notice.
    /// Returns `true` if this is the first time (caller should send the
    /// notice), `false` if already recorded (caller should drop silently).
    pub fn mark_asked_once(&self, sender: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.asked.insert(sender.to_string())
    }

    fn require_level(caller: AccessLevel, required: AccessLevel) -> Result<(), AccessError> {
        if caller >= required {
            Ok(())
        } else {
            Err(AccessError::InsufficientLevel {
                caller,
                required,
            })
        }
    }

    /// `/allow <id>` — admin or above.
    pub fn allow(&self, caller: AccessLevel, target: &str) -> Result<(), AccessError> {
        Self::require_level(caller, AccessLevel::Admin)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.allowed_users.insert(target.to_string());
        state.blocked.remove(target);
        self.persist(&state)
    }

    /// `/block <id>` — admin or above.
    pub fn block(&self, caller: AccessLevel, target: &str) -> Result<(), AccessError> {
        Self::require_level(caller, AccessLevel::Admin)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.blocked.insert(target.to_string());
        state.allowed_users.remove(target);
        self.persist(&state)
    }

    /// `/admin <id>` — owner only.
    pub fn promote_admin(&self, caller: AccessLevel, target: &str) -> Result<(), AccessError> {
        Self::require_level(caller, AccessLevel::Owner)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.admins.insert(target.to_string());
        self.persist(&state)
    }

    /// `/group allow <id>` — admin or above.
    pub fn allow_group(&self, caller: AccessLevel, chat_id: &str) -> Result<(), AccessError> {
        Self::require_level(caller, AccessLevel::Admin)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.allowed_groups.insert(chat_id.to_string());
        self.persist(&state)
    }

    /// `/group block <id>` — admin or above.
    pub fn block_group(&self, caller: AccessLevel, chat_id: &str) -> Result<(), AccessError> {
        Self::require_level(caller, AccessLevel::Admin)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.allowed_groups.remove(chat_id);
        self.persist(&state)
    }

    /// Snapshot the current membership, for `/users` / `/status` reporting.
    pub fn summary(&self) -> AccessSummary {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        AccessSummary {
            owners: state.owners.len(),
            admins: state.admins.len(),
            allowed_users: state.allowed_users.len(),
            allowed_groups: state.allowed_groups.len(),
            blocked: state.blocked.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccessSummary {
    pub owners: usize,
    pub admins: usize,
    pub allowed_users: usize,
    pub allowed_groups: usize,
    pub blocked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_always_resolves_to_owner() {
        let mgr = AccessManager::new(AccessPolicy::Deny);
        mgr.seed(&["owner1".to_string()], &[], &[], &[], &[]);
        assert_eq!(mgr.decide("owner1", "chat", false), AccessLevel::Owner);
    }

    #[test]
    fn blocked_overrides_everything_but_admin_owner() {
        let mgr = AccessManager::new(AccessPolicy::Allow);
        mgr.seed(&[], &[], &[], &[], &["bad".to_string()]);
        assert_eq!(mgr.decide("bad", "chat", false), AccessLevel::Blocked);
    }

    #[test]
    fn unknown_sender_under_deny_policy_is_blocked() {
        let mgr = AccessManager::new(AccessPolicy::Deny);
        assert_eq!(mgr.decide("stranger", "chat", false), AccessLevel::Blocked);
    }

    #[test]
    fn unknown_sender_under_allow_policy_is_user() {
        let mgr = AccessManager::new(AccessPolicy::Allow);
        assert_eq!(mgr.decide("stranger", "chat", false), AccessLevel::User);
    }

    #[test]
    fn admin_cannot_promote_to_admin() {
        let mgr = AccessManager::new(AccessPolicy::Deny);
        let result = mgr.promote_admin(AccessLevel::Admin, "target");
        assert!(result.is_err());
    }

    #[test]
    fn owner_can_promote_to_admin() {
        let mgr = AccessManager::new(AccessPolicy::Deny);
        mgr.promote_admin(AccessLevel::Owner, "target").unwrap();
        assert_eq!(mgr.decide("target", "chat", false), AccessLevel::Admin);
    }

    #[test]
    fn user_cannot_allow_others() {
        let mgr = AccessManager::new(AccessPolicy::Deny);
        let result = mgr.allow(AccessLevel::User, "target");
        assert!(result.is_err());
    }

    #[test]
    fn mark_asked_once_is_true_only_the_first_time() {
        let mgr = AccessManager::new(AccessPolicy::Ask);
        assert!(mgr.mark_asked_once("stranger"));
        assert!(!mgr.mark_asked_once("stranger"));
    }

    #[test]
    fn group_membership_gates_group_chats() {
        let mgr = AccessManager::new(AccessPolicy::Deny);
        mgr.allow_group(AccessLevel::Owner, "group1").unwrap();
        assert_eq!(mgr.decide("anyone", "group1", true), AccessLevel::User);
        assert_eq!(mgr.decide("anyone", "group2", true), AccessLevel::Blocked);
    }

    #[test]
    fn persistence_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.json");
        let mgr = AccessManager::with_persistence(AccessPolicy::Deny, path.clone());
        mgr.allow(AccessLevel::Owner, "friend").unwrap();

        let reloaded = AccessManager::with_persistence(AccessPolicy::Deny, path);
        assert_eq!(reloaded.decide("friend", "chat", false), AccessLevel::User);
    }
}
