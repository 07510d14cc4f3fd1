//! YAML configuration schema (spec §6 `Config`).
//!
//! All fields carry `#[serde(default)]` so a partially-filled config file
//! still parses. Hot-reloadable fields are `instructions`, `access`,
//! `security.tool_guard`, `heartbeat`, `token_budget`; everything else
//! requires a restart (see [`ConfigLoader`](super::loader::ConfigLoader)).
//!
//! Example `~/.config/corvid/config.yaml`:
//! ```yaml
//! assistant_name: Corvid
//! trigger: "corvid"
//! default_model: "claude-sonnet-4-5"
//! language: en
//! timezone: UTC
//! instructions: "Be concise."
//! access:
//!   policy: ask
//!   owners: ["+15555550100"]
//! workspaces:
//!   - id: default
//!     display_name: Default
//! queue:
//!   debounce_ms: 1000
//!   max_pending: 20
//! security:
//!   max_input_length: 8000
//! memory:
//!   path: ~/.local/share/corvid/memory
//!   max_messages: 60
//! token_budget: 24000
//! heartbeat:
//!   enabled: true
//!   interval_secs: 1800
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::AccessPolicy;

// ─── AccessConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    pub policy: AccessPolicy,
    pub owners: Vec<String>,
    pub admins: Vec<String>,
    pub allowed_users: Vec<String>,
    pub allowed_groups: Vec<String>,
    pub blocked: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            policy: AccessPolicy::Ask,
            owners: Vec::new(),
            admins: Vec::new(),
            allowed_users: Vec::new(),
            allowed_groups: Vec::new(),
            blocked: Vec::new(),
        }
    }
}

// ─── QueueConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub debounce_ms: u64,
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            max_pending: 20,
        }
    }
}

// ─── ToolGuardConfig ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolGuardConfig {
    pub allow_sudo: bool,
    pub allow_reboot: bool,
    pub allow_destructive: bool,
    pub custom_blocked_patterns: Vec<String>,
    pub ssh_allowed_hosts: Vec<String>,
    pub protected_paths: Vec<String>,
    pub requires_confirmation: Vec<String>,
    pub auto_approve: Vec<String>,
    pub confirmation_timeout_secs: u64,
    pub max_concurrent_tools: usize,
}

impl Default for ToolGuardConfig {
    fn default() -> Self {
        Self {
            allow_sudo: false,
            allow_reboot: false,
            allow_destructive: false,
            custom_blocked_patterns: Vec::new(),
            ssh_allowed_hosts: Vec::new(),
            protected_paths: Vec::new(),
            requires_confirmation: Vec::new(),
            auto_approve: Vec::new(),
            confirmation_timeout_secs: 120,
            max_concurrent_tools: 5,
        }
    }
}

// ─── SecurityConfig ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub tool_guard: ToolGuardConfig,
    pub ssrf_protection: bool,
    pub max_input_length: usize,
    pub rate_limit_per_minute: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            tool_guard: ToolGuardConfig::default(),
            ssrf_protection: true,
            max_input_length: 8_000,
            rate_limit_per_minute: 20,
        }
    }
}

// ─── Memory config ─────────────────────────────────────────────────────────

/// Compaction strategy selected for `CompactionEngine` (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    #[default]
    Summarize,
    Truncate,
    Sliding,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryStoreConfig {
    pub path: String,
    pub max_messages: usize,
    pub compression_strategy: CompactionStrategy,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/corvid/memory".to_string(),
            max_messages: 60,
            compression_strategy: CompactionStrategy::Summarize,
        }
    }
}

// ─── HeartbeatConfig ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30 * 60,
        }
    }
}

// ─── Workspace entries ─────────────────────────────────────────────────────

/// A statically-configured workspace plus the group/member ids routed to it
/// (spec §4.5 resolution order: `groups[chat] → members[sender] → default`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct WorkspaceConfigEntry {
    pub id: String,
    pub display_name: String,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub trigger: Option<String>,
    pub skill_allowlist: Option<Vec<String>>,
    /// On-disk directory this workspace's bootstrap files live in.
    pub root_dir: Option<String>,
    pub groups: Vec<String>,
    pub members: Vec<String>,
}

// ─── Config ────────────────────────────────────────────────────────────────

/// Immutable configuration snapshot (spec §6 `Config`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub assistant_name: String,
    pub trigger: String,
    pub default_model: String,
    pub language: String,
    pub timezone: String,
    pub instructions: String,
    pub access: AccessConfig,
    pub workspaces: Vec<WorkspaceConfigEntry>,
    pub queue: QueueConfig,
    pub security: SecurityConfig,
    pub memory: MemoryStoreConfig,
    pub token_budget: usize,
    pub heartbeat: HeartbeatConfig,
    /// Free-form extension bag, not part of the spec contract but kept for
    /// forward-compatible deserialization (teacher's config files commonly
    /// carry provider-specific sections not governed by this core).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assistant_name: "Corvid".to_string(),
            trigger: "corvid".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            instructions: String::new(),
            access: AccessConfig::default(),
            workspaces: Vec::new(),
            queue: QueueConfig::default(),
            security: SecurityConfig::default(),
            memory: MemoryStoreConfig::default(),
            token_budget: 24_000,
            heartbeat: HeartbeatConfig::default(),
            extra: HashMap::new(),
        }
    }
}
