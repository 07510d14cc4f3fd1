//! Core data model shared by every pipeline stage (spec §3).
//!
//! These are value types: history entries and prompt layers are copied into
//! the current run and never mutated while in flight.

use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Messages ─────────────────────────────────────────────────────────────

/// Kind of media attached to an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

/// Descriptor for media attached to an `IncomingMessage`. The bytes
/// themselves are fetched lazily via `Channel::download_media`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub filename: String,
    pub size: u64,
}

/// A message arriving from any channel transport. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub channel: String,
    pub chat_id: String,
    pub sender_id: String,
    pub message_id: String,
    pub content: String,
    pub media: Option<MediaDescriptor>,
    pub is_group: bool,
    pub arrived_at: SystemTime,
}

/// A reply produced by the pipeline. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub content: String,
    pub reply_to: Option<String>,
}

// ─── Access control ───────────────────────────────────────────────────────

/// Totally-ordered access level: `Owner > Admin > User > Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Blocked,
    User,
    Admin,
    Owner,
}

/// Default decision applied to a sender not found in any list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    Deny,
    Allow,
    Ask,
}

// ─── Workspace & session ──────────────────────────────────────────────────

/// Per-workspace overrides layered on top of global config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceOverrides {
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub trigger: Option<String>,
    pub skill_allowlist: Option<Vec<String>>,
    /// Directory the bootstrap-files prompt layer reads `SOUL.md`,
    /// `AGENTS.md`, etc. from (spec §4.7 priority 15). `None` if this
    /// workspace has no on-disk root.
    pub root_dir: Option<String>,
}

/// An isolated identity multiplexed onto one physical channel identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub display_name: String,
    pub overrides: WorkspaceOverrides,
}

/// Thinking-level tag a session can be set to via `/think`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    Low,
    Medium,
    High,
}

impl Default for ThinkingLevel {
    fn default() -> Self {
        ThinkingLevel::Medium
    }
}

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub user: String,
    pub assistant: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub timestamp: SystemTime,
}

// ─── Wire-form chat message used during a run ─────────────────────────────

/// Closed role enum — replaces free-form, stringly-typed message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A request from the model to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// Tagged error kind for a tool result, replacing a stringly-typed exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorTag {
    Blocked,
    Recoverable,
    Failed,
}

/// The outcome of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub error: Option<ToolErrorTag>,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            error: None,
        }
    }

    pub fn err(call_id: impl Into<String>, tag: ToolErrorTag, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            error: Some(tag),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A message in the wire format exchanged with the LLM during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Approximate token estimate: bytes / 4 (see DESIGN.md open question i
    /// — this implementation chooses byte-length over a real tokenizer).
    pub fn estimated_tokens(&self) -> usize {
        self.content.len() / 4 + 1
    }
}

// ─── Tool definitions ──────────────────────────────────────────────────────

/// Behavioral flags attached to a `ToolDefinition`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ToolFlags {
    pub auto_approve: bool,
    pub requires_confirmation: bool,
    pub destructive: bool,
}

/// Stable metadata describing a registered tool, independent of its handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
    pub required_level: AccessLevel,
    pub flags: ToolFlags,
}

// ─── Prompt layers ─────────────────────────────────────────────────────────

/// Semantic role a prompt layer plays; doubles as a stable identifier for
/// trimming decisions that must name specific layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptRole {
    Core,
    Safety,
    Identity,
    Thinking,
    Bootstrap,
    Business,
    Skills,
    Memory,
    Temporal,
    Conversation,
    Runtime,
}

/// A prioritized, independently generated slice of the system prompt.
/// Lower priority number = higher priority = trimmed last.
#[derive(Debug, Clone)]
pub struct PromptLayer {
    pub priority: u8,
    pub role: PromptRole,
    pub text: String,
}

impl PromptLayer {
    pub fn new(priority: u8, role: PromptRole, text: impl Into<String>) -> Self {
        Self {
            priority,
            role,
            text: text.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.text.len() / 4 + 1
    }
}

// ─── Queue entry ───────────────────────────────────────────────────────────

/// A pending message plus its enqueue time, held by the per-session queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub message: IncomingMessage,
    pub enqueued_at: Instant,
}

impl QueueEntry {
    pub fn new(message: IncomingMessage) -> Self {
        Self {
            message,
            enqueued_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}
