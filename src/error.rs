//! Stable error taxonomy for the assistant pipeline (spec §7).
//!
//! Every failure that can surface out of a run carries one of these kinds.
//! The pipeline never panics the process: tool-handler panics are caught at
//! the executor boundary and converted to `ToolFailed`.

use thiserror::Error;

/// Stable, user-agnostic classification of a pipeline failure.
///
/// `Display` renders the user-safe message; callers needing detail should
/// match on the variant rather than parse the string.
#[derive(Debug, Error, Clone)]
pub enum FailureKind {
    #[error("access denied")]
    AccessDenied,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("input rejected: {0}")]
    InputRejected(String),

    #[error("tool blocked: {0}")]
    ToolBlocked(String),

    #[error("tool recoverable error: {0}")]
    ToolRecoverable(String),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("context overflow")]
    ContextOverflow,

    #[error("llm transient error: {0}")]
    LLMTransient(String),

    #[error("llm fatal error: {0}")]
    LLMFatal(String),

    #[error("run timed out")]
    RunTimeout,

    #[error("agent stopped")]
    UserCancel,
}

impl FailureKind {
    /// The string shown to the end user in place of raw error detail.
    ///
    /// `UserCancel` and a handful of guard failures already carry a
    /// user-safe message; everything else collapses to a generic notice so
    /// internal detail never leaks into a chat reply.
    pub fn user_message(&self) -> String {
        match self {
            FailureKind::UserCancel => "Agent stopped.".to_string(),
            FailureKind::RateLimited(msg) | FailureKind::InputRejected(msg) => msg.clone(),
            FailureKind::AccessDenied => {
                "You don't have access to this assistant.".to_string()
            }
            FailureKind::RunTimeout => "The request took too long and was stopped.".to_string(),
            FailureKind::LLMFatal(_) | FailureKind::ContextOverflow => {
                "Something went wrong processing that request.".to_string()
            }
            FailureKind::ToolBlocked(_)
            | FailureKind::ToolRecoverable(_)
            | FailureKind::ToolFailed(_)
            | FailureKind::LLMTransient(_) => {
                "Something went wrong processing that request.".to_string()
            }
        }
    }

    /// Whether this failure should be logged as an error (vs. debug/info).
    pub fn is_loggable_error(&self) -> bool {
        !matches!(self, FailureKind::UserCancel | FailureKind::ToolRecoverable(_))
    }
}

/// Substring markers that classify a tool error as recoverable (spec §4.8).
///
/// These are appended to the conversation so the model can self-correct,
/// logged at debug level rather than surfaced to the user.
const RECOVERABLE_MARKERS: &[&str] = &[
    "required",
    "missing",
    "not found",
    "invalid",
    "parsing",
    "no such file",
    "does not exist",
    "permission denied",
    "timed out",
    "connection refused",
    "empty",
];

/// Classify a raw tool-handler error string as recoverable or fatal.
///
/// This is deliberately substring-based (see DESIGN.md open question iii):
/// a principled error-kind channel from tool handlers would be preferable,
/// but handlers here return a plain `String`.
pub fn classify_tool_error(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if RECOVERABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::ToolRecoverable(message.to_string())
    } else {
        FailureKind::ToolFailed(message.to_string())
    }
}
