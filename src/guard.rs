//! `InputGuard` / `OutputGuard` — message-level safety checks that bookend
//! the agent run (spec §4.1 steps 8 and 12).
//!
//! These are distinct from [`tools::ToolGuard`](crate::tools::ToolGuard),
//! which gates individual tool calls; these two gate the user-facing text
//! itself, before and after the model ever sees it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use regex::Regex;
use std::sync::LazyLock;

/// Outcome of an [`InputGuard::check`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputVerdict {
    /// The message may proceed to the agent.
    Accept,
    /// The message is rejected; the string is a user-visible refusal.
    Reject(String),
}

/// Per-sender sliding-window rate limiter.
struct SlidingWindow {
    window: Duration,
    max_actions: usize,
    timestamps: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindow {
    fn new(window: Duration, max_actions: usize) -> Self {
        Self {
            window,
            max_actions,
            timestamps: Mutex::new(HashMap::new()),
        }
    }

    /// Record an action for `key`. Returns `true` if it was within the limit.
    fn try_record(&self, key: &str) -> bool {
        let mut map = self.timestamps.lock().expect("rate-limiter lock poisoned");
        let now = Instant::now();
        let entry = map.entry(key.to_string()).or_default();
        entry.retain(|&t| now.duration_since(t) < self.window);
        if entry.len() >= self.max_actions {
            return false;
        }
        entry.push_back(now);
        true
    }
}

/// Heuristic prompt-injection patterns (spec §4.1 step 8, "optional
/// prompt-injection heuristic scan"). These are deliberately coarse: false
/// positives cost a refusal, false negatives cost nothing this layer alone
/// would have caught anyway (the tool guard still gates actual damage).
static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+instructions",
        r"(?i)disregard\s+(all\s+)?(previous|prior|above)\s+(instructions|prompts?)",
        r"(?i)you\s+are\s+now\s+(in\s+)?developer\s+mode",
        r"(?i)reveal\s+(your|the)\s+system\s+prompt",
        r"(?i)print\s+(your|the)\s+(full\s+)?system\s+prompt",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("injection pattern is valid regex"))
    .collect()
});

/// Rate-limits, size-caps, and scans inbound text for injection attempts
/// before it reaches the prompt composer.
pub struct InputGuard {
    rate_limiter: SlidingWindow,
    max_length: usize,
    scan_injection: bool,
}

impl InputGuard {
    pub fn new(rate_window: Duration, max_per_window: usize, max_length: usize, scan_injection: bool) -> Self {
        Self {
            rate_limiter: SlidingWindow::new(rate_window, max_per_window),
            max_length,
            scan_injection,
        }
    }

    /// Check `content` from `sender_id`. Each call both checks and records
    /// against the rate limiter, matching §4.2's "sliding window per
    /// sender" wording.
    pub fn check(&self, sender_id: &str, content: &str) -> InputVerdict {
        if !self.rate_limiter.try_record(sender_id) {
            return InputVerdict::Reject(
                "You're sending messages too quickly. Please wait a moment and try again.".to_string(),
            );
        }

        if content.len() > self.max_length {
            return InputVerdict::Reject(format!(
                "That message is too long ({} chars, max {}). Please shorten it and try again.",
                content.len(),
                self.max_length
            ));
        }

        if self.scan_injection {
            for pattern in INJECTION_PATTERNS.iter() {
                if pattern.is_match(content) {
                    tracing::warn!(sender_id, "possible prompt-injection attempt rejected");
                    return InputVerdict::Reject(
                        "Sorry, I can't process that request.".to_string(),
                    );
                }
            }
        }

        InputVerdict::Accept
    }
}

/// Scans the agent's final reply for empty output or a leaked system prompt
/// before it is sent (spec §4.1 step 12).
pub struct OutputGuard {
    fallback: String,
}

impl OutputGuard {
    pub fn new() -> Self {
        Self {
            fallback: "Sorry, something went wrong generating a reply. Please try again.".to_string(),
        }
    }

    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self { fallback: fallback.into() }
    }

    /// Check `reply` against `system_prompt`, substituting the fallback
    /// message if the reply is empty or appears to quote the system prompt
    /// back verbatim.
    pub fn check(&self, reply: &str, system_prompt: &str) -> String {
        let trimmed = reply.trim();
        if trimmed.is_empty() {
            return self.fallback.clone();
        }

        if leaks_system_prompt(trimmed, system_prompt) {
            tracing::warn!("output guard caught a system-prompt leak, substituting fallback reply");
            return self.fallback.clone();
        }

        reply.to_string()
    }
}

impl Default for OutputGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// A reply "leaks" the system prompt if it contains a long enough verbatim
/// substring of it to be unambiguous (a short incidental overlap, e.g. a
/// shared word, shouldn't trip this).
fn leaks_system_prompt(reply: &str, system_prompt: &str) -> bool {
    const MIN_LEAK_LEN: usize = 80;
    if system_prompt.len() < MIN_LEAK_LEN {
        return false;
    }
    // Slide a window over the system prompt and check for containment; this
    // is O(n*m) but both strings are small (prompts are capped by the token
    // budget, replies by the channel's max message length).
    let prompt_bytes = system_prompt.as_bytes();
    let mut start = 0;
    while start + MIN_LEAK_LEN <= prompt_bytes.len() {
        let end = (start + 400).min(prompt_bytes.len());
        if let Ok(window) = std::str::from_utf8(&prompt_bytes[start..end]) {
            if window.len() >= MIN_LEAK_LEN && reply.contains(window) {
                return true;
            }
        }
        start += MIN_LEAK_LEN;
    }
    false
}
