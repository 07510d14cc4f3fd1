//! `ToolGuard` — the ordered permission check gating every tool invocation
//! (spec §4.10). Config is read-mostly behind a `parking_lot::RwLock`;
//! hot-reload takes the write lock, recompiles the destructive-pattern
//! regexes, and reopens the audit file (spec §5 shared-resource policy).

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::ToolGuardConfig;
use crate::event_bus::{AppEvent, EventBus, EventFilter, EventType};
use crate::model::{AccessLevel, ToolDefinition};

/// Default destructive-command regexes (spec §4.10 step 3). Case-insensitive.
const DEFAULT_DESTRUCTIVE_PATTERNS: &[&str] = &[
    r"rm\s+-[a-z]*r[a-z]*f[a-z]*\s+/(\s|$)",
    r"rm\s+-[a-z]*f[a-z]*r[a-z]*\s+/(\s|$)",
    r"rm\s+-rf\s+/\*",
    r"mkfs(\.\w+)?\s+/dev/",
    r"dd\s+.*of=/dev/",
    r"chmod\s+(-r\s+)?777\s+/(\s|$)",
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;",
    r"iptables\s+-f",
    r"drop\s+database",
];

fn compile_patterns(sources: &[String]) -> Vec<Regex> {
    sources
        .iter()
        .filter_map(|p| match Regex::new(&format!("(?i){p}")) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "skipping malformed tool-guard pattern");
                None
            }
        })
        .collect()
}

struct Compiled {
    config: ToolGuardConfig,
    default_patterns: Vec<Regex>,
    custom_patterns: Vec<Regex>,
}

impl Compiled {
    fn new(config: ToolGuardConfig) -> Self {
        let default_patterns = compile_patterns(
            &DEFAULT_DESTRUCTIVE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        );
        let custom_patterns = compile_patterns(&config.custom_blocked_patterns);
        Self { config, default_patterns, custom_patterns }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GuardError {
    #[error("caller level {caller:?} is below the level this tool requires ({required:?})")]
    InsufficientLevel { caller: AccessLevel, required: AccessLevel },
    #[error("command blocked by default safety rule: {0}")]
    DestructiveCommand(String),
    #[error("sudo is not permitted")]
    SudoBlocked,
    #[error("shutdown/reboot is not permitted")]
    RebootBlocked,
    #[error("host '{0}' is not in the allowed-hosts list")]
    HostNotAllowed(String),
    #[error("path is protected: {0}")]
    ProtectedPath(String),
    #[error("confirmation denied or timed out")]
    ConfirmationDenied,
    #[error("event bus error: {0}")]
    Bus(String),
}

/// Identity of the caller requesting a tool call, threaded through from the
/// access check earlier in the pipeline (spec §4.1).
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub caller_id: String,
    pub caller_level: AccessLevel,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub tool_name: String,
    pub caller_id: String,
    pub caller_level: AccessLevel,
    pub args: Value,
    pub allowed: bool,
    pub result: String,
}

/// Largest byte offset `<= max_bytes` that lands on a UTF-8 char boundary,
/// so slicing `&s[..floor]` never panics on a multi-byte character.
fn char_boundary_floor(s: &str, max_bytes: usize) -> usize {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

fn sanitize_args(args: &Value) -> Value {
    const MAX_STRING_LEN: usize = 200;
    match args {
        Value::String(s) if s.len() > MAX_STRING_LEN => {
            let end = char_boundary_floor(s, MAX_STRING_LEN);
            Value::String(format!("{}… ({} bytes)", &s[..end], s.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_args).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_args(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn truncate_result(result: &str) -> String {
    const MAX_RESULT_LEN: usize = 500;
    if result.len() > MAX_RESULT_LEN {
        let end = char_boundary_floor(result, MAX_RESULT_LEN);
        format!("{}… ({} bytes)", &result[..end], result.len())
    } else {
        result.to_string()
    }
}

fn has_word(command: &str, word: &str) -> bool {
    command
        .split_whitespace()
        .any(|tok| tok.trim_matches(|c: char| !c.is_alphanumeric()).eq_ignore_ascii_case(word))
}

fn is_shell_tool(name: &str) -> bool {
    matches!(name, "shell" | "bash" | "exec")
}

fn is_remote_host_tool(name: &str) -> bool {
    matches!(name, "ssh" | "scp")
}

fn is_write_tool(name: &str) -> bool {
    matches!(name, "file_write" | "patch")
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

fn is_under_protected(path: &str, protected: &[String]) -> bool {
    let candidate = expand_tilde(path);
    protected.iter().any(|p| {
        let protected = expand_tilde(p);
        candidate == protected || candidate.starts_with(&format!("{protected}/"))
    })
}

fn check_shell_command(
    command: &str,
    compiled: &Compiled,
    caller_level: AccessLevel,
) -> Result<(), GuardError> {
    if has_word(command, "sudo")
        && !(compiled.config.allow_sudo && caller_level >= AccessLevel::Admin)
    {
        return Err(GuardError::SudoBlocked);
    }
    if ["shutdown", "reboot", "poweroff", "halt"]
        .iter()
        .any(|w| has_word(command, w))
        && !(compiled.config.allow_reboot && caller_level == AccessLevel::Owner)
    {
        return Err(GuardError::RebootBlocked);
    }
    // Custom patterns always block, regardless of `allow_destructive`.
    for re in &compiled.custom_patterns {
        if re.is_match(command) {
            return Err(GuardError::DestructiveCommand(command.to_string()));
        }
    }
    if compiled.config.allow_destructive && caller_level == AccessLevel::Owner {
        return Ok(());
    }
    for re in &compiled.default_patterns {
        if re.is_match(command) {
            return Err(GuardError::DestructiveCommand(command.to_string()));
        }
    }
    Ok(())
}

fn check_allowed_host(host: &str, allowed: &[String]) -> Result<(), GuardError> {
    if allowed.is_empty() {
        return Ok(());
    }
    let matched = allowed.iter().any(|pattern| {
        if pattern == "*" {
            true
        } else if let Some(suffix) = pattern.strip_prefix("*.") {
            host == suffix || host.ends_with(&format!(".{suffix}"))
        } else {
            host == pattern
        }
    });
    if matched {
        Ok(())
    } else {
        Err(GuardError::HostNotAllowed(host.to_string()))
    }
}

fn check_protected_path(
    path: &str,
    protected: &[String],
    is_write: bool,
    caller_level: AccessLevel,
) -> Result<(), GuardError> {
    if caller_level == AccessLevel::Owner {
        return Ok(());
    }
    if !is_under_protected(path, protected) {
        return Ok(());
    }
    if caller_level == AccessLevel::Admin && !is_write {
        return Ok(());
    }
    Err(GuardError::ProtectedPath(path.to_string()))
}

/// Gates every tool invocation behind the spec §4.10 permission check and
/// records an audit trail. Shared across the whole process as `Arc<ToolGuard>`.
pub struct ToolGuard {
    state: RwLock<Compiled>,
    bus: Arc<dyn EventBus>,
    audit_path: Option<PathBuf>,
    audit_file: Mutex<Option<File>>,
    audit_log: Mutex<Vec<AuditEntry>>,
}

impl ToolGuard {
    pub fn new(config: ToolGuardConfig, bus: Arc<dyn EventBus>) -> Self {
        Self {
            state: RwLock::new(Compiled::new(config)),
            bus,
            audit_path: None,
            audit_file: Mutex::new(None),
            audit_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_audit_file(mut self, path: PathBuf) -> Self {
        let file = open_audit_file(&path);
        self.audit_path = Some(path);
        self.audit_file = Mutex::new(file);
        self
    }

    /// Hot-reload the config: recompiles regexes and reopens the audit file
    /// under the write lock (spec §5).
    pub fn reload(&self, config: ToolGuardConfig) {
        *self.state.write() = Compiled::new(config);
        if let Some(path) = &self.audit_path {
            *self.audit_file.lock().unwrap_or_else(|e| e.into_inner()) = open_audit_file(path);
        }
    }

    /// Run the full permission check (steps 1–6) and audit the outcome.
    /// Returns `Ok(())` if the call may proceed.
    pub async fn authorize(
        &self,
        def: &ToolDefinition,
        args: &Value,
        caller: &CallerContext,
    ) -> Result<(), GuardError> {
        let result = self.check(def, args, caller).await;
        self.audit(def, args, caller, &result);
        result
    }

    async fn check(
        &self,
        def: &ToolDefinition,
        args: &Value,
        caller: &CallerContext,
    ) -> Result<(), GuardError> {
        let (needs_confirmation, timeout_secs) = {
            let state = self.state.read();

            // 1. auto_approve bypasses every subsequent check.
            if state.config.auto_approve.iter().any(|n| n == &def.name) {
                return Ok(());
            }

            // 2. caller level.
            if caller.caller_level < def.required_level {
                return Err(GuardError::InsufficientLevel {
                    caller: caller.caller_level,
                    required: def.required_level,
                });
            }

            // 3. shell-execution tools.
            if is_shell_tool(&def.name) {
                if let Some(command) = args.get("command").and_then(Value::as_str) {
                    check_shell_command(command, &state, caller.caller_level)?;
                }
            }

            // 4. SSH/SCP host allow-list.
            if is_remote_host_tool(&def.name) {
                if let Some(host) = args.get("host").and_then(Value::as_str) {
                    check_allowed_host(host, &state.config.ssh_allowed_hosts)?;
                }
            }

            // 5. file tools vs. protected paths.
            if let Some(path) = args.get("path").and_then(Value::as_str) {
                check_protected_path(
                    path,
                    &state.config.protected_paths,
                    is_write_tool(&def.name),
                    caller.caller_level,
                )?;
            }

            let needs_confirmation = state.config.requires_confirmation.iter().any(|n| n == &def.name);
            (needs_confirmation, state.config.confirmation_timeout_secs)
        };

        // 6. blocking approval flow — never hold the config lock across the await.
        if needs_confirmation {
            self.await_confirmation(def, caller, Duration::from_secs(timeout_secs))
                .await?;
        }

        Ok(())
    }

    async fn await_confirmation(
        &self,
        def: &ToolDefinition,
        caller: &CallerContext,
        timeout: Duration,
    ) -> Result<(), GuardError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut rx = self
            .bus
            .subscribe_filtered(EventFilter::new(vec![EventType::ConfirmationResponse]));

        self.bus
            .publish(AppEvent::ConfirmationRequested {
                request_id: request_id.clone(),
                session_id: caller.session_id.clone(),
                tool_name: def.name.clone(),
                description: format!("Allow tool `{}` to run for {}?", def.name, caller.caller_id),
            })
            .map_err(GuardError::Bus)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(GuardError::ConfirmationDenied);
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(AppEvent::ConfirmationResponse { request_id: rid, approved })) => {
                    if rid != request_id {
                        continue;
                    }
                    return if approved { Ok(()) } else { Err(GuardError::ConfirmationDenied) };
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) | Err(_) => return Err(GuardError::ConfirmationDenied),
            }
        }
    }

    fn audit(&self, def: &ToolDefinition, args: &Value, caller: &CallerContext, result: &Result<(), GuardError>) {
        let entry = AuditEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            tool_name: def.name.clone(),
            caller_id: caller.caller_id.clone(),
            caller_level: caller.caller_level,
            args: sanitize_args(args),
            allowed: result.is_ok(),
            result: truncate_result(&match result {
                Ok(()) => "allowed".to_string(),
                Err(e) => e.to_string(),
            }),
        };

        if let Ok(mut file) = self.audit_file.lock() {
            if let Some(f) = file.as_mut() {
                if let Ok(line) = serde_json::to_string(&entry) {
                    if let Err(e) = writeln!(f, "{line}") {
                        tracing::warn!(error = %e, "failed to append tool-guard audit entry");
                    }
                }
            }
        }

        self.audit_log.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    /// In-memory audit trail, primarily for tests and `/status` introspection.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn open_audit_file(path: &PathBuf) -> Option<File> {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(error = %e, path = %path.display(), "failed to create tool-guard audit dir");
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to open tool-guard audit file");
            None
        }
    }
}
