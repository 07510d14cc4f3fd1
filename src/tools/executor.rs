//! `ToolExecutor` — registration, permission gating, and bounded-parallel
//! dispatch for one batch of model-requested tool calls (spec §4.10).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};

use crate::error::classify_tool_error;
use crate::event_bus::{AppEvent, EventBus};
use crate::model::{ToolCall, ToolDefinition, ToolErrorTag};

use super::guard::{CallerContext, ToolGuard};
use super::traits::Tool;

/// Default per-tool execution timeout (spec §5: "tool default (60 s,
/// per-tool override)"). No per-tool override field exists on
/// [`ToolDefinition`] yet; see DESIGN.md.
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;

struct Registered {
    definition: ToolDefinition,
    handler: Arc<dyn Tool>,
}

/// Dispatches tool calls: looks up the handler, runs it past [`ToolGuard`],
/// executes with a timeout and cancellation, and reports the outcome as a
/// wire-level [`crate::model::ToolResult`].
pub struct ToolExecutor {
    tools: HashMap<String, Registered>,
    guard: Arc<ToolGuard>,
    bus: Arc<dyn EventBus>,
    max_concurrent: usize,
}

impl ToolExecutor {
    pub fn new(guard: Arc<ToolGuard>, bus: Arc<dyn EventBus>, max_concurrent: usize) -> Self {
        Self {
            tools: HashMap::new(),
            guard,
            bus,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Register a single tool. A duplicate name overwrites the previous
    /// entry and logs a warning (spec §4.10).
    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn Tool>) {
        if self.tools.contains_key(&definition.name) {
            tracing::warn!(tool = %definition.name, "overwriting already-registered tool");
        }
        self.tools.insert(definition.name.clone(), Registered { definition, handler });
    }

    /// Register every tool belonging to a loaded skill, carrying the
    /// skill's own required-level metadata for each.
    pub fn register_skill_tools(&mut self, tools: Vec<(ToolDefinition, Arc<dyn Tool>)>) {
        for (definition, handler) in tools {
            self.register(definition, handler);
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|r| r.definition.clone()).collect()
    }

    /// Execute a whole `resp.tool_calls` batch concurrently, bounded by the
    /// configured semaphore. `cancel` is watched by every in-flight call so
    /// a `/stop` on the owning run aborts them all promptly.
    pub async fn execute(
        &self,
        calls: Vec<ToolCall>,
        caller: CallerContext,
        cancel: watch::Receiver<bool>,
    ) -> Vec<crate::model::ToolResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let futures = calls.into_iter().map(|call| {
            let semaphore = semaphore.clone();
            let caller = caller.clone();
            let cancel = cancel.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                self.execute_one(call, &caller, cancel).await
            }
        });
        futures::future::join_all(futures).await
    }

    async fn execute_one(
        &self,
        call: ToolCall,
        caller: &CallerContext,
        mut cancel: watch::Receiver<bool>,
    ) -> crate::model::ToolResult {
        let Some(registered) = self.tools.get(&call.name) else {
            return crate::model::ToolResult::err(
                call.id,
                ToolErrorTag::Failed,
                format!("unknown tool '{}'", call.name),
            );
        };

        let _ = self.bus.publish(AppEvent::AgentToolStart {
            session_id: caller.session_id.clone(),
            tool_name: call.name.clone(),
            args: call.arguments.clone(),
        });

        let outcome = self.run_guarded(registered, &call, caller, &mut cancel).await;

        let (success, content, error) = match outcome {
            Ok(result) => (result.success, result.output, None),
            Err((tag, message)) => (false, message, Some(tag)),
        };
        let _ = self.bus.publish(AppEvent::AgentToolResult {
            session_id: caller.session_id.clone(),
            tool_name: call.name.clone(),
            result: content.clone(),
            success,
        });

        match error {
            None if success => crate::model::ToolResult::ok(call.id, content),
            None => crate::model::ToolResult::err(call.id, ToolErrorTag::Failed, content),
            Some(tag) => crate::model::ToolResult::err(call.id, tag, content),
        }
    }

    async fn run_guarded(
        &self,
        registered: &Registered,
        call: &ToolCall,
        caller: &CallerContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<super::traits::ToolResult, (ToolErrorTag, String)> {
        if let Err(e) = self
            .guard
            .authorize(&registered.definition, &call.arguments, caller)
            .await
        {
            return Err((classify_guard_error(&e), e.to_string()));
        }

        let handler = registered.handler.clone();
        let args = call.arguments.clone();
        let mut task = tokio::spawn(async move { handler.execute(args).await });
        let timeout = tokio::time::sleep(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS));
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                joined = &mut task => {
                    return match joined {
                        Ok(result) => result.map_err(|msg| {
                            let tag = match classify_tool_error(&msg) {
                                crate::error::FailureKind::ToolRecoverable(_) => ToolErrorTag::Recoverable,
                                _ => ToolErrorTag::Failed,
                            };
                            (tag, msg)
                        }),
                        Err(join_err) if join_err.is_panic() => {
                            Err((ToolErrorTag::Failed, format!("tool handler panicked: {join_err}")))
                        }
                        Err(join_err) => Err((ToolErrorTag::Failed, format!("tool task failed: {join_err}"))),
                    };
                }
                _ = &mut timeout => {
                    task.abort();
                    return Err((ToolErrorTag::Recoverable, "tool timed out".to_string()));
                }
                changed = cancel.changed() => {
                    if changed.is_ok() && *cancel.borrow() {
                        task.abort();
                        return Err((ToolErrorTag::Failed, "cancelled".to_string()));
                    }
                }
            }
        }
    }
}

fn classify_guard_error(err: &super::guard::GuardError) -> ToolErrorTag {
    use super::guard::GuardError;
    match err {
        GuardError::ConfirmationDenied => ToolErrorTag::Blocked,
        GuardError::InsufficientLevel { .. }
        | GuardError::DestructiveCommand(_)
        | GuardError::SudoBlocked
        | GuardError::RebootBlocked
        | GuardError::HostNotAllowed(_)
        | GuardError::ProtectedPath(_) => ToolErrorTag::Blocked,
        GuardError::Bus(_) => ToolErrorTag::Failed,
    }
}
