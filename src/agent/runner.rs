//! `AgentRunner` — the agent loop: LLM ↔ tools ↔ context compaction (spec §4.8).
//!
//! # Algorithm
//!
//! ```text
//! messages ← [system] ++ history ++ [user]
//! loop:
//!   totalTurns += 1
//!   check run-deadline, drain interrupts, maybe reflect, maybe max-turns
//!   resp ← LLM.complete(messages, tools)   — on context-overflow, compact & retry
//!   if resp.tool_calls empty: return resp.content
//!   append assistant message with tool_calls
//!   results ← ToolExecutor.execute(resp.tool_calls)   # parallel, bounded
//!   append one tool message per result
//! ```
//!
//! State machine for a run: `IDLE → RUNNING → (TOOLS_PENDING ↔ RUNNING)* →
//! {DONE | CANCELED | FAILED | TIMEOUT}`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use crate::event_bus::{AppEvent, EventBus};
use crate::llm::{CompletionRequest, CompletionResponse, DeltaCallback, LLMError, LLMProvider, TokenUsage};
use crate::model::{ChatMessage, ChatRole, ToolDefinition};
use crate::tools::{CallerContext, ToolExecutor};

// ─── RunnerConfig ───────────────────────────────────────────────────────────

/// Tunables for one [`AgentRunner`] (spec §4.8 deadlines, §4.9 compaction).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wraps the whole loop (spec default 600 s).
    pub run_deadline: Duration,
    /// Safety-net per LLM call, guards only against a hung connection (spec default 300 s).
    pub llm_call_deadline: Duration,
    /// `0` disables the max-turns cutoff.
    pub max_turns: usize,
    pub reflection_enabled: bool,
    pub reflection_every: usize,
    pub max_compaction_attempts: u32,
    pub initial_keep_recent: usize,
    pub keep_recent_floor: usize,
    pub tool_result_truncate_first: usize,
    pub tool_result_truncate_second: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            run_deadline: Duration::from_secs(600),
            llm_call_deadline: Duration::from_secs(300),
            max_turns: 40,
            reflection_enabled: true,
            reflection_every: 15,
            max_compaction_attempts: 3,
            initial_keep_recent: 20,
            keep_recent_floor: 6,
            tool_result_truncate_first: 4096,
            tool_result_truncate_second: 2048,
        }
    }
}

// ─── RunOutcome / RunResult ─────────────────────────────────────────────────

/// Terminal state of a run (the `{DONE | CANCELED | FAILED | TIMEOUT}` leaves
/// of the state machine).
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Done(String),
    Canceled,
    Failed(String),
    TimedOut,
}

/// Everything produced by one [`AgentRunner::run`] call.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// The request-format messages built and mutated during the run, for the
    /// caller to fold back into session history as it sees fit.
    pub messages: Vec<ChatMessage>,
    pub usage: TokenUsage,
}

impl RunResult {
    /// The text the caller should send back to the user.
    pub fn reply_text(&self) -> &str {
        match &self.outcome {
            RunOutcome::Done(text) => text,
            RunOutcome::Canceled => "Agent stopped.",
            RunOutcome::Failed(_) => "Something went wrong while processing that.",
            RunOutcome::TimedOut => "That took too long and was stopped.",
        }
    }
}

// ─── RunHandle ──────────────────────────────────────────────────────────────

/// The cancel side of a run. The owner (the `Assistant`, spec §4.1) keeps a
/// `(workspace, session) → RunHandle` map so `/stop` can reach an active run.
pub struct RunHandle {
    cancel_tx: watch::Sender<bool>,
}

impl RunHandle {
    /// Create a handle paired with the receiver [`AgentRunner::run`] expects.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { cancel_tx: tx }, rx)
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

// ─── AgentRunner ────────────────────────────────────────────────────────────

pub struct AgentRunner {
    provider: Arc<dyn LLMProvider>,
    tool_executor: Arc<ToolExecutor>,
    bus: Arc<dyn EventBus>,
    model: String,
    config: RunnerConfig,
}

impl AgentRunner {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        tool_executor: Arc<ToolExecutor>,
        bus: Arc<dyn EventBus>,
        model: impl Into<String>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            provider,
            tool_executor,
            bus,
            model: model.into(),
            config,
        }
    }

    /// Run one agent turn to completion (or cancellation, timeout, failure).
    ///
    /// `history` is the prior conversation already flattened to wire messages;
    /// `user_message` is appended as the new turn. Neither is mutated — the
    /// full working set used for the loop is returned in [`RunResult::messages`].
    #[tracing::instrument(
        name = "agent.run",
        skip_all,
        fields(model = %self.model, session = %caller.session_id)
    )]
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        system_prompt: &str,
        history: Vec<ChatMessage>,
        user_message: &str,
        tool_defs: Vec<ToolDefinition>,
        caller: CallerContext,
        mut interrupts: mpsc::UnboundedReceiver<String>,
        mut cancel: watch::Receiver<bool>,
        on_delta: Option<&DeltaCallback>,
    ) -> RunResult {
        let start = Instant::now();
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history);
        messages.push(ChatMessage::user(user_message));

        let _ = self.bus.publish(AppEvent::AgentStarted {
            session_id: caller.session_id.clone(),
        });

        let mut usage = TokenUsage::default();
        let mut keep_recent = self.config.initial_keep_recent;
        let mut total_turns: usize = 0;

        let outcome = loop {
            total_turns += 1;

            if *cancel.borrow() {
                break RunOutcome::Canceled;
            }
            if start.elapsed() >= self.config.run_deadline {
                break RunOutcome::TimedOut;
            }

            while let Ok(note) = interrupts.try_recv() {
                messages.push(ChatMessage::user(format!("[Follow-up] {note}")));
            }

            if self.config.reflection_enabled
                && total_turns > 1
                && total_turns % self.config.reflection_every == 0
            {
                let elapsed = start.elapsed().as_secs();
                let remaining = self.config.run_deadline.as_secs().saturating_sub(elapsed);
                messages.push(ChatMessage::user(format!(
                    "[Reflection] {elapsed}s elapsed, {remaining}s remaining in this run. \
                     Wrap up soon if the task is close to done."
                )));
            }

            if self.config.max_turns > 0 && total_turns > self.config.max_turns {
                messages.push(ChatMessage::user(
                    "[System] Maximum turns reached. Give a final summary of what was accomplished.",
                ));
                match self.call_llm(&messages, &tool_defs, on_delta).await {
                    Ok(response) => {
                        usage += response.usage;
                        break RunOutcome::Done(response.content);
                    }
                    Err(e) => break RunOutcome::Failed(e.to_string()),
                }
            }

            let response = match self
                .complete_with_recovery(&mut messages, &tool_defs, on_delta, &mut keep_recent)
                .await
            {
                Ok(r) => r,
                Err(e) => break RunOutcome::Failed(e.to_string()),
            };
            usage += response.usage;

            if response.tool_calls.is_empty() {
                break RunOutcome::Done(response.content);
            }

            messages.push(ChatMessage::assistant_with_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            let results = self
                .tool_executor
                .execute(response.tool_calls, caller.clone(), cancel.clone())
                .await;

            for result in results {
                if result.error.as_ref() == Some(&crate::model::ToolErrorTag::Recoverable) {
                    tracing::debug!(
                        call_id = %result.call_id,
                        content = %result.content,
                        "recoverable tool error, letting the model self-correct"
                    );
                }
                messages.push(ChatMessage::tool(result.call_id, result.content));
            }
        };

        let reply = match &outcome {
            RunOutcome::Done(text) => text.clone(),
            RunOutcome::Canceled => "Agent stopped.".to_string(),
            RunOutcome::Failed(e) => e.clone(),
            RunOutcome::TimedOut => "run exceeded its time budget".to_string(),
        };
        let _ = self.bus.publish(AppEvent::AgentComplete {
            session_id: caller.session_id.clone(),
            message: reply,
        });

        RunResult { outcome, messages, usage }
    }

    /// Call the LLM, transparently retrying through the context-overflow
    /// recovery tiers up to `max_compaction_attempts` (spec §4.8).
    async fn complete_with_recovery(
        &self,
        messages: &mut Vec<ChatMessage>,
        tools: &[ToolDefinition],
        on_delta: Option<&DeltaCallback>,
        keep_recent: &mut usize,
    ) -> crate::llm::Result<CompletionResponse> {
        let mut attempt: u32 = 0;
        loop {
            match self.call_llm(messages, tools, on_delta).await {
                Ok(response) => return Ok(response),
                Err(LLMError::ContextOverflow) => {
                    attempt += 1;
                    if attempt > self.config.max_compaction_attempts {
                        return Err(LLMError::ContextOverflow);
                    }
                    self.recover_from_overflow(messages, attempt, keep_recent);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_llm(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        on_delta: Option<&DeltaCallback>,
    ) -> crate::llm::Result<CompletionResponse> {
        let request = CompletionRequest::new(self.model.clone(), messages.to_vec()).with_tools(tools.to_vec());
        let call = async {
            match on_delta {
                Some(cb) => self.provider.complete_stream(request, cb).await,
                None => self.provider.complete(request).await,
            }
        };
        match tokio::time::timeout(self.config.llm_call_deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(LLMError::Transient("LLM call exceeded its safety-net deadline".to_string())),
        }
    }

    /// Apply one tier of the context-overflow recovery ladder (spec §4.8).
    ///
    /// Tier 1 only trims oversized tool results. Tier 2+ additionally drops
    /// everything but the leading system messages and the most recent
    /// `keep_recent` entries, shrinking `keep_recent` by 5 (floor 6) on each
    /// attempt past the second.
    fn recover_from_overflow(&self, messages: &mut Vec<ChatMessage>, attempt: u32, keep_recent: &mut usize) {
        if attempt == 1 {
            truncate_tool_results(messages, self.config.tool_result_truncate_first);
            return;
        }
        if attempt > 2 {
            *keep_recent = keep_recent.saturating_sub(5).max(self.config.keep_recent_floor);
        }
        retain_system_and_recent(messages, *keep_recent);
        truncate_tool_results(messages, self.config.tool_result_truncate_second);
    }
}

// ─── Compaction helpers ─────────────────────────────────────────────────────

fn truncate_tool_results(messages: &mut [ChatMessage], max_bytes: usize) {
    for msg in messages.iter_mut() {
        if msg.role == ChatRole::Tool && msg.content.len() > max_bytes {
            truncate_at_char_boundary(&mut msg.content, max_bytes);
        }
    }
}

fn truncate_at_char_boundary(s: &mut String, max_bytes: usize) {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s.push_str("…[truncated]");
}

fn retain_system_and_recent(messages: &mut Vec<ChatMessage>, keep_recent: usize) {
    let system_prefix_len = messages.iter().take_while(|m| m.role == ChatRole::System).count();
    if messages.len() <= system_prefix_len + keep_recent {
        return;
    }
    let tail_start = messages.len() - keep_recent;
    let mut kept: Vec<ChatMessage> = messages[..system_prefix_len].to_vec();
    kept.extend(messages[tail_start.max(system_prefix_len)..].iter().cloned());
    *messages = kept;
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::TokioBroadcastBus;
    use crate::llm::VisionDetail;
    use crate::model::{AccessLevel, ToolCall, ToolFlags};
    use crate::tools::ToolGuard;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        responses: std::sync::Mutex<Vec<CompletionResponse>>,
    }

    impl MockProvider {
        fn new(responses: Vec<CompletionResponse>) -> Arc<Self> {
            Arc::new(Self { responses: std::sync::Mutex::new(responses) })
        }

        fn text(content: &str) -> CompletionResponse {
            CompletionResponse {
                content: content.to_string(),
                tool_calls: vec![],
                usage: TokenUsage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 },
                model_used: "mock".to_string(),
            }
        }

        fn tool_call(name: &str, args: Value) -> CompletionResponse {
            CompletionResponse {
                content: String::new(),
                tool_calls: vec![ToolCall::new(name, args)],
                usage: TokenUsage::default(),
                model_used: "mock".to_string(),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        async fn complete(&self, _request: CompletionRequest) -> crate::llm::Result<CompletionResponse> {
            let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            if responses.is_empty() {
                return Ok(MockProvider::text("no more scripted responses"));
            }
            Ok(responses.remove(0))
        }

        async fn complete_stream(
            &self,
            request: CompletionRequest,
            _on_delta: &DeltaCallback,
        ) -> crate::llm::Result<CompletionResponse> {
            self.complete(request).await
        }

        async fn complete_with_vision(
            &self,
            _model: &str,
            _image_base64: &str,
            _mime: &str,
            _prompt: &str,
            _detail: VisionDetail,
        ) -> crate::llm::Result<String> {
            unimplemented!("vision not used in AgentRunner tests")
        }

        async fn transcribe_audio(&self, _bytes: &[u8], _filename: &str, _model: &str) -> crate::llm::Result<String> {
            unimplemented!("transcription not used in AgentRunner tests")
        }

        fn context_limit(&self) -> usize {
            128_000
        }
        fn supports_tools(&self) -> bool {
            true
        }
        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    struct OverflowThenProvider {
        failures: AtomicUsize,
        response: CompletionResponse,
    }

    #[async_trait]
    impl LLMProvider for OverflowThenProvider {
        async fn complete(&self, _request: CompletionRequest) -> crate::llm::Result<CompletionResponse> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(LLMError::ContextOverflow);
            }
            Ok(self.response.clone())
        }
        async fn complete_stream(
            &self,
            request: CompletionRequest,
            _on_delta: &DeltaCallback,
        ) -> crate::llm::Result<CompletionResponse> {
            self.complete(request).await
        }
        async fn complete_with_vision(
            &self,
            _model: &str,
            _image_base64: &str,
            _mime: &str,
            _prompt: &str,
            _detail: VisionDetail,
        ) -> crate::llm::Result<String> {
            unimplemented!()
        }
        async fn transcribe_audio(&self, _bytes: &[u8], _filename: &str, _model: &str) -> crate::llm::Result<String> {
            unimplemented!()
        }
        fn context_limit(&self) -> usize {
            128_000
        }
        fn supports_tools(&self) -> bool {
            true
        }
        fn provider_name(&self) -> &str {
            "overflow-mock"
        }
    }

    struct EchoTool;

    #[async_trait]
    impl crate::tools::Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value) -> Result<crate::tools::ToolResult, String> {
            let msg = args.get("message").and_then(|v| v.as_str()).unwrap_or("(empty)");
            Ok(crate::tools::ToolResult::ok(msg))
        }
    }

    fn bus() -> Arc<dyn EventBus> {
        Arc::new(TokioBroadcastBus::with_capacity(64))
    }

    fn caller() -> CallerContext {
        CallerContext {
            caller_id: "user-1".to_string(),
            caller_level: AccessLevel::User,
            session_id: "default:test:chat1".to_string(),
        }
    }

    fn echo_tool_def() -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "echoes its input".to_string(),
            parameters_schema: json!({"type": "object"}),
            required_level: AccessLevel::User,
            flags: ToolFlags { auto_approve: true, ..Default::default() },
        }
    }

    fn executor_with_echo() -> Arc<ToolExecutor> {
        let guard = Arc::new(ToolGuard::new(Default::default(), bus()));
        let mut executor = ToolExecutor::new(guard, bus(), 5);
        executor.register(echo_tool_def(), Arc::new(EchoTool));
        Arc::new(executor)
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (_tx, rx) = watch::channel(false);
        rx
    }

    fn no_interrupts() -> mpsc::UnboundedReceiver<String> {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    fn runner(provider: Arc<dyn LLMProvider>) -> AgentRunner {
        AgentRunner::new(provider, executor_with_echo(), bus(), "mock-model", RunnerConfig::default())
    }

    #[tokio::test]
    async fn single_turn_no_tool_calls() {
        let provider = MockProvider::new(vec![MockProvider::text("Hello there.")]);
        let result = runner(provider)
            .run("You are a helper.", vec![], "hi", vec![], caller(), no_interrupts(), no_cancel(), None)
            .await;
        assert!(matches!(result.outcome, RunOutcome::Done(ref t) if t == "Hello there."));
    }

    #[tokio::test]
    async fn tool_call_executes_then_returns_final_answer() {
        let provider = MockProvider::new(vec![
            MockProvider::tool_call("echo", json!({"message": "ping"})),
            MockProvider::text("The echo said: ping."),
        ]);
        let result = runner(provider)
            .run(
                "You are an agent.",
                vec![],
                "test the echo tool",
                vec![echo_tool_def()],
                caller(),
                no_interrupts(),
                no_cancel(),
                None,
            )
            .await;
        assert!(matches!(result.outcome, RunOutcome::Done(ref t) if t == "The echo said: ping."));
        assert!(result.messages.iter().any(|m| m.role == ChatRole::Tool && m.content == "ping"));
    }

    #[tokio::test]
    async fn cancellation_before_first_call_yields_agent_stopped() {
        let provider = MockProvider::new(vec![MockProvider::text("should not be reached")]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let result = runner(provider)
            .run("system", vec![], "hi", vec![], caller(), no_interrupts(), rx, None)
            .await;
        assert!(matches!(result.outcome, RunOutcome::Canceled));
        assert_eq!(result.reply_text(), "Agent stopped.");
    }

    #[tokio::test]
    async fn max_turns_forces_final_summary() {
        let responses: Vec<CompletionResponse> = (0..10)
            .map(|_| MockProvider::tool_call("echo", json!({"message": "loop"})))
            .chain(std::iter::once(MockProvider::text("Wrapped up.")))
            .collect();
        let provider = MockProvider::new(responses);
        let config = RunnerConfig { max_turns: 2, ..Default::default() };
        let exec = executor_with_echo();
        let agent = AgentRunner::new(provider, exec, bus(), "mock-model", config);
        let result = agent
            .run(
                "system",
                vec![],
                "go",
                vec![echo_tool_def()],
                caller(),
                no_interrupts(),
                no_cancel(),
                None,
            )
            .await;
        assert!(matches!(result.outcome, RunOutcome::Done(ref t) if t == "Wrapped up."));
    }

    #[tokio::test]
    async fn interrupt_is_drained_as_followup_message() {
        let provider = MockProvider::new(vec![MockProvider::text("ok")]);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("also check the weather".to_string()).unwrap();
        drop(tx);
        let result = runner(provider).run("system", vec![], "hi", vec![], caller(), rx, no_cancel(), None).await;
        assert!(result.messages.iter().any(|m| m.content.contains("[Follow-up] also check the weather")));
    }

    #[tokio::test]
    async fn context_overflow_recovers_and_completes() {
        let provider = Arc::new(OverflowThenProvider {
            failures: AtomicUsize::new(2),
            response: MockProvider::text("recovered"),
        });
        let result = runner(provider)
            .run("system", vec![], "hi", vec![], caller(), no_interrupts(), no_cancel(), None)
            .await;
        assert!(matches!(result.outcome, RunOutcome::Done(ref t) if t == "recovered"));
    }

    #[tokio::test]
    async fn context_overflow_exhausting_attempts_fails() {
        let provider = Arc::new(OverflowThenProvider {
            failures: AtomicUsize::new(10),
            response: MockProvider::text("never reached"),
        });
        let result = runner(provider)
            .run("system", vec![], "hi", vec![], caller(), no_interrupts(), no_cancel(), None)
            .await;
        assert!(matches!(result.outcome, RunOutcome::Failed(_)));
    }

    #[test]
    fn truncate_tool_results_shrinks_oversized_content() {
        let mut messages = vec![ChatMessage::tool("c1", "x".repeat(5000))];
        truncate_tool_results(&mut messages, 100);
        assert!(messages[0].content.len() < 5000);
        assert!(messages[0].content.ends_with("…[truncated]"));
    }

    #[test]
    fn retain_system_and_recent_keeps_system_prefix_and_tail() {
        let mut messages = vec![ChatMessage::system("persona")];
        for i in 0..30 {
            messages.push(ChatMessage::user(format!("msg {i}")));
        }
        retain_system_and_recent(&mut messages, 5);
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages.last().unwrap().content, "msg 29");
    }

    #[test]
    fn run_handle_cancel_is_observed_by_receiver() {
        let (handle, mut rx) = RunHandle::new();
        assert!(!*rx.borrow());
        handle.cancel();
        rx.has_changed().unwrap();
        assert!(*rx.borrow());
    }
}
