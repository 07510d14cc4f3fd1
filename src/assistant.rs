//! `Assistant` — the pipeline orchestrator (spec §4.1).
//!
//! Ties together access control, command parsing, queueing, workspace
//! resolution, media enrichment, input/output guards, prompt composition,
//! the agent loop and the channel sender into the fourteen-step pipeline.
//! Uses interface injection at the points that would otherwise cycle back
//! on themselves: the assistant owns the confirmation and run-cancellation
//! state that [`commands`] and [`tools::ToolGuard`] need, rather than those
//! modules reaching back into the assistant.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, watch};

use crate::access::AccessManager;
use crate::agent::runner::{AgentRunner, RunHandle, RunOutcome};
use crate::agent::workspace::WorkspaceManager;
use crate::channels::ChannelManager;
use crate::commands::{self, Command, CommandInterpreter, PendingConfirmations};
use crate::compaction::Compactor;
use crate::config::Config;
use crate::event_bus::{AppEvent, EventBus};
use crate::guard::{InputGuard, InputVerdict, OutputGuard};
use crate::media::MediaEnricher;
use crate::model::{AccessLevel, AccessPolicy, ChatMessage, ChatRole, ConversationEntry, IncomingMessage, OutgoingMessage};
use crate::prompt::{ComposeInput, PromptComposer};
use crate::queue::MessageQueue;
use crate::sender::Sender;
use crate::tools::{CallerContext, ToolExecutor};

/// Shared services one [`Assistant`] needs to run the pipeline. Constructed
/// once at startup and handed to `Assistant::new`.
pub struct AssistantDeps {
    pub config: Config,
    pub access: Arc<AccessManager>,
    pub workspaces: Arc<WorkspaceManager>,
    pub queue: Arc<MessageQueue>,
    pub bus: Arc<dyn EventBus>,
    pub media: Arc<MediaEnricher>,
    pub input_guard: Arc<InputGuard>,
    pub output_guard: Arc<OutputGuard>,
    pub composer: Arc<PromptComposer>,
    pub runner: Arc<AgentRunner>,
    pub tool_executor: Arc<ToolExecutor>,
    pub sender: Arc<Sender>,
    pub channels: Arc<ChannelManager>,
    pub compactor: Arc<Compactor>,
}

/// The pipeline orchestrator. One instance serves every channel and
/// workspace; per-request state lives in the arguments to
/// [`Assistant::handle_message`], not on `self`.
pub struct Assistant {
    config: Config,
    access: Arc<AccessManager>,
    workspaces: Arc<WorkspaceManager>,
    queue: Arc<MessageQueue>,
    bus: Arc<dyn EventBus>,
    media: Arc<MediaEnricher>,
    input_guard: Arc<InputGuard>,
    output_guard: Arc<OutputGuard>,
    composer: Arc<PromptComposer>,
    runner: Arc<AgentRunner>,
    tool_executor: Arc<ToolExecutor>,
    sender: Arc<Sender>,
    channels: Arc<ChannelManager>,
    compactor: Arc<Compactor>,
    commands: CommandInterpreter,
    pending_confirmations: Arc<PendingConfirmations>,
    active_runs: Arc<StdMutex<HashMap<String, RunHandle>>>,
    /// Sender half of the running turn's interrupt channel, keyed the same
    /// way as `active_runs`, so a follow-up message that arrives mid-run is
    /// delivered to `AgentRunner::run` instead of only ever being queued.
    interrupts: Arc<StdMutex<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl Assistant {
    pub fn new(deps: AssistantDeps) -> Arc<Self> {
        let pending_confirmations = PendingConfirmations::new();
        let active_runs: Arc<StdMutex<HashMap<String, RunHandle>>> = Arc::new(StdMutex::new(HashMap::new()));
        let interrupts: Arc<StdMutex<HashMap<String, mpsc::UnboundedSender<String>>>> =
            Arc::new(StdMutex::new(HashMap::new()));
        let commands = CommandInterpreter::new(
            deps.access.clone(),
            deps.workspaces.clone(),
            deps.bus.clone(),
            pending_confirmations.clone(),
            active_runs.clone(),
            deps.compactor.clone(),
        );

        let assistant = Arc::new(Self {
            config: deps.config,
            access: deps.access,
            workspaces: deps.workspaces,
            queue: deps.queue,
            bus: deps.bus,
            media: deps.media,
            input_guard: deps.input_guard,
            output_guard: deps.output_guard,
            composer: deps.composer,
            runner: deps.runner,
            tool_executor: deps.tool_executor,
            sender: deps.sender,
            channels: deps.channels,
            compactor: deps.compactor,
            commands,
            pending_confirmations,
            active_runs,
            interrupts,
        });

        assistant.clone().spawn_confirmation_listener();
        assistant
    }

    /// Subscribe to `ConfirmationRequested` bus events and remember the
    /// pending `request_id` per session, so `/approve` and `/deny` know
    /// which request to resolve.
    fn spawn_confirmation_listener(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let AppEvent::ConfirmationRequested { request_id, session_id, .. } = event {
                    self.pending_confirmations.record(&session_id, &request_id);
                }
            }
        });
    }

    /// Run the full pipeline for one inbound message (spec §4.1).
    pub async fn handle_message(self: &Arc<Self>, msg: IncomingMessage) {
        // Step 1: access check.
        let level = self.access.decide(&msg.sender_id, &msg.chat_id, msg.is_group);
        if level == AccessLevel::Blocked {
            if self.access.is_ask_policy() && self.access.mark_asked_once(&msg.sender_id) {
                self.reply_raw(&msg, "You don't have access yet. An admin needs to approve your request.").await;
            }
            return;
        }

        // Step 2: admin command parse.
        if let Some(cmd) = commands::parse(&msg.content) {
            self.handle_command(&msg, cmd, level).await;
            return;
        }

        // Step 6: typing / read receipt, best-effort.
        let _ = self.channels.send_typing(&msg.channel, &msg.chat_id).await;
        let _ = self.channels.mark_read(&msg.channel, &msg.chat_id, std::slice::from_ref(&msg.message_id)).await;

        // Step 3: queue admission. A session already mid-run gets the new
        // message delivered as an interrupt rather than queued, if the
        // running turn's interrupt channel is still open.
        let session_key = session_key(&msg);
        if self.queue.is_processing(&session_key).await {
            let has_interrupt_target = {
                let interrupts = self.interrupts.lock().unwrap_or_else(|e| e.into_inner());
                match interrupts.get(&session_key) {
                    Some(tx) => tx.send(msg.content.clone()).is_ok(),
                    None => false,
                }
            };
            if has_interrupt_target {
                return;
            }

            let assistant = self.clone();
            self.queue
                .enqueue(&session_key, msg.clone(), move |session_key, combined, reply_to| {
                    let assistant = assistant.clone();
                    async move { assistant.run_pipeline_tail(session_key, combined, reply_to).await }
                })
                .await;
            return;
        }
        let _guard = self.queue.begin_processing(&session_key).await;

        let enriched = self.media.enrich(&msg).await;
        self.run_pipeline_tail(session_key, enriched, Some(msg.message_id.clone())).await;
    }

    async fn handle_command(&self, msg: &IncomingMessage, cmd: Command, level: AccessLevel) {
        let session_key = session_key(msg);
        let resolved = self.workspaces.resolve(&msg.channel, &msg.chat_id, &msg.sender_id, msg.is_group);
        let reply = match self.commands.execute(cmd, level, &session_key, &resolved.session).await {
            Ok(text) => text,
            Err(e) => e.to_string(),
        };
        self.reply_raw(msg, &reply).await;
    }

    /// Steps 4-14, shared between a fresh message and a drained, combined
    /// batch of queued messages. `reply_to` is the id of the message that
    /// triggered this turn (the single message on the direct path, or the
    /// most recent one in a drained burst), threaded through to step 14.
    async fn run_pipeline_tail(self: &Arc<Self>, session_key: String, content: String, reply_to: Option<String>) {
        let (channel, chat_id, sender_id, is_group) = match split_session_key(&session_key) {
            Some(parts) => parts,
            None => return,
        };

        // Step 4: workspace resolve.
        let resolved = self.workspaces.resolve(&channel, &chat_id, &sender_id, is_group);
        let workspace = resolved.workspace;
        let session = resolved.session;

        // Step 5: trigger match.
        let trigger = workspace
            .overrides
            .trigger
            .clone()
            .unwrap_or_else(|| self.config.trigger.clone());
        if is_group && !content.to_lowercase().starts_with(&trigger.to_lowercase()) {
            return;
        }

        // Step 6 (typing / read receipt) already ran in `handle_message`
        // before queue admission, so every turn gets one regardless of
        // whether it runs immediately or after a debounce.

        // Step 7 (media enrichment) already ran in `handle_message` before
        // queue admission, so `content` here is already enriched text.

        // Step 8: input guard.
        if let InputVerdict::Reject(reason) = self.input_guard.check(&sender_id, &content) {
            self.send(&channel, &chat_id, &reason, reply_to.clone()).await;
            return;
        }

        // Step 9: caller context for the tool executor.
        let level = self.access.decide(&sender_id, &chat_id, is_group);
        let caller = CallerContext {
            caller_id: sender_id.clone(),
            caller_level: level,
            session_id: session_key.clone(),
        };

        // Step 10: prompt compose.
        let recent_history = session.history_snapshot();
        let language = workspace.overrides.language.clone().unwrap_or_else(|| self.config.language.clone());
        let model = workspace.overrides.model.clone().unwrap_or_else(|| self.config.default_model.clone());
        let thinking = *session.thinking_level.lock().unwrap_or_else(|e| e.into_inner());
        let active_skills = session.active_skills.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let user_instructions = self.config.instructions.clone();
        let workspace_instructions = workspace.overrides.instructions.clone().unwrap_or_default();
        let workspace_root = workspace.overrides.root_dir.as_ref().map(std::path::Path::new);

        let compose_input = ComposeInput {
            assistant_name: &self.config.assistant_name,
            language: &language,
            timezone: &self.config.timezone,
            user_instructions: &user_instructions,
            thinking,
            workspace_root,
            workspace_instructions: &workspace_instructions,
            active_skills: &active_skills,
            current_input: &content,
            recent_history: &recent_history,
            host: "localhost",
            cwd: ".",
            model: &model,
            token_budget: self.config.token_budget,
        };
        let system_prompt = self.composer.compose(&compose_input).await;

        // Step 11: agent run.
        let history_messages: Vec<ChatMessage> = recent_history
            .iter()
            .flat_map(|e| {
                vec![
                    ChatMessage { role: ChatRole::User, content: e.user.clone(), tool_calls: Vec::new(), tool_call_id: None },
                    ChatMessage { role: ChatRole::Assistant, content: e.assistant.clone(), tool_calls: Vec::new(), tool_call_id: None },
                ]
            })
            .collect();
        let tool_defs = self.tool_executor.tool_definitions();
        let (handle, cancel_rx) = RunHandle::new();
        self.active_runs.lock().unwrap_or_else(|e| e.into_inner()).insert(session_key.clone(), handle);
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        self.interrupts.lock().unwrap_or_else(|e| e.into_inner()).insert(session_key.clone(), interrupt_tx);

        let run_result = self
            .runner
            .run(&system_prompt, history_messages, &content, tool_defs, caller, interrupt_rx, cancel_rx, None)
            .await;
        self.active_runs.lock().unwrap_or_else(|e| e.into_inner()).remove(&session_key);
        self.interrupts.lock().unwrap_or_else(|e| e.into_inner()).remove(&session_key);

        let reply_text = run_result.reply_text().to_string();

        // Step 12: output guard.
        let safe_reply = self.output_guard.check(&reply_text, &system_prompt);

        // Step 13: session update.
        session.add_message(ConversationEntry {
            user: content.clone(),
            assistant: safe_reply.clone(),
            tokens_in: run_result.usage.prompt_tokens,
            tokens_out: run_result.usage.completion_tokens,
            timestamp: std::time::SystemTime::now(),
        });
        if matches!(run_result.outcome, RunOutcome::Done(_)) {
            self.compactor.maybe_compact(&session).await;
        }

        // Step 14: send, replying to the message that triggered this turn.
        self.send(&channel, &chat_id, &safe_reply, reply_to).await;
    }

    async fn send(&self, channel: &str, chat_id: &str, text: &str, reply_to: Option<String>) {
        self.sender.send(channel, chat_id, text, reply_to).await;
    }

    async fn reply_raw(&self, msg: &IncomingMessage, text: &str) {
        self.sender
            .send(&msg.channel, &msg.chat_id, text, Some(msg.message_id.clone()))
            .await;
    }
}

fn session_key(msg: &IncomingMessage) -> String {
    format!("{}\u{0}{}\u{0}{}\u{0}{}", msg.channel, msg.chat_id, msg.sender_id, msg.is_group)
}

fn split_session_key(key: &str) -> Option<(String, String, String, bool)> {
    let mut parts = key.split('\u{0}');
    let channel = parts.next()?.to_string();
    let chat_id = parts.next()?.to_string();
    let sender_id = parts.next()?.to_string();
    let is_group = parts.next()?.parse().ok()?;
    Some((channel, chat_id, sender_id, is_group))
}
