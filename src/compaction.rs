//! `Compactor` — decides when a session's history has crossed its configured
//! threshold and shrinks it the way `config.memory.compression_strategy`
//! says to (spec §4.9). Shared by the automatic post-run check in
//! [`crate::assistant::Assistant`] and the forced `/compact` command so both
//! paths produce the same summary and flush it to memory the same way.

use std::sync::Arc;

use crate::agent::session::{CompactionEngine, Session};
use crate::config::{CompactionStrategy, MemoryStoreConfig};
use crate::llm::{CompletionRequest, LLMProvider};
use crate::memory::{Memory, MemoryCategory};
use crate::model::ChatMessage;

const PLACEHOLDER_SUMMARY: &str = "[earlier conversation summarized]";

pub struct Compactor {
    llm: Arc<dyn LLMProvider>,
    memory: Option<Arc<dyn Memory>>,
    max_messages: usize,
    strategy: CompactionStrategy,
    model: String,
}

impl Compactor {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        memory: Option<Arc<dyn Memory>>,
        memory_config: &MemoryStoreConfig,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            memory,
            max_messages: memory_config.max_messages,
            strategy: memory_config.compression_strategy,
            model: model.into(),
        }
    }

    /// Compact `session` if its history has crossed the configured
    /// strategy's threshold. Returns whether compaction ran.
    pub async fn maybe_compact(&self, session: &Session) -> bool {
        let engine = CompactionEngine::new(self.max_messages, self.strategy);
        if !engine.should_compact(session.history_len()) {
            return false;
        }
        self.run(session, &engine).await;
        true
    }

    /// Compact `session` unconditionally, bypassing the threshold check
    /// (`/compact`). Returns a reply describing what happened.
    pub async fn force_compact(&self, session: &Session) -> String {
        let engine = CompactionEngine::new(self.max_messages, self.strategy);
        if session.history_len() <= engine.keep_recent() {
            return "Nothing to compact yet.".to_string();
        }
        self.run(session, &engine).await;
        "Compacted the conversation history.".to_string()
    }

    async fn run(&self, session: &Session, engine: &CompactionEngine) {
        let keep_recent = engine.keep_recent();
        let summary = match self.strategy {
            CompactionStrategy::Summarize => self.summarize(session, keep_recent).await,
            CompactionStrategy::Truncate | CompactionStrategy::Sliding => "[older turns discarded]".to_string(),
        };

        let removed = session.compact_history(summary.clone(), keep_recent);
        if removed.is_empty() {
            return;
        }

        if matches!(self.strategy, CompactionStrategy::Summarize) {
            self.flush_to_memory(session, &summary).await;
        }
    }

    async fn summarize(&self, session: &Session, keep_recent: usize) -> String {
        let snapshot = session.history_snapshot();
        let drop_count = snapshot.len().saturating_sub(keep_recent);
        if drop_count == 0 {
            return PLACEHOLDER_SUMMARY.to_string();
        }

        let transcript = snapshot[..drop_count]
            .iter()
            .map(|e| format!("User: {}\nAssistant: {}", e.user, e.assistant))
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = vec![
            ChatMessage::system(
                "Summarize the conversation below in 2-3 sentences. Keep any facts, decisions, \
                 or commitments a later turn might need; drop small talk.",
            ),
            ChatMessage::user(transcript),
        ];
        let request = CompletionRequest::new(&self.model, messages).with_temperature(0.2);

        match self.llm.complete(request).await {
            Ok(resp) if !resp.content.trim().is_empty() => resp.content,
            Ok(_) => PLACEHOLDER_SUMMARY.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "compaction summary call failed, falling back to a placeholder");
                PLACEHOLDER_SUMMARY.to_string()
            }
        }
    }

    async fn flush_to_memory(&self, session: &Session, summary: &str) {
        let Some(memory) = &self.memory else {
            return;
        };
        if let Err(e) = memory.store_daily(summary).await {
            tracing::warn!(error = %e, "failed to append compaction summary to daily memory");
        }
        let key = format!("conversation:{}", session.id);
        if let Err(e) = memory.store(&key, summary, MemoryCategory::Conversation).await {
            tracing::warn!(error = %e, "failed to store compaction summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::session::SessionId;
    use crate::llm::{CompletionResponse, DeltaCallback, LLMError, Result as LlmResult, VisionDetail};
    use crate::llm::TokenUsage;
    use async_trait::async_trait;
    use std::time::SystemTime;

    struct StubProvider(&'static str);

    #[async_trait]
    impl LLMProvider for StubProvider {
        async fn complete(&self, _: CompletionRequest) -> LlmResult<CompletionResponse> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                model_used: "stub".to_string(),
            })
        }
        async fn complete_stream(&self, req: CompletionRequest, _: &DeltaCallback) -> LlmResult<CompletionResponse> {
            self.complete(req).await
        }
        async fn complete_with_vision(&self, _: &str, _: &str, _: &str, _: &str, _: VisionDetail) -> LlmResult<String> {
            Err(LLMError::Other("unsupported".to_string()))
        }
        async fn transcribe_audio(&self, _: &[u8], _: &str, _: &str) -> LlmResult<String> {
            Err(LLMError::Other("unsupported".to_string()))
        }
        fn context_limit(&self) -> usize {
            4096
        }
        fn supports_tools(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            "stub"
        }
    }

    fn entry(n: usize) -> crate::model::ConversationEntry {
        crate::model::ConversationEntry {
            user: format!("u{n}"),
            assistant: format!("a{n}"),
            tokens_in: 1,
            tokens_out: 1,
            timestamp: SystemTime::now(),
        }
    }

    fn session_with(n: usize) -> Session {
        let session = Session::new(SessionId::new("default", "test", "chat1"));
        for i in 0..n {
            session.add_message(entry(i));
        }
        session
    }

    #[tokio::test]
    async fn maybe_compact_is_noop_below_threshold() {
        let compactor = Compactor::new(
            Arc::new(StubProvider("summary")),
            None,
            &MemoryStoreConfig { path: "~/x".to_string(), max_messages: 60, compression_strategy: CompactionStrategy::Summarize },
            "gpt-4o-mini",
        );
        let session = session_with(10);
        assert!(!compactor.maybe_compact(&session).await);
        assert_eq!(session.history_len(), 10);
    }

    #[tokio::test]
    async fn maybe_compact_summarizes_past_threshold() {
        let compactor = Compactor::new(
            Arc::new(StubProvider("the gist of it")),
            None,
            &MemoryStoreConfig { path: "~/x".to_string(), max_messages: 60, compression_strategy: CompactionStrategy::Summarize },
            "gpt-4o-mini",
        );
        let session = session_with(50);
        assert!(compactor.maybe_compact(&session).await);
        let snapshot = session.history_snapshot();
        assert_eq!(snapshot[0].assistant, "the gist of it");
    }

    #[tokio::test]
    async fn force_compact_truncate_uses_placeholder_and_skips_llm() {
        let compactor = Compactor::new(
            Arc::new(StubProvider("should not be used")),
            None,
            &MemoryStoreConfig { path: "~/x".to_string(), max_messages: 60, compression_strategy: CompactionStrategy::Truncate },
            "gpt-4o-mini",
        );
        let session = session_with(20);
        let reply = compactor.force_compact(&session).await;
        assert_eq!(reply, "Compacted the conversation history.");
        let snapshot = session.history_snapshot();
        assert_eq!(snapshot[0].assistant, "[older turns discarded]");
    }

    #[tokio::test]
    async fn force_compact_below_keep_recent_reports_nothing_to_do() {
        let compactor = Compactor::new(
            Arc::new(StubProvider("x")),
            None,
            &MemoryStoreConfig { path: "~/x".to_string(), max_messages: 60, compression_strategy: CompactionStrategy::Summarize },
            "gpt-4o-mini",
        );
        let session = session_with(3);
        assert_eq!(compactor.force_compact(&session).await, "Nothing to compact yet.");
    }
}
