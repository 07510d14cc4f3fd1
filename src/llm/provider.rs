//! `LLMProvider` — the model-backend contract consumed by `AgentRunner`
//! (spec §6 LLM contract). Errors must be classifiable as context-overflow,
//! rate-limit (with retry-after), transient network, auth, or other, since
//! `AgentRunner`'s context-overflow recovery and retry policy branch on
//! exactly this taxonomy.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse, VisionDetail};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("context window exceeded")]
    ContextOverflow,
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("provider error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LLMError>;

/// A callback invoked with each streamed text delta (spec §4.8 streaming).
pub type DeltaCallback = Box<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    async fn complete_stream(
        &self,
        request: CompletionRequest,
        on_delta: &DeltaCallback,
    ) -> Result<CompletionResponse>;

    /// Describe an image for the `MediaEnricher` (spec §4.6).
    async fn complete_with_vision(
        &self,
        model: &str,
        image_base64: &str,
        mime: &str,
        prompt: &str,
        detail: VisionDetail,
    ) -> Result<String>;

    /// Transcribe audio for the `MediaEnricher` (spec §4.6).
    async fn transcribe_audio(&self, bytes: &[u8], filename: &str, model: &str) -> Result<String>;

    fn context_limit(&self) -> usize;
    fn supports_tools(&self) -> bool;
    fn provider_name(&self) -> &str;

    /// Pre-establish connection to the provider. Default no-op.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}
