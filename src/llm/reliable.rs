//! `ReliableProvider` — retry-with-backoff and ordered fallback wrapper
//! around any [`LLMProvider`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::provider::{DeltaCallback, LLMError, LLMProvider, Result};
use super::types::{CompletionRequest, CompletionResponse, VisionDetail};

/// Wraps a primary provider with retry-with-exponential-backoff and an
/// optional ordered fallback chain. Auth errors are never retried — they
/// won't resolve by waiting.
pub struct ReliableProvider {
    primary: Arc<dyn LLMProvider>,
    fallbacks: Vec<Arc<dyn LLMProvider>>,
    max_retries: u32,
    base_delay: Duration,
}

impl ReliableProvider {
    pub fn new(primary: Arc<dyn LLMProvider>) -> Self {
        Self {
            primary,
            fallbacks: vec![],
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    pub fn with_fallback(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.fallbacks.push(provider);
        self
    }

    fn is_retryable(err: &LLMError) -> bool {
        !matches!(err, LLMError::Auth(_) | LLMError::ContextOverflow)
    }

    async fn retry_delay(&self, attempt: u32, err: &LLMError) -> Duration {
        if let LLMError::RateLimited {
            retry_after: Some(d),
        } = err
        {
            return *d;
        }
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[async_trait]
impl LLMProvider for ReliableProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut last_err = LLMError::Other("no providers configured".to_string());
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay(attempt - 1, &last_err).await).await;
            }
            match self.primary.complete(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if !Self::is_retryable(&e) => return Err(e),
                Err(e) => last_err = e,
            }
        }

        for fallback in &self.fallbacks {
            match fallback.complete(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = e,
            }
        }

        Err(LLMError::Other(format!(
            "all providers exhausted, last error: {last_err}"
        )))
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
        on_delta: &DeltaCallback,
    ) -> Result<CompletionResponse> {
        let mut last_err = LLMError::Other("no providers configured".to_string());
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay(attempt - 1, &last_err).await).await;
            }
            match self.primary.complete_stream(request.clone(), on_delta).await {
                Ok(resp) => return Ok(resp),
                Err(e) if !Self::is_retryable(&e) => return Err(e),
                Err(e) => last_err = e,
            }
        }

        for fallback in &self.fallbacks {
            match fallback.complete_stream(request.clone(), on_delta).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = e,
            }
        }

        Err(LLMError::Other(format!(
            "all providers exhausted, last error: {last_err}"
        )))
    }

    async fn complete_with_vision(
        &self,
        model: &str,
        image_base64: &str,
        mime: &str,
        prompt: &str,
        detail: VisionDetail,
    ) -> Result<String> {
        self.primary
            .complete_with_vision(model, image_base64, mime, prompt, detail)
            .await
    }

    async fn transcribe_audio(&self, bytes: &[u8], filename: &str, model: &str) -> Result<String> {
        self.primary.transcribe_audio(bytes, filename, model).await
    }

    fn context_limit(&self) -> usize {
        self.fallbacks
            .iter()
            .map(|f| f.context_limit())
            .fold(self.primary.context_limit(), |min, limit| min.min(limit))
    }

    fn supports_tools(&self) -> bool {
        self.primary.supports_tools() && self.fallbacks.iter().all(|f| f.supports_tools())
    }

    fn provider_name(&self) -> &str {
        self.primary.provider_name()
    }

    async fn warmup(&self) -> Result<()> {
        if let Err(e) = self.primary.warmup().await {
            tracing::warn!(provider = self.primary.provider_name(), error = %e, "provider warmup failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::TokenUsage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFailProvider {
        name: &'static str,
        call_count: Arc<AtomicU32>,
        error: fn() -> LLMError,
    }

    impl AlwaysFailProvider {
        fn new(name: &'static str, error: fn() -> LLMError) -> (Self, Arc<AtomicU32>) {
            let count = Arc::new(AtomicU32::new(0));
            (
                Self {
                    name,
                    call_count: count.clone(),
                    error,
                },
                count,
            )
        }
    }

    #[async_trait]
    impl LLMProvider for AlwaysFailProvider {
        async fn complete(&self, _: CompletionRequest) -> Result<CompletionResponse> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Err((self.error)())
        }
        async fn complete_stream(
            &self,
            _: CompletionRequest,
            _: &DeltaCallback,
        ) -> Result<CompletionResponse> {
            Err((self.error)())
        }
        async fn complete_with_vision(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: VisionDetail,
        ) -> Result<String> {
            Err((self.error)())
        }
        async fn transcribe_audio(&self, _: &[u8], _: &str, _: &str) -> Result<String> {
            Err((self.error)())
        }
        fn context_limit(&self) -> usize {
            4096
        }
        fn supports_tools(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            self.name
        }
    }

    struct AlwaysOkProvider;

    #[async_trait]
    impl LLMProvider for AlwaysOkProvider {
        async fn complete(&self, _: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                content: "ok".to_string(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                model_used: "test".to_string(),
            })
        }
        async fn complete_stream(
            &self,
            _: CompletionRequest,
            _: &DeltaCallback,
        ) -> Result<CompletionResponse> {
            self.complete(CompletionRequest::new("test", vec![])).await
        }
        async fn complete_with_vision(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: VisionDetail,
        ) -> Result<String> {
            Ok("a description".to_string())
        }
        async fn transcribe_audio(&self, _: &[u8], _: &str, _: &str) -> Result<String> {
            Ok("a transcript".to_string())
        }
        fn context_limit(&self) -> usize {
            4096
        }
        fn supports_tools(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            "always-ok"
        }
    }

    fn dummy_request() -> CompletionRequest {
        CompletionRequest::new("test-model", vec![])
    }

    #[tokio::test]
    async fn retries_on_transient_failure() {
        let (fail_provider, count) =
            AlwaysFailProvider::new("primary", || LLMError::Transient("boom".to_string()));
        let reliable =
            ReliableProvider::new(Arc::new(fail_provider)).with_retries(2, Duration::from_millis(1));

        let result = reliable.complete(dummy_request()).await;
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let (fail_provider, count) =
            AlwaysFailProvider::new("primary", || LLMError::Auth("bad key".to_string()));
        let reliable =
            ReliableProvider::new(Arc::new(fail_provider)).with_retries(5, Duration::from_millis(1));

        let result = reliable.complete(dummy_request()).await;
        assert!(matches!(result, Err(LLMError::Auth(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_chain_activates_after_retries_exhausted() {
        let (fail_primary, _) =
            AlwaysFailProvider::new("primary", || LLMError::Transient("boom".to_string()));
        let reliable = ReliableProvider::new(Arc::new(fail_primary))
            .with_retries(0, Duration::from_millis(1))
            .with_fallback(Arc::new(AlwaysOkProvider));

        let result = reliable.complete(dummy_request()).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().content, "ok");
    }
}
