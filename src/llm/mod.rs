//! LLM backend abstraction (spec §6 LLM contract).

pub mod openai;
pub mod provider;
pub mod reliable;
pub mod types;

pub use openai::OpenAiProvider;
pub use provider::{DeltaCallback, LLMError, LLMProvider, Result};
pub use reliable::ReliableProvider;
pub use types::{CompletionRequest, CompletionResponse, StreamChunk, TokenUsage, VisionDetail};
