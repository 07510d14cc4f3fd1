//! `MediaEnricher` — folds attached media into the textual message content
//! an [`AgentRunner`](crate::agent::AgentRunner) consumes (spec §4.6).
//!
//! Images are described via vision, audio is transcribed, and both results
//! are spliced into the original message text. Any failure along the way
//! falls back to the original content untouched — media enrichment is a
//! best-effort enhancement, never a precondition for a reply.

use std::sync::Arc;

use base64::Engine as _;

use crate::channels::manager::ChannelManager;
use crate::llm::provider::LLMProvider;
use crate::llm::types::VisionDetail;
use crate::model::{IncomingMessage, MediaKind};

/// Maximum image size eligible for base64 inlining before the vision call.
const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Model used for `complete_with_vision`/`transcribe_audio` calls. These are
/// capability calls rather than chat completions, so they're addressed by a
/// fixed model name rather than the caller's configured chat model.
const VISION_MODEL: &str = "gpt-4o-mini";
const ASR_MODEL: &str = "whisper-1";

pub struct MediaEnricher {
    channels: Arc<ChannelManager>,
    provider: Arc<dyn LLMProvider>,
}

impl MediaEnricher {
    pub fn new(channels: Arc<ChannelManager>, provider: Arc<dyn LLMProvider>) -> Self {
        Self { channels, provider }
    }

    /// Return `msg.content`, enriched with a description of any attached
    /// media. Never fails: any download/describe/transcribe error simply
    /// falls back to the original content.
    pub async fn enrich(&self, msg: &IncomingMessage) -> String {
        let Some(media) = &msg.media else {
            return msg.content.clone();
        };

        match media.kind {
            MediaKind::Image => self.enrich_image(msg).await.unwrap_or_else(|e| {
                tracing::debug!(error = %e, "image enrichment failed, using original content");
                msg.content.clone()
            }),
            MediaKind::Audio => self.enrich_audio(msg).await.unwrap_or_else(|e| {
                tracing::debug!(error = %e, "audio enrichment failed, using original content");
                msg.content.clone()
            }),
            MediaKind::Video | MediaKind::Document => msg.content.clone(),
        }
    }

    async fn enrich_image(&self, msg: &IncomingMessage) -> Result<String, String> {
        let media = msg.media.as_ref().expect("caller checked media.is_some()");
        if media.size > MAX_IMAGE_BYTES {
            return Err(format!("image too large to inline: {} bytes", media.size));
        }

        let (bytes, mime) = self.channels.download_media(msg).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let desc = self
            .provider
            .complete_with_vision(VISION_MODEL, &encoded, &mime, "Describe this image concisely.", VisionDetail::Low)
            .await
            .map_err(|e| e.to_string())?;

        Ok(format!("[Image: {desc}]\n\n{}", msg.content))
    }

    async fn enrich_audio(&self, msg: &IncomingMessage) -> Result<String, String> {
        let media = msg.media.as_ref().expect("caller checked media.is_some()");
        let (bytes, _mime) = self.channels.download_media(msg).await?;

        let transcript = self
            .provider
            .transcribe_audio(&bytes, &media.filename, ASR_MODEL)
            .await
            .map_err(|e| e.to_string())?;

        let mut content = msg.content.clone();
        for placeholder in ["[audio]", "[voice note]"] {
            if content.contains(placeholder) {
                content = content.replace(placeholder, &transcript);
            }
        }
        if content == msg.content {
            // No placeholder token was present; append instead of silently dropping the transcript.
            content = format!("{content}\n\n[Transcript: {transcript}]").trim_start().to_string();
        }
        Ok(content)
    }
}
