//! `OpenAiProvider` — an OpenAI-compatible HTTP [`LLMProvider`] (spec §6 LLM
//! contract: "external collaborator, only the abstraction is in scope").
//!
//! This is a minimal concrete backend so `corvidd` has something real to
//! run against out of the box. It targets the Chat Completions API and any
//! service that mirrors it (Azure OpenAI, OpenRouter, local proxies, …) by
//! way of a configurable `base_url`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::model::{ChatMessage, ChatRole, ToolCall};

use super::provider::{DeltaCallback, LLMError, LLMProvider, Result};
use super::types::{CompletionRequest, CompletionResponse, TokenUsage, VisionDetail};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    context_limit: usize,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1")
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            context_limit: 128_000,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn post(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LLMError::RateLimited { retry_after });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LLMError::Auth(format!("provider returned {status}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if text.contains("context_length_exceeded") || text.contains("maximum context length") {
                return Err(LLMError::ContextOverflow);
            }
            return Err(LLMError::Other(format!("{status}: {text}")));
        }
        resp.json().await.map_err(|e| LLMError::Other(e.to_string()))
    }
}

fn classify_transport_error(e: &reqwest::Error) -> LLMError {
    if e.is_timeout() || e.is_connect() {
        LLMError::Transient(e.to_string())
    } else {
        LLMError::Other(e.to_string())
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: String,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireResponseToolCall>,
}

#[derive(Deserialize)]
struct WireResponseToolCall {
    id: String,
    function: WireResponseFunctionCall,
}

#[derive(Deserialize)]
struct WireResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn to_wire_message(msg: &ChatMessage) -> WireMessage {
    WireMessage {
        role: match msg.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        },
        content: msg.content.clone(),
        tool_calls: msg
            .tool_calls
            .iter()
            .map(|tc| WireToolCall {
                id: tc.id.clone(),
                kind: "function",
                function: WireFunctionCall { name: tc.name.clone(), arguments: tc.arguments.to_string() },
            })
            .collect(),
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn build_request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<WireMessage> = request.messages.iter().map(to_wire_message).collect();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": stream,
    });
    if !request.tools.is_empty() {
        let tools: Vec<serde_json::Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

fn parse_response(body: serde_json::Value) -> Result<CompletionResponse> {
    let parsed: WireResponse = serde_json::from_value(body).map_err(|e| LLMError::Other(e.to_string()))?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| LLMError::Other("empty choices".to_string()))?;
    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::Value::Null),
        })
        .collect();
    let usage = parsed.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });
    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: usage.unwrap_or_default(),
        model_used: parsed.model,
    })
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = build_request_body(&request, false);
        let resp = self.post(body).await?;
        parse_response(resp)
    }

    async fn complete_stream(&self, request: CompletionRequest, on_delta: &DeltaCallback) -> Result<CompletionResponse> {
        // Streaming over server-sent events needs a wire-format parser this
        // crate deliberately doesn't own (spec Non-goals: "the LLM wire
        // format beyond the abstraction"). Fall back to a single
        // non-streamed call and deliver it as one delta.
        let result = self.complete(request).await?;
        on_delta(&result.content);
        Ok(result)
    }

    async fn complete_with_vision(
        &self,
        model: &str,
        image_base64: &str,
        mime: &str,
        prompt: &str,
        detail: VisionDetail,
    ) -> Result<String> {
        let detail_str = match detail {
            VisionDetail::Low => "low",
            VisionDetail::High => "high",
        };
        let body = json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:{mime};base64,{image_base64}"),
                        "detail": detail_str,
                    }}
                ]
            }]
        });
        let resp = self.post(body).await?;
        Ok(parse_response(resp)?.content)
    }

    async fn transcribe_audio(&self, bytes: &[u8], filename: &str, model: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part).text("model", model.to_string());
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        if !resp.status().is_success() {
            return Err(LLMError::Other(format!("transcription failed: {}", resp.status())));
        }
        #[derive(Deserialize)]
        struct TranscriptionResponse {
            text: String,
        }
        let parsed: TranscriptionResponse = resp.json().await.map_err(|e| LLMError::Other(e.to_string()))?;
        Ok(parsed.text)
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolDefinition;

    #[test]
    fn builds_minimal_request_body() {
        let request = CompletionRequest::new("gpt-4o-mini", vec![ChatMessage::system("hi")]);
        let body = build_request_body(&request, false);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn includes_tools_when_present() {
        let tool = ToolDefinition {
            name: "search".to_string(),
            description: "search the web".to_string(),
            parameters_schema: json!({"type": "object"}),
            required_level: crate::model::AccessLevel::User,
            flags: Default::default(),
        };
        let request = CompletionRequest::new("gpt-4o-mini", vec![]).with_tools(vec![tool]);
        let body = build_request_body(&request, false);
        assert_eq!(body["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn parses_minimal_response() {
        let raw = json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.usage.total_tokens, 15);
    }

    #[test]
    fn parses_tool_call_arguments_as_json() {
        let raw = json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "call_1", "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}}]
            }}]
        });
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].arguments["q"], "rust");
    }
}
