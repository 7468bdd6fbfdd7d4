//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Groq, DeepSeek, vLLM, LM Studio and any
//! endpoint exposing `/chat/completions`.
//!
//! Wire shape:
//! - `messages[]` with a `system` and a `user` message
//! - reply text in `choices[0].message.content`
//! - streaming via SSE `data:` frames ending with `data: [DONE]`,
//!   usage in a trailing frame when `stream_options.include_usage` is set

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use webpilot_core::error::ProviderError;
use webpilot_core::provider::*;

use crate::http;
use crate::sse::{self, FrameDecoder, StreamEvent};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    descriptor: ProviderDescriptor,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: id.into(),
                base_url: http::trim_base(base_url),
                auth_mode: AuthMode::Bearer,
                streaming_supported: true,
                response_shape: ResponseShape::ChatCompletions,
            },
            api_key,
            client: http::build_client(Duration::from_secs(120)),
        }
    }

    pub fn openai(api_key: Option<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    pub fn openrouter(api_key: Option<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    pub fn groq(api_key: Option<String>) -> Self {
        Self::new("groq", "https://api.groq.com/openai/v1", api_key)
    }

    pub fn deepseek(api_key: Option<String>) -> Self {
        Self::new("deepseek", "https://api.deepseek.com/v1", api_key)
    }

    pub fn with_streaming(mut self, supported: bool) -> Self {
        self.descriptor.streaming_supported = supported;
        self
    }

    fn body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.prompt.system },
                { "role": "user", "content": request.prompt.user },
            ],
            "temperature": request.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url).header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.descriptor.base_url);
        debug!(provider = %self.descriptor.id, model = %request.model, "Sending completion request");

        let response = self
            .post(&url)
            .json(&Self::body(&request, false))
            .send()
            .await
            .map_err(http::send_error)?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.descriptor.id, response).await);
        }

        let api_response: ApiResponse = http::json_body(response).await?;
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        Ok(ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            usage: api_response.usage.map(ApiUsage::normalize),
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let url = format!("{}/chat/completions", self.descriptor.base_url);
        debug!(provider = %self.descriptor.id, model = %request.model, "Sending streaming request");

        let response = self
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&Self::body(&request, true))
            .send()
            .await
            .map_err(http::send_error)?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.descriptor.id, response).await);
        }

        Ok(sse::spawn_pump(
            self.descriptor.id.clone(),
            response.bytes_stream(),
            ChatCompletionsDecoder::new(&self.descriptor.id),
        ))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.descriptor.base_url);
        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder.send().await.map_err(http::send_error)?;
        Ok(response.status().is_success())
    }
}

/// Decodes `chat/completions` SSE frames.
pub struct ChatCompletionsDecoder {
    provider: String,
}

impl ChatCompletionsDecoder {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
        }
    }
}

impl FrameDecoder for ChatCompletionsDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let Some(data) = sse::sse_data(line) else {
            return Vec::new();
        };
        if data == "[DONE]" {
            return vec![StreamEvent::Done];
        }

        let frame: StreamResponse = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(e) => {
                sse::skip_malformed(&self.provider, data, &e);
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        if let Some(error) = frame.error {
            events.push(StreamEvent::Error(
                error.message.unwrap_or_else(|| "stream error".into()),
            ));
            return events;
        }
        if let Some(choice) = frame.choices.first() {
            if let Some(content) = choice.delta.content.as_ref().filter(|c| !c.is_empty()) {
                events.push(StreamEvent::Delta(content.clone()));
            }
            if let Some(reason) = &choice.finish_reason {
                debug!(provider = %self.provider, finish_reason = %reason, "Stream finished");
            }
        }
        // Usage arrives in its own frame after the finish_reason, just before [DONE].
        if let Some(usage) = frame.usage {
            events.push(StreamEvent::Usage(usage.normalize()));
        }
        events
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl ApiUsage {
    fn normalize(self) -> Usage {
        let mut usage = Usage::new(self.prompt_tokens, self.completion_tokens);
        usage.total_tokens = usage.total_tokens.max(self.total_tokens);
        usage
    }
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: Option<String>,
}
