//! Ollama native provider (`/api/chat`).
//!
//! Ollama streams newline-delimited JSON envelopes rather than SSE. Each
//! envelope carries a `message.content` delta; the last one has
//! `"done": true` plus `prompt_eval_count` / `eval_count`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use webpilot_core::error::ProviderError;
use webpilot_core::provider::*;

use crate::http;
use crate::sse::{self, FrameDecoder, StreamEvent};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: "ollama".into(),
                base_url: http::trim_base(base_url.unwrap_or(DEFAULT_BASE_URL)),
                auth_mode: AuthMode::None,
                streaming_supported: true,
                response_shape: ResponseShape::OllamaChat,
            },
            // Local models can take a while to load on first use.
            client: http::build_client(Duration::from_secs(300)),
        }
    }

    fn body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut options = serde_json::json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }
        serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.prompt.system },
                { "role": "user", "content": request.prompt.user },
            ],
            "stream": stream,
            "options": options,
        })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/api/chat", self.descriptor.base_url);
        debug!(model = %request.model, "Sending Ollama chat request");

        let response = self
            .client
            .post(&url)
            .json(&Self::body(&request, false))
            .send()
            .await
            .map_err(http::send_error)?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.descriptor.id, response).await);
        }

        let envelope: ChatEnvelope = http::json_body(response).await?;
        if let Some(error) = envelope.error {
            return Err(ProviderError::MalformedResponse(error));
        }
        Ok(ProviderResponse {
            usage: envelope.usage(),
            text: envelope.message.map(|m| m.content).unwrap_or_default(),
            model: envelope.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let url = format!("{}/api/chat", self.descriptor.base_url);
        debug!(model = %request.model, "Sending Ollama streaming request");

        let response = self
            .client
            .post(&url)
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
            OllamaChatDecoder,
        ))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.descriptor.base_url);
        let response = self.client.get(&url).send().await.map_err(http::send_error)?;
        Ok(response.status().is_success())
    }
}

/// Decodes NDJSON chat envelopes.
pub struct OllamaChatDecoder;

impl FrameDecoder for OllamaChatDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let envelope: ChatEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                sse::skip_malformed("ollama", line, &e);
                return Vec::new();
            }
        };
        if let Some(error) = envelope.error {
            return vec![StreamEvent::Error(error)];
        }

        let mut events = Vec::new();
        if let Some(message) = &envelope.message {
            if !message.content.is_empty() {
                events.push(StreamEvent::Delta(message.content.clone()));
            }
        }
        if envelope.done {
            if let Some(usage) = envelope.usage() {
                events.push(StreamEvent::Usage(usage));
            }
            events.push(StreamEvent::Done);
        }
        events
    }
}

#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

impl ChatEnvelope {
    fn usage(&self) -> Option<Usage> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (p, c) => Some(Usage::new(p.unwrap_or(0), c.unwrap_or(0))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}
