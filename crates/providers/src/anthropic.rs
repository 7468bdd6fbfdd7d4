//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via typed SSE events: `message_start` carries input usage,
//!   `content_block_delta` carries text, `message_delta` carries output
//!   usage, `message_stop` ends the reply

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use webpilot_core::error::ProviderError;
use webpilot_core::provider::*;

use crate::http;
use crate::sse::{self, FrameDecoder, StreamEvent};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// The Messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    descriptor: ProviderDescriptor,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: "anthropic".into(),
                base_url: DEFAULT_BASE_URL.into(),
                auth_mode: AuthMode::Header,
                streaming_supported: true,
                response_shape: ResponseShape::Messages,
            },
            api_key,
            client: http::build_client(Duration::from_secs(300)),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.descriptor.base_url = http::trim_base(base_url);
        self
    }

    fn body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{ "role": "user", "content": request.prompt.user }],
            "temperature": request.temperature,
            "stream": stream,
        });
        if !request.prompt.system.is_empty() {
            body["system"] = serde_json::json!(request.prompt.system);
        }
        body
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.descriptor.base_url);
        debug!(model = %request.model, "Sending Anthropic completion request");

        let response = self
            .post(&url)
            .json(&Self::body(&request, false))
            .send()
            .await
            .map_err(http::send_error)?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.descriptor.id, response).await);
        }

        let resp: AnthropicResponse = http::json_body(response).await?;
        Ok(resp.into_provider_response())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let url = format!("{}/v1/messages", self.descriptor.base_url);
        debug!(model = %request.model, "Sending Anthropic streaming request");

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
            MessagesDecoder::default(),
        ))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/v1/models", self.descriptor.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(http::send_error)?;
        Ok(response.status().is_success())
    }
}

/// Decodes Messages API SSE frames.
///
/// Input tokens arrive with `message_start`, output tokens with
/// `message_delta`; both are reported as they come and merged downstream.
#[derive(Debug, Default)]
pub struct MessagesDecoder {
    usage: Usage,
}

impl FrameDecoder for MessagesDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<StreamEvent> {
        // `event:` lines are redundant with the `type` field in the data.
        let Some(data) = sse::sse_data(line) else {
            return Vec::new();
        };
        let event: StreamFrame = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                sse::skip_malformed("anthropic", data, &e);
                return Vec::new();
            }
        };

        match event {
            StreamFrame::MessageStart { message } => {
                self.usage.prompt_tokens = message.usage.input_tokens;
                self.usage.completion_tokens = message.usage.output_tokens;
                self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
                vec![StreamEvent::Usage(self.usage)]
            }
            StreamFrame::ContentBlockDelta { delta } => match delta {
                BlockDelta::TextDelta { text } => vec![StreamEvent::Delta(text)],
                BlockDelta::Other => Vec::new(),
            },
            StreamFrame::MessageDelta { usage } => match usage {
                Some(usage) => {
                    self.usage.completion_tokens = usage.output_tokens;
                    self.usage.total_tokens = self.usage.prompt_tokens + usage.output_tokens;
                    vec![StreamEvent::Usage(self.usage)]
                }
                None => Vec::new(),
            },
            StreamFrame::MessageStop => vec![StreamEvent::Done],
            StreamFrame::Error { error } => vec![StreamEvent::Error(error.message)],
            StreamFrame::Other => Vec::new(),
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

impl AnthropicResponse {
    fn into_provider_response(self) -> ProviderResponse {
        let text = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        ProviderResponse {
            text,
            usage: Some(Usage::new(self.usage.input_tokens, self.usage.output_tokens)),
            model: self.model,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Error {
        error: StreamErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            prompt: PromptParts::new("system rules", "page context"),
            temperature: 0.0,
            max_tokens: None,
            stream: false,
        }
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new(Some("sk-ant-test".into()));
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.descriptor().base_url, DEFAULT_BASE_URL);
        assert_eq!(provider.descriptor().auth_mode, AuthMode::Header);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new(None).with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.descriptor().base_url, "https://custom.proxy.com");
    }

    #[test]
    fn body_puts_system_at_top_level() {
        let body = AnthropicProvider::body(&request(), false);
        assert_eq!(body["system"], "system rules");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn decoder_walks_the_event_sequence() {
        let mut d = MessagesDecoder::default();
        assert!(d.decode_line("event: message_start").is_empty());
        assert_eq!(
            d.decode_line(r#"data: {"type":"message_start","message":{"id":"m","usage":{"input_tokens":25,"output_tokens":1}}}"#),
            vec![StreamEvent::Usage(Usage::new(25, 1))]
        );
        assert!(d
            .decode_line(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#)
            .is_empty());
        assert_eq!(
            d.decode_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#),
            vec![StreamEvent::Delta("Hello".into())]
        );
        assert!(d.decode_line(r#"data: {"type":"ping"}"#).is_empty());
        assert_eq!(
            d.decode_line(r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":15}}"#),
            vec![StreamEvent::Usage(Usage::new(25, 15))]
        );
        assert_eq!(d.decode_line(r#"data: {"type":"message_stop"}"#), vec![StreamEvent::Done]);
    }

    #[test]
    fn decoder_surfaces_stream_errors() {
        let mut d = MessagesDecoder::default();
        assert_eq!(
            d.decode_line(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            vec![StreamEvent::Error("Overloaded".into())]
        );
    }

    #[test]
    fn parse_text_response() {
        let resp: AnthropicResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_1",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "Hello!"}, {"type": "thinking", "thinking": "hmm"}],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        let out = resp.into_provider_response();
        assert_eq!(out.text, "Hello!");
        assert_eq!(out.usage, Some(Usage::new(10, 5)));
    }

    #[tokio::test]
    async fn complete_sends_anthropic_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": "<thought>x</thought><action>finish()</action>"}],
                "usage": {"input_tokens": 7, "output_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(Some("sk-ant-test".into())).with_base_url(server.uri());
        let response = provider.complete(request()).await.unwrap();
        assert!(response.text.ends_with("finish()</action>"));
        assert_eq!(response.usage.unwrap().total_tokens, 10);
    }
}
