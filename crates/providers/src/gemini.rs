//! Google Gemini provider (`generateContent`).
//!
//! - API key travels as the `key` query parameter
//! - system prompt in `systemInstruction`, user turn in `contents[]`
//! - streaming via `:streamGenerateContent?alt=sse`; every frame is a full
//!   `GenerateContentResponse`, the last one carries `finishReason`
//! - usage in `usageMetadata` (`promptTokenCount`, `candidatesTokenCount`, `totalTokenCount`)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use webpilot_core::error::ProviderError;
use webpilot_core::provider::*;

use crate::http;
use crate::sse::{self, FrameDecoder, StreamEvent};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    descriptor: ProviderDescriptor,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: "gemini".into(),
                base_url: DEFAULT_BASE_URL.into(),
                auth_mode: AuthMode::QueryParam,
                streaming_supported: true,
                response_shape: ResponseShape::GenerateContent,
            },
            api_key,
            client: http::build_client(Duration::from_secs(120)),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.descriptor.base_url = http::trim_base(base_url);
        self
    }

    fn body(request: &ProviderRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user".into(),
                parts: vec![Part {
                    text: request.prompt.user.clone(),
                }],
            }],
            system_instruction: (!request.prompt.system.is_empty()).then(|| Content {
                role: "system".into(),
                parts: vec![Part {
                    text: request.prompt.system.clone(),
                }],
            }),
            generation_config: GenerationConfig {
                temperature: Some(request.temperature),
                max_output_tokens: request.max_tokens,
            },
        }
    }

    fn url(&self, model: &str, method: &str) -> String {
        let key = self.api_key.as_deref().unwrap_or_default();
        let sse = if method == "streamGenerateContent" { "alt=sse&" } else { "" };
        format!(
            "{}/models/{model}:{method}?{sse}key={key}",
            self.descriptor.base_url
        )
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(model = %request.model, "Sending Gemini generateContent request");
        let response = self
            .client
            .post(self.url(&request.model, "generateContent"))
            .json(&Self::body(&request))
            .send()
            .await
            .map_err(http::send_error)?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.descriptor.id, response).await);
        }

        let body: GenerateContentResponse = http::json_body(response).await?;
        let candidate = body
            .candidates
            .first()
            .ok_or_else(|| ProviderError::MalformedResponse("No candidates in response".into()))?;

        Ok(ProviderResponse {
            text: candidate.text(),
            usage: body.usage_metadata.map(UsageMetadata::normalize),
            model: body.model_version.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        debug!(model = %request.model, "Sending Gemini streaming request");
        let response = self
            .client
            .post(self.url(&request.model, "streamGenerateContent"))
            .json(&Self::body(&request))
            .send()
            .await
            .map_err(http::send_error)?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.descriptor.id, response).await);
        }

        Ok(sse::spawn_pump(
            self.descriptor.id.clone(),
            response.bytes_stream(),
            GenerateContentDecoder,
        ))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let key = self.api_key.as_deref().unwrap_or_default();
        let url = format!("{}/models?key={key}", self.descriptor.base_url);
        let response = self.client.get(&url).send().await.map_err(http::send_error)?;
        Ok(response.status().is_success())
    }
}

/// Decodes `streamGenerateContent?alt=sse` frames.
pub struct GenerateContentDecoder;

impl FrameDecoder for GenerateContentDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let Some(data) = sse::sse_data(line) else {
            return Vec::new();
        };
        let frame: GenerateContentResponse = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(e) => {
                sse::skip_malformed("gemini", data, &e);
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        if let Some(error) = frame.error {
            events.push(StreamEvent::Error(error.message));
            return events;
        }
        let mut finished = false;
        if let Some(candidate) = frame.candidates.first() {
            let text = candidate.text();
            if !text.is_empty() {
                events.push(StreamEvent::Delta(text));
            }
            finished = candidate.finish_reason.is_some();
        }
        if let Some(usage) = frame.usage_metadata {
            events.push(StreamEvent::Usage(usage.normalize()));
        }
        if finished {
            events.push(StreamEvent::Done);
        }
        events
    }
}

// --- Gemini API types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl Candidate {
    fn text(&self) -> String {
        self.content
            .as_ref()
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl UsageMetadata {
    fn normalize(self) -> Usage {
        let mut usage = Usage::new(self.prompt_token_count, self.candidates_token_count);
        usage.total_tokens = usage.total_tokens.max(self.total_token_count);
        usage
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}
