//! HTTP plumbing shared by every backend.

use std::time::Duration;
use tracing::warn;
use webpilot_core::error::ProviderError;

pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to a default HTTP client");
            reqwest::Client::new()
        })
}

pub(crate) fn trim_base(url: impl Into<String>) -> String {
    url.into().trim_end_matches('/').to_string()
}

/// Map a transport failure.
pub(crate) fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turn a non-2xx response into an `ApiError` carrying the backend's own message.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status, body = %body, "Provider returned error");
    ProviderError::ApiError {
        status_code: status,
        message: extract_error_message(&body),
    }
}

/// Pull the human-readable message out of an error body.
///
/// Understands `{"error":{"message":..}}` (OpenAI, Anthropic, Gemini),
/// `{"error":".."}` (Ollama) and `{"message":..}`; anything else is returned as-is.
pub(crate) fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    value["error"]["message"]
        .as_str()
        .or_else(|| value["error"].as_str())
        .or_else(|| value["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Parse a successful JSON body.
pub(crate) async fn json_body<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))
}
