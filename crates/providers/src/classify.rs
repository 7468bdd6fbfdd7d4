//! Gateway errors and the classification table for raw provider failures.
//!
//! Every message here is meant to be shown to the user as-is.

use webpilot_core::error::ProviderError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("No model selected. Set default_model in the config or pass --model provider:model.")]
    NoModelSelected,

    #[error("Unknown provider '{0}'.")]
    UnknownProvider(String),

    #[error("Model '{model}' is not enabled for provider '{provider}'.")]
    ModelNotAllowed { provider: String, model: String },

    #[error("No API key configured for {provider}. Add it to the config file or set {hint}.")]
    MissingCredentials { provider: String, hint: String },

    #[error("{provider} rejected the API key. Check your credentials.")]
    BadCredentials { provider: String },

    #[error("{provider} rate limit reached. Wait a moment and try again.")]
    RateLimited { provider: String },

    #[error("{provider} is having problems (HTTP {status}). Try again later.")]
    Upstream { provider: String, status: u16 },

    #[error("Could not reach {provider}. Check your network connection. ({detail})")]
    Connectivity { provider: String, detail: String },

    #[error(transparent)]
    Provider(ProviderError),
}

impl GatewayError {
    /// Whether the failure came from the backend rather than local validation.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::BadCredentials { .. }
                | Self::RateLimited { .. }
                | Self::Upstream { .. }
                | Self::Connectivity { .. }
                | Self::Provider(_)
        )
    }
}

/// Map a raw provider failure to the user-facing message set.
///
/// | raw failure                      | classified as     |
/// |----------------------------------|-------------------|
/// | HTTP 401 / 403                   | `BadCredentials`  |
/// | HTTP 429                         | `RateLimited`     |
/// | HTTP 5xx                         | `Upstream`        |
/// | network, timeout, broken stream  | `Connectivity`    |
/// | error frame sent in the stream   | passed through    |
/// | anything else                    | passed through    |
pub fn classify(provider: &str, error: ProviderError) -> GatewayError {
    let provider = provider.to_string();
    match &error {
        ProviderError::ApiError { status_code, .. } => match *status_code {
            401 | 403 => GatewayError::BadCredentials { provider },
            429 => GatewayError::RateLimited { provider },
            500..=599 => GatewayError::Upstream {
                provider,
                status: *status_code,
            },
            _ => GatewayError::Provider(error),
        },
        ProviderError::Network(detail)
        | ProviderError::Timeout(detail)
        | ProviderError::StreamInterrupted(detail) => GatewayError::Connectivity {
            provider,
            detail: detail.clone(),
        },
        _ => GatewayError::Provider(error),
    }
}
