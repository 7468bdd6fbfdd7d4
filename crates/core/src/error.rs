//! Error types for the WebPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all WebPilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Page / DOM errors ---
    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Element error: {0}")]
    Element(#[from] ElementError),

    // --- History persistence ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Raw failures reported by a model backend, before classification.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// An error frame the backend itself sent mid-stream.
    #[error("Provider reported an error: {0}")]
    StreamError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Failures talking to the live page itself.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Input dispatch failed: {0}")]
    Input(String),

    #[error("Navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Page connection lost: {0}")]
    Disconnected(String),
}

/// Failures targeting a specific element handle.
#[derive(Debug, Clone, Error)]
pub enum ElementError {
    #[error("Element not found: {id}")]
    NotFound { id: u32 },

    #[error("Element not found: {id} is from snapshot {handle_generation}, current snapshot is {current_generation}")]
    Stale {
        id: u32,
        handle_generation: u64,
        current_generation: u64,
    },

    #[error("Element {id} could not be made visible: {diagnostics}")]
    NotVisible { id: u32, diagnostics: String },

    #[error("Element {id} has no usable click point: {diagnostics}")]
    InvalidGeometry { id: u32, diagnostics: String },

    #[error("Text input rejected: {0}")]
    TextPolicy(String),

    #[error(transparent)]
    Page(#[from] PageError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Chat not found: {0}")]
    NotFound(String),
}
