//! LLM provider implementations and the model gateway for WebPilot.
//!
//! All backends implement the `webpilot_core::Provider` trait.
//! The gateway resolves model keys, validates credentials, and routes
//! buffered or streamed calls to the right backend.

pub mod anthropic;
pub mod classify;
pub mod gateway;
pub mod gemini;
mod http;
pub mod ollama;
pub mod openai_compat;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use classify::{GatewayError, classify};
pub use gateway::{
    Completion, Invocation, ModelGateway, ModelKey, ProviderSettings, StreamObserver,
    infer_provider,
};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
