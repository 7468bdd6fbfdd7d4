//! Model gateway: one call shape over every registered backend.
//!
//! Resolves `provider:model` keys (inferring the provider from the model id
//! when none is given), validates credentials before anything leaves the
//! process, and drives buffered or streamed replies through a
//! [`StreamObserver`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webpilot_config::{AppConfig, PROVIDER_KEY_VARS};
use webpilot_core::provider::*;

use crate::anthropic::AnthropicProvider;
use crate::classify::{GatewayError, classify};
use crate::gemini::GeminiProvider;
use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// A fully qualified model selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub provider: String,
    pub model: String,
}

impl ModelKey {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Guess the provider from the shape of a bare model id.
pub fn infer_provider(model: &str) -> &'static str {
    let m = model.to_ascii_lowercase();
    if m.contains('/') {
        "openrouter"
    } else if m.starts_with("gpt-")
        || m.starts_with("chatgpt-")
        || m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("o4")
    {
        "openai"
    } else if m.starts_with("claude") {
        "anthropic"
    } else if m.starts_with("gemini") {
        "gemini"
    } else if m.starts_with("deepseek") {
        "deepseek"
    } else {
        "ollama"
    }
}

/// One model call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub target: ModelKey,
    pub prompt: PromptParts,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

/// A finished reply, normalized across backends.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    pub model: String,
}

/// Receives a streamed reply as it arrives.
pub trait StreamObserver: Send {
    /// A new delta; `accumulated` already includes it.
    fn on_chunk(&mut self, delta: &str, accumulated: &str);

    /// Usage reported so far, merged across frames.
    fn on_usage(&mut self, _usage: &Usage) {}

    /// The reply is complete. Called exactly once per successful stream.
    fn on_complete(&mut self, _text: &str, _usage: &Usage) {}
}

/// Per-provider gateway settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Whether a usable credential is present (or none is needed).
    pub credentialed: bool,
    /// Allowed models. Empty = any.
    pub models: Vec<String>,
    pub streaming: bool,
    /// Where the user should put the missing key.
    pub key_hint: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            credentialed: true,
            models: Vec::new(),
            streaming: true,
            key_hint: String::new(),
        }
    }
}

struct Registration {
    provider: Arc<dyn Provider>,
    settings: ProviderSettings,
}

impl Registration {
    fn streams(&self) -> bool {
        self.settings.streaming && self.provider.descriptor().streaming_supported
    }
}

/// Routes invocations to the right backend.
pub struct ModelGateway {
    providers: HashMap<String, Registration>,
    default_model: String,
}

impl ModelGateway {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_model: default_model.into(),
        }
    }

    /// Register (or replace) a backend under its descriptor id.
    pub fn register(&mut self, provider: Arc<dyn Provider>, settings: ProviderSettings) {
        let id = provider.descriptor().id.clone();
        debug!(provider = %id, credentialed = settings.credentialed, "Registering provider");
        self.providers.insert(id, Registration { provider, settings });
    }

    /// Build the built-in catalog plus any custom OpenAI-compatible entries from config.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut gateway = Self::new(config.default_model.clone());

        let url = |id: &str| config.providers.get(id).and_then(|p| p.api_url.clone());
        let key = |id: &str| config.credential_for(id);

        let mut builtins: Vec<Arc<dyn Provider>> = vec![
            Arc::new(match url("openai") {
                Some(u) => OpenAiCompatProvider::new("openai", u, key("openai")),
                None => OpenAiCompatProvider::openai(key("openai")),
            }),
            Arc::new(match url("openrouter") {
                Some(u) => OpenAiCompatProvider::new("openrouter", u, key("openrouter")),
                None => OpenAiCompatProvider::openrouter(key("openrouter")),
            }),
            Arc::new(match url("groq") {
                Some(u) => OpenAiCompatProvider::new("groq", u, key("groq")),
                None => OpenAiCompatProvider::groq(key("groq")),
            }),
            Arc::new(match url("deepseek") {
                Some(u) => OpenAiCompatProvider::new("deepseek", u, key("deepseek")),
                None => OpenAiCompatProvider::deepseek(key("deepseek")),
            }),
        ];
        let mut anthropic = AnthropicProvider::new(key("anthropic"));
        if let Some(u) = url("anthropic") {
            anthropic = anthropic.with_base_url(u);
        }
        builtins.push(Arc::new(anthropic));
        let mut gemini = GeminiProvider::new(key("gemini"));
        if let Some(u) = url("gemini") {
            gemini = gemini.with_base_url(u);
        }
        builtins.push(Arc::new(gemini));
        builtins.push(Arc::new(OllamaProvider::new(url("ollama").as_deref())));

        for (id, provider_config) in &config.providers {
            if builtins.iter().any(|p| p.descriptor().id == *id) {
                continue;
            }
            match &provider_config.api_url {
                Some(api_url) => builtins.push(Arc::new(OpenAiCompatProvider::new(
                    id.clone(),
                    api_url.clone(),
                    key(id.as_str()),
                ))),
                None => warn!(provider = %id, "Custom provider has no api_url, skipping"),
            }
        }

        for provider in builtins {
            let descriptor = provider.descriptor();
            let id = descriptor.id.clone();
            let provider_config = config.providers.get(&id);
            let settings = ProviderSettings {
                credentialed: descriptor.auth_mode == AuthMode::None || key(id.as_str()).is_some(),
                models: provider_config.map(|p| p.models.clone()).unwrap_or_default(),
                streaming: provider_config
                    .and_then(|p| p.streaming)
                    .unwrap_or(config.streaming),
                key_hint: key_hint(&id),
            };
            gateway.register(provider, settings);
        }

        gateway
    }

    /// Turn a model key (possibly empty) into a concrete selection.
    pub fn resolve(&self, key: &str) -> Result<ModelKey, GatewayError> {
        let key = match key.trim() {
            "" => self.default_model.trim(),
            k => k,
        };
        if key.is_empty() {
            return Err(GatewayError::NoModelSelected);
        }

        // Ollama ids contain colons too ("llama3:8b"), so only a registered prefix counts.
        if let Some((provider, model)) = key.split_once(':') {
            if self.providers.contains_key(provider) {
                if model.trim().is_empty() {
                    return Err(GatewayError::NoModelSelected);
                }
                return Ok(ModelKey::new(provider, model.trim()));
            }
        }
        Ok(ModelKey::new(infer_provider(key), key))
    }

    fn validate(&self, target: &ModelKey) -> Result<&Registration, GatewayError> {
        if target.model.trim().is_empty() {
            return Err(GatewayError::NoModelSelected);
        }
        let registration = self
            .providers
            .get(&target.provider)
            .ok_or_else(|| GatewayError::UnknownProvider(target.provider.clone()))?;
        if !registration.settings.models.is_empty()
            && !registration.settings.models.iter().any(|m| m == &target.model)
        {
            return Err(GatewayError::ModelNotAllowed {
                provider: target.provider.clone(),
                model: target.model.clone(),
            });
        }
        if !registration.settings.credentialed {
            return Err(GatewayError::MissingCredentials {
                provider: target.provider.clone(),
                hint: registration.settings.key_hint.clone(),
            });
        }
        Ok(registration)
    }

    /// Check a selection without calling the backend.
    pub fn check(&self, target: &ModelKey) -> Result<(), GatewayError> {
        self.validate(target).map(|_| ())
    }

    /// Whether replies for `target` will actually be streamed.
    pub fn streams(&self, target: &ModelKey) -> bool {
        self.providers
            .get(&target.provider)
            .is_some_and(Registration::streams)
    }

    fn request(invocation: &Invocation, stream: bool) -> ProviderRequest {
        ProviderRequest {
            model: invocation.target.model.clone(),
            prompt: invocation.prompt.clone(),
            temperature: invocation.temperature,
            max_tokens: invocation.max_tokens,
            stream,
        }
    }

    /// Buffered call: one request, whole reply.
    pub async fn invoke(&self, invocation: &Invocation) -> Result<Completion, GatewayError> {
        let registration = self.validate(&invocation.target)?;
        let provider_id = &invocation.target.provider;
        info!(model = %invocation.target, "Invoking model");

        let response = registration
            .provider
            .complete(Self::request(invocation, false))
            .await
            .map_err(|e| classify(provider_id, e))?;

        let usage = response.usage.unwrap_or_default();
        debug!(
            model = %invocation.target,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Model replied"
        );
        Ok(Completion {
            text: response.text,
            usage,
            model: response.model,
        })
    }

    /// Streamed call. Falls back to a buffered call (delivered as one chunk)
    /// when the backend or the config disables streaming.
    pub async fn invoke_streaming(
        &self,
        invocation: &Invocation,
        observer: &mut dyn StreamObserver,
    ) -> Result<Completion, GatewayError> {
        let registration = self.validate(&invocation.target)?;
        if !registration.streams() {
            let completion = self.invoke(invocation).await?;
            observer.on_chunk(&completion.text, &completion.text);
            observer.on_usage(&completion.usage);
            observer.on_complete(&completion.text, &completion.usage);
            return Ok(completion);
        }

        let provider_id = &invocation.target.provider;
        info!(model = %invocation.target, "Invoking model (streaming)");
        let mut rx = registration
            .provider
            .stream(Self::request(invocation, true))
            .await
            .map_err(|e| classify(provider_id, e))?;

        let mut text = String::new();
        let mut usage = Usage::default();
        while let Some(item) = rx.recv().await {
            let chunk = item.map_err(|e| classify(provider_id, e))?;
            if let Some(delta) = chunk.content.as_deref().filter(|d| !d.is_empty()) {
                text.push_str(delta);
                observer.on_chunk(delta, &text);
            }
            if let Some(reported) = chunk.usage {
                usage.merge(reported);
                observer.on_usage(&usage);
            }
            if chunk.done {
                break;
            }
        }

        observer.on_complete(&text, &usage);
        Ok(Completion {
            text,
            usage,
            model: invocation.target.model.clone(),
        })
    }

    /// Descriptors of every registered backend, sorted by id.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut out: Vec<_> = self
            .providers
            .values()
            .map(|r| r.provider.descriptor().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn is_credentialed(&self, provider_id: &str) -> bool {
        self.providers
            .get(provider_id)
            .is_some_and(|r| r.settings.credentialed)
    }

    /// Reachability of one backend.
    pub async fn health(&self, provider_id: &str) -> Result<bool, GatewayError> {
        let registration = self
            .providers
            .get(provider_id)
            .ok_or_else(|| GatewayError::UnknownProvider(provider_id.to_string()))?;
        registration
            .provider
            .health_check()
            .await
            .map_err(|e| classify(provider_id, e))
    }
}

fn key_hint(provider_id: &str) -> String {
    PROVIDER_KEY_VARS
        .iter()
        .find(|(id, _)| *id == provider_id)
        .map(|(_, var)| (*var).to_string())
        .unwrap_or_else(|| format!("providers.{provider_id}.api_key or WEBPILOT_API_KEY"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use webpilot_core::error::ProviderError;

    /// Streams a fixed list of chunks.
    struct ChunkedProvider {
        descriptor: ProviderDescriptor,
        chunks: Vec<Result<StreamChunk, ProviderError>>,
    }

    impl ChunkedProvider {
        fn new(id: &str, chunks: Vec<Result<StreamChunk, ProviderError>>) -> Self {
            Self {
                descriptor: ProviderDescriptor {
                    id: id.into(),
                    base_url: "http://test".into(),
                    auth_mode: AuthMode::Bearer,
                    streaming_supported: true,
                    response_shape: ResponseShape::ChatCompletions,
                },
                chunks,
            }
        }
    }

    #[async_trait]
    impl Provider for ChunkedProvider {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let text = self
                .chunks
                .iter()
                .filter_map(|c| c.as_ref().ok().and_then(|c| c.content.clone()))
                .collect();
            Ok(ProviderResponse {
                text,
                usage: Some(Usage::new(1, 1)),
                model: request.model,
            })
        }

        async fn stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            for chunk in self.chunks.clone() {
                let _ = tx.send(chunk).await;
            }
            Ok(rx)
        }
    }

    #[derive(Default)]
    struct Recorder {
        deltas: Vec<String>,
        usage: Vec<Usage>,
        completed: Vec<String>,
    }

    impl StreamObserver for Recorder {
        fn on_chunk(&mut self, delta: &str, _accumulated: &str) {
            self.deltas.push(delta.to_string());
        }
        fn on_usage(&mut self, usage: &Usage) {
            self.usage.push(*usage);
        }
        fn on_complete(&mut self, text: &str, _usage: &Usage) {
            self.completed.push(text.to_string());
        }
    }

    fn gateway_with(provider: ChunkedProvider, settings: ProviderSettings) -> ModelGateway {
        let mut gateway = ModelGateway::new("test:model-a");
        gateway.register(Arc::new(provider), settings);
        gateway
    }

    fn invocation(target: ModelKey) -> Invocation {
        Invocation {
            target,
            prompt: PromptParts::new("s", "u"),
            max_tokens: None,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn three_chunk_stream_completes_with_full_text() {
        let gateway = gateway_with(
            ChunkedProvider::new(
                "test",
                vec![
                    Ok(StreamChunk::delta("Hel")),
                    Ok(StreamChunk::delta("lo")),
                    Ok(StreamChunk::delta(" world")),
                    Ok(StreamChunk::done()),
                ],
            ),
            ProviderSettings::default(),
        );
        let mut recorder = Recorder::default();
        let completion = gateway
            .invoke_streaming(&invocation(ModelKey::new("test", "m")), &mut recorder)
            .await
            .unwrap();
        assert_eq!(recorder.deltas, vec!["Hel", "lo", " world"]);
        assert_eq!(recorder.completed, vec!["Hello world"]);
        assert_eq!(completion.text, "Hello world");
    }

    #[tokio::test]
    async fn interim_usage_is_merged_and_reported() {
        let gateway = gateway_with(
            ChunkedProvider::new(
                "test",
                vec![
                    Ok(StreamChunk::usage(Usage::new(40, 1))),
                    Ok(StreamChunk::delta("ok")),
                    Ok(StreamChunk::usage(Usage::new(0, 9))),
                    Ok(StreamChunk::done()),
                ],
            ),
            ProviderSettings::default(),
        );
        let mut recorder = Recorder::default();
        let completion = gateway
            .invoke_streaming(&invocation(ModelKey::new("test", "m")), &mut recorder)
            .await
            .unwrap();
        assert_eq!(recorder.usage.len(), 2);
        assert_eq!(completion.usage, Usage::new(40, 9));
    }

    #[tokio::test]
    async fn stream_error_is_classified() {
        let gateway = gateway_with(
            ChunkedProvider::new(
                "test",
                vec![
                    Ok(StreamChunk::delta("par")),
                    Err(ProviderError::StreamInterrupted("reset by peer".into())),
                ],
            ),
            ProviderSettings::default(),
        );
        let mut recorder = Recorder::default();
        let err = gateway
            .invoke_streaming(&invocation(ModelKey::new("test", "m")), &mut recorder)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Connectivity { .. }));
        assert!(recorder.completed.is_empty());
    }

    #[tokio::test]
    async fn non_streaming_provider_delivers_one_chunk() {
        let gateway = gateway_with(
            ChunkedProvider::new("test", vec![Ok(StreamChunk::delta("whole"))]),
            ProviderSettings {
                streaming: false,
                ..ProviderSettings::default()
            },
        );
        let mut recorder = Recorder::default();
        gateway
            .invoke_streaming(&invocation(ModelKey::new("test", "m")), &mut recorder)
            .await
            .unwrap();
        assert_eq!(recorder.deltas, vec!["whole"]);
        assert_eq!(recorder.completed, vec!["whole"]);
    }

    #[tokio::test]
    async fn missing_credentials_fail_fast() {
        let gateway = gateway_with(
            ChunkedProvider::new("test", vec![]),
            ProviderSettings {
                credentialed: false,
                key_hint: "TEST_API_KEY".into(),
                ..ProviderSettings::default()
            },
        );
        let err = gateway
            .invoke(&invocation(ModelKey::new("test", "m")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("TEST_API_KEY"));
    }

    #[tokio::test]
    async fn model_allowlist_is_enforced() {
        let gateway = gateway_with(
            ChunkedProvider::new("test", vec![]),
            ProviderSettings {
                models: vec!["model-a".into()],
                ..ProviderSettings::default()
            },
        );
        assert!(gateway.check(&ModelKey::new("test", "model-a")).is_ok());
        assert!(matches!(
            gateway.check(&ModelKey::new("test", "model-b")),
            Err(GatewayError::ModelNotAllowed { .. })
        ));
        assert!(matches!(
            gateway.check(&ModelKey::new("nope", "x")),
            Err(GatewayError::UnknownProvider(_))
        ));
    }

    #[test]
    fn resolve_composite_and_inferred_keys() {
        let gateway = ModelGateway::from_config(&AppConfig::default());
        assert_eq!(
            gateway.resolve("anthropic:claude-sonnet-4-20250514").unwrap(),
            ModelKey::new("anthropic", "claude-sonnet-4-20250514")
        );
        assert_eq!(
            gateway.resolve("ollama:llama3.1:8b").unwrap(),
            ModelKey::new("ollama", "llama3.1:8b")
        );
        assert_eq!(
            gateway.resolve("llama3.1:8b").unwrap(),
            ModelKey::new("ollama", "llama3.1:8b")
        );
        assert_eq!(gateway.resolve("gpt-4o").unwrap().provider, "openai");
        assert_eq!(gateway.resolve("gemini-2.0-flash").unwrap().provider, "gemini");
        assert_eq!(
            gateway.resolve("meta-llama/llama-3.1-70b-instruct").unwrap().provider,
            "openrouter"
        );
        // Empty falls back to the configured default.
        assert_eq!(gateway.resolve("").unwrap(), ModelKey::new("openai", "gpt-4o-mini"));
    }

    #[test]
    fn resolve_without_any_model_fails() {
        let gateway = ModelGateway::new("");
        assert!(matches!(gateway.resolve("  "), Err(GatewayError::NoModelSelected)));
    }

    #[test]
    fn from_config_marks_credentials() {
        let mut config = AppConfig::default();
        config.apply_env(|name| (name == "ANTHROPIC_API_KEY").then(|| "sk-ant".to_string()));
        let gateway = ModelGateway::from_config(&config);
        assert!(gateway.is_credentialed("anthropic"));
        assert!(gateway.is_credentialed("ollama"));
        assert!(!gateway.is_credentialed("openai"));
        let err = gateway.check(&ModelKey::new("openai", "gpt-4o")).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn descriptors_are_sorted() {
        let gateway = ModelGateway::from_config(&AppConfig::default());
        let ids: Vec<String> = gateway.descriptors().into_iter().map(|d| d.id).collect();
        assert_eq!(
            ids,
            vec!["anthropic", "deepseek", "gemini", "groq", "ollama", "openai", "openrouter"]
        );
    }
}
