//! Shared fixtures for orchestrator tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use webpilot_browser::mock::ScriptedPage;
use webpilot_browser::{DomExecutor, ElementRegistry, ScriptSnapshotSource};
use webpilot_core::error::ProviderError;
use webpilot_core::provider::*;
use webpilot_history::InMemoryHistoryStore;
use webpilot_providers::{ModelGateway, ProviderSettings};

use crate::orchestrator::{RunSettings, TaskOrchestrator};

/// Well-formed model reply.
pub fn reply(thought: &str, action: &str) -> String {
    format!("<thought>{thought}</thought>\n<action>{action}</action>")
}

/// Returns scripted replies in order, streamed in three pieces.
///
/// Panics if called more times than it has replies.
pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<String>) -> Self {
        Self::from_results(replies.into_iter().map(Ok).collect())
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::from_results(vec![Err(error)])
    }

    fn from_results(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: "scripted".into(),
                base_url: "http://scripted".into(),
                auth_mode: AuthMode::None,
                streaming_supported: true,
                response_shape: ResponseShape::ChatCompletions,
            },
            replies: Mutex::new(replies),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn next(&self) -> Result<String, ProviderError> {
        let mut calls = self.calls.lock().unwrap();
        let replies = self.replies.lock().unwrap();
        let reply = replies.get(*calls).cloned().unwrap_or_else(|| {
            panic!(
                "ScriptedProvider: no more replies (call #{}, have {})",
                *calls,
                replies.len()
            )
        });
        *calls += 1;
        reply
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: self.next()?,
            usage: Some(Usage::new(10, 5)),
            model: request.model,
        })
    }

    async fn stream(
        &self,
        _request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let text = self.next()?;
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let chars: Vec<char> = text.chars().collect();
        let third = chars.len().div_ceil(3).max(1);
        for piece in chars.chunks(third) {
            let _ = tx.send(Ok(StreamChunk::delta(piece.iter().collect::<String>()))).await;
        }
        let _ = tx.send(Ok(StreamChunk::usage(Usage::new(10, 5)))).await;
        let _ = tx.send(Ok(StreamChunk::done())).await;
        Ok(rx)
    }
}

/// An orchestrator wired to a scripted page, provider and in-memory store.
pub struct Harness {
    pub page: Arc<ScriptedPage>,
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<InMemoryHistoryStore>,
    pub orchestrator: TaskOrchestrator,
}

impl Harness {
    pub fn new(page: ScriptedPage, replies: Vec<String>, settings: RunSettings) -> Self {
        Self::with_provider(page, ScriptedProvider::new(replies), settings)
    }

    pub fn with_provider(page: ScriptedPage, provider: ScriptedProvider, settings: RunSettings) -> Self {
        Self::build(page, provider, ProviderSettings::default(), settings)
    }

    /// Provider registered without a usable credential.
    pub fn uncredentialed(page: ScriptedPage) -> Self {
        Self::build(
            page,
            ScriptedProvider::new(Vec::new()),
            ProviderSettings {
                credentialed: false,
                key_hint: "SCRIPTED_API_KEY".into(),
                ..ProviderSettings::default()
            },
            RunSettings::default(),
        )
    }

    fn build(
        page: ScriptedPage,
        provider: ScriptedProvider,
        provider_settings: ProviderSettings,
        mut settings: RunSettings,
    ) -> Self {
        settings.model = "scripted:mock-model".into();
        let page = Arc::new(page);
        let provider = Arc::new(provider);
        let store = Arc::new(InMemoryHistoryStore::new());

        let mut gateway = ModelGateway::new("");
        gateway.register(provider.clone(), provider_settings);
        let executor = DomExecutor::new(page.clone(), Arc::new(ElementRegistry::new()));
        let orchestrator = TaskOrchestrator::new(
            Arc::new(gateway),
            Arc::new(executor),
            Arc::new(ScriptSnapshotSource::new(page.clone())),
            store.clone(),
            settings,
        );
        Self {
            page,
            provider,
            store,
            orchestrator,
        }
    }
}
