//! Gateway behaviour against real HTTP backends (mocked with wiremock).

use webpilot_config::{AppConfig, ProviderConfig};
use webpilot_core::provider::{PromptParts, Usage};
use webpilot_providers::{GatewayError, Invocation, ModelGateway, StreamObserver};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_pointing_at(uri: &str) -> AppConfig {
    let mut config = AppConfig::default();
    for id in ["openai", "anthropic", "gemini", "ollama", "openrouter"] {
        config.providers.insert(
            id.into(),
            ProviderConfig {
                api_key: Some(format!("{id}-key")),
                api_url: Some(uri.to_string()),
                ..ProviderConfig::default()
            },
        );
    }
    config
}

fn invocation(gateway: &ModelGateway, key: &str) -> Invocation {
    Invocation {
        target: gateway.resolve(key).unwrap(),
        prompt: PromptParts::new("system", "user"),
        max_tokens: Some(64),
        temperature: 0.0,
    }
}

#[derive(Default)]
struct Collect {
    text: String,
    completed: Option<String>,
}

impl StreamObserver for Collect {
    fn on_chunk(&mut self, delta: &str, _accumulated: &str) {
        self.text.push_str(delta);
    }
    fn on_complete(&mut self, text: &str, _usage: &Usage) {
        self.completed = Some(text.to_string());
    }
}

#[tokio::test]
async fn rate_limit_is_classified_for_every_provider() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"message": "slow down"}
        })))
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config_pointing_at(&server.uri()));
    for key in [
        "openai:gpt-4o-mini",
        "anthropic:claude-sonnet-4-20250514",
        "gemini:gemini-2.0-flash",
        "ollama:llama3.1:8b",
        "openrouter:meta-llama/llama-3.1-8b-instruct",
    ] {
        let err = gateway.invoke(&invocation(&gateway, key)).await.unwrap_err();
        assert!(
            matches!(err, GatewayError::RateLimited { .. }),
            "{key}: expected rate limit, got {err:?}"
        );
        assert!(err.to_string().contains("rate limit reached"));

        let mut observer = Collect::default();
        let err = gateway
            .invoke_streaming(&invocation(&gateway, key), &mut observer)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }), "{key} (streaming)");
    }
}

#[tokio::test]
async fn server_errors_and_bad_keys_are_classified() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;
    let gateway = ModelGateway::from_config(&config_pointing_at(&server.uri()));
    let err = gateway
        .invoke(&invocation(&gateway, "anthropic:claude-sonnet-4-20250514"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BadCredentials { .. }));

    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;
    let gateway = ModelGateway::from_config(&config_pointing_at(&server.uri()));
    let err = gateway
        .invoke(&invocation(&gateway, "gemini:gemini-2.0-flash"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Upstream { status: 502, .. }));
}

#[tokio::test]
async fn unreachable_backend_is_a_connectivity_error() {
    // Nothing listens on port 9 (discard) on test machines.
    let gateway = ModelGateway::from_config(&config_pointing_at("http://127.0.0.1:9"));
    let err = gateway
        .invoke(&invocation(&gateway, "openai:gpt-4o-mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Connectivity { .. }), "{err:?}");
}

#[tokio::test]
async fn anthropic_stream_completes_on_message_stop() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12,\"output_tokens\":1}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        "data: {broken\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" world\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config_pointing_at(&server.uri()));
    let mut observer = Collect::default();
    let completion = gateway
        .invoke_streaming(
            &invocation(&gateway, "anthropic:claude-sonnet-4-20250514"),
            &mut observer,
        )
        .await
        .unwrap();
    assert_eq!(observer.completed.as_deref(), Some("Hello world"));
    assert_eq!(completion.usage, Usage::new(12, 3));
}

#[tokio::test]
async fn anthropic_error_frame_keeps_the_backend_message() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12,\"output_tokens\":1}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        "event: error\n",
        "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
    );
    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config_pointing_at(&server.uri()));
    let mut observer = Collect::default();
    let err = gateway
        .invoke_streaming(
            &invocation(&gateway, "anthropic:claude-sonnet-4-20250514"),
            &mut observer,
        )
        .await
        .unwrap_err();

    assert!(!matches!(err, GatewayError::Connectivity { .. }), "{err:?}");
    assert!(err.to_string().contains("Overloaded"), "{err}");
    assert_eq!(observer.text, "Hel");
    assert!(observer.completed.is_none());
}

#[tokio::test]
async fn gemini_stream_completes_on_finish_reason() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}],\"role\":\"model\"}}]}\r\n\r\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}],\"role\":\"model\"}}]}\r\n\r\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" world\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}],",
        "\"usageMetadata\":{\"promptTokenCount\":5,\"candidatesTokenCount\":3,\"totalTokenCount\":8}}\r\n\r\n",
    );
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config_pointing_at(&server.uri()));
    let mut observer = Collect::default();
    let completion = gateway
        .invoke_streaming(&invocation(&gateway, "gemini:gemini-2.0-flash"), &mut observer)
        .await
        .unwrap();
    assert_eq!(observer.text, "Hello world");
    assert_eq!(completion.usage.total_tokens, 8);
}
