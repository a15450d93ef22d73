//! Reliability-envelope scenarios across the gateway surface.
//!
//! These run without any live upstream: the proxy URL points at a closed
//! port, so HTTP attempts fail fast with connection errors, and mock
//! providers cover the success paths.

use coscient_core::{
    AgentType, GatewayConfig, LlmRequest, RequestContent, RequestType, ResponseStatus,
};
use coscient_llm::{
    ArgoGateway, MockConfiguration, MockPattern, MockProvider, MockResponse, Provider,
    ProviderRegistry,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn unreachable_gateway() -> ArgoGateway {
    ArgoGateway::new(GatewayConfig {
        proxy_url: "http://127.0.0.1:9".to_string(),
        max_retries: 0,
        queue_max_size: 4,
        queue_max_wait: Duration::from_secs(300),
        ..Default::default()
    })
    .unwrap()
}

fn request(id: &str, model: &str) -> LlmRequest {
    let content = RequestContent::new("Propose a hypothesis")
        .with_parameter("model", json!(model));
    LlmRequest::new(id, AgentType::Generation, RequestType::Generate, content)
}

#[tokio::test]
async fn repeated_failures_open_the_breaker_and_queue_requests() {
    let gateway = unreachable_gateway();

    // Every model attempt fails with a network error; after enough calls
    // the per-model breakers open (threshold 3) and new requests for that
    // model are queued instead of attempted.
    for i in 0..3 {
        let response = gateway.generate(request(&format!("req-{i}"), "gpt4o")).await;
        assert_eq!(response.status, ResponseStatus::Error);
    }

    let status = gateway.circuit_breaker_status().await;
    assert_eq!(status["gpt4o"].state, "OPEN");

    let response = gateway.generate(request("req-q", "gpt4o")).await;
    assert!(response.is_queued());
    assert_eq!(gateway.queue().size().await, 1);

    // Resetting the breaker stops the queueing behavior.
    gateway.reset_circuit_breaker("gpt4o").await;
    let status = gateway.circuit_breaker_status().await;
    assert_eq!(status["gpt4o"].state, "CLOSED");
}

#[tokio::test]
async fn connectivity_probe_fails_cleanly_without_upstream() {
    let gateway = unreachable_gateway();
    assert!(!gateway.test_connectivity().await);
    assert!(gateway.health_status().await.is_err());
    assert!(gateway.verify_model_access(&["gpt4o"]).await.is_err());
}

#[tokio::test]
async fn usage_report_starts_empty_and_is_per_model() {
    let gateway = unreachable_gateway();
    assert!(gateway.selector().usage_report().is_empty());

    gateway.selector().track_usage("gpt4o", 1000, 200);
    let report = gateway.selector().usage_report();
    assert_eq!(report["gpt4o"].request_count, 1);
    assert_eq!(report["gpt4o"].total_input_tokens, 1000);
    assert!(report["gpt4o"].total_cost > 0.0);
}

#[tokio::test]
async fn registry_routes_between_mock_and_gateway_providers() {
    let registry = ProviderRegistry::new();

    let mut mock_config = MockConfiguration::new();
    mock_config.add_response(MockPattern::any(), MockResponse::new("mocked"));
    registry
        .register_provider("mock", Arc::new(MockProvider::new(mock_config)))
        .await
        .unwrap();
    registry
        .register_provider("argo", Arc::new(unreachable_gateway()))
        .await
        .unwrap();
    registry.set_default_provider("mock").await.unwrap();

    let provider = registry.get_default_provider().await.unwrap();
    let response = provider
        .generate(request("req-1", "gpt4o"))
        .await;
    assert_eq!(response.content(), Some("mocked"));

    // Both providers report their capability maps.
    let info = registry.provider_info().await;
    assert_eq!(info.len(), 2);
    assert_eq!(info["argo"]["capabilities"]["provider"], json!("argo"));
}

#[tokio::test]
async fn queued_requests_expire_after_their_ttl() {
    let gateway = ArgoGateway::new(GatewayConfig {
        proxy_url: "http://127.0.0.1:9".to_string(),
        max_retries: 0,
        queue_max_size: 4,
        queue_max_wait: Duration::from_millis(20),
        ..Default::default()
    })
    .unwrap();

    // Open the breaker, queue a request, let it expire.
    for i in 0..3 {
        gateway.generate(request(&format!("req-{i}"), "gpt4o")).await;
    }
    assert!(gateway.generate(request("req-q", "gpt4o")).await.is_queued());

    tokio::time::sleep(Duration::from_millis(50)).await;
    // The expired entry is dropped during processing; nothing remains.
    gateway.process_queued_requests().await;
    assert_eq!(gateway.queue().size().await, 0);
}

#[tokio::test]
async fn mock_sequences_model_degradation() {
    // A provider that succeeds, then rate-limits, then succeeds again,
    // exercising the error triple contract from the caller's side.
    let mut config = MockConfiguration::new();
    config.add_sequence(
        MockPattern::for_agent(AgentType::Generation),
        vec![MockResponse::new("first"), MockResponse::new("second")],
    );
    let provider = MockProvider::new(config);

    let r1 = provider.generate(request("a", "gpt4o")).await;
    let r2 = provider.generate(request("b", "gpt4o")).await;
    assert_eq!(r1.content(), Some("first"));
    assert_eq!(r2.content(), Some("second"));
    assert_eq!(provider.call_count(), 2);
}
