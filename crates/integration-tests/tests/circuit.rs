mod harness;

use harness::chat_body;
use harness::config::ConfigBuilder;
use harness::mock_provider::{MockProvider, Script};
use harness::server::TestServer;

async fn circuit_state(server: &TestServer, provider: &str) -> serde_json::Value {
    let health: serde_json::Value = server
        .client()
        .get(server.url("/api/v1/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    health["circuits"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["provider"] == provider)
        .cloned()
        .unwrap_or_default()
}

#[tokio::test]
async fn structural_storm_opens_the_circuit() {
    let dir = tempfile::tempdir().unwrap();
    // Every response is an empty object: schema mismatch at the adapter
    let mock = MockProvider::start_with(Script::Empty, Vec::new()).await.unwrap();

    let config = ConfigBuilder::new(dir.path())
        .with_provider("flaky", &mock.base_url(), 0)
        .fallback(false)
        .circuit(5, 2, 30)
        .build();
    let server = TestServer::start(config).await.unwrap();

    for _ in 0..5 {
        let resp = server
            .client()
            .post(server.url("/api/v1/chat"))
            .json(&chat_body("flaky:mock-model", "hello"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
    }
    assert_eq!(mock.chat_count(), 5);

    let circuit = circuit_state(&server, "flaky").await;
    assert_eq!(circuit["state"], "open");
    assert!(circuit["open_until_ms"].as_u64().is_some());

    // The next call fails fast without invoking the adapter
    let resp = server
        .client()
        .post(server.url("/api/v1/chat"))
        .json(&chat_body("flaky:mock-model", "hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["kind"], "all_providers_failed");
    assert_eq!(mock.chat_count(), 5);
}

#[tokio::test]
async fn open_circuit_routes_to_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let flaky = MockProvider::start_with(Script::Empty, Vec::new()).await.unwrap();
    let backup = MockProvider::start_with(Script::Text("backup response".to_owned()), Vec::new())
        .await
        .unwrap();

    let config = ConfigBuilder::new(dir.path())
        .with_provider("flaky", &flaky.base_url(), 0)
        .with_provider("backup", &backup.base_url(), 1)
        .circuit(3, 2, 30)
        .build();
    let server = TestServer::start(config).await.unwrap();

    // Three structural failures trip the breaker; each request still
    // succeeds via the backup
    for _ in 0..3 {
        let resp = server
            .client()
            .post(server.url("/api/v1/chat"))
            .json(&chat_body("flaky:mock-model", "hello"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let circuit = circuit_state(&server, "flaky").await;
    assert_eq!(circuit["state"], "open");

    // With the circuit open, the flaky provider is skipped entirely
    let before = flaky.chat_count();
    let resp = server
        .client()
        .post(server.url("/api/v1/chat"))
        .json(&chat_body("flaky:mock-model", "hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["lineage"]["provider"], "backup");
    assert_eq!(flaky.chat_count(), before);
}

#[tokio::test]
async fn recovered_provider_closes_after_probes() {
    let dir = tempfile::tempdir().unwrap();
    // Two structural failures, then recovery
    let mock = MockProvider::start_scripted(vec![Script::Empty, Script::Empty]).await.unwrap();

    let config = ConfigBuilder::new(dir.path())
        .with_provider("flaky", &mock.base_url(), 0)
        .fallback(false)
        // recovery timeout 0: the breaker probes on the next call
        .circuit(2, 2, 0)
        .build();
    let server = TestServer::start(config).await.unwrap();

    for _ in 0..2 {
        server
            .client()
            .post(server.url("/api/v1/chat"))
            .json(&chat_body("flaky:mock-model", "hello"))
            .send()
            .await
            .unwrap();
    }
    assert_eq!(circuit_state(&server, "flaky").await["state"], "open");

    // Two successful probes close the circuit
    for _ in 0..2 {
        let resp = server
            .client()
            .post(server.url("/api/v1/chat"))
            .json(&chat_body("flaky:mock-model", "hello"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
    assert_eq!(circuit_state(&server, "flaky").await["state"], "closed");
}

#[tokio::test]
async fn admin_circuit_control() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockProvider::start().await.unwrap();

    let config = ConfigBuilder::new(dir.path())
        .with_provider("ollama", &mock.base_url(), 0)
        .fallback(false)
        .build();
    let server = TestServer::start(config).await.unwrap();

    // Force open: requests fail fast
    let resp = server
        .client()
        .post(server.url("/api/v1/circuit/ollama/open"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(circuit_state(&server, "ollama").await["state"], "open");

    let resp = server
        .client()
        .post(server.url("/api/v1/chat"))
        .json(&chat_body("ollama:mock-model", "hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    assert_eq!(mock.chat_count(), 0);

    // Force close restores traffic
    server
        .client()
        .post(server.url("/api/v1/circuit/ollama/close"))
        .send()
        .await
        .unwrap();
    let resp = server
        .client()
        .post(server.url("/api/v1/chat"))
        .json(&chat_body("ollama:mock-model", "hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Reset is accepted and reported in the metrics
    server
        .client()
        .post(server.url("/api/v1/circuit/ollama/reset"))
        .send()
        .await
        .unwrap();
    let metrics: serde_json::Value = server
        .client()
        .get(server.url("/api/v1/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(metrics["circuit_admin_transitions_total"]["total"].as_u64().unwrap() >= 3);
}
