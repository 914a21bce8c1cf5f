pub mod config;
pub mod mock_provider;
pub mod server;

use server::TestServer;

/// Minimal SCRI chat body
pub fn chat_body(model: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": content}]
    })
}

/// Poll a GET endpoint until its JSON body satisfies `check` or the
/// timeout elapses
pub async fn poll_json<F>(server: &TestServer, path: &str, timeout_ms: u64, check: F) -> bool
where
    F: Fn(&serde_json::Value) -> bool,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        let response = server.client().get(server.url(path)).send().await;
        if let Ok(response) = response
            && let Ok(body) = response.json::<serde_json::Value>().await
            && check(&body)
        {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
