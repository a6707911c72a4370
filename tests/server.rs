use std::sync::Arc;

use serde_json::{json, Value};
use vault_context::server::router;
use vault_context_core::options::SearchOptions;
use vault_context_core::store::memory::MemoryVault;
use vault_context_core::store::RemoteStore;

async fn serve(store: MemoryVault) -> String {
    let store: Arc<dyn RemoteStore> = Arc::new(store);
    let app = router(store, SearchOptions::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn notes() -> MemoryVault {
    MemoryVault::new()
        .with_note("k8s/ingress.md", "Ingress routes external traffic to services.")
        .with_note("notes/networking.md", "An ingress controller terminates TLS.")
}

#[tokio::test]
async fn test_health() {
    let base = serve(notes()).await;
    let body: Value = reqwest::get(format!("{}/health", base)).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body.get("breaker").is_none());
}

#[tokio::test]
async fn test_search_tool() {
    let base = serve(notes()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/tools/search", base))
        .json(&json!({ "query": "ingress", "max_tokens": 50 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let ranked = body["ranked"].as_array().unwrap();
    assert_eq!(ranked[0]["path"], "k8s/ingress.md");
    assert_eq!(ranked.len(), 2);
    assert!(body["context"]["token_count"].as_u64().unwrap() <= 50);
}

#[tokio::test]
async fn test_empty_query_is_bad_request() {
    let base = serve(notes()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/tools/search", base))
        .json(&json!({ "query": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_zero_limit_is_bad_request() {
    let base = serve(notes()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/tools/search", base))
        .json(&json!({ "query": "ingress", "limit": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_unreachable_vault_is_bad_gateway() {
    let base = serve(notes().with_failure("")).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/tools/search", base))
        .json(&json!({ "query": "ingress" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "remote_unavailable");
}
