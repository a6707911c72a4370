//! A fake Local REST API vault served by axum on an ephemeral port.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

#[derive(Default)]
pub struct FakeVault {
    pub notes: BTreeMap<String, (String, Vec<String>)>,
    /// Answer this many requests with 503 before behaving.
    pub fail_next: AtomicUsize,
    pub always_fail: AtomicBool,
    pub token: Option<String>,
    pub requests: AtomicUsize,
}

impl FakeVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(mut self, path: &str, content: &str) -> Self {
        self.notes.insert(path.to_string(), (content.to_string(), Vec::new()));
        self
    }

    pub fn tagged_note(mut self, path: &str, content: &str, tags: &[&str]) -> Self {
        self.notes.insert(
            path.to_string(),
            (content.to_string(), tags.iter().map(|t| t.to_string()).collect()),
        );
        self
    }

    pub fn requiring_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn listing(&self, dir: &str) -> Option<Vec<String>> {
        let prefix = if dir.is_empty() { String::new() } else { format!("{}/", dir) };
        let mut entries = BTreeSet::new();
        for key in self.notes.keys() {
            if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                match rest.split_once('/') {
                    Some((child, _)) => entries.insert(format!("{}/", child)),
                    None => entries.insert(rest.to_string()),
                };
            }
        }
        if entries.is_empty() && !dir.is_empty() {
            None
        } else {
            Some(entries.into_iter().collect())
        }
    }
}

/// Start serving `vault` and return its base URL.
pub async fn spawn(vault: Arc<FakeVault>) -> String {
    let app = Router::new()
        .route("/vault/", get(list_root))
        .route("/vault/{*path}", get(get_path))
        .with_state(vault);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn gate(vault: &FakeVault, headers: &HeaderMap) -> Option<Response> {
    vault.requests.fetch_add(1, Ordering::SeqCst);
    if vault.always_fail.load(Ordering::SeqCst) {
        return Some((StatusCode::SERVICE_UNAVAILABLE, "down").into_response());
    }
    if vault
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return Some((StatusCode::SERVICE_UNAVAILABLE, "try again").into_response());
    }
    if let Some(token) = &vault.token {
        let expected = format!("Bearer {}", token);
        let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
        if auth != Some(expected.as_str()) {
            return Some((StatusCode::UNAUTHORIZED, "missing token").into_response());
        }
    }
    None
}

async fn list_root(State(vault): State<Arc<FakeVault>>, headers: HeaderMap) -> Response {
    if let Some(rejected) = gate(&vault, &headers) {
        return rejected;
    }
    match vault.listing("") {
        Some(files) => Json(json!({ "files": files })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_path(
    State(vault): State<Arc<FakeVault>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(rejected) = gate(&vault, &headers) {
        return rejected;
    }

    if let Some(dir) = path.strip_suffix('/') {
        return match vault.listing(dir) {
            Some(files) => Json(json!({ "files": files })).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let Some((content, tags)) = vault.notes.get(&path) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response();
    };

    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.contains("vnd.olrapi.note+json"));
    if wants_json {
        Json(json!({
            "content": content,
            "frontmatter": {},
            "path": path,
            "stat": { "ctime": 1_700_000_000_000i64, "mtime": 1_700_000_000_000i64, "size": content.len() },
            "tags": tags,
        }))
        .into_response()
    } else {
        content.clone().into_response()
    }
}

/// Config text pointing at `base_url` with fast retries.
pub fn config_text(base_url: &str, extra: &str) -> String {
    format!(
        r#"[vault]
base_url = "{}"
max_retries = 2
retry_base_ms = 1
retry_max_ms = 5
breaker_failure_threshold = 2
breaker_cooldown_secs = 60
{}
"#,
        base_url, extra
    )
}
