//! Shared fixtures: an in-process fake PDS and config helpers.
//!
//! The fake PDS serves `com.atproto.repo.getRecord` from an in-memory map
//! and doubles as a PLC directory whose DID documents point back at it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct PdsState {
    base_url: Arc<Mutex<String>>,
    records: Arc<Mutex<HashMap<String, (String, Value)>>>,
    fail_next: Arc<AtomicU32>,
    get_calls: Arc<AtomicU32>,
}

#[derive(Deserialize)]
struct GetRecordQuery {
    repo: String,
    collection: String,
    rkey: String,
}

pub struct FakePds {
    pub url: String,
    state: PdsState,
}

impl FakePds {
    pub async fn start() -> Self {
        let state = PdsState::default();
        let app = Router::new()
            .route("/xrpc/com.atproto.repo.getRecord", get(get_record))
            .route("/{did}", get(did_document))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        *state.base_url.lock().unwrap() = url.clone();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, state }
    }

    pub fn put(&self, uri: &str, cid: &str, value: Value) {
        self.state
            .records
            .lock()
            .unwrap()
            .insert(uri.to_string(), (cid.to_string(), value));
    }

    pub fn remove(&self, uri: &str) {
        self.state.records.lock().unwrap().remove(uri);
    }

    /// Answer the next `n` getRecord calls with 503.
    pub fn fail_next(&self, n: u32) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u32 {
        self.state.get_calls.load(Ordering::SeqCst)
    }
}

async fn get_record(
    State(state): State<PdsState>,
    Query(q): Query<GetRecordQuery>,
) -> Response {
    state.get_calls.fetch_add(1, Ordering::SeqCst);

    let pending = state.fail_next.load(Ordering::SeqCst);
    if pending > 0 {
        state.fail_next.store(pending - 1, Ordering::SeqCst);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Unavailable" })),
        )
            .into_response();
    }

    let uri = format!("at://{}/{}/{}", q.repo, q.collection, q.rkey);
    let found = state.records.lock().unwrap().get(&uri).cloned();
    match found {
        Some((cid, value)) => (
            StatusCode::OK,
            Json(json!({ "uri": uri, "cid": cid, "value": value })),
        )
            .into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "RecordNotFound",
                "message": format!("Could not locate record: {}", uri)
            })),
        )
            .into_response(),
    }
}

async fn did_document(State(state): State<PdsState>, UrlPath(did): UrlPath<String>) -> Response {
    if !did.starts_with("did:plc:") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let endpoint = state.base_url.lock().unwrap().clone();
    Json(json!({
        "id": did,
        "service": [{
            "id": "#atproto_pds",
            "type": "AtprotoPersonalDataServer",
            "serviceEndpoint": endpoint
        }]
    }))
    .into_response()
}

pub fn eprint_body(title: &str) -> Value {
    json!({
        "$type": "pub.chive.eprint.submission",
        "title": title,
        "abstract": "An abstract.",
        "authors": [{ "name": "A. Researcher", "did": "did:plc:alice" }],
        "createdAt": "2026-01-02T03:04:05Z"
    })
}

pub fn eprint_uri(rkey: &str) -> String {
    format!("at://did:plc:alice/pub.chive.eprint.submission/{}", rkey)
}

/// Write a config whose PLC directory is the fake PDS. Retries are fast.
pub fn write_config(root: &Path, plc_directory: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/epx.sqlite"

[repository]
plc_directory = "{}"
timeout_secs = 5

[resilience]
max_retries = 3
base_delay_ms = 5
max_delay_ms = 20
attempt_timeout_secs = 5
"#,
        root.display(),
        plc_directory
    );

    let config_path = config_dir.join("epx.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}
