//! In-memory application state and request helpers for handler tests

use crate::{create_router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use lazymail_common::{
    completion::ScriptedCompletion,
    config::{AppConfig, IndexBackend},
    db::MemoryDocumentStore,
    embeddings::{EmbeddingServices, HashingEmbedder, StaticCrossEncoder},
    tokenizer::WordTokenizer,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const DIMENSION: usize = 64;

pub fn state(model: ScriptedCompletion) -> AppState {
    let mut config = AppConfig::default();
    config.index.backend = IndexBackend::Memory;
    config.embedding.dimension = DIMENSION;

    AppState::new(
        Arc::new(config),
        Arc::new(MemoryDocumentStore::new()),
        EmbeddingServices {
            embedder: Arc::new(HashingEmbedder::new(DIMENSION)),
            cross_encoder: Arc::new(StaticCrossEncoder),
        },
        Arc::new(model),
        Arc::new(WordTokenizer::new(512)),
    )
}

pub fn router(model: ScriptedCompletion) -> Router {
    create_router(state(model))
}

/// Send one request, returning the status and the parsed JSON body
pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Index the two-email fixture used across handler tests
pub async fn seed(app: &Router, tenant: &str) {
    let documents = serde_json::json!([
        {
            "id": "m1",
            "tenantId": tenant,
            "subject": "Sthack event",
            "bodyText": "Emilie is speaking at Sthack on June 2",
            "fromNames": ["Emilie"],
            "fromAddresses": ["emilie@example.com"],
            "sentAt": "2024-05-01T09:00:00Z"
        },
        {
            "id": "m2",
            "tenantId": tenant,
            "subject": "Quarterly invoice",
            "bodyText": "Please find attached the invoice for March",
            "fromAddresses": ["billing@acme.com"],
            "sentAt": "2024-05-01T09:00:00Z"
        }
    ]);
    let (status, _) = send(app, Method::POST, &format!("/v1/tenants/{tenant}/documents"), Some(documents)).await;
    assert_eq!(status, StatusCode::OK);
}
