//! Search handlers

use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use lazymail_common::{errors::Result, Lang, RetrievalFilter, ScoredCandidate};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,

    /// Maximum results, defaults to the configured top k
    #[serde(default)]
    #[validate(range(min = 1, max = 500))]
    pub k: Option<usize>,

    #[serde(default)]
    pub lang: Lang,
}

/// Search response
#[derive(Serialize)]
pub struct SearchResponse {
    pub filter: RetrievalFilter,
    pub reranked: bool,
    pub total_results: usize,
    pub results: Vec<SearchHit>,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub score: f64,
}

impl From<ScoredCandidate> for SearchHit {
    fn from(candidate: ScoredCandidate) -> Self {
        let sender = candidate.document.primary_sender().map(str::to_string);
        let document = candidate.document;
        Self {
            id: document.id,
            thread_id: document.thread_id,
            subject: document.subject,
            sender,
            sent_at: document.sent_at,
            score: candidate.score,
        }
    }
}

/// Understand the question and search the tenant's mail
pub async fn search(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    request.validate()?;

    let retrieval = state
        .retriever
        .retrieve(&tenant_id, &request.question, request.k, request.lang, Utc::now())
        .await?;

    let results: Vec<SearchHit> = retrieval.candidates.into_iter().map(SearchHit::from).collect();

    Ok(Json(SearchResponse {
        filter: retrieval.filter,
        reranked: retrieval.reranked,
        total_results: results.len(),
        results,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{router, seed, send};
    use axum::http::{Method, StatusCode};
    use lazymail_common::completion::ScriptedCompletion;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_survives_unparseable_extractions() {
        let app = router(ScriptedCompletion::new().otherwise("I cannot help with that"));
        seed(&app, "t1").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/tenants/t1/search",
            Some(json!({ "question": "What is Emilie doing for Sthack?" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filter"]["canonicalQuestion"], serde_json::Value::Null);
        assert_eq!(body["total_results"], 2);
        assert_eq!(body["results"][0]["id"], "m1");
        assert_eq!(body["results"][0]["sender"], "Emilie");
    }

    #[tokio::test]
    async fn test_search_is_tenant_scoped() {
        let app = router(ScriptedCompletion::new());
        seed(&app, "t1").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/tenants/t2/search",
            Some(json!({ "question": "Sthack", "k": 5 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"], json!([]));
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let app = router(ScriptedCompletion::new());
        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/tenants/t1/search",
            Some(json!({ "question": "" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}
