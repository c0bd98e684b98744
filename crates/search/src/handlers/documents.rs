//! Document handlers: upsert, count and tenant erasure

use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use lazymail_common::{errors::Result, EmailDocument, UpsertReport};
use serde::Serialize;

#[derive(Serialize)]
pub struct CountResponse {
    pub tenant_id: String,
    pub count: u64,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub tenant_id: String,
    pub deleted: u64,
}

/// Index a batch of documents; ids already present are skipped
pub async fn upsert_documents(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(documents): Json<Vec<EmailDocument>>,
) -> Result<Json<UpsertReport>> {
    let report = state.index.upsert(&tenant_id, documents).await?;
    Ok(Json(report))
}

pub async fn count_documents(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<CountResponse>> {
    let count = state.index.count(&tenant_id).await?;
    Ok(Json(CountResponse { tenant_id, count }))
}

/// Erase every document of the tenant
pub async fn delete_documents(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.index.delete_all(&tenant_id).await?;
    Ok(Json(DeleteResponse { tenant_id, deleted }))
}
