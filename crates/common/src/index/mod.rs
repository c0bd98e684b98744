//! Document Index service
//!
//! Provides:
//! - Dedup-before-embed upsert, idempotent by `(tenant, id)`
//! - Tenant-scoped count and erasure
//! - Hybrid search over any `DocumentStore` backend
//!
//! The schema is created on first use. Upserts are not atomic across a
//! batch; a retry skips whatever was already written.

use crate::config::{AppConfig, IndexBackend};
use crate::context::RetrievalFilter;
use crate::db::models::{EmailDocument, ScoredCandidate};
use crate::db::{DbPool, DocumentStore, MemoryDocumentStore, Repository, ScoringParams, SearchQuery};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use validator::Validate;

/// Outcome of one upsert call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub received: usize,
    pub indexed: usize,
    /// Already indexed, or repeated within the batch
    pub skipped: usize,
}

pub struct MailIndex {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    params: ScoringParams,
    schema_ready: OnceCell<()>,
}

impl MailIndex {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Arc<dyn Embedder>, params: ScoringParams) -> Self {
        Self {
            store,
            embedder,
            params,
            schema_ready: OnceCell::new(),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    async fn ready(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                self.store.ensure_schema().await?;
                info!(backend = self.store.backend(), "Index schema ready");
                Ok::<(), AppError>(())
            })
            .await?;
        Ok(())
    }

    /// Embed and store the documents not yet indexed for this tenant
    #[instrument(skip(self, documents), fields(received = documents.len()))]
    pub async fn upsert(&self, tenant_id: &str, documents: Vec<EmailDocument>) -> Result<UpsertReport> {
        require_tenant(tenant_id)?;
        let received = documents.len();

        // Later copies of an id replace earlier ones
        let mut batch: Vec<EmailDocument> = Vec::with_capacity(received);
        let mut positions: HashMap<String, usize> = HashMap::new();
        for mut doc in documents {
            doc.validate()?;
            if doc.tenant_id != tenant_id {
                return Err(AppError::TenantMismatch {
                    document_id: doc.id,
                    expected: tenant_id.to_string(),
                    found: doc.tenant_id,
                });
            }
            doc.normalize_body();
            match positions.get(&doc.id) {
                Some(&at) => batch[at] = doc,
                None => {
                    positions.insert(doc.id.clone(), batch.len());
                    batch.push(doc);
                }
            }
        }

        if batch.is_empty() {
            return Ok(UpsertReport {
                received,
                ..UpsertReport::default()
            });
        }

        self.ready().await?;

        let ids: Vec<String> = batch.iter().map(|d| d.id.clone()).collect();
        let existing = self.store.existing_ids(tenant_id, &ids).await?;
        batch.retain(|doc| !existing.contains(&doc.id));
        let indexed = batch.len();

        if !batch.is_empty() {
            let pages: Vec<String> = batch.iter().map(EmailDocument::page_content).collect();
            let embeddings = self.embedder.embed_batch(&pages).await?;
            if embeddings.len() != batch.len() {
                return Err(AppError::EmbeddingError {
                    message: format!("expected {} embeddings, got {}", batch.len(), embeddings.len()),
                });
            }

            let expected = self.embedder.dimension();
            for (doc, embedding) in batch.iter_mut().zip(embeddings) {
                if embedding.len() != expected {
                    return Err(AppError::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    });
                }
                doc.embedding = Some(embedding);
            }

            self.store.upsert(tenant_id, batch).await?;
        }

        let report = UpsertReport {
            received,
            indexed,
            skipped: received - indexed,
        };
        crate::metrics::record_indexing(tenant_id, report.indexed, report.skipped);
        info!(
            tenant_id,
            indexed = report.indexed,
            skipped = report.skipped,
            "Documents upserted"
        );
        Ok(report)
    }

    pub async fn count(&self, tenant_id: &str) -> Result<u64> {
        require_tenant(tenant_id)?;
        self.ready().await?;
        self.store.count(tenant_id).await
    }

    /// Erase every document of one tenant
    #[instrument(skip(self))]
    pub async fn delete_all(&self, tenant_id: &str) -> Result<u64> {
        require_tenant(tenant_id)?;
        self.ready().await?;
        let removed = self.store.delete_all(tenant_id).await?;
        info!(tenant_id, removed, "Tenant erased");
        Ok(removed)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await
    }

    /// Top `k` candidates for the filter, scored against `vector`
    #[instrument(skip(self, vector, filter))]
    pub async fn search(
        &self,
        tenant_id: &str,
        vector: Vec<f32>,
        k: usize,
        filter: &RetrievalFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredCandidate>> {
        require_tenant(tenant_id)?;
        let expected = self.embedder.dimension();
        if vector.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        self.ready().await?;

        let query = SearchQuery {
            tenant_id: tenant_id.to_string(),
            vector,
            k,
            body_query: filter.body_query().to_string(),
            subject_terms: filter.subject_terms.clone(),
            sender_hints: filter.sender_hints.clone().unwrap_or_default(),
            date_range: filter.date_range,
            now,
        };

        let candidates = self.store.search(&query, &self.params).await?;
        debug!(candidates = candidates.len(), "Index search complete");
        Ok(candidates)
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

/// Open the document store selected by `index.backend`
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.index.backend {
        IndexBackend::Postgres => {
            let pool = DbPool::new(&config.database).await?;
            let repository = Repository::new(pool, &config.index.table, config.embedding.dimension)?;
            Ok(Arc::new(repository))
        }
        IndexBackend::Memory => Ok(Arc::new(MemoryDocumentStore::new())),
    }
}

fn require_tenant(tenant_id: &str) -> Result<()> {
    if tenant_id.trim().is_empty() {
        return Err(AppError::MissingField {
            field: "tenant_id".to_string(),
        });
    }
    Ok(())
}
