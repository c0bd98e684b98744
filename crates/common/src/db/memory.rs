//! In-memory document store
//!
//! Same contract and scoring as the Postgres backend, kept per tenant in
//! separate maps. Used for tests and single-process deployments.

use super::models::{EmailDocument, ScoredCandidate};
use super::scoring::{score_document, LexicalScorer, ScoringParams};
use super::{DocumentStore, SearchQuery};
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

type TenantDocuments = HashMap<String, EmailDocument>;

#[derive(Default)]
pub struct MemoryDocumentStore {
    tenants: RwLock<HashMap<String, TenantDocuments>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn existing_ids(&self, tenant_id: &str, ids: &[String]) -> Result<HashSet<String>> {
        let tenants = self.tenants.read().await;
        let Some(docs) = tenants.get(tenant_id) else {
            return Ok(HashSet::new());
        };
        Ok(ids.iter().filter(|id| docs.contains_key(*id)).cloned().collect())
    }

    async fn upsert(&self, tenant_id: &str, documents: Vec<EmailDocument>) -> Result<u64> {
        let mut tenants = self.tenants.write().await;
        let docs = tenants.entry(tenant_id.to_string()).or_default();
        let mut written = 0u64;
        for doc in documents {
            docs.insert(doc.id.clone(), doc);
            written += 1;
        }
        Ok(written)
    }

    async fn count(&self, tenant_id: &str) -> Result<u64> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(tenant_id).map_or(0, |docs| docs.len() as u64))
    }

    async fn delete_all(&self, tenant_id: &str) -> Result<u64> {
        let mut tenants = self.tenants.write().await;
        Ok(tenants.remove(tenant_id).map_or(0, |docs| docs.len() as u64))
    }

    async fn search(&self, query: &SearchQuery, params: &ScoringParams) -> Result<Vec<ScoredCandidate>> {
        if query.k == 0 {
            return Ok(Vec::new());
        }

        let tenants = self.tenants.read().await;
        let Some(docs) = tenants.get(&query.tenant_id) else {
            return Ok(Vec::new());
        };

        let mut scorer = LexicalScorer::new(query);
        let mut scored: Vec<ScoredCandidate> = docs
            .values()
            .filter(|doc| query.date_range.contains(doc.sent_at))
            .filter_map(|doc| {
                let embedding = doc.embedding.as_deref()?;
                let score = score_document(&mut scorer, query, doc, embedding, params);
                let mut document = doc.clone();
                document.embedding = None;
                Some(ScoredCandidate { document, score })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        scored.truncate(query.k);

        Ok(scored)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
