//! Batch indexer
//!
//! Reads newline-delimited JSON email documents and feeds them to the index
//! in fixed-size batches, reporting progress after each batch.

use crate::errors::IngestionError;
use lazymail_common::{EmailDocument, MailIndex};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// Observes indexing progress; never affects control flow
pub trait IndexProgress: Send + Sync {
    fn on_batch(&self, processed: usize, total: usize);
}

impl<F> IndexProgress for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_batch(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}

/// Logs each batch at info level
pub struct LogProgress;

impl IndexProgress for LogProgress {
    fn on_batch(&self, processed: usize, total: usize) {
        info!(processed, total, "Indexing progress");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub processed: usize,
    pub indexed: usize,
    pub skipped: usize,
}

pub struct Indexer {
    index: Arc<MailIndex>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(index: Arc<MailIndex>, batch_size: usize) -> Self {
        Self {
            index,
            batch_size: batch_size.max(1),
        }
    }

    /// Upsert all documents batch by batch.
    ///
    /// Batches already written stay written when a later one fails; running
    /// again skips them.
    #[instrument(skip(self, documents, progress), fields(total = documents.len()))]
    pub async fn index_all(
        &self,
        tenant_id: &str,
        documents: Vec<EmailDocument>,
        progress: &dyn IndexProgress,
    ) -> Result<IndexReport, IngestionError> {
        let total = documents.len();
        let mut report = IndexReport::default();

        let mut remaining = documents.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch: Vec<EmailDocument> = remaining.by_ref().take(self.batch_size).collect();
            let batch_len = batch.len();

            let upserted = self
                .index
                .upsert(tenant_id, batch)
                .await
                .map_err(|source| IngestionError::Index {
                    processed: report.processed,
                    total,
                    source,
                })?;

            report.processed += batch_len;
            report.indexed += upserted.indexed;
            report.skipped += upserted.skipped;
            progress.on_batch(report.processed, total);
        }

        info!(
            tenant_id,
            processed = report.processed,
            indexed = report.indexed,
            skipped = report.skipped,
            "Indexing complete"
        );
        Ok(report)
    }
}

/// Parse newline-delimited JSON documents, skipping blank lines
pub fn parse_documents(input: &str) -> Result<Vec<EmailDocument>, IngestionError> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| IngestionError::Parse {
                line: i + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

pub async fn read_documents(path: &Path) -> Result<Vec<EmailDocument>, IngestionError> {
    let input = tokio::fs::read_to_string(path).await?;
    parse_documents(&input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazymail_common::db::{MemoryDocumentStore, ScoringParams};
    use lazymail_common::embeddings::HashingEmbedder;
    use lazymail_common::AppError;
    use std::sync::Mutex;

    fn index() -> Arc<MailIndex> {
        Arc::new(MailIndex::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(HashingEmbedder::new(32)),
            ScoringParams::default(),
        ))
    }

    fn documents(tenant: &str, n: usize) -> Vec<EmailDocument> {
        (0..n)
            .map(|i| {
                let mut doc = EmailDocument::new(tenant, format!("m{i}"));
                doc.subject = format!("Subject {i}");
                doc.body_text = format!("Body of message {i}");
                doc
            })
            .collect()
    }

    #[tokio::test]
    async fn test_progress_reported_per_batch() {
        let indexer = Indexer::new(index(), 10);
        let calls = Mutex::new(Vec::new());
        let progress = |processed: usize, total: usize| calls.lock().unwrap().push((processed, total));

        let report = indexer
            .index_all("t1", documents("t1", 25), &progress)
            .await
            .unwrap();

        assert_eq!(report, IndexReport { processed: 25, indexed: 25, skipped: 0 });
        assert_eq!(*calls.lock().unwrap(), vec![(10, 25), (20, 25), (25, 25)]);
    }

    #[tokio::test]
    async fn test_rerun_skips_indexed_documents() {
        let index = index();
        let indexer = Indexer::new(index.clone(), 4);
        indexer.index_all("t1", documents("t1", 6), &LogProgress).await.unwrap();

        let report = indexer
            .index_all("t1", documents("t1", 9), &LogProgress)
            .await
            .unwrap();

        assert_eq!(report.indexed, 3);
        assert_eq!(report.skipped, 6);
        assert_eq!(index.count("t1").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_batches() {
        let index = index();
        let indexer = Indexer::new(index.clone(), 2);
        let mut docs = documents("t1", 4);
        docs[3].tenant_id = "t2".into();

        let err = indexer.index_all("t1", docs, &LogProgress).await.unwrap_err();

        assert!(matches!(
            err,
            IngestionError::Index { processed: 2, total: 4, source: AppError::TenantMismatch { .. } }
        ));
        assert_eq!(index.count("t1").await.unwrap(), 2);
    }

    #[test]
    fn test_parse_documents_reports_line() {
        let input = "{\"id\": \"m1\", \"tenantId\": \"t1\"}\n\n{not json}\n";
        let err = parse_documents(input).unwrap_err();
        assert!(matches!(err, IngestionError::Parse { line: 3, .. }));

        let docs = parse_documents("{\"id\": \"m1\", \"tenantId\": \"t1\", \"sentAt\": \"bogus\"}\n").unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].sent_at.is_none());
    }
}
