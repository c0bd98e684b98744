//! Retrieval orchestration
//!
//! Question -> filter -> hybrid index search -> optional cross-encoder rerank.
//!
//! The raw question is what gets embedded; the canonical question (when the
//! extractor produced one) is what the reranker compares candidates against.

use chrono::{DateTime, Utc};
use lazymail_common::{
    config::RetrievalConfig,
    context::{QueryUnderstander, RetrievalFilter},
    errors::{AppError, Result},
    metrics, CrossEncoder, Lang, MailIndex, ScoredCandidate,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// Candidates for one question, best first
#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    pub filter: RetrievalFilter,
    pub candidates: Vec<ScoredCandidate>,
    pub reranked: bool,
}

pub struct Retriever {
    understander: QueryUnderstander,
    index: Arc<MailIndex>,
    cross_encoder: Arc<dyn CrossEncoder>,
    top_k: usize,
    rerank: bool,
}

impl Retriever {
    pub fn new(
        understander: QueryUnderstander,
        index: Arc<MailIndex>,
        cross_encoder: Arc<dyn CrossEncoder>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            understander,
            index,
            cross_encoder,
            top_k: config.top_k,
            rerank: config.rerank,
        }
    }

    /// Derive the retrieval filter; never fails
    pub async fn understand(&self, question: &str, lang: Lang, now: DateTime<Utc>) -> RetrievalFilter {
        self.understander.understand(question, lang, now).await
    }

    /// Search the tenant's index with an already derived filter
    #[instrument(skip(self, filter, k, now), fields(k = tracing::field::Empty))]
    pub async fn search(
        &self,
        tenant_id: &str,
        filter: &RetrievalFilter,
        k: Option<usize>,
        lang: Lang,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredCandidate>> {
        let start = Instant::now();
        let k = k.unwrap_or(self.top_k);
        tracing::Span::current().record("k", k);

        let vector = self.index.embed_query(&filter.raw_question).await?;
        let mut candidates = self.index.search(tenant_id, vector, k, filter, now).await?;

        if self.rerank && !candidates.is_empty() {
            candidates = self.rerank(filter.body_query(), candidates, lang).await?;
        }

        metrics::record_search(start.elapsed().as_secs_f64(), self.rerank, candidates.len());
        debug!(candidates = candidates.len(), reranked = self.rerank, "Retrieval complete");
        Ok(candidates)
    }

    /// Understand the question, then search
    pub async fn retrieve(
        &self,
        tenant_id: &str,
        question: &str,
        k: Option<usize>,
        lang: Lang,
        now: DateTime<Utc>,
    ) -> Result<Retrieval> {
        let filter = self.understand(question, lang, now).await;
        let candidates = self.search(tenant_id, &filter, k, lang, now).await?;
        Ok(Retrieval {
            filter,
            candidates,
            reranked: self.rerank,
        })
    }

    /// Replace hybrid scores with cross-encoder scores and re-sort
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredCandidate>,
        lang: Lang,
    ) -> Result<Vec<ScoredCandidate>> {
        let pages: Vec<String> = candidates.iter().map(|c| c.document.page_content()).collect();
        let scores = self
            .cross_encoder
            .cross_encode(query, &pages, lang.is_multilingual())
            .await?;
        if scores.len() != candidates.len() {
            return Err(AppError::CrossEncoderError {
                message: format!("expected {} scores, got {}", candidates.len(), scores.len()),
            });
        }

        let mut reranked: Vec<ScoredCandidate> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, score)| ScoredCandidate {
                document: candidate.document,
                score: f64::from(score),
            })
            .collect();
        // Stable: ties keep their hybrid order
        reranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(reranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lazymail_common::completion::ScriptedCompletion;
    use lazymail_common::db::{MemoryDocumentStore, ScoringParams};
    use lazymail_common::embeddings::{HashingEmbedder, StaticCrossEncoder};
    use lazymail_common::EmailDocument;

    async fn seeded_index() -> Arc<MailIndex> {
        let index = Arc::new(MailIndex::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(HashingEmbedder::new(64)),
            ScoringParams::default(),
        ));
        let sent = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        let mut sthack = EmailDocument::new("t1", "m1");
        sthack.subject = "Sthack event".into();
        sthack.body_text = "Emilie is speaking at Sthack on June 2".into();
        sthack.from_names = vec!["Emilie".into()];
        sthack.sent_at = Some(sent);

        let mut invoice = EmailDocument::new("t1", "m2");
        invoice.subject = "Quarterly invoice".into();
        invoice.body_text = "Please find attached the invoice for March".into();
        invoice.from_addresses = vec!["billing@acme.com".into()];
        invoice.sent_at = Some(sent);

        index.upsert("t1", vec![sthack, invoice]).await.unwrap();
        index
    }

    fn retriever(index: Arc<MailIndex>, model: ScriptedCompletion, rerank: bool) -> Retriever {
        let config = RetrievalConfig {
            rerank,
            ..RetrievalConfig::default()
        };
        Retriever::new(
            QueryUnderstander::new(Arc::new(model)),
            index,
            Arc::new(StaticCrossEncoder),
            &config,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_unparseable_extractions_still_return_results() {
        let retriever = retriever(
            seeded_index().await,
            ScriptedCompletion::new().otherwise("garbage, no json here"),
            false,
        );

        let retrieval = retriever
            .retrieve("t1", "What is Emilie doing for Sthack?", None, Lang::En, now())
            .await
            .unwrap();

        assert_eq!(retrieval.filter, RetrievalFilter::raw("What is Emilie doing for Sthack?"));
        assert_eq!(retrieval.candidates.len(), 2);
        assert_eq!(retrieval.candidates[0].document.id, "m1");
    }

    #[tokio::test]
    async fn test_sender_hint_from_extraction_is_used() {
        let model = ScriptedCompletion::new()
            .when("find a sender", "Emilie is named.\n{\"senders\": [\"emilie\"]}")
            .otherwise("nothing");
        let retriever = retriever(seeded_index().await, model, false);

        let retrieval = retriever
            .retrieve("t1", "What is Emilie doing for Sthack?", Some(1), Lang::En, now())
            .await
            .unwrap();

        assert_eq!(retrieval.filter.sender_hints, Some(vec!["emilie".to_string()]));
        assert_eq!(retrieval.candidates.len(), 1);
        assert_eq!(retrieval.candidates[0].document.id, "m1");
    }

    #[tokio::test]
    async fn test_rerank_uses_cross_encoder_scores() {
        let model = ScriptedCompletion::new()
            .when("summarize it into a question", "{\"question\": \"invoice for March\"}")
            .otherwise("nothing");
        let retriever = retriever(seeded_index().await, model, true);

        let retrieval = retriever
            .retrieve("t1", "Where is the March invoice?", None, Lang::En, now())
            .await
            .unwrap();

        assert!(retrieval.reranked);
        assert_eq!(retrieval.candidates[0].document.id, "m2");
        assert!(retrieval.candidates[0].score <= 1.0);
    }

    #[tokio::test]
    async fn test_unknown_tenant_yields_empty_results() {
        let retriever = retriever(seeded_index().await, ScriptedCompletion::new(), true);
        let retrieval = retriever
            .retrieve("t2", "anything", None, Lang::Fr, now())
            .await
            .unwrap();
        assert!(retrieval.candidates.is_empty());
    }
}
