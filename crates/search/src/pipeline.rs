//! Per-question pipeline
//!
//! `ExtractingFilter -> Searching -> AssemblingContext -> Generating ->
//! ScoringSources -> Done`. A failing stage ends the run with an error that
//! names the stage; nothing is retried here.

use crate::retrieval::Retriever;
use chrono::{DateTime, Utc};
use lazymail_common::{
    completion::ChatMessage,
    context::{ContextAssembler, Persona, SynthesizedAnswer, Synthesizer},
    errors::{PipelineStage, Result},
    metrics, Lang,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Everything needed to answer one question
#[derive(Debug, Clone)]
pub struct Question {
    pub tenant_id: String,
    pub text: String,
    pub lang: Lang,
    /// Prior turns of the thread, oldest first
    pub history: Vec<ChatMessage>,
    pub persona: Persona,
    /// Overrides the configured context window
    pub max_tokens: Option<usize>,
    pub k: Option<usize>,
}

pub struct QuestionPipeline {
    retriever: Arc<Retriever>,
    assembler: ContextAssembler,
    synthesizer: Synthesizer,
}

impl QuestionPipeline {
    pub fn new(retriever: Arc<Retriever>, assembler: ContextAssembler, synthesizer: Synthesizer) -> Self {
        Self {
            retriever,
            assembler,
            synthesizer,
        }
    }

    #[instrument(skip_all, fields(tenant_id = %question.tenant_id, lang = %question.lang))]
    pub async fn run(&self, question: &Question, now: DateTime<Utc>) -> Result<SynthesizedAnswer> {
        match self.execute(question, now).await {
            Ok(answer) => {
                metrics::record_pipeline_run(&PipelineStage::Done.to_string());
                info!(
                    context_documents = answer.context_documents,
                    sources = answer.sources.len(),
                    "Question answered"
                );
                Ok(answer)
            }
            Err(e) => {
                let stage = e.stage().map(|s| s.to_string()).unwrap_or_default();
                metrics::record_pipeline_run(&stage);
                warn!(stage = %stage, error = %e, "Question pipeline failed");
                Err(e)
            }
        }
    }

    async fn execute(&self, question: &Question, now: DateTime<Utc>) -> Result<SynthesizedAnswer> {
        let filter = self
            .retriever
            .understand(&question.text, question.lang, now)
            .await;

        let candidates = self
            .retriever
            .search(&question.tenant_id, &filter, question.k, question.lang, now)
            .await
            .map_err(|e| e.at_stage(PipelineStage::Searching))?;

        let history_tokens: usize = question
            .history
            .iter()
            .map(|m| self.assembler.tokenizer().count_tokens(&m.content))
            .sum();
        let budget = self.assembler.budget(question.max_tokens, history_tokens);
        let context = self.assembler.assemble(&candidates, budget);

        let answer = self
            .synthesizer
            .generate(
                &question.persona,
                question.lang,
                &context,
                &question.history,
                &question.text,
                now,
            )
            .await
            .map_err(|e| e.at_stage(PipelineStage::Generating))?;

        let sources = self
            .synthesizer
            .rank_sources(&answer, &context, question.lang)
            .await
            .map_err(|e| e.at_stage(PipelineStage::ScoringSources))?;

        Ok(SynthesizedAnswer {
            answer,
            sources,
            context_documents: context.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use lazymail_common::completion::ScriptedCompletion;
    use lazymail_common::config::{ContextConfig, RetrievalConfig};
    use lazymail_common::context::QueryUnderstander;
    use lazymail_common::db::{MemoryDocumentStore, ScoringParams};
    use lazymail_common::embeddings::{HashingEmbedder, StaticCrossEncoder};
    use lazymail_common::tokenizer::WordTokenizer;
    use lazymail_common::{AppError, CrossEncoder, EmailDocument, MailIndex};

    struct FailingCrossEncoder;

    #[async_trait]
    impl CrossEncoder for FailingCrossEncoder {
        async fn cross_encode(&self, _: &str, _: &[String], _: bool) -> Result<Vec<f32>> {
            Err(AppError::CrossEncoderError {
                message: "unavailable".into(),
            })
        }
    }

    async fn pipeline(model: ScriptedCompletion, scorer: Arc<dyn CrossEncoder>) -> QuestionPipeline {
        let index = Arc::new(MailIndex::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(HashingEmbedder::new(64)),
            ScoringParams::default(),
        ));
        let mut doc = EmailDocument::new("t1", "m1");
        doc.subject = "Sthack event".into();
        doc.body_text = "Emilie is speaking at Sthack on June 2".into();
        doc.from_names = vec!["Emilie".into()];
        doc.sent_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        index.upsert("t1", vec![doc]).await.unwrap();

        let model = Arc::new(model);
        let retriever = Arc::new(Retriever::new(
            QueryUnderstander::new(model.clone()),
            index,
            Arc::new(StaticCrossEncoder),
            &RetrievalConfig::default(),
        ));
        let assembler = ContextAssembler::new(Arc::new(WordTokenizer::new(512)), &ContextConfig::default());
        QuestionPipeline::new(retriever, assembler, Synthesizer::new(model, scorer))
    }

    fn question(text: &str) -> Question {
        Question {
            tenant_id: "t1".into(),
            text: text.into(),
            lang: Lang::En,
            history: Vec::new(),
            persona: Persona::new("Alice"),
            max_tokens: None,
            k: None,
        }
    }

    #[tokio::test]
    async fn test_question_is_answered_with_sources() {
        let model = ScriptedCompletion::new()
            .when("What is Emilie doing", "Emilie is speaking at Sthack on June 2.")
            .otherwise("no json");
        let pipeline = pipeline(model, Arc::new(StaticCrossEncoder)).await;

        let answer = pipeline
            .run(&question("What is Emilie doing for Sthack?"), Utc::now())
            .await
            .unwrap();

        assert_eq!(answer.answer, "Emilie is speaking at Sthack on June 2.");
        assert_eq!(answer.context_documents, 1);
        assert_eq!(answer.sources[0].document_id, "m1");
    }

    #[tokio::test]
    async fn test_tiny_window_generates_without_documents() {
        let model = ScriptedCompletion::new().otherwise("I could not find it.");
        let pipeline = pipeline(model, Arc::new(StaticCrossEncoder)).await;

        let mut q = question("What is Emilie doing for Sthack?");
        q.max_tokens = Some(10);
        let answer = pipeline.run(&q, Utc::now()).await.unwrap();

        assert_eq!(answer.context_documents, 0);
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_names_its_stage() {
        // No fallback: extraction degrades silently, generation fails
        let pipeline = pipeline(ScriptedCompletion::new(), Arc::new(StaticCrossEncoder)).await;

        let err = tokio_test::assert_err!(pipeline.run(&question("anything"), Utc::now()).await);
        assert_eq!(err.stage(), Some(PipelineStage::Generating));
    }

    #[tokio::test]
    async fn test_source_scoring_failure_names_its_stage() {
        let model = ScriptedCompletion::new().otherwise("Emilie speaks at Sthack.");
        let pipeline = pipeline(model, Arc::new(FailingCrossEncoder)).await;

        let err = pipeline
            .run(&question("What is Emilie doing for Sthack?"), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(PipelineStage::ScoringSources));
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_not_an_error() {
        let model = ScriptedCompletion::new().otherwise("Nothing found.");
        let pipeline = pipeline(model, Arc::new(StaticCrossEncoder)).await;

        let mut q = question("anything");
        q.tenant_id = "t9".into();
        let answer = pipeline.run(&q, Utc::now()).await.unwrap();
        assert_eq!(answer.context_documents, 0);
    }
}
