//! Context assembly - fills a token budget with ranked documents
//!
//! Provides:
//! - Greedy, rank-ordered selection under `max_tokens - reserved_for_answer`
//! - First-chunk-only token costing
//! - Rendering of each selected email for the generation prompt
//!
//! Selection stops at the first candidate that does not fit. Nothing after
//! it is considered, and no document is ever cut to fit.

use crate::config::ContextConfig;
use crate::db::models::{render_page, ScoredCandidate};
use crate::tokenizer::Tokenizer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One email selected for the generation prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub document_id: String,
    pub subject: String,
    pub sender: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Rendered `Subject:`/`From:` header plus the first chunk
    pub content: String,
    /// Tokens charged against the budget
    pub token_count: usize,
    pub retrieval_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub entries: Vec<ContextEntry>,
    pub total_tokens: usize,
    pub budget: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct ContextAssembler {
    tokenizer: Arc<dyn Tokenizer>,
    max_tokens: usize,
    reserved_for_answer: usize,
}

impl ContextAssembler {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: &ContextConfig) -> Self {
        Self {
            tokenizer,
            max_tokens: config.max_tokens,
            reserved_for_answer: config.reserved_for_answer,
        }
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Tokens available to documents once the answer and history are set aside
    pub fn budget(&self, max_tokens: Option<usize>, history_tokens: usize) -> usize {
        max_tokens
            .unwrap_or(self.max_tokens)
            .saturating_sub(self.reserved_for_answer)
            .saturating_sub(history_tokens)
    }

    /// Greedily include candidates in rank order until one does not fit
    pub fn assemble(&self, candidates: &[ScoredCandidate], budget: usize) -> AssembledContext {
        let mut entries = Vec::new();
        let mut total_tokens = 0usize;

        for candidate in candidates {
            let doc = &candidate.document;
            let chunk = self.tokenizer.first_chunk(&doc.body_text);
            let cost = self.tokenizer.count_tokens(&chunk);

            if total_tokens + cost > budget {
                debug!(
                    document_id = %doc.id,
                    cost,
                    used = total_tokens,
                    budget,
                    "Context budget reached"
                );
                break;
            }
            total_tokens += cost;

            let sender = doc.primary_sender().map(str::to_string);
            entries.push(ContextEntry {
                document_id: doc.id.clone(),
                subject: doc.subject.clone(),
                content: render_page(&doc.subject, sender.as_deref(), &chunk),
                sender,
                sent_at: doc.sent_at,
                token_count: cost,
                retrieval_score: candidate.score,
            });
        }

        crate::metrics::record_context(entries.len(), total_tokens);
        AssembledContext {
            entries,
            total_tokens,
            budget,
        }
    }
}
