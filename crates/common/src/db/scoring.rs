//! Hybrid relevance scoring
//!
//! Provides:
//! - Cosine similarity between embeddings
//! - Exponential temporal decay around "now"
//! - Fuzzy lexical matching over body, subject and participants
//! - The multiplicative composite `(lexical + 1) * (cosine + 1) * (decay + 1)`
//!
//! Each factor is non-negative and enters with `+1`, so no single zero
//! factor can veto a document on its own.

use super::models::EmailDocument;
use super::SearchQuery;
use crate::config::RetrievalConfig;
use chrono::{DateTime, Utc};
use nucleo_matcher::pattern::{AtomKind, CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32Str};
use std::collections::HashSet;

/// Terms this short must match exactly, longer ones may be fuzzy
pub(crate) const EXACT_TERM_MAX_CHARS: usize = 2;

/// Minimum ratio of a fuzzy hit to the term's own self-match score
pub(crate) const FUZZY_MIN_RATIO: f64 = 0.5;

/// Tunables of the composite score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringParams {
    /// Distance from "now" at which decay reaches `decay_factor`
    pub decay_scale_secs: f64,
    pub decay_factor: f64,
    pub subject_boost: f64,
    pub sender_boost: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for ScoringParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            decay_scale_secs: (config.decay_scale_days * 86_400.0).max(1.0),
            decay_factor: config.decay_factor,
            subject_boost: config.subject_boost,
            sender_boost: config.sender_boost,
        }
    }
}

/// Cosine similarity; zero for empty, mismatched or zero-norm inputs
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// `factor ^ (|now - sent_at| / scale)`, or 0 for undated documents.
///
/// Equals 1 at `now` and decreases monotonically with distance.
pub fn temporal_decay(
    now: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    scale_secs: f64,
    factor: f64,
) -> f64 {
    let Some(sent_at) = sent_at else {
        return 0.0;
    };
    let distance = (now - sent_at).num_milliseconds().unsigned_abs() as f64 / 1000.0;
    factor.powf(distance / scale_secs.max(1.0))
}

pub fn composite_score(lexical: f64, cosine: f64, decay: f64) -> f64 {
    (lexical + 1.0) * (cosine + 1.0) * (decay + 1.0)
}

/// Lowercased alphanumeric words of a text
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

struct Needle {
    text: String,
    pattern: Pattern,
    self_score: f64,
}

/// Lexical matcher compiled once per query and reused across documents
pub struct LexicalScorer {
    matcher: Matcher,
    buf: Vec<char>,
    body_terms: Vec<Needle>,
    subject_terms: Vec<Needle>,
    sender_hints: Vec<Needle>,
}

impl LexicalScorer {
    pub fn new(query: &SearchQuery) -> Self {
        let mut matcher = Matcher::new(Config::DEFAULT);
        let mut buf = Vec::new();

        let mut compile = |texts: Vec<String>| -> Vec<Needle> {
            texts
                .into_iter()
                .filter(|t| !t.trim().is_empty())
                .map(|text| {
                    let pattern = Pattern::new(
                        &text,
                        CaseMatching::Ignore,
                        Normalization::Smart,
                        AtomKind::Fuzzy,
                    );
                    let self_score = pattern
                        .score(Utf32Str::new(&text, &mut buf), &mut matcher)
                        .unwrap_or(0) as f64;
                    Needle {
                        text,
                        pattern,
                        self_score,
                    }
                })
                .collect()
        };

        let body_terms = compile(dedup(tokenize(&query.body_query)));
        let subject_terms = compile(dedup(tokenize(&query.subject_terms)));
        let sender_hints = compile(
            query
                .sender_hints
                .iter()
                .map(|h| h.trim().to_lowercase())
                .collect(),
        );

        Self {
            matcher,
            buf,
            body_terms,
            subject_terms,
            sender_hints,
        }
    }

    /// `max(body, subject * subject_boost, sender * sender_boost)`
    pub fn score(&mut self, doc: &EmailDocument, params: &ScoringParams) -> f64 {
        let body = self.body_score(doc);
        let subject = self.subject_score(doc) * params.subject_boost;
        let sender = self.sender_score(doc) * params.sender_boost;
        body.max(subject).max(sender)
    }

    pub fn body_score(&mut self, doc: &EmailDocument) -> f64 {
        let words = dedup(tokenize(&doc.body_text));
        let terms = std::mem::take(&mut self.body_terms);
        let score = self.field_score(&terms, &words);
        self.body_terms = terms;
        score
    }

    pub fn subject_score(&mut self, doc: &EmailDocument) -> f64 {
        let words = dedup(tokenize(&doc.subject));
        let terms = std::mem::take(&mut self.subject_terms);
        let score = self.field_score(&terms, &words);
        self.subject_terms = terms;
        score
    }

    /// Best hint against any from/to/cc name or address; hints are OR-ed
    pub fn sender_score(&mut self, doc: &EmailDocument) -> f64 {
        let hints = std::mem::take(&mut self.sender_hints);
        let mut best = 0.0f64;
        for hint in &hints {
            for participant in doc.participants() {
                let value = participant.trim().to_lowercase();
                if value.is_empty() {
                    continue;
                }
                let ratio = if value.contains(&hint.text) {
                    1.0
                } else {
                    self.fuzzy_ratio(hint, &value)
                };
                best = best.max(ratio);
            }
        }
        self.sender_hints = hints;
        best
    }

    /// Mean over terms of the best per-word match
    fn field_score(&mut self, terms: &[Needle], words: &[String]) -> f64 {
        if terms.is_empty() || words.is_empty() {
            return 0.0;
        }

        let total: f64 = terms
            .iter()
            .map(|term| {
                words
                    .iter()
                    .map(|word| self.term_ratio(term, word))
                    .fold(0.0, f64::max)
            })
            .sum();
        total / terms.len() as f64
    }

    fn term_ratio(&mut self, term: &Needle, word: &str) -> f64 {
        if term.text == word {
            return 1.0;
        }
        if term.text.chars().count() <= EXACT_TERM_MAX_CHARS {
            return 0.0;
        }
        self.fuzzy_ratio(term, word)
    }

    fn fuzzy_ratio(&mut self, needle: &Needle, haystack: &str) -> f64 {
        if needle.self_score <= 0.0 {
            return 0.0;
        }
        let Some(score) = needle
            .pattern
            .score(Utf32Str::new(haystack, &mut self.buf), &mut self.matcher)
        else {
            return 0.0;
        };
        let ratio = (score as f64 / needle.self_score).min(1.0);
        if ratio < FUZZY_MIN_RATIO {
            0.0
        } else {
            ratio
        }
    }
}

fn dedup(words: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    words.into_iter().filter(|w| seen.insert(w.clone())).collect()
}

/// Full composite score of one document for one query
pub fn score_document(
    scorer: &mut LexicalScorer,
    query: &SearchQuery,
    doc: &EmailDocument,
    embedding: &[f32],
    params: &ScoringParams,
) -> f64 {
    let lexical = scorer.score(doc, params);
    let cosine = cosine_similarity(&query.vector, embedding).max(-1.0);
    let decay = temporal_decay(query.now, doc.sent_at, params.decay_scale_secs, params.decay_factor);
    composite_score(lexical, cosine, decay)
}
