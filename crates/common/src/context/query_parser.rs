//! Query understanding - turns a raw question into a retrieval filter
//!
//! Provides:
//! - Four concurrent few-shot extractions (dates, subject, question, senders)
//! - Last-line JSON parsing with a typed neutral fallback per axis
//!
//! An extraction that fails, for whatever reason, only degrades its own axis.

use super::prompts::{extraction_prompt, Axis};
use super::Lang;
use crate::completion::{ChatMessage, CompletionModel, CompletionRequest};
use crate::db::models::{parse_timestamp, DateRange};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Structured filter derived from one question, never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalFilter {
    pub raw_question: String,

    /// `None` when the request is not answerable by searching mail
    pub canonical_question: Option<String>,

    /// Possibly empty
    pub subject_terms: String,

    pub sender_hints: Option<Vec<String>>,

    pub date_range: DateRange,
}

impl RetrievalFilter {
    /// Neutral filter: plain search on the raw question
    pub fn raw(question: impl Into<String>) -> Self {
        Self {
            raw_question: question.into(),
            canonical_question: None,
            subject_terms: String::new(),
            sender_hints: None,
            date_range: DateRange::default(),
        }
    }

    /// Text matched against bodies: the canonical question, else the raw one
    pub fn body_query(&self) -> &str {
        self.canonical_question
            .as_deref()
            .unwrap_or(&self.raw_question)
    }
}

#[derive(Debug, Deserialize)]
struct DatesReply {
    #[serde(rename = "startingDate", default)]
    starting_date: Option<String>,
    #[serde(rename = "endingDate", default)]
    ending_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubjectReply {
    #[serde(alias = "sujet", default)]
    subject: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionReply {
    #[serde(default)]
    question: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendersReply {
    #[serde(alias = "expediteurs", default)]
    senders: Option<Vec<String>>,
}

/// Runs the four extractors against a completion model
#[derive(Clone)]
pub struct QueryUnderstander {
    model: Arc<dyn CompletionModel>,
}

impl QueryUnderstander {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    /// Build a filter for `question`; never fails
    #[instrument(skip_all, fields(lang = ?lang))]
    pub async fn understand(&self, question: &str, lang: Lang, now: DateTime<Utc>) -> RetrievalFilter {
        let (dates, subject, canonical, senders) = tokio::join!(
            self.extract::<DatesReply>(Axis::Dates, lang, question, now),
            self.extract::<SubjectReply>(Axis::Subject, lang, question, now),
            self.extract::<QuestionReply>(Axis::Question, lang, question, now),
            self.extract::<SendersReply>(Axis::Senders, lang, question, now),
        );

        let filter = RetrievalFilter {
            raw_question: question.to_string(),
            canonical_question: canonical
                .and_then(|r| r.question)
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty() && !q.eq_ignore_ascii_case("null")),
            subject_terms: subject
                .and_then(|r| r.subject)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            sender_hints: senders
                .and_then(|r| r.senders)
                .map(|hints| {
                    hints
                        .into_iter()
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|hints| !hints.is_empty()),
            date_range: dates.map(to_date_range).unwrap_or_default(),
        };

        debug!(
            canonical = ?filter.canonical_question,
            subject = %filter.subject_terms,
            senders = ?filter.sender_hints,
            start = ?filter.date_range.start,
            end = ?filter.date_range.end,
            "Query understood"
        );
        filter
    }

    async fn extract<T: DeserializeOwned>(
        &self,
        axis: Axis,
        lang: Lang,
        question: &str,
        now: DateTime<Utc>,
    ) -> Option<T> {
        let prompt = extraction_prompt(axis, lang, question, now);
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);

        let parsed = match self.model.complete(&request).await {
            Ok(response) => parse_last_line(axis, &response),
            Err(e) => {
                warn!(axis = axis.as_str(), error = %e, "Extraction call failed");
                None
            }
        };
        if parsed.is_none() {
            crate::metrics::record_extraction_fallback(axis.as_str());
        }
        parsed
    }
}

/// Parse the last non-blank line of a completion as JSON
pub(crate) fn parse_last_line<T: DeserializeOwned>(axis: Axis, response: &str) -> Option<T> {
    let last_line = response.lines().rev().find(|l| !l.trim().is_empty())?.trim();
    match serde_json::from_str(last_line) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(axis = axis.as_str(), line = %last_line, error = %e, "Unparseable extraction");
            None
        }
    }
}

fn to_date_range(reply: DatesReply) -> DateRange {
    let bound = |raw: Option<String>| raw.as_deref().and_then(parse_timestamp);
    let range = DateRange::new(bound(reply.starting_date), bound(reply.ending_date));

    match (range.start, range.end) {
        (Some(start), Some(end)) if start > end => {
            warn!(%start, %end, "Inverted date range, ignoring dates");
            DateRange::default()
        }
        _ => range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompletion;
    use chrono::TimeZone;

    fn understander(model: ScriptedCompletion) -> QueryUnderstander {
        QueryUnderstander::new(Arc::new(model))
    }

    #[tokio::test]
    async fn test_all_axes_extracted() {
        let model = ScriptedCompletion::new()
            .when(
                "find a date range",
                "Q1 of this year.\n{\"startingDate\": \"2024-01-01T00:00:00.000Z\", \"endingDate\": \"2024-04-01T00:00:00.000Z\"}",
            )
            .when("find a subject", "About prices.\n{\"subject\": \"price negotiation Damien Q1\"}")
            .when("summarize it into a question", "{\"question\": \"What was the price we negotiated?\"}")
            .when("find a sender", "Probably Damien.\n{\"senders\": [\"damien\"]}");

        let filter = understander(model)
            .understand("What was the price we negotiated with Damien in Q1?", Lang::En, Utc::now())
            .await;

        assert_eq!(filter.canonical_question.as_deref(), Some("What was the price we negotiated?"));
        assert_eq!(filter.subject_terms, "price negotiation Damien Q1");
        assert_eq!(filter.sender_hints, Some(vec!["damien".to_string()]));
        assert_eq!(filter.date_range.start, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(filter.date_range.end, Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_unparseable_replies_fall_back_per_axis() {
        let model = ScriptedCompletion::new()
            .when("find a subject", "{\"subject\": \"banque\"}")
            .otherwise("I am not sure what you mean");

        let filter = understander(model)
            .understand("Réponds à la banque", Lang::En, Utc::now())
            .await;

        assert_eq!(filter.subject_terms, "banque");
        assert_eq!(filter.canonical_question, None);
        assert_eq!(filter.sender_hints, None);
        assert!(filter.date_range.is_unbounded());
        assert_eq!(filter.body_query(), "Réponds à la banque");
    }

    #[tokio::test]
    async fn test_completion_errors_are_swallowed() {
        let filter = understander(ScriptedCompletion::new())
            .understand("anything", Lang::Fr, Utc::now())
            .await;
        assert_eq!(filter, RetrievalFilter::raw("anything"));
    }

    #[tokio::test]
    async fn test_french_keys_are_accepted() {
        let model = ScriptedCompletion::new()
            .when("trouver un sujet", "{\"sujet\": \"assurance\"}")
            .when("trouver un expéditeur", "{\"expediteurs\": [\"banque\", \"  \"]}")
            .otherwise("null");

        let filter = understander(model).understand("x", Lang::Fr, Utc::now()).await;
        assert_eq!(filter.subject_terms, "assurance");
        assert_eq!(filter.sender_hints, Some(vec!["banque".to_string()]));
    }

    #[test]
    fn test_parse_last_line_ignores_trailing_blank_lines() {
        let reply: Option<QuestionReply> =
            parse_last_line(Axis::Question, "Explanation first.\n{\"question\": null}\n\n");
        assert!(reply.unwrap().question.is_none());
    }

    #[test]
    fn test_inverted_range_is_dropped() {
        let range = to_date_range(DatesReply {
            starting_date: Some("2024-05-01T00:00:00Z".into()),
            ending_date: Some("2024-01-01T00:00:00Z".into()),
        });
        assert!(range.is_unbounded());
    }

    #[test]
    fn test_invalid_bound_is_dropped_alone() {
        let range = to_date_range(DatesReply {
            starting_date: Some("2024-05-01T00:00:00Z".into()),
            ending_date: Some("someday".into()),
        });
        assert!(range.start.is_some());
        assert!(range.end.is_none());
    }
}
