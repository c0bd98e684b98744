//! Answer synthesis - generates an answer from assembled context
//!
//! Provides:
//! - Prompt construction (system instructions, emails, history, question)
//! - Generation through the completion model
//! - Source ranking: cross-encoding the answer against the emails it saw

use super::context_stitcher::AssembledContext;
use super::prompts::{answer_system_prompt, first_turn_message};
use super::Lang;
use crate::completion::{ChatMessage, CompletionModel, CompletionRequest};
use crate::embeddings::CrossEncoder;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Who the assistant is answering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub display_name: String,
    pub email_address: Option<String>,
    /// Forwarded to the completion provider as the end user
    pub user_id: Option<String>,
}

impl Persona {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

/// A cited email, in display order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub document_id: String,
    pub subject: String,
    pub sender: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
    /// Emails shown to the model
    pub context_documents: usize,
}

pub struct Synthesizer {
    model: Arc<dyn CompletionModel>,
    cross_encoder: Arc<dyn CrossEncoder>,
    answer_tokens: Option<usize>,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn CompletionModel>, cross_encoder: Arc<dyn CrossEncoder>) -> Self {
        Self {
            model,
            cross_encoder,
            answer_tokens: None,
        }
    }

    /// Cap the generated answer length
    pub fn with_answer_tokens(mut self, answer_tokens: usize) -> Self {
        self.answer_tokens = Some(answer_tokens);
        self
    }

    /// Messages sent for generation.
    ///
    /// Emails travel as system messages after the instructions. Without
    /// history the question is prefixed with the user's identity and today's
    /// date.
    pub fn build_messages(
        &self,
        persona: &Persona,
        lang: Lang,
        context: &AssembledContext,
        history: &[ChatMessage],
        question: &str,
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage> {
        let email_address = persona.email_address.as_deref();
        let mut messages = Vec::with_capacity(context.len() + history.len() + 2);

        messages.push(ChatMessage::system(answer_system_prompt(
            lang,
            &persona.display_name,
            email_address,
        )));
        messages.extend(
            context
                .entries
                .iter()
                .map(|entry| ChatMessage::system(entry.content.clone())),
        );
        messages.extend(history.iter().cloned());

        let question = if history.is_empty() {
            first_turn_message(lang, &persona.display_name, email_address, now, question)
        } else {
            question.to_string()
        };
        messages.push(ChatMessage::user(question));
        messages
    }

    /// Generate the answer text
    #[instrument(skip_all, fields(lang = %lang, documents = context.len()))]
    pub async fn generate(
        &self,
        persona: &Persona,
        lang: Lang,
        context: &AssembledContext,
        history: &[ChatMessage],
        question: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let messages = self.build_messages(persona, lang, context, history, question, now);
        let request = CompletionRequest::new(messages)
            .with_max_tokens(self.answer_tokens)
            .with_user(persona.user_id.clone());

        let answer = self.model.complete(&request).await?;
        debug!(model = self.model.model_name(), chars = answer.len(), "Answer generated");
        Ok(answer)
    }

    /// Order the context emails by relevance to the answer, one entry per email
    #[instrument(skip_all, fields(lang = %lang, documents = context.len()))]
    pub async fn rank_sources(
        &self,
        answer: &str,
        context: &AssembledContext,
        lang: Lang,
    ) -> Result<Vec<Source>> {
        if context.is_empty() {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = context.entries.iter().map(|e| e.content.clone()).collect();
        let scores = self
            .cross_encoder
            .cross_encode(answer, &contents, lang.is_multilingual())
            .await?;

        let mut scored: Vec<Source> = context
            .entries
            .iter()
            .zip(scores)
            .map(|(entry, score)| Source {
                document_id: entry.document_id.clone(),
                subject: entry.subject.clone(),
                sender: entry.sender.clone(),
                score,
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut seen = HashSet::new();
        scored.retain(|source| seen.insert(source.document_id.clone()));
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{Role, ScriptedCompletion};
    use crate::context::ContextEntry;
    use crate::embeddings::StaticCrossEncoder;
    use chrono::TimeZone;

    fn entry(id: &str, subject: &str, body: &str) -> ContextEntry {
        ContextEntry {
            document_id: id.to_string(),
            subject: subject.to_string(),
            sender: Some("Emilie".to_string()),
            sent_at: None,
            content: format!("Subject: {subject}\nFrom: Emilie\n{body}"),
            token_count: 10,
            retrieval_score: 1.0,
        }
    }

    fn context(entries: Vec<ContextEntry>) -> AssembledContext {
        AssembledContext {
            entries,
            total_tokens: 0,
            budget: 100,
        }
    }

    fn synthesizer(model: ScriptedCompletion) -> Synthesizer {
        Synthesizer::new(Arc::new(model), Arc::new(StaticCrossEncoder))
    }

    #[test]
    fn test_first_turn_messages() {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 8, 0, 0).unwrap();
        let persona = Persona {
            display_name: "Alice".into(),
            email_address: Some("alice@example.com".into()),
            user_id: None,
        };
        let ctx = context(vec![entry("m1", "Sthack event", "Emilie is speaking")]);

        let messages = synthesizer(ScriptedCompletion::new())
            .build_messages(&persona, Lang::En, &ctx, &[], "What is Emilie doing?", now);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Alice <alice@example.com>"));
        assert!(messages[1].content.starts_with("Subject: Sthack event"));
        assert_eq!(
            messages[2].content,
            "I am Alice <alice@example.com>, today is 2024-05-17T08:00:00Z.\nWhat is Emilie doing?"
        );
    }

    #[test]
    fn test_follow_up_keeps_history_and_plain_question() {
        let history = vec![ChatMessage::user("first"), ChatMessage::assistant("reply")];
        let messages = synthesizer(ScriptedCompletion::new()).build_messages(
            &Persona::new("Alice"),
            Lang::Fr,
            &AssembledContext::default(),
            &history,
            "et ensuite ?",
            Utc::now(),
        );

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1], history[0]);
        assert_eq!(messages[3], ChatMessage::user("et ensuite ?"));
    }

    #[tokio::test]
    async fn test_generate_returns_model_reply() {
        let synth = synthesizer(ScriptedCompletion::new().when("Emilie", "She is speaking on June 2."));
        let answer = synth
            .generate(
                &Persona::new("Alice"),
                Lang::En,
                &AssembledContext::default(),
                &[],
                "What is Emilie doing?",
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(answer, "She is speaking on June 2.");
    }

    #[tokio::test]
    async fn test_sources_sorted_and_deduplicated() {
        let ctx = context(vec![
            entry("m2", "Lunch", "pizza on friday"),
            entry("m1", "Sthack event", "emilie speaking sthack june"),
            entry("m1", "Sthack event", "emilie speaking"),
        ]);

        let sources = synthesizer(ScriptedCompletion::new())
            .rank_sources("emilie is speaking at sthack in june", &ctx, Lang::En)
            .await
            .unwrap();

        let ids: Vec<_> = sources.iter().map(|s| s.document_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(sources[0].score > sources[1].score);
    }

    #[tokio::test]
    async fn test_empty_context_has_no_sources() {
        let sources = synthesizer(ScriptedCompletion::new())
            .rank_sources("anything", &AssembledContext::default(), Lang::Fr)
            .await
            .unwrap();
        assert!(sources.is_empty());
    }
}
