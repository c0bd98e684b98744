//! Completion model abstraction
//!
//! Provides:
//! - A chat-style `CompletionModel` seam used by query extraction and answer generation
//! - An OpenAI-compatible chat completions client
//! - A scripted model for tests

use crate::config::CompletionConfig;
use crate::errors::{AppError, Result};
use crate::http::RetryingClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<usize>,
    /// End user the call is made for, forwarded to the provider
    pub user: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Content of the final message
    pub fn last_content(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or_default()
    }
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Complete a conversation, returning the assistant's reply
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    fn model_name(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible chat completions
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

pub struct OpenAICompletion {
    http: RetryingClient,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let http = RetryingClient::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
            |message| AppError::CompletionError { message },
        )?
        .with_bearer_token(config.api_key.clone());

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAICompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: self.temperature,
            user: request.user.as_deref(),
        };

        let response: ChatResponse = self.http.post_json(&self.endpoint, &body).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::CompletionError {
                message: "Empty response from completion model".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Scripted model
// ============================================================================

/// Replies with the first rule whose trigger occurs in the last message,
/// or the fallback reply
pub struct ScriptedCompletion {
    rules: Vec<(String, String)>,
    fallback: Option<String>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: None,
        }
    }

    pub fn when(mut self, trigger: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((trigger.into(), reply.into()));
        self
    }

    pub fn otherwise(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionModel for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let prompt = request.last_content();
        self.rules
            .iter()
            .find(|(trigger, _)| prompt.contains(trigger.as_str()))
            .map(|(_, reply)| reply.clone())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| AppError::CompletionError {
                message: "no scripted reply for prompt".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Create a completion model based on configuration
pub fn create_completion_model(config: &CompletionConfig) -> Result<Arc<dyn CompletionModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        // Every extraction falls back to its neutral value
        "mock" => Ok(Arc::new(
            ScriptedCompletion::new().otherwise("No answer available offline."),
        )),
        other => Err(AppError::Configuration {
            message: format!("Unknown completion provider: {}", other),
        }),
    }
}
