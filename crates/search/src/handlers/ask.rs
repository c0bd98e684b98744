//! Question answering handler

use crate::pipeline::Question;
use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use lazymail_common::{
    completion::ChatMessage,
    context::{Persona, Source},
    errors::Result,
    Lang,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,

    /// Earlier turns of the conversation, oldest first
    #[serde(default)]
    pub history: Vec<ChatMessage>,

    #[serde(default)]
    pub lang: Lang,

    /// Context window override
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_tokens: Option<usize>,

    #[serde(default)]
    #[validate(range(min = 1, max = 500))]
    pub k: Option<usize>,

    #[serde(default)]
    pub user: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
pub struct UserInfo {
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub context_documents: usize,
    pub processing_time_ms: u64,
}

/// Answer a question from the tenant's mail
pub async fn ask(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    let start = Instant::now();
    request.validate()?;

    let persona = match request.user {
        Some(user) => Persona {
            display_name: user.display_name,
            email_address: user.email,
            user_id: user.id,
        },
        None => Persona::new("User"),
    };

    let question = Question {
        tenant_id,
        text: request.question,
        lang: request.lang,
        history: request.history,
        persona,
        max_tokens: request.max_tokens,
        k: request.k,
    };

    let answer = state.pipeline.run(&question, Utc::now()).await?;

    Ok(Json(AskResponse {
        answer: answer.answer,
        sources: answer.sources,
        context_documents: answer.context_documents,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
