//! Error types for LazyMail services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling
//!
//! "No results" is never an error: searches that match nothing return an
//! empty list. Errors mean the operation could not be executed.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    ValidationError,
    MissingField,
    InvalidFormat,

    // Contract
    TenantMismatch,
    DimensionMismatch,

    // Index
    IndexError,
    ConnectionError,

    // External services
    EmbeddingError,
    CrossEncoderError,
    CompletionError,

    // Internal
    InternalError,
    ConfigurationError,
    SerializationError,
    PipelineError,
}

/// Stage of the per-question pipeline.
///
/// `Extracting filter -> Searching -> Assembling context -> Generating ->
/// Scoring sources -> Done`; any stage may fail, none is retried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    ExtractingFilter,
    Searching,
    AssemblingContext,
    Generating,
    ScoringSources,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::ExtractingFilter => "extracting_filter",
            PipelineStage::Searching => "searching",
            PipelineStage::AssemblingContext => "assembling_context",
            PipelineStage::Generating => "generating",
            PipelineStage::ScoringSources => "scoring_sources",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Contract errors
    #[error("Document {document_id} belongs to tenant {found}, expected {expected}")]
    TenantMismatch {
        document_id: String,
        expected: String,
        found: String,
    },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Index errors
    #[error("Index error: {0}")]
    Index(#[from] sea_orm::DbErr),

    #[error("Index connection error: {message}")]
    IndexConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Cross-encoder error: {message}")]
    CrossEncoderError { message: String },

    #[error("Completion service error: {message}")]
    CompletionError { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pipeline failed while {stage}: {source}")]
    Pipeline {
        stage: PipelineStage,
        #[source]
        source: Box<AppError>,
    },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Wrap an error with the pipeline stage it happened in
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            // Keep the innermost stage if already wrapped
            AppError::Pipeline { .. } => self,
            other => AppError::Pipeline {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::TenantMismatch { .. } => ErrorCode::TenantMismatch,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::Index(_) => ErrorCode::IndexError,
            AppError::IndexConnection { .. } => ErrorCode::ConnectionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::CrossEncoderError { .. } => ErrorCode::CrossEncoderError,
            AppError::CompletionError { .. } => ErrorCode::CompletionError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Pipeline { .. } => ErrorCode::PipelineError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            AppError::TenantMismatch { .. } => StatusCode::FORBIDDEN,

            // 500 Internal Server Error
            // Vectors are produced server-side, so a mismatch is misconfiguration
            AppError::Index(_)
            | AppError::DimensionMismatch { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. }
            | AppError::CrossEncoderError { .. }
            | AppError::CompletionError { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::IndexConnection { .. } => StatusCode::SERVICE_UNAVAILABLE,

            AppError::Pipeline { source, .. } => source.status_code(),
        }
    }

    /// Stage the error surfaced in, if it came out of the pipeline
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            AppError::Pipeline { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();
        let stage = self.stage();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                stage,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: errors.to_string(),
            field,
        }
    }
}
