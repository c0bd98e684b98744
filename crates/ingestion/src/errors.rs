//! Ingestion error types

use lazymail_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Invalid document on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Usage: {0}")]
    Usage(String),

    #[error("Indexing failed after {processed} of {total} documents: {source}")]
    Index {
        processed: usize,
        total: usize,
        #[source]
        source: AppError,
    },

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AppError> for IngestionError {
    fn from(e: AppError) -> Self {
        IngestionError::Setup(e.to_string())
    }
}
