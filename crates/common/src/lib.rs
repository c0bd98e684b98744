//! LazyMail Common Library
//!
//! Shared code for the LazyMail services including:
//! - Email document models and the per-tenant document index
//! - Embedding, cross-encoder and completion clients
//! - Query understanding, context assembly and answer synthesis
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod completion;
pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod http;
pub mod index;
pub mod metrics;
pub mod tokenizer;

// Re-export commonly used types
pub use config::AppConfig;
pub use context::{Lang, RetrievalFilter};
pub use db::models::{EmailDocument, ScoredCandidate};
pub use db::DocumentStore;
pub use embeddings::{CrossEncoder, Embedder};
pub use errors::{AppError, PipelineStage, Result};
pub use index::{open_store, MailIndex, UpsertReport};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
