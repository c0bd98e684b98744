//! Configuration management for LazyMail services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (Postgres index backend)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Document index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding / cross-encoder service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Completion service configuration (query understanding, generation)
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Hybrid retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Context assembly configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Batch indexing configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Which document store backs the index
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Store backend: postgres, memory
    #[serde(default = "default_index_backend")]
    pub backend: IndexBackend,

    /// Table holding the email documents
    #[serde(default = "default_index_table")]
    pub table: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: sentence-transformers, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Base URL of the sentence-transformers service
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Model label reported in logs
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension, constant for the lifetime of the index
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// Completion provider: openai, mock
    #[serde(default = "default_completion_provider")]
    pub provider: String,

    /// Chat completions endpoint
    #[serde(default = "default_completion_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Candidates requested from the index per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Rerank hybrid results with the cross-encoder before generation
    #[serde(default)]
    pub rerank: bool,

    /// Decay scale (half-life) in days
    #[serde(default = "default_decay_scale_days")]
    pub decay_scale_days: f64,

    /// Decay factor reached at one scale
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    /// Weight of the subject match
    #[serde(default = "default_subject_boost")]
    pub subject_boost: f64,

    /// Weight of a sender match
    #[serde(default = "default_sender_boost")]
    pub sender_boost: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Context window of the generation model
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tokens kept free for the answer
    #[serde(default = "default_reserved_for_answer")]
    pub reserved_for_answer: usize,

    /// Chunk size (tokens) of the split applied to each document
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap (tokens) between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Tokenizer: cl100k, words
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Documents per upsert batch
    #[serde(default = "default_ingestion_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_database_url() -> String { "postgres://localhost/lazymail".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_index_backend() -> IndexBackend { IndexBackend::Postgres }
fn default_index_table() -> String { "email_documents".to_string() }
fn default_embedding_provider() -> String { "sentence-transformers".to_string() }
fn default_embedding_base_url() -> String { "http://127.0.0.1:5000".to_string() }
fn default_embedding_model() -> String { "all-mpnet-base-v2".to_string() }
fn default_embedding_dimension() -> usize { 768 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 32 }
fn default_completion_provider() -> String { "openai".to_string() }
fn default_completion_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_completion_model() -> String { "gpt-4o-mini".to_string() }
fn default_completion_timeout() -> u64 { 60 }
fn default_top_k() -> usize { 50 }
fn default_decay_scale_days() -> f64 { 30.0 }
fn default_decay_factor() -> f64 { 0.5 }
fn default_subject_boost() -> f64 { 2.0 }
fn default_sender_boost() -> f64 { 3.0 }
fn default_max_tokens() -> usize { 4000 }
fn default_reserved_for_answer() -> usize { 512 }
fn default_chunk_size() -> usize { 512 }
fn default_chunk_overlap() -> usize { 32 }
fn default_tokenizer() -> String { "cl100k".to_string() }
fn default_ingestion_batch_size() -> usize { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "lazymail".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            table: default_index_table(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            endpoint: default_completion_endpoint(),
            api_key: None,
            model: default_completion_model(),
            temperature: 0.0,
            timeout_secs: default_completion_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rerank: false,
            decay_scale_days: default_decay_scale_days(),
            decay_factor: default_decay_factor(),
            subject_boost: default_subject_boost(),
            sender_boost: default_sender_boost(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reserved_for_answer: default_reserved_for_answer(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            tokenizer: default_tokenizer(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingestion_batch_size(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__RETRIEVAL__TOP_K=20
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            completion: CompletionConfig::default(),
            retrieval: RetrievalConfig::default(),
            context: ContextConfig::default(),
            ingestion: IngestionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
