//! Document index storage for LazyMail
//!
//! Provides:
//! - Email document models
//! - The `DocumentStore` seam every index backend implements
//! - Postgres (pgvector + pg_trgm) and in-memory backends
//! - Hybrid scoring shared by both backends
//! - Connection pool management

pub mod memory;
pub mod models;
mod repository;
pub mod scoring;

pub use memory::MemoryDocumentStore;
pub use repository::Repository;
pub use scoring::ScoringParams;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{DateRange, EmailDocument, ScoredCandidate};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

/// Fully resolved search request as a backend executes it
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub tenant_id: String,
    pub vector: Vec<f32>,
    pub k: usize,
    /// Free text matched fuzzily against the body
    pub body_query: String,
    /// Free text matched fuzzily against the subject
    pub subject_terms: String,
    /// Matched against from/to/cc names and addresses; empty means no hint
    pub sender_hints: Vec<String>,
    /// Hard filter on `sent_at`
    pub date_range: DateRange,
    /// Origin of the temporal decay
    pub now: DateTime<Utc>,
}

/// Storage seam for the per-tenant document index.
///
/// Every method is scoped by tenant; no method may read or write another
/// tenant's documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create tables and extensions if absent
    async fn ensure_schema(&self) -> Result<()>;

    /// Which of `ids` already exist for this tenant
    async fn existing_ids(&self, tenant_id: &str, ids: &[String]) -> Result<HashSet<String>>;

    /// Insert or replace documents, returns the number written
    async fn upsert(&self, tenant_id: &str, documents: Vec<EmailDocument>) -> Result<u64>;

    async fn count(&self, tenant_id: &str) -> Result<u64>;

    /// Remove every document of the tenant, returns the number removed
    async fn delete_all(&self, tenant_id: &str) -> Result<u64>;

    /// Top `k` documents by composite score, descending
    async fn search(&self, query: &SearchQuery, params: &ScoringParams) -> Result<Vec<ScoredCandidate>>;

    async fn ping(&self) -> Result<()>;

    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Self::connect(&config.url, config)
            .await
            .map_err(|e| AppError::IndexConnection {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        let replica = match config.read_url {
            Some(ref read_url) => {
                info!("Connecting to read replica...");
                let conn = Self::connect(read_url, config)
                    .await
                    .map_err(|e| AppError::IndexConnection {
                        message: format!("Failed to connect to replica: {}", e),
                    })?;
                Some(conn)
            }
            None => None,
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    async fn connect(
        url: &str,
        config: &DatabaseConfig,
    ) -> std::result::Result<DatabaseConnection, sea_orm::DbErr> {
        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);
        Database::connect(opts).await
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::IndexConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::IndexConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}
