//! LazyMail Ingestion
//!
//! Indexes an exported mailbox into one tenant:
//! 1. Reads newline-delimited JSON email documents
//! 2. Upserts them in batches of `ingestion.batch_size`
//! 3. Skips documents the tenant already has
//!
//! Usage: `ingestion <tenant-id> <documents.ndjson>`

mod errors;
mod indexer;

use errors::IngestionError;
use indexer::{read_documents, Indexer, LogProgress};
use lazymail_common::{
    config::AppConfig, embeddings::create_embedding_services, open_store, MailIndex, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let (tenant_id, path) = parse_args(std::env::args().skip(1))?;

    // Load configuration
    let config = AppConfig::load().map_err(|e| IngestionError::Setup(e.to_string()))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .init();

    info!("Starting LazyMail Ingestion v{}", VERSION);

    let store = open_store(&config).await?;
    let services = create_embedding_services(&config.embedding)?;
    let index = Arc::new(MailIndex::new(
        store,
        services.embedder,
        (&config.retrieval).into(),
    ));

    let documents = read_documents(&path).await?;
    info!(tenant_id = %tenant_id, documents = documents.len(), path = %path.display(), "Documents loaded");

    let indexer = Indexer::new(index, config.ingestion.batch_size);
    let report = indexer.index_all(&tenant_id, documents, &LogProgress).await?;

    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(String, PathBuf), IngestionError> {
    let usage = || IngestionError::Usage("ingestion <tenant-id> <documents.ndjson>".to_string());
    let tenant_id = args.next().filter(|t| !t.trim().is_empty()).ok_or_else(usage)?;
    let path = args.next().map(PathBuf::from).ok_or_else(usage)?;
    Ok((tenant_id, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values.iter().map(|v| v.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let (tenant, path) = tokio_test::assert_ok!(parse_args(args(&["acme-alice", "mail.ndjson"])));
        assert_eq!(tenant, "acme-alice");
        assert_eq!(path, PathBuf::from("mail.ndjson"));

        assert!(matches!(parse_args(args(&["acme-alice"])), Err(IngestionError::Usage(_))));
        assert!(matches!(parse_args(args(&[" ", "x"])), Err(IngestionError::Usage(_))));
    }
}
