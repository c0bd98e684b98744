//! LazyMail Search Service
//!
//! HTTP service over the per-tenant mail index providing:
//! - Document upsert, count and erasure
//! - Hybrid search with query understanding and optional reranking
//! - Question answering over a token-budgeted context

mod handlers;
mod pipeline;
mod retrieval;
#[cfg(test)]
mod test_support;

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use lazymail_common::{
    completion::{create_completion_model, CompletionModel},
    config::AppConfig,
    context::{ContextAssembler, QueryUnderstander, Synthesizer},
    embeddings::{create_embedding_services, EmbeddingServices},
    metrics::{self, RequestMetrics},
    tokenizer::{create_tokenizer, Tokenizer},
    DocumentStore, MailIndex, VERSION,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use pipeline::QuestionPipeline;
use retrieval::Retriever;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub index: Arc<MailIndex>,
    pub retriever: Arc<Retriever>,
    pub pipeline: Arc<QuestionPipeline>,
}

impl AppState {
    /// Wire the services from already constructed backends
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn DocumentStore>,
        services: EmbeddingServices,
        model: Arc<dyn CompletionModel>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        let index = Arc::new(MailIndex::new(
            store,
            services.embedder,
            (&config.retrieval).into(),
        ));
        let retriever = Arc::new(Retriever::new(
            QueryUnderstander::new(model.clone()),
            index.clone(),
            services.cross_encoder.clone(),
            &config.retrieval,
        ));
        let synthesizer = Synthesizer::new(model, services.cross_encoder)
            .with_answer_tokens(config.context.reserved_for_answer);
        let pipeline = Arc::new(QuestionPipeline::new(
            retriever.clone(),
            ContextAssembler::new(tokenizer, &config.context),
            synthesizer,
        ));

        Self {
            config,
            index,
            retriever,
            pipeline,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(&config);
    info!(
        service = %config.observability.service_name,
        "Starting LazyMail Search Service v{}", VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .set_buckets(metrics::LATENCY_BUCKETS)?
            .install()?;
        metrics::register_metrics();
        info!(%metrics_addr, "Prometheus exporter listening");
    } else {
        warn!("Metrics exporter disabled");
    }

    // Initialize backends
    info!(backend = ?config.index.backend, "Opening document store...");
    let store = lazymail_common::open_store(&config).await?;
    let services = create_embedding_services(&config.embedding)?;
    let model = create_completion_model(&config.completion)?;
    let tokenizer = create_tokenizer(&config.context)?;

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), store, services, model, tokenizer);

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// JSON logs unless disabled; `RUST_LOG` wins over the configured level
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let timeout = TimeoutLayer::new(state.config.request_timeout());

    // Tenant-scoped routes
    let tenant_routes = Router::new()
        .route(
            "/{tenant}/documents",
            post(handlers::documents::upsert_documents).delete(handlers::documents::delete_documents),
        )
        .route("/{tenant}/documents/count", get(handlers::documents::count_documents))
        .route("/{tenant}/search", post(handlers::search::search))
        .route("/{tenant}/ask", post(handlers::ask::ask));

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1/tenants", tenant_routes)
        .route_layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(timeout)
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Count and time requests per route template, not per tenant
async fn track_requests(matched: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let endpoint = matched
        .as_ref()
        .map(MatchedPath::as_str)
        .unwrap_or("unmatched")
        .to_string();
    let timer = RequestMetrics::start(request.method().as_str(), &endpoint);

    let response = next.run(request).await;
    timer.finish(response.status().as_u16());
    response
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
