//! AnswerForge API Gateway
//!
//! Loads the question catalog, indexes it once, then serves:
//! - `GET /api/ask?question=...` answers streamed over server-sent events
//! - `GET /api/hello` liveness greeting

mod handlers;

use anyhow::Context;
use answerforge_common::{
    config::AppConfig,
    embeddings::{create_embedder, Embedder},
    errors::Result,
    metrics,
};
use answerforge_search::{
    AnswerStreamer, CorpusStore, KnowledgeBase, RetrievalEngine, RetrievalSettings,
};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::Notify};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RetrievalEngine>,
    pub streamer: AnswerStreamer,
}

impl AppState {
    pub fn new(engine: RetrievalEngine, streamer: AnswerStreamer) -> Self {
        Self {
            engine: Arc::new(engine),
            streamer,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config);

    info!(
        version = answerforge_common::VERSION,
        service = %config.observability.service_name,
        "Starting AnswerForge API Gateway"
    );

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    // Prometheus scrape endpoint
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                metrics::LATENCY_BUCKETS,
            )?
            .set_buckets_for_metric(Matcher::Suffix("match_score".to_string()), metrics::SCORE_BUCKETS)?
            .install()
            .context("failed to install Prometheus exporter")?;
        metrics::register_metrics();
        info!(%metrics_addr, "Metrics exporter listening");
    }

    let embedder = create_embedder(&config.embedding)?;

    // Nothing is served until the whole catalog is indexed.
    let state = match bootstrap(&config, embedder).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, code = ?e.code(), "Startup failed");
            return Err(e.into());
        }
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "Listening");

    let shutdown = Arc::new(Notify::new());
    let server_shutdown = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.notified().await })
            .await
    });

    tokio::select! {
        result = &mut server => {
            result??;
            info!("Server stopped");
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    // Let in-flight streams drain, up to the configured deadline.
    shutdown.notify_one();
    match tokio::time::timeout(config.shutdown_timeout(), server).await {
        Ok(result) => result??,
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Shutdown deadline reached, dropping open connections"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logging {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

/// Load the corpus and index it
async fn bootstrap(config: &AppConfig, embedder: Arc<dyn Embedder>) -> Result<AppState> {
    let corpus = CorpusStore::load(&config.corpus.path).await?;

    let knowledge = KnowledgeBase::build(
        corpus,
        embedder.as_ref(),
        config.embedding.batch_size,
        config.embedding_timeout(),
    )
    .await?;

    let engine = RetrievalEngine::new(
        Arc::new(knowledge),
        embedder,
        RetrievalSettings::from(config),
    );
    let streamer = AnswerStreamer::new(
        config.word_delay(),
        config.retrieval.fallback_message.clone(),
    );

    Ok(AppState::new(engine, streamer))
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        .route("/ask", get(handlers::ask::ask))
        .route("/hello", get(handlers::hello::hello));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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
