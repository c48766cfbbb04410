//! ArgoForge API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Adaptive query routing across the relational and vector stores
//! - Dual-store ingestion and reconciliation
//! - Rate limiting
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use argoforge_common::{
    config::AppConfig,
    embeddings::EmbeddingGateway,
    metrics,
    stores::StoreSet,
};
use argoforge_router::QueryRouter;
use argoforge_sync::ConsistencyManager;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub stores: StoreSet,
    pub embeddings: Arc<EmbeddingGateway>,
    pub router: Arc<QueryRouter>,
    pub sync: Arc<ConsistencyManager>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, stores: StoreSet, embeddings: Arc<EmbeddingGateway>) -> Self {
        let router = QueryRouter::new(stores.clone(), embeddings.clone(), config.router.clone());
        let sync = ConsistencyManager::new(stores.clone(), embeddings.clone(), config.ingest.clone());
        Self {
            config,
            stores,
            embeddings,
            router: Arc::new(router),
            sync: Arc::new(sync),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    let config = Arc::new(config);

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.observability.log_level))
        .with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(
        service = %config.observability.service_name,
        "Starting ArgoForge API Gateway v{}",
        argoforge_common::VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        metrics::register_metrics();
        info!(%addr, "Metrics exporter listening");
    }

    // Initialize stores
    info!(backend = ?config.storage.backend, "Connecting to stores...");
    let stores = StoreSet::from_config(&config).await?;

    let embeddings = Arc::new(EmbeddingGateway::from_config(&config).await?);
    info!(
        model = %embeddings.model_name(),
        dimension = embeddings.dimension(),
        "Embedding gateway initialized"
    );

    // Create app state
    let state = AppState::new(config.clone(), stores, embeddings);

    let periodic_sync = (config.sync.interval_secs > 0).then(|| {
        info!(interval_secs = config.sync.interval_secs, "Periodic reconcile enabled");
        state
            .sync
            .clone()
            .spawn_periodic(Duration::from_secs(config.sync.interval_secs))
    });

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = periodic_sync {
        handle.abort();
    }

    info!("Server shutdown complete");
    Ok(())
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

    // API routes
    let mut api_routes = Router::new()
        // Query endpoints
        .route("/query/optimized", post(handlers::query::optimized_query))
        .route("/search", post(handlers::search::search))
        .route("/search/filter", post(handlers::search::filter_search))

        // Ingestion
        .route("/ingest/batch", post(handlers::ingest::ingest_batch))

        // Status endpoints
        .route("/status", get(handlers::status::status))
        .route("/status/storage", get(handlers::status::storage))
        .route("/status/performance", get(handlers::status::performance))
        .route("/status/ingestion", get(handlers::status::ingestion))

        // Maintenance endpoints
        .route("/maintenance/sync", post(handlers::maintenance::sync))
        .route("/maintenance/reset_stats", post(handlers::maintenance::reset_stats));

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(&state.config.rate_limit);
        api_routes = api_routes.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit,
        ));
    }

    let request_timeout = state.config.request_timeout();

    // Compose the app
    Router::new()
        // Health endpoints (never rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api/semantic", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(request_id)
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(cors)
                .layer(propagate_id),
        )
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

#[cfg(test)]
mod tests {
    use super::*;
    use argoforge_common::embeddings::{MockEmbedder, RetryPolicy};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const DIM: usize = 16;

    fn test_app() -> Router {
        let mut config = AppConfig::default();
        config.embedding.dimension = DIM;
        let embeddings = Arc::new(EmbeddingGateway::new(
            Arc::new(MockEmbedder::new(DIM)),
            RetryPolicy::default(),
        ));
        create_router(AppState::new(Arc::new(config), StoreSet::in_memory(DIM), embeddings))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();

        let response = tokio_test::assert_ok!(app.clone().oneshot(request).await);
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn floats() -> Value {
        json!({
            "data": [
                {
                    "float_id": "2902746",
                    "platform_number": "2902746",
                    "deploy_date": "2023-04-02",
                    "region": "North Atlantic",
                    "description": "Deep ocean climate research float",
                    "lat": 45.5,
                    "lon": -30.0
                },
                {
                    "float_id": 5904321,
                    "deploy_date": "12/08/2019",
                    "region": "Indian Ocean",
                    "description": "Biogeochemical float",
                    "lat": "-12.0",
                    "lon": "75.0"
                },
                {"region": "missing id"}
            ]
        })
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = test_app();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = call(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["relational"]["status"], "up");
    }

    #[tokio::test]
    async fn test_ingest_query_and_sync() {
        let app = test_app();

        let (status, body) = call(&app, "POST", "/api/semantic/ingest/batch", Some(floats())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "partial");
        assert_eq!(body["counts"]["both_ok"], 2);
        assert_eq!(body["rejected"][0]["index"], 2);

        let (status, body) = call(
            &app,
            "POST",
            "/api/semantic/query/optimized",
            Some(json!({"query": "show me all floats deployed in 2023"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["query_type"], "numeric_spatial");
        assert_eq!(body["strategy_used"], "sql_first");
        assert_eq!(body["source"], "relational");
        assert_eq!(body["results"][0]["record_id"], "2902746");
        assert_eq!(body["store_status"]["state"], "done");

        let (status, body) = call(&app, "POST", "/api/semantic/maintenance/sync", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["counts"]["synced"], 2);
        assert_eq!(body["counts"]["conflict"], 0);

        let (_, body) = call(&app, "GET", "/api/semantic/status/storage", None).await;
        assert_eq!(body["sync_status"], "healthy");

        let (_, body) = call(&app, "GET", "/api/semantic/status/performance", None).await;
        assert_eq!(body["total_queries"], 1);
    }

    #[tokio::test]
    async fn test_search_endpoint() {
        let app = test_app();
        call(&app, "POST", "/api/semantic/ingest/batch", Some(floats())).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/semantic/search",
            Some(json!({"query": "biogeochemical sensors", "top_k": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_searched"], 2);
        assert_eq!(body["results"].as_array().map(Vec::len), Some(1));
        assert!(body["results"][0]["similarity_score"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_invalid_strategy_is_rejected() {
        let app = test_app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/semantic/query/optimized",
            Some(json!({"query": "floats near the equator", "strategy": "fastest"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_reset_stats_clears_counters() {
        let app = test_app();
        call(&app, "POST", "/api/semantic/ingest/batch", Some(floats())).await;
        call(
            &app,
            "POST",
            "/api/semantic/query/optimized",
            Some(json!({"query": "floats similar to deep ocean climate research floats"})),
        )
        .await;

        let (status, _) = call(&app, "POST", "/api/semantic/maintenance/reset_stats", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "GET", "/api/semantic/status/performance", None).await;
        assert_eq!(body["total_queries"], 0);
        let (_, body) = call(&app, "GET", "/api/semantic/status/ingestion", None).await;
        assert_eq!(body["both_ok"], 0);
    }

    #[tokio::test]
    async fn test_empty_ingest_is_rejected() {
        let app = test_app();
        let (status, _) = call(&app, "POST", "/api/semantic/ingest/batch", Some(json!({"data": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
