use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_workflow_api::config::Config;
use credit_workflow_api::counts::CountCache;
use credit_workflow_api::db::Database;
use credit_workflow_api::handlers::{self, AppState};
use credit_workflow_api::notifier::BroadcastNotifier;
use credit_workflow_api::queue::JobQueue;
use credit_workflow_api::simulator::BankingSimulator;
use credit_workflow_api::store::ApplicationStore;
use credit_workflow_api::validation::ValidationRunner;
use credit_workflow_api::webhook::WebhookIngestor;
use credit_workflow_api::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credit_workflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool and run pending migrations
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let store = ApplicationStore::new(db.pool.clone());
    let queue = JobQueue::new(db.pool.clone(), config.job_max_attempts);
    let notifier = Arc::new(BroadcastNotifier::new());

    // Listing count cache; request- and engine-driven status writes both
    // invalidate affected buckets
    let count_cache = CountCache::new();
    tracing::info!("Listing count cache initialized");

    let runner = ValidationRunner::new(store.clone(), notifier.clone(), count_cache.clone());
    let ingestor = WebhookIngestor::new(store.clone(), runner.clone());

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    // Background worker for validation runs and banking simulations
    let simulator = BankingSimulator::new(
        store.clone(),
        runner.clone(),
        http.clone(),
        config.webhook_base_url.clone(),
    );
    let worker = Worker::new(
        queue.clone(),
        runner,
        simulator,
        Duration::from_millis(config.worker_poll_interval_ms),
    );
    tokio::spawn(worker.run());

    let app_state = AppState {
        config: config.clone(),
        store,
        queue,
        notifier,
        ingestor,
        count_cache,
    };

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    // Build protected routes with security layers
    let protected_routes = handlers::api_router(app_state).layer(
        ServiceBuilder::new()
            // Request size limit: 5MB max payload
            .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
            // Rate limiting: 10 req/sec per IP, burst of 20
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
