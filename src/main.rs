use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_campaign_api::api;
use rust_campaign_api::config::Config;
use rust_campaign_api::db::Database;
use rust_campaign_api::db_storage::PgStore;
use rust_campaign_api::dispatch::DispatchWorker;
use rust_campaign_api::gateway_client::MessagingGatewayClient;
use rust_campaign_api::handlers::AppState;
use rust_campaign_api::poller::DispatchPoller;
use rust_campaign_api::store::CrmStore;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and migrations.
/// - Gateway client and dispatch poller.
/// - HTTP routes and middleware (body limit, timeout, burst guard, CORS).
///
/// It then serves until Ctrl-C, and lets the poller finish in-flight sends.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_campaign_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established, migrations applied");

    let store: Arc<dyn CrmStore> = Arc::new(PgStore::new(db.pool.clone()));

    let gateway = MessagingGatewayClient::new(
        config.gateway_base_url.clone(),
        config.gateway_api_key.clone(),
        config.gateway_instance.clone(),
    )
    .map_err(|e| anyhow::anyhow!("{}", e))
    .context("Failed to initialize gateway client")?;
    tracing::info!("✓ Gateway client initialized: {}", config.gateway_base_url);

    let worker = DispatchWorker::new(store.clone(), gateway);

    // Background dispatch
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = DispatchPoller::new(store.clone(), worker.clone(), config.dispatch.clone());
    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    let app_state = Arc::new(AppState::new(store, config.clone(), worker));

    // Burst guard: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .context("Invalid governor configuration")?,
    );

    let protected_routes = api::routes().layer(
        ServiceBuilder::new()
            // Request size limit: 5MB max payload
            .layer(RequestBodyLimitLayer::new(api::MAX_BODY_BYTES))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_secs,
            )))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // /health stays outside the guards
    let app = api::finish(protected_routes, app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = poller_handle.await {
        tracing::error!("Dispatch poller task failed: {}", e);
    }

    tracing::info!("Server stopped");
    Ok(())
}
