use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod chain;
mod clearnode;
mod config;
mod db;
mod metrics;
mod models;
mod services;
mod utils;
mod websocket;

use crate::chain::commitment::{CommitmentHasher, KeccakHasher};
use crate::chain::custody::ChainClient;
use crate::chain::prover::ProverClient;
use crate::clearnode::{rpc, AssetMap, ClearnodePool};
use crate::config::AppConfig;
use crate::db::Database;
use crate::services::matching::{EngineConfig, MatchingEngine};
use crate::services::session::SessionService;
use crate::services::settlement::{SettlementConfig, SettlementWorker};
use crate::websocket::Notification;

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub engine: Arc<MatchingEngine>,
    pub clearnode: Arc<ClearnodePool>,
    pub chain: Arc<ChainClient>,
    pub sessions: Arc<SessionService>,
    pub notifications: broadcast::Sender<Notification>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "darkpool_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting darkpool backend v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);
    if !config.chain_enabled() {
        tracing::warn!("No custody address configured - on-chain settlement steps are skipped");
    }

    let metrics_handle = metrics::init_metrics();

    // Durable store
    let db = Database::connect(&config.database_url).await?;
    tracing::info!("Database connected");

    // On-chain clients
    let chain = Arc::new(ChainClient::new(&config)?);
    let prover = Arc::new(ProverClient::new(config.prover_url.clone()));

    // Clearing-network coordinator: engine connection first, then the
    // asset map, before anything concurrent starts reading it
    let clearnode = ClearnodePool::new(
        config.clearnode_url.clone(),
        Duration::from_millis(config.ping_interval_ms),
        Duration::from_millis(config.response_timeout_ms),
        &config.engine_wallet_key,
        db.clone(),
    )?;
    let engine_conn = clearnode.init_engine().await?;
    tracing::info!("Clearnode engine connection authenticated");

    let assets = Arc::new(AssetMap::new());
    let asset_list = rpc::list_assets(&engine_conn, config.chain_id).await?;
    assets.init(asset_list, config.chain_id)?;
    tracing::info!("Asset map loaded ({} entries)", assets.len());

    // Matching engine
    let hasher: Arc<dyn CommitmentHasher> = Arc::new(KeccakHasher);
    let (engine, mut match_rx) = MatchingEngine::start(
        EngineConfig {
            workers: config.workers,
            order_channel_size: config.order_channel_size,
            cancel_channel_size: config.cancel_channel_size,
            match_channel_size: config.match_channel_size,
        },
        db.pool.clone(),
        chain.clone(),
        hasher,
    );
    let recovered = engine.recover_from_store().await?;
    tracing::info!(
        "Matching engine started ({} workers, {} orders recovered)",
        config.workers,
        recovered
    );

    // Settlement worker
    let (mut settlement_rx, settlement_handle) = SettlementWorker::start(
        SettlementConfig {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size,
        },
        db.pool.clone(),
        clearnode.clone(),
        assets.clone(),
        chain.clone(),
        prover.clone(),
    );
    tracing::info!(
        "Settlement worker started (poll every {}ms, batch {})",
        config.poll_interval_ms,
        config.batch_size
    );

    // Notification sink: drain the engine and worker channels into the
    // broadcast hub. The engine blocks on a full match channel, so these
    // bridges must keep draining for as long as the producers live
    let (notifications, _) = broadcast::channel::<Notification>(1024);

    let match_bridge = notifications.clone();
    tokio::spawn(async move {
        while let Some(event) = match_rx.recv().await {
            let _ = match_bridge.send(Notification::Match(event));
        }
        tracing::warn!("match event channel closed");
    });

    let settlement_bridge = notifications.clone();
    tokio::spawn(async move {
        while let Some(event) = settlement_rx.recv().await {
            let _ = settlement_bridge.send(Notification::Settlement(event));
        }
        tracing::warn!("settlement event channel closed");
    });

    let sessions = Arc::new(SessionService::new(db.clone(), clearnode.clone()));

    // Build application state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        engine,
        clearnode: clearnode.clone(),
        chain,
        sessions,
        notifications,
    });

    // Gateway opens last
    let app = Router::new()
        .route("/health", get(api::handlers::market::health_check))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        )
        .nest("/api/v1", api::routes::create_router(state.clone()))
        .nest("/ws", websocket::routes::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Reverse of init: stop the poller, close coordinator connections
    // (pending waiters fail), then let the pool drop
    tracing::info!("Shutting down");
    settlement_handle.abort();
    clearnode.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
