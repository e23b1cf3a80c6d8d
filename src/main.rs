// =============================================================================
// AIFX Signal Service — Main Entry Point
// =============================================================================
//
// Boots the shared `AppState`, registers one scheduler stream per configured
// (pair, timeframe), spawns a pool of pipeline workers draining the
// scheduler's tick queue, starts the position monitor, and serves the REST +
// WebSocket API. Graceful shutdown drains the dispatcher for
// `shutdown_grace_secs` before exiting.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod change_detector;
mod config;
mod delivery_planner;
mod dispatcher;
mod error;
mod event_bus;
mod indicators;
mod market_data;
mod ml_client;
mod pipeline;
mod position;
mod scheduler;
mod signal_store;
mod subscription_registry;
mod synthesizer;
mod transports;
mod types;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::event_bus::{EventBus, HttpExternalBus, NoopExternalBus};
use crate::market_data::{HttpProvider, MarketDataGateway};
use crate::ml_client::{HttpMlClient, MlClient};
use crate::position::store::PositionStore;
use crate::scheduler::Scheduler;
use crate::signal_store::InMemorySignalStore;
use crate::subscription_registry::SubscriptionRegistry;
use crate::transports::discord::DiscordTransport;
use crate::transports::email::EmailTransport;
use crate::transports::line::LineTransport;
use crate::transports::websocket::{WebSocketHub, WebSocketTransport};
use crate::transports::ChannelTransport;
use crate::types::Transport;

const CONFIG_PATH: &str = "aifx_config.json";

/// Number of concurrent pipeline workers draining the scheduler's tick
/// queue. Independent of `dispatcher.workers`, which bounds delivery fan-out
/// rather than evaluation concurrency.
const PIPELINE_WORKERS: usize = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("AIFX signal service starting up");

    let mut config = AppConfig::load(Path::new(CONFIG_PATH)).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });
    config.apply_env_overrides();

    let pairs = config.parsed_pairs();
    let timeframes = config.timeframes.clone();
    info!(pairs = ?config.pairs, timeframes = ?timeframes, "configured evaluation matrix");

    // ── 2. Build shared components ───────────────────────────────────────
    let providers: Vec<Box<dyn market_data::MarketDataProvider>> = config
        .gateway
        .providers
        .iter()
        .map(|name| {
            let base_url = std::env::var(format!("AIFX_PROVIDER_{}_URL", name.to_uppercase()))
                .unwrap_or_else(|_| "http://localhost:9100".to_string());
            let api_key = std::env::var(format!("AIFX_PROVIDER_{}_API_KEY", name.to_uppercase())).ok();
            Box::new(HttpProvider::new(name.clone(), base_url, api_key)) as Box<dyn market_data::MarketDataProvider>
        })
        .collect();

    let gateway = Arc::new(MarketDataGateway::new(
        providers,
        Duration::from_secs(config.gateway.timeout_secs),
        Duration::from_secs(config.gateway.cache_ttl_cap_secs),
    ));

    let ml_client: Arc<dyn MlClient> = Arc::new(HttpMlClient::new(
        config.ml.base_url.clone(),
        Duration::from_millis(config.ml.timeout_ms),
        config.ml.max_retries,
        config.ml.failure_threshold,
        Duration::from_secs(config.ml.failure_window_secs),
        Duration::from_secs(config.ml.breaker_open_secs),
    ));

    let signal_store: Arc<dyn signal_store::SignalStore> = Arc::new(InMemorySignalStore::new());
    let subscriptions = Arc::new(SubscriptionRegistry::new());

    let external_bus: Box<dyn event_bus::ExternalBus> = match &config.transports.event_bus_url {
        Some(url) => Box::new(HttpExternalBus::new(url.clone())),
        None => Box::new(NoopExternalBus),
    };
    let event_bus = Arc::new(EventBus::new(external_bus));

    let ws_hub = WebSocketHub::new();

    let mut transports: HashMap<Transport, Arc<dyn ChannelTransport>> = HashMap::new();
    transports.insert(
        Transport::Discord,
        Arc::new(DiscordTransport::new(config.transports.discord_webhook_base.clone())),
    );
    transports.insert(
        Transport::Line,
        Arc::new(LineTransport::new(config.transports.line_channel_token.clone())),
    );
    transports.insert(Transport::Email, Arc::new(EmailTransport::new(None)));
    transports.insert(
        Transport::WebSocket,
        Arc::new(WebSocketTransport::new(ws_hub.clone())),
    );

    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatcher.workers,
        config.dispatcher.queue_capacity,
        transports,
        signal_store.clone(),
    ));

    let active_streams = config::active_stream_count(&config);
    let scheduler = Arc::new(Scheduler::new(config.scheduler.clone(), active_streams));

    let positions = Arc::new(PositionStore::new());
    let ws_hub = Arc::new(ws_hub);

    let state = Arc::new(AppState::new(
        config.clone(),
        gateway.clone(),
        ml_client,
        signal_store,
        subscriptions,
        event_bus,
        dispatcher,
        scheduler.clone(),
        positions.clone(),
        ws_hub,
    ));

    // ── 3. Register scheduler streams ────────────────────────────────────
    for pair in &pairs {
        for timeframe in &timeframes {
            scheduler.start_stream(pair.clone(), *timeframe);
        }
    }
    scheduler.start();
    info!(streams = active_streams, "scheduler streams registered");

    // ── 4. Pipeline workers ───────────────────────────────────────────────
    for worker_id in 0..PIPELINE_WORKERS {
        let worker_state = state.clone();
        tokio::spawn(async move {
            info!(worker_id, "pipeline worker started");
            pipeline::run_scheduled_worker(worker_state).await;
        });
    }

    // ── 5. Position monitor ──────────────────────────────────────────────
    let throttle = Arc::new(parking_lot::Mutex::new(position::monitor::NotificationThrottle::new()));
    let monitor_state = state.clone();
    tokio::spawn(async move {
        position::monitor::run_position_monitor(
            monitor_state.positions.clone(),
            monitor_state.gateway.clone(),
            monitor_state.event_bus.clone(),
            throttle,
        )
        .await;
    });

    // ── 6. API server ─────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = config.bind_addr.clone();
    let server = tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 7. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");
    state.begin_shutdown();
    state.scheduler.stop();
    server.abort();

    tokio::time::sleep(Duration::from_secs(config.dispatcher.shutdown_grace_secs.min(5))).await;

    if let Err(e) = state.config.save(Path::new(CONFIG_PATH)) {
        warn!(error = %e, "failed to persist config on shutdown");
    }

    info!("AIFX signal service shut down complete");
    Ok(())
}
