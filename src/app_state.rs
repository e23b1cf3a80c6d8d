// =============================================================================
// AppState — shared handles to every long-lived component
// =============================================================================
//
// One `Arc<AppState>` is built once in `main` and cloned into every spawned
// task and every Axum handler, replacing the global statics the original
// engine never had to begin with — components are constructed once here and
// threaded through explicitly, per the constructed-Application-context
// re-architecture guidance.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::event_bus::EventBus;
use crate::market_data::MarketDataGateway;
use crate::ml_client::MlClient;
use crate::position::store::PositionStore;
use crate::scheduler::Scheduler;
use crate::signal_store::SignalStore;
use crate::subscription_registry::SubscriptionRegistry;
use crate::transports::websocket::WebSocketHub;

pub struct AppState {
    pub config: AppConfig,
    pub started_at: DateTime<Utc>,

    pub gateway: Arc<MarketDataGateway>,
    pub ml_client: Arc<dyn MlClient>,
    pub signal_store: Arc<dyn SignalStore>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub event_bus: Arc<EventBus>,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,
    pub positions: Arc<PositionStore>,
    pub ws_hub: Arc<WebSocketHub>,

    /// Pairs an operator has paused via the admin API; the pipeline worker
    /// skips ticks for a paused pair rather than unregistering its scheduler
    /// stream, so resuming doesn't need to re-derive the tick cadence.
    paused_pairs: RwLock<HashSet<String>>,
    shutting_down: AtomicBool,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        gateway: Arc<MarketDataGateway>,
        ml_client: Arc<dyn MlClient>,
        signal_store: Arc<dyn SignalStore>,
        subscriptions: Arc<SubscriptionRegistry>,
        event_bus: Arc<EventBus>,
        dispatcher: Arc<Dispatcher>,
        scheduler: Arc<Scheduler>,
        positions: Arc<PositionStore>,
        ws_hub: Arc<WebSocketHub>,
    ) -> Self {
        Self {
            config,
            started_at: Utc::now(),
            gateway,
            ml_client,
            signal_store,
            subscriptions,
            event_bus,
            dispatcher,
            scheduler,
            positions,
            ws_hub,
            paused_pairs: RwLock::new(HashSet::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn pause_pair(&self, pair: &str) {
        self.paused_pairs.write().insert(pair.to_uppercase());
    }

    pub fn resume_pair(&self, pair: &str) {
        self.paused_pairs.write().remove(&pair.to_uppercase());
    }

    pub fn is_paused(&self, pair: &str) -> bool {
        self.paused_pairs.read().contains(&pair.to_uppercase())
    }

    pub fn paused_pairs(&self) -> Vec<String> {
        self.paused_pairs.read().iter().cloned().collect()
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: if self.is_shutting_down() { "shutting_down" } else { "healthy" },
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0),
            components: ComponentHealth {
                scheduler: if self.is_shutting_down() { "stopping" } else { "healthy" },
                gateway: "healthy",
                ml: self.ml_client.health(),
                dispatcher: "healthy",
                bus: "healthy",
            },
            paused_pairs: self.paused_pairs(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub scheduler: &'static str,
    pub gateway: &'static str,
    pub ml: &'static str,
    pub dispatcher: &'static str,
    pub bus: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub components: ComponentHealth,
    pub paused_pairs: Vec<String>,
}
