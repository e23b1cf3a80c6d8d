// =============================================================================
// AppConfig — layered configuration (JSON file defaults + env var overrides)
// =============================================================================
//
// Every field carries a `#[serde(default = "...")]` so that an older config
// file on disk never fails to load after a new field is added — the same
// forward-compatibility stance the previous runtime configuration module
// used. `load`/`save` persist atomically: write to a sibling `.tmp` file,
// then `rename` over the target, so a crash mid-write never leaves a
// truncated config file behind.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{Pair, Timeframe};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    #[serde(default = "default_min_effective_period_secs")]
    pub min_effective_period_secs: u64,
}

fn default_jitter_fraction() -> f64 {
    0.10
}
fn default_min_effective_period_secs() -> u64 {
    15
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jitter_fraction: default_jitter_fraction(),
            min_effective_period_secs: default_min_effective_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_ttl_cap_secs")]
    pub cache_ttl_cap_secs: u64,
}

fn default_providers() -> Vec<String> {
    vec!["primary".to_string()]
}
fn default_gateway_timeout_secs() -> u64 {
    5
}
fn default_cache_ttl_cap_secs() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            timeout_secs: default_gateway_timeout_secs(),
            cache_ttl_cap_secs: default_cache_ttl_cap_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    #[serde(default = "default_ml_base_url")]
    pub base_url: String,
    #[serde(default = "default_ml_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_ml_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_ml_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_ml_failure_window_secs")]
    pub failure_window_secs: u64,
    #[serde(default = "default_ml_breaker_open_secs")]
    pub breaker_open_secs: u64,
}

fn default_ml_base_url() -> String {
    "http://localhost:9000".to_string()
}
fn default_ml_timeout_ms() -> u64 {
    2_000
}
fn default_ml_max_retries() -> u32 {
    1
}
fn default_ml_failure_threshold() -> u32 {
    5
}
fn default_ml_failure_window_secs() -> u64 {
    60
}
fn default_ml_breaker_open_secs() -> u64 {
    30
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            base_url: default_ml_base_url(),
            timeout_ms: default_ml_timeout_ms(),
            max_retries: default_ml_max_retries(),
            failure_threshold: default_ml_failure_threshold(),
            failure_window_secs: default_ml_failure_window_secs(),
            breaker_open_secs: default_ml_breaker_open_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_dispatcher_workers")]
    pub workers: usize,
    #[serde(default = "default_dispatcher_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_transport_timeout_secs")]
    pub transport_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_dispatcher_workers() -> usize {
    32
}
fn default_dispatcher_queue_capacity() -> usize {
    // 2x active streams is the spec's bound; without a live stream count at
    // config-parse time we use a generous fixed default the scheduler can
    // override once it knows how many (pair, timeframe) streams are active.
    2_048
}
fn default_transport_timeout_secs() -> u64 {
    10
}
fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_dispatcher_workers(),
            queue_capacity: default_dispatcher_queue_capacity(),
            transport_timeout_secs: default_transport_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDefaults {
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    #[serde(default = "default_daily_cap")]
    pub daily_cap: u32,
}

fn default_cooldown_minutes() -> u32 {
    30
}
fn default_daily_cap() -> u32 {
    20
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            daily_cap: default_daily_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportCredentials {
    #[serde(default)]
    pub discord_webhook_base: Option<String>,
    #[serde(default)]
    pub line_channel_token: Option<String>,
    #[serde(default)]
    pub event_bus_url: Option<String>,
}

impl Default for TransportCredentials {
    fn default() -> Self {
        Self {
            discord_webhook_base: None,
            line_channel_token: None,
            event_bus_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ml: MlConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub notifications: NotificationDefaults,
    #[serde(default)]
    pub transports: TransportCredentials,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_pairs() -> Vec<String> {
    vec!["EUR/USD".to_string(), "USD/JPY".to_string(), "GBP/USD".to_string()]
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M15, Timeframe::H1]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            admin_token: None,
            pairs: default_pairs(),
            timeframes: default_timeframes(),
            scheduler: SchedulerConfig::default(),
            gateway: GatewayConfig::default(),
            ml: MlConfig::default(),
            dispatcher: DispatcherConfig::default(),
            notifications: NotificationDefaults::default(),
            transports: TransportCredentials::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults for any
    /// field the file omits. If the file does not exist, returns all
    /// defaults rather than erroring, matching the original behavior of
    /// treating an absent config file as "first run".
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Persist configuration atomically: write to `<path>.tmp`, then rename
    /// over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serializing config")?;
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;
        Ok(())
    }

    /// Apply `AIFX_*` environment variable overrides on top of the loaded
    /// file/defaults. Missing transport credentials are left as `None`
    /// (those transports degrade to a logged no-op rather than blocking
    /// startup).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AIFX_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("AIFX_ADMIN_TOKEN") {
            self.admin_token = Some(v);
        }
        if let Ok(v) = std::env::var("AIFX_PAIRS") {
            self.pairs = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("AIFX_ML_BASE_URL") {
            self.ml.base_url = v;
        }
        if let Ok(v) = std::env::var("AIFX_ML_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.ml.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("AIFX_DISPATCHER_WORKERS") {
            if let Ok(n) = v.parse() {
                self.dispatcher.workers = n;
            }
        }
        if let Ok(v) = std::env::var("AIFX_DEFAULT_COOLDOWN_MINUTES") {
            if let Ok(n) = v.parse() {
                self.notifications.cooldown_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("AIFX_DEFAULT_DAILY_CAP") {
            if let Ok(n) = v.parse() {
                self.notifications.daily_cap = n;
            }
        }
        if let Ok(v) = std::env::var("AIFX_DISCORD_WEBHOOK_BASE") {
            self.transports.discord_webhook_base = Some(v);
        }
        if let Ok(v) = std::env::var("AIFX_LINE_CHANNEL_TOKEN") {
            self.transports.line_channel_token = Some(v);
        }
        if let Ok(v) = std::env::var("AIFX_EVENT_BUS_URL") {
            self.transports.event_bus_url = Some(v);
        }
    }

    pub fn parsed_pairs(&self) -> Vec<Pair> {
        self.pairs.iter().map(Pair::new).collect()
    }
}

/// Count of active (pair, timeframe) streams given the configured pairs and
/// timeframes, used to size the dispatcher queue to `2 * active_streams` per
/// the resource model.
pub fn active_stream_count(config: &AppConfig) -> usize {
    config.pairs.len() * config.timeframes.len()
}

/// Convenience grouping of a pair's per-timeframe cadence, kept as a map so
/// future per-pair overrides don't require a schema change.
pub type PairTimeframeMap = HashMap<String, Vec<Timeframe>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.dispatcher.workers, 32);
        assert_eq!(config.ml.timeout_ms, 2_000);
        assert_eq!(config.ml.failure_threshold, 5);
        assert_eq!(config.ml.breaker_open_secs, 30);
    }

    #[test]
    fn empty_json_fills_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bind_addr, default_bind_addr());
        assert_eq!(config.notifications.daily_cap, 20);
    }

    #[test]
    fn partial_json_keeps_explicit_fields_and_fills_the_rest() {
        let config: AppConfig =
            serde_json::from_str(r#"{"bind_addr": "127.0.0.1:9999"}"#).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.ml.timeout_ms, 2_000);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = std::env::temp_dir().join(format!("aifx-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut config = AppConfig::default();
        config.bind_addr = "127.0.0.1:1234".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.bind_addr, "127.0.0.1:1234");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn active_stream_count_multiplies_pairs_by_timeframes() {
        let config = AppConfig::default();
        assert_eq!(
            active_stream_count(&config),
            config.pairs.len() * config.timeframes.len()
        );
    }
}
