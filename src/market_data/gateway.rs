// =============================================================================
// Market Data Gateway — multi-provider OHLCV fetch with cache and failover
// =============================================================================
//
// `fetch` tries each configured provider in order until one succeeds, rate
// limiting per provider and caching the result for `min(timeframe, 60s)` so a
// burst of scheduler ticks across pairs sharing a provider doesn't multiply
// request volume. A cache hit younger than the TTL is returned without
// touching the network; when every provider fails, a still-present cache
// entry is served back with its `stale` flag set rather than discarded, so
// the caller can decide whether degraded data is better than none. A cache
// entry older than `MAX_STALE_SECS` is treated as worthless and `fetch`
// fails outright instead of serving it.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::GatewayError;
use crate::market_data::rate_limit::RateLimiter;
use crate::types::{Bar, BarSeries, Pair, Timeframe};

/// A cache entry older than this is not worth serving even in a total
/// provider outage; `fetch` fails instead of handing back ancient bars.
const MAX_STALE_SECS: u64 = 3600;

/// A source of OHLCV bars. Implemented once per real provider and by test
/// doubles in unit tests.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, pair: &Pair, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, GatewayError>;
}

struct CacheEntry {
    series: BarSeries,
    fetched_at: Instant,
}

struct ProviderSlot {
    provider: Box<dyn MarketDataProvider>,
    limiter: RateLimiter,
}

pub struct MarketDataGateway {
    providers: Vec<ProviderSlot>,
    cache: RwLock<HashMap<(String, Timeframe), CacheEntry>>,
    timeout: Duration,
    cache_ttl_cap: Duration,
}

impl MarketDataGateway {
    pub fn new(providers: Vec<Box<dyn MarketDataProvider>>, timeout: Duration, cache_ttl_cap: Duration) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                limiter: RateLimiter::new(5.0, 10),
                provider,
            })
            .collect();
        Self {
            providers,
            cache: RwLock::new(HashMap::new()),
            timeout,
            cache_ttl_cap,
        }
    }

    fn cache_ttl(&self, timeframe: Timeframe) -> Duration {
        Duration::from_secs(timeframe.seconds()).min(self.cache_ttl_cap)
    }

    /// `Some(age_secs)` if the series' latest bar is older than 2x the
    /// timeframe's nominal duration, per the gateway's staleness contract.
    fn staleness(&self, series: &BarSeries, timeframe: Timeframe) -> Option<u64> {
        let latest = series.latest()?;
        let now = chrono::Utc::now().timestamp();
        let age_secs = (now - latest.open_time).max(0) as u64;
        if age_secs > 2 * timeframe.seconds() {
            Some(age_secs)
        } else {
            None
        }
    }

    /// Fetch bars for `pair`/`timeframe`. Returns the series plus whether it
    /// should be treated as stale — a fresh provider response or unexpired
    /// cache hit is `(series, false)`; bars served from a provider that
    /// returned old data, or from an unexpired-by-TTL-but-failed-over cache
    /// entry, come back `(series, true)` so the caller can apply a
    /// confidence penalty instead of losing the tick entirely.
    #[instrument(skip(self), fields(pair = %pair, timeframe = %timeframe))]
    pub async fn fetch(&self, pair: &Pair, timeframe: Timeframe, count: usize) -> Result<(BarSeries, bool), GatewayError> {
        let key = (pair.0.clone(), timeframe);
        let ttl = self.cache_ttl(timeframe);

        if let Some(entry) = self.cache.read().get(&key) {
            if entry.fetched_at.elapsed() < ttl {
                debug!("gateway cache hit");
                return Ok((entry.series.clone(), false));
            }
        }

        if self.providers.is_empty() {
            return Err(GatewayError::BadSymbol(pair.0.clone()));
        }

        let mut last_err = None;
        for slot in &self.providers {
            if !slot.limiter.try_acquire(slot.provider.name()) {
                continue;
            }
            let attempt = tokio::time::timeout(self.timeout, slot.provider.fetch(pair, timeframe, count)).await;
            match attempt {
                Ok(Ok(bars)) => {
                    let series = BarSeries {
                        pair: pair.clone(),
                        timeframe,
                        bars,
                    };
                    self.cache.write().insert(
                        key,
                        CacheEntry {
                            series: series.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                    if let Some(age_secs) = self.staleness(&series, timeframe) {
                        warn!(provider = slot.provider.name(), age_secs, "provider returned stale bars");
                        return Ok((series, true));
                    }
                    return Ok((series, false));
                }
                Ok(Err(e)) => {
                    warn!(provider = slot.provider.name(), error = %e, "provider fetch failed, trying next");
                    last_err = Some(e);
                }
                Err(_) => {
                    let e = GatewayError::Timeout {
                        provider: slot.provider.name().to_string(),
                    };
                    warn!(provider = slot.provider.name(), "provider fetch timed out, trying next");
                    last_err = Some(e);
                }
            }
        }

        // Every provider failed. Fall back to a stale cache entry if we have
        // one recent enough to still be worth something.
        if let Some(entry) = self.cache.read().get(&key) {
            let age_secs = entry.fetched_at.elapsed().as_secs();
            if age_secs <= MAX_STALE_SECS {
                warn!(age_secs, "all providers failed — serving stale cache entry");
                return Ok((entry.series.clone(), true));
            }
            warn!(age_secs, "all providers failed and cache entry exceeds max staleness");
            return Err(GatewayError::Stale {
                pair: pair.0.clone(),
                timeframe: timeframe.to_string(),
                age_secs,
            });
        }

        Err(last_err.unwrap_or(GatewayError::BadSymbol(pair.0.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyProvider {
        name: String,
        fail_times: Arc<AtomicU32>,
    }

    #[async_trait]
    impl MarketDataProvider for FlakyProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&self, pair: &Pair, _tf: Timeframe, count: usize) -> Result<Vec<Bar>, GatewayError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(GatewayError::ProviderUnavailable {
                    provider: self.name.clone(),
                    reason: "simulated outage".to_string(),
                });
            }
            let now = chrono::Utc::now().timestamp();
            Ok((0..count)
                .map(|i| Bar {
                    open_time: now - (count - i) as i64 * 60,
                    open: 1.1,
                    high: 1.11,
                    low: 1.09,
                    close: 1.105,
                    volume: 100.0,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn fails_over_to_second_provider() {
        let always_fails = Box::new(FlakyProvider {
            name: "p1".into(),
            fail_times: Arc::new(AtomicU32::new(1000)),
        });
        let works = Box::new(FlakyProvider {
            name: "p2".into(),
            fail_times: Arc::new(AtomicU32::new(0)),
        });

        let gateway = MarketDataGateway::new(
            vec![always_fails, works],
            Duration::from_secs(5),
            Duration::from_secs(60),
        );

        let (series, stale) = gateway
            .fetch(&Pair::new("EUR/USD"), Timeframe::M15, 10)
            .await
            .unwrap();
        assert_eq!(series.bars.len(), 10);
        assert!(!stale);
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let counter = Arc::new(AtomicU32::new(0));
        let provider = Box::new(FlakyProvider {
            name: "p1".into(),
            fail_times: counter.clone(),
        });
        let gateway = MarketDataGateway::new(vec![provider], Duration::from_secs(5), Duration::from_secs(60));

        let pair = Pair::new("EUR/USD");
        gateway.fetch(&pair, Timeframe::M15, 10).await.unwrap();
        let (cached, stale) = gateway.fetch(&pair, Timeframe::M15, 10).await.unwrap();
        assert_eq!(cached.bars.len(), 10);
        assert!(!stale);
    }

    struct OneShotProvider {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl MarketDataProvider for OneShotProvider {
        fn name(&self) -> &str {
            "oneshot"
        }

        async fn fetch(&self, _pair: &Pair, _tf: Timeframe, count: usize) -> Result<Vec<Bar>, GatewayError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(GatewayError::ProviderUnavailable {
                    provider: "oneshot".to_string(),
                    reason: "down after first call".to_string(),
                });
            }
            let now = chrono::Utc::now().timestamp();
            Ok((0..count)
                .map(|i| Bar {
                    open_time: now - (count - i) as i64 * 60,
                    open: 1.1,
                    high: 1.11,
                    low: 1.09,
                    close: 1.105,
                    volume: 100.0,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn serves_stale_cache_when_all_providers_fail() {
        let provider = Box::new(OneShotProvider {
            calls: Arc::new(AtomicU32::new(0)),
        });
        let gateway = MarketDataGateway::new(vec![provider], Duration::from_secs(5), Duration::from_millis(1));

        let pair = Pair::new("EUR/USD");
        let (_series, fresh_stale) = gateway.fetch(&pair, Timeframe::M15, 10).await.unwrap();
        assert!(!fresh_stale);

        tokio::time::sleep(Duration::from_millis(5)).await;

        let (series, stale) = gateway.fetch(&pair, Timeframe::M15, 10).await.unwrap();
        assert_eq!(series.bars.len(), 10);
        assert!(stale);
    }
}
