// =============================================================================
// Domain error taxonomy
// =============================================================================
//
// One thiserror enum per component boundary. Each variant's doc comment
// states which of the five error tiers it belongs to (transient external,
// degraded, permanent external, internal invariant violation, fatal) so the
// call site knows the right recovery policy without re-deriving it.
//
// `anyhow` remains the glue type everywhere these errors cross into `main.rs`
// or an HTTP handler; nothing here is meant to replace it, only to give the
// call sites something more specific than a string to match on first.
// =============================================================================

use thiserror::Error;

/// Errors from the Market Data Gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transient external: provider unreachable or returned a 5xx. Retry with
    /// backoff or fail over to the next configured provider.
    #[error("provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// Transient external: provider's own rate limit was hit.
    #[error("provider {provider} rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    /// Permanent external: the requested pair is not supported by any
    /// configured provider.
    #[error("no provider supports pair {0}")]
    BadSymbol(String),

    /// Degraded: the most recent bar in the cache/response is older than the
    /// timeframe's own bar interval — the data is technically present but
    /// stale enough that it should not be treated as fresh.
    #[error("data for {pair} {timeframe} is stale (age {age_secs}s)")]
    Stale {
        pair: String,
        timeframe: String,
        age_secs: u64,
    },

    /// Transient external: the request exceeded its deadline.
    #[error("request to {provider} timed out")]
    Timeout { provider: String },
}

/// Errors from the Indicator Engine.
#[derive(Debug, Error)]
pub enum IndicatorError {
    /// Permanent (for this input): not enough bars to compute every indicator
    /// in the bundle. Callers should treat this like a blocked evaluation,
    /// not retry immediately.
    #[error("insufficient history: need at least {required} bars, have {available}")]
    InsufficientHistory { required: usize, available: usize },
}

/// Errors from the ML Predictor Client.
#[derive(Debug, Error)]
pub enum MlError {
    /// Degraded: the circuit breaker is open. Callers fall back to
    /// technical-only synthesis rather than treating this as fatal.
    #[error("ml predictor circuit breaker open, reopening at {reopen_at}")]
    Unavailable { reopen_at: String },

    /// Transient external.
    #[error("ml predictor request failed: {0}")]
    RequestFailed(String),

    /// Transient external.
    #[error("ml predictor request timed out")]
    Timeout,

    /// Permanent external: the response body didn't match the expected shape.
    #[error("ml predictor returned an unparsable response: {0}")]
    BadResponse(String),
}

/// Errors from the Signal Store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Internal invariant violation: an update was attempted that the store's
    /// state-transition table does not allow.
    #[error("invalid signal transition for {pair} {timeframe}: {from:?} -> {to:?}")]
    InvalidTransition {
        pair: String,
        timeframe: String,
        from: String,
        to: String,
    },

    /// Permanent: lookup against an id/key the store has no record of.
    #[error("no signal found for {pair} {timeframe}")]
    NotFound { pair: String, timeframe: String },
}

/// Errors from a delivery transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transient external.
    #[error("transport {transport} request failed: {reason}")]
    RequestFailed { transport: String, reason: String },

    /// Degraded: credentials for this transport were never configured; the
    /// transport silently no-ops rather than failing every delivery.
    #[error("transport {0} is not configured")]
    NotConfigured(String),

    /// Transient external: deadline exceeded.
    #[error("transport {0} request timed out")]
    Timeout(String),
}
