// =============================================================================
// Shared data model used across the AIFX signal engine
// =============================================================================
//
// These are the plain, fully-owned records described by the data model: a
// currency pair, a timeframe, a bar of OHLCV data, a computed indicator set,
// a synthesized signal, the change record written when a signal's action or
// strength moves, and the subscriber-facing subscription/policy rows.
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pair / Timeframe
// ---------------------------------------------------------------------------

/// A currency pair, e.g. `EUR/USD`. Stored as its canonical uppercase string
/// form so it can be used directly as a map key and a wire value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair(pub String);

impl Pair {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_uppercase())
    }

    /// `true` for pairs quoted in Japanese Yen, where a pip is 1/100 instead
    /// of the usual 1/10000.
    pub fn is_jpy_quoted(&self) -> bool {
        self.0.ends_with("/JPY")
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    Mo1,
}

impl Timeframe {
    /// Nominal duration in seconds, used for jitter and cache TTL math.
    pub fn seconds(self) -> u64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
            Timeframe::W1 => 604_800,
            Timeframe::Mo1 => 2_592_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse request-time period, used by the interactive request path for
/// callers that don't think in exact timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Swing,
    Day,
    Position,
    LongTerm,
}

/// The single place the period → timeframe mapping is defined (resolves the
/// period/timeframe Open Question): `swing → 4h`, `day → 1d`, `position →
/// 1w`, `long_term → 1M`.
pub fn period_to_timeframe(period: Period) -> Timeframe {
    match period {
        Period::Swing => Timeframe::H4,
        Period::Day => Timeframe::D1,
        Period::Position => Timeframe::W1,
        Period::LongTerm => Timeframe::Mo1,
    }
}

// ---------------------------------------------------------------------------
// Bar / BarSeries
// ---------------------------------------------------------------------------

/// A single OHLCV bar. Invariant: `low <= open, close <= high` and
/// `low <= high`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time, Unix seconds UTC.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.low <= self.high
    }
}

/// An ordered, unique-on-timestamp sequence of bars for one (pair,
/// timeframe), oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarSeries {
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

// ---------------------------------------------------------------------------
// IndicatorSet
// ---------------------------------------------------------------------------

/// The fixed indicator bundle computed for one bar series:
/// SMA(20), EMA(12), EMA(26), RSI(14), MACD(12,26,9), Bollinger(20,2), ATR(14).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub sma_20: f64,
    pub ema_12: f64,
    pub ema_26: f64,
    pub rsi_14: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_width_pct: f64,
    pub atr_14: f64,
    pub atr_pct: f64,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl Strength {
    /// Map a 0..=1 confidence score to a strength band:
    /// [0, 0.5) weak, [0.5, 0.65) moderate, [0.65, 0.8) strong, [0.8, 1] very_strong.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Strength::VeryStrong
        } else if confidence >= 0.65 {
            Strength::Strong
        } else if confidence >= 0.5 {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }

    pub fn is_strong_or_above(self) -> bool {
        matches!(self, Strength::Strong | Strength::VeryStrong)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCondition {
    Calm,
    Trending,
    Volatile,
}

/// Whether a signal's confidence came from a fused ML+technical vote or a
/// technical-only fallback (ML unavailable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    MlEnhanced,
    TechnicalOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Active,
    Triggered,
    Stopped,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Win,
    Loss,
    Breakeven,
}

/// Diagnostic confidence-factor breakdown carried alongside a Signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Factors {
    pub technical: f64,
    pub sentiment: f64,
    pub pattern: f64,
}

/// A synthesized trading signal for one pair/timeframe at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: uuid::Uuid,
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub generated_at: chrono::DateTime<chrono::Utc>,

    pub action: Action,
    pub confidence: f64,
    pub strength: Strength,

    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward_ratio: Option<f64>,

    pub market_condition: MarketCondition,
    pub source: SignalSource,
    pub model_version: Option<String>,
    pub factors: Factors,

    pub status: SignalStatus,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub triggered_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub triggered_price: Option<f64>,
    #[serde(default = "default_outcome")]
    pub actual_outcome: Outcome,
}

fn default_outcome() -> Outcome {
    Outcome::Pending
}

impl Signal {
    /// `expires_at = generated_at + 4 * timeframe`.
    pub fn expiry_for(generated_at: chrono::DateTime<chrono::Utc>, timeframe: Timeframe) -> chrono::DateTime<chrono::Utc> {
        generated_at + chrono::Duration::seconds(4 * timeframe.seconds() as i64)
    }

    /// `true` if the pricing invariant for this signal's action holds:
    /// `buy`: SL < entry < TP, `sell`: TP < entry < SL, `hold`: both null.
    pub fn pricing_invariant_holds(&self) -> bool {
        match self.action {
            Action::Buy => match (self.stop_loss, self.take_profit) {
                (Some(sl), Some(tp)) => sl < self.entry_price && self.entry_price < tp,
                _ => false,
            },
            Action::Sell => match (self.stop_loss, self.take_profit) {
                (Some(sl), Some(tp)) => tp < self.entry_price && self.entry_price < sl,
                _ => false,
            },
            Action::Hold => self.stop_loss.is_none() && self.take_profit.is_none(),
        }
    }
}

/// The audit record written by the Change Detector when a signal's action or
/// strength band moves meaningfully relative to the prior signal for the same
/// pair/timeframe. Mutated exactly once, by the Dispatcher, to stamp
/// `notified_at` and `notified_subscribers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalChange {
    pub id: uuid::Uuid,
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub old_action: Option<Action>,
    pub new_action: Action,
    pub old_confidence: Option<f64>,
    pub new_confidence: f64,
    pub strength: Strength,
    pub market_condition: MarketCondition,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub notified_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub notified_subscribers: Vec<String>,
}

// ---------------------------------------------------------------------------
// Subscription / SubscriberPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    WebSocket,
    Discord,
    Line,
    Email,
}

/// One subscriber's interest in one (pair, timeframe) over one transport.
/// Authoritative for fan-out (resolves the two-Discord-tables Open Question:
/// this table decides *who gets notified*, `SubscriberPolicy` decides *how*).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber_id: String,
    pub transport: Transport,
    pub pair: Pair,
    pub timeframe: Timeframe,
}

/// A daily local-time mute interval, half-open: `start` inclusive, `end`
/// exclusive (e.g. `00:00-07:00` mutes 00:00 but not 07:00).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MuteWindow {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

impl MuteWindow {
    /// `true` if local `(hour, minute)` falls within this window. Handles
    /// windows that wrap past midnight (e.g. `23:00-07:00`).
    pub fn contains(&self, hour: u8, minute: u8) -> bool {
        let now = hour as u32 * 60 + minute as u32;
        let start = self.start_hour as u32 * 60 + self.start_minute as u32;
        let end = self.end_hour as u32 * 60 + self.end_minute as u32;
        if start <= end {
            now >= start && now < end
        } else {
            // Wraps past midnight.
            now >= start || now < end
        }
    }
}

/// Per-subscriber delivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberPolicy {
    pub subscriber_id: String,
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    #[serde(default = "default_daily_cap")]
    pub daily_cap: u32,
    #[serde(default)]
    pub mute_windows: Vec<MuteWindow>,
    /// IANA timezone name, e.g. `Asia/Taipei`, used to evaluate mute windows.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_enabled_timeframes")]
    pub enabled_timeframes: Vec<Timeframe>,
    #[serde(default = "default_transports_enabled")]
    pub transports_enabled: Vec<Transport>,
    /// Resolution of the "strong signals only" Open Question: pinned to
    /// `strength ∈ {strong, very_strong}`.
    #[serde(default)]
    pub strong_signals_only: bool,
    #[serde(default)]
    pub notify_on_hold: bool,
}

fn default_timezone() -> String {
    "Etc/UTC".to_string()
}
fn default_cooldown_minutes() -> u32 {
    30
}
fn default_daily_cap() -> u32 {
    20
}
fn default_enabled_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1]
}
fn default_transports_enabled() -> Vec<Transport> {
    vec![Transport::WebSocket]
}

// ---------------------------------------------------------------------------
// Position / PositionLeg
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionResult {
    Win,
    Loss,
    Breakeven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Open,
    ClosedStopLoss,
    ClosedTakeProfit,
    ClosedManual,
}

/// One slice of a position's size with its own exit lifecycle. Partial
/// closes (taking a fraction of size off the table while the remainder
/// rides) are modeled as one leg closing while sibling legs stay open, per
/// the retained partial-close Open Question decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLeg {
    pub id: uuid::Uuid,
    pub size: f64,
    pub status: LegStatus,
    pub opened_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub realized_pnl_pips: Option<f64>,
}

impl PositionLeg {
    pub fn is_open(&self) -> bool {
        matches!(self.status, LegStatus::Open)
    }
}

/// A notional (not brokerage-executed) position opened against a signal, used
/// to track hypothetical SL/TP outcomes for the Position Monitoring Loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: uuid::Uuid,
    pub subscriber_id: String,
    pub pair: Pair,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_size: f64,
    pub opened_at: chrono::DateTime<chrono::Utc>,
    pub status: PositionStatus,
    #[serde(default)]
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub realized_pnl_pips: f64,
    pub legs: Vec<PositionLeg>,
}

impl Position {
    pub fn result(&self) -> Option<PositionResult> {
        if self.status != PositionStatus::Closed {
            return None;
        }
        if self.realized_pnl_pips > 0.0 {
            Some(PositionResult::Win)
        } else if self.realized_pnl_pips < 0.0 {
            Some(PositionResult::Loss)
        } else {
            Some(PositionResult::Breakeven)
        }
    }

    pub fn open_size(&self) -> f64 {
        self.legs.iter().filter(|l| l.is_open()).map(|l| l.size).sum()
    }

    /// Pip value of a price move for this position's direction. Positive
    /// values favor the position. JPY-quoted pairs use a multiplier of 100;
    /// all others use 10,000.
    pub fn pips(&self, price: f64) -> f64 {
        let diff = match self.direction {
            Direction::Long => price - self.entry_price,
            Direction::Short => self.entry_price - price,
        };
        let multiplier = if self.pair.is_jpy_quoted() { 100.0 } else { 10_000.0 };
        diff * multiplier
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Hold,
    Exit,
    TakePartial,
    AdjustSl,
    AdjustTp,
    TrailingStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

/// A periodic snapshot of a position's state, written by the Position
/// Monitoring Loop for analytics/dashboard consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionMonitoringRecord {
    pub position_id: uuid::Uuid,
    pub observed_at: chrono::DateTime<chrono::Utc>,
    pub current_price: f64,
    pub unrealized_pnl_pips: f64,
    pub trend_direction: TrendDirection,
    pub reversal_probability: f64,
    pub recommendation: Recommendation,
    pub notification_level: u8,
    pub notification_sent: bool,
}
