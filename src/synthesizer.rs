// =============================================================================
// Signal Synthesizer — technical vote + ML fusion -> Signal
// =============================================================================
//
// Stateless: `synthesize` takes everything it needs as arguments and returns
// a `Signal` with no interior mutability, so the literal end-to-end scenarios
// in the testable-properties section can be asserted directly without
// mocking a clock or a store. The technical vote follows the same weighted
// ensemble shape as the original strategy engine's `SignalInput` tally
// (name/weight/confidence/direction, summed and normalized) but recomputed
// for the four technical factors the spec names: trend (SMA/EMA cross),
// momentum (RSI zone), MACD histogram sign, and Bollinger position.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::ml_client::MlPrediction;
use crate::types::{
    Action, Factors, IndicatorSet, MarketCondition, Pair, Signal, SignalSource, Strength,
    Timeframe,
};

/// Dead-zone half-width: a weighted vote with `|vote| < THETA_HOLD` maps to
/// `hold` rather than a directional action.
const THETA_HOLD: f64 = 0.15;

/// Target risk:reward ratio the ATR-derived stop/target aims for.
const TARGET_RISK_REWARD: f64 = 2.0;

/// ATR/price ratio thresholds used as the volatility-percentile stand-in for
/// market condition classification (spec's "ATR/price percentile"; lacking a
/// rolling-percentile history source, this uses fixed bands on `atr_pct`,
/// recorded as an implementation choice in `DESIGN.md`).
const VOLATILE_ATR_PCT: f64 = 0.80;
const CALM_ATR_PCT: f64 = 0.20;

/// One named contribution to the technical weighted vote.
struct TechnicalSignal {
    weight: f64,
    direction: f64,
    confidence: f64,
}

impl TechnicalSignal {
    fn contribution(&self) -> f64 {
        self.weight * self.direction * self.confidence
    }
}

/// Everything the synthesizer needs to produce one `Signal`. Grouped into a
/// struct so call sites (scheduled pipeline, interactive request path) share
/// one entry point regardless of how the bars/indicators were obtained.
pub struct SynthesisInput<'a> {
    pub pair: &'a Pair,
    pub timeframe: Timeframe,
    pub indicators: &'a IndicatorSet,
    pub current_price: f64,
    pub ml_prediction: Option<&'a MlPrediction>,
    pub generated_at: DateTime<Utc>,
    pub stale: bool,
}

/// Weighted technical vote across the four indicator families the spec
/// names. Returns the signed, [-1, 1]-ish aggregate vote (not yet a
/// confidence — callers take `abs()` for that).
fn technical_vote(indicators: &IndicatorSet, current_price: f64) -> f64 {
    let mut signals = Vec::with_capacity(4);

    // Trend: SMA/EMA cross. Bullish when EMA12 > EMA26 > ~price context;
    // simplified to the cross itself with confidence from separation.
    let ema_spread_pct = if indicators.ema_26 != 0.0 {
        (indicators.ema_12 - indicators.ema_26) / indicators.ema_26
    } else {
        0.0
    };
    signals.push(TechnicalSignal {
        weight: 0.30,
        direction: if ema_spread_pct > 0.0 { 1.0 } else if ema_spread_pct < 0.0 { -1.0 } else { 0.0 },
        confidence: (ema_spread_pct.abs() * 50.0).min(1.0),
    });

    // Momentum: RSI zone. Oversold (<30) bullish, overbought (>70) bearish.
    let rsi = indicators.rsi_14;
    let (rsi_direction, rsi_confidence) = if rsi < 30.0 {
        (1.0, (30.0 - rsi) / 30.0)
    } else if rsi > 70.0 {
        (-1.0, (rsi - 70.0) / 30.0)
    } else {
        // Mild lean around the midline still contributes a little.
        let lean = (50.0 - rsi) / 50.0;
        (lean.signum(), lean.abs() * 0.4)
    };
    signals.push(TechnicalSignal {
        weight: 0.25,
        direction: rsi_direction,
        confidence: rsi_confidence.min(1.0),
    });

    // MACD histogram sign.
    signals.push(TechnicalSignal {
        weight: 0.25,
        direction: if indicators.macd_histogram > 0.0 {
            1.0
        } else if indicators.macd_histogram < 0.0 {
            -1.0
        } else {
            0.0
        },
        confidence: (indicators.macd_histogram.abs() / indicators.atr_14.max(1e-9)).min(1.0),
    });

    // Bollinger position: below the lower band leans bullish (mean
    // reversion), above the upper band leans bearish.
    let bb_direction = if current_price < indicators.bb_lower {
        1.0
    } else if current_price > indicators.bb_upper {
        -1.0
    } else {
        0.0
    };
    let bb_confidence = if indicators.bb_middle != 0.0 {
        ((current_price - indicators.bb_middle).abs() / indicators.bb_middle / 0.02).min(1.0)
    } else {
        0.0
    };
    signals.push(TechnicalSignal {
        weight: 0.20,
        direction: bb_direction,
        confidence: bb_confidence,
    });

    signals.iter().map(TechnicalSignal::contribution).sum()
}

fn action_from_vote(vote: f64) -> Action {
    if vote.abs() < THETA_HOLD {
        Action::Hold
    } else if vote > 0.0 {
        Action::Buy
    } else {
        Action::Sell
    }
}

pub(crate) fn classify_market_condition(atr_pct: f64) -> MarketCondition {
    if atr_pct > VOLATILE_ATR_PCT {
        MarketCondition::Volatile
    } else if atr_pct < CALM_ATR_PCT {
        MarketCondition::Calm
    } else {
        MarketCondition::Trending
    }
}

/// ATR-derived SL/TP targeting `risk_reward_ratio ~= 2.0`. Returns `None`
/// when the computed levels would violate the pricing invariant (e.g. an
/// extreme ATR pushes the stop past the entry on the wrong side) — the
/// caller downgrades to `hold` in that case, per the spec's pricing-invariant
/// guard.
fn derive_sl_tp(action: Action, entry: f64, atr: f64) -> Option<(f64, f64, f64)> {
    if atr <= 0.0 || !atr.is_finite() || entry <= 0.0 {
        return None;
    }
    // k chosen so TP - entry = 2 * (entry - SL) with SL = entry - k*ATR:
    // TP = entry + 2*k*ATR, so picking k=1 gives RR exactly 2.0 by construction.
    let k = 1.0;
    match action {
        Action::Buy => {
            let sl = entry - k * atr;
            let tp = entry + TARGET_RISK_REWARD * k * atr;
            if sl < entry && entry < tp {
                Some((sl, tp, TARGET_RISK_REWARD))
            } else {
                None
            }
        }
        Action::Sell => {
            let sl = entry + k * atr;
            let tp = entry - TARGET_RISK_REWARD * k * atr;
            if tp < entry && entry < sl {
                Some((sl, tp, TARGET_RISK_REWARD))
            } else {
                None
            }
        }
        Action::Hold => None,
    }
}

/// Fixed confidence penalty applied when the caller flags the input bars as
/// stale (gateway degraded path, spec §7 "Degraded" tier).
const STALE_CONFIDENCE_PENALTY: f64 = 0.15;

/// Synthesize a `Signal` from the given inputs. Pure function: the only
/// "clock" read is `input.generated_at`, supplied by the caller so tests can
/// pin it.
pub fn synthesize(input: SynthesisInput<'_>) -> Signal {
    let vote = technical_vote(input.indicators, input.current_price);
    let c_tech = vote.abs().min(1.0);
    let technical_action = action_from_vote(vote);

    let (mut final_confidence, final_action, source, model_version, factors) =
        match input.ml_prediction {
            Some(ml) if ml.confidence >= 0.6 => (
                0.7 * ml.confidence + 0.3 * c_tech,
                ml.direction,
                SignalSource::MlEnhanced,
                Some(ml.model_version.clone()),
                ml.factors,
            ),
            Some(ml) => (
                0.7 * ml.confidence + 0.3 * c_tech,
                technical_action,
                SignalSource::MlEnhanced,
                Some(ml.model_version.clone()),
                ml.factors,
            ),
            None => (
                c_tech,
                technical_action,
                SignalSource::TechnicalOnly,
                None,
                Factors {
                    technical: c_tech,
                    sentiment: 0.0,
                    pattern: 0.0,
                },
            ),
        };

    if input.stale {
        final_confidence = (final_confidence - STALE_CONFIDENCE_PENALTY).max(0.0);
    }
    final_confidence = final_confidence.clamp(0.0, 1.0);

    let strength = Strength::from_confidence(final_confidence);
    let market_condition = classify_market_condition(input.indicators.atr_pct);

    let (mut action, mut stop_loss, mut take_profit, mut rr) =
        (final_action, None, None, None);

    if action != Action::Hold {
        match derive_sl_tp(action, input.current_price, input.indicators.atr_14) {
            Some((sl, tp, r)) => {
                stop_loss = Some(sl);
                take_profit = Some(tp);
                rr = Some(r);
            }
            None => {
                // Pricing invariant could not be satisfied: downgrade to hold.
                action = Action::Hold;
            }
        }
    }

    let expires_at = Signal::expiry_for(input.generated_at, input.timeframe);

    Signal {
        id: uuid::Uuid::new_v4(),
        pair: input.pair.clone(),
        timeframe: input.timeframe,
        generated_at: input.generated_at,
        action,
        confidence: final_confidence,
        strength,
        entry_price: input.current_price,
        stop_loss,
        take_profit,
        risk_reward_ratio: rr,
        market_condition,
        source,
        model_version,
        factors,
        status: crate::types::SignalStatus::Active,
        expires_at,
        triggered_at: None,
        triggered_price: None,
        actual_outcome: crate::types::Outcome::Pending,
    }
}

/// Shared sample-signal/indicator builders reused by this module's own tests
/// and by the Change Detector / Delivery Planner / Event Bus unit tests so
/// every component tests against the same literal fixture instead of
/// re-deriving ad hoc values.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::types::{Bar, BarSeries, MarketCondition, Outcome, Pair, SignalStatus, Timeframe};

    pub fn sample_indicators() -> IndicatorSet {
        IndicatorSet {
            sma_20: 1.0990,
            ema_12: 1.1000,
            ema_26: 1.0980,
            rsi_14: 45.0,
            macd_line: 0.0008,
            macd_signal: 0.0005,
            macd_histogram: 0.0003,
            bb_upper: 1.1050,
            bb_middle: 1.1000,
            bb_lower: 1.0950,
            bb_width_pct: 0.9,
            atr_14: 0.0025,
            atr_pct: 0.30,
        }
    }

    pub fn sample_bar_series(pair: Pair, timeframe: Timeframe, n: usize) -> BarSeries {
        let bars = (0..n)
            .map(|i| {
                let base = 1.0990 + i as f64 * 0.00002;
                Bar {
                    open_time: i as i64 * timeframe.seconds() as i64,
                    open: base,
                    high: base + 0.0004,
                    low: base - 0.0004,
                    close: base + 0.0001,
                    volume: 500.0,
                }
            })
            .collect();
        BarSeries { pair, timeframe, bars }
    }

    pub fn sample_signal() -> Signal {
        Signal {
            id: uuid::Uuid::new_v4(),
            pair: Pair::new("EUR/USD"),
            timeframe: Timeframe::H1,
            generated_at: chrono::Utc::now(),
            action: Action::Buy,
            confidence: 0.70,
            strength: Strength::Strong,
            entry_price: 1.1000,
            stop_loss: Some(1.0950),
            take_profit: Some(1.1100),
            risk_reward_ratio: Some(2.0),
            market_condition: MarketCondition::Trending,
            source: SignalSource::TechnicalOnly,
            model_version: None,
            factors: Factors {
                technical: 0.70,
                sentiment: 0.0,
                pattern: 0.0,
            },
            status: SignalStatus::Active,
            expires_at: chrono::Utc::now() + chrono::Duration::hours(4),
            triggered_at: None,
            triggered_price: None,
            actual_outcome: Outcome::Pending,
        }
    }
}
