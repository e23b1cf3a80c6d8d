// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators
// used by the signal synthesizer. Every calculation function returns
// `Option<T>`/`Vec<T>` so callers are forced to handle insufficient-data and
// numerical-edge-case scenarios. `compute` is the single entry point the rest
// of the pipeline calls to get a fully populated `IndicatorSet`.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use crate::error::IndicatorError;
use crate::types::{BarSeries, IndicatorSet};

/// Minimum bar count required to compute every indicator in the bundle.
/// Driven by EMA-26 (26 seed closes) plus its own MACD signal smoothing
/// (9 more MACD points) plus the 1 extra bar ATR needs for its first true
/// range — rounded up with headroom.
pub const MIN_HISTORY: usize = 60;

/// Compute the fixed indicator bundle — SMA(20), EMA(12), EMA(26), RSI(14),
/// MACD(12,26,9), Bollinger(20,2), ATR(14) — for the most recent bar in
/// `series`.
pub fn compute(series: &BarSeries) -> Result<IndicatorSet, IndicatorError> {
    if series.bars.len() < MIN_HISTORY {
        return Err(IndicatorError::InsufficientHistory {
            required: MIN_HISTORY,
            available: series.bars.len(),
        });
    }

    let closes = series.closes();

    let sma_20 = sma::calculate_sma(&closes, 20).ok_or(IndicatorError::InsufficientHistory {
        required: 20,
        available: closes.len(),
    })?;

    let ema_12 = *ema::calculate_ema(&closes, 12)
        .last()
        .ok_or(IndicatorError::InsufficientHistory {
            required: 12,
            available: closes.len(),
        })?;

    let ema_26 = *ema::calculate_ema(&closes, 26)
        .last()
        .ok_or(IndicatorError::InsufficientHistory {
            required: 26,
            available: closes.len(),
        })?;

    let rsi_14 = *rsi::calculate_rsi(&closes, 14)
        .last()
        .ok_or(IndicatorError::InsufficientHistory {
            required: 15,
            available: closes.len(),
        })?;

    let macd = macd::calculate_macd(&closes, 12, 26, 9).ok_or(IndicatorError::InsufficientHistory {
        required: 35,
        available: closes.len(),
    })?;

    let bb = bollinger::calculate_bollinger(&closes, 20, 2.0).ok_or(IndicatorError::InsufficientHistory {
        required: 20,
        available: closes.len(),
    })?;

    let atr_14 = atr::calculate_atr(&series.bars, 14).ok_or(IndicatorError::InsufficientHistory {
        required: 15,
        available: series.bars.len(),
    })?;
    let atr_pct = atr::calculate_atr_pct(&series.bars, 14).unwrap_or(0.0);

    Ok(IndicatorSet {
        sma_20,
        ema_12,
        ema_26,
        rsi_14,
        macd_line: macd.macd_line,
        macd_signal: macd.signal_line,
        macd_histogram: macd.histogram,
        bb_upper: bb.upper,
        bb_middle: bb.middle,
        bb_lower: bb.lower,
        bb_width_pct: bb.width,
        atr_14,
        atr_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, Pair, Timeframe};

    fn series_of(n: usize) -> BarSeries {
        let bars = (0..n)
            .map(|i| {
                let base = 1.1000 + (i as f64 * 0.0001);
                Bar {
                    open_time: i as i64 * 60,
                    open: base,
                    high: base + 0.0005,
                    low: base - 0.0005,
                    close: base + 0.0001,
                    volume: 1000.0,
                }
            })
            .collect();
        BarSeries {
            pair: Pair::new("EUR/USD"),
            timeframe: Timeframe::M15,
            bars,
        }
    }

    #[test]
    fn compute_rejects_insufficient_history() {
        let series = series_of(10);
        let err = compute(&series).unwrap_err();
        assert!(matches!(err, IndicatorError::InsufficientHistory { .. }));
    }

    #[test]
    fn compute_succeeds_with_enough_history() {
        let series = series_of(200);
        let indicators = compute(&series).unwrap();
        assert!(indicators.rsi_14 >= 0.0 && indicators.rsi_14 <= 100.0);
        assert!(indicators.atr_14 > 0.0);
        assert!(indicators.bb_upper >= indicators.bb_middle);
        assert!(indicators.bb_middle >= indicators.bb_lower);
    }
}
