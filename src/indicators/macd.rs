// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line   = EMA(fast) - EMA(slow)
// Signal line = EMA(signal_period) of the MACD line
// Histogram   = MACD line - Signal line
//
// Standard parameters: fast=12, slow=26, signal=9.
// =============================================================================

use super::ema::calculate_ema;

#[derive(Debug, Clone, Copy)]
pub struct MacdResult {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

/// Compute the most recent MACD reading for `closes`.
///
/// Returns `None` when there isn't enough history to seed both EMAs and the
/// signal line, or if any intermediate value is non-finite.
pub fn calculate_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || fast_period >= slow_period {
        return None;
    }

    let fast_ema = calculate_ema(closes, fast_period);
    let slow_ema = calculate_ema(closes, slow_period);

    if fast_ema.is_empty() || slow_ema.is_empty() {
        return None;
    }

    // Align the two EMA series on their common tail: fast_ema starts earlier
    // than slow_ema because it needs fewer seed closes.
    let offset = slow_period - fast_period;
    if fast_ema.len() <= offset {
        return None;
    }
    let aligned_fast = &fast_ema[offset..];
    let len = aligned_fast.len().min(slow_ema.len());
    if len == 0 {
        return None;
    }

    let macd_series: Vec<f64> = aligned_fast[aligned_fast.len() - len..]
        .iter()
        .zip(&slow_ema[slow_ema.len() - len..])
        .map(|(f, s)| f - s)
        .collect();

    if macd_series.len() < signal_period {
        return None;
    }

    let signal_series = calculate_ema(&macd_series, signal_period);
    let signal_line = *signal_series.last()?;
    let macd_line = *macd_series.last()?;
    let histogram = macd_line - signal_line;

    if macd_line.is_finite() && signal_line.is_finite() && histogram.is_finite() {
        Some(MacdResult {
            macd_line,
            signal_line,
            histogram,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data_is_none() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_ascending_series_is_bullish() {
        let closes: Vec<f64> = (1..=120).map(|x| x as f64).collect();
        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd_line > 0.0, "ascending series should have positive MACD");
        assert!(result.macd_line.is_finite());
        assert!(result.signal_line.is_finite());
        assert!(result.histogram.is_finite());
    }

    #[test]
    fn macd_descending_series_is_bearish() {
        let closes: Vec<f64> = (1..=120).rev().map(|x| x as f64).collect();
        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd_line < 0.0);
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let closes = vec![100.0; 120];
        let result = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd_line.abs() < 1e-9);
        assert!(result.histogram.abs() < 1e-9);
    }

    #[test]
    fn macd_rejects_bad_periods() {
        let closes: Vec<f64> = (1..=120).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
    }
}
