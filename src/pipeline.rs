// =============================================================================
// Evaluation Pipeline — the one code path both the scheduler and the
// interactive HTTP handler drive
// =============================================================================
//
// gateway -> indicators -> market condition -> ml_client -> synthesizer ->
// signal_store -> change_detector -> event_bus -> delivery_planner ->
// dispatcher, exactly once per (pair, timeframe) evaluation regardless of
// what triggered it. The scheduled loop calls this from `scheduler.next_tick()`;
// the REST handler for on-demand signals calls it directly, bypassing the
// scheduler entirely, which is the only difference between the two paths.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::app_state::AppState;
use crate::change_detector;
use crate::delivery_planner;
use crate::dispatcher::DeliveryJob;
use crate::error::{GatewayError, IndicatorError};
use crate::event_bus::SignalChangeEvent;
use crate::indicators;
use crate::synthesizer::{self, SynthesisInput};
use crate::types::{Pair, Signal, Timeframe};

/// Bars requested per evaluation; comfortably above `indicators::MIN_HISTORY`.
const FETCH_COUNT: usize = 120;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Indicator(#[from] IndicatorError),
    #[error("store error: {0}")]
    Store(#[from] crate::error::StoreError),
}

/// Run one full evaluation for `pair`/`timeframe` and return the resulting
/// signal. Always stores the signal, even when its action is unchanged from
/// the prior one — only a detected change triggers publish/deliver.
#[instrument(skip(state), fields(pair = %pair, timeframe = %timeframe))]
pub async fn evaluate(state: &Arc<AppState>, pair: &Pair, timeframe: Timeframe) -> Result<Signal, PipelineError> {
    let (series, stale) = state.gateway.fetch(pair, timeframe, FETCH_COUNT).await?;
    let indicator_set = indicators::compute(&series)?;
    let current_price = series.latest().map(|b| b.close).unwrap_or(0.0);
    let market_condition = synthesizer::classify_market_condition(indicator_set.atr_pct);

    let ml_prediction = match state
        .ml_client
        .predict(pair, timeframe, &indicator_set, market_condition)
        .await
    {
        Ok(prediction) => Some(prediction),
        Err(e) => {
            warn!(error = %e, "ml predictor unavailable, falling back to technical-only synthesis");
            None
        }
    };

    let generated_at = Utc::now();
    let signal = synthesizer::synthesize(SynthesisInput {
        pair,
        timeframe,
        indicators: &indicator_set,
        current_price,
        ml_prediction: ml_prediction.as_ref(),
        generated_at,
        stale,
    });

    let prior = state.signal_store.get_latest(pair, timeframe).await;
    let change = change_detector::detect(prior.as_ref(), &signal);
    state
        .signal_store
        .put_with_change(signal.clone(), change.clone())
        .await?;

    if let Some(change) = change {
        state
            .event_bus
            .publish_signal_change(SignalChangeEvent {
                change: change.clone(),
                signal: signal.clone(),
            })
            .await;

        let deliveries = delivery_planner::plan_deliveries(
            &change,
            &signal,
            &state.subscriptions,
            state.signal_store.as_ref(),
            generated_at,
        )
        .await;

        for delivery in deliveries {
            let submitted = state.dispatcher.submit(DeliveryJob {
                subscriber_id: delivery.subscriber_id,
                transport: delivery.transport,
                change: change.clone(),
                signal: signal.clone(),
            });
            if !submitted {
                warn!(pair = %pair, timeframe = %timeframe, "dispatcher queue full, delivery dropped");
            }
        }
    }

    Ok(signal)
}

/// Runs `evaluate` for every tick the scheduler produces, forever. Spawned
/// once per worker slot in `main`; a paused pair still pops its tick (keeping
/// the scheduler's own cadence intact) but skips the evaluation itself.
pub async fn run_scheduled_worker(state: Arc<AppState>) {
    loop {
        let tick = state.scheduler.next_tick().await;
        if state.is_paused(&tick.pair.0) {
            continue;
        }
        if let Err(e) = evaluate(&state, &tick.pair, tick.timeframe).await {
            warn!(pair = %tick.pair, timeframe = %tick.timeframe, error = %e, "scheduled evaluation failed");
        }
    }
}
