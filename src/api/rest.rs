// =============================================================================
// REST API — health, on-demand signals, subscriptions, admin controls
// =============================================================================
//
// Mirrors the scheduled pipeline's own entry point (`pipeline::evaluate`) for
// the interactive request path, so a signal fetched through `GET
// /api/v1/signals` was produced by the exact same gateway -> indicators ->
// ml -> synthesizer chain as one that arrived through the scheduler, just
// without waiting for the next tick.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::api::auth::AuthBearer;
use crate::api::ws;
use crate::app_state::AppState;
use crate::pipeline;
use crate::types::{Pair, Signal, SubscriberPolicy, Subscription, Timeframe, Transport};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/signals", get(get_signal))
        .route("/api/v1/signals/latest", get(get_latest_signal))
        .route("/api/v1/positions", get(list_positions))
        .route(
            "/api/v1/subscriptions",
            get(list_subscriptions).post(subscribe).delete(unsubscribe),
        )
        .route(
            "/api/v1/subscriptions/:subscriber_id/policy",
            get(get_policy).put(update_policy),
        )
        .route("/api/v1/admin/pairs/:pair/pause", axum::routing::post(pause_pair))
        .route("/api/v1/admin/pairs/:pair/resume", axum::routing::post(resume_pair))
        .route("/api/v1/admin/pairs", get(list_paused_pairs))
        .route("/api/v1/ws", get(ws::handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

/// A `(status, message)` pair any handler can return as its `Err` variant.
struct ApiErrorResponse(StatusCode, String);

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.0, Json(ApiError { error: self.1 })).into_response()
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<crate::app_state::HealthReport> {
    Json(state.health())
}

#[derive(Debug, Deserialize)]
struct PairTimeframeQuery {
    pair: String,
    timeframe: Timeframe,
}

/// On-demand signal generation, bypassing the scheduler entirely. Runs the
/// same evaluation pipeline a scheduled tick would, synchronously.
async fn get_signal(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PairTimeframeQuery>,
) -> Result<Json<Signal>, ApiErrorResponse> {
    let pair = Pair::new(query.pair);
    pipeline::evaluate(&state, &pair, query.timeframe)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "on-demand signal evaluation failed");
            ApiErrorResponse(StatusCode::BAD_GATEWAY, e.to_string())
        })
}

async fn get_latest_signal(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PairTimeframeQuery>,
) -> Result<Json<Signal>, ApiErrorResponse> {
    let pair = Pair::new(query.pair);
    state
        .signal_store
        .get_latest(&pair, query.timeframe)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiErrorResponse(StatusCode::NOT_FOUND, "no signal recorded for this pair/timeframe".to_string())
        })
}

async fn list_positions(State(state): State<Arc<AppState>>) -> Json<Vec<crate::types::Position>> {
    Json(state.positions.list_open())
}

async fn list_subscriptions(State(state): State<Arc<AppState>>) -> Json<Vec<Subscription>> {
    Json(state.subscriptions.list_subscribers())
}

async fn subscribe(State(state): State<Arc<AppState>>, Json(sub): Json<Subscription>) -> StatusCode {
    state.subscriptions.subscribe(sub);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct UnsubscribeRequest {
    subscriber_id: String,
    transport: Transport,
    pair: String,
    timeframe: Timeframe,
}

async fn unsubscribe(State(state): State<Arc<AppState>>, Json(req): Json<UnsubscribeRequest>) -> StatusCode {
    let pair = Pair::new(req.pair);
    state
        .subscriptions
        .unsubscribe(&req.subscriber_id, req.transport, &pair, req.timeframe);
    StatusCode::NO_CONTENT
}

async fn get_policy(
    State(state): State<Arc<AppState>>,
    Path(subscriber_id): Path<String>,
) -> Result<Json<SubscriberPolicy>, ApiErrorResponse> {
    state
        .subscriptions
        .get_policy(&subscriber_id)
        .map(Json)
        .ok_or_else(|| ApiErrorResponse(StatusCode::NOT_FOUND, "no policy set for this subscriber".to_string()))
}

async fn update_policy(
    State(state): State<Arc<AppState>>,
    Path(subscriber_id): Path<String>,
    Json(mut policy): Json<SubscriberPolicy>,
) -> StatusCode {
    policy.subscriber_id = subscriber_id;
    state.subscriptions.set_policy(policy);
    StatusCode::NO_CONTENT
}

async fn pause_pair(
    State(state): State<Arc<AppState>>,
    Path(pair): Path<String>,
    AuthBearer(_): AuthBearer,
) -> StatusCode {
    state.pause_pair(&pair);
    StatusCode::NO_CONTENT
}

async fn resume_pair(
    State(state): State<Arc<AppState>>,
    Path(pair): Path<String>,
    AuthBearer(_): AuthBearer,
) -> StatusCode {
    state.resume_pair(&pair);
    StatusCode::NO_CONTENT
}

async fn list_paused_pairs(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.paused_pairs())
}
