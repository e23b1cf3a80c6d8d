// =============================================================================
// WebSocket Handler — joins the shared room hub
// =============================================================================
//
// Two room kinds share one `WebSocketHub` (see `transports::websocket`):
// `user:{subscriber_id}` for a subscriber's own signal/position deliveries,
// and `pair:{pair}` for the public live-price stream. A connection can join
// either, both, or neither (in which case it just answers pings until
// closed). Joining a user room requires the admin bearer token since it
// carries another subscriber's notification traffic; joining a pair room is
// public.
// =============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::AppState;
use crate::transports::websocket::{pair_room, user_room};
use crate::types::Pair;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
    subscriber_id: Option<String>,
    pair: Option<String>,
}

pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if query.subscriber_id.is_some() {
        let token = query.token.clone().unwrap_or_default();
        if !validate_token(&token) {
            warn!("websocket connection rejected: invalid token for subscriber room");
            return (StatusCode::FORBIDDEN, "invalid or missing token").into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state, query))
        .into_response()
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, query: WsQuery) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut rooms = Vec::new();
    if let Some(subscriber_id) = &query.subscriber_id {
        let room = user_room(subscriber_id);
        state.ws_hub.join(&room, tx.clone());
        rooms.push(room);
    }
    if let Some(pair) = &query.pair {
        let room = pair_room(&Pair::new(pair.clone()));
        state.ws_hub.join(&room, tx.clone());
        rooms.push(room);
    }
    info!(rooms = ?rooms, "websocket connection joined");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => {
                        if let Err(e) = sender.send(message).await {
                            debug!(error = %e, "websocket send failed, disconnecting");
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "failed to send pong, disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("websocket close frame received");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text/Binary/Pong frames from the client carry no
                        // meaning for this read-mostly stream; ignored.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive error, disconnecting");
                        break;
                    }
                    None => {
                        info!("websocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // No explicit leave: `WebSocketHub::broadcast` prunes dead senders
    // opportunistically on the next publish to this room.
    info!(rooms = ?rooms, "websocket connection closed");
}
