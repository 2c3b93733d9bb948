// WebSocket upgrade for the live stats stream. The socket is handed to the hub.

use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::IntoResponse,
};

use super::AppState;
use crate::hub::MAX_MESSAGE_SIZE;

pub(super) async fn ws_stats(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_failed_upgrade(|e| {
            tracing::warn!(error = %e, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| async move { hub.attach(socket).await })
}
