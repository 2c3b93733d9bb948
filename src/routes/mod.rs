// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};

use crate::hub::HubHandle;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) hub: HubHandle,
}

pub fn app(hub: HubHandle) -> Router {
    let state = AppState { hub };
    Router::new()
        .route("/ws", get(ws::ws_stats)) // WS /ws
        .route("/healthz", get(http::health_handler)) // GET /healthz
        .route("/version", get(http::version_handler)) // GET /version
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
