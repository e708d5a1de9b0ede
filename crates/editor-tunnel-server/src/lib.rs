//! HTTP surface of the editor tunnel service
//!
//! Routes mirror the dashboard's device API:
//!
//! - `GET/PUT /api/v1/devices/{device_id}/editor` — tunnel status and
//!   enable/disable (session auth is middleware, out of scope here)
//! - `GET /api/v1/devices/{device_id}/editor/token` — token check for
//!   the editor's auth backend
//! - `GET /api/v1/devices/{device_id}/editor/comms/{token}` — the
//!   device-side WebSocket handshake
//! - `ANY /api/v1/devices/{device_id}/editor/proxy/{*path}` — browser
//!   HTTP and socket traffic relayed through the tunnel

pub mod device_ws;
pub mod error;
pub mod handlers;
pub mod models;
pub mod proxy;
pub mod store;
pub mod ws_transport;

use std::sync::Arc;

use axum::{
    routing::{any, get},
    Router,
};
use editor_tunnel_core::TunnelManager;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use error::ApiError;
pub use store::{CommandError, Device, DeviceStore, EditorCommander};

/// Application state shared across handlers
pub struct AppState {
    pub manager: Arc<TunnelManager>,
    pub devices: Arc<dyn DeviceStore>,
    pub commander: Arc<dyn EditorCommander>,
}

/// Build the router with all routes
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route(
            "/api/v1/devices/{device_id}/editor",
            get(handlers::tunnel_status).put(handlers::update_tunnel),
        )
        .route(
            "/api/v1/devices/{device_id}/editor/token",
            get(handlers::check_token),
        )
        .route(
            "/api/v1/devices/{device_id}/editor/comms/{token}",
            get(device_ws::device_comms),
        )
        .route(
            "/api/v1/devices/{device_id}/editor/proxy/{*path}",
            any(proxy::editor_proxy),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
