//! Device-side tunnel handshake
//!
//! `GET /api/v1/devices/{device_id}/editor/comms/{token}` is the one
//! endpoint a device dials. Verification happens before any tunnel
//! frame is exchanged: a socket that fails it is closed with a policy
//! violation and the tunnel is left exactly as it was.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use editor_tunnel_core::TunnelState;
use tracing::{info, warn};

use crate::ws_transport::connection_from_socket;
use crate::AppState;

pub async fn device_comms(
    State(state): State<Arc<AppState>>,
    Path((device_id, token)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_device_socket(socket, state, device_id, token))
}

async fn handle_device_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    device_id: String,
    token: String,
) {
    let rejection = if state.manager.status(&device_id).state == TunnelState::None {
        Some("No tunnel")
    } else if !state.manager.verify_token(&device_id, &token) {
        Some("Invalid token")
    } else {
        None
    };
    if let Some(reason) = rejection {
        warn!(device_id = %device_id, reason, "Rejecting device tunnel handshake");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: reason.into(),
            })))
            .await;
        return;
    }

    info!(device_id = %device_id, "Device tunnel handshake accepted");
    let conn = connection_from_socket(socket);
    // A lost race against a concurrent close or re-enable; the socket
    // is dropped unused.
    if let Err(e) = state.manager.attach(&device_id, &token, conn) {
        warn!(device_id = %device_id, error = %e, "Tunnel setup failed");
    }
}
