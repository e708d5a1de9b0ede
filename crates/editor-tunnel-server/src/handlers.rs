//! Control-plane handlers: tunnel enable/disable, status, token check

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use editor_tunnel_core::TunnelState;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::models::{
    DisabledResponse, EditorStatus, HealthResponse, TokenCheckResponse, UpdateTunnelRequest,
};
use crate::AppState;

pub(crate) fn editor_status(state: &AppState, device_id: &str) -> EditorStatus {
    let status = state.manager.status(device_id);
    let enabled = matches!(
        status.state,
        TunnelState::Pending | TunnelState::Connected
    );
    EditorStatus {
        enabled,
        connected: status.state == TunnelState::Connected,
        state: status.state,
        url: enabled.then(|| format!("/api/v1/devices/{device_id}/editor/proxy/")),
        error: status.error,
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tunnels: state.manager.tunnel_count(),
    })
}

/// `GET /api/v1/devices/{device_id}/editor`
pub async fn tunnel_status(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<EditorStatus>, ApiError> {
    state
        .devices
        .device(&device_id)
        .await
        .ok_or(ApiError::NotFound)?;
    Ok(Json(editor_status(&state, &device_id)))
}

/// `PUT /api/v1/devices/{device_id}/editor` with `{"tunnel": "enable"|"disable"}`
pub async fn update_tunnel(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(body): Json<UpdateTunnelRequest>,
) -> Result<Response, ApiError> {
    let device = state
        .devices
        .device(&device_id)
        .await
        .ok_or(ApiError::NotFound)?;

    match body.tunnel.as_deref() {
        Some("enable") => {
            let token = state.manager.create_tunnel(&device.id);
            if let Err(e) = state
                .commander
                .enable_editor(&device.team_id, &device.id, &token)
                .await
            {
                warn!(device_id = %device.id, error = %e, "Editor enable command failed, rolling back tunnel");
                state.manager.close_tunnel(&device.id);
                state.manager.record_error(&device.id, e.to_string());
                let status = editor_status(&state, &device.id);
                return Ok((StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response());
            }
            info!(device_id = %device.id, "Editor tunnel enabled");
            Ok(Json(editor_status(&state, &device.id)).into_response())
        }
        // a missing mode means disable, matching the dashboard's usage
        Some("disable") | None => {
            if let Err(e) = state
                .commander
                .disable_editor(&device.team_id, &device.id)
                .await
            {
                warn!(device_id = %device.id, error = %e, "Editor disable command failed, closing tunnel anyway");
            }
            state.manager.close_tunnel(&device.id);
            info!(device_id = %device.id, "Editor tunnel disabled");
            Ok(Json(DisabledResponse { enabled: false }).into_response())
        }
        Some(other) => Err(ApiError::InvalidRequest(format!(
            "Expected device editor tunnel mode option to be either \"enable\" or \"disable\", got \"{other}\""
        ))),
    }
}

/// `GET /api/v1/devices/{device_id}/editor/token`
///
/// Called by the editor's auth backend, so it carries the access token
/// in a header instead of a session.
pub async fn check_token(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TokenCheckResponse>, ApiError> {
    let presented = headers
        .get("x-access-token")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    if !state.manager.verify_token(&device_id, presented) {
        return Err(ApiError::Unauthorized);
    }
    Ok(Json(TokenCheckResponse {
        username: "forge",
        permissions: "*",
    }))
}
