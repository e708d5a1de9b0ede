//! API request/response bodies

use editor_tunnel_core::TunnelState;
use serde::{Deserialize, Serialize};

/// Body of `PUT /api/v1/devices/{device_id}/editor`
///
/// The mode is kept as a raw string so unknown values answer 400
/// rather than a deserialization error; a missing field means disable.
#[derive(Debug, Deserialize)]
pub struct UpdateTunnelRequest {
    pub tunnel: Option<String>,
}

/// Editor tunnel status as reported to the dashboard
#[derive(Debug, Serialize)]
pub struct EditorStatus {
    pub enabled: bool,
    pub connected: bool,
    pub state: TunnelState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer for the editor's auth backend when a token checks out
#[derive(Debug, Serialize)]
pub struct TokenCheckResponse {
    pub username: &'static str,
    pub permissions: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DisabledResponse {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub tunnels: usize,
}
