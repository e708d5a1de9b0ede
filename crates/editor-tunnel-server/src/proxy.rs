//! Browser-facing proxy endpoint
//!
//! `ANY /api/v1/devices/{device_id}/editor/proxy/{*path}` forwards
//! plain HTTP requests through the tunnel; a GET carrying upgrade
//! headers becomes a relayed socket session instead. Either way the
//! tunnel must be serving before any byte crosses: 503 when no tunnel
//! exists, 502 when one exists but cannot carry traffic, 504 when the
//! device misses the deadline.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{
        ws::{Message, WebSocket},
        FromRequestParts, Path, Request, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use bytes::Bytes;
use editor_tunnel_core::{ProxyRequest, ProxyResponse, StreamEvent, StreamHandle, TunnelError, TunnelState};
use editor_tunnel_proto::MAX_FRAME_SIZE;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// Headers that describe the connection rather than the request
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub async fn editor_proxy(
    State(state): State<Arc<AppState>>,
    Path((device_id, path)): Path<(String, String)>,
    req: Request,
) -> Result<Response, ApiError> {
    state
        .devices
        .device(&device_id)
        .await
        .ok_or(ApiError::NotFound)?;

    let mut target = format!("/{path}");
    if let Some(query) = req.uri().query() {
        target.push('?');
        target.push_str(query);
    }

    if wants_websocket(req.headers()) {
        let stream = state
            .manager
            .proxy_socket(&device_id, &target)
            .await
            .map_err(|e| map_proxy_error(&state, &device_id, e))?;
        debug!(device_id = %device_id, path = %target, stream_id = stream.stream_id(), "Opening proxied socket session");

        let (mut parts, _body) = req.into_parts();
        let ws = WebSocketUpgrade::from_request_parts(&mut parts, &())
            .await
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        return Ok(ws.on_upgrade(move |socket| relay_socket(socket, stream)));
    }

    let method = req.method().to_string();
    let headers = proxied_headers(req.headers());
    let body = to_bytes(req.into_body(), MAX_FRAME_SIZE)
        .await
        .map_err(|_| ApiError::InvalidRequest("request body too large".to_string()))?;

    debug!(device_id = %device_id, method = %method, path = %target, "Proxying editor request");
    let response = state
        .manager
        .proxy_http(
            &device_id,
            ProxyRequest {
                method,
                path: target,
                headers,
                body: body.to_vec(),
            },
        )
        .await
        .map_err(|e| map_proxy_error(&state, &device_id, e))?;

    build_response(response)
}

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// A tunnel that exists but cannot carry traffic answers 502; only a
/// device with no tunnel at all answers 503.
fn map_proxy_error(state: &AppState, device_id: &str, err: TunnelError) -> ApiError {
    match err {
        TunnelError::NoTunnel
            if state.manager.status(device_id).state != TunnelState::None =>
        {
            ApiError::BadGateway("device has not connected its tunnel".to_string())
        }
        other => ApiError::Tunnel(other),
    }
}

fn proxied_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn build_response(res: ProxyResponse) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(res.status)
        .map_err(|_| ApiError::Tunnel(TunnelError::Upstream(format!("invalid status {}", res.status))))?;
    let mut builder = Response::builder().status(status);
    for (name, value) in &res.headers {
        if !HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from(res.body))
        .map_err(|e| ApiError::Tunnel(TunnelError::Upstream(format!("invalid response headers: {e}"))))
}

/// Pump messages between the browser socket and the tunnel stream
/// until either side closes
async fn relay_socket(mut socket: WebSocket, mut stream: StreamHandle) {
    loop {
        tokio::select! {
            event = stream.recv() => match event {
                StreamEvent::Data { data, binary } => {
                    let message = if binary {
                        Message::Binary(data)
                    } else {
                        match std::str::from_utf8(&data) {
                            Ok(text) => Message::Text(text.into()),
                            Err(_) => Message::Binary(data),
                        }
                    };
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
                StreamEvent::Closed => {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    if stream.send(data, true).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    let data = Bytes::from(text.as_str().to_owned());
                    if stream.send(data, false).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            },
        }
    }
    stream.close().await;
}
