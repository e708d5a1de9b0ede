use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use editor_tunnel_core::TunnelError;
use serde::Serialize;
use thiserror::Error;

/// JSON error body shared by all routes
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not Found")]
    NotFound,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadGateway(String),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        match self {
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "not_found",
                    error: "Not Found".to_string(),
                },
            ),
            ApiError::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "invalid_request",
                    error: message.clone(),
                },
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "unauthorized",
                    error: "unauthorized".to_string(),
                },
            ),
            ApiError::BadGateway(message) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    code: "bad_gateway",
                    error: message.clone(),
                },
            ),
            ApiError::Tunnel(err) => {
                let (status, code) = match err {
                    TunnelError::InvalidToken => (StatusCode::UNAUTHORIZED, "unauthorized"),
                    TunnelError::NoTunnel => (StatusCode::SERVICE_UNAVAILABLE, "no_tunnel"),
                    TunnelError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "tunnel_timeout"),
                    TunnelError::TunnelClosed | TunnelError::TunnelReplaced => {
                        (StatusCode::BAD_GATEWAY, "bad_gateway")
                    }
                    TunnelError::Upstream(_) => (StatusCode::BAD_GATEWAY, "bad_gateway"),
                };
                (
                    status,
                    ErrorBody {
                        code,
                        error: err.to_string(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}
