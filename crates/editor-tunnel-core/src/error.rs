//! Error taxonomy for tunnel operations

use thiserror::Error;

/// Errors surfaced by tunnel lifecycle and proxy operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    /// Handshake presented a token that does not match the current one
    #[error("invalid token")]
    InvalidToken,

    /// No tunnel exists for the device, or it has not connected yet
    #[error("no tunnel established")]
    NoTunnel,

    /// A newer connection for the same device took over the tunnel
    #[error("tunnel replaced")]
    TunnelReplaced,

    /// The tunnel was closed, explicitly or by the device dropping
    #[error("tunnel closed")]
    TunnelClosed,

    /// The deadline elapsed before the device answered
    #[error("timed out waiting for device response")]
    Timeout,

    /// The device answered with a protocol-level error frame
    #[error("device error: {0}")]
    Upstream(String),
}

impl TunnelError {
    /// Whether the caller may reasonably re-enable and retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, TunnelError::Timeout | TunnelError::TunnelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TunnelError::Timeout.is_retryable());
        assert!(TunnelError::TunnelClosed.is_retryable());
        assert!(!TunnelError::InvalidToken.is_retryable());
        assert!(!TunnelError::NoTunnel.is_retryable());
        assert!(!TunnelError::TunnelReplaced.is_retryable());
        assert!(!TunnelError::Upstream("x".into()).is_retryable());
    }
}
