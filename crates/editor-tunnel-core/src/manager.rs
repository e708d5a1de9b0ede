//! Tunnel registry and lifecycle orchestration
//!
//! Process-scoped registry mapping device id to its tunnel. Created
//! at service start and torn down (closing every tunnel) at service
//! stop; nothing survives a restart. Mutations and status reads for
//! the same device are linearized through the registry map's per-key
//! entry locks, and no lock is held across network I/O.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use editor_tunnel_auth::{AccessToken, TokenStore};
use editor_tunnel_proto::{decode_frame, encode_frame, Frame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TunnelError;
use crate::session::StreamHandle;
use crate::transport::{Connection, FrameSink, FrameSource};
use crate::tunnel::{ProxyRequest, ProxyResponse, Tunnel, TunnelState, TunnelStatus};

/// Tunable knobs for the manager
#[derive(Debug, Clone)]
pub struct TunnelManagerConfig {
    /// How long a tunnel may stay PENDING before it is closed
    pub grace_period: Duration,
    /// Deadline for each proxied HTTP round trip
    pub request_timeout: Duration,
}

impl Default for TunnelManagerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Registry of device editor tunnels
pub struct TunnelManager {
    tokens: Arc<TokenStore>,
    tunnels: DashMap<String, Arc<Tunnel>>,
    /// Last handshake/enable failure per device, kept after the tunnel
    /// itself is gone so status polling can report why it went away
    last_errors: DashMap<String, String>,
    config: TunnelManagerConfig,
}

impl TunnelManager {
    pub fn new(tokens: Arc<TokenStore>, config: TunnelManagerConfig) -> Arc<Self> {
        info!(
            grace_period = ?config.grace_period,
            request_timeout = ?config.request_timeout,
            "Creating tunnel manager"
        );
        Arc::new(Self {
            tokens,
            tunnels: DashMap::new(),
            last_errors: DashMap::new(),
            config,
        })
    }

    /// Create a fresh PENDING tunnel for a device, replacing (and
    /// closing) any existing one, and return its access token.
    ///
    /// A grace timer closes the tunnel if the device has not attached
    /// within the configured period.
    pub fn create_tunnel(self: &Arc<Self>, device_id: &str) -> AccessToken {
        self.last_errors.remove(device_id);
        let token = self.tokens.issue(device_id);
        let tunnel = Tunnel::new(device_id);

        if let Some(old) = self.tunnels.insert(device_id.to_string(), tunnel.clone()) {
            debug!(device_id = %device_id, "Replacing existing tunnel");
            old.shutdown(TunnelError::TunnelClosed);
        }
        info!(device_id = %device_id, "Tunnel created, waiting for device");

        let manager = Arc::downgrade(self);
        let expiring = Arc::downgrade(&tunnel);
        let device = device_id.to_string();
        let grace = self.config.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let (Some(manager), Some(tunnel)) = (manager.upgrade(), expiring.upgrade()) else {
                return;
            };
            if tunnel.state() == TunnelState::Pending {
                manager.expire_pending(&device, &tunnel);
            }
        });

        token
    }

    fn expire_pending(&self, device_id: &str, tunnel: &Arc<Tunnel>) {
        let removed = self
            .tunnels
            .remove_if(device_id, |_, current| Arc::ptr_eq(current, tunnel))
            .is_some();
        if removed {
            warn!(device_id = %device_id, "Device did not connect within the grace period");
            tunnel.shutdown(TunnelError::TunnelClosed);
            self.tokens.revoke(device_id);
            self.last_errors.insert(
                device_id.to_string(),
                "device did not connect within the grace period".to_string(),
            );
        }
    }

    /// Close a device's tunnel. A no-op for unknown or already-closed
    /// devices.
    pub fn close_tunnel(&self, device_id: &str) {
        if let Some((_, tunnel)) = self.tunnels.remove(device_id) {
            info!(device_id = %device_id, "Closing tunnel");
            tunnel.shutdown(TunnelError::TunnelClosed);
        }
        self.tokens.revoke(device_id);
    }

    /// Current lifecycle state plus the last recorded error, without
    /// side effects
    pub fn status(&self, device_id: &str) -> TunnelStatus {
        let state = self
            .tunnels
            .get(device_id)
            .map(|t| t.state())
            .unwrap_or(TunnelState::None);
        TunnelStatus {
            state,
            error: self.last_errors.get(device_id).map(|e| e.clone()),
        }
    }

    /// Record why an enable/handshake attempt failed, for status polls
    pub fn record_error(&self, device_id: &str, error: impl Into<String>) {
        self.last_errors.insert(device_id.to_string(), error.into());
    }

    /// Check a presented token against the device's current tunnel
    pub fn verify_token(&self, device_id: &str, token: &str) -> bool {
        self.tunnels.contains_key(device_id) && self.tokens.verify(device_id, token)
    }

    /// Attach a device connection to its tunnel
    ///
    /// Fails closed without writing anything to the connection when no
    /// tunnel is expected or the token does not match. On success the
    /// connection's reader and writer tasks are spawned and the tunnel
    /// transitions to CONNECTED; a prior connection, if any, is torn
    /// down with `TunnelReplaced`.
    pub fn attach(
        self: &Arc<Self>,
        device_id: &str,
        token: &str,
        conn: Connection,
    ) -> Result<(), TunnelError> {
        let tunnel = self
            .tunnels
            .get(device_id)
            .map(|e| e.value().clone())
            .ok_or(TunnelError::NoTunnel)?;
        if !self.tokens.verify(device_id, token) {
            warn!(device_id = %device_id, "Rejected tunnel handshake: invalid token");
            return Err(TunnelError::InvalidToken);
        }

        let (epoch, frame_rx, cancel) = tunnel.install_connection()?;
        info!(device_id = %device_id, epoch, "Device connected, tunnel established");

        tokio::spawn(writer_task(
            conn.sink,
            frame_rx,
            cancel.clone(),
            device_id.to_string(),
        ));
        tokio::spawn(reader_task(
            Arc::downgrade(self),
            tunnel,
            conn.source,
            cancel,
            epoch,
        ));
        Ok(())
    }

    /// Proxy one browser HTTP request across the device's tunnel
    pub async fn proxy_http(
        &self,
        device_id: &str,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, TunnelError> {
        let tunnel = self
            .tunnels
            .get(device_id)
            .map(|e| e.value().clone())
            .ok_or(TunnelError::NoTunnel)?;
        tunnel.proxy_http(request, self.config.request_timeout).await
    }

    /// Open a browser socket session across the device's tunnel
    pub async fn proxy_socket(
        &self,
        device_id: &str,
        path: &str,
    ) -> Result<StreamHandle, TunnelError> {
        let tunnel = self
            .tunnels
            .get(device_id)
            .map(|e| e.value().clone())
            .ok_or(TunnelError::NoTunnel)?;
        tunnel.open_stream(path).await
    }

    /// Close every tunnel; called at service stop
    pub fn shutdown(&self) {
        let device_ids: Vec<String> = self.tunnels.iter().map(|e| e.key().clone()).collect();
        info!(count = device_ids.len(), "Shutting down tunnel manager");
        for device_id in device_ids {
            self.close_tunnel(&device_id);
        }
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    /// Called by a connection's read loop when the device side went
    /// away. Ignored when a newer connection has already taken over.
    fn connection_lost(&self, device_id: &str, epoch: u64, reason: &str) {
        let Some(tunnel) = self.tunnels.get(device_id).map(|e| e.value().clone()) else {
            return;
        };
        if tunnel.current_epoch() != epoch {
            return;
        }
        warn!(device_id = %device_id, epoch, reason, "Tunnel connection lost");
        self.tunnels
            .remove_if(device_id, |_, current| Arc::ptr_eq(current, &tunnel));
        tunnel.shutdown(TunnelError::TunnelClosed);
        self.tokens.revoke(device_id);
        self.last_errors
            .insert(device_id.to_string(), reason.to_string());
    }
}

/// Drains the tunnel's outbound queue into the connection
async fn writer_task(
    mut sink: Box<dyn FrameSink>,
    mut frame_rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
    device_id: String,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = frame_rx.recv() => {
                let Some(frame) = maybe else { break };
                let payload = match encode_frame(&frame) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "Dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(payload).await {
                    debug!(device_id = %device_id, error = %e, "Tunnel write failed");
                    break;
                }
            }
        }
    }
    sink.close().await;
}

/// Reads frames off the connection and dispatches each to its waiter
/// or session without waiting for that waiter to finish
async fn reader_task(
    manager: Weak<TunnelManager>,
    tunnel: Arc<Tunnel>,
    mut source: Box<dyn FrameSource>,
    cancel: CancellationToken,
    epoch: u64,
) {
    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Replaced or explicitly closed; teardown already done.
                return;
            }
            received = source.recv() => match received {
                Ok(Some(payload)) => match decode_frame(&payload) {
                    Ok(frame) => tunnel.dispatch_frame(frame).await,
                    Err(e) => {
                        warn!(device_id = %tunnel.device_id(), error = %e, "Undecodable frame, closing connection");
                        break "device sent an undecodable frame";
                    }
                },
                Ok(None) => break "device closed the connection",
                Err(e) => {
                    debug!(device_id = %tunnel.device_id(), error = %e, "Tunnel read failed");
                    break "device connection error";
                }
            }
        }
    };

    if let Some(manager) = manager.upgrade() {
        manager.connection_lost(tunnel.device_id(), epoch, reason);
    }
}
