//! Per-device tunnel
//!
//! A tunnel owns at most one device connection at a time plus the
//! tables that multiplex traffic over it: the pending-request table
//! for HTTP round trips and the stream table for socket sessions.
//! Correlation and stream ids are monotonic for the lifetime of the
//! tunnel, so a replacement connection can never observe a reused id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use editor_tunnel_proto::{Frame, HttpRequestFrame};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TunnelError;
use crate::pending::PendingRequests;
use crate::session::{StreamEvent, StreamHandle, StreamTable};

/// Outbound frame queue capacity per connection
const WRITER_QUEUE: usize = 256;

/// Tunnel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// No tunnel exists for the device
    None,
    /// Token issued, waiting for the device to connect
    Pending,
    /// Device connection attached and serving traffic
    Connected,
    /// Torn down; the tunnel object is about to leave the registry
    Closed,
}

/// Snapshot returned by status queries
#[derive(Debug, Clone, Serialize)]
pub struct TunnelStatus {
    pub state: TunnelState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A browser request to proxy across the tunnel
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The device's response, with tunnel framing stripped
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The currently attached connection, if any
struct ConnectionSlot {
    frame_tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    epoch: u64,
}

struct Lifecycle {
    state: TunnelState,
    conn: Option<ConnectionSlot>,
}

pub struct Tunnel {
    device_id: String,
    lifecycle: Mutex<Lifecycle>,
    next_epoch: AtomicU64,
    pending: PendingRequests,
    streams: Arc<StreamTable>,
    next_correlation: AtomicU64,
    next_stream: AtomicU64,
}

impl Tunnel {
    pub fn new(device_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            device_id: device_id.into(),
            lifecycle: Mutex::new(Lifecycle {
                state: TunnelState::Pending,
                conn: None,
            }),
            next_epoch: AtomicU64::new(0),
            pending: PendingRequests::new(),
            streams: Arc::new(StreamTable::new()),
            next_correlation: AtomicU64::new(0),
            next_stream: AtomicU64::new(0),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> TunnelState {
        self.lifecycle.lock().unwrap().state
    }

    /// Epoch of the currently attached connection; 0 when none has
    /// ever attached
    pub(crate) fn current_epoch(&self) -> u64 {
        self.lifecycle
            .lock()
            .unwrap()
            .conn
            .as_ref()
            .map(|c| c.epoch)
            .unwrap_or(0)
    }

    /// Install a fresh connection, replacing any prior one
    ///
    /// The previous connection's reader/writer tasks are cancelled and
    /// all of its pending requests and socket sessions fail with
    /// `TunnelReplaced`. Returns the writer queue receiver and the
    /// cancellation token scoped to the new connection.
    pub(crate) fn install_connection(
        &self,
    ) -> Result<(u64, mpsc::Receiver<Frame>, CancellationToken), TunnelError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.state == TunnelState::Closed {
            return Err(TunnelError::TunnelClosed);
        }

        if let Some(old) = lifecycle.conn.take() {
            debug!(device_id = %self.device_id, old_epoch = old.epoch, "Replacing tunnel connection");
            old.cancel.cancel();
            self.pending.fail_all(TunnelError::TunnelReplaced);
            self.streams.clear();
        }

        let (frame_tx, frame_rx) = mpsc::channel(WRITER_QUEUE);
        let cancel = CancellationToken::new();
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;

        lifecycle.conn = Some(ConnectionSlot {
            frame_tx,
            cancel: cancel.clone(),
            epoch,
        });
        lifecycle.state = TunnelState::Connected;

        Ok((epoch, frame_rx, cancel))
    }

    /// Tear the tunnel down: cancel the connection, fail every
    /// pending request with `reason`, close every socket session.
    /// Idempotent.
    pub(crate) fn shutdown(&self, reason: TunnelError) {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if lifecycle.state == TunnelState::Closed {
                return;
            }
            lifecycle.state = TunnelState::Closed;
            if let Some(conn) = lifecycle.conn.take() {
                conn.cancel.cancel();
            }
        }
        self.pending.fail_all(reason);
        self.streams.clear();
    }

    fn connected_sender(&self) -> Result<mpsc::Sender<Frame>, TunnelError> {
        let lifecycle = self.lifecycle.lock().unwrap();
        match lifecycle.state {
            TunnelState::Connected => lifecycle
                .conn
                .as_ref()
                .map(|c| c.frame_tx.clone())
                .ok_or(TunnelError::NoTunnel),
            TunnelState::Closed => Err(TunnelError::TunnelClosed),
            _ => Err(TunnelError::NoTunnel),
        }
    }

    /// Send one HTTP request across the tunnel and wait for its
    /// response, an independent `deadline`, or tunnel teardown,
    /// whichever comes first. The deadline also covers the wait for
    /// writer queue capacity, so a stalled device cannot park callers
    /// in the send.
    pub async fn proxy_http(
        &self,
        request: ProxyRequest,
        deadline: Duration,
    ) -> Result<ProxyResponse, TunnelError> {
        let frame_tx = self.connected_sender()?;
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed) + 1;
        let rx = self.pending.register(correlation_id);
        let expires_at = tokio::time::Instant::now() + deadline;

        let frame = Frame::Request(HttpRequestFrame {
            correlation_id,
            method: request.method,
            path: request.path,
            headers: request.headers,
            body: request.body,
        });
        match tokio::time::timeout_at(expires_at, frame_tx.send(frame)).await {
            Err(_elapsed) => {
                self.pending.cancel(correlation_id);
                return Err(TunnelError::Timeout);
            }
            Ok(Err(_closed)) => {
                self.pending.cancel(correlation_id);
                return Err(TunnelError::TunnelClosed);
            }
            Ok(Ok(())) => {}
        }

        match tokio::time::timeout_at(expires_at, rx).await {
            Err(_elapsed) => {
                // Late responses for this id will find no entry and be
                // discarded by the read loop.
                self.pending.cancel(correlation_id);
                Err(TunnelError::Timeout)
            }
            Ok(Err(_dropped)) => Err(TunnelError::TunnelClosed),
            Ok(Ok(completion)) => completion.map(|res| ProxyResponse {
                status: res.status,
                headers: res.headers,
                body: res.body,
            }),
        }
    }

    /// Open a socket proxy session across the tunnel
    pub async fn open_stream(&self, path: &str) -> Result<StreamHandle, TunnelError> {
        let frame_tx = self.connected_sender()?;
        let stream_id = self.next_stream.fetch_add(1, Ordering::Relaxed) + 1;
        let events = self.streams.register(stream_id);

        let open = Frame::StreamOpen {
            stream_id,
            path: path.to_string(),
        };
        if frame_tx.send(open).await.is_err() {
            self.streams.remove(stream_id);
            return Err(TunnelError::TunnelClosed);
        }

        Ok(StreamHandle::new(
            stream_id,
            frame_tx,
            events,
            self.streams.clone(),
        ))
    }

    /// Route one inbound frame to its waiter or session
    ///
    /// Frames for unknown ids are discarded; only an undecodable
    /// payload (handled by the read loop, not here) closes the
    /// connection.
    pub(crate) async fn dispatch_frame(&self, frame: Frame) {
        match frame {
            Frame::Response(res) => {
                let id = res.correlation_id;
                if !self.pending.respond(id, Ok(res)) {
                    debug!(device_id = %self.device_id, correlation_id = id, "Discarded late or unmatched response");
                }
            }
            Frame::Error {
                correlation_id: Some(id),
                message,
                ..
            } => {
                self.pending.respond(id, Err(TunnelError::Upstream(message)));
            }
            Frame::Error {
                correlation_id: None,
                code,
                message,
            } => {
                warn!(device_id = %self.device_id, ?code, %message, "Device reported tunnel-level error");
            }
            Frame::StreamData {
                stream_id,
                data,
                binary,
            } => {
                self.streams
                    .deliver(
                        stream_id,
                        StreamEvent::Data {
                            data: data.into(),
                            binary,
                        },
                    )
                    .await;
            }
            Frame::StreamClose { stream_id } => {
                self.streams.deliver(stream_id, StreamEvent::Closed).await;
                self.streams.remove(stream_id);
            }
            // The device never originates requests or streams
            Frame::Request(_) | Frame::StreamOpen { .. } => {
                warn!(
                    device_id = %self.device_id,
                    kind = ?frame.kind(),
                    channel = ?frame.channel_id(),
                    "Discarding device-originated frame"
                );
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.count()
    }
}
