//! Transport traits for tunnel connections
//!
//! A device connection is a pair of halves so the tunnel can run
//! independent reader and writer tasks over it. Payloads are whole
//! wire frames; the transport is responsible for message boundaries
//! (WebSocket binary messages in production).

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Other(String),
}

/// Outbound half of a device connection
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one frame payload; completes when the payload is accepted
    /// by the underlying connection
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection; best effort
    async fn close(&mut self);
}

/// Inbound half of a device connection
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Receive the next frame payload; `Ok(None)` means the peer
    /// closed the connection cleanly
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// An established device connection, ready to be attached to a tunnel
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Connection {
    pub fn new(sink: impl FrameSink, source: impl FrameSource) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

/// In-memory duplex transport, used by tests and local tooling
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    const CHANNEL_CAPACITY: usize = 64;

    pub struct MemorySink {
        tx: Option<mpsc::Sender<Bytes>>,
    }

    pub struct MemorySource {
        rx: mpsc::Receiver<Bytes>,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
            match &self.tx {
                Some(tx) => tx
                    .send(payload)
                    .await
                    .map_err(|_| TransportError::ConnectionClosed),
                None => Err(TransportError::ConnectionClosed),
            }
        }

        async fn close(&mut self) {
            self.tx = None;
        }
    }

    #[async_trait]
    impl FrameSource for MemorySource {
        async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
            Ok(self.rx.recv().await)
        }
    }

    /// Create a connected pair; frames sent on one side arrive on the
    /// other. The first element is the service side, the second the
    /// device side.
    pub fn pair() -> (Connection, Connection) {
        let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let service = Connection::new(MemorySink { tx: Some(a_tx) }, MemorySource { rx: b_rx });
        let device = Connection::new(MemorySink { tx: Some(b_tx) }, MemorySource { rx: a_rx });
        (service, device)
    }
}
