//! Socket proxy sessions
//!
//! Each browser socket session maps to one stream id on the tunnel.
//! Inbound device frames are buffered per stream in a bounded channel;
//! the tunnel read loop awaits capacity, so a slow browser consumer
//! back-pressures only its own stream's reads.

use bytes::Bytes;
use dashmap::DashMap;
use editor_tunnel_proto::{frame::StreamId, Frame};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::TunnelError;

/// Per-stream inbound buffer capacity
const STREAM_BUFFER: usize = 32;

/// What the browser-facing half sees coming out of the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data { data: Bytes, binary: bool },
    Closed,
}

/// Active socket sessions for one tunnel, keyed by stream id
#[derive(Debug, Default)]
pub(crate) struct StreamTable {
    streams: DashMap<StreamId, mpsc::Sender<StreamEvent>>,
}

impl StreamTable {
    pub(crate) fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    pub(crate) fn register(&self, stream_id: StreamId) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.streams.insert(stream_id, tx);
        rx
    }

    /// Deliver an event to a stream, awaiting buffer capacity
    ///
    /// Returns false for unknown or already-closed stream ids so the
    /// caller can discard the frame. The sender is cloned out of the
    /// map first; the map shard lock is never held across the await.
    pub(crate) async fn deliver(&self, stream_id: StreamId, event: StreamEvent) -> bool {
        let Some(tx) = self.streams.get(&stream_id).map(|e| e.value().clone()) else {
            trace!(stream_id, "No such stream, discarding frame");
            return false;
        };
        tx.send(event).await.is_ok()
    }

    pub(crate) fn remove(&self, stream_id: StreamId) {
        self.streams.remove(&stream_id);
    }

    /// Drop every session's sender; receivers observe closure
    /// immediately
    pub(crate) fn clear(&self) {
        self.streams.clear();
    }

    pub(crate) fn count(&self) -> usize {
        self.streams.len()
    }
}

/// Browser-facing half of one socket proxy session
///
/// Holds a reference to the tunnel's writer queue, never the
/// connection itself. Dropping the handle closes the session.
#[derive(Debug)]
pub struct StreamHandle {
    stream_id: StreamId,
    frames: mpsc::Sender<Frame>,
    events: mpsc::Receiver<StreamEvent>,
    table: Arc<StreamTable>,
    closed: bool,
}

impl StreamHandle {
    pub(crate) fn new(
        stream_id: StreamId,
        frames: mpsc::Sender<Frame>,
        events: mpsc::Receiver<StreamEvent>,
        table: Arc<StreamTable>,
    ) -> Self {
        Self {
            stream_id,
            frames,
            events,
            table,
            closed: false,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Relay one browser message to the device
    pub async fn send(&self, data: Bytes, binary: bool) -> Result<(), TunnelError> {
        self.frames
            .send(Frame::StreamData {
                stream_id: self.stream_id,
                data: data.to_vec(),
                binary,
            })
            .await
            .map_err(|_| TunnelError::TunnelClosed)
    }

    /// Next event from the device side; `Closed` once the stream or
    /// the tunnel is gone
    pub async fn recv(&mut self) -> StreamEvent {
        match self.events.recv().await {
            Some(StreamEvent::Closed) | None => {
                self.closed = true;
                StreamEvent::Closed
            }
            Some(event) => event,
        }
    }

    /// Close the session and tell the device
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.table.remove(self.stream_id);
            let _ = self
                .frames
                .send(Frame::StreamClose {
                    stream_id: self.stream_id,
                })
                .await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.table.remove(self.stream_id);
            let _ = self.frames.try_send(Frame::StreamClose {
                stream_id: self.stream_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_in_order() {
        let table = StreamTable::new();
        let mut rx = table.register(1);

        for i in 0..3u8 {
            let ok = table
                .deliver(
                    1,
                    StreamEvent::Data {
                        data: Bytes::from(vec![i]),
                        binary: true,
                    },
                )
                .await;
            assert!(ok);
        }

        for i in 0..3u8 {
            match rx.recv().await.unwrap() {
                StreamEvent::Data { data, .. } => assert_eq!(data, Bytes::from(vec![i])),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_stream_discarded() {
        let table = StreamTable::new();
        let delivered = table
            .deliver(
                42,
                StreamEvent::Data {
                    data: Bytes::new(),
                    binary: false,
                },
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_clear_wakes_receivers() {
        let table = StreamTable::new();
        let mut rx = table.register(1);
        table.clear();
        assert!(rx.recv().await.is_none());
        assert_eq!(table.count(), 0);
    }

    #[tokio::test]
    async fn test_handle_drop_sends_close_frame() {
        let table = Arc::new(StreamTable::new());
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let events = table.register(7);

        let handle = StreamHandle::new(7, frame_tx, events, table.clone());
        drop(handle);

        assert_eq!(table.count(), 0);
        match frame_rx.recv().await.unwrap() {
            Frame::StreamClose { stream_id } => assert_eq!(stream_id, 7),
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
