//! WebSocket halves of a device tunnel connection
//!
//! Adapts one upgraded axum WebSocket into the frame sink/source pair
//! the tunnel core drives. Frames travel as binary messages; anything
//! else the device sends is handed up as-is and fails frame decoding,
//! which tears the connection down.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use editor_tunnel_core::{Connection, FrameSink, FrameSource, TransportError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

pub struct WsFrameSink {
    inner: SplitSink<WebSocket, Message>,
}

pub struct WsFrameSource {
    inner: SplitStream<WebSocket>,
}

/// Split an upgraded device socket into a tunnel connection
pub fn connection_from_socket(socket: WebSocket) -> Connection {
    let (sink, source) = socket.split();
    Connection::new(WsFrameSink { inner: sink }, WsFrameSource { inner: source })
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.inner
            .send(Message::Binary(payload))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.send(Message::Close(None)).await;
    }
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        while let Some(message) = self.inner.next().await {
            match message.map_err(|e| TransportError::Other(e.to_string()))? {
                Message::Binary(data) => return Ok(Some(data)),
                Message::Text(text) => return Ok(Some(Bytes::from(text.as_str().to_owned()))),
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
        Ok(None)
    }
}
