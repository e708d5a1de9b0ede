//! Frame types carried over the tunnel connection
//!
//! Two kinds of traffic share the connection: discrete HTTP
//! request/response pairs keyed by correlation id, and long-lived
//! socket streams keyed by stream id. The two id spaces are
//! independent; a frame never carries both.

use serde::{Deserialize, Serialize};

/// Identifies one HTTP request/response pair
pub type CorrelationId = u64;

/// Identifies one long-lived socket proxy session
pub type StreamId = u64;

/// The channel a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Correlation(CorrelationId),
    Stream(StreamId),
}

/// Frame kind, used for logging and dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
    StreamOpen,
    StreamData,
    StreamClose,
    Error,
}

/// A proxied HTTP request, serialized into a `Frame::Request`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpRequestFrame {
    pub correlation_id: CorrelationId,
    pub method: String,
    /// Path and query, relative to the device editor root
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A proxied HTTP response, matched to its request by correlation id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResponseFrame {
    pub correlation_id: CorrelationId,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Protocol-level error codes reported by the device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    EditorUnavailable,
    InternalError,
}

/// One discrete unit sent over the tunnel connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Frame {
    Request(HttpRequestFrame),
    Response(HttpResponseFrame),

    StreamOpen {
        stream_id: StreamId,
        /// Path the browser requested the socket upgrade on
        path: String,
    },
    StreamData {
        stream_id: StreamId,
        data: Vec<u8>,
        /// Whether the originating socket message was binary;
        /// preserved so message boundaries and types survive the relay
        binary: bool,
    },
    StreamClose {
        stream_id: StreamId,
    },

    Error {
        /// Absent when the error is not tied to a single channel
        correlation_id: Option<CorrelationId>,
        code: ErrorCode,
        message: String,
    },
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Request(_) => FrameKind::Request,
            Frame::Response(_) => FrameKind::Response,
            Frame::StreamOpen { .. } => FrameKind::StreamOpen,
            Frame::StreamData { .. } => FrameKind::StreamData,
            Frame::StreamClose { .. } => FrameKind::StreamClose,
            Frame::Error { .. } => FrameKind::Error,
        }
    }

    /// Channel this frame is addressed to, if any
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Frame::Request(req) => Some(ChannelId::Correlation(req.correlation_id)),
            Frame::Response(res) => Some(ChannelId::Correlation(res.correlation_id)),
            Frame::StreamOpen { stream_id, .. }
            | Frame::StreamData { stream_id, .. }
            | Frame::StreamClose { stream_id } => Some(ChannelId::Stream(*stream_id)),
            Frame::Error { correlation_id, .. } => {
                correlation_id.map(ChannelId::Correlation)
            }
        }
    }
}
