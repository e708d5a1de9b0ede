//! Editor Tunnel Protocol Definitions
//!
//! This crate defines the frame types and wire codec for the single
//! multiplexed connection between the service and a remote device.

pub mod codec;
pub mod frame;

pub use codec::{decode_frame, encode_frame, ProtoError};
pub use frame::{
    ChannelId, ErrorCode, Frame, FrameKind, HttpRequestFrame, HttpResponseFrame,
};

/// Maximum encoded frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
