//! Wire codec for tunnel frames
//!
//! Frames travel as individual binary WebSocket messages, so the
//! transport provides message boundaries and the codec only has to
//! (de)serialize one frame per payload.

use bytes::Bytes;
use thiserror::Error;

use crate::frame::Frame;
use crate::MAX_FRAME_SIZE;

/// Codec errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Undecodable frame: {0}")]
    Undecodable(#[from] bincode::Error),
}

/// Encode a frame into a wire payload
pub fn encode_frame(frame: &Frame) -> Result<Bytes, ProtoError> {
    let encoded = bincode::serialize(frame)?;
    if encoded.len() > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge(encoded.len()));
    }
    Ok(Bytes::from(encoded))
}

/// Decode a wire payload into a frame
///
/// Failure here means the peer is not speaking the protocol at all;
/// callers close the connection rather than skip the payload.
pub fn decode_frame(payload: &[u8]) -> Result<Frame, ProtoError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge(payload.len()));
    }
    Ok(bincode::deserialize(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ErrorCode, HttpRequestFrame, HttpResponseFrame};

    #[test]
    fn test_request_round_trip() {
        let frame = Frame::Request(HttpRequestFrame {
            correlation_id: 42,
            method: "POST".to_string(),
            path: "/flows?deploy=full".to_string(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: br#"{"flows":[]}"#.to_vec(),
        });

        let encoded = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_response_round_trip() {
        let frame = Frame::Response(HttpResponseFrame {
            correlation_id: 42,
            status: 404,
            headers: vec![("content-length".to_string(), "0".to_string())],
            body: vec![],
        });

        let encoded = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_stream_frames_round_trip() {
        let frames = vec![
            Frame::StreamOpen {
                stream_id: 1,
                path: "/comms".to_string(),
            },
            Frame::StreamData {
                stream_id: 1,
                data: vec![0, 1, 2, 255],
                binary: true,
            },
            Frame::StreamClose { stream_id: 1 },
            Frame::Error {
                correlation_id: Some(3),
                code: ErrorCode::EditorUnavailable,
                message: "connection refused".to_string(),
            },
        ];

        for frame in frames {
            let encoded = encode_frame(&frame).unwrap();
            assert_eq!(decode_frame(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn test_garbage_is_undecodable() {
        // bincode enum tags are u32 indexes; an out-of-range tag must fail
        let garbage = [0xFFu8; 16];
        assert!(matches!(
            decode_frame(&garbage),
            Err(ProtoError::Undecodable(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let frame = Frame::StreamData {
            stream_id: 1,
            data: vec![0u8; MAX_FRAME_SIZE],
            binary: true,
        };
        assert!(matches!(
            encode_frame(&frame),
            Err(ProtoError::FrameTooLarge(_))
        ));
    }
}
