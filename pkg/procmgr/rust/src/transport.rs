// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Message framing over the local socket.
//!
//! Each frame is a big-endian `u32` message type, a big-endian `u32` payload
//! length, then the payload.

use crate::errors::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use tokio::net::UnixStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Sent by the service on every new connection before anything else.
pub const MSG_CONNECTED: u32 = 0;
/// Carries one control-protocol request or response.
pub const MSG_CONTROL: u32 = 100;

pub const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

const HEADER_LEN: usize = 8;

pub const SOCKET_FILE_NAME: &str = "dd-procmux.sock";

/// A unix stream carrying frames in both directions.
pub type FramedStream = Framed<UnixStream, FrameCodec>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(msg_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    pub fn connected() -> Self {
        Self::new(MSG_CONNECTED, Bytes::new())
    }

    pub fn control(payload: impl Into<Bytes>) -> Self {
        Self::new(MSG_CONTROL, payload)
    }
}

/// Codec for [`Frame`]s. Payloads above the limit are rejected in both
/// directions.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: u32,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self { max_frame_len }
    }

    fn check_len(&self, len: u32) -> Result<(), TransportError> {
        if len > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let msg_type = header.get_u32();
        let len = header.get_u32();
        self.check_len(len)?;

        let frame_len = HEADER_LEN + len as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len as usize).freeze();
        Ok(Some(Frame { msg_type, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), TransportError> {
        let len = u32::try_from(frame.payload.len()).unwrap_or(u32::MAX);
        self.check_len(len)?;

        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u32(frame.msg_type);
        dst.put_u32(len);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Wrap a connected stream in the frame codec.
pub fn framed(stream: UnixStream) -> FramedStream {
    Framed::new(stream, FrameCodec::new())
}

/// Next frame from `frames`. A clean end of stream yields
/// [`TransportError::Closed`]; one in the middle of a frame is an I/O error.
pub async fn next_frame<S>(frames: &mut S) -> Result<Frame, TransportError>
where
    S: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    frames.next().await.unwrap_or(Err(TransportError::Closed))
}

/// `$XDG_RUNTIME_DIR/dd-procmux.sock`, or the same name in the temp dir.
pub fn default_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::FramedRead;

    fn encoded(frames: Vec<Frame>) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for frame in frames {
            codec.encode(frame, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_frame_layout() {
        let buf = encoded(vec![Frame::control(&b"{}"[..])]);
        assert_eq!(&buf[..], &[0, 0, 0, 100, 0, 0, 0, 2, b'{', b'}'][..]);
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let full = encoded(vec![Frame::control(&b"hello"[..])]);
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        // Header split, then payload split.
        buf.extend_from_slice(&full[..5]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&full[5..10]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&full[10..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.msg_type, MSG_CONTROL);
        assert_eq!(&frame.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_back_to_back_frames() {
        let raw = encoded(vec![Frame::connected(), Frame::control(&b"hello"[..])]);
        let mut frames = FramedRead::new(&raw[..], FrameCodec::new());

        assert_eq!(next_frame(&mut frames).await.unwrap(), Frame::connected());
        let frame = next_frame(&mut frames).await.unwrap();
        assert_eq!(frame.msg_type, MSG_CONTROL);
        assert_eq!(&frame.payload[..], b"hello");
        assert!(matches!(
            next_frame(&mut frames).await,
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u32(MSG_CONTROL);
        raw.put_u32(MAX_FRAME_LEN + 1);
        let err = FrameCodec::new().decode(&mut raw).unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_oversized_frame_not_encoded() {
        let mut buf = BytesMut::new();
        let err = FrameCodec::with_max_frame_len(4)
            .encode(Frame::control(&b"too long"[..]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { len: 8, max: 4 }));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_io_error() {
        let mut raw = BytesMut::new();
        raw.put_u32(MSG_CONTROL);
        raw.put_u32(10);
        raw.put_slice(b"abc");
        let mut frames = FramedRead::new(&raw[..], FrameCodec::new());
        let err = next_frame(&mut frames).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_default_socket_path_file_name() {
        let path = default_socket_path();
        assert_eq!(path.file_name().unwrap(), SOCKET_FILE_NAME);
    }
}
