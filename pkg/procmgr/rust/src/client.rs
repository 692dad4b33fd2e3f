// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{ClientError, TransportError};
use crate::protocol::{
    ProcessIdParams, ProcessSummary, Request, Response, ResponseResult, StartProcessParams,
    encode_request,
};
use crate::transport::{Frame, FramedStream, MSG_CONNECTED, MSG_CONTROL, framed, next_frame};
use bytes::Bytes;
use futures::SinkExt;
use log::debug;
use std::path::Path;
use tokio::net::UnixStream;
use tokio::time::{Duration, timeout};

/// How long to wait for the service's `Connected` frame.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// One connection to the control service. Requests are sent one at a time.
pub struct ControlClient {
    frames: FramedStream,
    next_id: i64,
}

impl ControlClient {
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::Connect {
                path: path.display().to_string(),
                source,
            })?;
        let mut frames = framed(stream);

        timeout(HANDSHAKE_TIMEOUT, wait_connected(&mut frames))
            .await
            .map_err(|_| ClientError::HandshakeTimeout)?
            .map_err(ClientError::Handshake)?;

        Ok(Self { frames, next_id: 1 })
    }

    /// Send one request and wait for the response carrying the same id.
    pub async fn call(&mut self, request: &Request) -> Result<ResponseResult, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let payload = encode_request(id, request)?;
        self.frames.send(Frame::control(payload)).await?;

        loop {
            let frame = next_frame(&mut self.frames).await?;
            if frame.msg_type != MSG_CONTROL {
                continue;
            }
            let response = Response::decode(&frame.payload)?;
            if response.id != id {
                debug!("skipping response for request {}", response.id);
                continue;
            }
            return response
                .into_result()
                .map_err(|err| ClientError::Operation {
                    code: err.code,
                    message: err.message,
                });
        }
    }

    pub async fn list(&mut self) -> Result<Vec<ProcessSummary>, ClientError> {
        self.call(&Request::ListProcesses)
            .await?
            .process_list
            .ok_or(ClientError::UnexpectedResponse("processList"))
    }

    /// Start a process and return its id.
    pub async fn start(&mut self, params: StartProcessParams) -> Result<String, ClientError> {
        self.call(&Request::StartProcess(params))
            .await?
            .process_id
            .ok_or(ClientError::UnexpectedResponse("processId"))
    }

    pub async fn stop(&mut self, id: &str) -> Result<(), ClientError> {
        self.call(&Request::StopProcess(ProcessIdParams::new(id)))
            .await
            .map(|_| ())
    }

    pub async fn delete(&mut self, id: &str) -> Result<(), ClientError> {
        self.call(&Request::DeleteProcess(ProcessIdParams::new(id)))
            .await
            .map(|_| ())
    }

    pub async fn request_stop_service(&mut self) -> Result<(), ClientError> {
        self.call(&Request::RequestStopService).await.map(|_| ())
    }

    /// Write an arbitrary control frame and return the next response. For
    /// payloads the typed calls cannot produce.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<Response, ClientError> {
        self.frames
            .send(Frame::control(Bytes::copy_from_slice(payload)))
            .await?;
        loop {
            let frame = next_frame(&mut self.frames).await?;
            if frame.msg_type == MSG_CONTROL {
                return Ok(Response::decode(&frame.payload)?);
            }
        }
    }
}

/// Skip frames until the service's `Connected` frame.
async fn wait_connected(frames: &mut FramedStream) -> Result<(), TransportError> {
    loop {
        let frame = next_frame(frames).await?;
        if frame.msg_type == MSG_CONNECTED {
            return Ok(());
        }
        debug!("ignoring frame of type {} before handshake", frame.msg_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_connect_without_service() {
        let dir = tempfile::tempdir().unwrap();
        let err = ControlClient::connect(&dir.path().join("missing.sock"))
            .await
            .err()
            .unwrap();
        assert!(err.is_connection_failure());
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        // Accept but never send the Connected frame.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(HANDSHAKE_TIMEOUT + Duration::from_secs(1)).await;
            drop(stream);
        });

        let err = ControlClient::connect(&path).await.err().unwrap();
        assert!(matches!(err, ClientError::HandshakeTimeout));
        assert!(err.is_connection_failure());
        server.abort();
    }

    #[tokio::test]
    async fn test_peer_closing_before_handshake_is_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closing.sock");
        let listener = UnixListener::bind(&path).unwrap();
        // Accept, then hang up without a Connected frame.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let err = ControlClient::connect(&path).await.err().unwrap();
        assert!(
            matches!(err, ClientError::Handshake(TransportError::Closed)),
            "unexpected error: {err:?}"
        );
        assert!(err.is_connection_failure());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_skips_other_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noisy.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = framed(stream);
            frames.send(Frame::new(7, &b"noise"[..])).await.unwrap();
            frames.send(Frame::connected()).await.unwrap();
            frames
        });

        assert!(ControlClient::connect(&path).await.is_ok());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_call_matches_response_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = framed(stream);
            frames.send(Frame::connected()).await.unwrap();
            let req = next_frame(&mut frames).await.unwrap();
            let incoming = crate::protocol::decode_request(&req.payload).unwrap();

            // A stale response first, then the real one.
            let stale = Response::success(incoming.id + 100, ResponseResult::success("stale"));
            frames
                .send(Frame::control(stale.encode().unwrap()))
                .await
                .unwrap();
            let real = Response::success(
                incoming.id,
                ResponseResult {
                    process_list: Some(Vec::new()),
                    ..Default::default()
                },
            );
            frames
                .send(Frame::control(real.encode().unwrap()))
                .await
                .unwrap();
        });

        let mut client = ControlClient::connect(&path).await.unwrap();
        assert!(client.list().await.unwrap().is_empty());
        server.await.unwrap();
    }
}
