// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::TransportError;
use crate::protocol::{
    IncomingRequest, ProtocolError, Request, Response, ResponseResult, decode_request,
};
use crate::supervisor::Supervisor;
use crate::transport::{Frame, FrameCodec, MSG_CONTROL, next_frame};
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::SinkExt;
use log::{debug, info, warn};
use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, watch};
use tokio_util::codec::{FramedRead, FramedWrite};

type SharedWriter = Arc<Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>>;

/// Serves the control protocol on a unix socket.
pub struct Server {
    supervisor: Supervisor,
    listener: UnixListener,
    socket_path: PathBuf,
}

impl Server {
    /// Bind the control socket, replacing a stale socket file if one exists.
    ///
    /// Must be called inside a tokio runtime.
    pub fn bind(supervisor: Supervisor, socket_path: &Path) -> Result<Self> {
        if let Some(parent) = socket_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        match std::fs::remove_file(socket_path) {
            Ok(()) => debug!("removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("removing {}", socket_path.display()));
            }
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("binding {}", socket_path.display()))?;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions of {}", socket_path.display()))?;
        info!("listening on {}", socket_path.display());

        Ok(Self {
            supervisor,
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` resolves or a client sends
    /// `requestStopService`. Does not stop supervised processes.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received, closing control socket");
                    break;
                }
                _ = stop_rx.changed() => {
                    info!("service stop requested by client");
                    break;
                }
                res = self.listener.accept() => match res {
                    Ok((stream, _)) => {
                        debug!("accepted control connection");
                        tokio::spawn(serve_connection(
                            stream,
                            self.supervisor.clone(),
                            Arc::clone(&stop_tx),
                        ));
                    }
                    Err(e) => warn!("failed to accept connection: {e}"),
                },
            }
        }

        // Wake connection loops that are still reading.
        stop_tx.send_replace(true);
        if let Err(e) = std::fs::remove_file(&self.socket_path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!("could not remove {}: {e}", self.socket_path.display());
        }
        Ok(())
    }
}

async fn serve_connection(stream: UnixStream, supervisor: Supervisor, stop: Arc<watch::Sender<bool>>) {
    let (reader, writer) = stream.into_split();
    let mut reader = FramedRead::new(reader, FrameCodec::new());
    let writer: SharedWriter = Arc::new(Mutex::new(FramedWrite::new(writer, FrameCodec::new())));

    if let Err(e) = writer.lock().await.send(Frame::connected()).await {
        warn!("failed to send handshake: {e}");
        return;
    }

    let mut stop_rx = stop.subscribe();
    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }
        let frame = tokio::select! {
            res = next_frame(&mut reader) => res,
            _ = stop_rx.changed() => break,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(TransportError::Closed) => {
                debug!("control connection closed");
                break;
            }
            Err(e) => {
                warn!("control connection failed: {e}");
                break;
            }
        };
        if frame.msg_type != MSG_CONTROL {
            debug!("ignoring frame of type {}", frame.msg_type);
            continue;
        }

        tokio::spawn(handle_request(
            frame.payload,
            supervisor.clone(),
            Arc::clone(&writer),
            Arc::clone(&stop),
        ));
    }
}

async fn handle_request(
    payload: Bytes,
    supervisor: Supervisor,
    writer: SharedWriter,
    stop: Arc<watch::Sender<bool>>,
) {
    let (response, stop_requested) = match decode_request(&payload) {
        Ok(IncomingRequest { id, request }) => {
            let stop_requested = request == Request::RequestStopService;
            (dispatch(&supervisor, id, request).await, stop_requested)
        }
        Err(failure) => {
            warn!(
                "rejecting request {}: {}",
                failure.id, failure.error.message
            );
            (failure.into_response(), false)
        }
    };

    send_response(&writer, &response).await;

    if stop_requested {
        stop.send_replace(true);
    }
}

async fn dispatch(supervisor: &Supervisor, id: i64, request: Request) -> Response {
    info!("method requested: {}", request.method());
    match request {
        Request::ListProcesses => Response::success(
            id,
            ResponseResult {
                process_list: Some(supervisor.list()),
                ..Default::default()
            },
        ),
        Request::StartProcess(params) => match supervisor.start(params.into()) {
            Ok(summary) => Response::success(
                id,
                ResponseResult {
                    success: Some("Process started".to_string()),
                    process_id: Some(summary.id.clone()),
                    process: Some(summary),
                    ..Default::default()
                },
            ),
            Err(e) => Response::error(
                id,
                ProtocolError::operation_failed("Could not start process", &e),
            ),
        },
        Request::StopProcess(params) => {
            if params.query.is_some() {
                debug!("stopProcess query is not supported, using id {}", params.id);
            }
            match supervisor.stop(&params.id).await {
                Ok(()) => Response::success(id, ResponseResult::success("Process stopped")),
                Err(e) => Response::error(
                    id,
                    ProtocolError::operation_failed("Could not stop process", &e),
                ),
            }
        }
        Request::DeleteProcess(params) => {
            if params.query.is_some() {
                debug!("deleteProcess query is not supported, using id {}", params.id);
            }
            match supervisor.delete(&params.id).await {
                Ok(()) => Response::success(id, ResponseResult::success("Process deleted")),
                Err(e) => Response::error(
                    id,
                    ProtocolError::operation_failed("Could not delete process", &e),
                ),
            }
        }
        Request::RequestStopService => {
            Response::success(id, ResponseResult::success("Service stopping"))
        }
    }
}

async fn send_response(writer: &SharedWriter, response: &Response) {
    let payload = match response.encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("failed to encode response {}: {e}", response.id);
            match Response::error(response.id, ProtocolError::internal(e)).encode() {
                Ok(payload) => payload,
                Err(_) => return,
            }
        }
    };
    let mut writer = writer.lock().await;
    if let Err(e) = writer.send(Frame::control(payload)).await {
        debug!("could not deliver response {}: {e}", response.id);
    }
}
