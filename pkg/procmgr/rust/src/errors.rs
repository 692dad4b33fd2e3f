// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use thiserror::Error;

/// Failures reported by the process table.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("process {id} not found")]
    NotFound { id: String },
    #[error("process {id} is not attached")]
    NotAttached { id: String },
    #[error("failed to spawn {exec}: {source}")]
    SpawnFailure {
        exec: String,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    /// Short machine-readable tag carried in error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::NotFound { .. } => "notFound",
            SupervisorError::NotAttached { .. } => "notAttached",
            SupervisorError::SpawnFailure { .. } => "spawnFailure",
        }
    }
}

/// Failures of the framed local transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u32, max: u32 },
    #[error("connection closed by peer")]
    Closed,
}

/// Failures seen by a control-protocol client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("could not connect to service at {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not connect to service, waiting for Connected status timed out")]
    HandshakeTimeout,
    #[error("could not connect to service, handshake failed: {0}")]
    Handshake(#[source] TransportError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response did not contain the expected field: {0}")]
    UnexpectedResponse(&'static str),
    #[error("{message} (code {code})")]
    Operation { code: i64, message: String },
}

impl ClientError {
    /// True when the service could not be reached at all, as opposed to a
    /// request the service received and rejected.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::HandshakeTimeout
                | ClientError::Handshake(_)
        )
    }
}
