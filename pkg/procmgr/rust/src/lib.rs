// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Local process supervisor: a process table with a lifecycle state machine,
//! fan-out relays for each process's standard streams, and a JSON-RPC style
//! control protocol served over a unix socket.

pub mod client;
pub mod config;
pub mod env;
pub mod errors;
pub mod process;
pub mod protocol;
pub mod relay;
pub mod server;
mod shutdown;
pub mod state;
pub mod supervisor;
pub mod transport;

pub use client::ControlClient;
pub use config::ServiceConfig;
pub use errors::{ClientError, SupervisorError, TransportError};
pub use process::LaunchSpec;
pub use relay::{Relay, StdStreamMessage, StreamKind, StreamRelay, Subscription};
pub use server::Server;
pub use shutdown::{STOP_POLL_INTERVAL, STOP_TIMEOUT};
pub use state::ProcessStatus;
pub use supervisor::{StartRequest, Supervisor};
