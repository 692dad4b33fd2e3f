// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::Result;
use clap::Parser;
use dd_procmux::{Server, ServiceConfig, Supervisor};
use log::info;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};

/// Local process supervisor service.
#[derive(Parser)]
#[command(name = "dd-procmuxd", version)]
struct Args {
    /// YAML configuration file (defaults to $DD_PROCMUX_CONFIG)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Control socket path, overriding the configuration
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(args.config.as_deref(), args.socket)?;
    SimpleLogger::new()
        .with_level(config.level_filter()?)
        .init()?;
    info!(
        "dd-procmuxd starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let supervisor = Supervisor::new(config.relay_capacity);
    let server = Server::bind(supervisor.clone(), &config.socket_path)?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    server
        .run(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        })
        .await?;

    supervisor.shutdown().await;
    info!("dd-procmuxd shutting down");
    Ok(())
}
