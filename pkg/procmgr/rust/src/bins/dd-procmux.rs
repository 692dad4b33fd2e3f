// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use clap::{Parser, Subcommand};
use dd_procmux::protocol::{ProcessSummary, StartProcessParams};
use dd_procmux::transport::default_socket_path;
use dd_procmux::{ClientError, ControlClient};
use std::path::PathBuf;
use std::process::ExitCode;

/// Control a running dd-procmuxd.
#[derive(Parser)]
#[command(name = "dd-procmux", version)]
struct Cli {
    /// Control socket path
    #[arg(long, env = "DD_PROCMUX_SOCKET", value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List supervised processes
    Ps,
    /// Start a process with the caller's environment and working directory
    Start {
        #[arg(long)]
        name: Option<String>,
        /// Label used to group processes
        #[arg(long)]
        namespace: Option<String>,
        /// Program followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Stop a process
    Stop { id: String },
    /// Stop a process if needed and remove it
    Delete { id: String },
    /// Ask the service to exit
    Shutdown,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(default_socket_path);

    match run(&socket, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_connection_failure() => {
            eprintln!("Could not connect to service: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(socket: &std::path::Path, command: Command) -> Result<(), ClientError> {
    let mut client = ControlClient::connect(socket).await?;
    match command {
        Command::Ps => print_table(&client.list().await?),
        Command::Start {
            name,
            namespace,
            command,
        } => {
            let mut words = command.into_iter();
            let exec = words.next().unwrap_or_default();
            let cwd = std::env::current_dir()
                .unwrap_or_else(|_| std::env::temp_dir())
                .display()
                .to_string();
            let params = StartProcessParams {
                name,
                namespace,
                exec,
                args: words.collect(),
                env: std::env::vars().map(|(k, v)| format!("{k}={v}")).collect(),
                cwd,
            };
            let id = client.start(params).await?;
            println!("Process started {id}");
        }
        Command::Stop { id } => {
            client.stop(&id).await?;
            println!("Process stopped {id}");
        }
        Command::Delete { id } => {
            client.delete(&id).await?;
            println!("Process deleted {id}");
        }
        Command::Shutdown => {
            client.request_stop_service().await?;
            println!("Requested service shutdown");
        }
    }
    Ok(())
}

fn print_table(processes: &[ProcessSummary]) {
    println!(
        "{:<4} {:<16} {:<12} {:<10} {:>5} {:>10}  COMMAND",
        "ID", "NAME", "NAMESPACE", "STATUS", "EXIT", "UPTIME"
    );
    for p in processes {
        println!(
            "{:<4} {:<16} {:<12} {:<10} {:>5} {:>10}  {} {}",
            p.id,
            p.name.as_deref().unwrap_or("-"),
            p.namespace.as_deref().unwrap_or("-"),
            p.status.to_string(),
            p.exit_code,
            format_uptime(p.uptime),
            p.exec,
            p.args.join(" ")
        );
    }
}

fn format_uptime(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0 if ms == 0 => "-".to_string(),
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m{}s", secs / 60, secs % 60),
        _ => format!("{}h{}m", secs / 3600, (secs % 3600) / 60),
    }
}
