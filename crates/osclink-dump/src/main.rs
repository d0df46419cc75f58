//! osclink-dump - Receive and dump Open Sound Control messages
//!
//! The dump tool:
//! - Listens on a UDP port, TCP port, local socket or multicast group
//! - Prints every message with its timetag, path, types and arguments
//! - Runs until interrupted with Ctrl+C

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use osclink_common::Server;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod output;

use cli::{Cli, Commands};
use config::DumpConfig;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Logs go to stderr, messages to stdout
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        EnvFilter::new(format!("osclink_dump={},osclink_common={}", level, level))
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::GenerateConfig) => {
            println!("{}", DumpConfig::generate_sample_config());
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let mut config = DumpConfig::load(&cli.config)?;
    if let Some(target) = cli.target.as_deref() {
        config = config
            .with_target(target)
            .with_context(|| format!("invalid port or URL {:?}", target))?;
    }
    if let Some(group) = cli.group {
        config.server.group = Some(group);
    }

    let mut server = Server::with_config(&config.server).await.with_context(|| {
        match &config.server.group {
            Some(group) => format!(
                "could not start a server on port {:?}, multicast group {}",
                config.server.port, group
            ),
            None => format!("could not start a server on port {:?}", config.server.port),
        }
    })?;
    output::install(&mut server, config.output.print_errors)?;
    info!(url = %server.url(), multicast = config.is_multicast(), "Dumping messages");

    let poll = Duration::from_millis(config.output.poll_interval_ms.max(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl+C");
                break;
            }
            result = server.recv_timeout(poll) => {
                if let Err(e) = result {
                    warn!(error = %e, "Receive failed");
                }
            }
        }
    }
    Ok(())
}
