//! osclink-send - Send a single Open Sound Control message
//!
//! The send tool:
//! - Builds a message from a type string and textual values
//! - Sends it to a host and port, or to any `osc.*://` URL
//! - Optionally schedules it in a bundle timestamped a delay ahead

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use osclink_common::{Address, ClientPool, Timetag};
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod values;

use cli::{Cli, Commands};
use config::SendConfig;
use values::{parse_invocation, Target};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
        EnvFilter::new(format!("osclink_send={},osclink_common={}", level, level))
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
    if let Some(Commands::GenerateConfig) = cli.command {
        println!("{}", SendConfig::generate_sample_config());
        return Ok(());
    }

    let config = SendConfig::load(&cli.config)?;
    let invocation = parse_invocation(&cli.args).context("failed to create OSC message")?;

    let timetag = match cli.delay {
        None => Timetag::IMMEDIATE,
        Some(delay) => match Duration::try_from_secs_f64(delay) {
            Ok(offset) => Timetag::after(offset),
            Err(_) => bail!("invalid delay {}", delay),
        },
    };

    let mut address = match &invocation.target {
        Target::Url(url) => Address::from_url(url).with_context(|| format!("failed to open {}", url))?,
        Target::HostPort { host, port } => Address::with_protocol(config.protocol, Some(host), port),
    };
    address
        .apply_options(&config.address_options())
        .context("invalid address options")?;

    debug!(
        url = %address.url(),
        path = %invocation.path,
        %timetag,
        "Sending {}",
        invocation.message
    );

    let pool = ClientPool::new();
    if let Err(e) = address
        .send_timestamped(&pool, timetag, &invocation.path, invocation.message)
        .await
    {
        bail!("an error occurred: {} ({})", address.errstr(), e.code());
    }
    Ok(())
}
