//! CLI arguments for the dump tool

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Receive Open Sound Control messages and dump them to standard output
#[derive(Parser, Debug)]
#[command(name = "osclink-dump")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(after_help = "Examples:\n  \
    osclink-dump 9000\n  \
    osclink-dump osc.udp://224.0.1.9:9000\n  \
    osclink-dump osc.tcp://:9000\n  \
    osclink-dump 9000 224.0.1.9")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Port number, local socket path or server URL
    pub target: Option<String>,

    /// Multicast group to join
    pub group: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "osclink-dump.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Receive and print messages (default)
    Run,

    /// Generate a sample configuration file
    GenerateConfig,
}
