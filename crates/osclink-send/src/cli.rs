//! CLI arguments for the send tool

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Send an Open Sound Control message
#[derive(Parser, Debug)]
#[command(name = "osclink-send")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(after_help = "Types:\n  \
    i 32bit integer      h 64bit integer\n  \
    f 32bit float        d 64bit float\n  \
    s string             S symbol\n  \
    c char               m 4 byte MIDI packet (8 hex digits)\n  \
    t timetag (SSSSSSSS.FFFFFFFF, now, immediate)\n  \
    b blob (base64)\n  \
    T true  F false  N nil  I infinitum (no value)\n\n\
Example:\n  \
    osclink-send localhost 7777 /sample/address iTfs 1 3.14 hello")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Schedule the message this many seconds ahead, inside a bundle
    #[arg(short, long)]
    pub delay: Option<f64>,

    /// <host> <port> | <url>, then <path> [types [values...]]
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "osclink-send.toml", global = true)]
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
    /// Generate a sample configuration file
    GenerateConfig,
}
