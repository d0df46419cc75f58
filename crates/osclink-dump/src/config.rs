//! Dump tool configuration

use std::path::Path;

use osclink_common::{Protocol, ServerConfig};
use serde::{Deserialize, Serialize};

/// Dump tool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Server to receive on
    #[serde(default)]
    pub server: ServerConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Print errors reported by the server along with the messages
    #[serde(default = "default_print_errors")]
    pub print_errors: bool,

    /// Upper bound of one receive wait, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_print_errors() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            print_errors: default_print_errors(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl DumpConfig {
    /// Load configuration from file, layered with `OSCLINK_DUMP__*`
    /// environment variables
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("Configuration file not found at {:?}, using defaults", path);
        }
        let builder = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("OSCLINK_DUMP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: DumpConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Points the server at a command line target: a port number, a local
    /// socket path or an `osc.*://` URL. Dispatch settings are kept.
    pub fn with_target(mut self, target: &str) -> osclink_common::Result<Self> {
        let parsed = if target.contains("://") {
            ServerConfig::from_url(target)?
        } else {
            ServerConfig::new(target)
        };
        self.server.protocol = parsed.protocol;
        self.server.port = parsed.port;
        if parsed.group.is_some() {
            self.server.group = parsed.group;
        }
        Ok(self)
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> String {
        r#"# osclink-dump configuration

[server]
# Transport: "udp", "tcp" or "unix"
protocol = "udp"

# Port number, or socket path for "unix". Empty picks a free port.
port = "9000"

# Multicast group to join (udp only)
# group = "224.0.1.9"

# Address of the interface for the multicast membership
# ip = "192.168.1.10"

# Coerce arguments to the registered type strings
coerce = true

# Hold bundles with future timetags until they are due
queue = true

# Answer "/path/" requests with the registered children
introspection = false

# Largest frame accepted, in bytes
max_msg_size = 65535

[output]
# Print errors reported by the server along with the messages
print_errors = true

# Upper bound of one receive wait, in milliseconds
poll_interval_ms = 1000
"#
        .to_string()
    }

    pub fn is_multicast(&self) -> bool {
        self.server.protocol == Protocol::Udp && self.server.group.is_some()
    }
}
