//! Send tool configuration

use std::path::Path;

use osclink_common::{AddressOptions, Protocol};
use serde::{Deserialize, Serialize};

/// Send tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendConfig {
    /// Transport used for `<host> <port>` targets; URLs name their own
    #[serde(default)]
    pub protocol: Protocol,

    /// Multicast time-to-live
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Options applied to the destination address
    #[serde(default)]
    pub address: AddressOptions,
}

fn default_ttl() -> u32 {
    1
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            ttl: default_ttl(),
            address: AddressOptions::default(),
        }
    }
}

impl SendConfig {
    /// Load configuration from file, layered with `OSCLINK_SEND__*`
    /// environment variables
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("Configuration file not found at {:?}, using defaults", path);
        }
        let builder = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("OSCLINK_SEND")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: SendConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Address options with the tool's TTL filled in
    pub fn address_options(&self) -> AddressOptions {
        let mut options = self.address.clone();
        options.ttl = options.ttl.or(Some(self.ttl));
        options
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> String {
        r#"# osclink-send configuration

# Transport for "<host> <port>" targets: "udp", "tcp" or "unix"
protocol = "udp"

# Multicast time-to-live
ttl = 1

[address]
# Local address to send datagrams from
# iface = "192.168.1.10"

# Disable Nagle's algorithm on TCP connections
tcp_nodelay = true

# Frame TCP sends with SLIP instead of a length prefix
slip = false
"#
        .to_string()
    }
}
