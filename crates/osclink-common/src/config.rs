//! Server and address configuration

use serde::{Deserialize, Serialize};

use crate::error::{OscError, Result};
use crate::protocol::DEFAULT_MAX_MSG_SIZE;
use crate::transport::url::{url_hostname, url_path, url_port, url_protocol, url_protocol_id};
use crate::types::Protocol;

/// How a server binds and dispatches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport to listen on
    #[serde(default)]
    pub protocol: Protocol,

    /// Port number, or socket path for local sockets. Empty lets the
    /// system pick a free port.
    #[serde(default)]
    pub port: String,

    /// Multicast group to join (datagram servers only)
    #[serde(default)]
    pub group: Option<String>,

    /// Interface for the multicast membership, given by its address
    #[serde(default)]
    pub iface: Option<String>,

    /// Address of the interface for the multicast membership; wins over
    /// `iface`
    #[serde(default)]
    pub ip: Option<String>,

    /// Coerce arguments to the type strings of registered methods
    #[serde(default = "default_coerce")]
    pub coerce: bool,

    /// Hold bundles with future timetags until they are due
    #[serde(default = "default_queue")]
    pub queue: bool,

    /// Answer `/path/` requests with the registered children
    #[serde(default)]
    pub introspection: bool,

    /// Largest frame accepted, in bytes
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: usize,
}

fn default_coerce() -> bool {
    true
}

fn default_queue() -> bool {
    true
}

fn default_max_msg_size() -> usize {
    DEFAULT_MAX_MSG_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            port: String::new(),
            group: None,
            iface: None,
            ip: None,
            coerce: default_coerce(),
            queue: default_queue(),
            introspection: false,
            max_msg_size: default_max_msg_size(),
        }
    }
}

impl ServerConfig {
    /// Configuration for `port`; a port starting with `/` is a local socket
    pub fn new(port: &str) -> Self {
        let protocol = if port.starts_with('/') {
            Protocol::Unix
        } else {
            Protocol::Udp
        };
        Self::default().with_protocol(protocol).with_port(port)
    }

    /// Reads protocol and port from an `osc.*://` URL
    pub fn from_url(url: &str) -> Result<Self> {
        let protocol = url_protocol_id(url).ok_or_else(|| {
            OscError::UnknownProtocol(url_protocol(url).unwrap_or_else(|| url.to_string()))
        })?;
        let port = match protocol {
            Protocol::Unix => url_path(url)
                .ok_or_else(|| OscError::Config(format!("no socket path in {}", url)))?,
            _ => url_port(url).unwrap_or_default(),
        };
        let mut config = Self::default().with_protocol(protocol).with_port(&port);
        // a multicast address in the host position is the group to join
        if let Some(host) = url_hostname(url) {
            if host.parse::<std::net::IpAddr>().map(|ip| ip.is_multicast()).unwrap_or(false) {
                config.group = Some(host);
            }
        }
        Ok(config)
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_port(mut self, port: &str) -> Self {
        self.port = port.to_string();
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn with_iface(mut self, iface: &str) -> Self {
        self.iface = Some(iface.to_string());
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn with_coercion(mut self, enable: bool) -> Self {
        self.coerce = enable;
        self
    }

    pub fn with_queue(mut self, enable: bool) -> Self {
        self.queue = enable;
        self
    }

    pub fn with_introspection(mut self, enable: bool) -> Self {
        self.introspection = enable;
        self
    }

    pub fn with_max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = size;
        self
    }
}

/// Per-destination send options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressOptions {
    /// Multicast time-to-live
    #[serde(default)]
    pub ttl: Option<u32>,

    /// Local address to send datagrams from
    #[serde(default)]
    pub iface: Option<String>,

    /// Disable Nagle's algorithm on stream connections
    #[serde(default)]
    pub tcp_nodelay: bool,

    /// Frame stream sends with SLIP instead of a length prefix
    #[serde(default)]
    pub slip: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(config.coerce);
        assert!(config.queue);
        assert!(!config.introspection);
        assert_eq!(config.max_msg_size, 65535);
        assert_eq!(config.protocol, Protocol::Udp);
    }

    #[test]
    fn test_parse_toml() {
        let config: ServerConfig = toml::from_str(
            r#"
            protocol = "tcp"
            port = "7770"
            queue = false
            max_msg_size = 1048576
            "#,
        )
        .unwrap();
        assert_eq!(config.protocol, Protocol::Tcp);
        assert_eq!(config.port, "7770");
        assert!(!config.queue);
        assert!(config.coerce);
        assert_eq!(config.max_msg_size, 1 << 20);

        let opts: AddressOptions = toml::from_str("ttl = 4\nslip = true").unwrap();
        assert_eq!(opts.ttl, Some(4));
        assert!(opts.slip);
        assert!(!opts.tcp_nodelay);
    }

    #[test]
    fn test_new_picks_protocol_from_port() {
        assert_eq!(ServerConfig::new("9000").protocol, Protocol::Udp);
        assert_eq!(ServerConfig::new("/tmp/osc.sock").protocol, Protocol::Unix);
    }

    #[test]
    fn test_from_url() {
        let c = ServerConfig::from_url("osc.tcp://localhost:7000/").unwrap();
        assert_eq!((c.protocol, c.port.as_str()), (Protocol::Tcp, "7000"));
        assert!(c.group.is_none());

        let m = ServerConfig::from_url("osc.udp://224.0.1.9:7770").unwrap();
        assert_eq!(m.group.as_deref(), Some("224.0.1.9"));

        let u = ServerConfig::from_url("osc.unix:///tmp/s").unwrap();
        assert_eq!((u.protocol, u.port.as_str()), (Protocol::Unix, "/tmp/s"));

        assert!(matches!(
            ServerConfig::from_url("osc.sctp://h:1"),
            Err(OscError::UnknownProtocol(_))
        ));
    }
}
