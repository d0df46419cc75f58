//! OSC transport URLs
//!
//! ```text
//! osc[.udp|.tcp|.unix]://[host][:port][/path]
//! ```
//!
//! Each component is extracted on its own and a component that cannot be
//! found is `None`, so `osc.udp://:9000` has a port but no host.

use crate::types::Protocol;

/// Splits `osc[.proto]://rest` into the protocol name and the rest
fn split_scheme(url: &str) -> Option<(Option<&str>, &str)> {
    let after = url.strip_prefix("osc")?;
    if let Some(rest) = after.strip_prefix("://") {
        return Some((None, rest));
    }
    let after = after.strip_prefix('.')?;
    let end = after.find(|c| matches!(c, ':' | '/' | '['))?;
    let (proto, rest) = after.split_at(end);
    if proto.is_empty() {
        return None;
    }
    Some((Some(proto), rest.strip_prefix("://").unwrap_or("")))
}

/// Splits the authority of `rest` into host and whatever follows it
fn split_host(rest: &str) -> Option<(&str, &str)> {
    if let Some(bracketed) = rest.strip_prefix('[') {
        let close = bracketed.find(']')?;
        return Some((&bracketed[..close], &bracketed[close + 1..]));
    }
    let end = rest
        .find(|c| matches!(c, '[' | ':' | '/'))
        .unwrap_or(rest.len());
    Some(rest.split_at(end))
}

/// Protocol name of the URL; a bare `osc://` means `udp`
pub fn url_protocol(url: &str) -> Option<String> {
    let (proto, _) = split_scheme(url)?;
    Some(proto.unwrap_or("udp").to_string())
}

/// Protocol of the URL if it is one this crate speaks
pub fn url_protocol_id(url: &str) -> Option<Protocol> {
    let (proto, _) = split_scheme(url)?;
    match proto {
        None => Some(Protocol::Udp),
        Some(p) => p.parse().ok(),
    }
}

/// Host part, without brackets for IPv6 literals
pub fn url_hostname(url: &str) -> Option<String> {
    let (_, rest) = split_scheme(url)?;
    let (host, _) = split_host(rest)?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Numeric port part
pub fn url_port(url: &str) -> Option<String> {
    let (_, rest) = split_scheme(url)?;
    let (_, after) = split_host(rest)?;
    let digits: String = after
        .strip_prefix(':')?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Path part. For local-socket URLs this is the socket path with any
/// trailing slash removed.
pub fn url_path(url: &str) -> Option<String> {
    let (proto, rest) = split_scheme(url)?;
    if proto == Some("unix") {
        let start = rest.find('/')?;
        let path = rest[start..].trim_end_matches('/');
        return if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        };
    }
    let (_, after) = split_host(rest)?;
    let after = match after.strip_prefix(':') {
        Some(port) => port.trim_start_matches(|c: char| c.is_ascii_digit()),
        None => after,
    };
    if after.starts_with('/') {
        Some(after.to_string())
    } else {
        None
    }
}

/// Formats a URL for `host` and `port`, bracketing IPv6 literals.
///
/// Local-socket URLs carry the path in `port` and have no host.
pub fn format_url(protocol: Protocol, host: &str, port: &str) -> String {
    match protocol {
        Protocol::Unix => format!("{}://{}", protocol.scheme(), port),
        _ if host.contains(':') => format!("{}://[{}]:{}/", protocol.scheme(), host, port),
        _ => format!("{}://{}:{}/", protocol.scheme(), host, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol() {
        assert_eq!(url_protocol("osc.udp://localhost:9000/").as_deref(), Some("udp"));
        assert_eq!(url_protocol("osc.tcp://h:1").as_deref(), Some("tcp"));
        assert_eq!(url_protocol("osc://h:1").as_deref(), Some("udp"));
        assert_eq!(url_protocol("osc.sctp://h:1").as_deref(), Some("sctp"));
        assert_eq!(url_protocol("http://h:1"), None);

        assert_eq!(url_protocol_id("osc.unix:///tmp/s"), Some(Protocol::Unix));
        assert_eq!(url_protocol_id("osc.sctp://h:1"), None);
    }

    #[test]
    fn test_hostname() {
        assert_eq!(url_hostname("osc.udp://localhost:9000/").as_deref(), Some("localhost"));
        assert_eq!(url_hostname("osc.udp://[::1]:9000/").as_deref(), Some("::1"));
        assert_eq!(url_hostname("osc://10.0.0.1:9000").as_deref(), Some("10.0.0.1"));
        assert_eq!(url_hostname("osc.udp://:9000"), None);
        assert_eq!(url_hostname("osc.udp://[::1:9000"), None);
        assert_eq!(url_hostname("garbage"), None);
    }

    #[test]
    fn test_port() {
        assert_eq!(url_port("osc.udp://localhost:9000/").as_deref(), Some("9000"));
        assert_eq!(url_port("osc.tcp://[fe80::1]:7770/x").as_deref(), Some("7770"));
        assert_eq!(url_port("osc.udp://:9000").as_deref(), Some("9000"));
        assert_eq!(url_port("osc://host:12").as_deref(), Some("12"));
        assert_eq!(url_port("osc.udp://host/"), None);
        assert_eq!(url_port("osc.udp://host:abc"), None);
    }

    #[test]
    fn test_path() {
        assert_eq!(url_path("osc.udp://host:9000/foo/bar").as_deref(), Some("/foo/bar"));
        assert_eq!(url_path("osc.udp://host:9000/").as_deref(), Some("/"));
        assert_eq!(url_path("osc.udp://host:9000"), None);
        assert_eq!(url_path("osc.unix:///tmp/sock/").as_deref(), Some("/tmp/sock"));
        assert_eq!(url_path("osc.unix://localhost/tmp/sock").as_deref(), Some("/tmp/sock"));
        assert_eq!(url_path("nonsense"), None);
    }

    #[test]
    fn test_format_url() {
        assert_eq!(format_url(Protocol::Udp, "localhost", "9000"), "osc.udp://localhost:9000/");
        assert_eq!(format_url(Protocol::Tcp, "::1", "80"), "osc.tcp://[::1]:80/");
        assert_eq!(format_url(Protocol::Unix, "", "/tmp/s"), "osc.unix:///tmp/s");
    }
}
