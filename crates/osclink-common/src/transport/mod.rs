//! Transport abstractions for osclink
//!
//! Datagram (UDP), stream (TCP) and local (Unix datagram) transports behind
//! one [`Address`] type, plus the stream framing and URL helpers they share.

pub mod address;
pub mod framing;
pub mod pool;
pub mod socket;
pub mod url;

pub use address::Address;
pub use framing::{FrameMode, StreamFramer};
pub use pool::{ClientPool, PoolStats};
pub use socket::SocketHandle;
pub use url::{format_url, url_hostname, url_path, url_port, url_protocol, url_protocol_id};
