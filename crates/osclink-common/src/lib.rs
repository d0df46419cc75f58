//! # osclink-common
//!
//! Open Sound Control messaging for Rust.
//!
//! This crate contains:
//! - The OSC 1.0 wire codec for messages, bundles and timetags
//! - Destination addresses over UDP, TCP and local datagram sockets
//! - Stream framing with length prefixes or SLIP
//! - A dispatch engine with pattern matching, coercion and a timetag queue
//! - The server receive loop and a variant running on its own thread
//!
//! ## Architecture
//!
//! Sending goes through an [`Address`], which resolves lazily and reuses
//! sockets from a [`ClientPool`]. Receiving goes through a [`Server`], which
//! polls its sockets and hands every frame to its [`Dispatcher`]. A server
//! can also be the origin of sends so replies come back to it.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{AddressOptions, ServerConfig};
pub use dispatch::{Dispatcher, HandlerResult, MethodHandler, MethodId};
pub use error::{OscError, Result};
pub use protocol::{Argument, Bundle, Message};
pub use server::{Server, ServerThread};
pub use transport::{Address, ClientPool};
pub use types::{Protocol, Timetag, TypeTag};
