//! OSC wire protocol
//!
//! This module defines the binary layout of messages and bundles and the
//! validation rules applied to every received frame.
//!
//! ## Message Layout
//!
//! ```text
//! +-------------------+---------------------+------------------------+
//! | path \0 [pad to 4]| , types \0 [pad to 4]| arg0 arg1 ... (BE)     |
//! +-------------------+---------------------+------------------------+
//! ```
//!
//! ## Bundle Layout
//!
//! ```text
//! +-------------+-------------+--------------+-----------+-----+
//! | "#bundle\0" | timetag (8) | len (4B BE)  | element   | ... |
//! +-------------+-------------+--------------+-----------+-----+
//! ```

pub mod bundle;
pub mod coerce;
pub mod message;

pub use bundle::{validate_bundle, Bundle, BundleElement};
pub use coerce::{can_coerce, can_coerce_spec, coerce, coerced};
pub use message::{Argument, Message};

use crate::error::{OscError, Result};
use crate::types::TypeTag;

/// Marker string that starts every bundle, NUL included
pub const BUNDLE_MARKER: &[u8; 8] = b"#bundle\0";

/// Hard ceiling for a UDP payload
pub const MAX_UDP_MSG_SIZE: usize = 65535;

/// Default maximum message size accepted by a server
pub const DEFAULT_MAX_MSG_SIZE: usize = MAX_UDP_MSG_SIZE;

/// Rounds `n` up to the next multiple of 4
pub const fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

/// Size on the wire of a string of `len` bytes, NUL terminator included
pub const fn padded_string_len(len: usize) -> usize {
    4 * (len / 4 + 1)
}

/// Whether the frame starts with the bundle marker
pub fn is_bundle(data: &[u8]) -> bool {
    data.len() >= BUNDLE_MARKER.len() && &data[..BUNDLE_MARKER.len()] == BUNDLE_MARKER
}

/// Validates an OSC string at the start of `data`.
///
/// Returns the padded size consumed. The string must be NUL terminated
/// within `data`, and every pad byte up to the next 4-byte boundary must be
/// zero.
pub fn validate_string(data: &[u8]) -> Result<usize> {
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::Unterminated)?;
    let len = padded_string_len(nul);
    if len > data.len() {
        return Err(OscError::SizeMismatch(format!(
            "string padding needs {} bytes, {} available",
            len,
            data.len()
        )));
    }
    if data[nul..len].iter().any(|&b| b != 0) {
        return Err(OscError::Padding);
    }
    Ok(len)
}

/// Validates a blob (4-byte big-endian size, bytes, zero padding).
///
/// Returns the padded size consumed.
pub fn validate_blob(data: &[u8]) -> Result<usize> {
    if data.len() < 4 {
        return Err(OscError::SizeMismatch("blob size header truncated".into()));
    }
    let dsize = read_u32(data) as usize;
    if dsize > data.len() {
        return Err(OscError::SizeMismatch(format!(
            "blob declares {} bytes, {} available",
            dsize,
            data.len()
        )));
    }
    let end = 4 + dsize;
    let len = pad4(end);
    if len > data.len() {
        return Err(OscError::SizeMismatch(format!(
            "blob needs {} bytes, {} available",
            len,
            data.len()
        )));
    }
    if data[end..len].iter().any(|&b| b != 0) {
        return Err(OscError::Padding);
    }
    Ok(len)
}

/// Validates one argument of type `tag` at the start of `data`.
///
/// Returns the number of bytes the argument occupies on the wire.
pub fn validate_arg(tag: TypeTag, data: &[u8]) -> Result<usize> {
    match tag {
        TypeTag::String | TypeTag::Symbol => validate_string(data),
        TypeTag::Blob => validate_blob(data),
        fixed => {
            // fixed_size is Some for every non variable-length tag
            let size = fixed.fixed_size().unwrap_or(0);
            if data.len() < size {
                return Err(OscError::SizeMismatch(format!(
                    "'{}' needs {} bytes, {} available",
                    fixed,
                    size,
                    data.len()
                )));
            }
            Ok(size)
        }
    }
}

/// Extracts the path of a serialized message, or `#bundle` for a bundle.
///
/// Returns `None` if the frame does not start with a valid string.
pub fn get_path(data: &[u8]) -> Option<&str> {
    read_string(data).ok().map(|(path, _)| path)
}

pub(crate) fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

pub(crate) fn read_u64(data: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[..8]);
    u64::from_be_bytes(b)
}

/// Reads a validated string, returning it with its padded size.
pub(crate) fn read_string(data: &[u8]) -> Result<(&str, usize)> {
    let len = validate_string(data)?;
    let nul = data[..len].iter().position(|&b| b == 0).unwrap_or(len);
    let s = std::str::from_utf8(&data[..nul])
        .map_err(|e| OscError::InvalidPath(format!("not valid UTF-8: {}", e)))?;
    Ok((s, len))
}
