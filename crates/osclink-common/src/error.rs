//! Error types for osclink
//!
//! Library errors are a single `thiserror` enum so callers can match on the
//! failure kind. The command line tools wrap them with `anyhow` context.
//!
//! Every variant carries a stable numeric code (see [`OscError::code`]) so the
//! error callback of a server can report failures the same way across
//! processes and languages.

use thiserror::Error;

/// Central error type for osclink operations
#[derive(Error, Debug)]
pub enum OscError {
    // === Codec Errors ===
    #[error("no path string found")]
    NoPath,

    #[error("no type tag string found")]
    NoTypeTag,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("type tag string is not terminated or badly padded")]
    InvalidTypeTag,

    #[error("type tag string does not begin with ','")]
    BadTypeTag,

    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    #[error("invalid argument {index} of type '{tag}': {reason}")]
    InvalidArgument {
        index: usize,
        tag: char,
        reason: String,
    },

    #[error("string is not terminated within the buffer")]
    Unterminated,

    #[error("non-zero padding byte")]
    Padding,

    #[error("unknown type tag '{0}'")]
    UnknownType(char),

    #[error("message too large: {size} bytes (max: {max})")]
    TooBig { size: usize, max: usize },

    // === Bundle Errors ===
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("invalid timetag")]
    InvalidTimetag,

    #[error("circular bundle reference")]
    CircularBundle,

    // === Dispatch Errors ===
    #[error("cannot coerce '{from}' to '{to}'")]
    CoercionFailed { from: char, to: char },

    // === Transport Errors ===
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("no free port: {0}")]
    NoPort(String),

    #[error("cannot resolve {host}:{port}: {reason}")]
    Resolve {
        host: String,
        port: String,
        reason: String,
    },

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Configuration ===
    #[error("configuration error: {0}")]
    Config(String),

    // === Internal ===
    #[error("allocation failed: {0}")]
    Alloc(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OscError {
    /// Numeric code reported to error callbacks.
    ///
    /// Codec and transport failures use the 99xx range. I/O failures pass the
    /// operating system errno through, or 0 when there is none.
    pub fn code(&self) -> i32 {
        match self {
            OscError::NoPath => 9901,
            OscError::NoTypeTag => 9902,
            OscError::UnknownProtocol(_) => 9903,
            OscError::NoPort(_) => 9904,
            OscError::TooBig { .. } => 9905,
            OscError::Internal(_) => 9906,
            OscError::Alloc(_) => 9907,
            OscError::InvalidPath(_) => 9908,
            OscError::InvalidTypeTag => 9909,
            OscError::BadTypeTag => 9910,
            OscError::SizeMismatch(_) => 9911,
            OscError::InvalidArgument { .. } => 9912,
            OscError::Unterminated => 9913,
            OscError::Padding => 9914,
            OscError::InvalidBundle(_) => 9915,
            OscError::InvalidTimetag => 9916,
            OscError::CircularBundle => 9917,
            OscError::CoercionFailed { .. } => 9918,
            OscError::UnknownType(_) => 9919,
            OscError::Resolve { .. } => 9920,
            OscError::Config(_) => 9921,
            OscError::Io(e) => e.raw_os_error().unwrap_or(0),
        }
    }

    /// Whether this error came from decoding or validating received bytes.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            OscError::NoPath
                | OscError::NoTypeTag
                | OscError::InvalidPath(_)
                | OscError::InvalidTypeTag
                | OscError::BadTypeTag
                | OscError::SizeMismatch(_)
                | OscError::InvalidArgument { .. }
                | OscError::Unterminated
                | OscError::Padding
                | OscError::UnknownType(_)
                | OscError::InvalidBundle(_)
                | OscError::InvalidTimetag
        )
    }
}

/// Result type alias using OscError
pub type Result<T> = std::result::Result<T, OscError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(OscError::NoPath.code(), 9901);
        assert_eq!(OscError::NoPort("x".into()).code(), 9904);
        assert_eq!(OscError::BadTypeTag.code(), 9910);
        assert_eq!(OscError::InvalidTimetag.code(), 9916);
        assert_eq!(OscError::CircularBundle.code(), 9917);
    }

    #[test]
    fn test_io_code_passes_errno_through() {
        let err = OscError::from(std::io::Error::from_raw_os_error(111));
        assert_eq!(err.code(), 111);

        let err = OscError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.code(), 0);
    }

    #[test]
    fn test_decode_error_classification() {
        assert!(OscError::Padding.is_decode_error());
        assert!(!OscError::NoPort("1".into()).is_decode_error());
    }
}
