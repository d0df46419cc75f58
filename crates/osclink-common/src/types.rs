//! Core type definitions for osclink
//!
//! These types are shared by the codec, the transports and the dispatch
//! engine.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OscError;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const FRAC_PER_SEC: f64 = 4_294_967_296.0;

/// NTP-style 64-bit fixed point timestamp
///
/// Ordering is lexicographic on `(sec, frac)`, which matches chronological
/// ordering. The special value [`Timetag::IMMEDIATE`] means "dispatch as soon
/// as received".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timetag {
    /// Seconds since 1900-01-01
    pub sec: u32,
    /// Fractions of a second, in units of 1/2^32 s
    pub frac: u32,
}

impl Timetag {
    /// The "dispatch immediately" sentinel
    pub const IMMEDIATE: Timetag = Timetag { sec: 0, frac: 1 };

    pub const fn new(sec: u32, frac: u32) -> Self {
        Self { sec, frac }
    }

    /// Current wall clock time
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_unix_duration(since_epoch)
    }

    /// The current time shifted by `offset`
    pub fn after(offset: Duration) -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_unix_duration(since_epoch + offset)
    }

    fn from_unix_duration(d: Duration) -> Self {
        let sec = (d.as_secs() + NTP_UNIX_OFFSET) as u32;
        let frac = (d.subsec_nanos() as f64 * FRAC_PER_SEC / 1e9) as u32;
        Self { sec, frac }
    }

    pub fn is_immediate(&self) -> bool {
        *self == Self::IMMEDIATE
    }

    /// Signed difference `self - other` in seconds
    pub fn diff(&self, other: &Timetag) -> f64 {
        (self.sec as f64 - other.sec as f64) + (self.frac as f64 - other.frac as f64) / FRAC_PER_SEC
    }

    /// Seconds as a floating point value since the NTP epoch
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.frac as f64 / FRAC_PER_SEC
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.sec.to_be_bytes());
        out[4..].copy_from_slice(&self.frac.to_be_bytes());
        out
    }

    pub fn from_bytes(b: [u8; 8]) -> Self {
        Self {
            sec: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            frac: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
        }
    }

    /// Convert to a UTC date, if the timetag lies after the Unix epoch
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let unix = (self.sec as i64).checked_sub(NTP_UNIX_OFFSET as i64)?;
        if unix < 0 {
            return None;
        }
        let nanos = (self.frac as f64 / FRAC_PER_SEC * 1e9) as u32;
        Utc.timestamp_opt(unix, nanos).single()
    }
}

impl From<DateTime<Utc>> for Timetag {
    fn from(dt: DateTime<Utc>) -> Self {
        let unix = dt.timestamp().max(0) as u64;
        Self::from_unix_duration(Duration::new(unix, dt.timestamp_subsec_nanos()))
    }
}

impl fmt::Display for Timetag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}.{:08x}", self.sec, self.frac)
    }
}

/// Transport kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Datagrams over UDP
    #[default]
    Udp,
    /// Framed byte stream over TCP
    Tcp,
    /// Local datagram socket
    Unix,
}

impl Protocol {
    /// URL scheme used by [`crate::transport::url`]
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Udp => "osc.udp",
            Protocol::Tcp => "osc.tcp",
            Protocol::Unix => "osc.unix",
        }
    }

    /// Stream transports carry framed data and need a connection
    pub fn is_stream(&self) -> bool {
        matches!(self, Protocol::Tcp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Unix => write!(f, "unix"),
        }
    }
}

impl FromStr for Protocol {
    type Err = OscError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            "unix" => Ok(Protocol::Unix),
            _ => Err(OscError::UnknownProtocol(s.to_string())),
        }
    }
}

/// Single-character argument type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int32,
    Float,
    String,
    Blob,
    Int64,
    Timetag,
    Double,
    Symbol,
    Char,
    Midi,
    True,
    False,
    Nil,
    Infinitum,
}

impl TypeTag {
    pub fn as_char(&self) -> char {
        match self {
            TypeTag::Int32 => 'i',
            TypeTag::Float => 'f',
            TypeTag::String => 's',
            TypeTag::Blob => 'b',
            TypeTag::Int64 => 'h',
            TypeTag::Timetag => 't',
            TypeTag::Double => 'd',
            TypeTag::Symbol => 'S',
            TypeTag::Char => 'c',
            TypeTag::Midi => 'm',
            TypeTag::True => 'T',
            TypeTag::False => 'F',
            TypeTag::Nil => 'N',
            TypeTag::Infinitum => 'I',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'i' => TypeTag::Int32,
            'f' => TypeTag::Float,
            's' => TypeTag::String,
            'b' => TypeTag::Blob,
            'h' => TypeTag::Int64,
            't' => TypeTag::Timetag,
            'd' => TypeTag::Double,
            'S' => TypeTag::Symbol,
            'c' => TypeTag::Char,
            'm' => TypeTag::Midi,
            'T' => TypeTag::True,
            'F' => TypeTag::False,
            'N' => TypeTag::Nil,
            'I' => TypeTag::Infinitum,
            _ => return None,
        })
    }

    /// Numeric types that coerce among each other
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeTag::Int32 | TypeTag::Float | TypeTag::Int64 | TypeTag::Double
        )
    }

    /// String types that coerce among each other
    pub fn is_string(&self) -> bool {
        matches!(self, TypeTag::String | TypeTag::Symbol)
    }

    /// Fixed payload size on the wire, `None` for variable-length types
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            TypeTag::Int32 | TypeTag::Float | TypeTag::Char | TypeTag::Midi => Some(4),
            TypeTag::Int64 | TypeTag::Timetag | TypeTag::Double => Some(8),
            TypeTag::True | TypeTag::False | TypeTag::Nil | TypeTag::Infinitum => Some(0),
            TypeTag::String | TypeTag::Symbol | TypeTag::Blob => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}
