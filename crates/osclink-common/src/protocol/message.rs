//! OSC messages and typed arguments
//!
//! A [`Message`] is an ordered list of [`Argument`]s. The type tag string is
//! derived from the arguments, so the two can never disagree. Messages are
//! built with the `add_*` methods, serialized against a target path with
//! [`Message::serialize`], and decoded with [`Message::decode`] which
//! validates every byte before anything is allocated for the caller.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::{pad4, padded_string_len, read_string, read_u32, read_u64, validate_arg};
use crate::error::{OscError, Result};
use crate::transport::Address;
use crate::types::{Timetag, TypeTag};

/// A single typed OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Int32(i32),
    Float(f32),
    String(String),
    Blob(Bytes),
    Int64(i64),
    Timetag(Timetag),
    Double(f64),
    Symbol(String),
    Char(u8),
    Midi([u8; 4]),
    True,
    False,
    Nil,
    Infinitum,
}

impl Argument {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Argument::Int32(_) => TypeTag::Int32,
            Argument::Float(_) => TypeTag::Float,
            Argument::String(_) => TypeTag::String,
            Argument::Blob(_) => TypeTag::Blob,
            Argument::Int64(_) => TypeTag::Int64,
            Argument::Timetag(_) => TypeTag::Timetag,
            Argument::Double(_) => TypeTag::Double,
            Argument::Symbol(_) => TypeTag::Symbol,
            Argument::Char(_) => TypeTag::Char,
            Argument::Midi(_) => TypeTag::Midi,
            Argument::True => TypeTag::True,
            Argument::False => TypeTag::False,
            Argument::Nil => TypeTag::Nil,
            Argument::Infinitum => TypeTag::Infinitum,
        }
    }

    /// Size of the argument on the wire, padding included
    pub fn wire_size(&self) -> usize {
        match self {
            Argument::String(s) | Argument::Symbol(s) => padded_string_len(s.len()),
            Argument::Blob(b) => 4 + pad4(b.len()),
            other => other.type_tag().fixed_size().unwrap_or(0),
        }
    }

    /// Appends the big-endian encoding of this argument to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Argument::Int32(v) => buf.put_i32(*v),
            Argument::Float(v) => buf.put_f32(*v),
            Argument::String(s) | Argument::Symbol(s) => put_padded_str(buf, s),
            Argument::Blob(b) => {
                buf.put_u32(b.len() as u32);
                buf.put_slice(b);
                buf.put_bytes(0, pad4(b.len()) - b.len());
            }
            Argument::Int64(v) => buf.put_i64(*v),
            Argument::Timetag(t) => {
                buf.put_u32(t.sec);
                buf.put_u32(t.frac);
            }
            Argument::Double(v) => buf.put_f64(*v),
            Argument::Char(c) => buf.put_u32(*c as u32),
            Argument::Midi(m) => buf.put_slice(m),
            Argument::True | Argument::False | Argument::Nil | Argument::Infinitum => {}
        }
    }

    /// Decodes one argument of type `tag` from the start of `data`.
    ///
    /// The caller must have validated `data` with [`validate_arg`].
    fn read(tag: TypeTag, data: &[u8]) -> Result<Argument> {
        Ok(match tag {
            TypeTag::Int32 => Argument::Int32(read_u32(data) as i32),
            TypeTag::Float => Argument::Float(f32::from_bits(read_u32(data))),
            TypeTag::Char => Argument::Char(read_u32(data) as u8),
            TypeTag::Midi => Argument::Midi([data[0], data[1], data[2], data[3]]),
            TypeTag::Int64 => Argument::Int64(read_u64(data) as i64),
            TypeTag::Double => Argument::Double(f64::from_bits(read_u64(data))),
            TypeTag::Timetag => Argument::Timetag(Timetag::new(read_u32(data), read_u32(&data[4..]))),
            TypeTag::String | TypeTag::Symbol => {
                let (s, _) = read_string(data)?;
                if tag == TypeTag::String {
                    Argument::String(s.to_string())
                } else {
                    Argument::Symbol(s.to_string())
                }
            }
            TypeTag::Blob => {
                let size = read_u32(data) as usize;
                Argument::Blob(Bytes::copy_from_slice(&data[4..4 + size]))
            }
            TypeTag::True => Argument::True,
            TypeTag::False => Argument::False,
            TypeTag::Nil => Argument::Nil,
            TypeTag::Infinitum => Argument::Infinitum,
        })
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Argument::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Argument::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Argument::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Argument::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// String or symbol contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::String(s) | Argument::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Argument::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_timetag(&self) -> Option<Timetag> {
        match self {
            Argument::Timetag(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Int32(v) => write!(f, "{}", v),
            Argument::Float(v) => write!(f, "{:.6}", v),
            Argument::String(s) => write!(f, "\"{}\"", s),
            Argument::Blob(b) => {
                if b.len() > 12 {
                    write!(f, "[{} byte blob]", b.len())
                } else {
                    write!(f, "[{}b", b.len())?;
                    for byte in b.iter() {
                        write!(f, " {:#04x}", byte)?;
                    }
                    write!(f, "]")
                }
            }
            Argument::Int64(v) => write!(f, "{}", v),
            Argument::Timetag(t) => write!(f, "{}", t),
            Argument::Double(v) => write!(f, "{:.6}", v),
            Argument::Symbol(s) => write!(f, "'{}", s),
            Argument::Char(c) => write!(f, "'{}'", *c as char),
            Argument::Midi(m) => write!(
                f,
                "MIDI [0x{:02x} 0x{:02x} 0x{:02x} 0x{:02x}]",
                m[0], m[1], m[2], m[3]
            ),
            Argument::True => write!(f, "#T"),
            Argument::False => write!(f, "#F"),
            Argument::Nil => write!(f, "Nil"),
            Argument::Infinitum => write!(f, "Infinitum"),
        }
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int32(v)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float(v)
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int64(v)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Double(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::String(v.to_string())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::String(v)
    }
}

impl From<bool> for Argument {
    fn from(v: bool) -> Self {
        if v {
            Argument::True
        } else {
            Argument::False
        }
    }
}

impl From<Timetag> for Argument {
    fn from(v: Timetag) -> Self {
        Argument::Timetag(v)
    }
}

impl From<Bytes> for Argument {
    fn from(v: Bytes) -> Self {
        Argument::Blob(v)
    }
}

impl From<Vec<u8>> for Argument {
    fn from(v: Vec<u8>) -> Self {
        Argument::Blob(Bytes::from(v))
    }
}

/// An OSC message
///
/// Inbound messages carry the address they came from and, when they arrived
/// inside a bundle, the bundle's timetag. Locally built messages have no
/// source and an immediate timetag.
#[derive(Debug, Clone)]
pub struct Message {
    args: Vec<Argument>,
    source: Option<Address>,
    timetag: Timetag,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            source: None,
            timetag: Timetag::IMMEDIATE,
        }
    }

    /// Builds a message from an argument list
    pub fn from_args(args: Vec<Argument>) -> Self {
        Self {
            args,
            ..Self::new()
        }
    }

    /// Builder-style append
    pub fn with_arg(mut self, arg: impl Into<Argument>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn push(&mut self, arg: impl Into<Argument>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn add_int32(&mut self, v: i32) -> &mut Self {
        self.push(Argument::Int32(v))
    }

    pub fn add_float(&mut self, v: f32) -> &mut Self {
        self.push(Argument::Float(v))
    }

    pub fn add_string(&mut self, v: &str) -> &mut Self {
        self.push(Argument::String(v.to_string()))
    }

    pub fn add_symbol(&mut self, v: &str) -> &mut Self {
        self.push(Argument::Symbol(v.to_string()))
    }

    pub fn add_blob(&mut self, v: impl Into<Bytes>) -> &mut Self {
        self.push(Argument::Blob(v.into()))
    }

    pub fn add_int64(&mut self, v: i64) -> &mut Self {
        self.push(Argument::Int64(v))
    }

    pub fn add_timetag(&mut self, v: Timetag) -> &mut Self {
        self.push(Argument::Timetag(v))
    }

    pub fn add_double(&mut self, v: f64) -> &mut Self {
        self.push(Argument::Double(v))
    }

    pub fn add_char(&mut self, v: u8) -> &mut Self {
        self.push(Argument::Char(v))
    }

    pub fn add_midi(&mut self, v: [u8; 4]) -> &mut Self {
        self.push(Argument::Midi(v))
    }

    pub fn add_true(&mut self) -> &mut Self {
        self.push(Argument::True)
    }

    pub fn add_false(&mut self) -> &mut Self {
        self.push(Argument::False)
    }

    pub fn add_nil(&mut self) -> &mut Self {
        self.push(Argument::Nil)
    }

    pub fn add_infinitum(&mut self) -> &mut Self {
        self.push(Argument::Infinitum)
    }

    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }

    pub fn into_args(self) -> Vec<Argument> {
        self.args
    }

    /// Type tag string without the leading `,`
    pub fn types(&self) -> String {
        self.args.iter().map(|a| a.type_tag().as_char()).collect()
    }

    /// Address of the sender, set on inbound messages only
    pub fn source(&self) -> Option<&Address> {
        self.source.as_ref()
    }

    pub(crate) fn set_source(&mut self, source: Option<Address>) {
        self.source = source;
    }

    /// Timetag of the enclosing bundle, or immediate
    pub fn timetag(&self) -> Timetag {
        self.timetag
    }

    pub(crate) fn set_timetag(&mut self, timetag: Timetag) {
        self.timetag = timetag;
    }

    /// Serialized length of this message when sent to `path`
    pub fn length(&self, path: &str) -> usize {
        padded_string_len(path.len())
            + padded_string_len(self.args.len() + 1)
            + self.args.iter().map(Argument::wire_size).sum::<usize>()
    }

    /// Serializes the message for `path`
    pub fn serialize(&self, path: &str) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.length(path));
        self.serialize_into(path, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Appends the serialized message to `buf`
    pub fn serialize_into(&self, path: &str, buf: &mut BytesMut) -> Result<()> {
        if path.as_bytes().contains(&0) {
            return Err(OscError::InvalidPath(format!("{:?} contains NUL", path)));
        }
        for (index, arg) in self.args.iter().enumerate() {
            if let Argument::String(s) | Argument::Symbol(s) = arg {
                if s.as_bytes().contains(&0) {
                    return Err(OscError::InvalidArgument {
                        index,
                        tag: arg.type_tag().as_char(),
                        reason: "string contains NUL".into(),
                    });
                }
            }
        }
        buf.reserve(self.length(path));
        put_padded_str(buf, path);
        let mut types = String::with_capacity(self.args.len() + 1);
        types.push(',');
        types.push_str(&self.types());
        put_padded_str(buf, &types);
        for arg in &self.args {
            arg.write_to(buf);
        }
        Ok(())
    }

    /// Decodes and validates a message, discarding the path
    pub fn deserialize(data: &[u8]) -> Result<Message> {
        Self::decode(data).map(|(_, msg)| msg)
    }

    /// Decodes and validates a message, returning its path and contents.
    ///
    /// Validation order: path string, presence of a type string, type string
    /// termination, leading `,`, then each argument in turn. Leftover or
    /// missing bytes are a size mismatch.
    pub fn decode(data: &[u8]) -> Result<(String, Message)> {
        if data.is_empty() {
            return Err(OscError::NoPath);
        }
        let (path, path_len) = read_string(data).map_err(|e| match e {
            e @ OscError::InvalidPath(_) => e,
            other => OscError::InvalidPath(other.to_string()),
        })?;

        let rest = &data[path_len..];
        if rest.is_empty() {
            return Err(OscError::NoTypeTag);
        }
        let (types, types_len) = read_string(rest).map_err(|_| OscError::InvalidTypeTag)?;
        let tags = types.strip_prefix(',').ok_or(OscError::BadTypeTag)?;

        let mut remain = &rest[types_len..];
        let mut args = Vec::with_capacity(tags.len());
        for (index, c) in tags.chars().enumerate() {
            let tag = TypeTag::from_char(c).ok_or(OscError::UnknownType(c))?;
            let len = validate_arg(tag, remain).map_err(|e| OscError::InvalidArgument {
                index,
                tag: c,
                reason: e.to_string(),
            })?;
            let arg = Argument::read(tag, remain).map_err(|e| OscError::InvalidArgument {
                index,
                tag: c,
                reason: e.to_string(),
            })?;
            args.push(arg);
            remain = &remain[len..];
        }
        if !remain.is_empty() {
            return Err(OscError::SizeMismatch(format!(
                "{} bytes left over after {} arguments",
                remain.len(),
                args.len()
            )));
        }

        Ok((path.to_string(), Message::from_args(args)))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ",{}", self.types())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn put_padded_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_bytes(0, padded_string_len(s.len()) - s.len());
}
