//! Command line values to OSC arguments
//!
//! The positional arguments are `<host> <port>` or `<url>`, then the path,
//! then an optional type string and one value per type letter that takes
//! one. `T`, `F`, `N` and `I` take no value.

use base64::Engine;
use osclink_common::{Argument, Message, Timetag};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValueError {
    #[error("no hostname is given")]
    NoHost,

    #[error("no port number is given")]
    NoPort,

    #[error("no path is given")]
    NoPath,

    #[error("value #{0} is not given")]
    MissingValue(usize),

    #[error("{0} values given but the type string uses {1}")]
    ExtraValues(usize, usize),

    #[error("an invalid value was given: '{0}'")]
    InvalidValue(String),

    #[error("value out of range: '{0}'")]
    OutOfRange(String),

    #[error("an invalid hexadecimal value was given: '{0}'")]
    InvalidHex(String),

    #[error("an invalid base64 blob was given: '{0}'")]
    InvalidBlob(String),

    #[error("type '{0}' is not supported or invalid")]
    UnsupportedType(char),
}

/// Where to send
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Url(String),
    HostPort { host: String, port: String },
}

/// A fully parsed command line
#[derive(Debug, Clone)]
pub struct Invocation {
    pub target: Target,
    pub path: String,
    pub message: Message,
}

/// Splits the positional arguments and builds the message
pub fn parse_invocation(args: &[String]) -> Result<Invocation, ValueError> {
    let (first, rest) = args.split_first().ok_or(ValueError::NoHost)?;
    let (target, rest) = if first.contains("://") {
        (Target::Url(first.clone()), rest)
    } else {
        let (port, rest) = rest.split_first().ok_or(ValueError::NoPort)?;
        let target = Target::HostPort {
            host: first.clone(),
            port: port.clone(),
        };
        (target, rest)
    };

    let (path, rest) = rest.split_first().ok_or(ValueError::NoPath)?;
    let message = match rest.split_first() {
        Some((types, values)) => build_message(types, values)?,
        None => Message::new(),
    };
    Ok(Invocation {
        target,
        path: path.clone(),
        message,
    })
}

/// Builds a message from a type string and its textual values
pub fn build_message(types: &str, values: &[String]) -> Result<Message, ValueError> {
    let mut args = Vec::with_capacity(types.len());
    let mut next = values.iter();
    let mut used = 0;

    for (i, tag) in types.chars().enumerate() {
        let arg = match tag {
            'T' => Argument::True,
            'F' => Argument::False,
            'N' => Argument::Nil,
            'I' => Argument::Infinitum,
            'i' | 'h' | 'f' | 'd' | 's' | 'S' | 'c' | 'm' | 't' | 'b' => {
                let value = next.next().ok_or(ValueError::MissingValue(i + 1))?;
                used += 1;
                parse_value(tag, value)?
            }
            other => return Err(ValueError::UnsupportedType(other)),
        };
        args.push(arg);
    }

    if values.len() > used {
        return Err(ValueError::ExtraValues(values.len(), used));
    }
    Ok(Message::from_args(args))
}

fn parse_value(tag: char, value: &str) -> Result<Argument, ValueError> {
    let invalid = || ValueError::InvalidValue(value.to_string());
    Ok(match tag {
        'i' => {
            let v: i64 = value.parse().map_err(|_| invalid())?;
            let v = i32::try_from(v).map_err(|_| ValueError::OutOfRange(value.to_string()))?;
            Argument::Int32(v)
        }
        'h' => Argument::Int64(value.parse().map_err(|_| match value.parse::<i128>() {
            Ok(_) => ValueError::OutOfRange(value.to_string()),
            Err(_) => invalid(),
        })?),
        'f' => Argument::Float(value.parse().map_err(|_| invalid())?),
        'd' => Argument::Double(value.parse().map_err(|_| invalid())?),
        's' => Argument::String(value.to_string()),
        'S' => Argument::Symbol(value.to_string()),
        // a char argument holds one byte, so only ASCII fits
        'c' => match value.chars().next() {
            Some(c) if c.is_ascii() => Argument::Char(c as u8),
            _ => return Err(invalid()),
        },
        'm' => {
            if value.is_empty() || value.len() > 8 {
                return Err(ValueError::InvalidHex(value.to_string()));
            }
            let midi = u32::from_str_radix(value, 16)
                .map_err(|_| ValueError::InvalidHex(value.to_string()))?;
            Argument::Midi(midi.to_be_bytes())
        }
        't' => Argument::Timetag(parse_timetag(value)?),
        'b' => {
            let blob = base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|_| ValueError::InvalidBlob(value.to_string()))?;
            Argument::from(blob)
        }
        other => return Err(ValueError::UnsupportedType(other)),
    })
}

/// `now`, `immediate`, or `SSSSSSSS.FFFFFFFF` in hexadecimal
pub fn parse_timetag(value: &str) -> Result<Timetag, ValueError> {
    match value {
        "now" => return Ok(Timetag::now()),
        "immediate" => return Ok(Timetag::IMMEDIATE),
        _ => {}
    }
    let hex = |s: &str| u32::from_str_radix(s, 16).map_err(|_| ValueError::InvalidHex(value.to_string()));
    let (sec, frac) = value
        .split_once('.')
        .ok_or_else(|| ValueError::InvalidHex(value.to_string()))?;
    Ok(Timetag::new(hex(sec)?, hex(frac)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_host_port_invocation() {
        let inv = parse_invocation(&strings(&["localhost", "7777", "/sample/address", "iTfs", "1", "3.14", "hello"]))
            .unwrap();
        assert_eq!(
            inv.target,
            Target::HostPort {
                host: "localhost".into(),
                port: "7777".into()
            }
        );
        assert_eq!(inv.path, "/sample/address");
        assert_eq!(inv.message.types(), "iTfs");
        assert_eq!(inv.message.to_string(), ",iTfs 1 #T 3.140000 \"hello\"");
    }

    #[test]
    fn test_url_invocation_without_types() {
        let inv = parse_invocation(&strings(&["osc.tcp://localhost:9000", "/ping"])).unwrap();
        assert_eq!(inv.target, Target::Url("osc.tcp://localhost:9000".into()));
        assert_eq!(inv.message.argc(), 0);
    }

    #[test]
    fn test_missing_parts() {
        assert_eq!(parse_invocation(&[]).unwrap_err(), ValueError::NoHost);
        assert_eq!(parse_invocation(&strings(&["localhost"])).unwrap_err(), ValueError::NoPort);
        assert_eq!(parse_invocation(&strings(&["localhost", "1"])).unwrap_err(), ValueError::NoPath);
        assert_eq!(
            build_message("ii", &strings(&["1"])).unwrap_err(),
            ValueError::MissingValue(2)
        );
        assert_eq!(
            build_message("i", &strings(&["1", "2"])).unwrap_err(),
            ValueError::ExtraValues(2, 1)
        );
    }

    #[test]
    fn test_integer_ranges() {
        assert_eq!(build_message("i", &strings(&["-5"])).unwrap().args()[0], Argument::Int32(-5));
        assert_eq!(
            build_message("i", &strings(&["2147483648"])).unwrap_err(),
            ValueError::OutOfRange("2147483648".into())
        );
        assert_eq!(
            build_message("i", &strings(&["12x"])).unwrap_err(),
            ValueError::InvalidValue("12x".into())
        );
        assert_eq!(
            build_message("h", &strings(&["9223372036854775808"])).unwrap_err(),
            ValueError::OutOfRange("9223372036854775808".into())
        );
        assert_eq!(
            build_message("h", &strings(&["-9"])).unwrap().args()[0],
            Argument::Int64(-9)
        );
    }

    #[test]
    fn test_other_types() {
        let msg = build_message(
            "dScmtbNFI",
            &strings(&["2.5", "sym", "xyz", "90403c00", "00000001.80000000", "AQID"]),
        )
        .unwrap();
        let args = msg.args();
        assert_eq!(args[0], Argument::Double(2.5));
        assert_eq!(args[1], Argument::Symbol("sym".into()));
        assert_eq!(args[2], Argument::Char(b'x'));
        assert_eq!(args[3], Argument::Midi([0x90, 0x40, 0x3c, 0x00]));
        assert_eq!(args[4], Argument::Timetag(Timetag::new(1, 0x8000_0000)));
        assert_eq!(args[5], Argument::from(vec![1u8, 2, 3]));
        assert_eq!(&args[6..], &[Argument::Nil, Argument::False, Argument::Infinitum]);
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            build_message("m", &strings(&["zz"])).unwrap_err(),
            ValueError::InvalidHex("zz".into())
        );
        assert_eq!(
            build_message("b", &strings(&["!!"])).unwrap_err(),
            ValueError::InvalidBlob("!!".into())
        );
        assert_eq!(build_message("q", &[]).unwrap_err(), ValueError::UnsupportedType('q'));
        assert_eq!(
            build_message("c", &strings(&[""])).unwrap_err(),
            ValueError::InvalidValue("".into())
        );
        assert_eq!(
            build_message("c", &strings(&["é"])).unwrap_err(),
            ValueError::InvalidValue("é".into())
        );
        assert_eq!(parse_timetag("immediate").unwrap(), Timetag::IMMEDIATE);
        assert!(parse_timetag("12").is_err());
    }
}
