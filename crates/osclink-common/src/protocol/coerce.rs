//! Argument type coercion
//!
//! Numeric types (`i`, `h`, `f`, `d`) convert among each other through an
//! `f64` intermediate, string types (`s`, `S`) convert among each other, and
//! every type converts to itself. Anything else is refused.

use super::message::Argument;
use crate::types::TypeTag;

/// Whether a value of type `from` can be coerced to `to`
pub fn can_coerce(to: TypeTag, from: TypeTag) -> bool {
    to == from || (to.is_numeric() && from.is_numeric()) || (to.is_string() && from.is_string())
}

/// Whether every position of type string `a` can be coerced from `b`.
///
/// Both strings must have the same length and consist of known type tags.
pub fn can_coerce_spec(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.chars().zip(b.chars()).all(|(x, y)| {
        match (TypeTag::from_char(x), TypeTag::from_char(y)) {
            (Some(to), Some(from)) => can_coerce(to, from),
            _ => false,
        }
    })
}

/// Coerces `source` into `target`, writing the result into `slot`.
///
/// Returns `false` and leaves `slot` untouched when the conversion is not
/// allowed.
pub fn coerce(target: TypeTag, slot: &mut Argument, source: &Argument) -> bool {
    match coerced(target, source) {
        Some(value) => {
            *slot = value;
            true
        }
        None => false,
    }
}

/// Returns `source` converted to `target`, if allowed
pub fn coerced(target: TypeTag, source: &Argument) -> Option<Argument> {
    if source.type_tag() == target {
        return Some(source.clone());
    }
    if target.is_string() {
        let s = source.as_str()?.to_string();
        return Some(match target {
            TypeTag::Symbol => Argument::Symbol(s),
            _ => Argument::String(s),
        });
    }
    if target.is_numeric() {
        let hires = hires_value(source)?;
        return Some(match target {
            TypeTag::Int32 => Argument::Int32(hires as i64 as i32),
            TypeTag::Int64 => Argument::Int64(hires as i64),
            TypeTag::Float => Argument::Float(hires as f32),
            _ => Argument::Double(hires),
        });
    }
    None
}

/// Numeric value of an argument at the widest precision available
pub fn hires_value(arg: &Argument) -> Option<f64> {
    match arg {
        Argument::Int32(v) => Some(*v as f64),
        Argument::Int64(v) => Some(*v as f64),
        Argument::Float(v) => Some(*v as f64),
        Argument::Double(v) => Some(*v),
        _ => None,
    }
}
