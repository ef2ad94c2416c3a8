//! Primitive conversions
//!
//! Fixed-width integer kinds wrap on overflow; arbitrary-precision kinds never
//! do. Literal parsing is shared with the resolver, which turns untyped
//! literals into typed constants.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Num, ToPrimitive, Zero};
use std::str::FromStr;

use super::Value;
use crate::ast::LitKind;
use crate::types::PrimKind;

/* ===================== Wrapping ===================== */

/// Truncate a signed result to the width of `kind`.
pub fn wrap_int(kind: PrimKind, v: i64) -> i64 {
    match kind {
        PrimKind::Int8 => v as i8 as i64,
        PrimKind::Int16 => v as i16 as i64,
        PrimKind::Int32 | PrimKind::UntypedRune => v as i32 as i64,
        _ => v,
    }
}

/// Truncate an unsigned result to the width of `kind`.
pub fn wrap_uint(kind: PrimKind, v: u64) -> u64 {
    match kind {
        PrimKind::Uint8 => v as u8 as u64,
        PrimKind::Uint16 => v as u16 as u64,
        PrimKind::Uint32 => v as u32 as u64,
        _ => v,
    }
}

fn wrap_float(kind: PrimKind, v: f64) -> f64 {
    match kind {
        PrimKind::Float32 => v as f32 as f64,
        _ => v,
    }
}

/// Low 64 bits of a big integer, two's complement.
fn low_bits(b: &BigInt) -> u64 {
    let masked: BigInt = b & BigInt::from(u64::MAX);
    masked.to_u64().unwrap_or(0)
}

/// Normalize a fixed-width value into the representation of `kind`.
pub fn wrap_value(kind: PrimKind, v: Value) -> Value {
    match v {
        Value::Int(i) if kind.is_unsigned() => Value::Uint(wrap_uint(kind, i as u64)),
        Value::Int(i) => Value::Int(wrap_int(kind, i)),
        Value::Uint(u) if kind.is_signed() => Value::Int(wrap_int(kind, u as i64)),
        Value::Uint(u) => Value::Uint(wrap_uint(kind, u)),
        Value::Float(f) => Value::Float(wrap_float(kind, f)),
        other => other,
    }
}

/* ===================== Conversion ===================== */

/// Convert a primitive value between kinds, as a `T(x)` conversion does.
/// Returns `None` when the conversion is not defined for the pair.
pub fn convert_prim(v: &Value, to: PrimKind) -> Option<Value> {
    let to = to.default_kind();
    let converted = match (v, to) {
        (Value::Bool(b), PrimKind::Bool) => Value::Bool(*b),
        (Value::String(s), PrimKind::String) => Value::String(s.clone()),

        (Value::Int(i), k) if k.is_integer() => wrap_value(k, Value::Int(*i)),
        (Value::Uint(u), k) if k.is_integer() => wrap_value(k, Value::Uint(*u)),
        (Value::Float(f), k) if k.is_signed() => wrap_value(k, Value::Int(f.trunc() as i64)),
        (Value::Float(f), k) if k.is_unsigned() => wrap_value(k, Value::Uint(f.trunc() as u64)),
        (Value::Bigint(b), k) if k.is_signed() => wrap_value(k, Value::Int(low_bits(b) as i64)),
        (Value::Bigint(b), k) if k.is_unsigned() => wrap_value(k, Value::Uint(low_bits(b))),
        (Value::Bigdec(d), k) if k.is_integer() => {
            let (whole, _) = d.with_scale(0).into_bigint_and_exponent();
            return convert_prim(&Value::Bigint(whole), k);
        }

        (Value::Int(i), k) if k.is_float() => Value::Float(wrap_float(k, *i as f64)),
        (Value::Uint(u), k) if k.is_float() => Value::Float(wrap_float(k, *u as f64)),
        (Value::Float(f), k) if k.is_float() => Value::Float(wrap_float(k, *f)),
        (Value::Bigint(b), k) if k.is_float() => Value::Float(wrap_float(k, b.to_f64()?)),
        (Value::Bigdec(d), k) if k.is_float() => Value::Float(wrap_float(k, d.to_f64()?)),

        (Value::Int(i), PrimKind::Bigint) => Value::Bigint(BigInt::from(*i)),
        (Value::Uint(u), PrimKind::Bigint) => Value::Bigint(BigInt::from(*u)),
        (Value::Float(f), PrimKind::Bigint) => Value::Bigint(BigInt::from_f64(f.trunc())?),
        (Value::Bigint(b), PrimKind::Bigint) => Value::Bigint(b.clone()),
        (Value::Bigdec(d), PrimKind::Bigint) => {
            Value::Bigint(d.with_scale(0).into_bigint_and_exponent().0)
        }

        (Value::Int(i), PrimKind::Bigdec) => Value::Bigdec(BigDecimal::from(*i)),
        (Value::Uint(u), PrimKind::Bigdec) => Value::Bigdec(BigDecimal::from(*u)),
        (Value::Float(f), PrimKind::Bigdec) => Value::Bigdec(BigDecimal::from_f64(*f)?),
        (Value::Bigint(b), PrimKind::Bigdec) => Value::Bigdec(BigDecimal::new(b.clone(), 0)),
        (Value::Bigdec(d), PrimKind::Bigdec) => Value::Bigdec(d.clone()),

        // string(rune)
        (Value::Int(i), PrimKind::String) => {
            let c = u32::try_from(*i).ok().and_then(char::from_u32).unwrap_or('\u{FFFD}');
            Value::String(c.to_string())
        }
        (Value::Uint(u), PrimKind::String) => {
            let c = u32::try_from(*u).ok().and_then(char::from_u32).unwrap_or('\u{FFFD}');
            Value::String(c.to_string())
        }
        (Value::Bigint(b), PrimKind::String) => Value::String(b.to_string()),
        (Value::Bigdec(d), PrimKind::String) => Value::String(d.to_string()),
        _ => return None,
    };
    Some(converted)
}

/// Zero value of a primitive kind.
pub fn zero_prim(kind: PrimKind) -> Value {
    match kind.default_kind() {
        PrimKind::Bool => Value::Bool(false),
        PrimKind::String => Value::String(String::new()),
        k if k.is_signed() => Value::Int(0),
        k if k.is_unsigned() => Value::Uint(0),
        k if k.is_float() => Value::Float(0.0),
        PrimKind::Bigint => Value::Bigint(BigInt::zero()),
        PrimKind::Bigdec => Value::Bigdec(BigDecimal::zero()),
        _ => Value::None,
    }
}

/* ===================== Literals ===================== */

fn parse_int_text(text: &str) -> Result<BigInt, String> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (digits, radix) = match cleaned.get(..2) {
        Some("0x") | Some("0X") => (&cleaned[2..], 16),
        Some("0o") | Some("0O") => (&cleaned[2..], 8),
        Some("0b") | Some("0B") => (&cleaned[2..], 2),
        _ if cleaned.len() > 1 && cleaned.starts_with('0') => (&cleaned[1..], 8),
        _ => (cleaned.as_str(), 10),
    };
    BigInt::from_str_radix(digits, radix).map_err(|e| e.to_string())
}

fn parse_char(text: &str) -> Result<i64, String> {
    let mut chars = text.chars();
    let c = match (chars.next(), chars.next()) {
        (Some(c), None) => c,
        (Some('\\'), Some(esc)) => match esc {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            'x' | 'u' | 'U' => {
                let hex: String = chars.collect();
                let code = u32::from_str_radix(&hex, 16).map_err(|e| e.to_string())?;
                char::from_u32(code).ok_or_else(|| "invalid code point".to_string())?
            }
            other => return Err(format!("unknown escape \\{}", other)),
        },
        _ => return Err("empty or multi-character rune literal".to_string()),
    };
    Ok(c as i64)
}

fn bigint_to_kind(b: BigInt, to: PrimKind) -> Result<Value, String> {
    let overflow = || format!("constant {} overflows {}", b, to.name());
    Ok(match to {
        PrimKind::Int | PrimKind::Int64 => Value::Int(b.to_i64().ok_or_else(overflow)?),
        PrimKind::Int8 => Value::Int(b.to_i8().ok_or_else(overflow)? as i64),
        PrimKind::Int16 => Value::Int(b.to_i16().ok_or_else(overflow)? as i64),
        PrimKind::Int32 => Value::Int(b.to_i32().ok_or_else(overflow)? as i64),
        PrimKind::Uint | PrimKind::Uint64 => Value::Uint(b.to_u64().ok_or_else(overflow)?),
        PrimKind::Uint8 => Value::Uint(b.to_u8().ok_or_else(overflow)? as u64),
        PrimKind::Uint16 => Value::Uint(b.to_u16().ok_or_else(overflow)? as u64),
        PrimKind::Uint32 => Value::Uint(b.to_u32().ok_or_else(overflow)? as u64),
        PrimKind::Float32 | PrimKind::Float64 => {
            Value::Float(wrap_float(to, b.to_f64().ok_or_else(overflow)?))
        }
        PrimKind::Bigint => Value::Bigint(b),
        PrimKind::Bigdec => Value::Bigdec(BigDecimal::new(b, 0)),
        other => return Err(format!("cannot use integer constant as {}", other.name())),
    })
}

/// Parse a literal's text into a value of kind `to` (untyped kinds take
/// their default).
pub fn parse_literal(kind: LitKind, text: &str, to: PrimKind) -> Result<Value, String> {
    let to = to.default_kind();
    match kind {
        LitKind::Int => bigint_to_kind(parse_int_text(text)?, to),
        LitKind::Char => bigint_to_kind(BigInt::from(parse_char(text)?), to),
        LitKind::String => match to {
            PrimKind::String => Ok(Value::String(text.to_string())),
            other => Err(format!("cannot use string constant as {}", other.name())),
        },
        LitKind::Float => {
            let cleaned: String = text.chars().filter(|c| *c != '_').collect();
            let d = BigDecimal::from_str(&cleaned).map_err(|e| e.to_string())?;
            match to {
                PrimKind::Float32 | PrimKind::Float64 => {
                    let f = cleaned.parse::<f64>().map_err(|e| e.to_string())?;
                    Ok(Value::Float(wrap_float(to, f)))
                }
                PrimKind::Bigdec => Ok(Value::Bigdec(d)),
                k if d.is_integer() => {
                    let (whole, _) = d.with_scale(0).into_bigint_and_exponent();
                    bigint_to_kind(whole, k)
                }
                other => Err(format!("constant {} truncated to {}", text, other.name())),
            }
        }
    }
}

/// Convert the value of an untyped constant (big integer, big decimal,
/// string or bool) to `to`, failing on overflow or truncation.
pub fn convert_untyped(v: &Value, to: PrimKind) -> Result<Value, String> {
    match to {
        PrimKind::UntypedInt | PrimKind::UntypedRune => {
            return match v {
                Value::Bigint(_) => Ok(v.clone()),
                Value::Bigdec(d) if d.is_integer() => Ok(Value::Bigint(d.with_scale(0).into_bigint_and_exponent().0)),
                other => Err(format!("cannot use {:?} as {}", other, to.name())),
            };
        }
        PrimKind::UntypedFloat => {
            return match v {
                Value::Bigint(b) => Ok(Value::Bigdec(BigDecimal::new(b.clone(), 0))),
                Value::Bigdec(_) => Ok(v.clone()),
                other => Err(format!("cannot use {:?} as {}", other, to.name())),
            };
        }
        _ => {}
    }
    let to = to.default_kind();
    match v {
        Value::Bigint(b) => bigint_to_kind(b.clone(), to),
        Value::Bigdec(d) => match to {
            PrimKind::Float32 | PrimKind::Float64 => d
                .to_f64()
                .map(|f| Value::Float(wrap_float(to, f)))
                .ok_or_else(|| format!("constant {} overflows {}", d, to.name())),
            PrimKind::Bigdec => Ok(Value::Bigdec(d.clone())),
            k if d.is_integer() => bigint_to_kind(d.with_scale(0).into_bigint_and_exponent().0, k),
            other => Err(format!("constant {} truncated to {}", d, other.name())),
        },
        Value::String(_) if to == PrimKind::String => Ok(v.clone()),
        Value::Bool(_) if to == PrimKind::Bool => Ok(v.clone()),
        other => convert_prim(other, to).ok_or_else(|| format!("cannot convert {:?} to {}", other, to.name())),
    }
}

/// Render a float the way `print` does.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "+Inf".to_string() } else { "-Inf".to_string() }
    } else {
        x.to_string()
    }
}
