//! Primitive operators
//!
//! Pure functions over primitive `Value`s, shared by the machine and by the
//! resolver's constant folding. Operands are dispatched on their runtime
//! representation; `kind` is the underlying primitive kind of the result and
//! decides fixed-width wraparound. Arbitrary-precision kinds never wrap.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::cmp::Ordering;

use crate::ast::{BinaryOp, UnaryOp};
use crate::types::PrimKind;
use crate::values::convert::{wrap_int, wrap_uint};
use crate::values::Value;

/// Shifts beyond this many bits on arbitrary-precision integers are refused.
const MAX_BIG_SHIFT: u64 = 1 << 16;

#[derive(Debug, Clone, PartialEq)]
pub enum OpError {
    DivideByZero,
    NegativeShift,
    NotImplemented(&'static str),
    /// Operand kinds the operator is not defined for.
    Mismatch(String),
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpError::DivideByZero => write!(f, "integer divide by zero"),
            OpError::NegativeShift => write!(f, "negative shift amount"),
            OpError::NotImplemented(what) => write!(f, "not implemented: {}", what),
            OpError::Mismatch(msg) => write!(f, "{}", msg),
        }
    }
}

fn mismatch(op: &str, l: &Value, r: &Value) -> OpError {
    OpError::Mismatch(format!("invalid operands for {}: {:?} and {:?}", op, l, r))
}

/// Bring an untyped int and an untyped float to the same representation.
fn promote(l: &Value, r: &Value) -> Option<(Value, Value)> {
    match (l, r) {
        (Value::Bigint(a), Value::Bigdec(_)) => Some((Value::Bigdec(BigDecimal::new(a.clone(), 0)), r.clone())),
        (Value::Bigdec(_), Value::Bigint(b)) => Some((l.clone(), Value::Bigdec(BigDecimal::new(b.clone(), 0)))),
        _ => None,
    }
}

/* ===================== Binary ===================== */

/// `l = l op r` for arithmetic and bitwise operators.
pub fn binary_prim(op: BinaryOp, kind: PrimKind, l: &mut Value, r: &Value) -> Result<(), OpError> {
    if let Some((pl, pr)) = promote(l, r) {
        *l = pl;
        return binary_prim(op, kind, l, &pr);
    }
    let result = match (&*l, r) {
        (Value::Int(a), Value::Int(b)) => Value::Int(wrap_int(kind, int_op(op, *a, *b)?)),
        (Value::Uint(a), Value::Uint(b)) => Value::Uint(wrap_uint(kind, uint_op(op, *a, *b)?)),
        (Value::Float(a), Value::Float(b)) => {
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Quo => a / b,
                _ => return Err(mismatch(op.symbol(), l, r)),
            };
            if kind == PrimKind::Float32 {
                Value::Float(v as f32 as f64)
            } else {
                Value::Float(v)
            }
        }
        (Value::Bigint(a), Value::Bigint(b)) => Value::Bigint(bigint_op(op, a, b)?),
        (Value::Bigdec(a), Value::Bigdec(b)) => {
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Quo if b.is_zero() => return Err(OpError::DivideByZero),
                BinaryOp::Quo => a / b,
                _ => return Err(mismatch(op.symbol(), l, r)),
            };
            Value::Bigdec(v)
        }
        (Value::String(a), Value::String(b)) if op == BinaryOp::Add => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Value::String(s)
        }
        _ => return Err(mismatch(op.symbol(), l, r)),
    };
    *l = result;
    Ok(())
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<i64, OpError> {
    Ok(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Quo if b == 0 => return Err(OpError::DivideByZero),
        BinaryOp::Quo => a.wrapping_div(b),
        BinaryOp::Rem if b == 0 => return Err(OpError::DivideByZero),
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::AndNot => a & !b,
        other => return Err(OpError::Mismatch(format!("{} on int", other.symbol()))),
    })
}

fn uint_op(op: BinaryOp, a: u64, b: u64) -> Result<u64, OpError> {
    Ok(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Quo if b == 0 => return Err(OpError::DivideByZero),
        BinaryOp::Quo => a / b,
        BinaryOp::Rem if b == 0 => return Err(OpError::DivideByZero),
        BinaryOp::Rem => a % b,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::AndNot => a & !b,
        other => return Err(OpError::Mismatch(format!("{} on uint", other.symbol()))),
    })
}

fn bigint_op(op: BinaryOp, a: &BigInt, b: &BigInt) -> Result<BigInt, OpError> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Quo if b.is_zero() => return Err(OpError::DivideByZero),
        BinaryOp::Quo => a / b,
        BinaryOp::Rem if b.is_zero() => return Err(OpError::DivideByZero),
        BinaryOp::Rem => a % b,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::AndNot => a & !b,
        other => return Err(OpError::Mismatch(format!("{} on bigint", other.symbol()))),
    })
}

/* ===================== Shifts ===================== */

/// Shift count from the right operand of `<<` or `>>`.
pub fn shift_count(v: &Value) -> Result<u64, OpError> {
    match v {
        Value::Int(i) if *i < 0 => Err(OpError::NegativeShift),
        Value::Int(i) => Ok(*i as u64),
        Value::Uint(u) => Ok(*u),
        Value::Bigint(b) if b.sign() == num_bigint::Sign::Minus => Err(OpError::NegativeShift),
        Value::Bigint(b) => b
            .to_u64()
            .ok_or_else(|| OpError::Mismatch("shift count too large".to_string())),
        other => Err(OpError::Mismatch(format!("invalid shift count {:?}", other))),
    }
}

pub fn shift_prim(op: BinaryOp, kind: PrimKind, l: &mut Value, n: u64) -> Result<(), OpError> {
    let left = op == BinaryOp::Shl;
    let result = match &*l {
        Value::Int(a) => {
            let v = match (left, n >= 64) {
                (true, true) => 0,
                (true, false) => a << n,
                (false, true) => a >> 63,
                (false, false) => a >> n,
            };
            Value::Int(wrap_int(kind, v))
        }
        Value::Uint(a) => {
            let v = match (left, n >= 64) {
                (_, true) => 0,
                (true, false) => a << n,
                (false, false) => a >> n,
            };
            Value::Uint(wrap_uint(kind, v))
        }
        Value::Bigint(a) => {
            if n > MAX_BIG_SHIFT {
                return Err(OpError::Mismatch(format!("shift count {} too large", n)));
            }
            if left {
                Value::Bigint(a << n as usize)
            } else {
                Value::Bigint(a >> n as usize)
            }
        }
        other => return Err(OpError::Mismatch(format!("shift of {:?}", other))),
    };
    *l = result;
    Ok(())
}

/* ===================== Comparison ===================== */

fn ordering(l: &Value, r: &Value) -> Result<Ordering, OpError> {
    if let Some((pl, pr)) = promote(l, r) {
        return ordering(&pl, &pr);
    }
    let ord = match (l, r) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => {
            a.partial_cmp(b).ok_or_else(|| OpError::Mismatch("NaN is unordered".to_string()))?
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bigint(a), Value::Bigint(b)) => a.cmp(b),
        (Value::Bigdec(a), Value::Bigdec(b)) => a.cmp(b),
        _ => return Err(mismatch("comparison", l, r)),
    };
    Ok(ord)
}

/// Equality of two primitive values of the same kind.
pub fn prim_equal(l: &Value, r: &Value) -> Result<bool, OpError> {
    match (l, r) {
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Float(a), Value::Float(b)) => Ok(a == b),
        _ => Ok(ordering(l, r)? == Ordering::Equal),
    }
}

/// Evaluate a comparison operator on two primitive values.
pub fn compare_prim(op: BinaryOp, l: &Value, r: &Value) -> Result<bool, OpError> {
    match op {
        BinaryOp::Eql => prim_equal(l, r),
        BinaryOp::Neq => prim_equal(l, r).map(|eq| !eq),
        BinaryOp::Lss | BinaryOp::Leq | BinaryOp::Gtr | BinaryOp::Geq => {
            if let (Value::Float(a), Value::Float(b)) = (l, r) {
                if a.is_nan() || b.is_nan() {
                    return Ok(false);
                }
            }
            let ord = ordering(l, r)?;
            Ok(match op {
                BinaryOp::Lss => ord == Ordering::Less,
                BinaryOp::Leq => ord != Ordering::Greater,
                BinaryOp::Gtr => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
        other => Err(OpError::Mismatch(format!("{} is not a comparison", other.symbol()))),
    }
}

/* ===================== Unary ===================== */

/// Apply a unary operator to `v` in place.
pub fn unary_prim(op: UnaryOp, kind: PrimKind, v: &mut Value) -> Result<(), OpError> {
    let result = match (op, &*v) {
        (UnaryOp::Pos, _) => return Ok(()),
        (UnaryOp::Neg, Value::Int(a)) => Value::Int(wrap_int(kind, a.wrapping_neg())),
        (UnaryOp::Neg, Value::Uint(a)) => Value::Uint(wrap_uint(kind, a.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(a)) => Value::Float(-a),
        (UnaryOp::Neg, Value::Bigint(a)) => Value::Bigint(-a),
        (UnaryOp::Neg, Value::Bigdec(a)) => Value::Bigdec(-a),
        (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
        (UnaryOp::Xor, Value::Int(a)) => Value::Int(wrap_int(kind, !a)),
        (UnaryOp::Xor, Value::Uint(a)) => Value::Uint(wrap_uint(kind, !a)),
        (UnaryOp::Xor, Value::Bigint(_)) => return Err(OpError::NotImplemented("bitwise not of bigint")),
        (UnaryOp::Arrow, _) => return Err(OpError::NotImplemented("channel receive")),
        (op, other) => {
            return Err(OpError::Mismatch(format!("invalid operand for {}: {:?}", op.symbol(), other)))
        }
    };
    *v = result;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_bigint_negation() {
        let mut v = Value::Bigint(BigInt::from(5));
        unary_prim(UnaryOp::Neg, PrimKind::Bigint, &mut v).unwrap();
        assert_eq!(v, Value::Bigint(BigInt::from(-5)));

        // Fixed width wraps instead.
        let mut v = Value::Int(-128);
        unary_prim(UnaryOp::Neg, PrimKind::Int8, &mut v).unwrap();
        assert_eq!(v, Value::Int(-128));
    }

    #[test]
    fn test_unimplemented_unary() {
        let mut v = Value::Bigint(BigInt::from(1));
        assert_eq!(
            unary_prim(UnaryOp::Xor, PrimKind::Bigint, &mut v),
            Err(OpError::NotImplemented("bitwise not of bigint"))
        );
        let mut v = Value::Int(1);
        assert!(matches!(
            unary_prim(UnaryOp::Arrow, PrimKind::Int, &mut v),
            Err(OpError::NotImplemented(_))
        ));
        let mut v = Value::Uint(0);
        unary_prim(UnaryOp::Xor, PrimKind::Uint8, &mut v).unwrap();
        assert_eq!(v, Value::Uint(255));
    }

    #[test]
    fn test_fixed_width_wraparound() {
        let mut v = Value::Int(100);
        binary_prim(BinaryOp::Add, PrimKind::Int8, &mut v, &Value::Int(100)).unwrap();
        assert_eq!(v, Value::Int(-56));

        let mut v = Value::Uint(3);
        binary_prim(BinaryOp::Sub, PrimKind::Uint32, &mut v, &Value::Uint(4)).unwrap();
        assert_eq!(v, Value::Uint(u32::MAX as u64));
    }

    #[test]
    fn test_division() {
        let mut v = Value::Int(7);
        assert_eq!(
            binary_prim(BinaryOp::Quo, PrimKind::Int, &mut v, &Value::Int(0)),
            Err(OpError::DivideByZero)
        );
        binary_prim(BinaryOp::Quo, PrimKind::Int, &mut v, &Value::Int(-2)).unwrap();
        assert_eq!(v, Value::Int(-3));

        let mut f = Value::Float(1.0);
        binary_prim(BinaryOp::Quo, PrimKind::Float64, &mut f, &Value::Float(0.0)).unwrap();
        assert_eq!(f, Value::Float(f64::INFINITY));

        let mut d = Value::Bigdec(BigDecimal::from_str("1.5").unwrap());
        binary_prim(BinaryOp::Mul, PrimKind::Bigdec, &mut d, &Value::Bigint(BigInt::from(2))).unwrap();
        assert_eq!(d, Value::Bigdec(BigDecimal::from_str("3.0").unwrap()));
    }

    #[test]
    fn test_shifts() {
        let mut v = Value::Int(1);
        shift_prim(BinaryOp::Shl, PrimKind::Int, &mut v, 70).unwrap();
        assert_eq!(v, Value::Int(0));

        let mut v = Value::Int(-8);
        shift_prim(BinaryOp::Shr, PrimKind::Int, &mut v, 1).unwrap();
        assert_eq!(v, Value::Int(-4));

        let mut v = Value::Bigint(BigInt::from(1));
        shift_prim(BinaryOp::Shl, PrimKind::Bigint, &mut v, 70).unwrap();
        assert_eq!(v, Value::Bigint(BigInt::from(1) << 70usize));

        assert_eq!(shift_count(&Value::Int(-1)), Err(OpError::NegativeShift));
    }

    #[test]
    fn test_comparisons() {
        assert!(compare_prim(BinaryOp::Lss, &Value::String("a".into()), &Value::String("b".into())).unwrap());
        assert!(compare_prim(BinaryOp::Eql, &Value::Bigint(BigInt::from(2)), &Value::Bigdec(BigDecimal::from(2))).unwrap());
        assert!(!compare_prim(BinaryOp::Lss, &Value::Float(f64::NAN), &Value::Float(1.0)).unwrap());
        assert!(compare_prim(BinaryOp::Neq, &Value::Float(f64::NAN), &Value::Float(f64::NAN)).unwrap());
        assert!(compare_prim(BinaryOp::Eql, &Value::Int(1), &Value::String("1".into())).is_err());
    }

    #[test]
    fn test_string_concat() {
        let mut v = Value::String("foo".into());
        binary_prim(BinaryOp::Add, PrimKind::String, &mut v, &Value::String("bar".into())).unwrap();
        assert_eq!(v, Value::String("foobar".into()));
    }
}
