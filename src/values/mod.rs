//! Runtime values
//!
//! A `TypedValue` pairs a (possibly absent) type with a `Value`. Composite
//! values live in the heap and are reached through a `Handle`, which is either
//! an in-memory arena reference or a not-yet-loaded reference to a persisted
//! object.

pub mod convert;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::ast::{Body, Name, ScopeId};
use crate::errors::MachineError;
use crate::heap::ObjectRef;
use crate::machine::Machine;
use crate::ownership::{ObjectId, ValueHash};
use crate::types::{FuncType, Type};

/* ===================== Handles ===================== */

/// Reference to a persisted object, resolved lazily through the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefValue {
    pub object_id: ObjectId,
    /// Zero when the object is referenced from a non-owner (escaped).
    #[serde(default)]
    pub hash: ValueHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Handle {
    Mem(ObjectRef),
    Stored(RefValue),
}

impl Handle {
    pub fn as_mem(&self) -> Option<ObjectRef> {
        match self {
            Handle::Mem(r) => Some(*r),
            Handle::Stored(_) => None,
        }
    }
}

impl From<ObjectRef> for Handle {
    fn from(r: ObjectRef) -> Self {
        Handle::Mem(r)
    }
}

/* ===================== Composite Views ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceValue {
    /// Backing array object.
    pub base: Handle,
    pub offset: usize,
    pub len: usize,
    pub cap: usize,
}

/// Address of one slot of an object: an array element, a struct field, a
/// block variable or a heap item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerValue {
    pub base: Handle,
    pub index: usize,
}

/* ===================== Functions ===================== */

/// Arguments of a native call, as popped from the value stack.
#[derive(Debug, Clone)]
pub struct NativeCall {
    pub args: Vec<TypedValue>,
    /// The caller spread its last argument with `...`.
    pub varg: bool,
}

/// What a native call hands back to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutcome {
    Return(Vec<TypedValue>),
    /// Raise a language-level panic with this value.
    Panic(TypedValue),
}

/// Body of a builtin implemented in Rust. Runs atomically inside a native
/// call frame.
#[derive(Clone, Copy)]
pub struct NativeFn(pub fn(&mut Machine, NativeCall) -> Result<NativeOutcome, MachineError>);

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncValue {
    pub name: Name,
    pub ty: Arc<FuncType>,
    pub pkg_path: String,
    /// Static block of the function (parameters, results, locals).
    #[serde(default)]
    pub scope: Option<ScopeId>,
    #[serde(default)]
    pub body: Option<Body>,
    /// Name of the builtin this value wraps; the Rust body is rebound on load.
    #[serde(default)]
    pub native_name: Option<String>,
    #[serde(skip)]
    pub native: Option<NativeFn>,
    /// Block the function was declared in.
    #[serde(default)]
    pub closure: Option<Handle>,
    #[serde(default)]
    pub is_method: bool,
}

impl PartialEq for FuncValue {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.pkg_path == other.pkg_path
            && self.native_name == other.native_name
            && self.closure == other.closure
            && self.is_method == other.is_method
            && match (&self.body, &other.body) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
                (None, None) => true,
                _ => false,
            }
    }
}

impl FuncValue {
    pub fn is_native(&self) -> bool {
        self.native_name.is_some()
    }
}

/* ===================== Values ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Nil for reference kinds, or an undefined slot.
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bigint(BigInt),
    Bigdec(BigDecimal),
    /// Array, struct, map, bound method or heap item.
    Object(Handle),
    Slice(SliceValue),
    Pointer(PointerValue),
    Func(Arc<FuncValue>),
    Type(Type),
    Package(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(default)]
    pub t: Option<Type>,
    #[serde(default)]
    pub v: Value,
}

impl TypedValue {
    pub fn new(t: Type, v: Value) -> Self {
        TypedValue { t: Some(t), v }
    }

    /// The undefined value: no type, no value.
    pub fn undefined() -> Self {
        TypedValue::default()
    }

    pub fn is_undefined(&self) -> bool {
        self.t.is_none() && self.v == Value::None
    }

    pub fn bool(b: bool) -> Self {
        Self::new(Type::BOOL, Value::Bool(b))
    }

    pub fn int(i: i64) -> Self {
        Self::new(Type::INT, Value::Int(i))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(Type::STRING, Value::String(s.into()))
    }

    pub fn bigint(i: BigInt) -> Self {
        Self::new(Type::BIGINT, Value::Bigint(i))
    }

    pub fn type_value(t: Type) -> Self {
        Self::new(Type::TypeType, Value::Type(t))
    }

    pub fn func(fv: Arc<FuncValue>) -> Self {
        Self::new(Type::Func(fv.ty.clone()), Value::Func(fv))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.v {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Integer view of any fixed-width integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match &self.v {
            Value::Int(i) => Some(*i),
            Value::Uint(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.v {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Type> {
        match &self.v {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    /// The handle of the object this value directly refers to, if any.
    pub fn handle(&self) -> Option<&Handle> {
        match &self.v {
            Value::Object(h) => Some(h),
            Value::Slice(sv) => Some(&sv.base),
            Value::Pointer(pv) => Some(&pv.base),
            Value::Func(fv) => fv.closure.as_ref(),
            _ => None,
        }
    }

    pub fn handle_mut(&mut self) -> Option<&mut Handle> {
        match &mut self.v {
            Value::Object(h) => Some(h),
            Value::Slice(sv) => Some(&mut sv.base),
            Value::Pointer(pv) => Some(&mut pv.base),
            Value::Func(fv) => Arc::make_mut(fv).closure.as_mut(),
            _ => None,
        }
    }
}

/* ===================== Map Keys ===================== */

/// Hashable image of a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum MapKey {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    /// IEEE bits, with -0 folded into +0.
    Float(u64),
    String(String),
    Big(String),
    Pointer(String),
    Type(String),
    Composite(Vec<MapKey>),
}

impl MapKey {
    pub fn float(f: f64) -> Self {
        let f = if f == 0.0 { 0.0 } else { f };
        MapKey::Float(f.to_bits())
    }
}

/* ===================== Display ===================== */

/// Renders primitive values the way `print` does; composites need the heap
/// and are rendered by the machine.
impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.v {
            Value::None => match &self.t {
                None => write!(f, "undefined"),
                Some(_) => write!(f, "nil"),
            },
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", convert::format_float(*x)),
            Value::String(s) => write!(f, "{}", s),
            Value::Bigint(i) => write!(f, "{}", i),
            Value::Bigdec(d) => write!(f, "{}", d),
            Value::Object(_) => write!(f, "<object>"),
            Value::Slice(sv) => write!(f, "<slice len={}>", sv.len),
            Value::Pointer(_) => write!(f, "<pointer>"),
            Value::Func(fv) => write!(f, "{}", fv.name),
            Value::Type(t) => write!(f, "{}", t),
            Value::Package(path) => write!(f, "package({})", path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined() {
        let tv = TypedValue::undefined();
        assert!(tv.is_undefined());
        assert!(!TypedValue::new(Type::INT, Value::None).is_undefined());
    }

    #[test]
    fn test_map_key_float_zero() {
        assert_eq!(MapKey::float(0.0), MapKey::float(-0.0));
        assert_ne!(MapKey::float(1.0), MapKey::float(2.0));
    }

    #[test]
    fn test_typed_value_serde_shape() {
        let tv = TypedValue::int(5);
        let json = serde_json::to_value(&tv).unwrap();
        assert_eq!(json["v"]["t"], "Int");
        let back: TypedValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, tv);
    }
}
