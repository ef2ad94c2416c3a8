//! Runtime type model
//!
//! Types are cheap to clone (composite shapes sit behind `Arc`). Named types
//! are referenced nominally by `(package path, name)` and looked up in the
//! resolver registry through `TypeLookup`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::values::FuncValue;

/* ===================== Primitive Kinds ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimKind {
    Bool,
    String,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Bigint,
    Bigdec,
    UntypedBool,
    UntypedInt,
    UntypedRune,
    UntypedFloat,
    UntypedString,
    UntypedNil,
}

impl PrimKind {
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimKind::Int | PrimKind::Int8 | PrimKind::Int16 | PrimKind::Int32 | PrimKind::Int64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimKind::Uint | PrimKind::Uint8 | PrimKind::Uint16 | PrimKind::Uint32 | PrimKind::Uint64
        )
    }

    /// Fixed-width integer kinds.
    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimKind::Float32 | PrimKind::Float64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float() || matches!(self, PrimKind::Bigint | PrimKind::Bigdec)
    }

    pub fn is_untyped(self) -> bool {
        matches!(
            self,
            PrimKind::UntypedBool
                | PrimKind::UntypedInt
                | PrimKind::UntypedRune
                | PrimKind::UntypedFloat
                | PrimKind::UntypedString
                | PrimKind::UntypedNil
        )
    }

    /// Bit width of fixed-width integer and float kinds.
    pub fn bits(self) -> u32 {
        match self {
            PrimKind::Int8 | PrimKind::Uint8 => 8,
            PrimKind::Int16 | PrimKind::Uint16 => 16,
            PrimKind::Int32 | PrimKind::Uint32 | PrimKind::Float32 => 32,
            _ => 64,
        }
    }

    /// The kind an untyped constant takes when nothing else constrains it.
    pub fn default_kind(self) -> PrimKind {
        match self {
            PrimKind::UntypedBool => PrimKind::Bool,
            PrimKind::UntypedInt => PrimKind::Int,
            PrimKind::UntypedRune => PrimKind::Int32,
            PrimKind::UntypedFloat => PrimKind::Float64,
            PrimKind::UntypedString => PrimKind::String,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimKind::Bool => "bool",
            PrimKind::String => "string",
            PrimKind::Int => "int",
            PrimKind::Int8 => "int8",
            PrimKind::Int16 => "int16",
            PrimKind::Int32 => "int32",
            PrimKind::Int64 => "int64",
            PrimKind::Uint => "uint",
            PrimKind::Uint8 => "uint8",
            PrimKind::Uint16 => "uint16",
            PrimKind::Uint32 => "uint32",
            PrimKind::Uint64 => "uint64",
            PrimKind::Float32 => "float32",
            PrimKind::Float64 => "float64",
            PrimKind::Bigint => "bigint",
            PrimKind::Bigdec => "bigdec",
            PrimKind::UntypedBool => "untyped bool",
            PrimKind::UntypedInt => "untyped int",
            PrimKind::UntypedRune => "untyped rune",
            PrimKind::UntypedFloat => "untyped float",
            PrimKind::UntypedString => "untyped string",
            PrimKind::UntypedNil => "untyped nil",
        }
    }
}

/* ===================== Types ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Type {
    Prim(PrimKind),
    Array(Arc<ArrayType>),
    Slice(Arc<Type>),
    Map(Arc<MapType>),
    Struct(Arc<StructType>),
    Pointer(Arc<Type>),
    Func(Arc<FuncType>),
    Interface(Arc<InterfaceType>),
    Declared(DeclaredRef),
    /// Result list of a multi-value call; never the type of a stored value.
    Tuple(Arc<Vec<Type>>),
    Package,
    TypeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayType {
    pub len: usize,
    pub elem: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapType {
    pub key: Type,
    pub value: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldType {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    pub fields: Vec<FieldType>,
}

impl StructType {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncType {
    pub params: Vec<FieldType>,
    pub results: Vec<FieldType>,
    #[serde(default)]
    pub variadic: bool,
}

impl FuncType {
    pub fn result_types(&self) -> Vec<Type> {
        self.results.iter().map(|r| r.ty.clone()).collect()
    }

    /// Static type of a call: nothing, the single result, or a tuple.
    pub fn call_type(&self) -> Type {
        match self.results.len() {
            1 => self.results[0].ty.clone(),
            _ => Type::Tuple(Arc::new(self.result_types())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceType {
    pub methods: Vec<FieldType>,
}

/// Nominal reference to a declared (named) type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclaredRef {
    pub pkg_path: String,
    pub name: String,
}

/* ===================== Declared Types ===================== */

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub ptr_receiver: bool,
    /// Signature without the receiver.
    pub ty: Arc<FuncType>,
    /// Bound once the declaring package is initialized.
    pub func: Option<Arc<FuncValue>>,
}

#[derive(Debug, Clone)]
pub struct DeclaredType {
    pub reference: DeclaredRef,
    pub base: Type,
    pub methods: Vec<MethodInfo>,
}

impl DeclaredType {
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Access to declared types, implemented by the resolver registry.
pub trait TypeLookup {
    fn declared(&self, r: &DeclaredRef) -> Option<&DeclaredType>;
}

impl Type {
    pub const BOOL: Type = Type::Prim(PrimKind::Bool);
    pub const STRING: Type = Type::Prim(PrimKind::String);
    pub const INT: Type = Type::Prim(PrimKind::Int);
    pub const INT32: Type = Type::Prim(PrimKind::Int32);
    pub const UINT8: Type = Type::Prim(PrimKind::Uint8);
    pub const FLOAT64: Type = Type::Prim(PrimKind::Float64);
    pub const BIGINT: Type = Type::Prim(PrimKind::Bigint);
    pub const BIGDEC: Type = Type::Prim(PrimKind::Bigdec);

    pub fn empty_interface() -> Type {
        Type::Interface(Arc::new(InterfaceType { methods: vec![] }))
    }

    pub fn slice_of(elem: Type) -> Type {
        Type::Slice(Arc::new(elem))
    }

    pub fn pointer_to(elem: Type) -> Type {
        Type::Pointer(Arc::new(elem))
    }

    pub fn void() -> Type {
        Type::Tuple(Arc::new(Vec::new()))
    }

    /// Strip declared names down to the underlying shape.
    pub fn underlying(&self, types: &dyn TypeLookup) -> Type {
        let mut current = self.clone();
        for _ in 0..64 {
            match &current {
                Type::Declared(r) => match types.declared(r) {
                    Some(dt) => current = dt.base.clone(),
                    None => return current,
                },
                _ => return current,
            }
        }
        current
    }

    pub fn prim_kind(&self, types: &dyn TypeLookup) -> Option<PrimKind> {
        match self.underlying(types) {
            Type::Prim(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_interface(&self, types: &dyn TypeLookup) -> bool {
        matches!(self.underlying(types), Type::Interface(_))
    }

    pub fn is_untyped(&self) -> bool {
        matches!(self, Type::Prim(kind) if kind.is_untyped())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Type::Prim(PrimKind::UntypedNil))
    }

    /// Default type of an untyped constant type; other types are returned as is.
    pub fn defaulted(&self) -> Type {
        match self {
            Type::Prim(kind) if kind.is_untyped() && *kind != PrimKind::UntypedNil => {
                Type::Prim(kind.default_kind())
            }
            other => other.clone(),
        }
    }

    /// Values of this type are copied on store rather than shared.
    pub fn is_value_composite(&self, types: &dyn TypeLookup) -> bool {
        matches!(self.underlying(types), Type::Array(_) | Type::Struct(_))
    }

    /// Element type of arrays, slices, pointers-to-array and strings.
    pub fn elem(&self, types: &dyn TypeLookup) -> Option<Type> {
        match self.underlying(types) {
            Type::Array(at) => Some(at.elem.clone()),
            Type::Slice(elem) => Some((*elem).clone()),
            Type::Map(mt) => Some(mt.value.clone()),
            Type::Pointer(elem) => match elem.underlying(types) {
                Type::Array(at) => Some(at.elem.clone()),
                _ => Some((*elem).clone()),
            },
            Type::Prim(PrimKind::String) | Type::Prim(PrimKind::UntypedString) => Some(Type::UINT8),
            _ => None,
        }
    }

    pub fn declared_ref(&self) -> Option<&DeclaredRef> {
        match self {
            Type::Declared(r) => Some(r),
            _ => None,
        }
    }
}

/* ===================== Display ===================== */

fn fields(items: &[FieldType], sep: &str) -> String {
    items
        .iter()
        .map(|f| {
            if f.name.is_empty() {
                f.ty.to_string()
            } else {
                format!("{} {}", f.name, f.ty)
            }
        })
        .collect::<Vec<_>>()
        .join(sep)
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func({})", fields(&self.params, ", "))?;
        match self.results.len() {
            0 => Ok(()),
            1 if self.results[0].name.is_empty() => write!(f, " {}", self.results[0].ty),
            _ => write!(f, " ({})", fields(&self.results, ", ")),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prim(kind) => write!(f, "{}", kind.name()),
            Type::Array(at) => write!(f, "[{}]{}", at.len, at.elem),
            Type::Slice(elem) => write!(f, "[]{}", elem),
            Type::Map(mt) => write!(f, "map[{}]{}", mt.key, mt.value),
            Type::Struct(st) => write!(f, "struct{{{}}}", fields(&st.fields, "; ")),
            Type::Pointer(elem) => write!(f, "*{}", elem),
            Type::Func(ft) => write!(f, "{}", ft),
            Type::Interface(it) if it.methods.is_empty() => write!(f, "interface{{}}"),
            Type::Interface(it) => {
                let methods: Vec<String> = it
                    .methods
                    .iter()
                    .map(|m| match &m.ty {
                        Type::Func(ft) => format!("{}{}", m.name, ft.to_string().trim_start_matches("func")),
                        other => format!("{} {}", m.name, other),
                    })
                    .collect();
                write!(f, "interface{{{}}}", methods.join("; "))
            }
            Type::Declared(r) => write!(f, "{}", r.name),
            Type::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            Type::Package => write!(f, "package"),
            Type::TypeType => write!(f, "type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Types(BTreeMap<DeclaredRef, DeclaredType>);

    impl TypeLookup for Types {
        fn declared(&self, r: &DeclaredRef) -> Option<&DeclaredType> {
            self.0.get(r)
        }
    }

    fn declared(name: &str, base: Type) -> (DeclaredRef, DeclaredType) {
        let reference = DeclaredRef {
            pkg_path: "test/p".to_string(),
            name: name.to_string(),
        };
        let dt = DeclaredType {
            reference: reference.clone(),
            base,
            methods: vec![],
        };
        (reference, dt)
    }

    #[test]
    fn test_underlying_follows_declared_chain() {
        let (big_ref, big) = declared("Big", Type::BIGINT);
        let (alias_ref, alias) = declared("Amount", Type::Declared(big_ref.clone()));
        let types = Types([(big_ref, big), (alias_ref.clone(), alias)].into_iter().collect());

        let t = Type::Declared(alias_ref);
        assert_eq!(t.underlying(&types), Type::BIGINT);
        assert_eq!(t.prim_kind(&types), Some(PrimKind::Bigint));
    }

    #[test]
    fn test_untyped_defaults() {
        assert_eq!(Type::Prim(PrimKind::UntypedRune).defaulted(), Type::INT32);
        assert_eq!(Type::Prim(PrimKind::UntypedFloat).defaulted(), Type::FLOAT64);
        assert!(Type::Prim(PrimKind::UntypedNil).defaulted().is_nil());
    }

    #[test]
    fn test_display() {
        let t = Type::Map(Arc::new(MapType {
            key: Type::STRING,
            value: Type::slice_of(Type::pointer_to(Type::INT)),
        }));
        assert_eq!(t.to_string(), "map[string][]*int");

        let ft = FuncType {
            params: vec![FieldType { name: "x".into(), ty: Type::INT }],
            results: vec![FieldType { name: String::new(), ty: Type::BOOL }],
            variadic: false,
        };
        assert_eq!(ft.to_string(), "func(x int) bool");
    }
}
