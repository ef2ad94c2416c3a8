//! The Uverse: root scope of builtin names
//!
//! Built once per process and read-only afterwards. Holds the predeclared
//! types, the untyped constants `true`, `false` and `nil`, and the builtin
//! functions, whose bodies come from the machine's native table.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::ast::Name;
use crate::machine::stdlib::BUILTINS;
use crate::types::{DeclaredRef, DeclaredType, FieldType, FuncType, InterfaceType, PrimKind, Type, TypeLookup};
use crate::values::{FuncValue, TypedValue, Value};

pub struct Uverse {
    names: Vec<Name>,
    values: Vec<TypedValue>,
    consts: Vec<bool>,
    declared: BTreeMap<DeclaredRef, DeclaredType>,
}

static UVERSE: OnceLock<Uverse> = OnceLock::new();

pub fn uverse() -> &'static Uverse {
    UVERSE.get_or_init(Uverse::build)
}

/// The predeclared `error` interface.
pub fn error_ref() -> DeclaredRef {
    DeclaredRef {
        pkg_path: String::new(),
        name: "error".to_string(),
    }
}

pub fn error_type() -> Type {
    Type::Declared(error_ref())
}

/// Signature shared by all builtins; calls to them are typed by name.
fn builtin_type() -> Arc<FuncType> {
    Arc::new(FuncType {
        params: vec![FieldType {
            name: "args".to_string(),
            ty: Type::slice_of(Type::empty_interface()),
        }],
        results: vec![],
        variadic: true,
    })
}

impl Uverse {
    fn build() -> Uverse {
        let mut u = Uverse {
            names: Vec::new(),
            values: Vec::new(),
            consts: Vec::new(),
            declared: BTreeMap::new(),
        };

        let prims = [
            ("bool", PrimKind::Bool),
            ("string", PrimKind::String),
            ("int", PrimKind::Int),
            ("int8", PrimKind::Int8),
            ("int16", PrimKind::Int16),
            ("int32", PrimKind::Int32),
            ("int64", PrimKind::Int64),
            ("uint", PrimKind::Uint),
            ("uint8", PrimKind::Uint8),
            ("uint16", PrimKind::Uint16),
            ("uint32", PrimKind::Uint32),
            ("uint64", PrimKind::Uint64),
            ("byte", PrimKind::Uint8),
            ("rune", PrimKind::Int32),
            ("float32", PrimKind::Float32),
            ("float64", PrimKind::Float64),
            ("bigint", PrimKind::Bigint),
            ("bigdec", PrimKind::Bigdec),
        ];
        for (name, kind) in prims {
            u.define(name, TypedValue::type_value(Type::Prim(kind)), false);
        }

        let error = DeclaredType {
            reference: error_ref(),
            base: Type::Interface(Arc::new(InterfaceType {
                methods: vec![FieldType {
                    name: "Error".to_string(),
                    ty: Type::Func(Arc::new(FuncType {
                        params: vec![],
                        results: vec![FieldType {
                            name: String::new(),
                            ty: Type::STRING,
                        }],
                        variadic: false,
                    })),
                }],
            })),
            methods: vec![],
        };
        u.declared.insert(error_ref(), error);
        u.define("error", TypedValue::type_value(error_type()), false);

        let untyped_bool = Type::Prim(PrimKind::UntypedBool);
        u.define("true", TypedValue::new(untyped_bool.clone(), Value::Bool(true)), true);
        u.define("false", TypedValue::new(untyped_bool, Value::Bool(false)), true);
        u.define("nil", TypedValue::new(Type::Prim(PrimKind::UntypedNil), Value::None), true);

        let ty = builtin_type();
        for (name, native) in BUILTINS {
            let fv = FuncValue {
                name: name.to_string(),
                ty: ty.clone(),
                pkg_path: String::new(),
                scope: None,
                body: None,
                native_name: Some(name.to_string()),
                native: Some(*native),
                closure: None,
                is_method: false,
            };
            u.define(name, TypedValue::func(Arc::new(fv)), false);
        }
        u
    }

    fn define(&mut self, name: &str, value: TypedValue, is_const: bool) {
        self.names.push(name.to_string());
        self.values.push(value);
        self.consts.push(is_const);
    }

    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.names.iter().position(|n| n == name).map(|i| i as u16)
    }

    pub fn value(&self, index: u16) -> Option<&TypedValue> {
        self.values.get(index as usize)
    }

    pub fn is_const(&self, index: u16) -> bool {
        self.consts.get(index as usize).copied().unwrap_or(false)
    }

    /// Name of the builtin function at `index`, if it is one.
    pub fn builtin_name(&self, index: u16) -> Option<&str> {
        match self.value(index).map(|tv| &tv.v) {
            Some(Value::Func(fv)) => fv.native_name.as_deref(),
            _ => None,
        }
    }
}

impl TypeLookup for Uverse {
    fn declared(&self, r: &DeclaredRef) -> Option<&DeclaredType> {
        self.declared.get(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predeclared_names() {
        let u = uverse();
        let byte = u.index_of("byte").unwrap();
        assert_eq!(u.value(byte).unwrap().as_type(), Some(&Type::UINT8));

        let nil = u.index_of("nil").unwrap();
        assert!(u.is_const(nil));
        assert!(u.value(nil).unwrap().t.as_ref().unwrap().is_nil());

        let len = u.index_of("len").unwrap();
        assert_eq!(u.builtin_name(len), Some("len"));
        assert!(!u.is_const(len));
        assert!(u.index_of("undefined_name").is_none());
    }

    #[test]
    fn test_error_is_an_interface() {
        assert!(error_type().is_interface(uverse()));
    }
}
