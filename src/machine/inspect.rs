//! Value inspection: equality, map keys, interface checks, conversions and
//! the text form used by `print` and panic descriptors.

use std::sync::Arc;

use super::operators::prim_equal;
use super::vm::{Machine, Result};
use crate::errors::MachineError;
use crate::heap::{ObjectKind, ObjectRef};
use crate::types::{DeclaredRef, PrimKind, Type, TypeLookup};
use crate::values::convert::convert_prim;
use crate::values::{FuncValue, Handle, MapKey, SliceValue, TypedValue, Value};

/// Nesting beyond this depth prints as `...`.
const MAX_PRINT_DEPTH: usize = 8;

impl Machine {
    /* ===================== Equality ===================== */

    /// `==` on two values of comparable types.
    pub fn values_equal(&mut self, l: &TypedValue, r: &TypedValue) -> Result<bool> {
        if l.v == Value::None && r.v == Value::None {
            return Ok(l.t.is_some() == r.t.is_some());
        }
        if l.t != r.t {
            return Ok(false);
        }
        match (&l.v, &r.v) {
            (Value::Object(a), Value::Object(b)) => {
                let a = self.resolve_handle(a)?;
                let b = self.resolve_handle(b)?;
                if a == b {
                    return Ok(true);
                }
                let (la, lb) = match (&self.heap.obj(a)?.kind, &self.heap.obj(b)?.kind) {
                    (ObjectKind::Array { elems: x }, ObjectKind::Array { elems: y })
                    | (ObjectKind::Struct { fields: x }, ObjectKind::Struct { fields: y }) => (x.len(), y.len()),
                    // Maps and bound methods compare by identity.
                    _ => return Ok(false),
                };
                if la != lb {
                    return Ok(false);
                }
                for i in 0..la {
                    let x = self.read_slot(a, i)?;
                    let y = self.read_slot(b, i)?;
                    if !self.values_equal(&x, &y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Pointer(a), Value::Pointer(b)) => {
                let ba = self.resolve_handle(&a.base)?;
                let bb = self.resolve_handle(&b.base)?;
                Ok(ba == bb && a.index == b.index)
            }
            (Value::Type(a), Value::Type(b)) => Ok(a == b),
            (Value::Package(a), Value::Package(b)) => Ok(a == b),
            (Value::Slice(_), _) | (Value::Func(_), _) => Err(MachineError::Runtime(format!(
                "comparing uncomparable type {}",
                type_name(&l.t)
            ))),
            (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => {
                prim_equal(a, b).map_err(|e| MachineError::internal(e.to_string()))
            }
            _ => Ok(false),
        }
    }

    /* ===================== Map Keys ===================== */

    /// Hashable image of a map key. Keys of different dynamic types never
    /// collide because the type is folded into composite keys.
    pub fn map_key(&mut self, key: &TypedValue) -> Result<MapKey> {
        let hk = match &key.v {
            Value::None => MapKey::Nil,
            Value::Bool(b) => MapKey::Bool(*b),
            Value::Int(i) => MapKey::Int(*i),
            Value::Uint(u) => MapKey::Uint(*u),
            Value::Float(f) => MapKey::float(*f),
            Value::String(s) => MapKey::String(s.clone()),
            Value::Bigint(b) => MapKey::Big(b.to_string()),
            Value::Bigdec(d) => MapKey::Big(d.normalized().to_string()),
            Value::Type(t) => MapKey::Type(t.to_string()),
            Value::Package(p) => MapKey::String(p.clone()),
            Value::Pointer(pv) => {
                let base = self.resolve_handle(&pv.base)?;
                let id = self.heap.obj(base)?.info.id;
                let at = if id.is_zero() { format!("{:?}", base) } else { id.to_string() };
                MapKey::Pointer(format!("{}:{}", at, pv.index))
            }
            Value::Object(h) => {
                let r = self.resolve_handle(h)?;
                let n = match &self.heap.obj(r)?.kind {
                    ObjectKind::Array { elems } => elems.len(),
                    ObjectKind::Struct { fields } => fields.len(),
                    other => {
                        return Err(MachineError::Runtime(format!("hash of unhashable type {}", other.name())));
                    }
                };
                let mut parts = Vec::with_capacity(n + 1);
                parts.push(MapKey::Type(type_name(&key.t)));
                for i in 0..n {
                    let child = self.read_slot(r, i)?;
                    parts.push(self.map_key(&child)?);
                }
                MapKey::Composite(parts)
            }
            Value::Slice(_) | Value::Func(_) => {
                return Err(MachineError::Runtime(format!(
                    "hash of unhashable type {}",
                    type_name(&key.t)
                )));
            }
        };
        // Interface-keyed maps may mix dynamic types holding equal payloads.
        match (&key.t, &hk) {
            (Some(Type::Declared(r)), MapKey::Int(_) | MapKey::Uint(_) | MapKey::String(_) | MapKey::Bool(_)) => {
                Ok(MapKey::Composite(vec![MapKey::Type(r.name.clone()), hk]))
            }
            _ => Ok(hk),
        }
    }

    /* ===================== Interfaces ===================== */

    /// The function bound to method `index` of declared type `r`.
    pub fn method_func(&self, r: &DeclaredRef, index: usize) -> Result<Arc<FuncValue>> {
        self.registry
            .declared(r)
            .and_then(|dt| dt.methods.get(index))
            .and_then(|m| m.func.clone())
            .ok_or_else(|| MachineError::internal(format!("method {} of {} is not bound", index, r.name)))
    }

    /// Method `name` in the method set of dynamic type `t`, with whether it
    /// takes a pointer receiver.
    pub fn method_by_name(&self, t: &Type, name: &str) -> Option<(Arc<FuncValue>, bool)> {
        let (r, is_ptr) = match t {
            Type::Declared(r) => (r, false),
            Type::Pointer(elem) => (elem.declared_ref()?, true),
            _ => return None,
        };
        let m = self.registry.declared(r)?.method(name)?;
        if m.ptr_receiver && !is_ptr {
            return None;
        }
        Some((m.func.clone()?, m.ptr_receiver))
    }

    /// Whether dynamic type `t` has every method of interface `iface`.
    pub fn implements(&self, t: &Type, iface: &Type) -> bool {
        let Type::Interface(it) = iface.underlying(&self.registry) else {
            return false;
        };
        it.methods.iter().all(|m| self.method_by_name(t, &m.name).is_some())
    }

    /// Outcome of `x.(T)`.
    pub fn assert_type(&self, x: &TypedValue, target: &Type) -> bool {
        let Some(dynamic) = &x.t else {
            return false;
        };
        if target.is_interface(&self.registry) {
            return self.implements(dynamic, target);
        }
        dynamic == target
    }

    /* ===================== Conversion ===================== */

    /// `T(x)` at runtime.
    pub fn convert_value(&mut self, x: TypedValue, target: &Type) -> Result<TypedValue> {
        let under = target.underlying(&self.registry);
        match (&under, &x.v) {
            (Type::Interface(_), _) => Ok(x),
            (_, Value::None) => Ok(TypedValue {
                t: Some(target.clone()),
                v: Value::None,
            }),
            (Type::Prim(k), Value::Slice(sv)) if k.default_kind() == PrimKind::String => {
                let elems = self.slice_elems(sv)?;
                let text = match x.t.as_ref().and_then(|t| t.elem(&self.registry)).and_then(|t| t.prim_kind(&self.registry)) {
                    Some(PrimKind::Int32) => elems
                        .iter()
                        .map(|e| {
                            e.as_i64()
                                .and_then(|c| u32::try_from(c).ok())
                                .and_then(char::from_u32)
                                .unwrap_or('\u{FFFD}')
                        })
                        .collect(),
                    _ => {
                        let bytes: Vec<u8> = elems.iter().map(|e| e.as_i64().unwrap_or(0) as u8).collect();
                        String::from_utf8_lossy(&bytes).into_owned()
                    }
                };
                Ok(TypedValue::new(target.clone(), Value::String(text)))
            }
            (Type::Slice(elem), Value::String(s)) => {
                let elems: Vec<TypedValue> = match elem.prim_kind(&self.registry) {
                    Some(PrimKind::Int32) => s
                        .chars()
                        .map(|c| TypedValue::new((**elem).clone(), Value::Int(c as i64)))
                        .collect(),
                    _ => s
                        .bytes()
                        .map(|b| TypedValue::new((**elem).clone(), Value::Uint(b as u64)))
                        .collect(),
                };
                self.new_slice(target.clone(), elems)
            }
            (Type::Prim(k), v) if !matches!(v, Value::Object(_) | Value::Pointer(_) | Value::Func(_)) => {
                let converted = convert_prim(v, *k).ok_or_else(|| {
                    MachineError::internal(format!("cannot convert {} to {}", type_name(&x.t), target))
                })?;
                Ok(TypedValue::new(target.clone(), converted))
            }
            _ => Ok(TypedValue {
                t: Some(target.clone()),
                v: x.v,
            }),
        }
    }

    /// A slice over a fresh backing array; nil when `elems` is empty.
    pub fn new_slice(&mut self, t: Type, elems: Vec<TypedValue>) -> Result<TypedValue> {
        if elems.is_empty() {
            return Ok(TypedValue { t: Some(t), v: Value::None });
        }
        let len = elems.len();
        let base = self.heap.alloc(ObjectKind::Array { elems })?;
        Ok(TypedValue::new(
            t,
            Value::Slice(SliceValue {
                base: Handle::Mem(base),
                offset: 0,
                len,
                cap: len,
            }),
        ))
    }

    /// Copy out the elements a slice currently covers.
    pub fn slice_elems(&mut self, sv: &SliceValue) -> Result<Vec<TypedValue>> {
        let base = self.resolve_handle(&sv.base)?;
        (sv.offset..sv.offset + sv.len).map(|i| self.read_slot(base, i)).collect()
    }

    /* ===================== Printing ===================== */

    /// Text form of a value as `print` shows it.
    pub fn sprint(&mut self, tv: &TypedValue) -> Result<String> {
        let mut out = String::new();
        self.sprint_into(tv, 0, &mut out)?;
        Ok(out)
    }

    fn sprint_into(&mut self, tv: &TypedValue, depth: usize, out: &mut String) -> Result<()> {
        if depth > MAX_PRINT_DEPTH {
            out.push_str("...");
            return Ok(());
        }
        match &tv.v {
            Value::Object(h) => {
                let r = self.resolve_handle(h)?;
                self.sprint_object(r, depth, out)
            }
            Value::Slice(sv) => {
                let elems = self.slice_elems(sv)?;
                self.sprint_list(&elems, "[", "]", depth, out)
            }
            Value::Pointer(pv) => {
                let base = self.resolve_handle(&pv.base)?;
                let target = self.read_slot(base, pv.index)?;
                out.push('&');
                self.sprint_into(&target, depth + 1, out)
            }
            _ => {
                out.push_str(&tv.to_string());
                Ok(())
            }
        }
    }

    fn sprint_object(&mut self, r: ObjectRef, depth: usize, out: &mut String) -> Result<()> {
        let kind = self.heap.obj(r)?.kind.clone();
        match kind {
            ObjectKind::Array { elems } => self.sprint_list(&elems, "[", "]", depth, out),
            ObjectKind::Struct { fields } => self.sprint_list(&fields, "{", "}", depth, out),
            ObjectKind::Map { map } => {
                out.push_str("map[");
                for i in 0..map.len() {
                    let Some((k, v)) = map.entry_at(i) else { break };
                    let (k, v) = (self.fill(k.clone())?, self.fill(v.clone())?);
                    if i > 0 {
                        out.push(' ');
                    }
                    self.sprint_into(&k, depth + 1, out)?;
                    out.push(':');
                    self.sprint_into(&v, depth + 1, out)?;
                }
                out.push(']');
                Ok(())
            }
            ObjectKind::HeapItem { value } => {
                let value = self.fill(value)?;
                self.sprint_into(&value, depth + 1, out)
            }
            ObjectKind::BoundMethod { func, .. } => {
                out.push_str(&func.name);
                Ok(())
            }
            ObjectKind::Block { .. } => {
                out.push_str("<block>");
                Ok(())
            }
        }
    }

    fn sprint_list(&mut self, items: &[TypedValue], open: &str, close: &str, depth: usize, out: &mut String) -> Result<()> {
        out.push_str(open);
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let item = self.fill(item.clone())?;
            self.sprint_into(&item, depth + 1, out)?;
        }
        out.push_str(close);
        Ok(())
    }
}

/// Name of a dynamic type for messages; `interface {}` when absent.
pub fn type_name(t: &Option<Type>) -> String {
    match t {
        Some(t) => t.to_string(),
        None => "interface {}".to_string(),
    }
}
