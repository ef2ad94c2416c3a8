//! Expression evaluation
//!
//! `Eval` pops one expression and either pushes its value directly (names,
//! constants, closures) or schedules its operands followed by the op that
//! combines them. `EvalSlot` does the same for assignment targets, leaving a
//! `Slot` on the slot stack.

use std::sync::Arc;

use super::calls::push_call;
use super::operators::{binary_prim, compare_prim, shift_count, shift_prim, unary_prim, OpError};
use super::types::{Op, Slot};
use super::vm::{Machine, Result};
use crate::ast::{BinaryOp, Expr, PathKind, UnaryOp, ValuePath};
use crate::errors::MachineError;
use crate::heap::{MapData, ObjectKind, ObjectRef};
use crate::resolver::uverse::uverse;
use crate::types::{PrimKind, Type};
use crate::values::{FuncValue, Handle, PointerValue, SliceValue, TypedValue, Value};

const NIL_DEREF: &str = "invalid memory address or nil pointer dereference";

fn nil_deref() -> MachineError {
    MachineError::Runtime(NIL_DEREF.to_string())
}

fn op_error(err: OpError) -> MachineError {
    match err {
        OpError::DivideByZero => MachineError::Runtime("integer divide by zero".to_string()),
        OpError::NegativeShift => MachineError::Runtime("negative shift amount".to_string()),
        OpError::NotImplemented(what) => MachineError::NotImplemented(what),
        OpError::Mismatch(msg) => MachineError::internal(msg),
    }
}

fn index_error(i: i64, len: usize) -> MachineError {
    MachineError::Runtime(format!("index out of range [{}] with length {}", i, len))
}

fn as_index(tv: &TypedValue) -> Result<i64> {
    match &tv.v {
        Value::Int(i) => Ok(*i),
        Value::Uint(u) => Ok(i64::try_from(*u).unwrap_or(i64::MAX)),
        other => Err(MachineError::internal(format!("index of kind {:?}", other))),
    }
}

fn checked_index(i: i64, len: usize) -> Result<usize> {
    usize::try_from(i)
        .ok()
        .filter(|&u| u < len)
        .ok_or_else(|| index_error(i, len))
}

/* ===================== Eval ===================== */

pub(super) fn execute_eval(m: &mut Machine) -> Result<()> {
    let x = m
        .exprs
        .pop()
        .ok_or_else(|| MachineError::internal("expression stack underflow"))?;
    match x {
        Expr::Name(nx) => {
            let v = m.eval_name(&nx.path)?;
            m.push_value(v);
        }
        Expr::Const(cx) => m.push_value(cx.value),
        Expr::Type(tx) => {
            let t = tx
                .resolved
                .ok_or_else(|| MachineError::internal("unresolved type expression"))?;
            m.push_value(TypedValue::type_value(t));
        }
        Expr::BasicLit(lit) => {
            return Err(MachineError::internal(format!("unresolved literal {}", lit.value)));
        }
        Expr::Binary(bx) => match bx.op {
            BinaryOp::LAnd | BinaryOp::LOr => {
                m.exprs.push(*bx.right);
                m.push_op(Op::ShortCircuit { op: bx.op });
                m.push_eval(*bx.left);
            }
            op => {
                m.push_op(Op::Binary { op });
                m.push_eval(*bx.right);
                m.push_eval(*bx.left);
            }
        },
        Expr::Unary(ux) => {
            if ux.op == UnaryOp::Arrow {
                return Err(MachineError::NotImplemented("channel receive"));
            }
            m.push_op(Op::Unary { op: ux.op });
            m.push_eval(*ux.x);
        }
        Expr::Call(cx) => push_call(m, cx, false),
        Expr::Index(ix) => {
            m.push_op(Op::Index { has_ok: ix.has_ok });
            m.push_eval(*ix.index);
            m.push_eval(*ix.x);
        }
        Expr::Selector(sx) => {
            if let Some(pkg) = package_of(&sx.x) {
                let v = m.read_package_member(&pkg, sx.path.index as usize)?;
                m.push_value(v);
            } else {
                m.push_op(Op::Selector { path: sx.path });
                m.push_eval(*sx.x);
            }
        }
        Expr::Slice(sx) => {
            m.push_op(Op::Slice {
                low: sx.low.is_some(),
                high: sx.high.is_some(),
                max: sx.max.is_some(),
            });
            for bound in [sx.max, sx.high, sx.low].into_iter().flatten() {
                m.push_eval(*bound);
            }
            m.push_eval(*sx.x);
        }
        Expr::Star(sx) => {
            m.push_op(Op::Deref);
            m.push_eval(*sx.x);
        }
        Expr::Ref(rx) => match *rx.x {
            Expr::CompositeLit(cl) => {
                m.push_op(Op::Box);
                m.push_eval(Expr::CompositeLit(cl));
            }
            x => {
                m.push_op(Op::AddrOf);
                m.push_eval_slot(x);
            }
        },
        Expr::TypeAssert(ta) => {
            let ty = ta
                .resolved
                .ok_or_else(|| MachineError::internal("unresolved type assertion"))?;
            m.push_op(Op::TypeAssert { ty, has_ok: ta.has_ok });
            m.push_eval(*ta.x);
        }
        Expr::CompositeLit(cl) => {
            let ty = cl
                .resolved
                .ok_or_else(|| MachineError::internal("unresolved composite literal"))?;
            let is_map = matches!(ty.underlying(&m.registry), Type::Map(_));
            let slots = cl.elts.iter().map(|kv| kv.slot).collect();
            m.push_op(Op::Composite { ty, slots });
            for kv in cl.elts.into_iter().rev() {
                m.push_eval(kv.value);
                if is_map {
                    let key = kv
                        .key
                        .ok_or_else(|| MachineError::internal("map literal element without key"))?;
                    m.push_eval(key);
                }
            }
        }
        Expr::FuncLit(fl) => {
            let ty = match fl.resolved {
                Some(Type::Func(ft)) => ft,
                _ => return Err(MachineError::internal("unresolved func literal")),
            };
            let block = m.current_block()?;
            m.capture_block(block)?;
            let fv = FuncValue {
                name: "func literal".to_string(),
                ty,
                pkg_path: m.package.clone().unwrap_or_default(),
                scope: fl.scope,
                body: Some(fl.body),
                native_name: None,
                native: None,
                closure: Some(Handle::Mem(block)),
                is_method: false,
            };
            m.push_value(TypedValue::func(Arc::new(fv)));
        }
    }
    Ok(())
}

fn package_of(x: &Expr) -> Option<String> {
    match x {
        Expr::Const(cx) => match &cx.value.v {
            Value::Package(path) => Some(path.clone()),
            _ => None,
        },
        _ => None,
    }
}

impl Machine {
    pub fn eval_name(&mut self, path: &ValuePath) -> Result<TypedValue> {
        match path.kind {
            PathKind::Uverse => uverse()
                .value(path.index)
                .cloned()
                .ok_or_else(|| MachineError::internal(format!("no builtin at {}", path))),
            PathKind::Block if path.is_blank() => Err(MachineError::internal("cannot use _ as value")),
            PathKind::Block => {
                let block = self.block_at_depth(path.depth)?;
                self.read_slot(block, path.index as usize)
            }
            other => Err(MachineError::internal(format!("{:?} path for a name", other))),
        }
    }

    fn package_block(&self, pkg: &str) -> Result<ObjectRef> {
        self.packages
            .get(pkg)
            .map(|p| p.block)
            .ok_or_else(|| MachineError::internal(format!("package {} is not loaded", pkg)))
    }

    pub fn read_package_member(&mut self, pkg: &str, index: usize) -> Result<TypedValue> {
        let block = self.package_block(pkg)?;
        self.read_slot(block, index)
    }

    /// Value a pointer points at.
    pub fn deref(&mut self, ptr: &TypedValue) -> Result<TypedValue> {
        match &ptr.v {
            Value::Pointer(pv) => {
                let base = self.resolve_handle(&pv.base)?;
                self.read_slot(base, pv.index)
            }
            Value::None => Err(nil_deref()),
            other => Err(MachineError::internal(format!("dereference of {:?}", other))),
        }
    }

    fn pointer_slot(&mut self, ptr: &TypedValue) -> Result<(ObjectRef, usize)> {
        match &ptr.v {
            Value::Pointer(pv) => Ok((self.resolve_handle(&pv.base)?, pv.index)),
            Value::None => Err(nil_deref()),
            other => Err(MachineError::internal(format!("dereference of {:?}", other))),
        }
    }

    /// The struct object behind a struct value or, for `deref`, a pointer.
    fn struct_object(&mut self, x: &TypedValue, deref: bool) -> Result<ObjectRef> {
        let value = if deref { self.deref(x)? } else { x.clone() };
        match &value.v {
            Value::Object(h) => self.resolve_handle(h),
            Value::None => Err(nil_deref()),
            other => Err(MachineError::internal(format!("field of {:?}", other))),
        }
    }

    /// Static type of slot `index` of `base`, for typing `&x`.
    fn slot_type(&mut self, base: ObjectRef, index: usize) -> Result<Option<Type>> {
        if let ObjectKind::Block { scope, .. } = &self.heap.obj(base)?.kind {
            let scope = *scope;
            let sb = self.registry.must_scope(scope)?;
            return Ok(sb.type_at(index as u16).cloned());
        }
        Ok(self.read_slot(base, index)?.t)
    }
}

/* ===================== Slots ===================== */

pub(super) fn execute_eval_slot(m: &mut Machine) -> Result<()> {
    let x = m
        .exprs
        .pop()
        .ok_or_else(|| MachineError::internal("expression stack underflow"))?;
    match x {
        Expr::Name(nx) if nx.path.is_blank() => m.slots.push(Slot::Discard),
        Expr::Name(nx) => {
            let base = m.block_at_depth(nx.path.depth)?;
            m.slots.push(Slot::Pointer {
                base,
                index: nx.path.index as usize,
            });
        }
        Expr::Index(ix) => {
            m.push_op(Op::IndexSlot);
            m.push_eval(*ix.index);
            m.push_eval(*ix.x);
        }
        Expr::Selector(sx) => {
            if let Some(pkg) = package_of(&sx.x) {
                let base = m.package_block(&pkg)?;
                m.slots.push(Slot::Pointer {
                    base,
                    index: sx.path.index as usize,
                });
            } else {
                m.push_op(Op::SelectorSlot { path: sx.path });
                m.push_eval(*sx.x);
            }
        }
        Expr::Star(sx) => {
            m.push_op(Op::DerefSlot);
            m.push_eval(*sx.x);
        }
        other => return Err(MachineError::internal(format!("{} is not addressable", other))),
    }
    Ok(())
}

pub(super) fn execute_index_slot(m: &mut Machine) -> Result<()> {
    let index = m.pop_value()?;
    let x = m.pop_value()?;
    let slot = match &x.v {
        Value::Object(h) => {
            let base = m.resolve_handle(h)?;
            match &m.heap.obj(base)?.kind {
                ObjectKind::Array { elems } => {
                    let i = checked_index(as_index(&index)?, elems.len())?;
                    Slot::Pointer { base, index: i }
                }
                ObjectKind::Map { .. } => {
                    let elem = map_elem_type(m, &x.t)?;
                    Slot::MapEntry {
                        map: base,
                        key: index,
                        elem,
                    }
                }
                other => return Err(MachineError::internal(format!("index of {}", other.name()))),
            }
        }
        Value::Slice(sv) => {
            let i = checked_index(as_index(&index)?, sv.len)?;
            Slot::Pointer {
                base: m.resolve_handle(&sv.base)?,
                index: sv.offset + i,
            }
        }
        Value::Pointer(_) => {
            let array = m.deref(&x)?;
            m.push_value(array);
            m.push_value(index);
            return execute_index_slot(m);
        }
        Value::None => {
            if matches!(x.t.as_ref().map(|t| t.underlying(&m.registry)), Some(Type::Map(_))) {
                return Err(MachineError::Runtime("assignment to entry in nil map".to_string()));
            }
            return Err(index_error(as_index(&index)?, 0));
        }
        other => return Err(MachineError::internal(format!("cannot assign into {:?}", other))),
    };
    m.slots.push(slot);
    Ok(())
}

fn map_elem_type(m: &Machine, t: &Option<Type>) -> Result<Type> {
    match t.as_ref().map(|t| t.underlying(&m.registry)) {
        Some(Type::Map(mt)) => Ok(mt.value.clone()),
        _ => Err(MachineError::internal("map value without a map type")),
    }
}

pub(super) fn execute_selector_slot(m: &mut Machine, path: ValuePath) -> Result<()> {
    let x = m.pop_value()?;
    let base = match path.kind {
        PathKind::Field => m.struct_object(&x, false)?,
        PathKind::DerefField => m.struct_object(&x, true)?,
        other => return Err(MachineError::internal(format!("cannot assign to {:?} selector", other))),
    };
    m.slots.push(Slot::Pointer {
        base,
        index: path.index as usize,
    });
    Ok(())
}

pub(super) fn execute_deref_slot(m: &mut Machine) -> Result<()> {
    let ptr = m.pop_value()?;
    let (base, index) = m.pointer_slot(&ptr)?;
    m.slots.push(Slot::Pointer { base, index });
    Ok(())
}

pub(super) fn execute_addr_of(m: &mut Machine) -> Result<()> {
    let (base, index) = match m.pop_slot()? {
        Slot::Pointer { base, index } => (base, index),
        other => return Err(MachineError::internal(format!("cannot take the address of {:?}", other))),
    };
    if matches!(m.heap.obj(base)?.kind, ObjectKind::Block { .. }) {
        m.capture_block(base)?;
    }
    let t = m.slot_type(base, index)?.unwrap_or_else(Type::empty_interface);
    m.push_value(TypedValue::new(
        Type::pointer_to(t),
        Value::Pointer(PointerValue {
            base: Handle::Mem(base),
            index,
        }),
    ));
    Ok(())
}

pub(super) fn execute_box(m: &mut Machine) -> Result<()> {
    let v = m.pop_value()?;
    let t = v.t.clone().unwrap_or_else(Type::empty_interface);
    let value = m.copy_value(v)?;
    let item = m.heap.alloc(ObjectKind::HeapItem { value })?;
    m.push_value(TypedValue::new(
        Type::pointer_to(t),
        Value::Pointer(PointerValue {
            base: Handle::Mem(item),
            index: 0,
        }),
    ));
    Ok(())
}

/* ===================== Operators ===================== */

fn prim_kind_of(m: &Machine, tv: &TypedValue) -> Result<PrimKind> {
    tv.t
        .as_ref()
        .and_then(|t| t.prim_kind(&m.registry))
        .ok_or_else(|| MachineError::internal(format!("operand {} is not primitive", tv)))
}

/// `l op r`; also used by op-assignment.
pub(super) fn binary_values(m: &mut Machine, op: BinaryOp, mut l: TypedValue, r: TypedValue) -> Result<TypedValue> {
    match op {
        BinaryOp::Eql => return Ok(TypedValue::bool(m.values_equal(&l, &r)?)),
        BinaryOp::Neq => return Ok(TypedValue::bool(!m.values_equal(&l, &r)?)),
        _ if op.is_comparison() => {
            let b = compare_prim(op, &l.v, &r.v).map_err(op_error)?;
            return Ok(TypedValue::bool(b));
        }
        _ => {}
    }
    let kind = prim_kind_of(m, &l)?;
    if op.is_shift() {
        let n = shift_count(&r.v).map_err(op_error)?;
        shift_prim(op, kind, &mut l.v, n).map_err(op_error)?;
    } else {
        binary_prim(op, kind, &mut l.v, &r.v).map_err(op_error)?;
    }
    Ok(l)
}

pub(super) fn execute_binary(m: &mut Machine, op: BinaryOp) -> Result<()> {
    let r = m.pop_value()?;
    let l = m.pop_value()?;
    let v = binary_values(m, op, l, r)?;
    m.push_value(v);
    Ok(())
}

pub(super) fn execute_short_circuit(m: &mut Machine, op: BinaryOp) -> Result<()> {
    let right = m
        .exprs
        .pop()
        .ok_or_else(|| MachineError::internal("expression stack underflow"))?;
    let l = m.pop_value()?;
    let b = l
        .as_bool()
        .ok_or_else(|| MachineError::internal("non-bool operand of a logical operator"))?;
    if (op == BinaryOp::LAnd && !b) || (op == BinaryOp::LOr && b) {
        m.push_value(l);
    } else {
        m.push_eval(right);
    }
    Ok(())
}

pub(super) fn execute_unary(m: &mut Machine, op: UnaryOp) -> Result<()> {
    let mut x = m.pop_value()?;
    let kind = prim_kind_of(m, &x)?;
    unary_prim(op, kind, &mut x.v).map_err(op_error)?;
    m.push_value(x);
    Ok(())
}

/* ===================== Indexing and Selection ===================== */

pub(super) fn execute_index(m: &mut Machine, has_ok: bool) -> Result<()> {
    let index = m.pop_value()?;
    let x = m.pop_value()?;
    match &x.v {
        Value::String(s) => {
            let i = checked_index(as_index(&index)?, s.len())?;
            m.push_value(TypedValue::new(Type::UINT8, Value::Uint(s.as_bytes()[i] as u64)));
        }
        Value::Slice(sv) => {
            let i = checked_index(as_index(&index)?, sv.len)?;
            let base = m.resolve_handle(&sv.base)?;
            let v = m.read_slot(base, sv.offset + i)?;
            m.push_value(v);
        }
        Value::Pointer(_) => {
            let array = m.deref(&x)?;
            m.push_value(array);
            m.push_value(index);
            return execute_index(m, has_ok);
        }
        Value::Object(h) => {
            let r = m.resolve_handle(h)?;
            let len = match &m.heap.obj(r)?.kind {
                ObjectKind::Array { elems } => Some(elems.len()),
                ObjectKind::Map { .. } => None,
                other => return Err(MachineError::internal(format!("index of {}", other.name()))),
            };
            match len {
                Some(len) => {
                    let i = checked_index(as_index(&index)?, len)?;
                    let v = m.read_slot(r, i)?;
                    m.push_value(v);
                }
                None => {
                    let elem = map_elem_type(m, &x.t)?;
                    let hk = m.map_key(&index)?;
                    let found = match &m.heap.obj(r)?.kind {
                        ObjectKind::Map { map } => map.get(&hk).cloned(),
                        _ => None,
                    };
                    push_map_lookup(m, found, &elem, has_ok)?;
                }
            }
        }
        Value::None => match x.t.as_ref().map(|t| t.underlying(&m.registry)) {
            Some(Type::Map(mt)) => push_map_lookup(m, None, &mt.value, has_ok)?,
            _ => return Err(index_error(as_index(&index)?, 0)),
        },
        other => return Err(MachineError::internal(format!("index of {:?}", other))),
    }
    Ok(())
}

fn push_map_lookup(m: &mut Machine, found: Option<TypedValue>, elem: &Type, has_ok: bool) -> Result<()> {
    let ok = found.is_some();
    let v = match found {
        Some(v) => m.fill(v)?,
        None => m.zero_value(elem)?,
    };
    m.push_value(v);
    if has_ok {
        m.push_value(TypedValue::bool(ok));
    }
    Ok(())
}

pub(super) fn execute_selector(m: &mut Machine, path: ValuePath) -> Result<()> {
    let x = m.pop_value()?;
    match path.kind {
        PathKind::Field | PathKind::DerefField => {
            let base = m.struct_object(&x, path.kind == PathKind::DerefField)?;
            let v = m.read_slot(base, path.index as usize)?;
            m.push_value(v);
        }
        PathKind::ValMethod | PathKind::PtrMethod | PathKind::DerefValMethod | PathKind::Interface => {
            // A method value: bind the receiver now.
            let (func, receiver) = super::calls::select_method(m, x, &path)?;
            let receiver = m.copy_value(receiver)?;
            let t = Type::Func(func.ty.clone());
            let bound = m.heap.alloc(ObjectKind::BoundMethod { func, receiver })?;
            m.push_value(TypedValue::new(t, Value::Object(Handle::Mem(bound))));
        }
        other => return Err(MachineError::internal(format!("{:?} selector", other))),
    }
    Ok(())
}

/* ===================== Slicing ===================== */

pub(super) fn execute_slice(m: &mut Machine, low: bool, high: bool, max: bool) -> Result<()> {
    let max_v = if max { Some(as_index(&m.pop_value()?)?) } else { None };
    let high_v = if high { Some(as_index(&m.pop_value()?)?) } else { None };
    let low_v = if low { as_index(&m.pop_value()?)? } else { 0 };
    let mut x = m.pop_value()?;
    if let Value::Pointer(_) = &x.v {
        let elem = x.t.as_ref().and_then(|t| t.elem(&m.registry));
        x = m.deref(&x)?;
        if let Some(elem) = elem {
            x.t = Some(Type::Array(Arc::new(crate::types::ArrayType {
                len: 0,
                elem,
            })));
        }
    }

    let bounds = |len: usize, cap: usize| -> Result<(usize, usize, usize)> {
        let hi = high_v.unwrap_or(len as i64);
        let mx = max_v.unwrap_or(cap as i64);
        if low_v < 0 || hi < low_v || mx < hi || mx as usize > cap {
            return Err(MachineError::Runtime(format!(
                "slice bounds out of range [{}:{}] with capacity {}",
                low_v, hi, cap
            )));
        }
        Ok((low_v as usize, hi as usize, mx as usize))
    };

    match &x.v {
        Value::String(s) => {
            let (lo, hi, _) = bounds(s.len(), s.len())?;
            let text = String::from_utf8_lossy(&s.as_bytes()[lo..hi]).into_owned();
            m.push_value(TypedValue { t: x.t.clone(), v: Value::String(text) });
        }
        Value::Slice(sv) => {
            let (lo, hi, mx) = bounds(sv.len, sv.cap)?;
            m.push_value(TypedValue {
                t: x.t.clone(),
                v: Value::Slice(SliceValue {
                    base: sv.base.clone(),
                    offset: sv.offset + lo,
                    len: hi - lo,
                    cap: mx - lo,
                }),
            });
        }
        Value::Object(h) => {
            let r = m.resolve_handle(h)?;
            let len = match &m.heap.obj(r)?.kind {
                ObjectKind::Array { elems } => elems.len(),
                other => return Err(MachineError::internal(format!("slice of {}", other.name()))),
            };
            let (lo, hi, mx) = bounds(len, len)?;
            let elem = x
                .t
                .as_ref()
                .and_then(|t| t.elem(&m.registry))
                .unwrap_or_else(Type::empty_interface);
            m.push_value(TypedValue::new(
                Type::slice_of(elem),
                Value::Slice(SliceValue {
                    base: Handle::Mem(r),
                    offset: lo,
                    len: hi - lo,
                    cap: mx - lo,
                }),
            ));
        }
        Value::None => {
            bounds(0, 0)?;
            m.push_value(x);
        }
        other => return Err(MachineError::internal(format!("slice of {:?}", other))),
    }
    Ok(())
}

/* ===================== Pointers and Types ===================== */

pub(super) fn execute_deref(m: &mut Machine) -> Result<()> {
    let ptr = m.pop_value()?;
    let v = m.deref(&ptr)?;
    m.push_value(v);
    Ok(())
}

pub(super) fn execute_type_assert(m: &mut Machine, ty: Type, has_ok: bool) -> Result<()> {
    let x = m.pop_value()?;
    let ok = m.assert_type(&x, &ty);
    if has_ok {
        let v = if ok { x } else { m.zero_value(&ty)? };
        m.push_value(v);
        m.push_value(TypedValue::bool(ok));
        return Ok(());
    }
    if !ok {
        let have = super::inspect::type_name(&x.t);
        return Err(MachineError::Runtime(format!(
            "interface conversion: interface {{}} is {}, not {}",
            have, ty
        )));
    }
    m.push_value(x);
    Ok(())
}

/* ===================== Composite Literals ===================== */

pub(super) fn execute_composite(m: &mut Machine, ty: Type, slots: Vec<Option<usize>>) -> Result<()> {
    let n = slots.len();
    let v = match ty.underlying(&m.registry) {
        Type::Struct(st) => {
            let values = m.pop_values(n)?;
            let mut fields = Vec::with_capacity(st.fields.len());
            for f in &st.fields {
                fields.push(m.zero_value(&f.ty)?);
            }
            for (slot, v) in slots.iter().zip(values) {
                let i = slot.ok_or_else(|| MachineError::internal("struct element without a field"))?;
                fields[i] = m.copy_value(v)?;
            }
            Value::Object(Handle::Mem(m.heap.alloc(ObjectKind::Struct { fields })?))
        }
        Type::Array(at) => {
            let values = m.pop_values(n)?;
            let elems = fill_elems(m, &at.elem, at.len, &slots, values)?;
            Value::Object(Handle::Mem(m.heap.alloc(ObjectKind::Array { elems })?))
        }
        Type::Slice(elem) => {
            let values = m.pop_values(n)?;
            let len = slots.iter().flatten().map(|i| i + 1).max().unwrap_or(0);
            let elems = fill_elems(m, &elem, len, &slots, values)?;
            let base = m.heap.alloc(ObjectKind::Array { elems })?;
            Value::Slice(SliceValue {
                base: Handle::Mem(base),
                offset: 0,
                len,
                cap: len,
            })
        }
        Type::Map(_) => {
            let pairs = m.pop_values(2 * n)?;
            let map = m.heap.alloc(ObjectKind::Map { map: MapData::default() })?;
            let mut it = pairs.into_iter();
            while let (Some(k), Some(v)) = (it.next(), it.next()) {
                m.map_insert(map, k, v)?;
            }
            Value::Object(Handle::Mem(map))
        }
        other => return Err(MachineError::internal(format!("composite literal of {}", other))),
    };
    m.push_value(TypedValue::new(ty, v));
    Ok(())
}

fn fill_elems(
    m: &mut Machine,
    elem: &Type,
    len: usize,
    slots: &[Option<usize>],
    values: Vec<TypedValue>,
) -> Result<Vec<TypedValue>> {
    let mut elems = m.elems_with_capacity(len)?;
    for _ in 0..len {
        elems.push(m.zero_value(elem)?);
    }
    for (slot, v) in slots.iter().zip(values) {
        let i = slot.ok_or_else(|| MachineError::internal("array element without an index"))?;
        let cell = elems
            .get_mut(i)
            .ok_or_else(|| index_error(i as i64, len))?;
        *cell = m.copy_value(v)?;
    }
    Ok(elems)
}
