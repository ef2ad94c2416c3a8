//! Builtin functions
//!
//! Each builtin is a `NativeFn` run atomically inside a native call frame.
//! The Uverse binds these by name; function values restored from the store
//! carry only the name and are rebound through `lookup_native`.

use crate::errors::MachineError;
use crate::heap::{MapData, ObjectKind};
use crate::machine::types::{CallPhase, Frame};
use crate::machine::Machine;
use crate::types::Type;
use crate::values::{Handle, NativeCall, NativeFn, NativeOutcome, PointerValue, SliceValue, TypedValue, Value};

type NativeResult = Result<NativeOutcome, MachineError>;

pub static BUILTINS: &[(&str, NativeFn)] = &[
    ("len", NativeFn(builtin_len)),
    ("cap", NativeFn(builtin_cap)),
    ("append", NativeFn(builtin_append)),
    ("make", NativeFn(builtin_make)),
    ("new", NativeFn(builtin_new)),
    ("delete", NativeFn(builtin_delete)),
    ("copy", NativeFn(builtin_copy)),
    ("panic", NativeFn(builtin_panic)),
    ("recover", NativeFn(builtin_recover)),
    ("print", NativeFn(builtin_print)),
    ("println", NativeFn(builtin_println)),
];

pub fn lookup_native(name: &str) -> Option<NativeFn> {
    BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

fn arg(call: &NativeCall, i: usize) -> Result<&TypedValue, MachineError> {
    call.args
        .get(i)
        .ok_or_else(|| MachineError::internal(format!("missing builtin argument {}", i)))
}

fn int_arg(call: &NativeCall, i: usize) -> Result<i64, MachineError> {
    arg(call, i)?
        .as_i64()
        .ok_or_else(|| MachineError::internal(format!("builtin argument {} is not an integer", i)))
}

fn ret(v: TypedValue) -> NativeResult {
    Ok(NativeOutcome::Return(vec![v]))
}

/* ===================== Length and Capacity ===================== */

fn length(m: &mut Machine, tv: &TypedValue, capacity: bool) -> Result<usize, MachineError> {
    let n = match &tv.v {
        Value::None => 0,
        Value::String(s) => s.len(),
        Value::Slice(sv) if capacity => sv.cap,
        Value::Slice(sv) => sv.len,
        Value::Object(h) => {
            let r = m.resolve_handle(h)?;
            match &m.heap.obj(r)?.kind {
                ObjectKind::Array { elems } => elems.len(),
                ObjectKind::Map { map } if !capacity => map.len(),
                other => return Err(MachineError::internal(format!("len of {}", other.name()))),
            }
        }
        Value::Pointer(pv) => {
            let base = m.resolve_handle(&pv.base)?;
            let target = m.read_slot(base, pv.index)?;
            return length(m, &target, capacity);
        }
        other => return Err(MachineError::internal(format!("len of {:?}", other))),
    };
    Ok(n)
}

fn builtin_len(m: &mut Machine, call: NativeCall) -> NativeResult {
    let n = length(m, arg(&call, 0)?, false)?;
    ret(TypedValue::int(n as i64))
}

fn builtin_cap(m: &mut Machine, call: NativeCall) -> NativeResult {
    let n = length(m, arg(&call, 0)?, true)?;
    ret(TypedValue::int(n as i64))
}

/* ===================== Slices ===================== */

/// Elements of a spread argument: a slice, or the bytes of a string.
fn spread(m: &mut Machine, tv: &TypedValue) -> Result<Vec<TypedValue>, MachineError> {
    match &tv.v {
        Value::None => Ok(Vec::new()),
        Value::Slice(sv) => m.slice_elems(sv),
        Value::String(s) => Ok(s.bytes().map(|b| TypedValue::new(Type::UINT8, Value::Uint(b as u64))).collect()),
        other => Err(MachineError::internal(format!("cannot spread {:?}", other))),
    }
}

fn builtin_append(m: &mut Machine, call: NativeCall) -> NativeResult {
    let dst = arg(&call, 0)?.clone();
    let extra = if call.varg {
        spread(m, arg(&call, 1)?)?
    } else {
        call.args[1..].to_vec()
    };
    let st = dst
        .t
        .clone()
        .ok_or_else(|| MachineError::internal("append to an untyped value"))?;
    if extra.is_empty() {
        return ret(dst);
    }
    let (base, offset, len, cap) = match &dst.v {
        Value::Slice(sv) => (Some(m.resolve_handle(&sv.base)?), sv.offset, sv.len, sv.cap),
        Value::None => (None, 0, 0, 0),
        other => return Err(MachineError::internal(format!("append to {:?}", other))),
    };
    let new_len = len + extra.len();

    // Room left in the backing array: write in place.
    if let Some(base) = base.filter(|_| new_len <= cap) {
        for (i, v) in extra.into_iter().enumerate() {
            m.store_into(base, offset + len + i, v)?;
        }
        return ret(TypedValue::new(
            st,
            Value::Slice(SliceValue {
                base: Handle::Mem(base),
                offset,
                len: new_len,
                cap,
            }),
        ));
    }

    let new_cap = new_len.max(cap.saturating_mul(2));
    let mut elems = m.elems_with_capacity(new_cap)?;
    if let Some(base) = base {
        for i in offset..offset + len {
            let v = m.read_slot(base, i)?;
            elems.push(m.copy_value(v)?);
        }
    }
    for v in extra {
        elems.push(m.copy_value(v)?);
    }
    let elem_type = st.elem(&m.registry).unwrap_or_else(Type::empty_interface);
    while elems.len() < new_cap {
        elems.push(m.zero_value(&elem_type)?);
    }
    let array = m.heap.alloc(ObjectKind::Array { elems })?;
    ret(TypedValue::new(
        st,
        Value::Slice(SliceValue {
            base: Handle::Mem(array),
            offset: 0,
            len: new_len,
            cap: new_cap,
        }),
    ))
}

fn builtin_copy(m: &mut Machine, call: NativeCall) -> NativeResult {
    let src = spread(m, arg(&call, 1)?)?;
    let (base, offset, len) = match &arg(&call, 0)?.v {
        Value::Slice(sv) => (m.resolve_handle(&sv.base)?, sv.offset, sv.len),
        Value::None => return ret(TypedValue::int(0)),
        other => return Err(MachineError::internal(format!("copy into {:?}", other))),
    };
    let n = len.min(src.len());
    for (i, v) in src.into_iter().take(n).enumerate() {
        m.store_into(base, offset + i, v)?;
    }
    ret(TypedValue::int(n as i64))
}

/* ===================== Allocation ===================== */

fn builtin_make(m: &mut Machine, call: NativeCall) -> NativeResult {
    let t = arg(&call, 0)?
        .as_type()
        .cloned()
        .ok_or_else(|| MachineError::internal("make without a type"))?;
    match t.underlying(&m.registry) {
        Type::Slice(elem) => {
            let len = if call.args.len() > 1 { int_arg(&call, 1)? } else { 0 };
            let cap = if call.args.len() > 2 { int_arg(&call, 2)? } else { len };
            if len < 0 || cap < len {
                return Err(MachineError::Runtime("makeslice: len out of range".to_string()));
            }
            let out_of_range = |_| MachineError::Runtime("makeslice: cap out of range".to_string());
            let len = usize::try_from(len).map_err(out_of_range)?;
            let cap = usize::try_from(cap).map_err(out_of_range)?;
            let mut elems = m.elems_with_capacity(cap)?;
            for _ in 0..cap {
                elems.push(m.zero_value(&elem)?);
            }
            let base = m.heap.alloc(ObjectKind::Array { elems })?;
            ret(TypedValue::new(
                t,
                Value::Slice(SliceValue {
                    base: Handle::Mem(base),
                    offset: 0,
                    len,
                    cap,
                }),
            ))
        }
        Type::Map(_) => {
            let map = m.heap.alloc(ObjectKind::Map { map: MapData::default() })?;
            ret(TypedValue::new(t, Value::Object(Handle::Mem(map))))
        }
        other => Err(MachineError::internal(format!("make of {}", other))),
    }
}

fn builtin_new(m: &mut Machine, call: NativeCall) -> NativeResult {
    let t = arg(&call, 0)?
        .as_type()
        .cloned()
        .ok_or_else(|| MachineError::internal("new without a type"))?;
    let value = m.zero_value(&t)?;
    let item = m.heap.alloc(ObjectKind::HeapItem { value })?;
    ret(TypedValue::new(
        Type::pointer_to(t),
        Value::Pointer(PointerValue {
            base: Handle::Mem(item),
            index: 0,
        }),
    ))
}

/* ===================== Maps ===================== */

fn builtin_delete(m: &mut Machine, call: NativeCall) -> NativeResult {
    let key = arg(&call, 1)?.clone();
    match &arg(&call, 0)?.v {
        Value::None => {}
        Value::Object(h) => {
            let map = m.resolve_handle(h)?;
            m.map_delete(map, &key)?;
        }
        other => return Err(MachineError::internal(format!("delete from {:?}", other))),
    }
    Ok(NativeOutcome::Return(Vec::new()))
}

/* ===================== Panics ===================== */

fn builtin_panic(_m: &mut Machine, call: NativeCall) -> NativeResult {
    let ex = call.args.into_iter().next().unwrap_or_default();
    Ok(NativeOutcome::Panic(ex))
}

/// Only a function called directly by the defer machinery of a panicking
/// call can recover.
fn builtin_recover(m: &mut Machine, _call: NativeCall) -> NativeResult {
    // The top frame is recover's own native frame; loop and switch frames
    // of the deferred function may sit between it and the caller.
    let below = m.frames.len().saturating_sub(1);
    let caller = m.frames[..below].iter().rposition(Frame::is_call);
    let panicking = match caller {
        Some(idx) if m.frames[idx].as_call().map(|cf| cf.is_defer).unwrap_or(false) => m.frames[..idx]
            .iter()
            .rev()
            .find_map(|f| f.as_call())
            .map(|cf| cf.phase == CallPhase::Unwinding)
            .unwrap_or(false),
        _ => false,
    };
    if !panicking {
        return ret(TypedValue::undefined());
    }
    match m.exception.take() {
        Some(ex) => {
            tracing::debug!(exception = %ex, "recovered");
            ret(ex)
        }
        None => ret(TypedValue::undefined()),
    }
}

/* ===================== Output ===================== */

fn render(m: &mut Machine, args: &[TypedValue], sep: &str) -> Result<String, MachineError> {
    let mut parts = Vec::with_capacity(args.len());
    for a in args {
        parts.push(m.sprint(a)?);
    }
    Ok(parts.join(sep))
}

fn builtin_print(m: &mut Machine, call: NativeCall) -> NativeResult {
    let text = render(m, &call.args, "")?;
    m.write_output(&text)?;
    Ok(NativeOutcome::Return(Vec::new()))
}

fn builtin_println(m: &mut Machine, call: NativeCall) -> NativeResult {
    let mut text = render(m, &call.args, " ")?;
    text.push('\n');
    m.write_output(&text)?;
    Ok(NativeOutcome::Return(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_native() {
        assert!(lookup_native("append").is_some());
        assert!(lookup_native("println").is_some());
        assert!(lookup_native("printf").is_none());
    }

    #[test]
    fn test_builtin_names_unique() {
        let mut names: Vec<&str> = BUILTINS.iter().map(|(n, _)| *n).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), BUILTINS.len());
    }
}
