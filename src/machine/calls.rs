//! Calls, returns, defers and panics
//!
//! # Call sequence
//!
//! 1. `Precall` finds the callee under its arguments on the value stack.
//!    Type values convert, natives run at once in a native frame, and
//!    everything else pushes a call frame and `Call`.
//! 2. `Call` allocates the function block, binds receiver and parameters,
//!    and schedules the body.
//! 3. `Return` / an empty `return` cut the stacks back to the body and run
//!    `ReturnCallDefers`, which pops deferred calls one at a time (LIFO).
//! 4. `ReturnFromBlock` reads the results out of the block, drops the frame
//!    and, when a realm boundary is crossed, commits the realm.
//!
//! # Panics
//!
//! A panic marks the innermost call frame `Unwinding` and runs its defers.
//! If a deferred call recovers, the frame returns normally; otherwise
//! `PanicUnwind` drops the frame and repeats on the caller. A panic with no
//! call frame left escapes as `UnhandledPanic`.

use std::sync::Arc;

use super::stdlib::lookup_native;
use super::types::{CallFrame, CallInfo, CallPhase, Defer, Frame, FrameKind, Op};
use super::vm::{Machine, Result};
use crate::ast::{CallExpr, Expr, PathKind, ValuePath};
use crate::errors::MachineError;
use crate::heap::ObjectKind;
use crate::ownership::is_realm_path;
use crate::types::{DeclaredRef, Type};
use crate::values::{FuncValue, NativeCall, NativeOutcome, TypedValue, Value};

/* ===================== Scheduling ===================== */

fn is_method_selector(x: &Expr) -> bool {
    match x {
        Expr::Selector(sx) => matches!(
            sx.path.kind,
            PathKind::ValMethod | PathKind::PtrMethod | PathKind::DerefValMethod | PathKind::Interface
        ),
        _ => false,
    }
}

/// Schedule evaluation of callee, receiver and arguments, followed by
/// `Precall` (or `Defer` when `is_defer`).
pub(super) fn push_call(m: &mut Machine, cx: CallExpr, is_defer: bool) {
    let method = is_method_selector(&cx.func);
    let call = CallInfo {
        num_args: cx.num_args,
        varg: cx.varg,
        method,
        is_defer: false,
    };
    if is_defer {
        m.push_op(Op::Defer { call });
    } else {
        m.push_op(Op::Precall { call });
    }
    for arg in cx.args.into_iter().rev() {
        m.push_eval(arg);
    }
    match *cx.func {
        Expr::Selector(sx) if method => {
            m.push_op(Op::SelectMethod { path: sx.path });
            m.push_eval(*sx.x);
        }
        func => m.push_eval(func),
    }
}

/// Method to call on `x` for selector `path`, and the receiver to bind.
pub(super) fn select_method(m: &mut Machine, x: TypedValue, path: &ValuePath) -> Result<(Arc<FuncValue>, TypedValue)> {
    let index = path.index as usize;
    match path.kind {
        PathKind::ValMethod | PathKind::PtrMethod => {
            let r = declared_of(&x.t)?;
            Ok((m.method_func(&r, index)?, x))
        }
        PathKind::DerefValMethod => {
            let r = declared_of(&x.t)?;
            let recv = m.deref(&x)?;
            Ok((m.method_func(&r, index)?, recv))
        }
        PathKind::Interface => {
            let Some(dynamic) = x.t.clone() else {
                return Err(MachineError::Runtime(
                    "invalid memory address or nil pointer dereference".to_string(),
                ));
            };
            let (fv, ptr_receiver) = m.method_by_name(&dynamic, &path.name).ok_or_else(|| {
                MachineError::Runtime(format!("{} has no method {}", dynamic, path.name))
            })?;
            if matches!(dynamic, Type::Pointer(_)) && !ptr_receiver {
                let recv = m.deref(&x)?;
                return Ok((fv, recv));
            }
            Ok((fv, x))
        }
        other => Err(MachineError::internal(format!("{:?} is not a method path", other))),
    }
}

fn declared_of(t: &Option<Type>) -> Result<DeclaredRef> {
    let found = match t {
        Some(Type::Declared(r)) => Some(r.clone()),
        Some(Type::Pointer(elem)) => elem.declared_ref().cloned(),
        _ => None,
    };
    found.ok_or_else(|| MachineError::internal("method receiver without a declared type"))
}

/* ===================== Precall and Call ===================== */

pub(super) fn execute_select_method(m: &mut Machine, path: ValuePath) -> Result<()> {
    let x = m.pop_value()?;
    let (fv, recv) = select_method(m, x, &path)?;
    m.push_value(TypedValue::func(fv));
    m.push_value(recv);
    Ok(())
}

pub(super) fn execute_precall(m: &mut Machine, call: CallInfo) -> Result<()> {
    let extra = call.method as usize;
    let base = m
        .values
        .len()
        .checked_sub(call.num_args + 1 + extra)
        .ok_or_else(|| MachineError::internal("value stack underflow at call"))?;
    let mut head: Vec<TypedValue> = m.values.drain(base..base + 1 + extra).collect();
    let receiver = if call.method { head.pop() } else { None };
    let callee = head
        .pop()
        .ok_or_else(|| MachineError::internal("missing callee"))?;

    match callee.v {
        Value::Type(t) => {
            let x = m.pop_value()?;
            let converted = m.convert_value(x, &t)?;
            m.push_value(converted);
            Ok(())
        }
        Value::Func(fv) => enter(m, fv, receiver, call),
        Value::Object(h) => {
            let r = m.resolve_handle(&h)?;
            let (fv, recv) = match &m.heap.obj(r)?.kind {
                ObjectKind::BoundMethod { func, receiver } => (func.clone(), receiver.clone()),
                other => return Err(MachineError::internal(format!("call of {}", other.name()))),
            };
            let recv = m.fill(recv)?;
            let call = CallInfo { method: true, ..call };
            enter(m, fv, Some(recv), call)
        }
        Value::None => Err(MachineError::Runtime(
            "invalid memory address or nil pointer dereference".to_string(),
        )),
        other => Err(MachineError::internal(format!("call of non-function {:?}", other))),
    }
}

/// Push a call frame for `fv`; natives run to completion here.
fn enter(m: &mut Machine, fv: Arc<FuncValue>, receiver: Option<TypedValue>, call: CallInfo) -> Result<()> {
    let mut heights = m.heights();
    heights.values = heights.values.saturating_sub(call.num_args);
    let frame = CallFrame {
        func: fv.clone(),
        receiver,
        num_args: call.num_args,
        varg: call.varg,
        is_native: fv.is_native(),
        is_defer: call.is_defer,
        phase: CallPhase::Running,
        block: None,
        body_heights: heights,
        defers: Vec::new(),
        outer_exception: None,
        last_package: m.package.clone(),
        last_realm: m.realm.clone(),
    };
    m.frames.push(Frame {
        kind: FrameKind::Call(Box::new(frame)),
        label: None,
        heights,
    });

    if fv.is_native() {
        let native = fv
            .native
            .or_else(|| fv.native_name.as_deref().and_then(lookup_native))
            .ok_or_else(|| MachineError::internal(format!("no native body for {}", fv.name)))?;
        let args = m.pop_values(call.num_args)?;
        tracing::trace!(func = %fv.name, args = args.len(), "native call");
        let outcome = (native.0)(m, NativeCall { args, varg: call.varg });
        m.frames.pop();
        return match outcome? {
            NativeOutcome::Return(results) => {
                m.values.extend(results);
                Ok(())
            }
            NativeOutcome::Panic(ex) => m.raise_panic(ex),
        };
    }

    if !fv.pkg_path.is_empty() {
        if m.package.as_deref() != Some(fv.pkg_path.as_str()) {
            m.package = Some(fv.pkg_path.clone());
        }
        if is_realm_path(&fv.pkg_path) && m.realm.as_deref() != Some(fv.pkg_path.as_str()) {
            m.realm = Some(fv.pkg_path.clone());
        }
    }
    m.push_op(Op::Call);
    Ok(())
}

pub(super) fn execute_call(m: &mut Machine) -> Result<()> {
    let idx = m.top_call_frame().ok_or_else(|| MachineError::internal("call without frame"))?;
    let (fv, receiver, num_args, varg) = {
        let cf = m.frames[idx]
            .as_call()
            .ok_or_else(|| MachineError::internal("call frame expected"))?;
        (cf.func.clone(), cf.receiver.clone(), cf.num_args, cf.varg)
    };
    let mut args = m.pop_values(num_args)?;
    let scope = fv
        .scope
        .ok_or_else(|| MachineError::internal(format!("func {} has no scope", fv.name)))?;
    let body = fv
        .body
        .clone()
        .ok_or_else(|| MachineError::internal(format!("func {} has no body", fv.name)))?;
    let block = m.new_block(scope, fv.closure.clone())?;

    let mut slot = 0;
    if fv.is_method {
        m.store_into(block, 0, receiver.unwrap_or_default())?;
        slot = 1;
    }
    let params = &fv.ty.params;
    if fv.ty.variadic && !params.is_empty() {
        let fixed = params.len() - 1;
        if args.len() < fixed {
            return Err(MachineError::internal(format!("too few arguments to {}", fv.name)));
        }
        let rest = args.split_off(fixed);
        let rest = if varg {
            rest.into_iter().next().unwrap_or_default()
        } else {
            m.new_slice(params[fixed].ty.clone(), rest)?
        };
        args.push(rest);
    }
    if args.len() != params.len() {
        return Err(MachineError::internal(format!(
            "{} takes {} arguments, got {}",
            fv.name,
            params.len(),
            args.len()
        )));
    }
    for (i, a) in args.into_iter().enumerate() {
        m.store_into(block, slot + i, a)?;
    }

    m.push_block(block);
    let heights = m.heights();
    if let Some(cf) = m.frames[idx].as_call_mut() {
        cf.block = Some(block);
        cf.body_heights = heights;
    }
    m.push_body(body);
    Ok(())
}

/* ===================== Returns ===================== */

/// Index of the first result slot in a function block.
fn result_base(fv: &FuncValue) -> usize {
    fv.is_method as usize + fv.ty.params.len()
}

/// Explicit results are on the value stack.
pub(super) fn execute_return(m: &mut Machine) -> Result<()> {
    let idx = m.top_call_frame().ok_or_else(|| MachineError::internal("return outside call"))?;
    let (fv, block) = {
        let cf = m.frames[idx]
            .as_call()
            .ok_or_else(|| MachineError::internal("call frame expected"))?;
        (cf.func.clone(), cf.block)
    };
    let block = block.ok_or_else(|| MachineError::internal("return before call"))?;
    let results = m.pop_values(fv.ty.results.len())?;
    let base = result_base(&fv);
    for (i, r) in results.into_iter().enumerate() {
        m.store_into(block, base + i, r)?;
    }
    m.unwind_to_body(idx);
    m.push_op(Op::ReturnCallDefers);
    Ok(())
}

/// `return` with results already in their slots.
pub(super) fn execute_return_empty(m: &mut Machine) -> Result<()> {
    let idx = m.top_call_frame().ok_or_else(|| MachineError::internal("return outside call"))?;
    m.unwind_to_body(idx);
    m.push_op(Op::ReturnCallDefers);
    Ok(())
}

pub(super) fn execute_return_call_defers(m: &mut Machine) -> Result<()> {
    let idx = m.top_call_frame().ok_or_else(|| MachineError::internal("defers without call"))?;
    let (next, phase) = {
        let cf = m.frames[idx]
            .as_call_mut()
            .ok_or_else(|| MachineError::internal("call frame expected"))?;
        if cf.phase == CallPhase::Running {
            cf.phase = CallPhase::Returning;
        }
        (cf.defers.pop(), cf.phase)
    };
    let Some(d) = next else {
        if phase == CallPhase::Unwinding && m.exception.is_some() {
            m.push_op(Op::PanicUnwind);
        } else {
            m.push_op(Op::ReturnFromBlock);
        }
        return Ok(());
    };
    let height = m.values.len();
    m.push_op(Op::ReturnCallDefers);
    m.push_op(Op::DropValues { height });
    let call = CallInfo {
        num_args: d.args.len(),
        varg: d.varg,
        method: d.receiver.is_some(),
        is_defer: true,
    };
    m.push_value(d.func);
    if let Some(recv) = d.receiver {
        m.push_value(recv);
    }
    m.values.extend(d.args);
    m.push_op(Op::Precall { call });
    Ok(())
}

pub(super) fn execute_return_from_block(m: &mut Machine) -> Result<()> {
    let idx = m.top_call_frame().ok_or_else(|| MachineError::internal("return without call"))?;
    let frame = m.frames[idx].clone();
    let cf = frame
        .as_call()
        .ok_or_else(|| MachineError::internal("call frame expected"))?;
    let mut results = Vec::with_capacity(cf.func.ty.results.len());
    if let Some(block) = cf.block {
        let base = result_base(&cf.func);
        for i in 0..cf.func.ty.results.len() {
            results.push(m.read_slot(block, base + i)?);
        }
    }
    m.truncate(&frame.heights);
    m.frames.truncate(idx);
    m.values.extend(results);
    if cf.phase == CallPhase::Unwinding {
        // Recovered; an outer panic this one interrupted is live again.
        m.exception = cf.outer_exception.clone();
    }
    tracing::trace!(func = %cf.func.name, "returned");
    finish_call(m, cf.last_package.clone(), cf.last_realm.clone())
}

/// Restore the caller's package and realm, committing the realm being left.
fn finish_call(m: &mut Machine, last_package: Option<String>, last_realm: Option<String>) -> Result<()> {
    let exiting = m.realm.clone();
    m.package = last_package;
    m.realm = last_realm;
    let Some(exiting) = exiting else {
        return Ok(());
    };
    let left = m.realm.as_deref() != Some(exiting.as_str());
    let top = m.top_call_frame().is_none();
    if !m.in_init && (left || top) {
        m.finalize_realm(&exiting)?;
    }
    Ok(())
}

/* ===================== Defer ===================== */

pub(super) fn execute_defer(m: &mut Machine, call: CallInfo) -> Result<()> {
    let args = m.pop_values(call.num_args)?;
    let receiver = if call.method { Some(m.pop_value()?) } else { None };
    let func = m.pop_value()?;
    let idx = m.top_call_frame().ok_or_else(|| MachineError::internal("defer outside call"))?;
    let cf = m.frames[idx]
        .as_call_mut()
        .ok_or_else(|| MachineError::internal("call frame expected"))?;
    cf.defers.push(Defer {
        func,
        receiver,
        args,
        varg: call.varg,
    });
    Ok(())
}

/* ===================== Panics ===================== */

impl Machine {
    pub(crate) fn top_call_frame(&self) -> Option<usize> {
        self.frames.iter().rposition(Frame::is_call)
    }

    /// Drop the frames above call frame `idx` and cut the stacks back to
    /// the start of its body.
    pub(crate) fn unwind_to_body(&mut self, idx: usize) {
        self.frames.truncate(idx + 1);
        if let Some(h) = self.frames[idx].as_call().map(|cf| cf.body_heights) {
            self.truncate(&h);
        }
    }

    /// Start a language-level panic in the innermost call.
    pub fn raise_panic(&mut self, ex: TypedValue) -> Result<()> {
        tracing::debug!(exception = %ex, "panic");
        let Some(idx) = self.top_call_frame() else {
            let descriptor = self.sprint(&ex)?;
            return Err(MachineError::UnhandledPanic { descriptor, exception: ex });
        };
        let previous = self.exception.replace(ex);
        if let Some(cf) = self.frames[idx].as_call_mut() {
            if cf.phase != CallPhase::Unwinding {
                cf.outer_exception = previous;
                cf.phase = CallPhase::Unwinding;
            }
        }
        self.unwind_to_body(idx);
        self.push_op(Op::ReturnCallDefers);
        Ok(())
    }
}

/// The innermost call finished its defers without recovering: drop it and
/// continue unwinding in the caller.
pub(super) fn execute_panic_unwind(m: &mut Machine) -> Result<()> {
    let idx = m.top_call_frame().ok_or_else(|| MachineError::internal("unwind without call"))?;
    let frame = m.frames[idx].clone();
    let cf = frame
        .as_call()
        .ok_or_else(|| MachineError::internal("call frame expected"))?;
    m.truncate(&frame.heights);
    m.frames.truncate(idx);
    m.package = cf.last_package.clone();
    m.realm = cf.last_realm.clone();

    let Some(caller) = m.top_call_frame() else {
        let ex = m.exception.take().unwrap_or_default();
        let descriptor = m.sprint(&ex)?;
        return Err(MachineError::UnhandledPanic { descriptor, exception: ex });
    };
    if let Some(caller_cf) = m.frames[caller].as_call_mut() {
        if caller_cf.phase != CallPhase::Unwinding {
            caller_cf.phase = CallPhase::Unwinding;
            caller_cf.outer_exception = cf.outer_exception.clone();
        }
    }
    m.unwind_to_body(caller);
    m.push_op(Op::ReturnCallDefers);
    Ok(())
}
