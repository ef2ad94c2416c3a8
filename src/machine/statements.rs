//! Statement execution
//!
//! `Body` runs one statement of the top statement continuation. Simple
//! statements schedule their expressions and the op that applies them;
//! `for`, `range` and `switch` push a frame so `break` and `continue` can
//! cut every stack back in one step.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;

use super::calls::{execute_return_empty, push_call};
use super::expressions::binary_values;
use super::types::{Frame, FrameKind, Op, RangeState, Slot};
use super::vm::{Machine, Result};
use crate::ast::{
    BinaryOp, BlockStmt, BranchOp, BranchStmt, Decl, Expr, ForStmt, Name, Node, RangeStmt, Stmt,
    SwitchStmt, ValuePath,
};
use crate::errors::MachineError;
use crate::heap::ObjectKind;
use crate::types::Type;
use crate::values::{Handle, TypedValue, Value};

/* ===================== Body ===================== */

pub(super) fn execute_body(m: &mut Machine) -> Result<()> {
    let cont = m
        .stmts
        .last_mut()
        .ok_or_else(|| MachineError::internal("statement stack underflow"))?;
    let Some(stmt) = cont.body.get(cont.next).cloned() else {
        m.stmts.pop();
        return Ok(());
    };
    cont.next += 1;
    m.push_op(Op::Body);
    execute_stmt(m, stmt)
}

fn single(stmt: Stmt) -> Arc<Vec<Stmt>> {
    Arc::new(vec![stmt])
}

fn execute_stmt(m: &mut Machine, stmt: Stmt) -> Result<()> {
    match stmt {
        Stmt::Expr(es) => {
            let height = m.values.len();
            m.push_op(Op::DropValues { height });
            m.push_eval(es.x);
        }
        Stmt::Assign(a) => match a.op.binary() {
            Some(op) => {
                let (Some(lhs), Some(rhs)) = (a.lhs.into_iter().next(), a.rhs.into_iter().next()) else {
                    return Err(MachineError::internal("op-assignment without operands"));
                };
                m.push_op(Op::OpAssign { op });
                m.push_eval(rhs);
                m.push_eval_slot(lhs);
            }
            None => push_assign(m, a.lhs, a.rhs),
        },
        Stmt::IncDec(st) => {
            m.push_op(Op::IncDec { inc: st.inc });
            m.push_eval_slot(st.x);
        }
        Stmt::Block(b) => push_block_stmt(m, &b)?,
        Stmt::If(st) => {
            let scope = st
                .scope
                .ok_or_else(|| MachineError::internal("if statement without scope"))?;
            enter_scope(m, scope)?;
            let init = st.init.clone();
            let cond = st.cond.clone();
            m.push_op(Op::PopBlock);
            m.push_op(Op::IfBranch { stmt: Arc::new(st) });
            m.push_eval(cond);
            if let Some(init) = init {
                m.push_body(single(*init));
            }
        }
        Stmt::For(st) => {
            let label = st.label().map(str::to_string);
            let scope = st
                .scope
                .ok_or_else(|| MachineError::internal("for statement without scope"))?;
            let init = st.init.clone();
            let stmt = Arc::new(st);
            push_loop_frame(m, label, None, Op::ForPost { stmt: stmt.clone() });
            enter_scope(m, scope)?;
            m.push_op(Op::ForCond { stmt });
            if let Some(init) = init {
                m.push_body(single(*init));
            }
        }
        Stmt::Range(st) => {
            let label = st.label().map(str::to_string);
            let scope = st
                .scope
                .ok_or_else(|| MachineError::internal("range statement without scope"))?;
            let x = st.x.clone();
            let stmt = Arc::new(st);
            push_loop_frame(
                m,
                label,
                Some(RangeState {
                    x: TypedValue::undefined(),
                    pos: 0,
                }),
                Op::RangeIter { stmt: stmt.clone() },
            );
            enter_scope(m, scope)?;
            m.push_op(Op::RangeStart { stmt });
            m.push_eval(x);
        }
        Stmt::Switch(st) => {
            let label = st.label().map(str::to_string);
            let scope = st
                .scope
                .ok_or_else(|| MachineError::internal("switch statement without scope"))?;
            let init = st.init.clone();
            let heights = m.heights();
            m.frames.push(Frame {
                kind: FrameKind::Switch,
                label,
                heights,
            });
            enter_scope(m, scope)?;
            m.push_op(Op::SwitchStart { stmt: Arc::new(st) });
            if let Some(init) = init {
                m.push_body(single(*init));
            }
        }
        Stmt::Branch(b) => execute_branch(m, &b)?,
        Stmt::Return(r) if r.results.is_empty() => execute_return_empty(m)?,
        Stmt::Return(r) => {
            m.push_op(Op::Return);
            for x in r.results.into_iter().rev() {
                m.push_eval(x);
            }
        }
        Stmt::Defer(d) => push_call(m, d.call, true),
        Stmt::Go(_) => return Err(MachineError::NotImplemented("goroutines")),
        Stmt::Decl(ds) => {
            for decl in ds.decls.into_iter().rev() {
                push_decl(m, decl);
            }
        }
    }
    Ok(())
}

/// Allocate the block of `scope` under the current one and make it current.
fn enter_scope(m: &mut Machine, scope: crate::ast::ScopeId) -> Result<()> {
    let parent = m.current_block()?;
    let block = m.new_block(scope, Some(Handle::Mem(parent)))?;
    m.push_block(block);
    Ok(())
}

fn push_block_stmt(m: &mut Machine, b: &BlockStmt) -> Result<()> {
    let scope = b
        .scope
        .ok_or_else(|| MachineError::internal("block without scope"))?;
    m.push_op(Op::PopBlock);
    enter_scope(m, scope)?;
    m.push_body(b.body.clone());
    Ok(())
}

/* ===================== Assignment ===================== */

/// Targets are evaluated left to right, then values, then stored.
fn push_assign(m: &mut Machine, lhs: Vec<Expr>, rhs: Vec<Expr>) {
    m.push_op(Op::Assign { n: lhs.len() });
    for x in rhs.into_iter().rev() {
        m.push_eval(x);
    }
    for x in lhs.into_iter().rev() {
        m.push_eval_slot(x);
    }
}

pub(super) fn execute_assign(m: &mut Machine, n: usize) -> Result<()> {
    let values = m.pop_values(n)?;
    if m.slots.len() < n {
        return Err(MachineError::internal("slot stack underflow"));
    }
    let slots = m.slots.split_off(m.slots.len() - n);
    for (slot, value) in slots.iter().zip(values) {
        m.assign_slot(slot, value)?;
    }
    Ok(())
}

pub(super) fn execute_op_assign(m: &mut Machine, op: BinaryOp) -> Result<()> {
    let r = m.pop_value()?;
    let slot = m.pop_slot()?;
    let current = m.slot_value(&slot)?;
    let v = binary_values(m, op, current, r)?;
    m.assign_slot(&slot, v)
}

fn one_like(v: &Value) -> Result<Value> {
    Ok(match v {
        Value::Int(_) => Value::Int(1),
        Value::Uint(_) => Value::Uint(1),
        Value::Float(_) => Value::Float(1.0),
        Value::Bigint(_) => Value::Bigint(BigInt::from(1)),
        Value::Bigdec(_) => Value::Bigdec(BigDecimal::from(1)),
        other => return Err(MachineError::internal(format!("increment of {:?}", other))),
    })
}

pub(super) fn execute_inc_dec(m: &mut Machine, inc: bool) -> Result<()> {
    let slot = m.pop_slot()?;
    let current = m.slot_value(&slot)?;
    let one = TypedValue {
        t: current.t.clone(),
        v: one_like(&current.v)?,
    };
    let op = if inc { BinaryOp::Add } else { BinaryOp::Sub };
    let v = binary_values(m, op, current, one)?;
    m.assign_slot(&slot, v)
}

/* ===================== Declarations ===================== */

pub(super) fn push_decl(m: &mut Machine, decl: Decl) {
    let Decl::Value(vd) = decl else {
        // Types, constants and imports live in the static block.
        return;
    };
    if vd.is_const {
        return;
    }
    if vd.values.is_empty() {
        let vars = vd
            .names
            .iter()
            .zip(vd.resolved.iter())
            .filter(|(nx, _)| !nx.path.is_blank())
            .map(|(nx, t)| (nx.path.clone(), t.clone()))
            .collect();
        m.push_op(Op::ZeroVars { vars });
        return;
    }
    let lhs = vd.names.into_iter().map(Expr::Name).collect();
    push_assign(m, lhs, vd.values);
}

pub(super) fn execute_zero_vars(m: &mut Machine, vars: Vec<(ValuePath, Type)>) -> Result<()> {
    for (path, t) in vars {
        let block = m.block_at_depth(path.depth)?;
        let zero = m.zero_value(&t)?;
        m.store_into(block, path.index as usize, zero)?;
    }
    Ok(())
}

/* ===================== If ===================== */

pub(super) fn execute_if_branch(m: &mut Machine, stmt: Arc<crate::ast::IfStmt>) -> Result<()> {
    let cond = m
        .pop_value()?
        .as_bool()
        .ok_or_else(|| MachineError::internal("non-bool if condition"))?;
    if cond {
        push_block_stmt(m, &stmt.then)
    } else if let Some(els) = &stmt.els {
        push_block_stmt(m, els)
    } else {
        Ok(())
    }
}

/* ===================== Loops ===================== */

fn push_loop_frame(m: &mut Machine, label: Option<Name>, range: Option<RangeState>, next: Op) {
    let heights = m.heights();
    m.frames.push(Frame {
        kind: FrameKind::Loop {
            range,
            next: Box::new(next),
        },
        label,
        heights,
    });
}

/// Leave the innermost frame, which must be the loop or switch being run.
pub(super) fn execute_pop_frame(m: &mut Machine) -> Result<()> {
    let frame = m
        .frames
        .pop()
        .ok_or_else(|| MachineError::internal("frame stack underflow"))?;
    if frame.is_call() {
        return Err(MachineError::internal("pop of a call frame"));
    }
    m.truncate(&frame.heights);
    Ok(())
}

pub(super) fn execute_for_cond(m: &mut Machine, stmt: Arc<ForStmt>) -> Result<()> {
    match &stmt.cond {
        Some(cond) => {
            let cond = cond.clone();
            m.push_op(Op::ForCheck { stmt });
            m.push_eval(cond);
        }
        None => {
            m.push_op(Op::ForPost { stmt: stmt.clone() });
            m.push_body(stmt.body.clone());
        }
    }
    Ok(())
}

pub(super) fn execute_for_check(m: &mut Machine, stmt: Arc<ForStmt>) -> Result<()> {
    let cond = m
        .pop_value()?
        .as_bool()
        .ok_or_else(|| MachineError::internal("non-bool loop condition"))?;
    if !cond {
        return execute_pop_frame(m);
    }
    m.push_op(Op::ForPost { stmt: stmt.clone() });
    m.push_body(stmt.body.clone());
    Ok(())
}

pub(super) fn execute_for_post(m: &mut Machine, stmt: Arc<ForStmt>) -> Result<()> {
    let post = stmt.post.clone();
    m.push_op(Op::ForCond { stmt });
    if let Some(post) = post {
        m.push_body(single(*post));
    }
    Ok(())
}

fn range_state(m: &mut Machine) -> Result<&mut RangeState> {
    match m.frames.last_mut().map(|f| &mut f.kind) {
        Some(FrameKind::Loop { range: Some(rs), .. }) => Ok(rs),
        _ => Err(MachineError::internal("range iteration outside its frame")),
    }
}

pub(super) fn execute_range_start(m: &mut Machine, stmt: Arc<RangeStmt>) -> Result<()> {
    let mut x = m.pop_value()?;
    if let Value::Pointer(_) = x.v {
        x = m.deref(&x)?;
    }
    range_state(m)?.x = x;
    m.push_op(Op::RangeIter { stmt });
    Ok(())
}

/// Key and value of the element at `pos`, and the position after it.
fn range_item(m: &mut Machine, x: &TypedValue, pos: usize) -> Result<Option<(TypedValue, TypedValue, usize)>> {
    let key = TypedValue::int(pos as i64);
    match &x.v {
        Value::None => Ok(None),
        Value::String(s) => {
            let Some(c) = s.get(pos..).and_then(|rest| rest.chars().next()) else {
                return Ok(None);
            };
            let value = TypedValue::new(Type::INT32, Value::Int(c as i64));
            Ok(Some((key, value, pos + c.len_utf8())))
        }
        Value::Slice(sv) => {
            if pos >= sv.len {
                return Ok(None);
            }
            let base = m.resolve_handle(&sv.base)?;
            let value = m.read_slot(base, sv.offset + pos)?;
            Ok(Some((key, value, pos + 1)))
        }
        Value::Object(h) => {
            let r = m.resolve_handle(h)?;
            let entry = match &m.heap.obj(r)?.kind {
                ObjectKind::Array { elems } if pos < elems.len() => None,
                ObjectKind::Array { .. } => return Ok(None),
                ObjectKind::Map { map } => match map.entry_at(pos) {
                    Some((k, v)) => Some((k.clone(), v.clone())),
                    None => return Ok(None),
                },
                other => return Err(MachineError::internal(format!("range over {}", other.name()))),
            };
            match entry {
                Some((k, v)) => {
                    let k = m.fill(k)?;
                    let v = m.fill(v)?;
                    Ok(Some((k, v, pos + 1)))
                }
                None => {
                    let value = m.read_slot(r, pos)?;
                    Ok(Some((key, value, pos + 1)))
                }
            }
        }
        other => Err(MachineError::internal(format!("range over {:?}", other))),
    }
}

pub(super) fn execute_range_iter(m: &mut Machine, stmt: Arc<RangeStmt>) -> Result<()> {
    let (x, pos) = {
        let rs = range_state(m)?;
        (rs.x.clone(), rs.pos)
    };
    let Some((key, value, next)) = range_item(m, &x, pos)? else {
        return execute_pop_frame(m);
    };
    range_state(m)?.pos = next;

    m.push_op(Op::RangeIter { stmt: stmt.clone() });
    m.push_body(stmt.body.clone());

    let targets: Vec<(Expr, TypedValue)> = [(stmt.key.clone(), key), (stmt.value.clone(), value)]
        .into_iter()
        .filter_map(|(e, v)| e.map(|e| (e, v)))
        .collect();
    if stmt.define {
        for (e, v) in targets {
            let Expr::Name(nx) = e else {
                return Err(MachineError::internal("range definition of a non-name"));
            };
            if nx.path.is_blank() {
                continue;
            }
            let block = m.block_at_depth(nx.path.depth)?;
            m.store_into(block, nx.path.index as usize, v)?;
        }
        return Ok(());
    }
    m.push_op(Op::Assign { n: targets.len() });
    let mut exprs = Vec::with_capacity(targets.len());
    for (e, v) in targets {
        m.push_value(v);
        exprs.push(e);
    }
    for e in exprs.into_iter().rev() {
        m.push_eval_slot(e);
    }
    Ok(())
}

/* ===================== Switch ===================== */

pub(super) fn execute_switch_start(m: &mut Machine, stmt: Arc<SwitchStmt>) -> Result<()> {
    let tag = stmt.tag.clone();
    m.push_op(Op::SwitchCase { stmt, clause: 0, case: 0 });
    if let Some(tag) = tag {
        m.push_eval(tag);
    }
    Ok(())
}

/// Run the body of `clause`; the switch frame is dropped after it.
fn enter_clause(m: &mut Machine, stmt: &SwitchStmt, clause: usize) -> Result<()> {
    let cl = stmt
        .clauses
        .get(clause)
        .ok_or_else(|| MachineError::internal("switch clause out of range"))?;
    let scope = cl
        .scope
        .ok_or_else(|| MachineError::internal("switch clause without scope"))?;
    m.push_op(Op::PopFrame);
    enter_scope(m, scope)?;
    m.push_body(cl.body.clone());
    Ok(())
}

/// Test the next case expression, skipping the default clause; fall back
/// to it once every case has failed.
pub(super) fn execute_switch_case(m: &mut Machine, stmt: Arc<SwitchStmt>, clause: usize, case: usize) -> Result<()> {
    let Some(cl) = stmt.clauses.get(clause) else {
        return match stmt.clauses.iter().position(|c| c.cases.is_empty()) {
            Some(default) => enter_clause(m, &stmt, default),
            None => execute_pop_frame(m),
        };
    };
    match cl.cases.get(case) {
        Some(x) => {
            let x = x.clone();
            m.push_op(Op::SwitchMatch { stmt, clause, case });
            m.push_eval(x);
        }
        None => m.push_op(Op::SwitchCase {
            stmt,
            clause: clause + 1,
            case: 0,
        }),
    }
    Ok(())
}

pub(super) fn execute_switch_match(m: &mut Machine, stmt: Arc<SwitchStmt>, clause: usize, case: usize) -> Result<()> {
    let v = m.pop_value()?;
    let matched = if stmt.tag.is_some() {
        let tag = m.peek_value(0)?.clone();
        m.values_equal(&tag, &v)?
    } else {
        v.as_bool()
            .ok_or_else(|| MachineError::internal("non-bool case in tagless switch"))?
    };
    if matched {
        return enter_clause(m, &stmt, clause);
    }
    m.push_op(Op::SwitchCase {
        stmt,
        clause,
        case: case + 1,
    });
    Ok(())
}

/* ===================== Branches ===================== */

/// Innermost frame `break`/`continue` applies to, never past a call.
fn branch_target(m: &Machine, b: &BranchStmt) -> Result<usize> {
    for (i, f) in m.frames.iter().enumerate().rev() {
        match &f.kind {
            FrameKind::Call(_) => break,
            FrameKind::Switch if b.op == BranchOp::Continue => continue,
            _ => {}
        }
        match &b.target {
            Some(label) if f.label.as_deref() != Some(label.as_str()) => continue,
            _ => return Ok(i),
        }
    }
    Err(MachineError::internal(format!("{:?} outside of a loop", b.op)))
}

fn execute_branch(m: &mut Machine, b: &BranchStmt) -> Result<()> {
    match b.op {
        BranchOp::Break => {
            let idx = branch_target(m, b)?;
            let heights = m.frames[idx].heights;
            m.frames.truncate(idx);
            m.truncate(&heights);
            Ok(())
        }
        BranchOp::Continue => {
            let idx = branch_target(m, b)?;
            let frame = m.frames[idx].clone();
            let FrameKind::Loop { next, .. } = frame.kind else {
                return Err(MachineError::internal("continue of a switch"));
            };
            // Keep the loop's own block.
            let mut heights = frame.heights;
            heights.blocks += 1;
            m.frames.truncate(idx + 1);
            m.truncate(&heights);
            m.push_op(*next);
            Ok(())
        }
        BranchOp::Goto => Err(MachineError::NotImplemented("goto")),
        BranchOp::Fallthrough => Err(MachineError::NotImplemented("fallthrough")),
    }
}
