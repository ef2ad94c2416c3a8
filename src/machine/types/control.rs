//! Frames, continuations and assignment targets

use std::sync::Arc;

use super::ops::Op;
use super::phase::CallPhase;
use crate::ast::{Body, Name};
use crate::heap::ObjectRef;
use crate::types::Type;
use crate::values::{FuncValue, TypedValue};
use serde::{Deserialize, Serialize};

/* ===================== Stack Heights ===================== */

/// Lengths of every machine stack at one instant. Frames record them on
/// entry so that unwinding can cut all stacks back in one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heights {
    pub ops: usize,
    pub values: usize,
    pub exprs: usize,
    pub stmts: usize,
    pub slots: usize,
    pub blocks: usize,
}

/* ===================== Statement Continuations ===================== */

/// A statement list being executed and the index of the next statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StmtCont {
    pub body: Body,
    pub next: usize,
}

impl StmtCont {
    pub fn new(body: Body) -> Self {
        StmtCont { body, next: 0 }
    }
}

/* ===================== Assignment Targets ===================== */

/// Where an assignment writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Slot {
    /// Slot `index` of an object: block variable, field, element, heap item.
    Pointer { base: ObjectRef, index: usize },
    MapEntry { map: ObjectRef, key: TypedValue, elem: Type },
    /// The blank identifier.
    Discard,
}

/* ===================== Frames ===================== */

/// A deferred call, with function and arguments evaluated at the `defer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defer {
    pub func: TypedValue,
    pub receiver: Option<TypedValue>,
    pub args: Vec<TypedValue>,
    pub varg: bool,
}

/// Iteration state of a `range` loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeState {
    pub x: TypedValue,
    /// Element index, entry index, or byte offset for strings.
    pub pos: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFrame {
    pub func: Arc<FuncValue>,
    pub receiver: Option<TypedValue>,
    pub num_args: usize,
    pub varg: bool,
    pub is_native: bool,
    /// Called by the defer machinery rather than by a call expression.
    pub is_defer: bool,
    pub phase: CallPhase,
    /// The function's block, once allocated.
    pub block: Option<ObjectRef>,
    /// Stack heights at the start of the body.
    pub body_heights: Heights,
    pub defers: Vec<Defer>,
    /// Panic that was in flight when this frame raised its own.
    pub outer_exception: Option<TypedValue>,
    pub last_package: Option<String>,
    pub last_realm: Option<String>,
}

/// Frame kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum FrameKind {
    Call(Box<CallFrame>),
    /// `next` is pushed by `continue` to start the next iteration.
    Loop { range: Option<RangeState>, next: Box<Op> },
    Switch,
}

/// One active function call, loop or switch. `heights` are the stack
/// heights just before the frame was entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(flatten)]
    pub kind: FrameKind,
    pub label: Option<Name>,
    pub heights: Heights,
}

impl Frame {
    pub fn is_call(&self) -> bool {
        matches!(self.kind, FrameKind::Call(_))
    }

    pub fn as_call(&self) -> Option<&CallFrame> {
        match &self.kind {
            FrameKind::Call(cf) => Some(cf),
            _ => None,
        }
    }

    pub fn as_call_mut(&mut self) -> Option<&mut CallFrame> {
        match &mut self.kind {
            FrameKind::Call(cf) => Some(cf),
            _ => None,
        }
    }
}
