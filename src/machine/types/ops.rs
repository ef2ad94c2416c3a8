//! Opcodes of the continuation stack
//!
//! The machine pops one `Op` per step. Expression ops consume their operands
//! from the value stack (or the slot stack for assignment targets) and push
//! their result; statement ops drive loops, switches and calls.

use std::sync::Arc;

use crate::ast::{BinaryOp, ForStmt, IfStmt, RangeStmt, SwitchStmt, UnaryOp, ValuePath};
use crate::types::Type;
use serde::{Deserialize, Serialize};

/// Shape of a pending call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Values pushed for the arguments.
    pub num_args: usize,
    /// The last argument is spread with `...`.
    pub varg: bool,
    /// A receiver sits between the function and the arguments.
    pub method: bool,
    pub is_defer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum Op {
    /* ===================== Statements ===================== */
    /// Run the next statement of the top statement continuation.
    Body,
    PopBlock,
    PopFrame,
    /// Cut the value stack back to this height.
    DropValues { height: usize },
    /// Pop n values and n slots; store each value into its slot.
    Assign { n: usize },
    OpAssign { op: BinaryOp },
    IncDec { inc: bool },
    /// Store zero values into the declared variables.
    ZeroVars { vars: Vec<(ValuePath, Type)> },
    IfBranch { stmt: Arc<IfStmt> },
    ForCond { stmt: Arc<ForStmt> },
    ForCheck { stmt: Arc<ForStmt> },
    ForPost { stmt: Arc<ForStmt> },
    RangeStart { stmt: Arc<RangeStmt> },
    RangeIter { stmt: Arc<RangeStmt> },
    SwitchStart { stmt: Arc<SwitchStmt> },
    SwitchCase { stmt: Arc<SwitchStmt>, clause: usize, case: usize },
    SwitchMatch { stmt: Arc<SwitchStmt>, clause: usize, case: usize },
    Defer { call: CallInfo },

    /* ===================== Expressions ===================== */
    /// Evaluate the top of the expression stack to a value.
    Eval,
    /// Evaluate the top of the expression stack to an assignment target.
    EvalSlot,
    Binary { op: BinaryOp },
    /// Left operand of `&&` / `||` is on the value stack, right one on the
    /// expression stack.
    ShortCircuit { op: BinaryOp },
    Unary { op: UnaryOp },
    Index { has_ok: bool },
    IndexSlot,
    Selector { path: ValuePath },
    SelectorSlot { path: ValuePath },
    /// Replace a receiver value by the method and the receiver to bind.
    SelectMethod { path: ValuePath },
    Slice { low: bool, high: bool, max: bool },
    Deref,
    DerefSlot,
    AddrOf,
    /// Move a value into a fresh heap item and push a pointer to it.
    Box,
    TypeAssert { ty: Type, has_ok: bool },
    Composite { ty: Type, slots: Vec<Option<usize>> },

    /* ===================== Calls ===================== */
    Precall { call: CallInfo },
    Call,
    /// Explicit results are on the value stack.
    Return,
    ReturnCallDefers,
    /// Results are read from the function block.
    ReturnFromBlock,
    PanicUnwind,
}
