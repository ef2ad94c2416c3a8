//! Core execution loop
//!
//! `step` pops one op and dispatches it; `run` drives `step` until the op
//! stack is empty. Runtime faults raised by a handler become string panics
//! so deferred calls can still recover them. Any other error, including a
//! panic nobody recovered, leaves the machine `Failed`.

use super::calls::*;
use super::expressions::*;
use super::statements::*;
use super::types::{MachineState, Op};
use super::vm::{Machine, Result};
use crate::errors::MachineError;
use crate::values::TypedValue;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

impl Machine {
    /// Run until the op stack is empty.
    pub fn run(&mut self) -> Result<()> {
        self.state = MachineState::Running;
        loop {
            match self.step() {
                Ok(Step::Continue) => continue,
                Ok(Step::Done) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "machine failed");
                    self.state = MachineState::Failed;
                    return Err(e);
                }
            }
        }
        self.state = MachineState::Idle;
        Ok(())
    }

    /// Execute one op.
    pub fn step(&mut self) -> Result<Step> {
        let Some(op) = self.ops.pop() else {
            return Ok(Step::Done);
        };
        match self.dispatch(op) {
            Ok(()) => Ok(Step::Continue),
            Err(MachineError::Runtime(msg)) => {
                self.raise_panic(TypedValue::string(msg))?;
                Ok(Step::Continue)
            }
            Err(e) => Err(e),
        }
    }

    fn dispatch(&mut self, op: Op) -> Result<()> {
        let m = self;
        match op {
            /* ===================== Statements ===================== */
            Op::Body => execute_body(m),
            Op::PopBlock => {
                m.pop_block();
                Ok(())
            }
            Op::PopFrame => execute_pop_frame(m),
            Op::DropValues { height } => {
                m.values.truncate(height);
                Ok(())
            }
            Op::Assign { n } => execute_assign(m, n),
            Op::OpAssign { op } => execute_op_assign(m, op),
            Op::IncDec { inc } => execute_inc_dec(m, inc),
            Op::ZeroVars { vars } => execute_zero_vars(m, vars),
            Op::IfBranch { stmt } => execute_if_branch(m, stmt),
            Op::ForCond { stmt } => execute_for_cond(m, stmt),
            Op::ForCheck { stmt } => execute_for_check(m, stmt),
            Op::ForPost { stmt } => execute_for_post(m, stmt),
            Op::RangeStart { stmt } => execute_range_start(m, stmt),
            Op::RangeIter { stmt } => execute_range_iter(m, stmt),
            Op::SwitchStart { stmt } => execute_switch_start(m, stmt),
            Op::SwitchCase { stmt, clause, case } => execute_switch_case(m, stmt, clause, case),
            Op::SwitchMatch { stmt, clause, case } => execute_switch_match(m, stmt, clause, case),
            Op::Defer { call } => execute_defer(m, call),

            /* ===================== Expressions ===================== */
            Op::Eval => execute_eval(m),
            Op::EvalSlot => execute_eval_slot(m),
            Op::Binary { op } => execute_binary(m, op),
            Op::ShortCircuit { op } => execute_short_circuit(m, op),
            Op::Unary { op } => execute_unary(m, op),
            Op::Index { has_ok } => execute_index(m, has_ok),
            Op::IndexSlot => execute_index_slot(m),
            Op::Selector { path } => execute_selector(m, path),
            Op::SelectorSlot { path } => execute_selector_slot(m, path),
            Op::SelectMethod { path } => execute_select_method(m, path),
            Op::Slice { low, high, max } => execute_slice(m, low, high, max),
            Op::Deref => execute_deref(m),
            Op::DerefSlot => execute_deref_slot(m),
            Op::AddrOf => execute_addr_of(m),
            Op::Box => execute_box(m),
            Op::TypeAssert { ty, has_ok } => execute_type_assert(m, ty, has_ok),
            Op::Composite { ty, slots } => execute_composite(m, ty, slots),

            /* ===================== Calls ===================== */
            Op::Precall { call } => execute_precall(m, call),
            Op::Call => execute_call(m),
            Op::Return => execute_return(m),
            Op::ReturnCallDefers => execute_return_call_defers(m),
            Op::ReturnFromBlock => execute_return_from_block(m),
            Op::PanicUnwind => execute_panic_unwind(m),
        }
    }
}
