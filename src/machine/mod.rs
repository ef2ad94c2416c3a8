//! # Machine - Resumable Stack-Driven Interpreter
//!
//! ## Core Principles
//!
//! 1. **Stack-driven execution**: ops, values, expressions, statements,
//!    blocks and frames all live in explicit stacks; no host recursion
//! 2. **One op per step**: `step()` pops a single op and dispatches it, so a
//!    host may stop between any two steps
//! 3. **Frames carry heights**: calls, loops and switches record the stack
//!    heights at entry, which makes return, break and panic unwinding a cut
//! 4. **Injected effects**: the store and the output sink come from the host

pub mod calls;
pub mod exec_loop;
pub mod expressions;
pub mod inspect;
pub mod operators;
pub mod package;
pub mod statements;
pub mod stdlib;
pub mod types;
pub mod vm;

#[cfg(test)]
mod tests;

pub use exec_loop::Step;
pub use types::{CallPhase, MachineState};
pub use vm::{Machine, PackageBlocks};
