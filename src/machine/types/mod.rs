//! Types used by the machine
//!
//! - Ops (the continuation stack)
//! - Frames (calls, loops, switches) and their stack heights
//! - Phase enums for multi-step frames

pub mod control;
pub mod ops;
pub mod phase;

pub use control::{CallFrame, Defer, Frame, FrameKind, Heights, RangeState, Slot, StmtCont};
pub use ops::{CallInfo, Op};
pub use phase::{CallPhase, MachineState};
