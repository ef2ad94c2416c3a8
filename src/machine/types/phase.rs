//! Phase enums for frames that run in several steps
//!
//! Serialized as u8 so a frame stack can be dumped and inspected.

use serde::{Deserialize, Serialize};

/// Where a call frame is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallPhase {
    /// Executing the body.
    Running = 0,
    /// Running deferred calls after a `return`.
    Returning = 1,
    /// Running deferred calls while a panic propagates.
    Unwinding = 2,
}

/// Lifecycle of the machine as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineState {
    Idle = 0,
    Running = 1,
    /// A call failed; the machine refuses further work.
    Failed = 2,
}
