//! A deterministic interpreter for a Go-like language with persistent
//! realms.
//!
//! Packages are preprocessed once (`resolver`), then run by a stack machine
//! (`machine`) whose objects live in a generational heap (`heap`). Objects
//! reachable from a realm package are owned, hashed and saved through a
//! host-provided `Store` at every realm boundary (`ownership`).

pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod heap;
pub mod machine;
pub mod ownership;
pub mod resolver;
pub mod types;
pub mod values;

pub use config::{ExecContext, MachineConfig, MachineOptions};
pub use diagnostics::init_tracing;
pub use errors::{MachineError, RealmError, ResolveError, StoreError};
pub use machine::{Machine, Step};
pub use ownership::{MemStore, Store};
