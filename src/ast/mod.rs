//! Syntax tree
//!
//! The tree arrives from an external parser (or the `build` helpers), is
//! annotated in place by the resolver, and is read-only during execution.

pub mod attributes;
pub mod build;
mod display;
pub mod nodes;
pub mod value_path;

pub use attributes::{Attributes, Node};
pub use nodes::*;
pub use value_path::{PathKind, ValuePath, MAX_DEPTH};
