//! Resolved name addresses
//!
//! A `ValuePath` is computed once by the resolver and read at runtime to find
//! a value in O(1): either `depth` hops up the block chain then slot `index`,
//! or a field/method position within a value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ResolveError;

/// Maximum number of block hops a path may encode.
pub const MAX_DEPTH: usize = 0xff;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PathKind {
    Uverse = 0x00,
    #[default]
    Block = 0x01,
    Field = 0x02,
    ValMethod = 0x03,
    PtrMethod = 0x04,
    Interface = 0x05,
    SubrefField = 0x06,
    DerefField = 0x12,
    DerefValMethod = 0x13,
    DerefPtrMethod = 0x14,
    DerefInterface = 0x15,
    Native = 0x20,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValuePath {
    pub kind: PathKind,
    pub depth: u8,
    pub index: u16,
    pub name: String,
}

impl ValuePath {
    pub fn new(kind: PathKind, depth: u8, index: u16, name: impl Into<String>) -> Self {
        ValuePath {
            kind,
            depth,
            index,
            name: name.into(),
        }
    }

    pub fn block(depth: u8, index: u16, name: impl Into<String>) -> Self {
        Self::new(PathKind::Block, depth, index, name)
    }

    pub fn uverse(index: u16, name: impl Into<String>) -> Self {
        Self::new(PathKind::Uverse, 0, index, name)
    }

    pub fn field(index: u16, name: impl Into<String>) -> Self {
        Self::new(PathKind::Field, 0, index, name)
    }

    /// The sentinel path of the blank identifier.
    pub fn blank() -> Self {
        Self::block(0, 0, "_")
    }

    pub fn is_blank(&self) -> bool {
        self.kind == PathKind::Block && self.depth == 0 && self.name == "_"
    }

    /// True for paths the resolver has not filled in yet.
    pub fn is_unresolved(&self) -> bool {
        self.kind == PathKind::Block && self.depth == 0 && self.name != "_"
    }

    pub fn validate(&self) -> Result<(), ResolveError> {
        let ok = match self.kind {
            PathKind::Uverse => self.depth == 0,
            PathKind::Block => self.depth > 0 || self.is_blank(),
            PathKind::Field
            | PathKind::ValMethod
            | PathKind::PtrMethod
            | PathKind::Interface
            | PathKind::DerefValMethod
            | PathKind::DerefPtrMethod
            | PathKind::DerefInterface
            | PathKind::Native => self.depth == 0,
            PathKind::SubrefField | PathKind::DerefField => self.depth <= 3,
        };
        if ok {
            Ok(())
        } else {
            Err(ResolveError::InvalidPath(self.to_string()))
        }
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({},{},{})",
            self.kind, self.depth, self.index, self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_path() {
        let vp = ValuePath::blank();
        assert!(vp.is_blank());
        assert!(!vp.is_unresolved());
        assert!(vp.validate().is_ok());
    }

    #[test]
    fn test_validate_depth_rules() {
        assert!(ValuePath::block(0, 3, "x").validate().is_err());
        assert!(ValuePath::block(2, 3, "x").validate().is_ok());
        assert!(ValuePath::new(PathKind::Uverse, 1, 0, "len").validate().is_err());
        assert!(ValuePath::new(PathKind::Field, 1, 0, "f").validate().is_err());
        assert!(ValuePath::new(PathKind::DerefField, 2, 0, "f").validate().is_ok());
    }

    #[test]
    fn test_kind_discriminants() {
        assert_eq!(PathKind::DerefField as u8, 0x12);
        assert_eq!(PathKind::Native as u8, 0x20);
    }
}
