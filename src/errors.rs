//! Error types
//!
//! Resolution errors are raised while preprocessing and are never retried.
//! Machine errors are fatal for the current top-level call; language-level
//! panics are not errors and travel through the exception/unwind path instead.

use crate::ownership::ObjectId;
use crate::values::TypedValue;
use thiserror::Error;

/* ===================== Resolution ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("name {name} not declared")]
    NameNotDeclared { name: String },

    #[error("cannot change type of already-defined name {name}")]
    TypeChanged { name: String },

    #[error("cannot change value of already-defined name {name}")]
    ValueChanged { name: String },

    #[error("cannot change const-ness of name {name}")]
    ConstChanged { name: String },

    #[error("value path for {name} exceeds the maximum block depth")]
    DepthOverflow { name: String },

    #[error("too many variables in block")]
    TooManyNames,

    #[error("invalid value path: {0}")]
    InvalidPath(String),

    #[error("{name} is not a type")]
    NotAType { name: String },

    #[error("unknown field or method {name} on {on}")]
    UnknownSelector { name: String, on: String },

    #[error("invalid constant {literal}: {reason}")]
    InvalidConstant { literal: String, reason: String },

    #[error("package {path} not found")]
    PackageNotFound { path: String },

    #[error("unsupported construct: {0}")]
    Unsupported(String),
}

/* ===================== Persistence ===================== */

#[derive(Debug, Error)]
pub enum ObjectIdError {
    #[error("malformed object id {0:?}")]
    Malformed(String),

    #[error("invalid package id hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid object nonce: {0}")]
    Nonce(#[from] std::num::ParseIntError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    #[error("package {0} not found")]
    PackageNotFound(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum RealmError {
    #[error("cannot attach object owned by realm {owner} into realm {realm}")]
    CrossRealm { owner: String, realm: String },

    #[error("realm {0} is not loaded")]
    UnknownRealm(String),

    #[error("cannot modify persisted object {0} outside of its realm")]
    NoRealm(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/* ===================== Machine ===================== */

#[derive(Debug, Error)]
pub enum MachineError {
    /// An opcode handler saw state the preprocessor should have ruled out.
    #[error("should not happen: {0}")]
    Internal(String),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// A runtime fault such as an index out of range. The machine turns it
    /// into a language-level panic, so callers only see it wrapped in
    /// `UnhandledPanic`.
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("unhandled panic: {descriptor}")]
    UnhandledPanic {
        descriptor: String,
        exception: TypedValue,
    },

    #[error("allocation limit exceeded: {allocated} > {limit} bytes")]
    AllocLimitExceeded { allocated: usize, limit: usize },

    #[error("machine was discarded after a failed call")]
    Discarded,

    #[error("function {0} not found")]
    FuncNotFound(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Realm(#[from] RealmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MachineError {
    pub fn internal(msg: impl Into<String>) -> Self {
        MachineError::Internal(msg.into())
    }
}
