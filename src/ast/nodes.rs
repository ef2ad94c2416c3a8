//! Syntax node definitions
//!
//! Nodes are closed sum types per syntactic category. Each variant wraps a
//! struct carrying its own `Attributes`, so position and label access go
//! through the `Node` trait. Nodes are annotated in place by the resolver
//! (value paths, scope ids, resolved types) and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::attributes::{Attributes, Node};
use super::value_path::ValuePath;
use crate::types::Type;
use crate::values::TypedValue;

pub type Name = String;

/// A statement list shared between the syntax tree and function values.
pub type Body = Arc<Vec<Stmt>>;

/// Key of a static block in the resolver registry: a per-package tag in the
/// high half and the block's preprocessing order in the low half, so the same
/// package gets the same ids on every machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub u64);

impl ScopeId {
    pub fn new(package_tag: u32, local: u32) -> Self {
        ScopeId(((package_tag as u64) << 32) | local as u64)
    }

    pub fn package_tag(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn local(self) -> u32 {
        self.0 as u32
    }
}

/// Capability of nodes that introduce a scope.
pub trait BlockNode: Node {
    fn scope(&self) -> Option<ScopeId>;
    fn set_scope(&mut self, id: ScopeId);
}

/* ===================== Operators ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Quo,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndNot,
    LAnd,
    LOr,
    Eql,
    Neq,
    Lss,
    Leq,
    Gtr,
    Geq,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eql | BinaryOp::Neq | BinaryOp::Lss | BinaryOp::Leq | BinaryOp::Gtr | BinaryOp::Geq
        )
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Quo => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::AndNot => "&^",
            BinaryOp::LAnd => "&&",
            BinaryOp::LOr => "||",
            BinaryOp::Eql => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lss => "<",
            BinaryOp::Leq => "<=",
            BinaryOp::Gtr => ">",
            BinaryOp::Geq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Pos,
    Neg,
    Not,
    Xor,
    Arrow,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Pos => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::Xor => "^",
            UnaryOp::Arrow => "<-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    Define,
    Add,
    Sub,
    Mul,
    Quo,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndNot,
}

impl AssignOp {
    /// The binary operator behind an op-assignment such as `+=`.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign | AssignOp::Define => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Quo => Some(BinaryOp::Quo),
            AssignOp::Rem => Some(BinaryOp::Rem),
            AssignOp::And => Some(BinaryOp::And),
            AssignOp::Or => Some(BinaryOp::Or),
            AssignOp::Xor => Some(BinaryOp::Xor),
            AssignOp::Shl => Some(BinaryOp::Shl),
            AssignOp::Shr => Some(BinaryOp::Shr),
            AssignOp::AndNot => Some(BinaryOp::AndNot),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LitKind {
    Int,
    Float,
    Char,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchOp {
    Break,
    Continue,
    Goto,
    Fallthrough,
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    Name(NameExpr),
    BasicLit(BasicLitExpr),
    Const(ConstExpr),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Call(CallExpr),
    Index(IndexExpr),
    Selector(SelectorExpr),
    Slice(SliceExpr),
    Star(StarExpr),
    Ref(RefExpr),
    TypeAssert(TypeAssertExpr),
    CompositeLit(CompositeLitExpr),
    FuncLit(FuncLitExpr),
    Type(TypeValueExpr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub name: Name,
    #[serde(default)]
    pub path: ValuePath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicLitExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub kind: LitKind,
    pub value: String,
}

/// A literal already converted to a concrete typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub value: TypedValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub op: UnaryOp,
    pub x: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub func: Box<Expr>,
    #[serde(default)]
    pub args: Vec<Expr>,
    /// The last argument is spread with `...`.
    #[serde(default)]
    pub varg: bool,
    /// Number of values the arguments push (a single multi-result call may
    /// push several). Filled in by the resolver.
    #[serde(default)]
    pub num_args: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Box<Expr>,
    pub index: Box<Expr>,
    /// Map lookup in `v, ok := m[k]` form.
    #[serde(default)]
    pub has_ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Box<Expr>,
    pub sel: Name,
    #[serde(default)]
    pub path: ValuePath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Box<Expr>,
    #[serde(default)]
    pub low: Option<Box<Expr>>,
    #[serde(default)]
    pub high: Option<Box<Expr>>,
    #[serde(default)]
    pub max: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAssertExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Box<Expr>,
    pub ty: TypeExpr,
    #[serde(default)]
    pub has_ok: bool,
    #[serde(default)]
    pub resolved: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueExpr {
    #[serde(default)]
    pub key: Option<Expr>,
    pub value: Expr,
    /// Struct field index or constant array index, set by the resolver.
    #[serde(default)]
    pub slot: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeLitExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub ty: TypeExpr,
    #[serde(default)]
    pub elts: Vec<KeyValueExpr>,
    #[serde(default)]
    pub resolved: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncLitExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub ty: FuncTypeExpr,
    pub body: Body,
    #[serde(default)]
    pub scope: Option<ScopeId>,
    #[serde(default)]
    pub resolved: Option<Type>,
}

/// A type used in expression position, e.g. the first argument of `make`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeValueExpr {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub ty: TypeExpr,
    #[serde(default)]
    pub resolved: Option<Type>,
}

/* ===================== Type Expressions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum TypeExpr {
    Name(NameExpr),
    /// `pkg.Name` for a type exported by an imported package.
    Qualified { pkg: NameExpr, name: Name },
    /// `[N]T`; a missing length takes the element count of the literal.
    Array {
        #[serde(default)]
        len: Option<u64>,
        elem: Box<TypeExpr>,
    },
    Slice { elem: Box<TypeExpr> },
    Map { key: Box<TypeExpr>, value: Box<TypeExpr> },
    Pointer { elem: Box<TypeExpr> },
    Struct { fields: Vec<FieldTypeExpr> },
    Func(FuncTypeExpr),
    Interface { methods: Vec<FieldTypeExpr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTypeExpr {
    #[serde(default)]
    pub name: Name,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncTypeExpr {
    #[serde(default)]
    pub params: Vec<FieldTypeExpr>,
    #[serde(default)]
    pub results: Vec<FieldTypeExpr>,
    /// The last parameter is `...T`.
    #[serde(default)]
    pub variadic: bool,
}

/* ===================== Statements ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Expr(ExprStmt),
    Assign(AssignStmt),
    IncDec(IncDecStmt),
    Block(BlockStmt),
    If(IfStmt),
    For(ForStmt),
    Range(RangeStmt),
    Switch(SwitchStmt),
    Branch(BranchStmt),
    Return(ReturnStmt),
    Defer(DeferStmt),
    Go(GoStmt),
    Decl(DeclStmt),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub lhs: Vec<Expr>,
    pub op: AssignOp,
    pub rhs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncDecStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Expr,
    pub inc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub body: Body,
    #[serde(default)]
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    #[serde(default)]
    pub init: Option<Box<Stmt>>,
    pub cond: Expr,
    pub then: BlockStmt,
    #[serde(default)]
    pub els: Option<BlockStmt>,
    #[serde(default)]
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    #[serde(default)]
    pub init: Option<Box<Stmt>>,
    #[serde(default)]
    pub cond: Option<Expr>,
    #[serde(default)]
    pub post: Option<Box<Stmt>>,
    pub body: Body,
    #[serde(default)]
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub x: Expr,
    #[serde(default)]
    pub key: Option<Expr>,
    #[serde(default)]
    pub value: Option<Expr>,
    /// `for k, v := range x` rather than `for k, v = range x`.
    #[serde(default)]
    pub define: bool,
    pub body: Body,
    #[serde(default)]
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    #[serde(default)]
    pub init: Option<Box<Stmt>>,
    #[serde(default)]
    pub tag: Option<Expr>,
    pub clauses: Vec<SwitchClause>,
    #[serde(default)]
    pub scope: Option<ScopeId>,
}

/// A `case` (or `default`, when `cases` is empty) of a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchClause {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    #[serde(default)]
    pub cases: Vec<Expr>,
    pub body: Body,
    #[serde(default)]
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub op: BranchOp,
    #[serde(default)]
    pub target: Option<Name>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    #[serde(default)]
    pub results: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub call: CallExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub call: CallExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclStmt {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub decls: Vec<Decl>,
}

/* ===================== Declarations ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Decl {
    Func(FuncDecl),
    Value(ValueDecl),
    Type(TypeDecl),
    Import(ImportDecl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDecl {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub name: Name,
    #[serde(default)]
    pub recv: Option<FieldTypeExpr>,
    pub ty: FuncTypeExpr,
    pub body: Body,
    #[serde(default)]
    pub scope: Option<ScopeId>,
    /// Slot of the function in the package block (plain functions only).
    #[serde(default)]
    pub path: ValuePath,
    /// Signature without the receiver.
    #[serde(default)]
    pub resolved: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDecl {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub names: Vec<NameExpr>,
    #[serde(default)]
    pub ty: Option<TypeExpr>,
    #[serde(default)]
    pub values: Vec<Expr>,
    #[serde(default)]
    pub is_const: bool,
    /// Declared type, or the inferred type of each name.
    #[serde(default)]
    pub resolved: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub name: NameExpr,
    pub ty: TypeExpr,
    #[serde(default)]
    pub is_alias: bool,
    #[serde(default)]
    pub resolved: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDecl {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    #[serde(default)]
    pub name: Option<Name>,
    pub path: String,
}

impl ImportDecl {
    /// The local name: the explicit alias or the last path segment.
    pub fn local_name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => self.path.rsplit('/').next().unwrap_or(&self.path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub name: String,
    #[serde(default)]
    pub decls: Vec<Decl>,
    #[serde(default)]
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageNode {
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attrs: Attributes,
    pub name: Name,
    pub path: String,
    #[serde(default)]
    pub files: Vec<FileNode>,
    #[serde(default)]
    pub scope: Option<ScopeId>,
}

/* ===================== Trait Impls ===================== */

macro_rules! impl_node {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Node for $ty {
                fn attrs(&self) -> &Attributes {
                    &self.attrs
                }
                fn attrs_mut(&mut self) -> &mut Attributes {
                    &mut self.attrs
                }
            }
        )*
    };
}

impl_node!(
    NameExpr,
    BasicLitExpr,
    ConstExpr,
    BinaryExpr,
    UnaryExpr,
    CallExpr,
    IndexExpr,
    SelectorExpr,
    SliceExpr,
    StarExpr,
    RefExpr,
    TypeAssertExpr,
    CompositeLitExpr,
    FuncLitExpr,
    TypeValueExpr,
    ExprStmt,
    AssignStmt,
    IncDecStmt,
    BlockStmt,
    IfStmt,
    ForStmt,
    RangeStmt,
    SwitchStmt,
    SwitchClause,
    BranchStmt,
    ReturnStmt,
    DeferStmt,
    GoStmt,
    DeclStmt,
    FuncDecl,
    ValueDecl,
    TypeDecl,
    ImportDecl,
    FileNode,
    PackageNode,
);

macro_rules! impl_block_node {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BlockNode for $ty {
                fn scope(&self) -> Option<ScopeId> {
                    self.scope
                }
                fn set_scope(&mut self, id: ScopeId) {
                    self.scope = Some(id);
                }
            }
        )*
    };
}

impl_block_node!(
    FuncLitExpr,
    BlockStmt,
    IfStmt,
    ForStmt,
    RangeStmt,
    SwitchStmt,
    SwitchClause,
    FuncDecl,
    FileNode,
    PackageNode,
);

macro_rules! dispatch_node {
    ($enum:ident { $($variant:ident),* $(,)? }) => {
        impl Node for $enum {
            fn attrs(&self) -> &Attributes {
                match self {
                    $($enum::$variant(n) => n.attrs(),)*
                }
            }
            fn attrs_mut(&mut self) -> &mut Attributes {
                match self {
                    $($enum::$variant(n) => n.attrs_mut(),)*
                }
            }
        }
    };
}

dispatch_node!(Expr {
    Name,
    BasicLit,
    Const,
    Binary,
    Unary,
    Call,
    Index,
    Selector,
    Slice,
    Star,
    Ref,
    TypeAssert,
    CompositeLit,
    FuncLit,
    Type,
});

dispatch_node!(Stmt {
    Expr,
    Assign,
    IncDec,
    Block,
    If,
    For,
    Range,
    Switch,
    Branch,
    Return,
    Defer,
    Go,
    Decl,
});

dispatch_node!(Decl {
    Func,
    Value,
    Type,
    Import,
});

impl Expr {
    /// True for expressions that denote a storage location.
    pub fn is_addressable(&self) -> bool {
        match self {
            Expr::Name(_) | Expr::Star(_) | Expr::Selector(_) => true,
            Expr::Index(ix) => !ix.has_ok,
            _ => false,
        }
    }
}
