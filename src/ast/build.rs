//! Node constructors
//!
//! Parsing lives outside this crate; hosts and tests assemble trees with these
//! helpers (or deserialize them from JSON). Every node starts with default
//! attributes and unresolved paths.

use std::sync::Arc;

use super::attributes::{Attributes, Node};
use super::nodes::*;
use super::value_path::ValuePath;

/* ===================== Expressions ===================== */

pub fn name(n: &str) -> Expr {
    Expr::Name(name_expr(n))
}

pub fn name_expr(n: &str) -> NameExpr {
    NameExpr {
        attrs: Attributes::default(),
        name: n.to_string(),
        path: ValuePath::default(),
    }
}

fn lit(kind: LitKind, value: String) -> Expr {
    Expr::BasicLit(BasicLitExpr {
        attrs: Attributes::default(),
        kind,
        value,
    })
}

pub fn int(v: i64) -> Expr {
    lit(LitKind::Int, v.to_string())
}

/// An integer literal given as text, for values beyond 64 bits.
pub fn int_lit(text: &str) -> Expr {
    lit(LitKind::Int, text.to_string())
}

pub fn float(v: f64) -> Expr {
    let mut text = v.to_string();
    if !text.contains(['.', 'e', 'E']) {
        text.push_str(".0");
    }
    lit(LitKind::Float, text)
}

pub fn char_lit(c: char) -> Expr {
    lit(LitKind::Char, c.to_string())
}

pub fn string(s: &str) -> Expr {
    lit(LitKind::String, s.to_string())
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(BinaryExpr {
        attrs: Attributes::default(),
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn unary(op: UnaryOp, x: Expr) -> Expr {
    Expr::Unary(UnaryExpr {
        attrs: Attributes::default(),
        op,
        x: Box::new(x),
    })
}

pub fn call_expr(func: Expr, args: Vec<Expr>) -> CallExpr {
    CallExpr {
        attrs: Attributes::default(),
        func: Box::new(func),
        args,
        varg: false,
        num_args: 0,
    }
}

pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call(call_expr(func, args))
}

/// `f(args...)` with the last argument spread.
pub fn call_spread(func: Expr, args: Vec<Expr>) -> Expr {
    let mut cx = call_expr(func, args);
    cx.varg = true;
    Expr::Call(cx)
}

pub fn index(x: Expr, i: Expr) -> Expr {
    Expr::Index(IndexExpr {
        attrs: Attributes::default(),
        x: Box::new(x),
        index: Box::new(i),
        has_ok: false,
    })
}

/// `m[k]` in comma-ok form.
pub fn index_ok(x: Expr, i: Expr) -> Expr {
    Expr::Index(IndexExpr {
        attrs: Attributes::default(),
        x: Box::new(x),
        index: Box::new(i),
        has_ok: true,
    })
}

pub fn sel(x: Expr, field: &str) -> Expr {
    Expr::Selector(SelectorExpr {
        attrs: Attributes::default(),
        x: Box::new(x),
        sel: field.to_string(),
        path: ValuePath::default(),
    })
}

pub fn slice_expr(x: Expr, low: Option<Expr>, high: Option<Expr>) -> Expr {
    Expr::Slice(SliceExpr {
        attrs: Attributes::default(),
        x: Box::new(x),
        low: low.map(Box::new),
        high: high.map(Box::new),
        max: None,
    })
}

pub fn star(x: Expr) -> Expr {
    Expr::Star(StarExpr {
        attrs: Attributes::default(),
        x: Box::new(x),
    })
}

pub fn addr(x: Expr) -> Expr {
    Expr::Ref(RefExpr {
        attrs: Attributes::default(),
        x: Box::new(x),
    })
}

pub fn type_assert(x: Expr, ty: TypeExpr, has_ok: bool) -> Expr {
    Expr::TypeAssert(TypeAssertExpr {
        attrs: Attributes::default(),
        x: Box::new(x),
        ty,
        has_ok,
        resolved: None,
    })
}

pub fn composite(ty: TypeExpr, values: Vec<Expr>) -> Expr {
    keyed(
        ty,
        values.into_iter().map(|value| (None, value)).collect(),
    )
}

pub fn keyed(ty: TypeExpr, elts: Vec<(Option<Expr>, Expr)>) -> Expr {
    Expr::CompositeLit(CompositeLitExpr {
        attrs: Attributes::default(),
        ty,
        elts: elts
            .into_iter()
            .map(|(key, value)| KeyValueExpr {
                key,
                value,
                slot: None,
            })
            .collect(),
        resolved: None,
    })
}

pub fn func_lit(ty: FuncTypeExpr, body: Vec<Stmt>) -> Expr {
    Expr::FuncLit(FuncLitExpr {
        attrs: Attributes::default(),
        ty,
        body: Arc::new(body),
        scope: None,
        resolved: None,
    })
}

pub fn type_value(ty: TypeExpr) -> Expr {
    Expr::Type(TypeValueExpr {
        attrs: Attributes::default(),
        ty,
        resolved: None,
    })
}

/* ===================== Type Expressions ===================== */

pub fn tname(n: &str) -> TypeExpr {
    TypeExpr::Name(name_expr(n))
}

pub fn tqualified(pkg: &str, n: &str) -> TypeExpr {
    TypeExpr::Qualified {
        pkg: name_expr(pkg),
        name: n.to_string(),
    }
}

pub fn tslice(elem: TypeExpr) -> TypeExpr {
    TypeExpr::Slice {
        elem: Box::new(elem),
    }
}

pub fn tarray(len: Option<u64>, elem: TypeExpr) -> TypeExpr {
    TypeExpr::Array {
        len,
        elem: Box::new(elem),
    }
}

pub fn tmap(key: TypeExpr, value: TypeExpr) -> TypeExpr {
    TypeExpr::Map {
        key: Box::new(key),
        value: Box::new(value),
    }
}

pub fn tptr(elem: TypeExpr) -> TypeExpr {
    TypeExpr::Pointer {
        elem: Box::new(elem),
    }
}

pub fn tstruct(fields: Vec<FieldTypeExpr>) -> TypeExpr {
    TypeExpr::Struct { fields }
}

pub fn tinterface(methods: Vec<FieldTypeExpr>) -> TypeExpr {
    TypeExpr::Interface { methods }
}

pub fn field(n: &str, ty: TypeExpr) -> FieldTypeExpr {
    FieldTypeExpr {
        name: n.to_string(),
        ty,
    }
}

pub fn func_type(params: Vec<FieldTypeExpr>, results: Vec<FieldTypeExpr>) -> FuncTypeExpr {
    FuncTypeExpr {
        params,
        results,
        variadic: false,
    }
}

/// A signature whose last parameter is `...T`.
pub fn variadic_func_type(params: Vec<FieldTypeExpr>, results: Vec<FieldTypeExpr>) -> FuncTypeExpr {
    FuncTypeExpr {
        params,
        results,
        variadic: true,
    }
}

/* ===================== Statements ===================== */

pub fn expr_stmt(x: Expr) -> Stmt {
    Stmt::Expr(ExprStmt {
        attrs: Attributes::default(),
        x,
    })
}

fn assign_stmt(lhs: Vec<Expr>, op: AssignOp, rhs: Vec<Expr>) -> Stmt {
    Stmt::Assign(AssignStmt {
        attrs: Attributes::default(),
        lhs,
        op,
        rhs,
    })
}

pub fn assign(lhs: Vec<Expr>, rhs: Vec<Expr>) -> Stmt {
    assign_stmt(lhs, AssignOp::Assign, rhs)
}

pub fn define(names: &[&str], rhs: Vec<Expr>) -> Stmt {
    assign_stmt(names.iter().map(|n| name(n)).collect(), AssignOp::Define, rhs)
}

pub fn op_assign(op: AssignOp, lhs: Expr, rhs: Expr) -> Stmt {
    assign_stmt(vec![lhs], op, vec![rhs])
}

pub fn inc(x: Expr) -> Stmt {
    Stmt::IncDec(IncDecStmt {
        attrs: Attributes::default(),
        x,
        inc: true,
    })
}

pub fn dec(x: Expr) -> Stmt {
    Stmt::IncDec(IncDecStmt {
        attrs: Attributes::default(),
        x,
        inc: false,
    })
}

pub fn block_stmt(body: Vec<Stmt>) -> BlockStmt {
    BlockStmt {
        attrs: Attributes::default(),
        body: Arc::new(body),
        scope: None,
    }
}

pub fn block(body: Vec<Stmt>) -> Stmt {
    Stmt::Block(block_stmt(body))
}

pub fn if_(cond: Expr, then: Vec<Stmt>, els: Option<Vec<Stmt>>) -> Stmt {
    if_init(None, cond, then, els)
}

pub fn if_init(init: Option<Stmt>, cond: Expr, then: Vec<Stmt>, els: Option<Vec<Stmt>>) -> Stmt {
    Stmt::If(IfStmt {
        attrs: Attributes::default(),
        init: init.map(Box::new),
        cond,
        then: block_stmt(then),
        els: els.map(block_stmt),
        scope: None,
    })
}

pub fn for_(init: Option<Stmt>, cond: Option<Expr>, post: Option<Stmt>, body: Vec<Stmt>) -> Stmt {
    Stmt::For(ForStmt {
        attrs: Attributes::default(),
        init: init.map(Box::new),
        cond,
        post: post.map(Box::new),
        body: Arc::new(body),
        scope: None,
    })
}

pub fn while_(cond: Expr, body: Vec<Stmt>) -> Stmt {
    for_(None, Some(cond), None, body)
}

/// `for key, value := range x`.
pub fn range(key: Option<&str>, value: Option<&str>, x: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::Range(RangeStmt {
        attrs: Attributes::default(),
        x,
        key: key.map(name),
        value: value.map(name),
        define: true,
        body: Arc::new(body),
        scope: None,
    })
}

pub fn switch(init: Option<Stmt>, tag: Option<Expr>, clauses: Vec<SwitchClause>) -> Stmt {
    Stmt::Switch(SwitchStmt {
        attrs: Attributes::default(),
        init: init.map(Box::new),
        tag,
        clauses,
        scope: None,
    })
}

/// A switch clause; no cases makes it the default clause.
pub fn case(cases: Vec<Expr>, body: Vec<Stmt>) -> SwitchClause {
    SwitchClause {
        attrs: Attributes::default(),
        cases,
        body: Arc::new(body),
        scope: None,
    }
}

pub fn ret(results: Vec<Expr>) -> Stmt {
    Stmt::Return(ReturnStmt {
        attrs: Attributes::default(),
        results,
    })
}

pub fn defer(func: Expr, args: Vec<Expr>) -> Stmt {
    Stmt::Defer(DeferStmt {
        attrs: Attributes::default(),
        call: call_expr(func, args),
    })
}

pub fn go(func: Expr, args: Vec<Expr>) -> Stmt {
    Stmt::Go(GoStmt {
        attrs: Attributes::default(),
        call: call_expr(func, args),
    })
}

fn branch(op: BranchOp, target: Option<&str>) -> Stmt {
    Stmt::Branch(BranchStmt {
        attrs: Attributes::default(),
        op,
        target: target.map(str::to_string),
    })
}

pub fn brk(target: Option<&str>) -> Stmt {
    branch(BranchOp::Break, target)
}

pub fn cont(target: Option<&str>) -> Stmt {
    branch(BranchOp::Continue, target)
}

/// Attach a label to a statement (for labeled break/continue).
pub fn labeled(label: &str, mut stmt: Stmt) -> Stmt {
    stmt.attrs_mut().label = Some(label.to_string());
    stmt
}

pub fn decl_stmt(decl: Decl) -> Stmt {
    Stmt::Decl(DeclStmt {
        attrs: Attributes::default(),
        decls: vec![decl],
    })
}

/* ===================== Declarations ===================== */

pub fn func_decl(n: &str, ty: FuncTypeExpr, body: Vec<Stmt>) -> Decl {
    Decl::Func(FuncDecl {
        attrs: Attributes::default(),
        name: n.to_string(),
        recv: None,
        ty,
        body: Arc::new(body),
        scope: None,
        path: ValuePath::default(),
        resolved: None,
    })
}

pub fn method_decl(recv: FieldTypeExpr, n: &str, ty: FuncTypeExpr, body: Vec<Stmt>) -> Decl {
    Decl::Func(FuncDecl {
        attrs: Attributes::default(),
        name: n.to_string(),
        recv: Some(recv),
        ty,
        body: Arc::new(body),
        scope: None,
        path: ValuePath::default(),
        resolved: None,
    })
}

fn value_decl(names: &[&str], ty: Option<TypeExpr>, values: Vec<Expr>, is_const: bool) -> Decl {
    Decl::Value(ValueDecl {
        attrs: Attributes::default(),
        names: names.iter().map(|n| name_expr(n)).collect(),
        ty,
        values,
        is_const,
        resolved: Vec::new(),
    })
}

pub fn var(names: &[&str], ty: Option<TypeExpr>, values: Vec<Expr>) -> Decl {
    value_decl(names, ty, values, false)
}

pub fn const_(n: &str, ty: Option<TypeExpr>, value: Expr) -> Decl {
    value_decl(&[n], ty, vec![value], true)
}

pub fn type_decl(n: &str, ty: TypeExpr) -> Decl {
    Decl::Type(TypeDecl {
        attrs: Attributes::default(),
        name: name_expr(n),
        ty,
        is_alias: false,
        resolved: None,
    })
}

pub fn alias_decl(n: &str, ty: TypeExpr) -> Decl {
    Decl::Type(TypeDecl {
        attrs: Attributes::default(),
        name: name_expr(n),
        ty,
        is_alias: true,
        resolved: None,
    })
}

pub fn import(path: &str) -> Decl {
    Decl::Import(ImportDecl {
        attrs: Attributes::default(),
        name: None,
        path: path.to_string(),
    })
}

pub fn file(n: &str, decls: Vec<Decl>) -> FileNode {
    FileNode {
        attrs: Attributes::default(),
        name: n.to_string(),
        decls,
        scope: None,
    }
}

pub fn package(n: &str, path: &str, files: Vec<FileNode>) -> PackageNode {
    PackageNode {
        attrs: Attributes::default(),
        name: n.to_string(),
        path: path.to_string(),
        files,
        scope: None,
    }
}
