//! Source-like rendering of syntax nodes
//!
//! Used in diagnostics and panic descriptors. Statements render on a single
//! line; bodies are elided.

use std::fmt;

use super::nodes::*;

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Name(nx) => write!(f, "{}", nx.name),
            Expr::BasicLit(lit) => match lit.kind {
                LitKind::String => write!(f, "{:?}", lit.value),
                LitKind::Char => write!(f, "'{}'", lit.value),
                _ => write!(f, "{}", lit.value),
            },
            Expr::Const(cx) => write!(f, "{}", cx.value),
            Expr::Binary(bx) => write!(f, "{} {} {}", bx.left, bx.op.symbol(), bx.right),
            Expr::Unary(ux) => write!(f, "{}{}", ux.op.symbol(), ux.x),
            Expr::Call(cx) => {
                write!(f, "{}({}", cx.func, join(&cx.args, ", "))?;
                if cx.varg {
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            Expr::Index(ix) => write!(f, "{}[{}]", ix.x, ix.index),
            Expr::Selector(sx) => write!(f, "{}.{}", sx.x, sx.sel),
            Expr::Slice(sx) => {
                let part = |e: &Option<Box<Expr>>| e.as_ref().map(|e| e.to_string()).unwrap_or_default();
                write!(f, "{}[{}:{}", sx.x, part(&sx.low), part(&sx.high))?;
                if sx.max.is_some() {
                    write!(f, ":{}", part(&sx.max))?;
                }
                write!(f, "]")
            }
            Expr::Star(sx) => write!(f, "*{}", sx.x),
            Expr::Ref(rx) => write!(f, "&{}", rx.x),
            Expr::TypeAssert(tx) => write!(f, "{}.({})", tx.x, tx.ty),
            Expr::CompositeLit(cx) => {
                let elts: Vec<String> = cx
                    .elts
                    .iter()
                    .map(|kv| match &kv.key {
                        Some(key) => format!("{}: {}", key, kv.value),
                        None => kv.value.to_string(),
                    })
                    .collect();
                write!(f, "{}{{{}}}", cx.ty, elts.join(", "))
            }
            Expr::FuncLit(fx) => write!(f, "func{} {{ ... }}", fx.ty),
            Expr::Type(tx) => write!(f, "{}", tx.ty),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Name(nx) => write!(f, "{}", nx.name),
            TypeExpr::Qualified { pkg, name } => write!(f, "{}.{}", pkg.name, name),
            TypeExpr::Array { len: Some(n), elem } => write!(f, "[{}]{}", n, elem),
            TypeExpr::Array { len: None, elem } => write!(f, "[...]{}", elem),
            TypeExpr::Slice { elem } => write!(f, "[]{}", elem),
            TypeExpr::Map { key, value } => write!(f, "map[{}]{}", key, value),
            TypeExpr::Pointer { elem } => write!(f, "*{}", elem),
            TypeExpr::Struct { fields } => write!(f, "struct{{{}}}", join(fields, "; ")),
            TypeExpr::Func(ft) => write!(f, "func{}", ft),
            TypeExpr::Interface { methods } => write!(f, "interface{{{}}}", join(methods, "; ")),
        }
    }
}

impl fmt::Display for FieldTypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.ty)
        } else {
            write!(f, "{} {}", self.name, self.ty)
        }
    }
}

impl fmt::Display for FuncTypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        if self.variadic {
            if let Some(last) = self.params.last() {
                let rendered = if last.name.is_empty() {
                    format!("...{}", last.ty)
                } else {
                    format!("{} ...{}", last.name, last.ty)
                };
                if let Some(slot) = params.last_mut() {
                    *slot = rendered;
                }
            }
        }
        write!(f, "({})", params.join(", "))?;
        match self.results.len() {
            0 => Ok(()),
            1 if self.results[0].name.is_empty() => write!(f, " {}", self.results[0]),
            _ => write!(f, " ({})", join(&self.results, ", ")),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Expr(s) => write!(f, "{}", s.x),
            Stmt::Assign(s) => {
                let op = match s.op {
                    AssignOp::Assign => "=".to_string(),
                    AssignOp::Define => ":=".to_string(),
                    other => match other.binary() {
                        Some(bop) => format!("{}=", bop.symbol()),
                        None => "=".to_string(),
                    },
                };
                write!(f, "{} {} {}", join(&s.lhs, ", "), op, join(&s.rhs, ", "))
            }
            Stmt::IncDec(s) => write!(f, "{}{}", s.x, if s.inc { "++" } else { "--" }),
            Stmt::Block(_) => write!(f, "{{ ... }}"),
            Stmt::If(s) => write!(f, "if {} {{ ... }}", s.cond),
            Stmt::For(s) => match &s.cond {
                Some(cond) => write!(f, "for {} {{ ... }}", cond),
                None => write!(f, "for {{ ... }}"),
            },
            Stmt::Range(s) => write!(f, "for range {} {{ ... }}", s.x),
            Stmt::Switch(s) => match &s.tag {
                Some(tag) => write!(f, "switch {} {{ ... }}", tag),
                None => write!(f, "switch {{ ... }}"),
            },
            Stmt::Branch(s) => {
                let word = match s.op {
                    BranchOp::Break => "break",
                    BranchOp::Continue => "continue",
                    BranchOp::Goto => "goto",
                    BranchOp::Fallthrough => "fallthrough",
                };
                match &s.target {
                    Some(label) => write!(f, "{} {}", word, label),
                    None => write!(f, "{}", word),
                }
            }
            Stmt::Return(s) if s.results.is_empty() => write!(f, "return"),
            Stmt::Return(s) => write!(f, "return {}", join(&s.results, ", ")),
            Stmt::Defer(s) => write!(f, "defer {}", Expr::Call(s.call.clone())),
            Stmt::Go(s) => write!(f, "go {}", Expr::Call(s.call.clone())),
            Stmt::Decl(s) => write!(f, "{}", join(&s.decls, "; ")),
        }
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decl::Func(fd) => match &fd.recv {
                Some(recv) => write!(f, "func ({}) {}{}", recv, fd.name, fd.ty),
                None => write!(f, "func {}{}", fd.name, fd.ty),
            },
            Decl::Value(vd) => {
                let kw = if vd.is_const { "const" } else { "var" };
                let names: Vec<&str> = vd.names.iter().map(|n| n.name.as_str()).collect();
                write!(f, "{} {}", kw, names.join(", "))?;
                if let Some(ty) = &vd.ty {
                    write!(f, " {}", ty)?;
                }
                if !vd.values.is_empty() {
                    write!(f, " = {}", join(&vd.values, ", "))?;
                }
                Ok(())
            }
            Decl::Type(td) if td.is_alias => write!(f, "type {} = {}", td.name.name, td.ty),
            Decl::Type(td) => write!(f, "type {} {}", td.name.name, td.ty),
            Decl::Import(id) => match &id.name {
                Some(name) => write!(f, "import {} {:?}", name, id.path),
                None => write!(f, "import {:?}", id.path),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::build::*;
    use crate::ast::{BinaryOp, UnaryOp};

    #[test]
    fn test_expr_rendering() {
        let x = binary(BinaryOp::Add, name("a"), call(name("f"), vec![int(1), string("s")]));
        assert_eq!(x.to_string(), "a + f(1, \"s\")");

        let x = unary(UnaryOp::Neg, sel(name("p"), "x"));
        assert_eq!(x.to_string(), "-p.x");

        let x = composite(tslice(tname("int")), vec![int(1), int(2)]);
        assert_eq!(x.to_string(), "[]int{1, 2}");
    }

    #[test]
    fn test_stmt_rendering() {
        assert_eq!(define(&["x"], vec![int(3)]).to_string(), "x := 3");
        assert_eq!(ret(vec![name("a"), name("b")]).to_string(), "return a, b");
        assert_eq!(brk(Some("outer")).to_string(), "break outer");
    }
}
