//! Expression typing and constant folding
//!
//! Not a type checker: types are inferred only as far as the machine needs
//! them, and untyped constants are converted where their context decides
//! their type. Constant subexpressions are folded into `Expr::Const`.

use std::sync::Arc;

use super::uverse::uverse;
use super::{Preprocessor, Result};
use crate::ast::*;
use crate::errors::ResolveError;
use crate::machine::operators::{binary_prim, compare_prim, shift_count, shift_prim, unary_prim, OpError};
use crate::types::{ArrayType, FieldType, FuncType, InterfaceType, MapType, PrimKind, StructType, Type, TypeLookup};
use crate::values::convert::{convert_prim, convert_untyped, parse_literal};
use crate::values::{TypedValue, Value};

fn const_expr(attrs: Attributes, value: TypedValue) -> Expr {
    Expr::Const(ConstExpr { attrs, value })
}

fn op_error(text: String, err: OpError) -> ResolveError {
    ResolveError::InvalidConstant {
        literal: text,
        reason: err.to_string(),
    }
}

fn const_type(tv: &TypedValue) -> Type {
    tv.t.clone().unwrap_or_else(Type::empty_interface)
}

/// Resolved type carried by a type-valued expression.
fn type_of_type_expr(e: &Expr) -> Option<Type> {
    match e {
        Expr::Type(tv) => tv.resolved.clone(),
        _ => None,
    }
}

/// Rank of untyped numeric kinds; mixing takes the larger.
fn untyped_rank(kind: PrimKind) -> u8 {
    match kind {
        PrimKind::UntypedInt => 0,
        PrimKind::UntypedRune => 1,
        PrimKind::UntypedFloat => 2,
        _ => u8::MAX,
    }
}

fn literal(lit: &BasicLitExpr) -> Result<TypedValue> {
    let (kind, repr) = match lit.kind {
        LitKind::Int => (PrimKind::UntypedInt, PrimKind::Bigint),
        LitKind::Float => (PrimKind::UntypedFloat, PrimKind::Bigdec),
        LitKind::Char => (PrimKind::UntypedRune, PrimKind::Bigint),
        LitKind::String => (PrimKind::UntypedString, PrimKind::String),
    };
    let v = parse_literal(lit.kind, &lit.value, repr).map_err(|reason| ResolveError::InvalidConstant {
        literal: lit.value.clone(),
        reason,
    })?;
    Ok(TypedValue::new(Type::Prim(kind), v))
}

impl<'a> Preprocessor<'a> {
    /* ===================== Constants ===================== */

    /// Convert an untyped constant expression to `want`. Typed expressions
    /// keep their type.
    pub(super) fn coerce(&mut self, e: &mut Expr, have: &Type, want: &Type) -> Result<Type> {
        if !have.is_untyped() {
            return Ok(have.clone());
        }
        let Expr::Const(cx) = e else {
            return Ok(have.defaulted());
        };
        let value = self.convert_const(&cx.value, want)?;
        let t = const_type(&value);
        cx.value = value;
        Ok(t)
    }

    /// Give an untyped constant its default type.
    pub(super) fn default_const(&mut self, e: &mut Expr, have: &Type) -> Result<Type> {
        if !have.is_untyped() {
            return Ok(have.clone());
        }
        if have.is_nil() {
            return Err(ResolveError::InvalidConstant {
                literal: e.to_string(),
                reason: "use of untyped nil".to_string(),
            });
        }
        self.coerce(e, have, &have.defaulted())
    }

    fn convert_const(&self, tv: &TypedValue, want: &Type) -> Result<TypedValue> {
        let from = match &tv.t {
            Some(Type::Prim(k)) => *k,
            _ => return Ok(tv.clone()),
        };
        let types = &*self.reg;
        let fail = |reason: String| ResolveError::InvalidConstant {
            literal: tv.to_string(),
            reason,
        };
        if want.is_interface(types) {
            if from == PrimKind::UntypedNil {
                return Ok(TypedValue::undefined());
            }
            if from.is_untyped() {
                return self.convert_const(tv, &Type::Prim(from.default_kind()));
            }
            return Ok(tv.clone());
        }
        if from == PrimKind::UntypedNil {
            return match want.underlying(types) {
                Type::Pointer(_) | Type::Slice(_) | Type::Map(_) | Type::Func(_) => Ok(TypedValue {
                    t: Some(want.clone()),
                    v: Value::None,
                }),
                _ => Err(fail(format!("cannot use nil as {}", want))),
            };
        }
        let to = want
            .prim_kind(types)
            .ok_or_else(|| fail(format!("cannot use constant as {}", want)))?;
        let v = if from.is_untyped() {
            convert_untyped(&tv.v, to).map_err(fail)?
        } else {
            convert_prim(&tv.v, to).ok_or_else(|| fail(format!("cannot convert to {}", want)))?
        };
        Ok(TypedValue::new(want.clone(), v))
    }

    /// Fold `T(c)` for a constant `c`; `None` leaves the conversion to run
    /// at runtime.
    fn const_conversion(&self, tv: &TypedValue, target: &Type) -> Result<Option<TypedValue>> {
        let Some(to) = target.prim_kind(&*self.reg) else {
            return Ok(None);
        };
        let from = match &tv.t {
            Some(Type::Prim(k)) => *k,
            _ => return Ok(None),
        };
        let converted = if from.is_untyped() {
            match convert_untyped(&tv.v, to) {
                Ok(v) => Some(v),
                // string(65) and friends go through the fixed-width value.
                Err(_) => match &tv.v {
                    Value::Bigint(_) => convert_untyped(&tv.v, PrimKind::Int64)
                        .ok()
                        .and_then(|v| convert_prim(&v, to)),
                    _ => None,
                },
            }
        } else {
            convert_prim(&tv.v, to)
        };
        match converted {
            Some(v) => Ok(Some(TypedValue::new(target.clone(), v))),
            None => Err(ResolveError::InvalidConstant {
                literal: tv.to_string(),
                reason: format!("cannot convert to {}", target),
            }),
        }
    }

    fn fold_binary(&self, op: BinaryOp, l: &TypedValue, r: &TypedValue, result: &Type, text: String) -> Result<TypedValue> {
        let kind = result.prim_kind(&*self.reg).unwrap_or(PrimKind::Bigint);
        if op.is_comparison() {
            let b = compare_prim(op, &l.v, &r.v).map_err(|e| op_error(text, e))?;
            return Ok(TypedValue::new(result.clone(), Value::Bool(b)));
        }
        let mut v = l.v.clone();
        match op {
            BinaryOp::LAnd | BinaryOp::LOr => {
                let (Value::Bool(a), Value::Bool(b)) = (&l.v, &r.v) else {
                    return Err(op_error(text, OpError::Mismatch("non-boolean operands".to_string())));
                };
                v = Value::Bool(if op == BinaryOp::LAnd { *a && *b } else { *a || *b });
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                let n = shift_count(&r.v).map_err(|e| op_error(text.clone(), e))?;
                shift_prim(op, kind, &mut v, n).map_err(|e| op_error(text, e))?;
            }
            _ => binary_prim(op, kind, &mut v, &r.v).map_err(|e| op_error(text, e))?,
        }
        Ok(TypedValue::new(result.clone(), v))
    }

    /* ===================== Expressions ===================== */

    /// Resolve and type `e`, replacing it in place when it folds to a
    /// constant or turns out to denote a type.
    pub(super) fn expr(&mut self, scope: ScopeId, e: &mut Expr) -> Result<Type> {
        let (t, replacement) = match e {
            Expr::Name(nx) => self.name(scope, nx)?,
            Expr::BasicLit(lit) => {
                let value = literal(lit)?;
                (const_type(&value), Some(const_expr(lit.attrs.clone(), value)))
            }
            Expr::Const(cx) => (const_type(&cx.value), None),
            Expr::Binary(bx) => self.binary(scope, bx)?,
            Expr::Unary(ux) => self.unary(scope, ux)?,
            Expr::Call(cx) => {
                let (t, folded) = self.call(scope, cx)?;
                (t, folded.map(|v| const_expr(cx.attrs.clone(), v)))
            }
            Expr::Index(ix) => (self.index(scope, ix)?, None),
            Expr::Selector(sx) => self.selector(scope, sx)?,
            Expr::Slice(sx) => (self.slice(scope, sx)?, None),
            Expr::Star(sx) => self.star(scope, sx)?,
            Expr::Ref(rx) => {
                let t = self.expr(scope, &mut rx.x)?;
                (Type::pointer_to(t), None)
            }
            Expr::TypeAssert(ta) => {
                self.expr(scope, &mut ta.x)?;
                let t = self.type_expr(scope, &mut ta.ty)?;
                ta.resolved = Some(t.clone());
                if ta.has_ok {
                    (Type::Tuple(Arc::new(vec![t, Type::BOOL])), None)
                } else {
                    (t, None)
                }
            }
            Expr::CompositeLit(cl) => (self.composite(scope, cl)?, None),
            Expr::FuncLit(fl) => {
                let ft = Arc::new(self.func_type(scope, &mut fl.ty)?);
                let fscope = self.func_body(scope, None, &ft, &mut fl.body)?;
                fl.scope = Some(fscope);
                let t = Type::Func(ft);
                fl.resolved = Some(t.clone());
                (t, None)
            }
            Expr::Type(tv) => {
                let t = self.type_expr(scope, &mut tv.ty)?;
                tv.resolved = Some(t);
                (Type::TypeType, None)
            }
        };
        if let Some(r) = replacement {
            *e = r;
        }
        Ok(t)
    }

    fn name(&mut self, scope: ScopeId, nx: &mut NameExpr) -> Result<(Type, Option<Expr>)> {
        if nx.name == "_" {
            return Err(ResolveError::Unsupported("cannot use _ as value".to_string()));
        }
        let path = self.reg.get_path_for_name(scope, &nx.name)?;
        if self.reg.is_const_path(scope, &path)? {
            let value = self
                .reg
                .value_of_path(scope, &path)?
                .ok_or_else(|| ResolveError::Unsupported(format!("constant {} used before its value is known", nx.name)))?;
            return Ok((const_type(&value), Some(const_expr(nx.attrs.clone(), value))));
        }
        if let Some(TypedValue { v: Value::Type(t), .. }) = self.reg.value_of_path(scope, &path)? {
            nx.path = path;
            let tv = TypeValueExpr {
                attrs: nx.attrs.clone(),
                ty: TypeExpr::Name(nx.clone()),
                resolved: Some(t),
            };
            return Ok((Type::TypeType, Some(Expr::Type(tv))));
        }
        let t = self
            .reg
            .type_of_path(scope, &path)?
            .ok_or_else(|| ResolveError::Unsupported(format!("{} used before its type is known", nx.name)))?;
        nx.path = path;
        Ok((t, None))
    }

    fn binary(&mut self, scope: ScopeId, bx: &mut BinaryExpr) -> Result<(Type, Option<Expr>)> {
        let op = bx.op;
        let mut lt = self.expr(scope, &mut bx.left)?;
        let mut rt = self.expr(scope, &mut bx.right)?;
        let both_untyped = lt.is_untyped() && rt.is_untyped();
        let result = match op {
            BinaryOp::LAnd | BinaryOp::LOr => {
                if both_untyped {
                    Type::Prim(PrimKind::UntypedBool)
                } else {
                    self.coerce(&mut bx.left, &lt, &Type::BOOL)?;
                    self.coerce(&mut bx.right, &rt, &Type::BOOL)?;
                    Type::BOOL
                }
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                let both_const = matches!((&*bx.left, &*bx.right), (Expr::Const(_), Expr::Const(_)));
                if rt.is_untyped() && !(both_const && lt.is_untyped()) {
                    self.coerce(&mut bx.right, &rt, &Type::Prim(PrimKind::Uint))?;
                }
                if lt.is_untyped() && !both_const {
                    lt = self.default_const(&mut bx.left, &lt)?;
                }
                lt
            }
            _ if op.is_comparison() => {
                if both_untyped {
                    self.promote_untyped(&mut bx.left, &lt, &mut bx.right, &rt)?;
                    Type::Prim(PrimKind::UntypedBool)
                } else {
                    if lt.is_untyped() {
                        self.coerce(&mut bx.left, &lt, &rt)?;
                    } else if rt.is_untyped() {
                        self.coerce(&mut bx.right, &rt, &lt)?;
                    }
                    Type::BOOL
                }
            }
            _ => {
                if both_untyped {
                    self.promote_untyped(&mut bx.left, &lt, &mut bx.right, &rt)?
                } else if lt.is_untyped() {
                    self.coerce(&mut bx.left, &lt, &rt)?
                } else {
                    self.coerce(&mut bx.right, &rt, &lt)?;
                    lt
                }
            }
        };
        if let (Expr::Const(l), Expr::Const(r)) = (&*bx.left, &*bx.right) {
            let text = format!("{} {} {}", bx.left, op.symbol(), bx.right);
            let v = self.fold_binary(op, &l.value, &r.value, &result, text)?;
            return Ok((result, Some(const_expr(bx.attrs.clone(), v))));
        }
        Ok((result, None))
    }

    /// Bring two untyped numeric operands to the larger of their kinds.
    fn promote_untyped(&mut self, l: &mut Expr, lt: &Type, r: &mut Expr, rt: &Type) -> Result<Type> {
        let (Type::Prim(a), Type::Prim(b)) = (lt, rt) else {
            return Ok(lt.clone());
        };
        if untyped_rank(*a).max(untyped_rank(*b)) == u8::MAX || a == b {
            return Ok(lt.clone());
        }
        if untyped_rank(*b) > untyped_rank(*a) {
            self.coerce(l, lt, rt)?;
            Ok(rt.clone())
        } else {
            self.coerce(r, rt, lt)?;
            Ok(lt.clone())
        }
    }

    fn unary(&mut self, scope: ScopeId, ux: &mut UnaryExpr) -> Result<(Type, Option<Expr>)> {
        let t = self.expr(scope, &mut ux.x)?;
        if ux.op == UnaryOp::Arrow {
            return Ok((Type::empty_interface(), None));
        }
        let Expr::Const(cx) = &*ux.x else {
            return Ok((t, None));
        };
        let kind = t.prim_kind(&*self.reg).unwrap_or(PrimKind::Bigint);
        let mut v = cx.value.v.clone();
        unary_prim(ux.op, kind, &mut v).map_err(|e| op_error(format!("{}{}", ux.op.symbol(), ux.x), e))?;
        let folded = TypedValue { t: cx.value.t.clone(), v };
        Ok((t, Some(const_expr(ux.attrs.clone(), folded))))
    }

    /* ===================== Calls ===================== */

    /// Type a call. Returns the folded value of a constant conversion.
    pub(super) fn call(&mut self, scope: ScopeId, cx: &mut CallExpr) -> Result<(Type, Option<TypedValue>)> {
        if let Expr::Name(nx) = &*cx.func {
            if nx.name != "_" {
                let path = self.reg.get_path_for_name(scope, &nx.name)?;
                if path.kind == PathKind::Uverse {
                    if let Some(builtin) = uverse().builtin_name(path.index) {
                        let t = self.builtin_call(scope, builtin, cx)?;
                        if let Expr::Name(nx) = &mut *cx.func {
                            nx.path = path;
                        }
                        return Ok((t, None));
                    }
                }
            }
        }

        let ft = self.expr(scope, &mut cx.func)?;
        if ft == Type::TypeType {
            let target = type_of_type_expr(&cx.func)
                .ok_or_else(|| ResolveError::NotAType { name: cx.func.to_string() })?;
            if cx.args.len() != 1 {
                return Err(ResolveError::Unsupported(format!("conversion to {} needs one argument", target)));
            }
            cx.num_args = 1;
            let at = self.expr(scope, &mut cx.args[0])?;
            if let Expr::Const(c) = &cx.args[0] {
                if let Some(folded) = self.const_conversion(&c.value, &target)? {
                    return Ok((target, Some(folded)));
                }
            }
            if at.is_untyped() {
                self.default_const(&mut cx.args[0], &at)?;
            }
            return Ok((target, None));
        }

        let Type::Func(ft) = ft.underlying(&*self.reg) else {
            return Err(ResolveError::Unsupported(format!("call of non-function {}", cx.func)));
        };
        self.call_args(scope, cx, &ft)?;
        Ok((ft.call_type(), None))
    }

    fn param_type(ft: &FuncType, i: usize, varg: bool) -> Type {
        let np = ft.params.len();
        if ft.variadic && i + 1 >= np && np > 0 {
            let last = &ft.params[np - 1].ty;
            if varg {
                return last.clone();
            }
            return match last {
                Type::Slice(elem) => (**elem).clone(),
                other => other.clone(),
            };
        }
        ft.params
            .get(i)
            .map(|p| p.ty.clone())
            .unwrap_or_else(Type::empty_interface)
    }

    fn call_args(&mut self, scope: ScopeId, cx: &mut CallExpr, ft: &FuncType) -> Result<()> {
        if cx.args.len() == 1 {
            let t = self.expr(scope, &mut cx.args[0])?;
            if let Type::Tuple(items) = &t {
                if items.len() != 1 {
                    cx.num_args = items.len();
                    return Ok(());
                }
            }
            let want = Self::param_type(ft, 0, cx.varg);
            self.coerce(&mut cx.args[0], &t, &want)?;
            cx.num_args = 1;
            return Ok(());
        }
        for i in 0..cx.args.len() {
            let t = self.expr(scope, &mut cx.args[i])?;
            let want = Self::param_type(ft, i, cx.varg && i + 1 == cx.args.len());
            self.coerce(&mut cx.args[i], &t, &want)?;
        }
        cx.num_args = cx.args.len();
        Ok(())
    }

    /// Count pushed values, spreading a single multi-result argument.
    fn default_args(&mut self, scope: ScopeId, cx: &mut CallExpr, from: usize) -> Result<()> {
        for i in from..cx.args.len() {
            let t = self.expr(scope, &mut cx.args[i])?;
            if let Type::Tuple(items) = &t {
                if cx.args.len() == 1 {
                    cx.num_args = items.len();
                    return Ok(());
                }
            }
            self.default_const(&mut cx.args[i], &t)?;
        }
        cx.num_args = cx.args.len();
        Ok(())
    }

    fn type_arg(&mut self, scope: ScopeId, cx: &mut CallExpr, name: &str) -> Result<Type> {
        let Some(first) = cx.args.first_mut() else {
            return Err(ResolveError::Unsupported(format!("{} needs a type argument", name)));
        };
        self.expr(scope, first)?;
        type_of_type_expr(first).ok_or_else(|| ResolveError::NotAType { name: first.to_string() })
    }

    fn builtin_call(&mut self, scope: ScopeId, name: &str, cx: &mut CallExpr) -> Result<Type> {
        let t = match name {
            "len" | "cap" | "copy" => {
                self.default_args(scope, cx, 0)?;
                Type::INT
            }
            "append" => {
                let Some(first) = cx.args.first_mut() else {
                    return Err(ResolveError::Unsupported("append needs a slice".to_string()));
                };
                let st = self.expr(scope, first)?;
                let elem = st.elem(&*self.reg).unwrap_or_else(Type::empty_interface);
                let last = cx.args.len() - 1;
                for i in 1..cx.args.len() {
                    let t = self.expr(scope, &mut cx.args[i])?;
                    if cx.varg && i == last {
                        self.default_const(&mut cx.args[i], &t)?;
                    } else {
                        self.coerce(&mut cx.args[i], &t, &elem)?;
                    }
                }
                cx.num_args = cx.args.len();
                st
            }
            "make" => {
                let t = self.type_arg(scope, cx, name)?;
                for i in 1..cx.args.len() {
                    let at = self.expr(scope, &mut cx.args[i])?;
                    self.coerce(&mut cx.args[i], &at, &Type::INT)?;
                }
                cx.num_args = cx.args.len();
                t
            }
            "new" => {
                let t = self.type_arg(scope, cx, name)?;
                cx.num_args = 1;
                Type::pointer_to(t)
            }
            "delete" => {
                if cx.args.len() != 2 {
                    return Err(ResolveError::Unsupported("delete needs a map and a key".to_string()));
                }
                let mt = self.expr(scope, &mut cx.args[0])?;
                let kt = self.expr(scope, &mut cx.args[1])?;
                match mt.underlying(&*self.reg) {
                    Type::Map(m) => self.coerce(&mut cx.args[1], &kt, &m.key)?,
                    other => return Err(ResolveError::Unsupported(format!("delete on {}", other))),
                };
                cx.num_args = 2;
                Type::void()
            }
            "panic" => {
                self.default_args(scope, cx, 0)?;
                Type::void()
            }
            "recover" => {
                cx.num_args = 0;
                Type::empty_interface()
            }
            "print" | "println" => {
                self.default_args(scope, cx, 0)?;
                Type::void()
            }
            other => return Err(ResolveError::Unsupported(format!("builtin {}", other))),
        };
        Ok(t)
    }

    /* ===================== Selectors and Indexing ===================== */

    fn selector(&mut self, scope: ScopeId, sx: &mut SelectorExpr) -> Result<(Type, Option<Expr>)> {
        let xt = self.expr(scope, &mut sx.x)?;
        if let Expr::Const(ConstExpr {
            value: TypedValue { v: Value::Package(path), .. },
            ..
        }) = &*sx.x
        {
            let path = path.clone();
            return self.package_member(&path, sx);
        }
        if xt == Type::TypeType {
            return Err(ResolveError::Unsupported(format!("method expression {}", sx.sel)));
        }
        let (kind, index, t) = self.lookup_member(&xt, &sx.sel)?;
        if kind == PathKind::PtrMethod && !matches!(xt, Type::Pointer(_)) {
            if !sx.x.is_addressable() && !matches!(*sx.x, Expr::CompositeLit(_)) {
                return Err(ResolveError::Unsupported(format!(
                    "cannot call pointer method {} on {}",
                    sx.sel, sx.x
                )));
            }
            let placeholder = const_expr(Attributes::default(), TypedValue::undefined());
            let x = std::mem::replace(&mut *sx.x, placeholder);
            *sx.x = Expr::Ref(RefExpr {
                attrs: x.attrs().clone(),
                x: Box::new(x),
            });
        }
        sx.path = ValuePath::new(kind, 0, index, sx.sel.clone());
        Ok((t, None))
    }

    /// Find field `name` or method `name` of a value of type `t`.
    fn lookup_member(&self, t: &Type, name: &str) -> Result<(PathKind, u16, Type)> {
        let types = &*self.reg;
        let (base, is_ptr) = match t {
            Type::Pointer(elem) => ((**elem).clone(), true),
            other => (other.clone(), false),
        };
        if let Some(dt) = base.declared_ref().and_then(|r| types.declared(r)) {
            if let Some(i) = dt.methods.iter().position(|m| m.name == name) {
                let m = &dt.methods[i];
                let kind = match (is_ptr, m.ptr_receiver) {
                    (_, true) => PathKind::PtrMethod,
                    (false, false) => PathKind::ValMethod,
                    (true, false) => PathKind::DerefValMethod,
                };
                return Ok((kind, i as u16, Type::Func(m.ty.clone())));
            }
        }
        match base.underlying(types) {
            Type::Interface(it) if !is_ptr => {
                if let Some(i) = it.methods.iter().position(|m| m.name == name) {
                    return Ok((PathKind::Interface, i as u16, it.methods[i].ty.clone()));
                }
            }
            Type::Struct(st) => {
                if let Some(i) = st.field_index(name) {
                    let kind = if is_ptr { PathKind::DerefField } else { PathKind::Field };
                    return Ok((kind, i as u16, st.fields[i].ty.clone()));
                }
            }
            _ => {}
        }
        Err(ResolveError::UnknownSelector {
            name: name.to_string(),
            on: t.to_string(),
        })
    }

    fn package_member(&mut self, path: &str, sx: &mut SelectorExpr) -> Result<(Type, Option<Expr>)> {
        let info = self
            .reg
            .package(path)
            .ok_or_else(|| ResolveError::PackageNotFound { path: path.to_string() })?;
        let sb = self.reg.must_scope(info.scope)?;
        let qualified = || format!("{}.{}", path, sx.sel);
        let index = sb
            .index_of(&sx.sel)
            .ok_or_else(|| ResolveError::NameNotDeclared { name: qualified() })?;
        if sb.is_const(&sx.sel) {
            let value = sb
                .value_at(index)
                .cloned()
                .ok_or_else(|| ResolveError::NameNotDeclared { name: qualified() })?;
            return Ok((const_type(&value), Some(const_expr(sx.attrs.clone(), value))));
        }
        if let Some(TypedValue { v: Value::Type(t), .. }) = sb.value_at(index) {
            let pkg_name = path.rsplit('/').next().unwrap_or(path);
            let tv = TypeValueExpr {
                attrs: sx.attrs.clone(),
                ty: TypeExpr::Qualified {
                    pkg: build::name_expr(pkg_name),
                    name: sx.sel.clone(),
                },
                resolved: Some(t.clone()),
            };
            return Ok((Type::TypeType, Some(Expr::Type(tv))));
        }
        let t = sb
            .type_at(index)
            .cloned()
            .ok_or_else(|| ResolveError::Unsupported(format!("{} used before its type is known", qualified())))?;
        sx.path = ValuePath::block(1, index, sx.sel.clone());
        Ok((t, None))
    }

    fn index(&mut self, scope: ScopeId, ix: &mut IndexExpr) -> Result<Type> {
        let xt = self.expr(scope, &mut ix.x)?;
        let it = self.expr(scope, &mut ix.index)?;
        let xt = self.default_const(&mut ix.x, &xt)?;
        match xt.underlying(&*self.reg) {
            Type::Map(mt) => {
                self.coerce(&mut ix.index, &it, &mt.key)?;
                if ix.has_ok {
                    return Ok(Type::Tuple(Arc::new(vec![mt.value.clone(), Type::BOOL])));
                }
                Ok(mt.value.clone())
            }
            Type::Array(_) | Type::Slice(_) | Type::Pointer(_) | Type::Prim(PrimKind::String) => {
                if ix.has_ok {
                    return Err(ResolveError::Unsupported(format!("comma-ok index of {}", xt)));
                }
                self.coerce(&mut ix.index, &it, &Type::INT)?;
                xt.elem(&*self.reg)
                    .ok_or_else(|| ResolveError::Unsupported(format!("cannot index {}", xt)))
            }
            other => Err(ResolveError::Unsupported(format!("cannot index {}", other))),
        }
    }

    fn slice(&mut self, scope: ScopeId, sx: &mut SliceExpr) -> Result<Type> {
        let xt = self.expr(scope, &mut sx.x)?;
        let xt = self.default_const(&mut sx.x, &xt)?;
        for bound in [sx.low.as_mut(), sx.high.as_mut(), sx.max.as_mut()].into_iter().flatten() {
            let t = self.expr(scope, bound)?;
            self.coerce(bound, &t, &Type::INT)?;
        }
        match xt.underlying(&*self.reg) {
            Type::Array(at) => Ok(Type::slice_of(at.elem.clone())),
            Type::Pointer(elem) => match elem.underlying(&*self.reg) {
                Type::Array(at) => Ok(Type::slice_of(at.elem.clone())),
                other => Err(ResolveError::Unsupported(format!("cannot slice {}", other))),
            },
            Type::Slice(_) | Type::Prim(PrimKind::String) => Ok(xt),
            other => Err(ResolveError::Unsupported(format!("cannot slice {}", other))),
        }
    }

    fn star(&mut self, scope: ScopeId, sx: &mut StarExpr) -> Result<(Type, Option<Expr>)> {
        let xt = self.expr(scope, &mut sx.x)?;
        if xt == Type::TypeType {
            let (Some(inner), Expr::Type(tv)) = (type_of_type_expr(&sx.x), &*sx.x) else {
                return Err(ResolveError::NotAType { name: sx.x.to_string() });
            };
            let ptr = TypeValueExpr {
                attrs: sx.attrs.clone(),
                ty: TypeExpr::Pointer {
                    elem: Box::new(tv.ty.clone()),
                },
                resolved: Some(Type::pointer_to(inner)),
            };
            return Ok((Type::TypeType, Some(Expr::Type(ptr))));
        }
        match xt.underlying(&*self.reg) {
            Type::Pointer(elem) => Ok(((*elem).clone(), None)),
            other => Err(ResolveError::Unsupported(format!("dereference of non-pointer {}", other))),
        }
    }

    fn composite(&mut self, scope: ScopeId, cl: &mut CompositeLitExpr) -> Result<Type> {
        let (declared, open_elem) = match &mut cl.ty {
            TypeExpr::Array { len: None, elem } => (None, Some(self.type_expr(scope, elem)?)),
            te => (Some(self.type_expr(scope, te)?), None),
        };
        let shape = match (&declared, &open_elem) {
            (Some(t), _) => t.underlying(&*self.reg),
            (None, Some(elem)) => Type::slice_of(elem.clone()),
            (None, None) => return Err(ResolveError::Unsupported("composite literal without type".to_string())),
        };
        let mut max_len = 0usize;
        match &shape {
            Type::Struct(st) => {
                for (i, kv) in cl.elts.iter_mut().enumerate() {
                    let index = match &kv.key {
                        Some(Expr::Name(nx)) => st.field_index(&nx.name).ok_or_else(|| ResolveError::UnknownSelector {
                            name: nx.name.clone(),
                            on: shape_name(&declared),
                        })?,
                        Some(other) => {
                            return Err(ResolveError::Unsupported(format!("struct literal key {}", other)))
                        }
                        None => i,
                    };
                    let field = st.fields.get(index).ok_or_else(|| {
                        ResolveError::Unsupported(format!("too many values in {} literal", shape_name(&declared)))
                    })?;
                    let t = self.expr(scope, &mut kv.value)?;
                    self.coerce(&mut kv.value, &t, &field.ty)?;
                    kv.slot = Some(index);
                }
            }
            Type::Array(_) | Type::Slice(_) => {
                let elem = shape.elem(&*self.reg).unwrap_or_else(Type::empty_interface);
                let mut next = 0usize;
                for kv in cl.elts.iter_mut() {
                    let index = match kv.key.as_mut() {
                        Some(key) => {
                            let kt = self.expr(scope, key)?;
                            self.coerce(key, &kt, &Type::INT)?;
                            match key {
                                Expr::Const(c) => c.value.as_i64().and_then(|i| usize::try_from(i).ok()).ok_or_else(|| {
                                    ResolveError::InvalidConstant {
                                        literal: c.value.to_string(),
                                        reason: "index must be a non-negative integer".to_string(),
                                    }
                                })?,
                                other => {
                                    return Err(ResolveError::Unsupported(format!("non-constant index {}", other)))
                                }
                            }
                        }
                        None => next,
                    };
                    kv.slot = Some(index);
                    next = index + 1;
                    max_len = max_len.max(next);
                    let t = self.expr(scope, &mut kv.value)?;
                    self.coerce(&mut kv.value, &t, &elem)?;
                }
            }
            Type::Map(mt) => {
                for kv in cl.elts.iter_mut() {
                    let Some(key) = kv.key.as_mut() else {
                        return Err(ResolveError::Unsupported("map literal element without key".to_string()));
                    };
                    let kt = self.expr(scope, key)?;
                    self.coerce(key, &kt, &mt.key)?;
                    let vt = self.expr(scope, &mut kv.value)?;
                    self.coerce(&mut kv.value, &vt, &mt.value)?;
                }
            }
            other => return Err(ResolveError::Unsupported(format!("composite literal of {}", other))),
        }
        let t = match (declared, open_elem) {
            (Some(t), _) => t,
            (None, Some(elem)) => Type::Array(Arc::new(ArrayType { len: max_len, elem })),
            (None, None) => return Err(ResolveError::Unsupported("composite literal without type".to_string())),
        };
        cl.resolved = Some(t.clone());
        Ok(t)
    }

    /* ===================== Type Expressions ===================== */

    pub(super) fn type_expr(&mut self, scope: ScopeId, te: &mut TypeExpr) -> Result<Type> {
        Ok(match te {
            TypeExpr::Name(nx) => {
                let path = self.reg.get_path_for_name(scope, &nx.name)?;
                let value = self.reg.value_of_path(scope, &path)?;
                nx.path = path;
                match value {
                    Some(TypedValue { v: Value::Type(t), .. }) => t,
                    _ => return Err(ResolveError::NotAType { name: nx.name.clone() }),
                }
            }
            TypeExpr::Qualified { pkg, name } => {
                let path = self.reg.get_path_for_name(scope, &pkg.name)?;
                let pkg_path = match self.reg.value_of_path(scope, &path)? {
                    Some(TypedValue { v: Value::Package(p), .. }) => p,
                    _ => return Err(ResolveError::PackageNotFound { path: pkg.name.clone() }),
                };
                pkg.path = path;
                let info = self
                    .reg
                    .package(&pkg_path)
                    .ok_or_else(|| ResolveError::PackageNotFound { path: pkg_path.clone() })?;
                let sb = self.reg.must_scope(info.scope)?;
                match sb.index_of(name).and_then(|i| sb.value_at(i)) {
                    Some(TypedValue { v: Value::Type(t), .. }) => t.clone(),
                    _ => {
                        return Err(ResolveError::NotAType {
                            name: format!("{}.{}", pkg_path, name),
                        })
                    }
                }
            }
            TypeExpr::Array { len: Some(n), elem } => {
                let len = *n as usize;
                Type::Array(Arc::new(ArrayType {
                    len,
                    elem: self.type_expr(scope, elem)?,
                }))
            }
            TypeExpr::Array { len: None, .. } => {
                return Err(ResolveError::Unsupported(
                    "array type without length outside a composite literal".to_string(),
                ))
            }
            TypeExpr::Slice { elem } => Type::slice_of(self.type_expr(scope, elem)?),
            TypeExpr::Map { key, value } => Type::Map(Arc::new(MapType {
                key: self.type_expr(scope, key)?,
                value: self.type_expr(scope, value)?,
            })),
            TypeExpr::Pointer { elem } => Type::pointer_to(self.type_expr(scope, elem)?),
            TypeExpr::Struct { fields } => {
                let mut out = Vec::with_capacity(fields.len());
                for f in fields.iter_mut() {
                    if f.name.is_empty() {
                        return Err(ResolveError::Unsupported("embedded struct fields".to_string()));
                    }
                    out.push(FieldType {
                        name: f.name.clone(),
                        ty: self.type_expr(scope, &mut f.ty)?,
                    });
                }
                Type::Struct(Arc::new(StructType { fields: out }))
            }
            TypeExpr::Func(fte) => Type::Func(Arc::new(self.func_type(scope, fte)?)),
            TypeExpr::Interface { methods } => {
                let mut out = Vec::with_capacity(methods.len());
                for m in methods.iter_mut() {
                    let ty = self.type_expr(scope, &mut m.ty)?;
                    if !matches!(ty, Type::Func(_)) {
                        return Err(ResolveError::Unsupported("embedded interfaces".to_string()));
                    }
                    out.push(FieldType {
                        name: m.name.clone(),
                        ty,
                    });
                }
                Type::Interface(Arc::new(InterfaceType { methods: out }))
            }
        })
    }

    /// Signature of a function type expression; a variadic last parameter
    /// `...T` has type `[]T`.
    pub(super) fn func_type(&mut self, scope: ScopeId, fte: &mut FuncTypeExpr) -> Result<FuncType> {
        let variadic = fte.variadic;
        let n = fte.params.len();
        let mut params = Vec::with_capacity(n);
        for (i, p) in fte.params.iter_mut().enumerate() {
            let mut ty = self.type_expr(scope, &mut p.ty)?;
            if variadic && i + 1 == n {
                ty = Type::slice_of(ty);
            }
            params.push(FieldType {
                name: p.name.clone(),
                ty,
            });
        }
        let mut results = Vec::with_capacity(fte.results.len());
        for r in fte.results.iter_mut() {
            results.push(FieldType {
                name: r.name.clone(),
                ty: self.type_expr(scope, &mut r.ty)?,
            });
        }
        Ok(FuncType {
            params,
            results,
            variadic,
        })
    }
}

fn shape_name(t: &Option<Type>) -> String {
    t.as_ref().map(|t| t.to_string()).unwrap_or_else(|| "array".to_string())
}
