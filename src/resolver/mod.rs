//! Preprocessing
//!
//! Turns a parsed package into one the machine can run: every scope gets a
//! static block, every identifier a `ValuePath`, untyped constants are
//! converted to their context type, and composite literals, selectors and
//! calls are annotated with what the machine needs (resolved types, field
//! indexes, method path kinds, pushed argument counts).
//!
//! Package-level declarations are processed in passes: names first, then
//! types, method and function signatures, constants, variables, and finally
//! function bodies. Within a pass, source order is kept.

mod static_block;
mod typing;
pub mod uverse;

pub use static_block::{package_tag, PackageInfo, Registry, ScopeKind, StaticBlock};

use std::sync::Arc;

use crate::ast::*;
use crate::errors::ResolveError;
use crate::types::{DeclaredRef, DeclaredType, FieldType, FuncType, MethodInfo, PrimKind, Type};
use crate::values::{TypedValue, Value};

type Result<T> = std::result::Result<T, ResolveError>;

/// Result list of the function whose body is being processed.
#[derive(Debug, Clone)]
struct FuncCtx {
    results: Vec<FieldType>,
}

pub struct Preprocessor<'a> {
    reg: &'a mut Registry,
    pkg_path: String,
    funcs: Vec<FuncCtx>,
}

/// Preprocess `pkg` in place and register it. Imports must already be
/// registered. On failure every scope created for the package is dropped.
pub fn preprocess_package(reg: &mut Registry, pkg: &mut PackageNode) -> Result<()> {
    if reg.has_package(&pkg.path) {
        return Err(ResolveError::Unsupported(format!("package {} already added", pkg.path)));
    }
    let path = pkg.path.clone();
    let mut pp = Preprocessor {
        reg,
        pkg_path: path.clone(),
        funcs: Vec::new(),
    };
    let result = pp.package(pkg);
    if result.is_err() {
        reg.remove_package_scopes(&path);
    }
    result
}

fn slot_name(name: &str, fallback: String) -> String {
    if name.is_empty() || name == "_" {
        fallback
    } else {
        name.to_string()
    }
}

impl<'a> Preprocessor<'a> {
    fn new_scope(&mut self, kind: ScopeKind, parent: ScopeId) -> Result<ScopeId> {
        self.reg.new_scope(kind, Some(parent), &self.pkg_path)
    }

    /* ===================== Package ===================== */

    fn package(&mut self, pkg: &mut PackageNode) -> Result<()> {
        tracing::debug!(pkg = %pkg.path, files = pkg.files.len(), "preprocessing package");
        let pkg_scope = self.reg.new_scope(ScopeKind::Package, None, &self.pkg_path)?;
        pkg.scope = Some(pkg_scope);
        let mut file_scopes = Vec::with_capacity(pkg.files.len());
        for file in pkg.files.iter_mut() {
            let fs = self.new_scope(ScopeKind::File, pkg_scope)?;
            file.scope = Some(fs);
            file_scopes.push(fs);
        }

        // Imports are constant package values in the file scope.
        for (file, &fs) in pkg.files.iter().zip(&file_scopes) {
            for decl in &file.decls {
                if let Decl::Import(imp) = decl {
                    if !self.reg.has_package(&imp.path) {
                        return Err(ResolveError::PackageNotFound { path: imp.path.clone() });
                    }
                    let value = TypedValue::new(Type::Package, Value::Package(imp.path.clone()));
                    self.reg
                        .must_scope_mut(fs)?
                        .define2(true, imp.local_name(), Type::Package, Some(value))?;
                }
            }
        }

        // Reserve every package-level name so declarations may refer to
        // each other regardless of order.
        for file in &pkg.files {
            for decl in &file.decls {
                let sb = self.reg.must_scope_mut(pkg_scope)?;
                match decl {
                    Decl::Func(fd) if fd.recv.is_none() && fd.name != "init" => {
                        sb.predefine(false, &fd.name)?;
                    }
                    Decl::Value(vd) => {
                        for n in vd.names.iter().filter(|n| n.name != "_") {
                            sb.predefine(vd.is_const, &n.name)?;
                        }
                    }
                    Decl::Type(td) => {
                        sb.predefine(false, &td.name.name)?;
                    }
                    _ => {}
                }
            }
        }

        for file in pkg.files.iter_mut() {
            for decl in file.decls.iter_mut() {
                if let Decl::Type(td) = decl {
                    let name = td.name.name.clone();
                    self.declare_type(pkg_scope, td, name)?;
                }
            }
        }
        for (file, &fs) in pkg.files.iter_mut().zip(&file_scopes) {
            for decl in file.decls.iter_mut() {
                if let Decl::Type(td) = decl {
                    self.define_type(fs, pkg_scope, td)?;
                }
            }
        }

        for (file, &fs) in pkg.files.iter_mut().zip(&file_scopes) {
            for decl in file.decls.iter_mut() {
                if let Decl::Func(fd) = decl {
                    if fd.recv.is_some() {
                        self.declare_method(fs, fd)?;
                    }
                }
            }
        }
        for (file, &fs) in pkg.files.iter_mut().zip(&file_scopes) {
            for decl in file.decls.iter_mut() {
                if let Decl::Func(fd) = decl {
                    if fd.recv.is_none() {
                        self.declare_func(fs, pkg_scope, fd)?;
                    }
                }
            }
        }

        for (file, &fs) in pkg.files.iter_mut().zip(&file_scopes) {
            for decl in file.decls.iter_mut() {
                if let Decl::Value(vd) = decl {
                    if vd.is_const {
                        self.const_decl(fs, pkg_scope, vd)?;
                    }
                }
            }
        }
        for (file, &fs) in pkg.files.iter_mut().zip(&file_scopes) {
            for decl in file.decls.iter_mut() {
                if let Decl::Value(vd) = decl {
                    if !vd.is_const {
                        self.var_decl(fs, pkg_scope, vd)?;
                    }
                }
            }
        }

        for (file, &fs) in pkg.files.iter_mut().zip(&file_scopes) {
            for decl in file.decls.iter_mut() {
                if let Decl::Func(fd) = decl {
                    self.func_decl_body(fs, fd)?;
                }
            }
        }

        self.reg.add_package(PackageInfo {
            name: pkg.name.clone(),
            path: pkg.path.clone(),
            scope: pkg_scope,
            file_scopes,
        });
        Ok(())
    }

    /* ===================== Declarations ===================== */

    /// First pass over a type declaration: make the name usable.
    fn declare_type(&mut self, def_scope: ScopeId, td: &mut TypeDecl, unique: String) -> Result<()> {
        if td.is_alias {
            return Ok(());
        }
        let reference = DeclaredRef {
            pkg_path: self.pkg_path.clone(),
            name: unique,
        };
        self.reg.add_declared(DeclaredType {
            reference: reference.clone(),
            base: Type::empty_interface(),
            methods: Vec::new(),
        });
        let t = Type::Declared(reference);
        self.reg
            .must_scope_mut(def_scope)?
            .define(&td.name.name, Type::TypeType, Some(TypedValue::type_value(t.clone())))?;
        td.resolved = Some(t);
        Ok(())
    }

    /// Second pass: resolve the underlying type (or the aliased one).
    fn define_type(&mut self, eval_scope: ScopeId, def_scope: ScopeId, td: &mut TypeDecl) -> Result<()> {
        let base = self.type_expr(eval_scope, &mut td.ty)?;
        if td.is_alias {
            self.reg.must_scope_mut(def_scope)?.define(
                &td.name.name,
                Type::TypeType,
                Some(TypedValue::type_value(base.clone())),
            )?;
            td.resolved = Some(base);
        } else {
            let Some(Type::Declared(r)) = &td.resolved else {
                return Err(ResolveError::NotAType { name: td.name.name.clone() });
            };
            if let Some(dt) = self.reg.declared_mut(r) {
                dt.base = base;
            }
        }
        td.name.path = self.reg.get_path_for_name(eval_scope, &td.name.name)?;
        Ok(())
    }

    fn receiver_type(&mut self, scope: ScopeId, recv: &mut FieldTypeExpr) -> Result<(DeclaredRef, bool)> {
        let (ptr, te) = match &mut recv.ty {
            TypeExpr::Pointer { elem } => (true, &mut **elem),
            other => (false, other),
        };
        match self.type_expr(scope, te)? {
            Type::Declared(r) => Ok((r, ptr)),
            other => Err(ResolveError::Unsupported(format!("method receiver of type {}", other))),
        }
    }

    fn declare_method(&mut self, fs: ScopeId, fd: &mut FuncDecl) -> Result<()> {
        let Some(recv) = fd.recv.as_mut() else {
            return Ok(());
        };
        let (r, ptr) = self.receiver_type(fs, recv)?;
        let ft = Arc::new(self.func_type(fs, &mut fd.ty)?);
        let dt = self
            .reg
            .declared_mut(&r)
            .ok_or_else(|| ResolveError::NotAType { name: r.name.clone() })?;
        if dt.reference.pkg_path != self.pkg_path {
            return Err(ResolveError::Unsupported(format!("method on non-local type {}", r.name)));
        }
        if dt.method(&fd.name).is_some() {
            return Err(ResolveError::ValueChanged {
                name: format!("{}.{}", r.name, fd.name),
            });
        }
        dt.methods.push(MethodInfo {
            name: fd.name.clone(),
            ptr_receiver: ptr,
            ty: ft.clone(),
            func: None,
        });
        fd.resolved = Some(Type::Func(ft));
        Ok(())
    }

    fn declare_func(&mut self, fs: ScopeId, pkg_scope: ScopeId, fd: &mut FuncDecl) -> Result<()> {
        let ft = Arc::new(self.func_type(fs, &mut fd.ty)?);
        fd.resolved = Some(Type::Func(ft.clone()));
        if fd.name == "init" {
            return Ok(());
        }
        let index = self
            .reg
            .must_scope_mut(pkg_scope)?
            .define(&fd.name, Type::Func(ft), None)?;
        fd.path = ValuePath::block(1, index, fd.name.clone());
        Ok(())
    }

    fn func_decl_body(&mut self, fs: ScopeId, fd: &mut FuncDecl) -> Result<()> {
        let ft = match &fd.resolved {
            Some(Type::Func(ft)) => ft.clone(),
            _ => return Err(ResolveError::Unsupported(format!("func {} has no signature", fd.name))),
        };
        let recv = match fd.recv.as_mut() {
            Some(recv) => {
                let (r, ptr) = self.receiver_type(fs, recv)?;
                let t = Type::Declared(r);
                let t = if ptr { Type::pointer_to(t) } else { t };
                Some((recv.name.clone(), t))
            }
            None => None,
        };
        let scope = self.func_body(fs, recv, &ft, &mut fd.body)?;
        fd.scope = Some(scope);
        Ok(())
    }

    /// Create the function scope (receiver, parameters, results), process
    /// the body and append the implicit trailing return.
    fn func_body(
        &mut self,
        parent: ScopeId,
        recv: Option<(Name, Type)>,
        ft: &FuncType,
        body: &mut Body,
    ) -> Result<ScopeId> {
        let scope = self.new_scope(ScopeKind::Func, parent)?;
        {
            let sb = self.reg.must_scope_mut(scope)?;
            if let Some((name, t)) = recv {
                sb.define(&slot_name(&name, ".recv".to_string()), t, None)?;
            }
            for (i, p) in ft.params.iter().enumerate() {
                sb.define(&slot_name(&p.name, format!(".arg{}", i)), p.ty.clone(), None)?;
            }
            for (i, r) in ft.results.iter().enumerate() {
                sb.define(&slot_name(&r.name, format!(".res{}", i)), r.ty.clone(), None)?;
            }
        }
        self.funcs.push(FuncCtx {
            results: ft.results.clone(),
        });
        let stmts = Arc::make_mut(body);
        let result = self.stmts(scope, stmts);
        self.funcs.pop();
        result?;
        if !matches!(stmts.last(), Some(Stmt::Return(_))) {
            stmts.push(Stmt::Return(ReturnStmt {
                attrs: Attributes::default(),
                results: Vec::new(),
            }));
        }
        Ok(scope)
    }

    fn const_decl(&mut self, eval_scope: ScopeId, def_scope: ScopeId, vd: &mut ValueDecl) -> Result<()> {
        if vd.values.len() != vd.names.len() {
            return Err(ResolveError::Unsupported(
                "constant declaration without one value per name".to_string(),
            ));
        }
        let declared = match vd.ty.as_mut() {
            Some(te) => Some(self.type_expr(eval_scope, te)?),
            None => None,
        };
        let mut types = Vec::with_capacity(vd.names.len());
        for (nx, value) in vd.names.iter_mut().zip(vd.values.iter_mut()) {
            let mut t = self.expr(eval_scope, value)?;
            if let Some(dt) = &declared {
                t = self.coerce(value, &t, dt)?;
            }
            let Expr::Const(cx) = value else {
                return Err(ResolveError::InvalidConstant {
                    literal: value.to_string(),
                    reason: "not a constant expression".to_string(),
                });
            };
            types.push(t.clone());
            if nx.name == "_" {
                nx.path = ValuePath::blank();
                continue;
            }
            self.reg
                .must_scope_mut(def_scope)?
                .define2(true, &nx.name, t, Some(cx.value.clone()))?;
            nx.path = self.reg.get_path_for_name(eval_scope, &nx.name)?;
        }
        vd.resolved = types;
        Ok(())
    }

    fn var_decl(&mut self, eval_scope: ScopeId, def_scope: ScopeId, vd: &mut ValueDecl) -> Result<()> {
        let declared = match vd.ty.as_mut() {
            Some(te) => Some(self.type_expr(eval_scope, te)?),
            None => None,
        };
        let n = vd.names.len();
        let types: Vec<Type> = if vd.values.is_empty() {
            let t = declared.ok_or_else(|| {
                ResolveError::Unsupported("variable declaration without type or value".to_string())
            })?;
            vec![t; n]
        } else if vd.values.len() == 1 && n > 1 {
            self.tuple_rhs(eval_scope, &mut vd.values[0], n)?
        } else if vd.values.len() == n {
            let mut types = Vec::with_capacity(n);
            for value in vd.values.iter_mut() {
                let t = self.expr(eval_scope, value)?;
                let t = match &declared {
                    Some(dt) => self.coerce(value, &t, dt)?,
                    None => self.default_const(value, &t)?,
                };
                types.push(declared.clone().unwrap_or(t));
            }
            types
        } else {
            return Err(ResolveError::Unsupported(format!(
                "assignment mismatch: {} variables but {} values",
                n,
                vd.values.len()
            )));
        };
        for (nx, t) in vd.names.iter_mut().zip(&types) {
            if nx.name == "_" {
                nx.path = ValuePath::blank();
                continue;
            }
            self.reg.must_scope_mut(def_scope)?.define(&nx.name, t.clone(), None)?;
            nx.path = self.reg.get_path_for_name(eval_scope, &nx.name)?;
        }
        vd.resolved = types;
        Ok(())
    }

    fn local_decl(&mut self, scope: ScopeId, decl: &mut Decl) -> Result<()> {
        match decl {
            Decl::Value(vd) if vd.is_const => self.const_decl(scope, scope, vd),
            Decl::Value(vd) => self.var_decl(scope, scope, vd),
            Decl::Type(td) => {
                // Local types get a name unique within the package.
                let unique = format!("{}#{}", td.name.name, scope.local());
                self.reg.must_scope_mut(scope)?.predefine(false, &td.name.name)?;
                self.declare_type(scope, td, unique)?;
                self.define_type(scope, scope, td)
            }
            Decl::Func(fd) => Err(ResolveError::Unsupported(format!("nested func declaration {}", fd.name))),
            Decl::Import(imp) => Err(ResolveError::Unsupported(format!("import {} inside a function", imp.path))),
        }
    }

    /* ===================== Statements ===================== */

    fn stmts(&mut self, scope: ScopeId, body: &mut [Stmt]) -> Result<()> {
        for s in body.iter_mut() {
            self.stmt(scope, s)?;
        }
        Ok(())
    }

    fn block_stmt(&mut self, parent: ScopeId, b: &mut BlockStmt) -> Result<()> {
        let scope = self.new_scope(ScopeKind::Block, parent)?;
        b.scope = Some(scope);
        self.stmts(scope, Arc::make_mut(&mut b.body).as_mut_slice())
    }

    fn stmt(&mut self, scope: ScopeId, s: &mut Stmt) -> Result<()> {
        match s {
            Stmt::Expr(es) => {
                let t = self.expr(scope, &mut es.x)?;
                self.default_const(&mut es.x, &t)?;
            }
            Stmt::Assign(a) => self.assign(scope, a)?,
            Stmt::IncDec(st) => {
                self.lvalue(scope, &mut st.x)?;
            }
            Stmt::Block(b) => self.block_stmt(scope, b)?,
            Stmt::If(st) => {
                let is = self.new_scope(ScopeKind::Block, scope)?;
                st.scope = Some(is);
                if let Some(init) = st.init.as_mut() {
                    self.stmt(is, init)?;
                }
                let ct = self.expr(is, &mut st.cond)?;
                self.coerce(&mut st.cond, &ct, &Type::BOOL)?;
                self.block_stmt(is, &mut st.then)?;
                if let Some(els) = st.els.as_mut() {
                    self.block_stmt(is, els)?;
                }
            }
            Stmt::For(st) => {
                let fs = self.new_scope(ScopeKind::Block, scope)?;
                st.scope = Some(fs);
                if let Some(init) = st.init.as_mut() {
                    self.stmt(fs, init)?;
                }
                if let Some(cond) = st.cond.as_mut() {
                    let ct = self.expr(fs, cond)?;
                    self.coerce(cond, &ct, &Type::BOOL)?;
                }
                if let Some(post) = st.post.as_mut() {
                    self.stmt(fs, post)?;
                }
                self.stmts(fs, Arc::make_mut(&mut st.body).as_mut_slice())?;
            }
            Stmt::Range(st) => self.range(scope, st)?,
            Stmt::Switch(st) => self.switch(scope, st)?,
            Stmt::Branch(b) => match b.op {
                BranchOp::Break | BranchOp::Continue => {}
                BranchOp::Goto => return Err(ResolveError::Unsupported("goto".to_string())),
                BranchOp::Fallthrough => return Err(ResolveError::Unsupported("fallthrough".to_string())),
            },
            Stmt::Return(r) => self.return_stmt(scope, r)?,
            Stmt::Defer(d) => {
                self.call(scope, &mut d.call)?;
            }
            Stmt::Go(g) => {
                self.call(scope, &mut g.call)?;
            }
            Stmt::Decl(ds) => {
                for d in ds.decls.iter_mut() {
                    self.local_decl(scope, d)?;
                }
            }
        }
        Ok(())
    }

    fn range(&mut self, scope: ScopeId, st: &mut RangeStmt) -> Result<()> {
        let rs = self.new_scope(ScopeKind::Block, scope)?;
        st.scope = Some(rs);
        let xt = self.expr(rs, &mut st.x)?;
        let xt = self.default_const(&mut st.x, &xt)?;
        let (kt, vt) = match xt.underlying(&*self.reg) {
            Type::Array(_) | Type::Slice(_) | Type::Pointer(_) => {
                let elem = xt
                    .elem(&*self.reg)
                    .ok_or_else(|| ResolveError::Unsupported(format!("range over {}", xt)))?;
                (Type::INT, elem)
            }
            Type::Prim(k) if k.default_kind() == PrimKind::String => (Type::INT, Type::INT32),
            Type::Map(mt) => (mt.key.clone(), mt.value.clone()),
            other => return Err(ResolveError::Unsupported(format!("range over {}", other))),
        };
        for (e, t) in [(st.key.as_mut(), kt), (st.value.as_mut(), vt)] {
            let Some(e) = e else { continue };
            if !st.define {
                self.lvalue(rs, e)?;
                continue;
            }
            let Expr::Name(nx) = e else {
                return Err(ResolveError::Unsupported(format!("non-name {} on left side of :=", e)));
            };
            if nx.name == "_" {
                nx.path = ValuePath::blank();
                continue;
            }
            self.reg.must_scope_mut(rs)?.define(&nx.name, t, None)?;
            nx.path = self.reg.get_path_for_name(rs, &nx.name)?;
        }
        self.stmts(rs, Arc::make_mut(&mut st.body).as_mut_slice())
    }

    fn switch(&mut self, scope: ScopeId, st: &mut SwitchStmt) -> Result<()> {
        let ss = self.new_scope(ScopeKind::Block, scope)?;
        st.scope = Some(ss);
        if let Some(init) = st.init.as_mut() {
            self.stmt(ss, init)?;
        }
        let tag_type = match st.tag.as_mut() {
            Some(tag) => {
                let t = self.expr(ss, tag)?;
                self.default_const(tag, &t)?
            }
            None => Type::BOOL,
        };
        for clause in st.clauses.iter_mut() {
            // Cases run in the switch block, before the clause block exists.
            for case in clause.cases.iter_mut() {
                let t = self.expr(ss, case)?;
                self.coerce(case, &t, &tag_type)?;
            }
            let cs = self.new_scope(ScopeKind::Block, ss)?;
            clause.scope = Some(cs);
            self.stmts(cs, Arc::make_mut(&mut clause.body).as_mut_slice())?;
        }
        Ok(())
    }

    fn return_stmt(&mut self, scope: ScopeId, r: &mut ReturnStmt) -> Result<()> {
        let ctx = self
            .funcs
            .last()
            .cloned()
            .ok_or_else(|| ResolveError::Unsupported("return outside function".to_string()))?;
        if r.results.is_empty() {
            return Ok(());
        }
        if r.results.len() == 1 && ctx.results.len() > 1 {
            let t = self.expr(scope, &mut r.results[0])?;
            return match t {
                Type::Tuple(items) if items.len() == ctx.results.len() => Ok(()),
                other => Err(ResolveError::Unsupported(format!(
                    "returning {} from a function with {} results",
                    other,
                    ctx.results.len()
                ))),
            };
        }
        if r.results.len() != ctx.results.len() {
            return Err(ResolveError::Unsupported(format!(
                "wrong number of return values: have {}, want {}",
                r.results.len(),
                ctx.results.len()
            )));
        }
        for (e, want) in r.results.iter_mut().zip(&ctx.results) {
            let t = self.expr(scope, e)?;
            self.coerce(e, &t, &want.ty)?;
        }
        Ok(())
    }

    /// Mark a two-value right-hand side as comma-ok and type it as a tuple.
    fn tuple_rhs(&mut self, scope: ScopeId, rhs: &mut Expr, n: usize) -> Result<Vec<Type>> {
        if n == 2 {
            match rhs {
                Expr::Index(ix) => ix.has_ok = true,
                Expr::TypeAssert(ta) => ta.has_ok = true,
                _ => {}
            }
        }
        match self.expr(scope, rhs)? {
            Type::Tuple(items) if items.len() == n => Ok(items.iter().cloned().collect()),
            other => Err(ResolveError::Unsupported(format!(
                "assignment mismatch: {} variables but {} has type {}",
                n, rhs, other
            ))),
        }
    }

    fn assign(&mut self, scope: ScopeId, a: &mut AssignStmt) -> Result<()> {
        match a.op {
            AssignOp::Define => {
                let n = a.lhs.len();
                let types = if a.rhs.len() == 1 && n > 1 {
                    self.tuple_rhs(scope, &mut a.rhs[0], n)?
                } else if a.rhs.len() == n {
                    let mut types = Vec::with_capacity(n);
                    for e in a.rhs.iter_mut() {
                        let t = self.expr(scope, e)?;
                        types.push(self.default_const(e, &t)?);
                    }
                    types
                } else {
                    return Err(ResolveError::Unsupported(format!(
                        "assignment mismatch: {} variables but {} values",
                        n,
                        a.rhs.len()
                    )));
                };
                for (e, t) in a.lhs.iter_mut().zip(types) {
                    let Expr::Name(nx) = e else {
                        return Err(ResolveError::Unsupported(format!("non-name {} on left side of :=", e)));
                    };
                    if nx.name == "_" {
                        nx.path = ValuePath::blank();
                        continue;
                    }
                    let sb = self.reg.must_scope_mut(scope)?;
                    if sb.index_of(&nx.name).is_some() {
                        sb.redefine_local(&nx.name, t)?;
                    } else {
                        sb.define(&nx.name, t, None)?;
                    }
                    nx.path = self.reg.get_path_for_name(scope, &nx.name)?;
                }
            }
            AssignOp::Assign => {
                let mut lts = Vec::with_capacity(a.lhs.len());
                for e in a.lhs.iter_mut() {
                    lts.push(self.lvalue(scope, e)?);
                }
                if a.rhs.len() == a.lhs.len() {
                    for (e, lt) in a.rhs.iter_mut().zip(&lts) {
                        let t = self.expr(scope, e)?;
                        match lt {
                            Some(lt) => self.coerce(e, &t, lt)?,
                            None => self.default_const(e, &t)?,
                        };
                    }
                } else if a.rhs.len() == 1 {
                    self.tuple_rhs(scope, &mut a.rhs[0], a.lhs.len())?;
                } else {
                    return Err(ResolveError::Unsupported(format!(
                        "assignment mismatch: {} variables but {} values",
                        a.lhs.len(),
                        a.rhs.len()
                    )));
                }
            }
            op => {
                if a.lhs.len() != 1 || a.rhs.len() != 1 {
                    return Err(ResolveError::Unsupported("op-assignment of several values".to_string()));
                }
                let lt = self.lvalue(scope, &mut a.lhs[0])?.unwrap_or_else(Type::empty_interface);
                let rhs = &mut a.rhs[0];
                let rt = self.expr(scope, rhs)?;
                if op.binary().map(BinaryOp::is_shift).unwrap_or(false) {
                    self.coerce(rhs, &rt, &Type::Prim(PrimKind::Uint))?;
                } else {
                    self.coerce(rhs, &rt, &lt)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve an assignment target; `None` for the blank identifier.
    fn lvalue(&mut self, scope: ScopeId, e: &mut Expr) -> Result<Option<Type>> {
        match e {
            Expr::Name(nx) if nx.name == "_" => {
                nx.path = ValuePath::blank();
                Ok(None)
            }
            Expr::Name(nx) => {
                let path = self.reg.get_path_for_name(scope, &nx.name)?;
                if self.reg.is_const_path(scope, &path)? {
                    return Err(ResolveError::Unsupported(format!("cannot assign to constant {}", nx.name)));
                }
                let t = self.reg.type_of_path(scope, &path)?;
                nx.path = path;
                Ok(t)
            }
            Expr::Index(_) | Expr::Selector(_) | Expr::Star(_) => Ok(Some(self.expr(scope, e)?)),
            other => Err(ResolveError::Unsupported(format!("cannot assign to {}", other))),
        }
    }
}

#[cfg(test)]
mod tests;
