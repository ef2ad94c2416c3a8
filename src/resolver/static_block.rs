//! Static blocks and the scope registry
//!
//! Every node that introduces a scope owns one `StaticBlock`, kept in the
//! `Registry` under the node's `ScopeId`. At runtime each static block maps
//! to exactly one `Block` object, so a `(depth, index)` pair computed here
//! addresses a live slot directly.

use std::collections::{BTreeMap, BTreeSet};

use super::uverse::uverse;
use crate::ast::{Name, PathKind, ScopeId, ValuePath, MAX_DEPTH};
use crate::errors::ResolveError;
use crate::ownership::PkgId;
use crate::types::{DeclaredRef, DeclaredType, Type, TypeLookup};
use crate::values::TypedValue;

/* ===================== Static Block ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Package,
    File,
    Func,
    Block,
}

#[derive(Debug, Clone)]
pub struct StaticBlock {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub pkg_path: String,
    names: Vec<Name>,
    /// Parallel to `names`; `None` until the name is defined.
    types: Vec<Option<Type>>,
    /// Static values: constants, types and package-level functions.
    values: Vec<Option<TypedValue>>,
    consts: BTreeSet<Name>,
    /// Names used here but declared in an enclosing scope.
    externs: Vec<Name>,
}

impl StaticBlock {
    pub fn new(id: ScopeId, kind: ScopeKind, parent: Option<ScopeId>, pkg_path: &str) -> Self {
        StaticBlock {
            id,
            kind,
            parent,
            pkg_path: pkg_path.to_string(),
            names: Vec::new(),
            types: Vec::new(),
            values: Vec::new(),
            consts: BTreeSet::new(),
            externs: Vec::new(),
        }
    }

    pub fn num_names(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[Name] {
        &self.names
    }

    pub fn externs(&self) -> &[Name] {
        &self.externs
    }

    pub fn is_file(&self) -> bool {
        self.kind == ScopeKind::File
    }

    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.names.iter().position(|n| n == name).map(|i| i as u16)
    }

    pub fn is_const(&self, name: &str) -> bool {
        self.consts.contains(name)
    }

    pub fn type_at(&self, index: u16) -> Option<&Type> {
        self.types.get(index as usize).and_then(|t| t.as_ref())
    }

    pub fn value_at(&self, index: u16) -> Option<&TypedValue> {
        self.values.get(index as usize).and_then(|v| v.as_ref())
    }

    /// Record a free-variable use; the set only grows.
    pub fn add_extern(&mut self, name: &str) {
        if !self.externs.iter().any(|n| n == name) {
            self.externs.push(name.to_string());
        }
    }

    fn push_name(&mut self, name: &str) -> Result<u16, ResolveError> {
        if self.names.len() >= u16::MAX as usize {
            return Err(ResolveError::TooManyNames);
        }
        self.names.push(name.to_string());
        self.types.push(None);
        self.values.push(None);
        Ok((self.names.len() - 1) as u16)
    }

    /// Reserve a slot for `name` before its type is known.
    pub fn predefine(&mut self, is_const: bool, name: &str) -> Result<u16, ResolveError> {
        if let Some(index) = self.index_of(name) {
            if self.is_const(name) != is_const {
                return Err(ResolveError::ConstChanged { name: name.to_string() });
            }
            return Ok(index);
        }
        let index = self.push_name(name)?;
        if is_const {
            self.consts.insert(name.to_string());
        }
        Ok(index)
    }

    pub fn define(&mut self, name: &str, ty: Type, value: Option<TypedValue>) -> Result<u16, ResolveError> {
        self.define2(false, name, ty, value)
    }

    /// Define (or complete the predefinition of) `name`. Changing the type or
    /// value of a name that already has one is an error; so is changing its
    /// const-ness.
    pub fn define2(
        &mut self,
        is_const: bool,
        name: &str,
        ty: Type,
        value: Option<TypedValue>,
    ) -> Result<u16, ResolveError> {
        let index = self.predefine(is_const, name)?;
        let i = index as usize;
        match &self.types[i] {
            Some(old) if *old != ty => {
                return Err(ResolveError::TypeChanged { name: name.to_string() });
            }
            _ => self.types[i] = Some(ty),
        }
        if let Some(value) = value {
            match &self.values[i] {
                Some(old) if *old != value => {
                    return Err(ResolveError::ValueChanged { name: name.to_string() });
                }
                _ => self.values[i] = Some(value),
            }
        }
        Ok(index)
    }

    /// Redeclaration inside `:=` with at least one new name: the type must
    /// match but the slot is reused.
    pub fn redefine_local(&mut self, name: &str, ty: Type) -> Result<u16, ResolveError> {
        match self.index_of(name) {
            Some(index) if self.types[index as usize].as_ref() == Some(&ty) => Ok(index),
            Some(_) => Err(ResolveError::TypeChanged { name: name.to_string() }),
            None => self.define(name, ty, None),
        }
    }
}

/* ===================== Registry ===================== */

#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: Name,
    pub path: String,
    pub scope: ScopeId,
    pub file_scopes: Vec<ScopeId>,
}

/// All static blocks, declared types and preprocessed packages known to one
/// machine.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    scopes: BTreeMap<ScopeId, StaticBlock>,
    declared: BTreeMap<DeclaredRef, DeclaredType>,
    packages: BTreeMap<String, PackageInfo>,
    next_local: BTreeMap<u32, u32>,
    tags: BTreeMap<u32, String>,
}

impl TypeLookup for Registry {
    fn declared(&self, r: &DeclaredRef) -> Option<&DeclaredType> {
        self.declared.get(r).or_else(|| uverse().declared(r))
    }
}

/// Per-package tag of scope ids: the leading bytes of the package id.
pub fn package_tag(pkg_path: &str) -> u32 {
    let id = PkgId::from_path(pkg_path);
    u32::from_be_bytes([id.0[0], id.0[1], id.0[2], id.0[3]]).max(1)
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_scope(
        &mut self,
        kind: ScopeKind,
        parent: Option<ScopeId>,
        pkg_path: &str,
    ) -> Result<ScopeId, ResolveError> {
        let tag = package_tag(pkg_path);
        match self.tags.get(&tag) {
            Some(owner) if owner != pkg_path => {
                return Err(ResolveError::Unsupported(format!(
                    "scope tag collision between {} and {}",
                    owner, pkg_path
                )));
            }
            Some(_) => {}
            None => {
                self.tags.insert(tag, pkg_path.to_string());
            }
        }
        let local = self.next_local.entry(tag).or_insert(0);
        let id = ScopeId::new(tag, *local);
        *local += 1;
        self.scopes
            .insert(id, StaticBlock::new(id, kind, parent, pkg_path));
        Ok(id)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&StaticBlock> {
        self.scopes.get(&id)
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> Option<&mut StaticBlock> {
        self.scopes.get_mut(&id)
    }

    pub fn must_scope(&self, id: ScopeId) -> Result<&StaticBlock, ResolveError> {
        self.scopes
            .get(&id)
            .ok_or_else(|| ResolveError::Unsupported(format!("unknown scope {:?}", id)))
    }

    pub fn must_scope_mut(&mut self, id: ScopeId) -> Result<&mut StaticBlock, ResolveError> {
        self.scopes
            .get_mut(&id)
            .ok_or_else(|| ResolveError::Unsupported(format!("unknown scope {:?}", id)))
    }

    pub fn add_declared(&mut self, dt: DeclaredType) {
        self.declared.insert(dt.reference.clone(), dt);
    }

    pub fn declared_mut(&mut self, r: &DeclaredRef) -> Option<&mut DeclaredType> {
        self.declared.get_mut(r)
    }

    pub fn add_package(&mut self, info: PackageInfo) {
        self.packages.insert(info.path.clone(), info);
    }

    pub fn package(&self, path: &str) -> Option<&PackageInfo> {
        self.packages.get(path)
    }

    pub fn has_package(&self, path: &str) -> bool {
        self.packages.contains_key(path)
    }

    /// Forget a package whose preprocessing failed part way.
    pub fn remove_package_scopes(&mut self, pkg_path: &str) {
        let tag = package_tag(pkg_path);
        self.scopes.retain(|id, _| id.package_tag() != tag);
        self.declared.retain(|r, _| r.pkg_path != pkg_path);
        self.next_local.remove(&tag);
        self.packages.remove(pkg_path);
    }

    /// Compile `name`, used from `scope`, into a value path.
    ///
    /// Walks outward one scope at a time. Every scope passed on the way that
    /// is not a file scope records `name` as an extern. Names not found in
    /// any enclosing scope are looked up in the Uverse.
    pub fn get_path_for_name(&mut self, scope: ScopeId, name: &str) -> Result<ValuePath, ResolveError> {
        if name == "_" {
            return Ok(ValuePath::blank());
        }
        let mut depth: usize = 1;
        let mut current = Some(scope);
        while let Some(id) = current {
            let sb = self.must_scope_mut(id)?;
            if let Some(index) = sb.index_of(name) {
                if depth > MAX_DEPTH {
                    return Err(ResolveError::DepthOverflow { name: name.to_string() });
                }
                return Ok(ValuePath::block(depth as u8, index, name));
            }
            if !sb.is_file() {
                sb.add_extern(name);
            }
            current = sb.parent;
            depth += 1;
        }
        match uverse().index_of(name) {
            Some(index) => Ok(ValuePath::new(PathKind::Uverse, 0, index, name)),
            None => Err(ResolveError::NameNotDeclared { name: name.to_string() }),
        }
    }

    /// The static block a block path points into, starting from `scope`.
    pub fn scope_at_depth(&self, scope: ScopeId, depth: u8) -> Result<&StaticBlock, ResolveError> {
        let mut sb = self.must_scope(scope)?;
        for _ in 1..depth {
            let parent = sb
                .parent
                .ok_or_else(|| ResolveError::InvalidPath(format!("depth {} from {:?}", depth, scope)))?;
            sb = self.must_scope(parent)?;
        }
        Ok(sb)
    }

    /// Static type of a resolved name.
    pub fn type_of_path(&self, scope: ScopeId, path: &ValuePath) -> Result<Option<Type>, ResolveError> {
        match path.kind {
            PathKind::Block if path.is_blank() => Ok(None),
            PathKind::Block => Ok(self
                .scope_at_depth(scope, path.depth)?
                .type_at(path.index)
                .cloned()),
            PathKind::Uverse => Ok(uverse().value(path.index).and_then(|tv| tv.t.clone())),
            _ => Err(ResolveError::InvalidPath(path.to_string())),
        }
    }

    /// Static value of a resolved name (constants, types, functions).
    pub fn value_of_path(&self, scope: ScopeId, path: &ValuePath) -> Result<Option<TypedValue>, ResolveError> {
        match path.kind {
            PathKind::Block if path.is_blank() => Ok(None),
            PathKind::Block => Ok(self
                .scope_at_depth(scope, path.depth)?
                .value_at(path.index)
                .cloned()),
            PathKind::Uverse => Ok(uverse().value(path.index).cloned()),
            _ => Err(ResolveError::InvalidPath(path.to_string())),
        }
    }

    /// Whether a resolved name is a constant.
    pub fn is_const_path(&self, scope: ScopeId, path: &ValuePath) -> Result<bool, ResolveError> {
        match path.kind {
            PathKind::Block if path.is_blank() => Ok(false),
            PathKind::Block => Ok(self.scope_at_depth(scope, path.depth)?.is_const(&path.name)),
            PathKind::Uverse => Ok(uverse().is_const(path.index)),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKG: &str = "gno.land/p/demo/scopes";

    /// package > file > func > block > block
    fn nested() -> (Registry, Vec<ScopeId>) {
        let mut reg = Registry::new();
        let pkg = reg.new_scope(ScopeKind::Package, None, PKG).unwrap();
        let file = reg.new_scope(ScopeKind::File, Some(pkg), PKG).unwrap();
        let func = reg.new_scope(ScopeKind::Func, Some(file), PKG).unwrap();
        let outer = reg.new_scope(ScopeKind::Block, Some(func), PKG).unwrap();
        let inner = reg.new_scope(ScopeKind::Block, Some(outer), PKG).unwrap();
        (reg, vec![pkg, file, func, outer, inner])
    }

    #[test]
    fn test_name_two_levels_up() {
        let (mut reg, s) = nested();
        let func = reg.scope_mut(s[2]).unwrap();
        func.define("a", Type::INT, None).unwrap();
        func.define("x", Type::INT, None).unwrap();

        let path = reg.get_path_for_name(s[4], "x").unwrap();
        assert_eq!(path, ValuePath::block(3, 1, "x"));

        // From the outer block the function scope is two levels up.
        let path = reg.get_path_for_name(s[3], "x").unwrap();
        assert_eq!(path, ValuePath::block(2, 1, "x"));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let (mut reg, s) = nested();
        reg.scope_mut(s[0]).unwrap().define("total", Type::INT, None).unwrap();
        let first = reg.get_path_for_name(s[4], "total").unwrap();
        let second = reg.get_path_for_name(s[4], "total").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.depth, 5);
    }

    #[test]
    fn test_externs_marked_between_use_and_declaration() {
        let (mut reg, s) = nested();
        reg.scope_mut(s[0]).unwrap().define("total", Type::INT, None).unwrap();
        reg.get_path_for_name(s[4], "total").unwrap();

        for id in &s[2..] {
            assert_eq!(reg.scope(*id).unwrap().externs(), ["total".to_string()]);
        }
        // File scopes never record externs; the declaring scope doesn't either.
        assert!(reg.scope(s[1]).unwrap().externs().is_empty());
        assert!(reg.scope(s[0]).unwrap().externs().is_empty());
    }

    #[test]
    fn test_uverse_and_undeclared() {
        let (mut reg, s) = nested();
        let path = reg.get_path_for_name(s[4], "len").unwrap();
        assert_eq!(path.kind, PathKind::Uverse);

        let err = reg.get_path_for_name(s[4], "nope").unwrap_err();
        assert_eq!(err, ResolveError::NameNotDeclared { name: "nope".into() });
        assert_eq!(reg.get_path_for_name(s[4], "_").unwrap(), ValuePath::blank());
    }

    #[test]
    fn test_redefinition_rules() {
        let (mut reg, s) = nested();
        let sb = reg.scope_mut(s[2]).unwrap();
        let i = sb.predefine(false, "x").unwrap();
        assert_eq!(sb.define("x", Type::INT, None).unwrap(), i);
        assert_eq!(
            sb.define("x", Type::STRING, None).unwrap_err(),
            ResolveError::TypeChanged { name: "x".into() }
        );

        sb.define2(true, "N", Type::INT, Some(TypedValue::int(1))).unwrap();
        assert_eq!(
            sb.define2(true, "N", Type::INT, Some(TypedValue::int(2))).unwrap_err(),
            ResolveError::ValueChanged { name: "N".into() }
        );
        assert_eq!(
            sb.define2(false, "N", Type::INT, None).unwrap_err(),
            ResolveError::ConstChanged { name: "N".into() }
        );
    }

    #[test]
    fn test_depth_overflow() {
        let mut reg = Registry::new();
        let mut id = reg.new_scope(ScopeKind::Package, None, PKG).unwrap();
        reg.scope_mut(id).unwrap().define("deep", Type::INT, None).unwrap();
        for _ in 0..MAX_DEPTH {
            id = reg.new_scope(ScopeKind::Block, Some(id), PKG).unwrap();
        }
        assert_eq!(
            reg.get_path_for_name(id, "deep").unwrap_err(),
            ResolveError::DepthOverflow { name: "deep".into() }
        );
    }

    #[test]
    fn test_scope_ids_are_stable_per_package() {
        let mut a = Registry::new();
        let mut b = Registry::new();
        a.new_scope(ScopeKind::Package, None, "gno.land/p/other").unwrap();
        let x = a.new_scope(ScopeKind::Package, None, PKG).unwrap();
        let y = b.new_scope(ScopeKind::Package, None, PKG).unwrap();
        assert_eq!(x, y);
    }
}
