//! Package loading and entry points
//!
//! `add_package` preprocesses a package, builds its package and file blocks,
//! binds functions and methods, and runs variable initializers and `init`
//! functions. A realm package that the store already knows is restored from
//! its saved blocks instead, and its initializers are not run again.

use std::sync::Arc;

use super::statements::push_decl;
use super::types::{CallInfo, MachineState, Op};
use super::vm::{Machine, PackageBlocks, Result};
use crate::ast::{Decl, FuncDecl, PackageNode};
use crate::errors::{MachineError, StoreError};
use crate::heap::ObjectRef;
use crate::ownership::{is_realm_path, ObjectId, Realm, RealmRecord};
use crate::resolver::preprocess_package;
use crate::types::Type;
use crate::values::{FuncValue, Handle, RefValue, TypedValue, Value};

fn imports(pkg: &PackageNode) -> Vec<String> {
    let mut paths = Vec::new();
    for file in &pkg.files {
        for decl in &file.decls {
            if let Decl::Import(imp) = decl {
                if !paths.contains(&imp.path) {
                    paths.push(imp.path.clone());
                }
            }
        }
    }
    paths
}

fn decl_func(fd: &FuncDecl, pkg_path: &str, file_block: ObjectRef) -> Result<Arc<FuncValue>> {
    let ty = match &fd.resolved {
        Some(Type::Func(ft)) => ft.clone(),
        _ => return Err(MachineError::internal(format!("func {} was not preprocessed", fd.name))),
    };
    Ok(Arc::new(FuncValue {
        name: fd.name.clone(),
        ty,
        pkg_path: pkg_path.to_string(),
        scope: fd.scope,
        body: Some(fd.body.clone()),
        native_name: None,
        native: None,
        closure: Some(Handle::Mem(file_block)),
        is_method: fd.recv.is_some(),
    }))
}

fn stored_ref(object_id: ObjectId) -> RefValue {
    RefValue {
        object_id,
        hash: Default::default(),
    }
}

impl Machine {
    fn check_usable(&self) -> Result<()> {
        if self.state == MachineState::Failed {
            return Err(MachineError::Discarded);
        }
        Ok(())
    }

    /// Load `pkg` and its imports. The first package added becomes the
    /// active one.
    pub fn add_package(&mut self, pkg: PackageNode) -> Result<()> {
        self.check_usable()?;
        let path = pkg.path.clone();
        self.load_package(pkg)?;
        if self.package.is_none() {
            self.package = Some(path);
        }
        Ok(())
    }

    fn load_package(&mut self, mut pkg: PackageNode) -> Result<()> {
        for path in imports(&pkg) {
            if self.registry.has_package(&path) {
                continue;
            }
            let dep = self
                .store
                .get_package(&path)?
                .ok_or_else(|| StoreError::PackageNotFound(path.clone()))?;
            self.load_package(dep)?;
        }
        let source = pkg.clone();
        preprocess_package(&mut self.registry, &mut pkg)?;
        self.store.set_package(&source)?;
        tracing::debug!(pkg = %pkg.path, realm = is_realm_path(&pkg.path), "loading package");

        let saved = if is_realm_path(&pkg.path) {
            self.store.get_realm(&pkg.path)?
        } else {
            None
        };
        match saved {
            Some(record) => self.restore_package(&pkg, record),
            None => self.init_package(&pkg),
        }
    }

    /// Blocks of a realm package saved by an earlier machine.
    fn restore_package(&mut self, pkg: &PackageNode, record: RealmRecord) -> Result<()> {
        let mut realm = Realm::new(&pkg.path);
        realm.set_log_realm_ops(self.log_realm_ops);
        realm.time = record.time;
        if record.file_blocks.len() != pkg.files.len() {
            return Err(MachineError::internal(format!(
                "realm {} was saved with {} files, package has {}",
                pkg.path,
                record.file_blocks.len(),
                pkg.files.len()
            )));
        }
        let block = self.load(&stored_ref(realm.package_block_id()))?;
        let mut file_blocks = Vec::with_capacity(record.file_blocks.len());
        for id in &record.file_blocks {
            file_blocks.push(self.load(&stored_ref(*id))?);
        }
        self.captured.insert(block);
        self.captured.extend(file_blocks.iter().copied());
        self.bind_funcs(pkg, block, &file_blocks, false)?;
        tracing::debug!(realm = %pkg.path, time = record.time, "restored realm");
        self.realms.insert(pkg.path.clone(), realm);
        self.packages.insert(pkg.path.clone(), PackageBlocks { block, file_blocks });
        Ok(())
    }

    fn init_package(&mut self, pkg: &PackageNode) -> Result<()> {
        let path = pkg.path.clone();
        let pkg_scope = pkg
            .scope
            .ok_or_else(|| MachineError::internal("package without scope"))?;
        let block = self.new_block(pkg_scope, None)?;
        let mut file_blocks = Vec::with_capacity(pkg.files.len());
        for file in &pkg.files {
            let scope = file
                .scope
                .ok_or_else(|| MachineError::internal("file without scope"))?;
            file_blocks.push(self.new_block(scope, Some(Handle::Mem(block)))?);
        }
        self.captured.insert(block);
        self.captured.extend(file_blocks.iter().copied());
        let inits = self.bind_funcs(pkg, block, &file_blocks, true)?;

        let is_realm = is_realm_path(&path);
        if is_realm {
            let mut realm = Realm::new(&path);
            realm.set_log_realm_ops(self.log_realm_ops);
            let id = realm.package_block_id();
            self.heap.obj_mut(block)?.info.set_object_id(id);
            self.heap.register_id(id, block);
            realm.mark_new_real(&mut self.heap, block)?;
            for &fb in &file_blocks {
                let info = &mut self.heap.obj_mut(fb)?.info;
                info.set_owner(Some(block), id);
                info.inc_ref_count();
                realm.mark_new_real(&mut self.heap, fb)?;
            }
            self.realms.insert(path.clone(), realm);
        }
        self.packages.insert(
            path.clone(),
            PackageBlocks {
                block,
                file_blocks: file_blocks.clone(),
            },
        );

        let last_package = self.package.replace(path.clone());
        let last_realm = if is_realm {
            self.realm.replace(path.clone())
        } else {
            self.realm.clone()
        };
        self.in_init = true;

        for (file, &fb) in pkg.files.iter().zip(&file_blocks) {
            let decls: Vec<Decl> = file
                .decls
                .iter()
                .filter(|d| matches!(d, Decl::Value(vd) if !vd.is_const))
                .cloned()
                .collect();
            if decls.is_empty() {
                continue;
            }
            self.push_block(fb);
            for decl in decls.into_iter().rev() {
                push_decl(self, decl);
            }
            self.run()?;
            self.pop_block();
        }
        for fv in inits {
            self.push_value(TypedValue::func(fv));
            self.push_op(Op::Precall {
                call: CallInfo::default(),
            });
            self.run()?;
            self.values.clear();
        }

        self.in_init = false;
        self.package = last_package;
        self.realm = last_realm;
        if is_realm {
            self.finalize_realm(&path)?;
        }
        Ok(())
    }

    /// Put function values into the package block (fresh packages only) and
    /// bind methods to their declared types. Returns the `init` functions.
    fn bind_funcs(
        &mut self,
        pkg: &PackageNode,
        block: ObjectRef,
        file_blocks: &[ObjectRef],
        fresh: bool,
    ) -> Result<Vec<Arc<FuncValue>>> {
        let mut inits = Vec::new();
        for (file, &fb) in pkg.files.iter().zip(file_blocks) {
            for decl in &file.decls {
                let Decl::Func(fd) = decl else {
                    continue;
                };
                let fv = decl_func(fd, &pkg.path, fb)?;
                if fd.recv.is_some() {
                    self.bind_method(fd, fv)?;
                } else if fd.name == "init" {
                    inits.push(fv);
                } else if fresh {
                    let slot = self
                        .heap
                        .obj_mut(block)?
                        .kind
                        .slot_mut(fd.path.index as usize)
                        .ok_or_else(|| MachineError::internal(format!("no slot for func {}", fd.name)))?;
                    *slot = TypedValue::func(fv);
                }
            }
        }
        Ok(inits)
    }

    fn bind_method(&mut self, fd: &FuncDecl, fv: Arc<FuncValue>) -> Result<()> {
        let scope = fd
            .scope
            .ok_or_else(|| MachineError::internal(format!("method {} without scope", fd.name)))?;
        let recv = self
            .registry
            .must_scope(scope)?
            .type_at(0)
            .cloned()
            .ok_or_else(|| MachineError::internal(format!("method {} without receiver", fd.name)))?;
        let declared = match recv {
            Type::Pointer(elem) => (*elem).clone(),
            t => t,
        };
        let Type::Declared(r) = declared else {
            return Err(MachineError::internal(format!("method {} on {}", fd.name, declared)));
        };
        let dt = self
            .registry
            .declared_mut(&r)
            .ok_or_else(|| MachineError::internal(format!("unknown type {}", r.name)))?;
        let mi = dt
            .methods
            .iter_mut()
            .find(|mi| mi.name == fd.name)
            .ok_or_else(|| MachineError::internal(format!("{}.{} was not declared", r.name, fd.name)))?;
        mi.func = Some(fv);
        Ok(())
    }

    /// Persist the clock and file block ids of realm `path`.
    pub(crate) fn save_realm_record(&mut self, path: &str, time: u64) -> Result<()> {
        let mut file_blocks = Vec::new();
        if let Some(pb) = self.packages.get(path) {
            for &fb in &pb.file_blocks {
                file_blocks.push(self.heap.obj(fb)?.info.id);
            }
        }
        self.store.set_realm(&RealmRecord {
            path: path.to_string(),
            time,
            file_blocks,
        })?;
        Ok(())
    }

    /* ===================== Entry Points ===================== */

    /// Function `name` of the active package.
    fn package_func(&mut self, name: &str) -> Result<TypedValue> {
        let not_found = || MachineError::FuncNotFound(name.to_string());
        let pkg = self.package.clone().ok_or_else(not_found)?;
        let scope = self.registry.package(&pkg).map(|p| p.scope).ok_or_else(not_found)?;
        let index = self.registry.must_scope(scope)?.index_of(name).ok_or_else(not_found)?;
        let block = self.packages.get(&pkg).map(|p| p.block).ok_or_else(not_found)?;
        let tv = self.read_slot(block, index as usize)?;
        match tv.v {
            Value::Func(_) => Ok(tv),
            _ => Err(not_found()),
        }
    }

    /// Schedule a call of `name` in the active package without running it;
    /// drive it with `step` or `run`.
    pub fn start_func(&mut self, name: &str, args: Vec<TypedValue>) -> Result<()> {
        self.check_usable()?;
        let func = self.package_func(name)?;
        tracing::debug!(func = name, args = args.len(), "starting call");
        let call = CallInfo {
            num_args: args.len(),
            ..Default::default()
        };
        self.push_value(func);
        self.values.extend(args);
        self.push_op(Op::Precall { call });
        Ok(())
    }

    /// Call `name` in the active package to completion and return its
    /// results.
    pub fn run_func(&mut self, name: &str, args: Vec<TypedValue>) -> Result<Vec<TypedValue>> {
        self.start_func(name, args)?;
        self.run()?;
        Ok(std::mem::take(&mut self.values))
    }

    pub fn run_main(&mut self) -> Result<()> {
        self.run_func("main", Vec::new()).map(|_| ())
    }
}
