//! Machine state and the object-level helpers every opcode relies on

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use super::types::{Frame, Heights, MachineState, Op, Slot, StmtCont};
use crate::ast::{Body, Expr, ScopeId};
use crate::config::{ExecContext, MachineOptions};
use crate::diagnostics::Diagnostics;
use crate::errors::{MachineError, RealmError, StoreError};
use crate::heap::{Heap, ObjectKind, ObjectRef};
use crate::ownership::{load_object, Realm, Store};
use crate::resolver::Registry;
use crate::types::Type;
use crate::values::convert::zero_prim;
use crate::values::{Handle, RefValue, TypedValue, Value};

pub(crate) type Result<T> = std::result::Result<T, MachineError>;

/// Runtime blocks of one loaded package.
#[derive(Debug, Clone)]
pub struct PackageBlocks {
    pub block: ObjectRef,
    pub file_blocks: Vec<ObjectRef>,
}

/* ===================== Machine ===================== */

/// The interpreter: continuation stacks, the object heap, loaded packages
/// and realms, and the injected store and output sink.
///
/// A machine runs one call at a time. After a call fails (an unhandled
/// panic or an internal error) the machine is unusable.
pub struct Machine {
    pub ops: Vec<Op>,
    pub values: Vec<TypedValue>,
    pub exprs: Vec<Expr>,
    pub stmts: Vec<StmtCont>,
    pub slots: Vec<Slot>,
    pub blocks: Vec<ObjectRef>,
    pub frames: Vec<Frame>,
    /// Panic in flight, if any.
    pub exception: Option<TypedValue>,
    /// Active package path.
    pub package: Option<String>,
    /// Active realm path.
    pub realm: Option<String>,
    pub registry: Registry,
    pub heap: Heap,
    pub context: ExecContext,
    pub diag: Diagnostics,
    pub(crate) realms: BTreeMap<String, Realm>,
    pub(crate) packages: BTreeMap<String, PackageBlocks>,
    pub(crate) store: Box<dyn Store>,
    pub(crate) output: Box<dyn Write>,
    /// Blocks a closure or pointer may still reach; never released.
    pub(crate) captured: BTreeSet<ObjectRef>,
    pub(crate) state: MachineState,
    /// Running package initializers; realm transactions are committed once
    /// at the end instead of at every top-level return.
    pub(crate) in_init: bool,
    pub(crate) log_realm_ops: bool,
}

impl Machine {
    pub fn new(options: MachineOptions, store: Box<dyn Store>, output: Box<dyn Write>) -> Self {
        tracing::debug!(
            pkg = ?options.pkg_path,
            max_alloc = options.max_alloc_bytes,
            chain = %options.context.chain_id,
            "creating machine"
        );
        Machine {
            ops: Vec::new(),
            values: Vec::new(),
            exprs: Vec::new(),
            stmts: Vec::new(),
            slots: Vec::new(),
            blocks: Vec::new(),
            frames: Vec::new(),
            exception: None,
            package: options.pkg_path,
            realm: None,
            registry: Registry::new(),
            heap: Heap::new(options.max_alloc_bytes),
            context: options.context,
            diag: Diagnostics::new(options.verbose),
            realms: BTreeMap::new(),
            packages: BTreeMap::new(),
            store,
            output,
            captured: BTreeSet::new(),
            state: MachineState::Idle,
            in_init: false,
            log_realm_ops: false,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn realm_state(&self, path: &str) -> Option<&Realm> {
        self.realms.get(path)
    }

    /// Record every persisted change of every realm, now and later.
    pub fn set_log_realm_ops(&mut self, enabled: bool) {
        self.log_realm_ops = enabled;
        for realm in self.realms.values_mut() {
            realm.set_log_realm_ops(enabled);
        }
    }

    pub fn package_blocks(&self, path: &str) -> Option<&PackageBlocks> {
        self.packages.get(path)
    }

    /// Make `path` the package that `run_func` looks functions up in.
    pub fn use_package(&mut self, path: &str) -> Result<()> {
        if !self.packages.contains_key(path) {
            return Err(StoreError::PackageNotFound(path.to_string()).into());
        }
        self.package = Some(path.to_string());
        Ok(())
    }

    /* ===================== Stacks ===================== */

    pub fn push_op(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn push_eval(&mut self, x: Expr) {
        self.exprs.push(x);
        self.ops.push(Op::Eval);
    }

    pub fn push_eval_slot(&mut self, x: Expr) {
        self.exprs.push(x);
        self.ops.push(Op::EvalSlot);
    }

    /// Schedule a statement list.
    pub fn push_body(&mut self, body: Body) {
        self.stmts.push(StmtCont::new(body));
        self.ops.push(Op::Body);
    }

    pub fn push_value(&mut self, tv: TypedValue) {
        self.values.push(tv);
    }

    pub fn pop_value(&mut self) -> Result<TypedValue> {
        self.values
            .pop()
            .ok_or_else(|| MachineError::internal("value stack underflow"))
    }

    /// Pop the top `n` values, in push order.
    pub fn pop_values(&mut self, n: usize) -> Result<Vec<TypedValue>> {
        if self.values.len() < n {
            return Err(MachineError::internal("value stack underflow"));
        }
        Ok(self.values.split_off(self.values.len() - n))
    }

    pub fn peek_value(&self, offset: usize) -> Result<&TypedValue> {
        self.values
            .len()
            .checked_sub(offset + 1)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| MachineError::internal("value stack underflow"))
    }

    pub fn pop_slot(&mut self) -> Result<Slot> {
        self.slots
            .pop()
            .ok_or_else(|| MachineError::internal("slot stack underflow"))
    }

    pub fn heights(&self) -> Heights {
        Heights {
            ops: self.ops.len(),
            values: self.values.len(),
            exprs: self.exprs.len(),
            stmts: self.stmts.len(),
            slots: self.slots.len(),
            blocks: self.blocks.len(),
        }
    }

    /// Cut every stack back to `h`, releasing the blocks popped on the way.
    pub fn truncate(&mut self, h: &Heights) {
        self.ops.truncate(h.ops);
        self.values.truncate(h.values);
        self.exprs.truncate(h.exprs);
        self.stmts.truncate(h.stmts);
        self.slots.truncate(h.slots);
        while self.blocks.len() > h.blocks {
            self.pop_block();
        }
    }

    /* ===================== Blocks ===================== */

    /// Allocate the runtime block of `scope`. Slots start out holding the
    /// static value (constants, types, imports) or the zero value of their
    /// declared type.
    pub fn new_block(&mut self, scope: ScopeId, parent: Option<Handle>) -> Result<ObjectRef> {
        let sb = self.registry.must_scope(scope)?;
        let layout: Vec<(Option<TypedValue>, Option<Type>)> = (0..sb.num_names())
            .map(|i| (sb.value_at(i as u16).cloned(), sb.type_at(i as u16).cloned()))
            .collect();
        let mut values = Vec::with_capacity(layout.len());
        for (value, ty) in layout {
            values.push(match (value, ty) {
                (Some(v), _) => v,
                (None, Some(t)) if !matches!(t, Type::TypeType | Type::Package) => self.zero_value(&t)?,
                _ => TypedValue::undefined(),
            });
        }
        self.heap.alloc(ObjectKind::Block { scope, values, parent })
    }

    pub fn push_block(&mut self, block: ObjectRef) {
        self.blocks.push(block);
    }

    pub fn pop_block(&mut self) {
        if let Some(block) = self.blocks.pop() {
            self.release_block(block);
        }
    }

    fn release_block(&mut self, block: ObjectRef) {
        if self.captured.contains(&block) {
            return;
        }
        let transient = self.heap.get(block).map(|o| o.info.is_transient()).unwrap_or(false);
        if transient {
            self.heap.release(block);
        }
    }

    /// Keep `block` and its ancestors alive: a closure or a pointer now
    /// refers to them.
    pub fn capture_block(&mut self, block: ObjectRef) -> Result<()> {
        let mut current = Some(block);
        while let Some(b) = current {
            if !self.captured.insert(b) {
                break;
            }
            current = match &self.heap.obj(b)?.kind {
                ObjectKind::Block {
                    parent: Some(Handle::Mem(p)),
                    ..
                } => Some(*p),
                _ => None,
            };
        }
        Ok(())
    }

    pub fn current_block(&self) -> Result<ObjectRef> {
        self.blocks
            .last()
            .copied()
            .ok_or_else(|| MachineError::internal("no current block"))
    }

    /// Parent of a block, loading it from the store if needed.
    pub fn parent_block(&mut self, block: ObjectRef) -> Result<Option<ObjectRef>> {
        let parent = match &self.heap.obj(block)?.kind {
            ObjectKind::Block { parent, .. } => parent.clone(),
            other => return Err(MachineError::internal(format!("{} is not a block", other.name()))),
        };
        match parent {
            None => Ok(None),
            Some(Handle::Mem(r)) => Ok(Some(r)),
            Some(Handle::Stored(rv)) => {
                let r = self.load(&rv)?;
                if let ObjectKind::Block { parent, .. } = &mut self.heap.obj_mut(block)?.kind {
                    *parent = Some(Handle::Mem(r));
                }
                Ok(Some(r))
            }
        }
    }

    /// The block `depth` hops up the lexical chain; depth 1 is the current
    /// block.
    pub fn block_at_depth(&mut self, depth: u8) -> Result<ObjectRef> {
        let mut block = self.current_block()?;
        for _ in 1..depth {
            block = self
                .parent_block(block)?
                .ok_or_else(|| MachineError::internal(format!("block chain shorter than {}", depth)))?;
        }
        Ok(block)
    }

    /* ===================== Loading ===================== */

    /// Bring a stored object into the heap, once per object id.
    pub fn load(&mut self, rv: &RefValue) -> Result<ObjectRef> {
        load_object(&mut self.heap, self.store.as_mut(), rv)
    }

    pub fn resolve_handle(&mut self, h: &Handle) -> Result<ObjectRef> {
        match h {
            Handle::Mem(r) => Ok(*r),
            Handle::Stored(rv) => self.load(rv),
        }
    }

    /// Replace a stored reference inside `tv` by an in-memory one.
    pub fn fill(&mut self, mut tv: TypedValue) -> Result<TypedValue> {
        let rv = match tv.handle() {
            Some(Handle::Stored(rv)) => rv.clone(),
            _ => return Ok(tv),
        };
        let r = self.load(&rv)?;
        if let Some(h) = tv.handle_mut() {
            *h = Handle::Mem(r);
        }
        Ok(tv)
    }

    /* ===================== Slots ===================== */

    /// Read slot `index` of an object. A stored reference found there is
    /// loaded and the slot updated to point at the loaded object.
    pub fn read_slot(&mut self, base: ObjectRef, index: usize) -> Result<TypedValue> {
        let tv = self
            .heap
            .obj(base)?
            .kind
            .slot(index)
            .cloned()
            .ok_or_else(|| MachineError::internal(format!("slot {} out of range", index)))?;
        if !matches!(tv.handle(), Some(Handle::Stored(_))) {
            return Ok(tv);
        }
        let filled = self.fill(tv)?;
        if let Some(slot) = self.heap.obj_mut(base)?.kind.slot_mut(index) {
            *slot = filled.clone();
        }
        Ok(filled)
    }

    /// Current value behind an assignment target.
    pub fn slot_value(&mut self, slot: &Slot) -> Result<TypedValue> {
        match slot {
            Slot::Pointer { base, index } => self.read_slot(*base, *index),
            Slot::MapEntry { map, key, elem } => {
                let hk = self.map_key(key)?;
                let found = match &self.heap.obj(*map)?.kind {
                    ObjectKind::Map { map } => map.get(&hk).cloned(),
                    other => return Err(MachineError::internal(format!("{} is not a map", other.name()))),
                };
                match found {
                    Some(tv) => self.fill(tv),
                    None => self.zero_value(elem),
                }
            }
            Slot::Discard => Ok(TypedValue::undefined()),
        }
    }

    pub fn assign_slot(&mut self, slot: &Slot, value: TypedValue) -> Result<()> {
        match slot {
            Slot::Discard => Ok(()),
            Slot::Pointer { base, index } => self.store_into(*base, *index, value),
            Slot::MapEntry { map, key, .. } => self.map_insert(*map, key.clone(), value),
        }
    }

    /// Store into slot `index` of `base` with value semantics, reporting
    /// the change to the active realm when `base` is persisted.
    pub fn store_into(&mut self, base: ObjectRef, index: usize, value: TypedValue) -> Result<()> {
        let value = self.copy_value(value)?;
        let new_obj = first_object(&value);
        let tracked = self.is_tracked(base)?;
        let slot = self
            .heap
            .obj_mut(base)?
            .kind
            .slot_mut(index)
            .ok_or_else(|| MachineError::internal(format!("slot {} out of range", index)))?;
        let old = std::mem::replace(slot, value);
        if tracked {
            let old = self.fill(old)?;
            self.did_update(base, first_object(&old), new_obj)?;
        }
        Ok(())
    }

    pub fn map_insert(&mut self, map: ObjectRef, key: TypedValue, value: TypedValue) -> Result<()> {
        let key = self.copy_value(key)?;
        let value = self.copy_value(value)?;
        let hk = self.map_key(&key)?;
        let new_obj = first_object(&value);
        let tracked = self.is_tracked(map)?;
        let old = match &mut self.heap.obj_mut(map)?.kind {
            ObjectKind::Map { map } => map.insert(hk, key, value),
            other => return Err(MachineError::internal(format!("{} is not a map", other.name()))),
        };
        if old.is_none() {
            self.heap.charge_growth(1)?;
        }
        if tracked {
            let old_obj = match old {
                Some(old) => first_object(&self.fill(old)?),
                None => None,
            };
            self.did_update(map, old_obj, new_obj)?;
        }
        Ok(())
    }

    pub fn map_delete(&mut self, map: ObjectRef, key: &TypedValue) -> Result<()> {
        let hk = self.map_key(key)?;
        let tracked = self.is_tracked(map)?;
        let removed = match &mut self.heap.obj_mut(map)?.kind {
            ObjectKind::Map { map } => map.remove(&hk),
            other => return Err(MachineError::internal(format!("{} is not a map", other.name()))),
        };
        if let (true, Some((_, old))) = (tracked, removed) {
            let old = self.fill(old)?;
            self.did_update(map, first_object(&old), None)?;
        }
        Ok(())
    }

    /* ===================== Values ===================== */

    /// Empty storage for the `n` elements of a new array. The ceiling is
    /// checked before anything is reserved.
    pub(crate) fn elems_with_capacity(&self, n: usize) -> Result<Vec<TypedValue>> {
        self.heap.reserve(n)?;
        let mut elems = Vec::new();
        elems
            .try_reserve_exact(n)
            .map_err(|_| MachineError::Runtime(format!("cannot allocate {} elements", n)))?;
        Ok(elems)
    }

    /// Arrays and structs are values: storing one stores a fresh copy.
    pub fn copy_value(&mut self, tv: TypedValue) -> Result<TypedValue> {
        let Value::Object(h) = &tv.v else {
            return Ok(tv);
        };
        let r = self.resolve_handle(h)?;
        let mut kind = match &self.heap.obj(r)?.kind {
            k @ (ObjectKind::Array { .. } | ObjectKind::Struct { .. }) => k.clone(),
            _ => {
                return Ok(TypedValue {
                    t: tv.t,
                    v: Value::Object(Handle::Mem(r)),
                })
            }
        };
        for child in kind.children_mut() {
            *child = self.copy_value(std::mem::take(child))?;
        }
        let copy = self.heap.alloc(kind)?;
        Ok(TypedValue {
            t: tv.t,
            v: Value::Object(Handle::Mem(copy)),
        })
    }

    pub fn zero_value(&mut self, t: &Type) -> Result<TypedValue> {
        let v = match t.underlying(&self.registry) {
            Type::Prim(kind) => zero_prim(kind),
            Type::Array(at) => {
                let n = usize::try_from(at.len)
                    .map_err(|_| MachineError::Runtime(format!("array length {} out of range", at.len)))?;
                let mut elems = self.elems_with_capacity(n)?;
                for _ in 0..n {
                    elems.push(self.zero_value(&at.elem)?);
                }
                Value::Object(Handle::Mem(self.heap.alloc(ObjectKind::Array { elems })?))
            }
            Type::Struct(st) => {
                let mut fields = Vec::with_capacity(st.fields.len());
                for f in &st.fields {
                    fields.push(self.zero_value(&f.ty)?);
                }
                Value::Object(Handle::Mem(self.heap.alloc(ObjectKind::Struct { fields })?))
            }
            Type::Interface(_) => return Ok(TypedValue::undefined()),
            _ => Value::None,
        };
        Ok(TypedValue::new(t.clone(), v))
    }

    /* ===================== Realm Hooks ===================== */

    fn is_tracked(&self, oo: ObjectRef) -> Result<bool> {
        let info = &self.heap.obj(oo)?.info;
        Ok(info.is_real() || info.get_is_new_real())
    }

    /// Link loaded owners so dirty marks can climb to the package block.
    fn link_owners(&mut self, oo: ObjectRef) -> Result<()> {
        let mut current = oo;
        loop {
            let info = &self.heap.obj(current)?.info;
            if info.owner.is_some() || info.owner_id.is_zero() {
                return Ok(());
            }
            let owner_id = info.owner_id;
            let owner = self.load(&RefValue {
                object_id: owner_id,
                hash: Default::default(),
            })?;
            self.heap.obj_mut(current)?.info.owner = Some(owner);
            current = owner;
        }
    }

    /// Report that a slot of persisted object `po` changed from referring
    /// to `xo` to referring to `co`.
    pub fn did_update(&mut self, po: ObjectRef, xo: Option<ObjectRef>, co: Option<ObjectRef>) -> Result<()> {
        let Some(path) = self.realm.clone() else {
            let id = self.heap.obj(po)?.info.id;
            return Err(RealmError::NoRealm(id.to_string()).into());
        };
        self.link_owners(po)?;
        let realm = self
            .realms
            .get_mut(&path)
            .ok_or_else(|| RealmError::UnknownRealm(path.clone()))?;
        realm.did_update(&mut self.heap, Some(po), xo, co)
    }

    /// Commit the transaction of realm `path` and persist its clock.
    pub fn finalize_realm(&mut self, path: &str) -> Result<()> {
        let realm = self
            .realms
            .get_mut(path)
            .ok_or_else(|| RealmError::UnknownRealm(path.to_string()))?;
        if !realm.has_pending_marks() {
            return Ok(());
        }
        realm.finalize(&mut self.heap, self.store.as_mut(), &mut self.diag)?;
        let time = realm.time;
        self.save_realm_record(path, time)
    }

    /* ===================== Output ===================== */

    pub fn write_output(&mut self, text: &str) -> Result<()> {
        self.output
            .write_all(text.as_bytes())
            .map_err(|e| MachineError::internal(format!("output: {}", e)))
    }
}

/// The object a value refers to directly, if it is in memory.
pub fn first_object(tv: &TypedValue) -> Option<ObjectRef> {
    tv.handle().and_then(Handle::as_mem)
}
