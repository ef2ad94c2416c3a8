//! Realm transactions
//!
//! A realm is the persistent namespace of one realm package. Between two
//! boundary crossings it collects marks (created, updated, deleted objects);
//! `finalize` turns those marks into saved images with ids and hashes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::store::{ObjectImage, Store};
use super::{ObjectId, PkgId, ValueHash};
use crate::diagnostics::Diagnostics;
use crate::errors::{MachineError, RealmError, StoreError};
use crate::heap::{Heap, ObjectRef};
use crate::values::{Handle, RefValue};

/* ===================== Operation Log ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealmOpKind {
    New,
    Mod,
    Del,
}

/// One persisted change, recorded when the operation log is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmOp {
    pub kind: RealmOpKind,
    pub object_id: ObjectId,
    #[serde(default)]
    pub image: Option<ObjectImage>,
}

impl fmt::Display for RealmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            RealmOpKind::New => "c",
            RealmOpKind::Mod => "u",
            RealmOpKind::Del => "d",
        };
        write!(f, "{}[{}]", tag, self.object_id)
    }
}

/* ===================== Realm ===================== */

#[derive(Debug, Clone)]
pub struct Realm {
    pub id: PkgId,
    pub path: String,
    /// Logical clock; bumped by each dirty mark and each new object id.
    pub time: u64,
    created: Vec<ObjectRef>,
    updated: Vec<ObjectRef>,
    deleted: Vec<ObjectRef>,
    ops_log: Option<Vec<RealmOp>>,
}

/// Realm packages live under a `/r/` path segment.
pub fn is_realm_path(path: &str) -> bool {
    path.split('/').any(|segment| segment == "r")
}

impl Realm {
    pub fn new(path: &str) -> Self {
        Realm {
            id: PkgId::from_path(path),
            path: path.to_string(),
            time: 0,
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            ops_log: None,
        }
    }

    /// The id reserved for the realm's package block.
    pub fn package_block_id(&self) -> ObjectId {
        ObjectId::new(self.id, 0)
    }

    pub fn set_log_realm_ops(&mut self, enabled: bool) {
        self.ops_log = if enabled { Some(Vec::new()) } else { None };
    }

    pub fn realm_ops(&self) -> &[RealmOp] {
        self.ops_log.as_deref().unwrap_or(&[])
    }

    pub fn reset_realm_ops(&mut self) {
        if let Some(log) = self.ops_log.as_mut() {
            log.clear();
        }
    }

    pub fn sprint_realm_ops(&self) -> String {
        self.realm_ops()
            .iter()
            .map(|op| op.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_pending_marks(&self) -> bool {
        !(self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }

    /* ===================== Ownership Hooks ===================== */

    /// Record that slot of `po` changed from holding `xo` to holding `co`.
    /// Any of the three may be absent; nothing is tracked for transient
    /// parents.
    pub fn did_update(
        &mut self,
        heap: &mut Heap,
        po: Option<ObjectRef>,
        xo: Option<ObjectRef>,
        co: Option<ObjectRef>,
    ) -> Result<(), MachineError> {
        let Some(po) = po else {
            return Ok(());
        };
        let pinfo = &heap.obj(po)?.info;
        if !pinfo.is_real() && !pinfo.get_is_new_real() {
            return Ok(());
        }
        if pinfo.is_real() && pinfo.id.pkg_id != self.id {
            return Err(RealmError::CrossRealm {
                owner: pinfo.id.pkg_id.to_string(),
                realm: self.path.clone(),
            }
            .into());
        }
        let po_id = pinfo.id;

        if let Some(co) = co {
            let cinfo = &heap.obj(co)?.info;
            if cinfo.is_real() && cinfo.id.pkg_id != self.id {
                return Err(RealmError::CrossRealm {
                    owner: cinfo.id.pkg_id.to_string(),
                    realm: self.path.clone(),
                }
                .into());
            }
            // Re-attaching an object detached earlier in this transaction
            // revives it; compress_marks drops it from the deleted list.
            let cinfo = &mut heap.obj_mut(co)?.info;
            cinfo.inc_ref_count();
            cinfo.set_is_deleted(false, 0);
        }
        if let Some(xo) = xo {
            heap.obj_mut(xo)?.info.dec_ref_count();
        }

        self.mark_dirty(heap, po)?;

        if let Some(co) = co {
            let cinfo = &mut heap.obj_mut(co)?.info;
            if cinfo.has_owner() {
                let same_owner =
                    cinfo.owner == Some(po) || (!po_id.is_zero() && cinfo.owner_id == po_id);
                if !same_owner {
                    // Owner conflicts are allowed within a transaction; the
                    // extra reference shows up as an escaped object.
                    cinfo.set_owner(Some(po), po_id);
                }
                if cinfo.is_real() {
                    self.mark_dirty(heap, co)?;
                }
            } else {
                cinfo.set_owner(Some(po), po_id);
                self.mark_new_real(heap, co)?;
            }
        }

        if let Some(xo) = xo {
            let xinfo = &heap.obj(xo)?.info;
            if xinfo.get_ref_count() == 0 && (xinfo.get_is_new_real() || xinfo.is_real()) {
                self.mark_deleted(heap, xo)?;
            }
        }
        Ok(())
    }

    /* ===================== Marks ===================== */

    pub fn mark_new_real(&mut self, heap: &mut Heap, oo: ObjectRef) -> Result<(), MachineError> {
        let info = &mut heap.obj_mut(oo)?.info;
        if info.get_is_new_real() {
            return Ok(());
        }
        info.set_is_new_real(true);
        self.created.push(oo);
        Ok(())
    }

    pub fn mark_dirty(&mut self, heap: &mut Heap, oo: ObjectRef) -> Result<(), MachineError> {
        let info = &mut heap.obj_mut(oo)?.info;
        if info.get_is_dirty() {
            return Ok(());
        }
        self.time += 1;
        info.set_is_dirty(true, self.time);
        self.updated.push(oo);
        Ok(())
    }

    pub fn mark_deleted(&mut self, heap: &mut Heap, oo: ObjectRef) -> Result<(), MachineError> {
        let info = &mut heap.obj_mut(oo)?.info;
        if info.get_is_deleted() {
            return Ok(());
        }
        info.set_is_deleted(true, self.time);
        info.set_is_new_deleted(true);
        self.deleted.push(oo);
        Ok(())
    }

    /// Forget deletions of objects that were re-attached later in the
    /// transaction, release what the remaining ones referenced, then drop
    /// deleted objects from the created and updated lists.
    fn compress_marks(&mut self, heap: &mut Heap, store: &mut dyn Store) -> Result<(), MachineError> {
        let mut deleted = Vec::with_capacity(self.deleted.len());
        for oo in std::mem::take(&mut self.deleted) {
            let info = &mut heap.obj_mut(oo)?.info;
            if info.get_ref_count() > 0 {
                info.set_is_deleted(false, 0);
                info.set_is_new_deleted(false);
            } else {
                deleted.push(oo);
            }
        }
        self.deleted = deleted;
        self.dec_ref_deleted_descendants(heap, store)?;

        let is_live = |heap: &Heap, oo: &ObjectRef| {
            heap.get(*oo)
                .map(|o| !o.info.get_is_deleted())
                .unwrap_or(false)
        };
        self.created.retain(|oo| is_live(heap, oo));
        self.updated.retain(|oo| is_live(heap, oo));
        Ok(())
    }

    /// Drop one reference from every object a deleted object refers to. A
    /// child left without references is deleted in turn; one still held
    /// elsewhere is dirtied so its new count is saved.
    fn dec_ref_deleted_descendants(&mut self, heap: &mut Heap, store: &mut dyn Store) -> Result<(), MachineError> {
        let mut work = self.deleted.clone();
        while let Some(oo) = work.pop() {
            for child in child_objects(heap, store, oo)? {
                let cinfo = &mut heap.obj_mut(child)?.info;
                let tracked = cinfo.is_real() || cinfo.get_is_new_real();
                if !tracked || cinfo.get_is_deleted() {
                    continue;
                }
                if cinfo.dec_ref_count() > 0 {
                    if cinfo.is_real() {
                        self.mark_dirty(heap, child)?;
                    }
                    continue;
                }
                self.mark_deleted(heap, child)?;
                work.push(child);
            }
        }
        Ok(())
    }

    /// Walk owner links up from every marked object so that the hashes of
    /// owners are recomputed along with their children.
    fn mark_dirty_ancestors(&mut self, heap: &mut Heap) -> Result<(), MachineError> {
        let starts: Vec<ObjectRef> = self.created.iter().chain(self.updated.iter()).copied().collect();
        for start in starts {
            let mut current = heap.obj(start)?.info.owner;
            while let Some(owner) = current {
                let info = &heap.obj(owner)?.info;
                if info.get_is_dirty() || info.get_is_new_real() || !info.is_real() {
                    break;
                }
                let next = info.owner;
                self.mark_dirty(heap, owner)?;
                current = next;
            }
        }
        Ok(())
    }

    /* ===================== Finalization ===================== */

    /// Commit the transaction: assign ids, hash and save every new or dirty
    /// object, drop deleted ones, and clear the marks.
    pub fn finalize(
        &mut self,
        heap: &mut Heap,
        store: &mut dyn Store,
        diag: &mut Diagnostics,
    ) -> Result<(), MachineError> {
        tracing::debug!(
            realm = %self.path,
            created = self.created.len(),
            updated = self.updated.len(),
            deleted = self.deleted.len(),
            "finalizing realm transaction"
        );
        self.compress_marks(heap, store)?;
        self.mark_dirty_ancestors(heap)?;
        for oo in self.created.clone() {
            self.save_unsaved_object(heap, store, diag, oo)?;
        }
        for oo in self.updated.clone() {
            self.save_unsaved_object(heap, store, diag, oo)?;
        }
        for oo in self.deleted.clone() {
            self.remove_deleted_object(heap, store, oo)?;
        }
        self.clear_marks(heap);
        Ok(())
    }

    fn clear_marks(&mut self, heap: &mut Heap) {
        for oo in self
            .created
            .drain(..)
            .chain(self.updated.drain(..))
            .chain(self.deleted.drain(..))
        {
            if let Some(obj) = heap.get_mut(oo) {
                obj.info.clear_marks();
            }
        }
    }

    fn next_object_id(&mut self) -> ObjectId {
        self.time += 1;
        ObjectId::new(self.id, self.time)
    }

    /// Give a new object its id; it becomes new-real.
    pub fn assign_new_object_id(&mut self, heap: &mut Heap, oo: ObjectRef) -> Result<ObjectId, MachineError> {
        if heap.obj(oo)?.info.is_real() {
            return Err(MachineError::internal("unexpected non-zero object id"));
        }
        let id = self.next_object_id();
        let info = &mut heap.obj_mut(oo)?.info;
        info.set_object_id(id);
        info.set_is_new_real(true);
        heap.register_id(id, oo);
        Ok(id)
    }

    /// Save `root` and every unsaved object below it, children first.
    /// Uses an explicit work stack; ownership chains may be long.
    fn save_unsaved_object(
        &mut self,
        heap: &mut Heap,
        store: &mut dyn Store,
        diag: &mut Diagnostics,
        root: ObjectRef,
    ) -> Result<(), MachineError> {
        let mut processing: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut work: Vec<(ObjectRef, bool)> = vec![(root, false)];

        while let Some((oo, expanded)) = work.pop() {
            if expanded {
                self.save_object(heap, store, diag, oo)?;
                continue;
            }
            if processing.contains(&oo) || !is_unsaved(heap, oo)? {
                continue;
            }
            processing.insert(oo);

            if !heap.obj(oo)?.info.is_real() {
                self.assign_new_object_id(heap, oo)?;
            }
            let oo_id = heap.obj(oo)?.info.id;
            work.push((oo, true));

            for child in unsaved_children(heap, oo)? {
                if processing.contains(&child) {
                    continue;
                }
                let cinfo = &mut heap.obj_mut(child)?.info;
                if cinfo.is_transient() {
                    // Never counted: it was attached while its parent was
                    // still transient.
                    cinfo.inc_ref_count();
                }
                if !cinfo.has_owner() {
                    cinfo.set_owner(Some(oo), oo_id);
                }
                work.push((child, false));
            }
        }
        Ok(())
    }

    fn save_object(
        &mut self,
        heap: &mut Heap,
        store: &mut dyn Store,
        diag: &mut Diagnostics,
        oo: ObjectRef,
    ) -> Result<(), MachineError> {
        // Fill in owner ids that were unknown when the owner was still new.
        if let Some(owner) = heap.obj(oo)?.info.owner {
            let owner_id = heap.get(owner).map(|o| o.info.id).unwrap_or_default();
            let info = &mut heap.obj_mut(oo)?.info;
            if info.owner_id.is_zero() {
                info.owner_id = owner_id;
            }
        }
        let info = &heap.obj(oo)?.info;
        if !info.is_real() {
            return Err(MachineError::internal("unexpected zero object id"));
        }
        let id = info.id;
        let kind = if info.get_is_new_real() {
            RealmOpKind::New
        } else {
            RealmOpKind::Mod
        };
        if info.ref_count > 1 && !info.get_is_escaped() {
            heap.obj_mut(oo)?.info.set_is_escaped(true);
            heap.obj_mut(oo)?.info.set_is_new_escaped(true);
        }

        let mut image = copy_with_refs(heap, diag, oo)?;
        image.info.hash = ValueHash::default();
        let bytes = serde_json::to_vec(&image).map_err(StoreError::from)?;
        let hash = ValueHash::digest(&bytes);
        image.info.hash = hash;
        store.set_object(&image)?;

        let info = &mut heap.obj_mut(oo)?.info;
        info.set_hash(hash);
        info.set_is_new_real(false);
        info.set_is_dirty(false, 0);
        tracing::trace!(object = %id, ?kind, "saved object");

        if let Some(log) = self.ops_log.as_mut() {
            log.push(RealmOp {
                kind,
                object_id: id,
                image: Some(image),
            });
        }
        Ok(())
    }

    fn remove_deleted_object(
        &mut self,
        heap: &mut Heap,
        store: &mut dyn Store,
        oo: ObjectRef,
    ) -> Result<(), MachineError> {
        let id = heap.obj(oo)?.info.id;
        if !id.is_zero() {
            store.del_object(&id)?;
            if let Some(log) = self.ops_log.as_mut() {
                log.push(RealmOp {
                    kind: RealmOpKind::Del,
                    object_id: id,
                    image: None,
                });
            }
        }
        // Back to transient: it may still be referenced from the stack and
        // can be attached again later under a fresh id.
        let info = &mut heap.obj_mut(oo)?.info;
        info.set_object_id(ObjectId::default());
        info.set_hash(ValueHash::default());
        info.set_owner(None, ObjectId::default());
        info.set_is_deleted(false, 0);
        info.set_is_escaped(false);
        heap.forget_id(&id);
        Ok(())
    }
}

/* ===================== Helpers ===================== */

/// Bring a stored object into the heap, once per object id.
pub fn load_object(heap: &mut Heap, store: &mut dyn Store, rv: &RefValue) -> Result<ObjectRef, MachineError> {
    if let Some(r) = heap.lookup_id(&rv.object_id) {
        return Ok(r);
    }
    let mut image = store
        .get_object(&rv.object_id)?
        .ok_or(StoreError::ObjectNotFound(rv.object_id))?;
    image.info.owner = heap.lookup_id(&image.info.owner_id);
    tracing::trace!(object = %rv.object_id, kind = image.kind.name(), "loaded object");
    heap.insert_loaded(image)
}

/// Every object `oo` refers to, loading stored ones.
fn child_objects(heap: &mut Heap, store: &mut dyn Store, oo: ObjectRef) -> Result<Vec<ObjectRef>, MachineError> {
    let mut handles = Vec::new();
    {
        let obj = heap.obj_mut(oo)?;
        for tv in obj.kind.children_mut() {
            if let Some(h) = tv.handle() {
                handles.push(h.clone());
            }
        }
        for h in obj.kind.extra_handles_mut() {
            handles.push(h.clone());
        }
    }
    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        let r = match h {
            Handle::Mem(r) => r,
            Handle::Stored(rv) => load_object(heap, store, &rv)?,
        };
        if r != oo && !out.contains(&r) {
            out.push(r);
        }
    }
    Ok(out)
}

fn is_unsaved(heap: &Heap, oo: ObjectRef) -> Result<bool, MachineError> {
    let info = &heap.obj(oo)?.info;
    Ok(!info.is_real() || info.get_is_dirty() || info.get_is_new_real())
}

/// In-memory objects directly referenced by `oo` that still need saving.
fn unsaved_children(heap: &mut Heap, oo: ObjectRef) -> Result<Vec<ObjectRef>, MachineError> {
    let mut refs = Vec::new();
    {
        let obj = heap.obj_mut(oo)?;
        for tv in obj.kind.children_mut() {
            if let Some(Handle::Mem(r)) = tv.handle() {
                refs.push(*r);
            }
        }
        for h in obj.kind.extra_handles_mut() {
            if let Handle::Mem(r) = h {
                refs.push(*r);
            }
        }
    }
    let mut out = Vec::new();
    for r in refs {
        if r != oo && is_unsaved(heap, r)? && !out.contains(&r) {
            out.push(r);
        }
    }
    Ok(out)
}

fn ensure_ref(
    heap: &Heap,
    diag: &mut Diagnostics,
    parent_id: ObjectId,
    h: &Handle,
) -> Result<RefValue, MachineError> {
    let r = match h {
        Handle::Stored(rv) => return Ok(rv.clone()),
        Handle::Mem(r) => *r,
    };
    let info = &heap.obj(r)?.info;
    if !info.is_real() {
        return Err(MachineError::internal("unexpected unreal object"));
    }
    if info.get_is_dirty() {
        diag.record(format!("referencing dirty object {} while saving", info.id));
    }
    let hash = if info.ref_count > 1 && parent_id != info.owner_id {
        ValueHash::default()
    } else {
        info.hash
    };
    Ok(RefValue {
        object_id: info.id,
        hash,
    })
}

/// Image of `oo` with every object reference replaced by a stored reference,
/// suitable for hashing and persistence.
pub fn copy_with_refs(
    heap: &Heap,
    diag: &mut Diagnostics,
    oo: ObjectRef,
) -> Result<ObjectImage, MachineError> {
    let mut image = heap.obj(oo)?.clone();
    let parent_id = image.info.id;
    image.info.owner = None;
    for tv in image.kind.children_mut() {
        if let Some(h) = tv.handle_mut() {
            let rv = ensure_ref(heap, diag, parent_id, h)?;
            *h = Handle::Stored(rv);
        }
    }
    for h in image.kind.extra_handles_mut() {
        let rv = ensure_ref(heap, diag, parent_id, h)?;
        *h = Handle::Stored(rv);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ScopeId;
    use crate::heap::ObjectKind;
    use crate::ownership::MemStore;
    use crate::types::Type;
    use crate::values::{TypedValue, Value};

    const REALM: &str = "gno.land/r/demo/boards";

    struct Fixture {
        heap: Heap,
        realm: Realm,
        store: MemStore,
        diag: Diagnostics,
        root: ObjectRef,
    }

    fn fixture() -> Fixture {
        let mut heap = Heap::new(0);
        let mut realm = Realm::new(REALM);
        realm.set_log_realm_ops(true);
        let root = heap
            .alloc(ObjectKind::Block {
                scope: ScopeId::new(1, 0),
                values: vec![TypedValue::undefined(), TypedValue::int(0)],
                parent: None,
            })
            .unwrap();
        let id = realm.package_block_id();
        heap.obj_mut(root).unwrap().info.set_object_id(id);
        heap.register_id(id, root);
        Fixture {
            heap,
            realm,
            store: MemStore::new(),
            diag: Diagnostics::default(),
            root,
        }
    }

    fn object_value(r: ObjectRef) -> TypedValue {
        TypedValue::new(Type::empty_interface(), Value::Object(Handle::Mem(r)))
    }

    impl Fixture {
        fn alloc_struct(&mut self, fields: Vec<TypedValue>) -> ObjectRef {
            self.heap.alloc(ObjectKind::Struct { fields }).unwrap()
        }

        /// Store `child` into slot 0 of the root, reporting the update.
        fn attach(&mut self, child: Option<ObjectRef>) {
            let new = child.map(object_value).unwrap_or_default();
            let slot = self.heap.obj_mut(self.root).unwrap().kind.slot_mut(0).unwrap();
            let old = std::mem::replace(slot, new);
            let xo = old.handle().and_then(|h| h.as_mem());
            self.realm
                .did_update(&mut self.heap, Some(self.root), xo, child)
                .unwrap();
        }

        fn finalize(&mut self) {
            self.realm
                .finalize(&mut self.heap, &mut self.store, &mut self.diag)
                .unwrap();
        }

        fn info(&self, r: ObjectRef) -> &crate::ownership::ObjectInfo {
            &self.heap.obj(r).unwrap().info
        }
    }

    #[test]
    fn test_transient_parent_is_not_tracked() {
        let mut fx = fixture();
        let parent = fx.alloc_struct(vec![TypedValue::undefined()]);
        let child = fx.alloc_struct(vec![]);
        fx.realm
            .did_update(&mut fx.heap, Some(parent), None, Some(child))
            .unwrap();
        assert_eq!(fx.info(child).get_ref_count(), 0);
        assert!(!fx.info(child).get_is_new_real());
        assert!(!fx.realm.has_pending_marks());
    }

    #[test]
    fn test_attach_and_finalize() {
        let mut fx = fixture();
        let child = fx.alloc_struct(vec![TypedValue::int(1)]);
        fx.attach(Some(child));

        assert_eq!(fx.info(child).get_ref_count(), 1);
        assert!(fx.info(child).get_is_new_real());
        assert_eq!(fx.info(child).owner, Some(fx.root));
        assert!(fx.info(fx.root).get_is_dirty());

        fx.finalize();
        let info = fx.info(child);
        assert!(info.is_real());
        assert!(!info.get_hash().is_zero());
        assert_eq!(info.get_owner_id(), fx.realm.package_block_id());
        assert!(!info.get_is_new_real() && !info.get_is_dirty());
        assert_eq!(fx.store.num_objects(), 2);

        let child_id = info.id;
        let ops = fx.realm.sprint_realm_ops();
        assert_eq!(
            ops,
            format!("c[{}]\nu[{}]", child_id, fx.realm.package_block_id())
        );

        // The owner's image refers to the child with its hash.
        let root_image = fx.store.clone().get_object(&fx.realm.package_block_id()).unwrap().unwrap();
        match root_image.kind.slot(0).and_then(|tv| tv.handle()) {
            Some(Handle::Stored(rv)) => {
                assert_eq!(rv.object_id, child_id);
                assert_eq!(rv.hash, fx.info(child).get_hash());
            }
            other => panic!("expected stored reference, got {:?}", other),
        }
    }

    #[test]
    fn test_transient_descendants_saved_children_first() {
        let mut fx = fixture();
        let grandchild = fx.heap.alloc(ObjectKind::Array { elems: vec![TypedValue::int(5)] }).unwrap();
        let child = fx.alloc_struct(vec![object_value(grandchild)]);
        fx.attach(Some(child));
        assert_eq!(fx.info(grandchild).get_ref_count(), 0);

        fx.finalize();
        let g = fx.info(grandchild);
        assert!(g.is_real());
        assert_eq!(g.get_ref_count(), 1);
        assert_eq!(g.get_owner_id(), fx.info(child).id);

        let kinds: Vec<_> = fx.realm.realm_ops().iter().map(|op| (op.kind, op.object_id)).collect();
        assert_eq!(
            kinds,
            vec![
                (RealmOpKind::New, fx.info(grandchild).id),
                (RealmOpKind::New, fx.info(child).id),
                (RealmOpKind::Mod, fx.realm.package_block_id()),
            ]
        );
    }

    #[test]
    fn test_detached_object_is_deleted_and_not_real() {
        let mut fx = fixture();
        let child = fx.alloc_struct(vec![]);
        fx.attach(Some(child));
        fx.finalize();
        let id = fx.info(child).id;
        assert!(fx.store.has_object(&id));

        fx.realm.reset_realm_ops();
        fx.attach(None);
        assert_eq!(fx.info(child).get_ref_count(), 0);
        fx.finalize();

        assert!(!fx.info(child).is_real());
        assert!(!fx.store.has_object(&id));
        assert!(fx.heap.lookup_id(&id).is_none());
        assert!(fx.realm.sprint_realm_ops().contains(&format!("d[{}]", id)));
    }

    #[test]
    fn test_detached_subtree_is_deleted() {
        let mut fx = fixture();
        let b = fx.alloc_struct(vec![TypedValue::int(2)]);
        let a = fx.alloc_struct(vec![object_value(b)]);
        fx.attach(Some(a));
        fx.finalize();
        let (a_id, b_id) = (fx.info(a).id, fx.info(b).id);
        assert!(fx.store.has_object(&b_id));
        assert_eq!(fx.info(b).get_ref_count(), 1);

        fx.realm.reset_realm_ops();
        fx.attach(None);
        fx.finalize();

        assert!(!fx.info(a).is_real());
        assert!(!fx.info(b).is_real());
        assert_eq!(fx.info(b).get_ref_count(), 0);
        assert!(!fx.store.has_object(&a_id));
        assert!(!fx.store.has_object(&b_id));
        let ops = fx.realm.sprint_realm_ops();
        assert!(ops.contains(&format!("d[{}]", a_id)), "{ops}");
        assert!(ops.contains(&format!("d[{}]", b_id)), "{ops}");
    }

    #[test]
    fn test_deleted_parent_loads_stored_children() {
        let mut fx = fixture();
        let b = fx.alloc_struct(vec![]);
        let a = fx.alloc_struct(vec![object_value(b)]);
        fx.attach(Some(a));
        fx.finalize();
        let b_id = fx.info(b).id;

        // Only the stored reference to b remains in a.
        let image = fx.store.clone().get_object(&fx.info(a).id).unwrap().unwrap();
        fx.heap.obj_mut(a).unwrap().kind = image.kind;
        fx.heap.release(b);
        fx.heap.forget_id(&b_id);

        fx.attach(None);
        fx.finalize();
        assert!(!fx.store.has_object(&b_id));
    }

    #[test]
    fn test_shared_child_survives_deleted_parent() {
        let mut fx = fixture();
        let shared = fx.alloc_struct(vec![]);
        let a = fx.alloc_struct(vec![TypedValue::undefined()]);
        let keeper = fx.alloc_struct(vec![TypedValue::undefined()]);
        fx.attach(Some(a));
        fx.realm.did_update(&mut fx.heap, Some(fx.root), None, Some(keeper)).unwrap();
        for parent in [a, keeper] {
            *fx.heap.obj_mut(parent).unwrap().kind.slot_mut(0).unwrap() = object_value(shared);
            fx.realm.did_update(&mut fx.heap, Some(parent), None, Some(shared)).unwrap();
        }
        fx.finalize();
        assert_eq!(fx.info(shared).get_ref_count(), 2);

        fx.attach(None);
        fx.finalize();
        assert!(!fx.info(a).is_real());
        assert!(fx.info(shared).is_real());
        assert_eq!(fx.info(shared).get_ref_count(), 1);
        assert!(fx.store.has_object(&fx.info(shared).id));
    }

    #[test]
    fn test_detach_then_reattach_in_one_transaction() {
        let mut fx = fixture();
        let child = fx.alloc_struct(vec![]);
        fx.attach(Some(child));
        fx.attach(None);
        fx.attach(Some(child));
        fx.finalize();
        assert!(fx.info(child).is_real());
        assert_eq!(fx.info(child).get_ref_count(), 1);
    }

    #[test]
    fn test_modification_dirties_ancestors() {
        let mut fx = fixture();
        let child = fx.alloc_struct(vec![TypedValue::int(1)]);
        fx.attach(Some(child));
        fx.finalize();
        let root_hash = fx.info(fx.root).get_hash();

        *fx.heap.obj_mut(child).unwrap().kind.slot_mut(0).unwrap() = TypedValue::int(2);
        fx.realm.did_update(&mut fx.heap, Some(child), None, None).unwrap();
        assert!(!fx.info(fx.root).get_is_dirty());

        fx.finalize();
        assert_ne!(fx.info(fx.root).get_hash(), root_hash);
        assert!(!fx.info(fx.root).get_hash().is_zero());
    }

    #[test]
    fn test_shared_object_is_escaped() {
        let mut fx = fixture();
        let a = fx.alloc_struct(vec![TypedValue::undefined()]);
        let b = fx.alloc_struct(vec![TypedValue::undefined()]);
        let shared = fx.alloc_struct(vec![]);
        fx.attach(Some(a));
        fx.realm.did_update(&mut fx.heap, Some(a), None, Some(b)).unwrap();
        fx.realm.did_update(&mut fx.heap, Some(a), None, Some(shared)).unwrap();
        fx.realm.did_update(&mut fx.heap, Some(b), None, Some(shared)).unwrap();
        assert_eq!(fx.info(shared).get_ref_count(), 2);

        fx.finalize();
        assert!(fx.info(shared).get_is_escaped());
    }

    #[test]
    fn test_cross_realm_parent_fails() {
        let mut fx = fixture();
        let foreign = fx.alloc_struct(vec![]);
        let other = Realm::new("gno.land/r/other");
        fx.heap
            .obj_mut(foreign)
            .unwrap()
            .info
            .set_object_id(ObjectId::new(other.id, 3));
        let child = fx.alloc_struct(vec![]);
        let err = fx
            .realm
            .did_update(&mut fx.heap, Some(foreign), None, Some(child))
            .unwrap_err();
        assert!(matches!(err, MachineError::Realm(RealmError::CrossRealm { .. })));
    }

    #[test]
    fn test_realm_paths() {
        assert!(is_realm_path("gno.land/r/demo/boards"));
        assert!(!is_realm_path("gno.land/p/demo/avl"));
        assert!(!is_realm_path("main"));
    }
}
