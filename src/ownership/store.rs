//! Persistence backend
//!
//! The machine only talks to storage through `Store`: lazy loads of
//! referenced objects, saves and deletes during realm finalization, package
//! source lookups for imports, and the per-realm clock.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::ObjectId;
use crate::ast::PackageNode;
use crate::errors::StoreError;
use crate::heap::HeapObject;

/// A saved object: its metadata plus its contents, with every reference to
/// another object in stored (id + hash) form.
pub type ObjectImage = HeapObject;

/// Durable per-realm state kept outside the object graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealmRecord {
    pub path: String,
    pub time: u64,
    /// Ids of the realm's file blocks, in file order.
    #[serde(default)]
    pub file_blocks: Vec<ObjectId>,
}

pub trait Store {
    fn get_object(&mut self, id: &ObjectId) -> Result<Option<ObjectImage>, StoreError>;

    fn set_object(&mut self, image: &ObjectImage) -> Result<(), StoreError>;

    fn del_object(&mut self, id: &ObjectId) -> Result<(), StoreError>;

    fn get_package(&mut self, path: &str) -> Result<Option<PackageNode>, StoreError>;

    fn set_package(&mut self, package: &PackageNode) -> Result<(), StoreError>;

    fn get_realm(&mut self, path: &str) -> Result<Option<RealmRecord>, StoreError>;

    fn set_realm(&mut self, record: &RealmRecord) -> Result<(), StoreError>;

    /// Drop any decoded objects the store keeps in memory.
    fn clear_cache(&mut self);
}

/* ===================== In-Memory Store ===================== */

#[derive(Debug, Default)]
struct MemStoreInner {
    objects: BTreeMap<ObjectId, String>,
    packages: BTreeMap<String, String>,
    realms: BTreeMap<String, RealmRecord>,
    cache: BTreeMap<ObjectId, ObjectImage>,
    writes: usize,
    deletes: usize,
}

/// A store backed by JSON strings in memory. Clones share the same contents,
/// so several machines can run against one store in turn.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Rc<RefCell<MemStoreInner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_objects(&self) -> usize {
        self.inner.borrow().objects.len()
    }

    /// Number of object writes since creation.
    pub fn writes(&self) -> usize {
        self.inner.borrow().writes
    }

    pub fn deletes(&self) -> usize {
        self.inner.borrow().deletes
    }

    pub fn has_object(&self, id: &ObjectId) -> bool {
        self.inner.borrow().objects.contains_key(id)
    }

    /// The raw JSON saved for `id`.
    pub fn object_json(&self, id: &ObjectId) -> Option<String> {
        self.inner.borrow().objects.get(id).cloned()
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.inner.borrow().objects.keys().copied().collect()
    }
}

impl Store for MemStore {
    fn get_object(&mut self, id: &ObjectId) -> Result<Option<ObjectImage>, StoreError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(image) = inner.cache.get(id) {
            return Ok(Some(image.clone()));
        }
        let Some(json) = inner.objects.get(id) else {
            return Ok(None);
        };
        let image: ObjectImage = serde_json::from_str(json)?;
        inner.cache.insert(*id, image.clone());
        Ok(Some(image))
    }

    fn set_object(&mut self, image: &ObjectImage) -> Result<(), StoreError> {
        let id = image.info.id;
        if id.is_zero() {
            return Err(StoreError::Backend("cannot save an object without id".into()));
        }
        let json = serde_json::to_string(image)?;
        let mut inner = self.inner.borrow_mut();
        inner.objects.insert(id, json);
        inner.cache.remove(&id);
        inner.writes += 1;
        Ok(())
    }

    fn del_object(&mut self, id: &ObjectId) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        inner.cache.remove(id);
        if inner.objects.remove(id).is_some() {
            inner.deletes += 1;
        }
        Ok(())
    }

    fn get_package(&mut self, path: &str) -> Result<Option<PackageNode>, StoreError> {
        let inner = self.inner.borrow();
        match inner.packages.get(path) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn set_package(&mut self, package: &PackageNode) -> Result<(), StoreError> {
        let json = serde_json::to_string(package)?;
        self.inner
            .borrow_mut()
            .packages
            .insert(package.path.clone(), json);
        Ok(())
    }

    fn get_realm(&mut self, path: &str) -> Result<Option<RealmRecord>, StoreError> {
        Ok(self.inner.borrow().realms.get(path).cloned())
    }

    fn set_realm(&mut self, record: &RealmRecord) -> Result<(), StoreError> {
        self.inner
            .borrow_mut()
            .realms
            .insert(record.path.clone(), record.clone());
        Ok(())
    }

    fn clear_cache(&mut self) {
        self.inner.borrow_mut().cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::ObjectKind;
    use crate::ownership::{ObjectInfo, PkgId};
    use crate::values::TypedValue;

    fn image(nonce: u64) -> ObjectImage {
        let mut info = ObjectInfo::default();
        info.set_object_id(ObjectId::new(PkgId::from_path("gno.land/r/demo"), nonce));
        HeapObject {
            info,
            kind: ObjectKind::Struct {
                fields: vec![TypedValue::int(7), TypedValue::string("seven")],
            },
        }
    }

    #[test]
    fn test_object_round_trip_through_shared_clone() {
        let mut store = MemStore::new();
        let mut other = store.clone();
        let img = image(3);
        store.set_object(&img).unwrap();

        let loaded = other.get_object(&img.info.id).unwrap().unwrap();
        assert_eq!(loaded, img);
        assert_eq!(store.writes(), 1);
        assert_eq!(other.num_objects(), 1);
    }

    #[test]
    fn test_delete_and_missing() {
        let mut store = MemStore::new();
        let img = image(1);
        store.set_object(&img).unwrap();
        store.del_object(&img.info.id).unwrap();
        assert!(store.get_object(&img.info.id).unwrap().is_none());
        assert_eq!(store.deletes(), 1);
    }

    #[test]
    fn test_rejects_object_without_id() {
        let mut store = MemStore::new();
        let mut img = image(1);
        img.info.set_object_id(ObjectId::default());
        assert!(matches!(store.set_object(&img), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_realm_record() {
        let mut store = MemStore::new();
        assert!(store.get_realm("gno.land/r/demo").unwrap().is_none());
        let record = RealmRecord {
            path: "gno.land/r/demo".into(),
            time: 12,
            ..Default::default()
        };
        store.set_realm(&record).unwrap();
        assert_eq!(store.get_realm("gno.land/r/demo").unwrap(), Some(record));
    }
}
