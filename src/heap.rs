//! Object arena
//!
//! Every composite runtime value (array, struct, map, lexical block, bound
//! method, heap item) lives here and is addressed by a generational
//! `ObjectRef`. Parent and owner links are arena lookups, so cycles in the
//! object graph never become ownership cycles in Rust.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::ScopeId;
use crate::errors::MachineError;
use crate::ownership::{ObjectId, ObjectInfo};
use crate::values::{FuncValue, Handle, MapKey, TypedValue, Value};

/* ===================== References ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

/* ===================== Objects ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub hk: MapKey,
    pub key: TypedValue,
    pub value: TypedValue,
}

/// Insertion-ordered map storage; iteration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<MapEntry>", into = "Vec<MapEntry>")]
pub struct MapData {
    entries: IndexMap<MapKey, (TypedValue, TypedValue)>,
}

impl From<Vec<MapEntry>> for MapData {
    fn from(list: Vec<MapEntry>) -> Self {
        MapData {
            entries: list
                .into_iter()
                .map(|e| (e.hk, (e.key, e.value)))
                .collect(),
        }
    }
}

impl From<MapData> for Vec<MapEntry> {
    fn from(map: MapData) -> Self {
        map.entries
            .into_iter()
            .map(|(hk, (key, value))| MapEntry { hk, key, value })
            .collect()
    }
}

impl MapData {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hk: &MapKey) -> Option<&TypedValue> {
        self.entries.get(hk).map(|(_, v)| v)
    }

    /// Insert or overwrite; returns the previous value.
    pub fn insert(&mut self, hk: MapKey, key: TypedValue, value: TypedValue) -> Option<TypedValue> {
        self.entries.insert(hk, (key, value)).map(|(_, old)| old)
    }

    /// Remove keeping the order of the remaining entries.
    pub fn remove(&mut self, hk: &MapKey) -> Option<(TypedValue, TypedValue)> {
        self.entries.shift_remove(hk)
    }

    pub fn entry_at(&self, i: usize) -> Option<(&TypedValue, &TypedValue)> {
        self.entries.get_index(i).map(|(_, (k, v))| (k, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &TypedValue> {
        self.entries.values().flat_map(|(k, v)| [k, v])
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut TypedValue> {
        self.entries.values_mut().flat_map(|(k, v)| [k, v])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ObjectKind {
    Array {
        elems: Vec<TypedValue>,
    },
    Struct {
        fields: Vec<TypedValue>,
    },
    Map {
        map: MapData,
    },
    Block {
        scope: ScopeId,
        values: Vec<TypedValue>,
        #[serde(default)]
        parent: Option<Handle>,
    },
    BoundMethod {
        func: Arc<FuncValue>,
        receiver: TypedValue,
    },
    /// A single boxed value, the target of `&x` on a non-slot value.
    HeapItem {
        value: TypedValue,
    },
}

impl ObjectKind {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Array { .. } => "array",
            ObjectKind::Struct { .. } => "struct",
            ObjectKind::Map { .. } => "map",
            ObjectKind::Block { .. } => "block",
            ObjectKind::BoundMethod { .. } => "bound method",
            ObjectKind::HeapItem { .. } => "heap item",
        }
    }

    /// Addressable slot `i` (element, field, variable or the heap item).
    pub fn slot(&self, i: usize) -> Option<&TypedValue> {
        match self {
            ObjectKind::Array { elems } => elems.get(i),
            ObjectKind::Struct { fields } => fields.get(i),
            ObjectKind::Block { values, .. } => values.get(i),
            ObjectKind::HeapItem { value } if i == 0 => Some(value),
            _ => None,
        }
    }

    pub fn slot_mut(&mut self, i: usize) -> Option<&mut TypedValue> {
        match self {
            ObjectKind::Array { elems } => elems.get_mut(i),
            ObjectKind::Struct { fields } => fields.get_mut(i),
            ObjectKind::Block { values, .. } => values.get_mut(i),
            ObjectKind::HeapItem { value } if i == 0 => Some(value),
            _ => None,
        }
    }

    /// Every value held directly by this object.
    pub fn children(&self) -> Vec<&TypedValue> {
        match self {
            ObjectKind::Array { elems } => elems.iter().collect(),
            ObjectKind::Struct { fields } => fields.iter().collect(),
            ObjectKind::Map { map } => map.values().collect(),
            ObjectKind::Block { values, .. } => values.iter().collect(),
            ObjectKind::BoundMethod { receiver, .. } => vec![receiver],
            ObjectKind::HeapItem { value } => vec![value],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut TypedValue> {
        match self {
            ObjectKind::Array { elems } => elems.iter_mut().collect(),
            ObjectKind::Struct { fields } => fields.iter_mut().collect(),
            ObjectKind::Map { map } => map.values_mut().collect(),
            ObjectKind::Block { values, .. } => values.iter_mut().collect(),
            ObjectKind::BoundMethod { receiver, .. } => vec![receiver],
            ObjectKind::HeapItem { value } => vec![value],
        }
    }

    /// Handles to other objects that are not stored in a value slot.
    pub fn extra_handles_mut(&mut self) -> Vec<&mut Handle> {
        match self {
            ObjectKind::Block {
                parent: Some(parent),
                ..
            } => vec![parent],
            ObjectKind::BoundMethod { func, .. } => Arc::make_mut(func).closure.as_mut().into_iter().collect(),
            _ => vec![],
        }
    }

    fn estimate_size(&self) -> usize {
        let strings: usize = self
            .children()
            .iter()
            .map(|tv| match &tv.v {
                Value::String(s) => s.len(),
                _ => 0,
            })
            .sum();
        OBJECT_SIZE + SLOT_SIZE * self.children().len() + strings
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeapObject {
    pub info: ObjectInfo,
    pub kind: ObjectKind,
}

/* ===================== Arena ===================== */

/// Estimated bytes per object header and per child slot.
const OBJECT_SIZE: usize = 64;
const SLOT_SIZE: usize = 40;

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    /// Bytes charged for the current occupant; refunded on release.
    size: usize,
    object: Option<HeapObject>,
}

#[derive(Debug, Clone, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: BTreeMap<ObjectId, ObjectRef>,
    allocated: usize,
    max_alloc: usize,
}

impl Heap {
    /// A heap with an allocation ceiling in bytes; zero means unlimited.
    pub fn new(max_alloc: usize) -> Self {
        Heap {
            max_alloc,
            ..Default::default()
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn charge(&mut self, size: usize) -> Result<(), MachineError> {
        self.allocated += size;
        if self.max_alloc > 0 && self.allocated > self.max_alloc {
            return Err(MachineError::AllocLimitExceeded {
                allocated: self.allocated,
                limit: self.max_alloc,
            });
        }
        Ok(())
    }

    /// Account for growth of an existing object (e.g. map inserts).
    pub fn charge_growth(&mut self, slots: usize) -> Result<(), MachineError> {
        self.charge(SLOT_SIZE * slots)
    }

    /// Check that an object of `slots` children would fit under the ceiling
    /// before any memory is set aside for it. Nothing is charged here.
    pub fn reserve(&self, slots: usize) -> Result<(), MachineError> {
        let allocated = SLOT_SIZE
            .saturating_mul(slots)
            .saturating_add(OBJECT_SIZE)
            .saturating_add(self.allocated);
        if self.max_alloc > 0 && allocated > self.max_alloc {
            return Err(MachineError::AllocLimitExceeded {
                allocated,
                limit: self.max_alloc,
            });
        }
        Ok(())
    }

    fn insert(&mut self, object: HeapObject, size: usize) -> ObjectRef {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation += 1;
                slot.size = size;
                slot.object = Some(object);
                ObjectRef {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    size,
                    object: Some(object),
                });
                ObjectRef {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Allocate a fresh transient object.
    pub fn alloc(&mut self, kind: ObjectKind) -> Result<ObjectRef, MachineError> {
        let size = kind.estimate_size();
        self.charge(size)?;
        Ok(self.insert(
            HeapObject {
                info: ObjectInfo::default(),
                kind,
            },
            size,
        ))
    }

    /// Insert an object loaded from the store and remember its identity.
    pub fn insert_loaded(&mut self, object: HeapObject) -> Result<ObjectRef, MachineError> {
        let size = object.kind.estimate_size();
        self.charge(size)?;
        let id = object.info.id;
        let r = self.insert(object, size);
        if !id.is_zero() {
            self.by_id.insert(id, r);
        }
        Ok(r)
    }

    pub fn get(&self, r: ObjectRef) -> Option<&HeapObject> {
        self.slots
            .get(r.index as usize)
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.object.as_ref())
    }

    pub fn get_mut(&mut self, r: ObjectRef) -> Option<&mut HeapObject> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.object.as_mut())
    }

    pub fn obj(&self, r: ObjectRef) -> Result<&HeapObject, MachineError> {
        self.get(r)
            .ok_or_else(|| MachineError::internal(format!("dangling object reference {:?}", r)))
    }

    pub fn obj_mut(&mut self, r: ObjectRef) -> Result<&mut HeapObject, MachineError> {
        self.get_mut(r)
            .ok_or_else(|| MachineError::internal(format!("dangling object reference {:?}", r)))
    }

    /// Drop an object; later lookups through stale references fail.
    pub fn release(&mut self, r: ObjectRef) -> Option<HeapObject> {
        let slot = self.slots.get_mut(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        let object = slot.object.take()?;
        self.allocated = self.allocated.saturating_sub(slot.size);
        slot.size = 0;
        self.free.push(r.index);
        if !object.info.id.is_zero() {
            self.by_id.remove(&object.info.id);
        }
        Some(object)
    }

    pub fn register_id(&mut self, id: ObjectId, r: ObjectRef) {
        self.by_id.insert(id, r);
    }

    pub fn lookup_id(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.by_id.get(id).copied()
    }

    pub fn forget_id(&mut self, id: &ObjectId) {
        self.by_id.remove(id);
    }

    /// Forget identity mappings (after the store cache is cleared).
    pub fn clear_ids(&mut self) {
        self.by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(i: i64) -> ObjectKind {
        ObjectKind::HeapItem {
            value: TypedValue::int(i),
        }
    }

    #[test]
    fn test_stale_reference_after_release() {
        let mut heap = Heap::new(0);
        let a = heap.alloc(item(1)).unwrap();
        assert!(heap.release(a).is_some());

        assert_eq!(heap.allocated(), 0);
        let b = heap.alloc(item(2)).unwrap();
        assert!(heap.get(a).is_none());
        assert!(heap.obj(a).is_err());
        assert_eq!(heap.obj(b).unwrap().kind.slot(0), Some(&TypedValue::int(2)));
    }

    #[test]
    fn test_alloc_limit() {
        let mut heap = Heap::new(200);
        assert!(heap.alloc(item(1)).is_ok());
        let err = loop {
            if let Err(e) = heap.alloc(item(1)) {
                break e;
            }
        };
        assert!(matches!(err, MachineError::AllocLimitExceeded { limit: 200, .. }));
    }

    #[test]
    fn test_map_keeps_insertion_order() {
        let mut map = MapData::default();
        for (i, k) in ["b", "a", "c"].iter().enumerate() {
            map.insert(MapKey::String(k.to_string()), TypedValue::string(*k), TypedValue::int(i as i64));
        }
        map.remove(&MapKey::String("a".into()));
        let keys: Vec<_> = (0..map.len())
            .filter_map(|i| map.entry_at(i))
            .map(|(k, _)| k.as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["b", "c"]);

        let json = serde_json::to_string(&map).unwrap();
        let back: MapData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
