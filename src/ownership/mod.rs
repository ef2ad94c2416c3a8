//! Ownership and persistence metadata
//!
//! Every heap object carries an `ObjectInfo`: its durable identity (zero
//! until the object is saved), content hash, owner, ref-count, and the
//! transaction marks a `Realm` uses to decide what to persist.

mod realm;
mod store;

pub use realm::{copy_with_refs, is_realm_path, load_object, Realm, RealmOp, RealmOpKind};
pub use store::{MemStore, ObjectImage, RealmRecord, Store};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::errors::ObjectIdError;
use crate::heap::ObjectRef;

/// Size of package ids and object hashes, in bytes.
pub const HASH_SIZE: usize = 20;

/* ===================== Hashlets ===================== */

macro_rules! hashlet {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; HASH_SIZE]);

        impl $name {
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; HASH_SIZE]
            }

            /// First `HASH_SIZE` bytes of the SHA-256 digest of `data`.
            pub fn digest(data: &[u8]) -> Self {
                let full = Sha256::digest(data);
                let mut out = [0u8; HASH_SIZE];
                out.copy_from_slice(&full[..HASH_SIZE]);
                $name(out)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = ObjectIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s)?;
                let arr: [u8; HASH_SIZE] = bytes
                    .try_into()
                    .map_err(|_| ObjectIdError::Malformed(s.to_string()))?;
                Ok($name(arr))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hashlet!(
    /// Identity of a package (and its realm): digest of the package path.
    PkgId
);

hashlet!(
    /// Content hash of a saved object.
    ValueHash
);

impl PkgId {
    pub fn from_path(path: &str) -> Self {
        PkgId::digest(path.as_bytes())
    }
}

/* ===================== Object IDs ===================== */

/// Durable object identity: owning package plus a per-realm creation nonce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub pkg_id: PkgId,
    pub new_time: u64,
}

impl ObjectId {
    pub fn new(pkg_id: PkgId, new_time: u64) -> Self {
        ObjectId { pkg_id, new_time }
    }

    pub fn is_zero(&self) -> bool {
        self.pkg_id.is_zero() && self.new_time == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pkg_id, self.new_time)
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pkg, nonce) = s
            .split_once(':')
            .ok_or_else(|| ObjectIdError::Malformed(s.to_string()))?;
        Ok(ObjectId {
            pkg_id: pkg.parse()?,
            new_time: nonce.parse()?,
        })
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/* ===================== Object Info ===================== */

/// Persistence metadata of one object. Only the first block of fields is
/// saved; the marks are per-transaction and reset after finalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: ObjectId,
    #[serde(default)]
    pub hash: ValueHash,
    #[serde(default)]
    pub owner_id: ObjectId,
    #[serde(default)]
    pub mod_time: u64,
    #[serde(default)]
    pub ref_count: i64,
    #[serde(default)]
    pub is_escaped: bool,

    #[serde(skip)]
    is_dirty: bool,
    #[serde(skip)]
    is_deleted: bool,
    #[serde(skip)]
    is_new_real: bool,
    #[serde(skip)]
    is_new_escaped: bool,
    #[serde(skip)]
    is_new_deleted: bool,
    /// In-memory owner; not persisted (the owner id is).
    #[serde(skip)]
    pub owner: Option<ObjectRef>,
}

impl ObjectInfo {
    pub fn get_object_id(&self) -> ObjectId {
        self.id
    }

    /// The durable id of a saved object.
    ///
    /// # Panics
    /// When the object has not been assigned an id yet; asking for it before
    /// finalization is an ordering bug.
    pub fn must_get_object_id(&self) -> ObjectId {
        if self.id.is_zero() {
            panic!("object has no id yet; it is not real");
        }
        self.id
    }

    pub fn set_object_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    pub fn is_real(&self) -> bool {
        !self.id.is_zero()
    }

    pub fn get_hash(&self) -> ValueHash {
        self.hash
    }

    pub fn set_hash(&mut self, hash: ValueHash) {
        self.hash = hash;
    }

    pub fn get_owner_id(&self) -> ObjectId {
        self.owner_id
    }

    /// Persisted ownership: the owner id is known.
    pub fn is_owned(&self) -> bool {
        !self.owner_id.is_zero()
    }

    /// Owned in memory, possibly by an object that has no id yet.
    pub fn has_owner(&self) -> bool {
        self.owner.is_some() || self.is_owned()
    }

    pub fn set_owner(&mut self, owner: Option<ObjectRef>, owner_id: ObjectId) {
        self.owner = owner;
        self.owner_id = owner_id;
    }

    pub fn get_ref_count(&self) -> i64 {
        self.ref_count
    }

    pub fn inc_ref_count(&mut self) -> i64 {
        self.ref_count += 1;
        self.ref_count
    }

    /// Decrement, returning the new count. A negative count is only
    /// tolerated for objects that are not real yet.
    pub fn dec_ref_count(&mut self) -> i64 {
        self.ref_count -= 1;
        if self.ref_count < 0 && self.is_real() {
            panic!("negative ref-count on real object {}", self.id);
        }
        self.ref_count
    }

    pub fn get_is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Marking dirty invalidates the hash and records the modification time.
    pub fn set_is_dirty(&mut self, dirty: bool, mod_time: u64) {
        if dirty {
            self.hash = ValueHash::default();
            self.mod_time = mod_time;
        }
        self.is_dirty = dirty;
    }

    pub fn get_is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn set_is_deleted(&mut self, deleted: bool, mod_time: u64) {
        if deleted {
            self.mod_time = mod_time;
        }
        self.is_deleted = deleted;
    }

    pub fn get_is_new_real(&self) -> bool {
        self.is_new_real
    }

    pub fn set_is_new_real(&mut self, new_real: bool) {
        self.is_new_real = new_real;
    }

    pub fn get_is_escaped(&self) -> bool {
        self.is_escaped
    }

    pub fn set_is_escaped(&mut self, escaped: bool) {
        self.is_escaped = escaped;
    }

    pub fn get_is_new_escaped(&self) -> bool {
        self.is_new_escaped
    }

    pub fn set_is_new_escaped(&mut self, new_escaped: bool) {
        self.is_new_escaped = new_escaped;
    }

    pub fn get_is_new_deleted(&self) -> bool {
        self.is_new_deleted
    }

    pub fn set_is_new_deleted(&mut self, new_deleted: bool) {
        self.is_new_deleted = new_deleted;
    }

    /// Neither saved nor scheduled to be.
    pub fn is_transient(&self) -> bool {
        !self.is_real() && !self.is_new_real
    }

    /// Clear the per-transaction marks.
    pub fn clear_marks(&mut self) {
        self.is_dirty = false;
        self.is_new_real = false;
        self.is_new_escaped = false;
        self.is_new_deleted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_object_is_not_real() {
        let info = ObjectInfo::default();
        assert!(info.get_object_id().is_zero());
        assert!(!info.is_real());
        assert!(info.get_owner_id().is_zero());
        assert!(!info.is_owned());
        assert!(info.is_transient());
    }

    #[test]
    fn test_owner_without_id_is_not_owned() {
        let mut info = ObjectInfo::default();
        let mut heap = crate::heap::Heap::new(0);
        let owner = heap
            .alloc(crate::heap::ObjectKind::Struct { fields: vec![] })
            .unwrap();
        info.set_owner(Some(owner), ObjectId::default());
        assert!(info.has_owner());
        assert!(!info.is_owned());

        info.set_owner(Some(owner), ObjectId::new(PkgId::from_path("p"), 3));
        assert!(info.has_owner());
        assert!(info.is_owned());
    }

    #[test]
    #[should_panic(expected = "not real")]
    fn test_must_get_object_id_panics_before_save() {
        ObjectInfo::default().must_get_object_id();
    }

    #[test]
    fn test_set_dirty_clears_hash() {
        let mut info = ObjectInfo::default();
        info.set_hash(ValueHash::digest(b"content"));
        assert!(!info.get_hash().is_zero());

        info.set_is_dirty(true, 9);
        assert!(info.get_hash().is_zero());
        assert_eq!(info.mod_time, 9);
        assert!(info.get_is_dirty());

        info.set_hash(ValueHash::digest(b"again"));
        info.set_is_dirty(false, 10);
        assert!(!info.get_hash().is_zero());
        assert_eq!(info.mod_time, 9);
    }

    #[test]
    fn test_object_id_text_round_trip() {
        let id = ObjectId::new(PkgId::from_path("gno.land/r/demo/counter"), 42);
        let text = id.to_string();
        assert!(text.ends_with(":42"));
        assert_eq!(text.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_malformed_object_id() {
        assert!(matches!("nocolon".parse::<ObjectId>(), Err(ObjectIdError::Malformed(_))));
        assert!(matches!("zz:1".parse::<ObjectId>(), Err(ObjectIdError::Hex(_))));
        assert!(matches!("abcd:1".parse::<ObjectId>(), Err(ObjectIdError::Malformed(_))));
        let pkg = PkgId::from_path("p");
        assert!(matches!(format!("{}:x", pkg).parse::<ObjectId>(), Err(ObjectIdError::Nonce(_))));
    }

    #[test]
    #[should_panic(expected = "negative ref-count")]
    fn test_negative_ref_count_on_real_object() {
        let mut info = ObjectInfo::default();
        info.set_object_id(ObjectId::new(PkgId::from_path("p"), 1));
        info.dec_ref_count();
    }

    #[test]
    fn test_negative_ref_count_tolerated_while_transient() {
        let mut info = ObjectInfo::default();
        assert_eq!(info.dec_ref_count(), -1);
    }
}
