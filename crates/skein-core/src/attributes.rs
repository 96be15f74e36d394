//! Session-scoped attribute store.
//!
//! Keys and values are type-erased: any `Hash + Eq` type can be a key, and
//! two keys only match if they have the same type and compare equal. Values
//! are stored behind `Arc` and recovered by downcasting.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Stored attribute value.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

trait DynKey: Any + Send + Sync {
    fn eq_dyn(&self, other: &dyn DynKey) -> bool;
    fn hash_dyn(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<K: Hash + Eq + Any + Send + Sync> DynKey for K {
    fn eq_dyn(&self, other: &dyn DynKey) -> bool {
        other.as_any().downcast_ref::<K>().is_some_and(|other| other == self)
    }

    fn hash_dyn(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<K>().hash(&mut state);
        self.hash(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PartialEq for dyn DynKey {
    fn eq(&self, other: &Self) -> bool {
        self.eq_dyn(other)
    }
}

impl Eq for dyn DynKey {}

impl Hash for dyn DynKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_dyn(state);
    }
}

/// Key/value map with arbitrary key and value types.
///
/// Not synchronized; the owning session guards it with its lock.
#[derive(Default)]
pub struct AttributeStore {
    entries: HashMap<Box<dyn DynKey>, AttributeValue>,
}

impl AttributeStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`, if present and of type `V`.
    pub fn get<K, V>(&self, key: &K) -> Option<Arc<V>>
    where
        K: Hash + Eq + Any + Send + Sync,
        V: Any + Send + Sync,
    {
        let value = self.entries.get(key as &dyn DynKey)?;
        Arc::clone(value).downcast::<V>().ok()
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set<K, V>(&mut self, key: K, value: V) -> Option<AttributeValue>
    where
        K: Hash + Eq + Any + Send + Sync,
        V: Any + Send + Sync,
    {
        let key: Box<dyn DynKey> = Box::new(key);
        self.entries.insert(key, Arc::new(value))
    }

    /// Remove `key`, returning its value.
    pub fn remove<K>(&mut self, key: &K) -> Option<AttributeValue>
    where
        K: Hash + Eq + Any + Send + Sync,
    {
        self.entries.remove(key as &dyn DynKey)
    }

    /// Returns true if `key` is present.
    pub fn contains<K>(&self, key: &K) -> bool
    where
        K: Hash + Eq + Any + Send + Sync,
    {
        self.entries.contains_key(key as &dyn DynKey)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeStore").field("len", &self.entries.len()).finish()
    }
}
