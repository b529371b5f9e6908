use std::{
    collections::HashMap,
    hash::Hash,
    sync::RwLock,
};

use crate::{error::TreeError, utils::HandyRwLock};

pub type TreeResult<T = ()> = Result<T, TreeError>;

/// A `HashMap` behind a `RwLock`, shared between threads without
/// wrapping every call site in lock/unlock pairs.
pub struct ConcurrentHashMap<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ConcurrentHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Return the value of `key`, inserting the value produced by
    /// `init` first if the key is absent.
    pub fn get_or_insert_with<F>(&self, key: &K, init: F) -> V
    where
        F: FnOnce(&K) -> V,
    {
        if let Some(v) = self.map.rl().get(key) {
            return v.clone();
        }

        self.map
            .wl()
            .entry(key.clone())
            .or_insert_with(|| init(key))
            .clone()
    }

    /// Remove `key` only if `predicate` holds for the current value.
    pub fn remove_if<F>(&self, key: &K, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let mut map = self.map.wl();
        match map.get(key) {
            Some(v) if predicate(v) => map.remove(key),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.map.rl().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.rl().is_empty()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for ConcurrentHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
