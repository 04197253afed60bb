// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use parking_lot::RwLock;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Named handle for one key-value store inside a [`MultiStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey(&'static str);

impl StoreKey {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Contract for a backing key-value store. Mutators take `&self`:
/// implementations synchronize internally. During a batch the engine treats
/// the store as immutable and only calls `set`/`delete` from the single
/// terminal commit.
pub trait KVStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Bytes>;

    fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    fn set(&self, key: Bytes, value: Bytes);

    fn delete(&self, key: &[u8]);
}

/// In-memory reference store.
#[derive(Debug, Default)]
pub struct MemKVStore {
    data: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl MemKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the full contents, for assertions and state comparison.
    pub fn snapshot(&self) -> BTreeMap<Bytes, Bytes> {
        self.data.read().clone()
    }
}

impl FromIterator<(Bytes, Bytes)> for MemKVStore {
    fn from_iter<I: IntoIterator<Item = (Bytes, Bytes)>>(iter: I) -> Self {
        Self {
            data: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl KVStore for MemKVStore {
    fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.data.read().get(key).cloned()
    }

    fn has(&self, key: &[u8]) -> bool {
        self.data.read().contains_key(key)
    }

    fn set(&self, key: Bytes, value: Bytes) {
        self.data.write().insert(key, value);
    }

    fn delete(&self, key: &[u8]) {
        self.data.write().remove(key);
    }
}

/// Ordered collection of the parent stores a batch executes over, one per
/// store key. Must not change shape while a batch is in flight.
#[derive(Debug, Default)]
pub struct MultiStore<S> {
    stores: BTreeMap<StoreKey, Arc<S>>,
}

impl<S: KVStore> MultiStore<S> {
    pub fn new() -> Self {
        Self {
            stores: BTreeMap::new(),
        }
    }

    pub fn with_store(mut self, store_key: StoreKey, store: Arc<S>) -> Self {
        self.stores.insert(store_key, store);
        self
    }

    pub fn store_keys(&self) -> impl Iterator<Item = StoreKey> + '_ {
        self.stores.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StoreKey, &Arc<S>)> {
        self.stores.iter()
    }

    /// Panics if no store is registered under the key; store keys are static
    /// configuration and an unknown one is a programming error.
    pub fn kv_store(&self, store_key: &StoreKey) -> &Arc<S> {
        self.stores
            .get(store_key)
            .unwrap_or_else(|| panic!("no store registered for key {}", store_key))
    }
}
