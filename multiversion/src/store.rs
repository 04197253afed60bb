// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    counters,
    version_indexed::VersionIndexedStore,
    versioned_value::{ValueEntry, VersionedValue},
};
use bytes::Bytes;
use occ_types::{AbortSignal, Incarnation, KVStore, ReadSet, TxnIndex, WriteSet};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use tracing::debug;

/// Per-store-key multi-version state for one batch. One exclusive lock
/// guards the versioned map together with the per-index writeset key lists
/// and readsets; readers take it shared. The parent store is read-only for
/// the duration of the batch and receives the winning values exactly once,
/// in [`MultiVersionStore::write_latest_to_store`].
pub struct MultiVersionStore<S> {
    inner: RwLock<Inner>,
    parent: Arc<S>,
}

#[derive(Default)]
struct Inner {
    multi_version_map: BTreeMap<Bytes, VersionedValue>,
    // Keys last written by each index, sorted. Retained after invalidation so
    // a replacement writeset can remove the stale entries.
    tx_writeset_keys: HashMap<TxnIndex, Vec<Bytes>>,
    tx_read_sets: HashMap<TxnIndex, ReadSet>,
}

impl Inner {
    fn latest_before(&self, index: TxnIndex, key: &[u8]) -> Option<(TxnIndex, &ValueEntry)> {
        self.multi_version_map.get(key)?.latest_before(index)
    }

    /// Removes the entries of the previous writeset for `index`, leaving in
    /// place keys the new writeset is about to overwrite anyway (saves the
    /// remove-and-reinsert on the underlying ordered map).
    fn remove_old_writeset(&mut self, index: TxnIndex, new_writeset: &WriteSet) {
        if let Some(keys) = self.tx_writeset_keys.remove(&index) {
            for key in keys {
                if new_writeset.contains_key(&key) {
                    continue;
                }
                if let Some(value) = self.multi_version_map.get_mut(&key) {
                    value.remove(index);
                }
            }
        }
    }
}

impl<S: KVStore> MultiVersionStore<S> {
    pub fn new(parent: Arc<S>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            parent,
        }
    }

    /// Builds a per-incarnation view over this store for the given
    /// transaction, wired to the task's shared abort signal.
    pub fn version_indexed_store(
        self: &Arc<Self>,
        tx_index: TxnIndex,
        incarnation: Incarnation,
        abort_signal: Arc<AbortSignal>,
    ) -> VersionIndexedStore<S> {
        VersionIndexedStore::new(
            Arc::clone(&self.parent),
            Arc::clone(self),
            tx_index,
            incarnation,
            abort_signal,
        )
    }

    /// Entry at the greatest index for `key`, without consulting the parent.
    pub fn get_latest(&self, key: &[u8]) -> Option<(TxnIndex, ValueEntry)> {
        let inner = self.inner.read();
        inner
            .multi_version_map
            .get(key)?
            .latest()
            .map(|(index, entry)| (index, entry.clone()))
    }

    /// Entry at the greatest index strictly less than `index` for `key`. The
    /// returned entry may be an estimate or a delete; it is a definitive
    /// statement about the key either way.
    pub fn get_latest_before_index(
        &self,
        index: TxnIndex,
        key: &[u8],
    ) -> Option<(TxnIndex, ValueEntry)> {
        let inner = self.inner.read();
        inner
            .latest_before(index, key)
            .map(|(index, entry)| (index, entry.clone()))
    }

    /// Whether some entry exists strictly before `index`. Deleted entries
    /// count as present; a miss here means the caller must consult the
    /// parent store.
    pub fn has(&self, index: TxnIndex, key: &[u8]) -> bool {
        self.inner.read().latest_before(index, key).is_some()
    }

    /// Publishes the writeset of `(index, incarnation)`, replacing whatever
    /// writeset the index had before: stale keys are removed, surviving keys
    /// overwritten, and the sorted key list recorded for the next
    /// replacement or invalidation.
    pub fn set_writeset(&self, index: TxnIndex, incarnation: Incarnation, writeset: WriteSet) {
        let mut inner = self.inner.write();
        inner.remove_old_writeset(index, &writeset);

        let writeset_keys: Vec<Bytes> = writeset.keys().cloned().collect();
        for (key, value) in writeset {
            let versioned = inner.multi_version_map.entry(key).or_default();
            match value {
                Some(value) => versioned.set(index, incarnation, value),
                None => versioned.delete(index, incarnation),
            }
        }
        inner.tx_writeset_keys.insert(index, writeset_keys);
    }

    /// Replaces every entry of the recorded writeset for `index` with an
    /// estimate, so readers of those keys abort until a re-execution
    /// publishes definitive values. The key list is retained.
    pub fn invalidate_writeset(&self, index: TxnIndex, incarnation: Incarnation) {
        let mut inner = self.inner.write();
        let Inner {
            multi_version_map,
            tx_writeset_keys,
            ..
        } = &mut *inner;
        if let Some(keys) = tx_writeset_keys.get(&index) {
            debug!(index, incarnation, keys = keys.len(), "invalidating writeset");
            for key in keys {
                multi_version_map
                    .entry(key.clone())
                    .or_default()
                    .set_estimate(index, incarnation);
            }
        }
    }

    /// Directly seeds estimates for `index` instead of publishing values and
    /// invalidating afterwards. Used for externally supplied prefill
    /// writesets; the key list is recorded so the first real writeset
    /// replaces these entries.
    pub fn set_estimated_writeset(
        &self,
        index: TxnIndex,
        incarnation: Incarnation,
        writeset: WriteSet,
    ) {
        let mut inner = self.inner.write();
        inner.remove_old_writeset(index, &writeset);

        let writeset_keys: Vec<Bytes> = writeset.keys().cloned().collect();
        for key in writeset.into_keys() {
            inner
                .multi_version_map
                .entry(key)
                .or_default()
                .set_estimate(index, incarnation);
        }
        inner.tx_writeset_keys.insert(index, writeset_keys);
    }

    /// The sorted key list last recorded for `index`, if any.
    pub fn writeset_keys(&self, index: TxnIndex) -> Option<Vec<Bytes>> {
        self.inner.read().tx_writeset_keys.get(&index).cloned()
    }

    pub fn set_readset(&self, index: TxnIndex, readset: ReadSet) {
        self.inner.write().tx_read_sets.insert(index, readset);
    }

    pub fn get_readset(&self, index: TxnIndex) -> Option<ReadSet> {
        self.inner.read().tx_read_sets.get(&index).cloned()
    }

    /// Re-checks the recorded readset of `index` against the current
    /// multi-version state and returns the indices whose entries conflict,
    /// in ascending order. An empty result means the transaction's reads are
    /// still what a serial execution would have observed.
    ///
    /// Panics if an observed value disagrees with the parent store for a key
    /// that has no entry before `index`: the parent must not change within a
    /// batch, so such a mismatch is a programming error.
    pub fn validate_transaction_state(&self, index: TxnIndex) -> Vec<TxnIndex> {
        let _timer = counters::VALIDATION_SECONDS.start_timer();

        let inner = self.inner.read();
        let mut conflict_set = BTreeSet::new();

        if let Some(readset) = inner.tx_read_sets.get(&index) {
            for (key, observed) in readset {
                match inner.latest_before(index, key) {
                    None => {
                        let parent_value = self.parent.get(key);
                        assert!(
                            parent_value == *observed,
                            "readset conflict with parent store at key {:?}; \
                             the parent store must not change during a batch",
                            key
                        );
                    },
                    Some((entry_index, entry)) => match entry {
                        ValueEntry::Estimate { .. } => {
                            conflict_set.insert(entry_index);
                        },
                        ValueEntry::Deleted { .. } => {
                            if observed.is_some() {
                                conflict_set.insert(entry_index);
                            }
                        },
                        ValueEntry::Written { value, .. } => {
                            if observed.as_ref() != Some(value) {
                                conflict_set.insert(entry_index);
                            }
                        },
                    },
                }
            }
        }

        conflict_set.into_iter().collect()
    }

    /// Flushes the winning value of every key to the parent store: the
    /// latest non-estimate entry wins, tombstones delete, and keys whose
    /// entries were all removed are skipped. Called exactly once per batch,
    /// after every transaction has validated.
    pub fn write_latest_to_store(&self) {
        let inner = self.inner.write();
        for (key, versioned) in inner.multi_version_map.iter() {
            let Some((_, entry)) = versioned.latest_non_estimate() else {
                // Only estimates (or nothing) left for this key; an earlier
                // writeset replacement removed the definitive entries.
                continue;
            };
            match entry {
                ValueEntry::Estimate { .. } => {
                    unreachable!("should not have any estimate values when writing to parent store")
                },
                ValueEntry::Deleted { .. } => self.parent.delete(key),
                ValueEntry::Written { value, .. } => self.parent.set(key.clone(), value.clone()),
            }
        }
    }
}
