// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{store::MultiVersionStore, versioned_value::ValueEntry};
use bytes::Bytes;
use occ_types::{Abort, AbortSignal, Incarnation, KVStore, ReadSet, TxnIndex, WriteSet};
use std::{cell::RefCell, sync::Arc};
use tracing::trace;

/// A single incarnation's view over one store key: reads resolve through the
/// transaction's own staged writes, then the multi-version state strictly
/// before its index, then the parent store; writes stage locally until
/// [`VersionIndexedStore::write_to_multi_version_store`] publishes them.
///
/// A view belongs to exactly one worker at a time and never outlives its
/// incarnation, so the read/write buffers live in `RefCell`s rather than
/// behind locks.
pub struct VersionIndexedStore<S> {
    parent: Arc<S>,
    multi_version_store: Arc<MultiVersionStore<S>>,
    tx_index: TxnIndex,
    incarnation: Incarnation,
    abort_signal: Arc<AbortSignal>,
    writeset: RefCell<WriteSet>,
    readset: RefCell<ReadSet>,
}

impl<S: KVStore> VersionIndexedStore<S> {
    pub(crate) fn new(
        parent: Arc<S>,
        multi_version_store: Arc<MultiVersionStore<S>>,
        tx_index: TxnIndex,
        incarnation: Incarnation,
        abort_signal: Arc<AbortSignal>,
    ) -> Self {
        Self {
            parent,
            multi_version_store,
            tx_index,
            incarnation,
            abort_signal,
            writeset: RefCell::new(WriteSet::new()),
            readset: RefCell::new(ReadSet::new()),
        }
    }

    pub fn tx_index(&self) -> TxnIndex {
        self.tx_index
    }

    pub fn incarnation(&self) -> Incarnation {
        self.incarnation
    }

    /// Layered lookup. Values observed from the multi-version state or the
    /// parent are recorded in the readset (absence included), and re-reads
    /// within this incarnation are served from the readset so the
    /// transaction observes a stable snapshot.
    ///
    /// Observing an estimate signals an abort carrying the blocking index
    /// and falls back to the parent's value as a best-effort read; the
    /// transaction will be aborted regardless, so nothing is recorded.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        if let Some(staged) = self.writeset.borrow().get(key) {
            return staged.clone();
        }
        if let Some(observed) = self.readset.borrow().get(key) {
            return observed.clone();
        }

        match self
            .multi_version_store
            .get_latest_before_index(self.tx_index, key)
        {
            Some((entry_index, ValueEntry::Estimate { .. })) => {
                trace!(
                    tx_index = self.tx_index,
                    dependent = entry_index,
                    "read observed an estimate; aborting"
                );
                self.abort_signal.signal(Abort::estimate(entry_index));
                self.parent.get(key)
            },
            Some((_, ValueEntry::Deleted { .. })) => {
                self.record_read(key, None);
                None
            },
            Some((_, ValueEntry::Written { value, .. })) => {
                self.record_read(key, Some(value.clone()));
                Some(value)
            },
            None => {
                let value = self.parent.get(key);
                self.record_read(key, value.clone());
                value
            },
        }
    }

    /// Presence based on the same layered lookup as [`Self::get`].
    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Stages a write locally. The multi-version store is untouched until
    /// publication.
    pub fn set(&self, key: Bytes, value: Bytes) {
        self.writeset.borrow_mut().insert(key, Some(value));
    }

    /// Stages a tombstone locally.
    pub fn delete(&self, key: &[u8]) {
        self.writeset
            .borrow_mut()
            .insert(Bytes::copy_from_slice(key), None);
    }

    /// Publishes this incarnation's readset and writeset to the
    /// multi-version store. Called by the worker after the handler returned
    /// without an abort.
    pub fn write_to_multi_version_store(&self) {
        self.multi_version_store
            .set_readset(self.tx_index, self.readset.borrow().clone());
        self.multi_version_store.set_writeset(
            self.tx_index,
            self.incarnation,
            self.writeset.borrow().clone(),
        );
    }

    pub fn writeset(&self) -> WriteSet {
        self.writeset.borrow().clone()
    }

    pub fn readset(&self) -> ReadSet {
        self.readset.borrow().clone()
    }

    fn record_read(&self, key: &[u8], value: Option<Bytes>) {
        self.readset
            .borrow_mut()
            .insert(Bytes::copy_from_slice(key), value);
    }
}
