// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use occ_types::{Incarnation, TxnIndex};
use std::collections::BTreeMap;

/// One entry in a [`VersionedValue`]: the outcome the transaction at the
/// entry's index produced for the key, tagged with the incarnation that
/// produced it. Note that the transaction index is the map key and not
/// recorded here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueEntry {
    /// A definitive write.
    Written {
        incarnation: Incarnation,
        value: Bytes,
    },
    /// A definitive delete. Still counts as "present" at this layer; the
    /// reader resolves tombstone semantics.
    Deleted { incarnation: Incarnation },
    /// Placeholder advertising that a future incarnation at this index is
    /// expected to produce a value. Readers observing it must abort.
    Estimate { incarnation: Incarnation },
}

impl ValueEntry {
    pub fn incarnation(&self) -> Incarnation {
        match self {
            ValueEntry::Written { incarnation, .. }
            | ValueEntry::Deleted { incarnation }
            | ValueEntry::Estimate { incarnation } => *incarnation,
        }
    }

    pub fn is_estimate(&self) -> bool {
        matches!(self, ValueEntry::Estimate { .. })
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, ValueEntry::Deleted { .. })
    }

    /// The written bytes, if this is a write.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            ValueEntry::Written { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Ordered map from transaction index to the entry that index last produced
/// for one key. At most one entry exists per (key, index); writing replaces.
/// All mutation happens under the owning store's exclusive lock.
#[derive(Debug, Default)]
pub struct VersionedValue {
    versioned_map: BTreeMap<TxnIndex, ValueEntry>,
}

impl VersionedValue {
    pub fn set(&mut self, index: TxnIndex, incarnation: Incarnation, value: Bytes) {
        self.versioned_map
            .insert(index, ValueEntry::Written { incarnation, value });
    }

    pub fn delete(&mut self, index: TxnIndex, incarnation: Incarnation) {
        self.versioned_map
            .insert(index, ValueEntry::Deleted { incarnation });
    }

    pub fn set_estimate(&mut self, index: TxnIndex, incarnation: Incarnation) {
        self.versioned_map
            .insert(index, ValueEntry::Estimate { incarnation });
    }

    /// No-op if the index has no entry.
    pub fn remove(&mut self, index: TxnIndex) {
        self.versioned_map.remove(&index);
    }

    /// Entry at the greatest index.
    pub fn latest(&self) -> Option<(TxnIndex, &ValueEntry)> {
        self.versioned_map
            .iter()
            .next_back()
            .map(|(index, entry)| (*index, entry))
    }

    /// Entry at the greatest index strictly less than `index`.
    pub fn latest_before(&self, index: TxnIndex) -> Option<(TxnIndex, &ValueEntry)> {
        self.versioned_map
            .range(..index)
            .next_back()
            .map(|(index, entry)| (*index, entry))
    }

    /// Entry at the greatest index whose entry is not an estimate.
    pub fn latest_non_estimate(&self) -> Option<(TxnIndex, &ValueEntry)> {
        self.versioned_map
            .iter()
            .rev()
            .find(|(_, entry)| !entry.is_estimate())
            .map(|(index, entry)| (*index, entry))
    }

    pub fn is_empty(&self) -> bool {
        self.versioned_map.is_empty()
    }
}
