// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Leaf types shared by the multi-version store and the transaction
//! scheduler: transaction indices and incarnations, the key-value store
//! contract and multi-store, the batch entry/response types, and the
//! per-task abort and cancellation signals.

pub mod batch;
pub mod kv;
pub mod occ;

pub use batch::{DeliverTxEntry, DeliverTxRequest, DeliverTxResponse};
pub use kv::{KVStore, MemKVStore, MultiStore, StoreKey};
pub use occ::{
    Abort, AbortSignal, CancellationToken, Incarnation, TxnIndex, PREFILL_INCARNATION,
};

/// The set of (key -> value-or-tombstone) produced by one execution of a
/// transaction. `None` is the tombstone. Keys iterate in sorted order, which
/// the multi-version store relies on when recording writeset key lists.
pub type WriteSet = std::collections::BTreeMap<bytes::Bytes, Option<bytes::Bytes>>;

/// The set of (key -> observed bytes) read by one execution of a transaction.
/// `None` means the key was observed absent.
pub type ReadSet = std::collections::HashMap<bytes::Bytes, Option<bytes::Bytes>>;
