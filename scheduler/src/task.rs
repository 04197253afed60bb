// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use occ_multiversion::VersionIndexedStore;
use occ_types::{
    Abort, AbortSignal, DeliverTxRequest, DeliverTxResponse, Incarnation, StoreKey, TxnIndex,
};
use std::{collections::HashMap, sync::Arc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    /// Ready for execution. All executing tasks are in this state.
    Pending,
    /// Executed without an abort; ready for validation.
    Executed,
    /// A read observed an estimate; transitions back to pending for the next
    /// round.
    Aborted,
    /// Validated against the current multi-version state. Revocable: a
    /// predecessor's re-execution can demote the task back to pending.
    Validated,
}

/// Mutable record of one transaction's current incarnation. Prepared by the
/// scheduler immediately before dispatch (fresh abort signal and one version
/// store per store key) and mutated by exactly one worker at a time.
pub(crate) struct DeliverTxTask<S> {
    pub index: TxnIndex,
    pub incarnation: Incarnation,
    pub status: TaskStatus,
    pub request: DeliverTxRequest,
    pub response: Option<DeliverTxResponse>,
    pub abort: Option<Abort>,
    pub abort_signal: Option<Arc<AbortSignal>>,
    pub version_stores: HashMap<StoreKey, VersionIndexedStore<S>>,
}

impl<S> DeliverTxTask<S> {
    pub fn new(index: TxnIndex, request: DeliverTxRequest) -> Self {
        Self {
            index,
            incarnation: 0,
            status: TaskStatus::Pending,
            request,
            response: None,
            abort: None,
            abort_signal: None,
            version_stores: HashMap::new(),
        }
    }

    /// Bumps the incarnation and resets per-incarnation state for
    /// re-execution.
    pub fn increment(&mut self) {
        self.incarnation += 1;
        self.status = TaskStatus::Pending;
        self.response = None;
        self.abort = None;
        self.abort_signal = None;
        self.version_stores = HashMap::new();
    }
}
