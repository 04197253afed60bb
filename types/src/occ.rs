// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::OnceCell;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Position of a transaction within the ordered batch. Defines the total
/// order that parallel execution must be equivalent to.
pub type TxnIndex = usize;

/// Which attempt of a given transaction index produced a particular value.
/// Starts at 0 and strictly increases across re-executions.
pub type Incarnation = i32;

/// Incarnation recorded on estimated writesets that were seeded before the
/// first real execution of the batch.
pub const PREFILL_INCARNATION: Incarnation = -1;

/// Raised when a read observes an estimate: the reading transaction must be
/// re-executed once the transaction at `dependent_tx_index` has produced a
/// definitive value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Abort {
    pub dependent_tx_index: TxnIndex,
}

impl Abort {
    pub fn estimate(dependent_tx_index: TxnIndex) -> Self {
        Self { dependent_tx_index }
    }
}

/// Set-once abort slot shared by all version stores of a single task
/// incarnation. Each store may signal at most once; the first recorded abort
/// wins and later signals are dropped. The worker consults the slot after the
/// handler returns.
#[derive(Debug, Default)]
pub struct AbortSignal {
    slot: OnceCell<Abort>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self, abort: Abort) {
        // Only the first abort is kept.
        let _ = self.slot.set(abort);
    }

    pub fn get(&self) -> Option<&Abort> {
        self.slot.get()
    }

    pub fn aborted(&self) -> bool {
        self.slot.get().is_some()
    }
}

/// Caller-supplied cancellation signal for a batch. Once fired, the scheduler
/// stops dispatching work and surfaces a cancellation error without
/// committing anything to the parent stores.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
