// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Optimistic parallel transaction scheduler.
//!
//! Given an ordered batch of transactions and a multi-store of backing
//! key-value stores, [`Scheduler::process_all`] produces exactly the final
//! state and per-transaction responses of a strictly serial left-to-right
//! execution, while running non-conflicting transactions in parallel.
//! Transactions execute against per-incarnation views over a multi-version
//! store, are validated against the recorded readsets after every round, and
//! are re-executed at a higher incarnation until the whole batch validates;
//! only then are the winning values flushed to the parent stores.

pub mod counters;
mod errors;
mod scheduler;
mod task;

pub use errors::{Error, Result};
pub use scheduler::{DeliverTx, Scheduler, TxContext};

#[cfg(test)]
mod unit_tests;
