// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    counters,
    errors::{Error, Result},
    task::{DeliverTxTask, TaskStatus},
};
use occ_multiversion::{MultiVersionStore, VersionIndexedStore};
use occ_types::{
    AbortSignal, CancellationToken, DeliverTxEntry, DeliverTxRequest, DeliverTxResponse,
    Incarnation, KVStore, MultiStore, StoreKey, TxnIndex, PREFILL_INCARNATION,
};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{debug, debug_span};

/// External transaction handler. Performs reads and writes through the
/// context-bound stores and returns a response; transaction-level failures
/// are response values, not engine errors. Must not retain references to the
/// stores past return (the borrow makes that impossible) and must be
/// deterministic with respect to the observed store state.
pub trait DeliverTx<S: KVStore>: Sync {
    fn deliver_tx(&self, ctx: &TxContext<'_, S>, req: &DeliverTxRequest) -> DeliverTxResponse;
}

impl<S: KVStore, F> DeliverTx<S> for F
where
    F: Fn(&TxContext<'_, S>, &DeliverTxRequest) -> DeliverTxResponse + Sync,
{
    fn deliver_tx(&self, ctx: &TxContext<'_, S>, req: &DeliverTxRequest) -> DeliverTxResponse {
        self(ctx, req)
    }
}

/// Per-transaction execution context handed to the handler: the transaction's
/// position in the batch and one version-indexed store per store key.
pub struct TxContext<'a, S> {
    tx_index: TxnIndex,
    version_stores: &'a HashMap<StoreKey, VersionIndexedStore<S>>,
}

impl<'a, S: KVStore> TxContext<'a, S> {
    pub(crate) fn new(
        tx_index: TxnIndex,
        version_stores: &'a HashMap<StoreKey, VersionIndexedStore<S>>,
    ) -> Self {
        Self {
            tx_index,
            version_stores,
        }
    }

    pub fn tx_index(&self) -> TxnIndex {
        self.tx_index
    }

    /// Panics on an unknown store key; the multi-store's shape is fixed for
    /// the batch.
    pub fn kv_store(&self, store_key: StoreKey) -> &'a VersionIndexedStore<S> {
        self.version_stores
            .get(&store_key)
            .unwrap_or_else(|| panic!("no store registered for key {}", store_key))
    }
}

/// Drives execute/validate rounds over a batch until every transaction has
/// validated, then commits the winning values to the parent stores.
pub struct Scheduler<S, D> {
    workers: usize,
    deliver_tx: D,
    pub(crate) multi_version_stores: HashMap<StoreKey, Arc<MultiVersionStore<S>>>,
}

impl<S, D> Scheduler<S, D>
where
    S: KVStore,
    D: DeliverTx<S>,
{
    /// `workers == 0` means no limit: one worker per task for each batch.
    pub fn new(workers: usize, deliver_tx: D) -> Self {
        Self {
            workers,
            deliver_tx,
            multi_version_stores: HashMap::new(),
        }
    }

    /// Executes the batch with serial-equivalent semantics and returns the
    /// responses in request order. On success the parent stores hold exactly
    /// the state a serial left-to-right execution would have produced; on
    /// cancellation nothing is committed.
    pub fn process_all(
        &mut self,
        multi_store: &MultiStore<S>,
        reqs: &[DeliverTxEntry],
        cancel: &CancellationToken,
    ) -> Result<Vec<DeliverTxResponse>> {
        let _timer = counters::BATCH_SECONDS.start_timer();

        self.init_multi_version_stores(multi_store);
        self.prefill_estimates(reqs);
        let mut tasks = to_tasks(reqs);

        let mut rounds = 0;
        while !done(&tasks) {
            rounds += 1;
            let to_execute = tasks
                .iter_mut()
                .filter(|task| task.status == TaskStatus::Pending)
                .collect::<Vec<_>>();
            self.execute_all(to_execute, cancel)?;

            let to_increment = self.validate_all(&mut tasks);
            counters::RE_EXECUTION_COUNT.inc_by(to_increment.len() as u64);
            for index in to_increment {
                tasks[index].increment();
            }
        }
        debug!(txs = tasks.len(), rounds, "batch validated");

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let responses = collect_responses(tasks);
        for multi_version_store in self.multi_version_stores.values() {
            multi_version_store.write_latest_to_store();
        }
        Ok(responses)
    }

    pub(crate) fn init_multi_version_stores(&mut self, multi_store: &MultiStore<S>) {
        self.multi_version_stores = multi_store
            .iter()
            .map(|(store_key, store)| {
                (*store_key, Arc::new(MultiVersionStore::new(Arc::clone(store))))
            })
            .collect();
    }

    /// Seeds externally supplied estimated writesets before the first round,
    /// so dependent transactions abort instead of reading state a predecessor
    /// is expected to overwrite. Store keys are independent; order between
    /// them is irrelevant.
    fn prefill_estimates(&self, reqs: &[DeliverTxEntry]) {
        for (index, entry) in reqs.iter().enumerate() {
            for (store_key, writeset) in &entry.estimated_writesets {
                self.multi_version_store(store_key)
                    .set_estimated_writeset(index, PREFILL_INCARNATION, writeset.clone());
            }
        }
    }

    /// Executes the given tasks with a bounded fan-out: `workers` workers
    /// drain a shared channel while this thread prepares and dispatches each
    /// task in index order. Statuses move to executed or aborted.
    pub(crate) fn execute_all(
        &self,
        tasks: Vec<&mut DeliverTxTask<S>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let workers = if self.workers == 0 {
            tasks.len()
        } else {
            self.workers.min(tasks.len())
        };

        // Buffered to the task count so dispatch never blocks on a slow
        // worker.
        let (sender, receiver) = crossbeam_channel::bounded(tasks.len());
        rayon::scope(|scope| {
            for _ in 0..workers {
                let receiver = receiver.clone();
                scope.spawn(move |_| {
                    while let Ok(task) = receiver.recv() {
                        if cancel.is_cancelled() {
                            return;
                        }
                        self.execute_task(task);
                    }
                });
            }

            for task in tasks {
                if cancel.is_cancelled() {
                    break;
                }
                self.prepare_task(task);
                sender
                    .send(task)
                    .expect("workers hold the channel open while dispatching");
            }
            // Closing the channel releases the workers.
            drop(sender);
        });

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Installs the per-incarnation state a worker needs: a fresh shared
    /// abort signal and one version-indexed store per store key.
    fn prepare_task(&self, task: &mut DeliverTxTask<S>) {
        let abort_signal = Arc::new(AbortSignal::new());
        task.version_stores = self
            .multi_version_stores
            .iter()
            .map(|(store_key, multi_version_store)| {
                (
                    *store_key,
                    multi_version_store.version_indexed_store(
                        task.index,
                        task.incarnation,
                        Arc::clone(&abort_signal),
                    ),
                )
            })
            .collect();
        task.abort_signal = Some(abort_signal);
    }

    fn execute_task(&self, task: &mut DeliverTxTask<S>) {
        let span = debug_span!("deliver_tx", tx_index = task.index, incarnation = task.incarnation);
        let _entered = span.enter();

        let response = {
            let ctx = TxContext::new(task.index, &task.version_stores);
            self.deliver_tx.deliver_tx(&ctx, &task.request)
        };

        if let Some(abort) = task
            .abort_signal
            .as_ref()
            .and_then(|signal| signal.get())
            .cloned()
        {
            debug!(
                tx_index = task.index,
                dependent = abort.dependent_tx_index,
                "execution aborted on estimate"
            );
            task.status = TaskStatus::Aborted;
            task.abort = Some(abort);
            return;
        }

        for version_store in task.version_stores.values() {
            version_store.write_to_multi_version_store();
        }
        task.status = TaskStatus::Executed;
        task.response = Some(response);
    }

    /// Validates every task in index order, not just the recently executed
    /// ones: an earlier task's re-execution can change the latest-before
    /// value a later, already-validated task observed. Returns the indices to
    /// re-execute; the caller increments them back to pending.
    pub(crate) fn validate_all(&self, tasks: &mut [DeliverTxTask<S>]) -> Vec<TxnIndex> {
        let mut to_execute = Vec::new();
        for task in tasks.iter_mut() {
            // Any aborted task is known to be suspect.
            if task.status == TaskStatus::Aborted {
                to_execute.push(task.index);
                continue;
            }

            let conflicts = self.find_conflicts(task.index);
            if !conflicts.is_empty() {
                debug!(tx_index = task.index, ?conflicts, "validation conflict");
                self.invalidate_task(task.index, task.incarnation);
                to_execute.push(task.index);
                continue;
            }

            // Not permanent: a later round can demote this again.
            task.status = TaskStatus::Validated;
        }
        to_execute
    }

    /// Conflicting indices for one transaction, deduped across store keys
    /// and ascending.
    fn find_conflicts(&self, index: TxnIndex) -> Vec<TxnIndex> {
        let mut conflicts = BTreeSet::new();
        for multi_version_store in self.multi_version_stores.values() {
            conflicts.extend(multi_version_store.validate_transaction_state(index));
        }
        conflicts.into_iter().collect()
    }

    fn invalidate_task(&self, index: TxnIndex, incarnation: Incarnation) {
        for multi_version_store in self.multi_version_stores.values() {
            multi_version_store.invalidate_writeset(index, incarnation);
        }
    }

    fn multi_version_store(&self, store_key: &StoreKey) -> &Arc<MultiVersionStore<S>> {
        self.multi_version_stores
            .get(store_key)
            .unwrap_or_else(|| panic!("no multi-version store for key {}", store_key))
    }
}

pub(crate) fn to_tasks<S>(reqs: &[DeliverTxEntry]) -> Vec<DeliverTxTask<S>> {
    reqs.iter()
        .enumerate()
        .map(|(index, entry)| DeliverTxTask::new(index, entry.request.clone()))
        .collect()
}

fn done<S>(tasks: &[DeliverTxTask<S>]) -> bool {
    tasks
        .iter()
        .all(|task| task.status == TaskStatus::Validated)
}

fn collect_responses<S>(tasks: Vec<DeliverTxTask<S>>) -> Vec<DeliverTxResponse> {
    tasks
        .into_iter()
        .map(|task| {
            task.response
                .expect("a validated task must carry a response")
        })
        .collect()
}
