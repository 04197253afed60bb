// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    scheduler::to_tasks,
    task::TaskStatus,
    test_utils::{
        b, entries, execute_sequential, multi_store_with, snapshot, Op, Program, ProgramHandler,
    },
    Error, Scheduler, TxContext,
};
use bytes::Bytes;
use occ_types::{
    CancellationToken, DeliverTxEntry, DeliverTxRequest, DeliverTxResponse, MemKVStore,
    MultiStore, ReadSet, StoreKey, WriteSet,
};
use std::sync::Arc;
use test_case::test_case;

const S1: StoreKey = StoreKey::new("s1");
const S2: StoreKey = StoreKey::new("s2");

fn run(
    workers: usize,
    programs: Vec<Program>,
    multi_store: &MultiStore<MemKVStore>,
) -> (Vec<DeliverTxResponse>, ProgramHandler) {
    let num_txs = programs.len();
    let handler = ProgramHandler::new(programs);
    let counts = handler.clone();
    let mut scheduler = Scheduler::new(workers, handler);
    let responses = scheduler
        .process_all(multi_store, &entries(num_txs), &CancellationToken::new())
        .unwrap();
    (responses, counts)
}

#[test]
fn independent_transactions_execute_once() {
    let programs = vec![
        vec![(S1, Op::Set("a", "1".to_string()))],
        vec![(S1, Op::Set("b", "2".to_string()))],
    ];
    let multi_store = multi_store_with(&[S1], &[]);
    let (expected_state, expected_responses) =
        execute_sequential(&snapshot(&multi_store), &programs);

    let (responses, counts) = run(2, programs, &multi_store);

    assert_eq!(responses, expected_responses);
    assert_eq!(snapshot(&multi_store), expected_state);
    assert_eq!(counts.executions(0), 1);
    assert_eq!(counts.executions(1), 1);
}

#[test]
fn read_after_write_conflict_retries() {
    // Force the reader to run first: tx 0 blocks until tx 1's first
    // execution has finished.
    let (signal, gate) = crossbeam_channel::bounded(1);
    let programs = vec![
        vec![(S1, Op::Set("x", "5".to_string()))],
        vec![(S1, Op::Get("x"))],
    ];
    let multi_store = multi_store_with(&[S1], &[]);
    let handler = ProgramHandler::new(programs)
        .with_gate(0, gate)
        .with_signal(1, signal);
    let counts = handler.clone();

    let mut scheduler = Scheduler::new(2, handler);
    let responses = scheduler
        .process_all(&multi_store, &entries(2), &CancellationToken::new())
        .unwrap();

    // The stale read was detected and re-executed against tx 0's write.
    assert_eq!(responses[1].data, b("5|"));
    assert_eq!(counts.executions(0), 1);
    assert_eq!(counts.executions(1), 2);
    assert_eq!(snapshot(&multi_store)[&S1].get(&b("x")), Some(&b("5")));
}

#[test]
fn estimate_abort_and_retry() {
    let (signal, gate) = crossbeam_channel::bounded(1);
    let programs = vec![
        vec![(S1, Op::Set("y", "7".to_string()))],
        vec![(S1, Op::Get("y"))],
    ];
    let multi_store = multi_store_with(&[S1], &[]);
    let handler = ProgramHandler::new(programs)
        .with_gate(0, gate)
        .with_signal(1, signal);
    let counts = handler.clone();

    let mut estimated = WriteSet::new();
    estimated.insert(b("y"), Some(b("7")));
    let reqs = vec![
        DeliverTxEntry::new(b("tx-0")).with_estimated_writeset(S1, estimated),
        DeliverTxEntry::new(b("tx-1")),
    ];

    let mut scheduler = Scheduler::new(2, handler);
    let responses = scheduler
        .process_all(&multi_store, &reqs, &CancellationToken::new())
        .unwrap();

    // The prefilled estimate aborted tx 1's first run; the retry observed
    // the definitive write.
    assert_eq!(responses[1].data, b("7|"));
    assert_eq!(counts.executions(0), 1);
    assert_eq!(counts.executions(1), 2);
    assert_eq!(snapshot(&multi_store)[&S1].get(&b("y")), Some(&b("7")));

    // Every estimate was resolved by the time the batch validated.
    let (_, entry) = scheduler.multi_version_stores[&S1].get_latest(b"y").unwrap();
    assert!(!entry.is_estimate());
}

#[test]
fn cascading_invalidation_converges() {
    // tx 0 runs last in the first round, invalidating both successors.
    let (signal, gate) = crossbeam_channel::bounded(1);
    let programs = vec![
        vec![(S1, Op::Set("k", "1".to_string()))],
        vec![(S1, Op::Append("k", "x".to_string()))],
        vec![(S1, Op::Get("k"))],
    ];
    let multi_store = multi_store_with(&[S1], &[]);
    let (expected_state, expected_responses) =
        execute_sequential(&snapshot(&multi_store), &programs);
    let handler = ProgramHandler::new(programs)
        .with_gate(0, gate)
        .with_signal(2, signal);
    let counts = handler.clone();

    let mut scheduler = Scheduler::new(2, handler);
    let responses = scheduler
        .process_all(&multi_store, &entries(3), &CancellationToken::new())
        .unwrap();

    assert_eq!(responses, expected_responses);
    assert_eq!(responses[2].data, b("1x|"));
    assert_eq!(snapshot(&multi_store), expected_state);
    assert_eq!(counts.executions(0), 1);
    assert_eq!(counts.executions(1), 2);
    // Invalidated once by tx 1's republish, possibly once more by an
    // estimate abort in the retry round.
    assert!(counts.executions(2) >= 2);
}

#[test]
fn delete_validates_against_tombstone_not_parent() {
    let (signal, gate) = crossbeam_channel::bounded(1);
    let programs = vec![
        vec![(S1, Op::Delete("k"))],
        vec![(S1, Op::Get("k"))],
    ];
    let multi_store = multi_store_with(&[S1], &[(S1, "k", "v")]);
    let handler = ProgramHandler::new(programs)
        .with_gate(0, gate)
        .with_signal(1, signal);
    let counts = handler.clone();

    let mut scheduler = Scheduler::new(2, handler);
    let responses = scheduler
        .process_all(&multi_store, &entries(2), &CancellationToken::new())
        .unwrap();

    // First run observed the parent's value; the retry observed the
    // tombstone and validated against it.
    assert_eq!(responses[1].data, b("~|"));
    assert_eq!(counts.executions(1), 2);
    assert!(snapshot(&multi_store)[&S1].is_empty());
}

#[test]
fn conflicts_deduplicate_across_store_keys() {
    let (signal, gate) = crossbeam_channel::bounded(1);
    let programs = vec![
        vec![
            (S1, Op::Set("a", "1".to_string())),
            (S2, Op::Set("b", "2".to_string())),
        ],
        vec![(S1, Op::Get("a")), (S2, Op::Get("b"))],
    ];
    let multi_store = multi_store_with(&[S1, S2], &[]);
    let (expected_state, expected_responses) =
        execute_sequential(&snapshot(&multi_store), &programs);
    let handler = ProgramHandler::new(programs)
        .with_gate(0, gate)
        .with_signal(1, signal);
    let counts = handler.clone();

    let mut scheduler = Scheduler::new(2, handler);
    let responses = scheduler
        .process_all(&multi_store, &entries(2), &CancellationToken::new())
        .unwrap();

    assert_eq!(responses, expected_responses);
    assert_eq!(responses[1].data, b("1|2|"));
    assert_eq!(snapshot(&multi_store), expected_state);
    // One retry covers the conflicts in both stores.
    assert_eq!(counts.executions(1), 2);
}

#[test_case(0; "one worker per task")]
#[test_case(1; "single worker")]
#[test_case(2; "two workers")]
#[test_case(8; "more workers than tasks")]
fn worker_bound_does_not_change_output(workers: usize) {
    let keys = ["w0", "w1", "w2", "w3"];
    let programs: Vec<Program> = keys
        .iter()
        .enumerate()
        .map(|(index, key)| {
            vec![
                (S1, Op::Set(key, format!("v{index}"))),
                (S1, Op::Get("seed")),
                (S1, Op::Get(key)),
            ]
        })
        .collect();
    let multi_store = multi_store_with(&[S1], &[(S1, "seed", "sv")]);
    let (expected_state, expected_responses) =
        execute_sequential(&snapshot(&multi_store), &programs);

    let (responses, counts) = run(workers, programs, &multi_store);

    assert_eq!(responses, expected_responses);
    assert_eq!(snapshot(&multi_store), expected_state);
    for index in 0..keys.len() {
        assert_eq!(counts.executions(index), 1);
    }
}

#[test]
fn conflicting_chain_terminates_and_matches_serial() {
    // Every transaction reads and rewrites the same key; worst case for
    // round-based validation.
    let programs: Vec<Program> = (0..6)
        .map(|index| vec![(S1, Op::Append("chain", format!("{index}")))])
        .collect();
    let multi_store = multi_store_with(&[S1], &[]);
    let (expected_state, expected_responses) =
        execute_sequential(&snapshot(&multi_store), &programs);

    let (responses, _) = run(3, programs, &multi_store);

    assert_eq!(responses, expected_responses);
    assert_eq!(snapshot(&multi_store), expected_state);
    assert_eq!(
        snapshot(&multi_store)[&S1].get(&b("chain")),
        Some(&b("012345"))
    );
}

#[test]
fn empty_batch_is_a_no_op() {
    let multi_store = multi_store_with(&[S1], &[(S1, "k", "v")]);
    let before = snapshot(&multi_store);

    let (responses, _) = run(4, Vec::new(), &multi_store);

    assert!(responses.is_empty());
    assert_eq!(snapshot(&multi_store), before);
}

#[test]
fn pre_cancelled_batch_commits_nothing() {
    let programs = vec![vec![(S1, Op::Set("a", "1".to_string()))]];
    let multi_store = multi_store_with(&[S1], &[(S1, "k", "v")]);
    let before = snapshot(&multi_store);
    let handler = ProgramHandler::new(programs);
    let counts = handler.clone();

    let token = CancellationToken::new();
    token.cancel();
    let mut scheduler = Scheduler::new(2, handler);
    assert_eq!(
        scheduler.process_all(&multi_store, &entries(1), &token),
        Err(Error::Cancelled)
    );
    assert_eq!(snapshot(&multi_store), before);
    assert_eq!(counts.executions(0), 0);
}

#[test]
fn cancellation_mid_batch_commits_nothing() {
    let multi_store = multi_store_with(&[S1], &[(S1, "k", "v")]);
    let before = snapshot(&multi_store);

    let token = CancellationToken::new();
    let handler_token = token.clone();
    let handler = move |ctx: &TxContext<'_, MemKVStore>, _req: &DeliverTxRequest| {
        ctx.kv_store(S1).set(b("a"), b("1"));
        handler_token.cancel();
        DeliverTxResponse::ok(Bytes::new())
    };

    let mut scheduler = Scheduler::new(1, handler);
    assert_eq!(
        scheduler.process_all(&multi_store, &entries(3), &token),
        Err(Error::Cancelled)
    );
    assert_eq!(snapshot(&multi_store), before);
}

#[test]
fn validated_task_demoted_when_predecessor_republishes() {
    let multi_store = multi_store_with(&[S1], &[]);
    let handler = ProgramHandler::new(vec![Vec::new(), Vec::new()]);
    let mut scheduler = Scheduler::new(2, handler);
    scheduler.init_multi_version_stores(&multi_store);
    let mut tasks = to_tasks::<MemKVStore>(&entries(2));
    let store = Arc::clone(&scheduler.multi_version_stores[&S1]);

    // tx 0 wrote "a"; tx 1 read it. Both executed.
    let mut writeset = WriteSet::new();
    writeset.insert(b("k"), Some(b("a")));
    store.set_writeset(0, 0, writeset);
    store.set_readset(0, ReadSet::new());
    let mut readset = ReadSet::new();
    readset.insert(b("k"), Some(b("a")));
    store.set_writeset(1, 0, WriteSet::new());
    store.set_readset(1, readset);
    tasks[0].status = TaskStatus::Executed;
    tasks[1].status = TaskStatus::Executed;

    assert!(scheduler.validate_all(&mut tasks).is_empty());
    assert_eq!(tasks[0].status, TaskStatus::Validated);
    assert_eq!(tasks[1].status, TaskStatus::Validated);

    // tx 0 re-executes with a different value: tx 1 must be demoted even
    // though it had validated.
    let mut writeset = WriteSet::new();
    writeset.insert(b("k"), Some(b("b")));
    store.set_writeset(0, 1, writeset);

    let demoted = scheduler.validate_all(&mut tasks);
    assert_eq!(demoted, vec![1]);
    assert_eq!(tasks[0].status, TaskStatus::Validated);
    for index in demoted {
        tasks[index].increment();
    }
    assert_eq!(tasks[1].status, TaskStatus::Pending);
    assert_eq!(tasks[1].incarnation, 1);
}
