// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{MultiVersionStore, ValueEntry, VersionIndexedStore};
use bytes::Bytes;
use claims::{assert_none, assert_some, assert_some_eq};
use occ_types::{AbortSignal, Incarnation, MemKVStore, ReadSet, TxnIndex, WriteSet};
use std::sync::Arc;

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn parent_with(pairs: &[(&str, &str)]) -> Arc<MemKVStore> {
    Arc::new(
        pairs
            .iter()
            .map(|(key, value)| (b(key), b(value)))
            .collect(),
    )
}

fn ws(entries: &[(&str, Option<&str>)]) -> WriteSet {
    entries
        .iter()
        .map(|(key, value)| (b(key), value.map(b)))
        .collect()
}

fn rs(entries: &[(&str, Option<&str>)]) -> ReadSet {
    entries
        .iter()
        .map(|(key, value)| (b(key), value.map(b)))
        .collect()
}

fn written(incarnation: Incarnation, value: &str) -> ValueEntry {
    ValueEntry::Written {
        incarnation,
        value: b(value),
    }
}

fn empty_store() -> Arc<MultiVersionStore<MemKVStore>> {
    Arc::new(MultiVersionStore::new(parent_with(&[])))
}

fn view(
    store: &Arc<MultiVersionStore<MemKVStore>>,
    tx_index: TxnIndex,
    incarnation: Incarnation,
) -> (VersionIndexedStore<MemKVStore>, Arc<AbortSignal>) {
    let abort_signal = Arc::new(AbortSignal::new());
    (
        store.version_indexed_store(tx_index, incarnation, Arc::clone(&abort_signal)),
        abort_signal,
    )
}

#[test]
fn latest_and_latest_before() {
    let store = empty_store();
    store.set_writeset(1, 0, ws(&[("a", Some("one"))]));
    store.set_writeset(3, 0, ws(&[("a", Some("three"))]));

    assert_some_eq!(store.get_latest(b"a"), (3, written(0, "three")));
    assert_none!(store.get_latest(b"missing"));

    assert_none!(store.get_latest_before_index(1, b"a"));
    assert_some_eq!(store.get_latest_before_index(2, b"a"), (1, written(0, "one")));
    assert_some_eq!(
        store.get_latest_before_index(3, b"a"),
        (1, written(0, "one"))
    );

    assert!(!store.has(1, b"a"));
    assert!(store.has(2, b"a"));
    assert!(!store.has(9, b"missing"));
}

#[test]
fn deletes_count_as_present() {
    let store = empty_store();
    store.set_writeset(0, 0, ws(&[("a", None)]));

    assert!(store.has(1, b"a"));
    let (index, entry) = store.get_latest_before_index(1, b"a").unwrap();
    assert_eq!(index, 0);
    assert!(entry.is_deleted());
}

#[test]
fn writeset_replacement_drops_stale_keys() {
    let store = empty_store();
    store.set_writeset(1, 0, ws(&[("a", Some("1")), ("b", Some("2"))]));
    store.set_writeset(1, 1, ws(&[("b", Some("9")), ("c", Some("3"))]));

    // "a" is gone entirely, as if the first writeset had never been set.
    assert_none!(store.get_latest(b"a"));
    assert_some_eq!(store.get_latest(b"b"), (1, written(1, "9")));
    assert_some_eq!(store.get_latest(b"c"), (1, written(1, "3")));
    assert_some_eq!(store.writeset_keys(1), vec![b("b"), b("c")]);
}

#[test]
fn estimated_writeset_is_replaced_by_real_one() {
    let store = empty_store();
    store.set_estimated_writeset(0, -1, ws(&[("y", Some("ignored")), ("z", None)]));

    let (_, entry) = store.get_latest(b"y").unwrap();
    assert!(entry.is_estimate());
    assert_eq!(entry.incarnation(), -1);
    assert_some_eq!(store.writeset_keys(0), vec![b("y"), b("z")]);

    store.set_writeset(0, 0, ws(&[("y", Some("7"))]));
    assert_some_eq!(store.get_latest(b"y"), (0, written(0, "7")));
    // The prefilled key the real writeset did not touch is removed.
    assert_none!(store.get_latest(b"z"));
}

#[test]
fn invalidation_turns_writes_into_estimates() {
    let store = empty_store();
    store.set_writeset(2, 0, ws(&[("a", Some("1")), ("b", None)]));
    store.invalidate_writeset(2, 1);

    for key in [&b"a"[..], &b"b"[..]] {
        let (index, entry) = store.get_latest(key).unwrap();
        assert_eq!(index, 2);
        assert!(entry.is_estimate());
        assert_eq!(entry.incarnation(), 1);
    }
    // Key list survives invalidation so a replacement can clean up.
    assert_some_eq!(store.writeset_keys(2), vec![b("a"), b("b")]);

    store.set_writeset(2, 1, ws(&[("a", Some("2"))]));
    assert_some_eq!(store.get_latest(b"a"), (2, written(1, "2")));
    assert_none!(store.get_latest(b"b"));
}

#[test]
fn readset_roundtrip() {
    let store = empty_store();
    assert_none!(store.get_readset(0));
    let readset = rs(&[("a", Some("1")), ("gone", None)]);
    store.set_readset(0, readset.clone());
    assert_some_eq!(store.get_readset(0), readset);
}

#[test]
fn validation_classes() {
    let parent = parent_with(&[("p", "P")]);
    let store = Arc::new(MultiVersionStore::new(parent));

    // Reads that resolved to the parent (or observed absence) are clean.
    store.set_readset(5, rs(&[("p", Some("P")), ("missing", None)]));
    assert_eq!(store.validate_transaction_state(5), Vec::<TxnIndex>::new());

    // A write that matches the observation is clean; a mismatch conflicts.
    store.set_writeset(1, 0, ws(&[("w", Some("new"))]));
    store.set_readset(2, rs(&[("w", Some("new"))]));
    assert!(store.validate_transaction_state(2).is_empty());
    store.set_readset(2, rs(&[("w", Some("old"))]));
    assert_eq!(store.validate_transaction_state(2), vec![1]);

    // A delete conflicts only with a non-absent observation.
    store.set_writeset(3, 0, ws(&[("d", None)]));
    store.set_readset(4, rs(&[("d", None)]));
    assert!(store.validate_transaction_state(4).is_empty());
    store.set_readset(4, rs(&[("d", Some("x"))]));
    assert_eq!(store.validate_transaction_state(4), vec![3]);

    // An estimate always conflicts.
    store.invalidate_writeset(1, 1);
    store.set_readset(2, rs(&[("w", Some("new"))]));
    assert_eq!(store.validate_transaction_state(2), vec![1]);
}

#[test]
fn validation_conflicts_are_sorted_and_deduped() {
    let store = empty_store();
    store.set_writeset(3, 0, ws(&[("a", Some("3a")), ("b", Some("3b"))]));
    store.set_writeset(1, 0, ws(&[("c", Some("1c"))]));

    store.set_readset(
        4,
        rs(&[("a", Some("stale")), ("b", Some("stale")), ("c", Some("stale"))]),
    );
    assert_eq!(store.validate_transaction_state(4), vec![1, 3]);
}

#[test]
fn validation_is_idempotent() {
    let store = empty_store();
    store.set_writeset(0, 0, ws(&[("k", Some("v"))]));
    store.set_readset(1, rs(&[("k", Some("stale"))]));

    let first = store.validate_transaction_state(1);
    let second = store.validate_transaction_state(1);
    assert_eq!(first, vec![0]);
    assert_eq!(first, second);
}

#[test]
#[should_panic(expected = "readset conflict with parent store")]
fn validation_panics_on_parent_mismatch() {
    let store = Arc::new(MultiVersionStore::new(parent_with(&[("p", "P")])));
    store.set_readset(1, rs(&[("p", Some("drifted"))]));
    store.validate_transaction_state(1);
}

#[test]
fn commit_flushes_winning_values() {
    let parent = parent_with(&[("d", "old"), ("stays", "keep")]);
    let store = Arc::new(MultiVersionStore::new(Arc::clone(&parent)));

    store.set_writeset(0, 0, ws(&[("a", Some("1")), ("d", None)]));
    store.set_writeset(2, 1, ws(&[("a", Some("2"))]));
    // A key whose only writeset was replaced away leaves nothing writeable.
    store.set_writeset(1, 0, ws(&[("gone", Some("x"))]));
    store.set_writeset(1, 1, WriteSet::new());

    store.write_latest_to_store();

    let snapshot = parent.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_some_eq!(snapshot.get(&b("a")), &b("2"));
    assert_some_eq!(snapshot.get(&b("stays")), &b("keep"));
    assert_none!(snapshot.get(&b("d")));
    assert_none!(snapshot.get(&b("gone")));
}

#[test]
fn view_reads_own_staged_writes() {
    let store = empty_store();
    let (vis, abort_signal) = view(&store, 0, 0);

    vis.set(b("k"), b("v"));
    assert_some_eq!(vis.get(b"k"), b("v"));
    assert!(vis.has(b"k"));

    vis.delete(b"k");
    assert_none!(vis.get(b"k"));
    assert!(!vis.has(b"k"));

    // Staged only: the multi-version store has not seen anything.
    assert_none!(store.get_latest(b"k"));
    // Own writes are not reads.
    assert!(vis.readset().is_empty());
    assert!(!abort_signal.aborted());
}

#[test]
fn view_layers_multi_version_state_over_parent() {
    let parent = parent_with(&[("p", "pv")]);
    let store = Arc::new(MultiVersionStore::new(parent));
    store.set_writeset(0, 0, ws(&[("m", Some("mv")), ("t", None)]));

    let (vis, abort_signal) = view(&store, 1, 0);
    assert_some_eq!(vis.get(b"m"), b("mv"));
    assert_none!(vis.get(b"t"));
    assert_some_eq!(vis.get(b"p"), b("pv"));
    assert_none!(vis.get(b"absent"));

    assert_eq!(
        vis.readset(),
        rs(&[
            ("m", Some("mv")),
            ("t", None),
            ("p", Some("pv")),
            ("absent", None)
        ])
    );
    assert!(!abort_signal.aborted());
}

#[test]
fn view_rereads_are_served_from_the_readset() {
    let store = empty_store();
    let (vis, _) = view(&store, 2, 0);

    assert_none!(vis.get(b"k"));
    // A concurrent predecessor publishes afterwards; this incarnation keeps
    // observing its original snapshot and validation decides its fate.
    store.set_writeset(1, 0, ws(&[("k", Some("later"))]));
    assert_none!(vis.get(b"k"));
}

#[test]
fn view_aborts_on_estimate() {
    let parent = parent_with(&[("e", "parent")]);
    let store = Arc::new(MultiVersionStore::new(parent));
    store.set_estimated_writeset(0, -1, ws(&[("e", Some("whatever"))]));

    let (vis, abort_signal) = view(&store, 1, 0);
    // Best-effort read falls through to the parent.
    assert_some_eq!(vis.get(b"e"), b("parent"));
    assert_some_eq!(abort_signal.get(), &occ_types::Abort::estimate(0));
    // Nothing is recorded for an aborted read.
    assert!(vis.readset().is_empty());
}

#[test]
fn view_publishes_readset_and_writeset() {
    let parent = parent_with(&[("r", "rv")]);
    let store = Arc::new(MultiVersionStore::new(parent));

    let (vis, _) = view(&store, 3, 1);
    assert_some_eq!(vis.get(b"r"), b("rv"));
    vis.set(b("w"), b("wv"));
    vis.delete(b"gone");
    vis.write_to_multi_version_store();

    assert_some_eq!(store.get_readset(3), rs(&[("r", Some("rv"))]));
    assert_some_eq!(store.get_latest(b"w"), (3, written(1, "wv")));
    let (_, entry) = store.get_latest(b"gone").unwrap();
    assert!(entry.is_deleted());
    assert_some_eq!(store.writeset_keys(3), vec![b("gone"), b("w")]);
    assert_some!(store.get_latest_before_index(4, b"w"));
}
