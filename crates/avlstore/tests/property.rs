// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Randomized churn against a model.
//!
//! A plain `Vec` of payloads is the model: inserts push, deletes remove
//! one byte-identical entry. After every burst the store must agree with
//! the model on record count, per-key ordering, sequential content, and
//! tree balance - before and after compaction and reopening.

use avlstore::Store;
use std::cmp::Ordering;
use std::path::Path;

type Order = fn(u32, &[u8], &[u8]) -> Ordering;

const PAYLOAD: usize = 12;

fn num(r: &[u8]) -> i32 {
    i32::from_le_bytes(r[..4].try_into().unwrap())
}

fn order2(key: u32, a: &[u8], b: &[u8]) -> Ordering {
    match key {
        0 => num(a).cmp(&num(b)),
        _ => a[4..12].cmp(&b[4..12]).then(num(a).cmp(&num(b))),
    }
}

fn open(path: &Path) -> Store<Order> {
    Store::open(path, PAYLOAD, 2, order2 as Order).expect("open store")
}

fn random_record() -> [u8; PAYLOAD] {
    // Narrow domains on purpose: duplicate keys and duplicate payloads
    // must both occur.
    let tags: [&[u8; 8]; 4] = [b"alpha\0\0\0", b"beta\0\0\0\0", b"gamma\0\0\0", b"delta\0\0\0"];
    let mut r = [0u8; PAYLOAD];
    r[..4].copy_from_slice(&(fastrand::i32(0..40)).to_le_bytes());
    r[4..].copy_from_slice(tags[fastrand::usize(0..tags.len())]);
    r
}

fn collect(store: &Store<Order>, key: u32) -> Vec<[u8; PAYLOAD]> {
    let mut out = Vec::new();
    let mut buf = [0u8; PAYLOAD];
    buf[..4].copy_from_slice(&i32::MIN.to_le_bytes());
    let mut more = store.start_ge(key, &mut buf).expect("start_ge");
    while more {
        out.push(buf);
        more = store.next(key, &mut buf).expect("next");
    }
    out
}

fn collect_backward(store: &Store<Order>, key: u32) -> Vec<[u8; PAYLOAD]> {
    let mut out = Vec::new();
    let mut buf = [0xFFu8; PAYLOAD];
    buf[..4].copy_from_slice(&i32::MAX.to_le_bytes());
    let mut more = store.start_lt(key, &mut buf).expect("start_lt");
    while more {
        out.push(buf);
        more = store.prev(key, &mut buf).expect("prev");
    }
    out
}

fn sorted_multiset(records: &[[u8; PAYLOAD]]) -> Vec<[u8; PAYLOAD]> {
    let mut v = records.to_vec();
    v.sort();
    v
}

fn assert_agrees(store: &Store<Order>, model: &[[u8; PAYLOAD]]) {
    for key in 0..2u32 {
        let report = store.scan(key).expect("scan");
        assert_eq!(report.faults, 0, "key {key} audit faults");
        assert_eq!(report.records, model.len() as u64, "key {key} node count");

        let forward = collect(store, key);
        assert_eq!(forward.len(), model.len());
        for pair in forward.windows(2) {
            assert_ne!(
                order2(key, &pair[0], &pair[1]),
                Ordering::Greater,
                "key {key} traversal out of order"
            );
        }
        assert_eq!(sorted_multiset(&forward), sorted_multiset(model));

        let mut backward = collect_backward(store, key);
        backward.reverse();
        assert_eq!(sorted_multiset(&backward), sorted_multiset(model));
        for pair in backward.windows(2) {
            assert_ne!(order2(key, &pair[0], &pair[1]), Ordering::Greater);
        }
    }

    // Sequential pass sees every record exactly once.
    store.start_seq().expect("start_seq");
    let mut buf = [0u8; PAYLOAD];
    let mut seen = Vec::new();
    while store.read_seq(&mut buf).expect("read_seq") {
        seen.push(buf);
    }
    assert_eq!(sorted_multiset(&seen), sorted_multiset(model));
}

#[test]
fn test_random_churn_matches_model() {
    fastrand::seed(0x5eed_0001);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("churn.avl");
    let store = open(&path);
    let mut model: Vec<[u8; PAYLOAD]> = Vec::new();

    for round in 0..6 {
        for _ in 0..60 {
            if model.is_empty() || fastrand::u32(0..10) < 6 {
                let r = random_record();
                store.insert(&r).expect("insert");
                model.push(r);
            } else {
                let i = fastrand::usize(0..model.len());
                let victim = model.swap_remove(i);
                assert!(store.delete(&victim).expect("delete"), "round {round}");
            }
        }
        assert_agrees(&store, &model);
    }

    // Deleting something absent is a benign no-match.
    let mut ghost = [0u8; PAYLOAD];
    ghost[..4].copy_from_slice(&9999i32.to_le_bytes());
    assert!(!store.delete(&ghost).expect("delete ghost"));
}

#[test]
fn test_churn_then_squash_then_reopen() {
    fastrand::seed(0x5eed_0002);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("squash.avl");
    let store = open(&path);
    let mut model: Vec<[u8; PAYLOAD]> = Vec::new();

    for _ in 0..150 {
        let r = random_record();
        store.insert(&r).expect("insert");
        model.push(r);
    }
    for _ in 0..110 {
        let i = fastrand::usize(0..model.len());
        let victim = model.swap_remove(i);
        assert!(store.delete(&victim).expect("delete"));
    }

    store.squash().expect("squash");
    assert_agrees(&store, &model);

    // Sparse space is gone: header plus live records plus one cursor.
    let slot_len = (2 * 24 + 16 + PAYLOAD) as u64;
    let header_len = (64 + 2 * 8) as u64;
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        header_len + slot_len * (model.len() as u64 + 1)
    );

    let forward_before = collect(&store, 0);
    drop(store);

    let store = open(&path);
    assert_eq!(collect(&store, 0), forward_before);
    assert_agrees(&store, &model);
}

#[test]
fn test_interleaved_squash_keeps_cursors_valid() {
    fastrand::seed(0x5eed_0003);
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("inter.avl"));
    let mut model: Vec<[u8; PAYLOAD]> = Vec::new();

    for i in 0..30i32 {
        let mut r = [0u8; PAYLOAD];
        r[..4].copy_from_slice(&i.to_le_bytes());
        r[4..].copy_from_slice(b"walkable");
        store.insert(&r).expect("insert");
        model.push(r);
    }

    // Park the cursor mid-range, then punch holes and compact underneath
    // it. The walk must continue over surviving records only.
    let mut buf = [0u8; PAYLOAD];
    buf[..4].copy_from_slice(&10i32.to_le_bytes());
    buf[4..].fill(0);
    assert!(store.start_ge(0, &mut buf).unwrap());
    assert_eq!(num(&buf), 10);

    for i in [11i32, 13, 15, 2, 4] {
        let victim = model.iter().position(|r| num(r) == i).unwrap();
        assert!(store.delete(&model.swap_remove(victim)).unwrap());
    }
    store.squash().expect("squash");

    let mut walked = Vec::new();
    while store.next(0, &mut buf).unwrap() {
        walked.push(num(&buf));
    }
    assert_eq!(walked, vec![12, 14, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29]);
}

#[test]
fn test_concurrent_inserts_from_threads() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(open(&dir.path().join("mt.avl")));

    let mut workers = Vec::new();
    for t in 0..4i32 {
        let store = store.clone();
        workers.push(std::thread::spawn(move || {
            for i in 0..25i32 {
                let mut r = [0u8; PAYLOAD];
                r[..4].copy_from_slice(&(t * 100 + i).to_le_bytes());
                r[4..].copy_from_slice(b"threaded");
                store.insert(&r).expect("insert");
            }
        }));
    }
    for w in workers {
        w.join().expect("worker");
    }

    let report = store.scan(0).expect("scan");
    assert_eq!(report.records, 100);
    assert_eq!(report.faults, 0);

    let nums: Vec<i32> = collect(&store, 0).iter().map(|r| num(r)).collect();
    let mut want: Vec<i32> = (0..4).flat_map(|t| (0..25).map(move |i| t * 100 + i)).collect();
    want.sort_unstable();
    assert_eq!(nums, want);
}
