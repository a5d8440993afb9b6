// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios over a two-key store.
//!
//! Records are 12 bytes: a 4-byte LE `num` and an 8-byte `tag`. Key 0
//! orders by num, key 1 by tag then num.

use avlstore::{Store, StoreError};
use std::cmp::Ordering;
use std::path::Path;

type Order = fn(u32, &[u8], &[u8]) -> Ordering;
type TestStore = Store<Order>;

const PAYLOAD: usize = 12;

fn num(r: &[u8]) -> i32 {
    i32::from_le_bytes(r[..4].try_into().unwrap())
}

fn tag(r: &[u8]) -> &[u8] {
    &r[4..12]
}

fn order2(key: u32, a: &[u8], b: &[u8]) -> Ordering {
    match key {
        0 => num(a).cmp(&num(b)),
        _ => tag(a).cmp(tag(b)).then(num(a).cmp(&num(b))),
    }
}

fn rec(n: i32, t: &str) -> [u8; PAYLOAD] {
    let mut r = [0u8; PAYLOAD];
    r[..4].copy_from_slice(&n.to_le_bytes());
    r[4..4 + t.len()].copy_from_slice(t.as_bytes());
    r
}

fn open(path: &Path) -> TestStore {
    let order: Order = order2;
    Store::open(path, PAYLOAD, 2, order).expect("open store")
}

/// Forward in-order traversal under one key, from the very bottom.
fn collect(store: &TestStore, key: u32) -> Vec<[u8; PAYLOAD]> {
    let mut out = Vec::new();
    let mut buf = rec(i32::MIN, "");
    let mut more = store.start_ge(key, &mut buf).expect("start_ge");
    while more {
        out.push(buf);
        more = store.next(key, &mut buf).expect("next");
    }
    out
}

fn seed_four(store: &TestStore) {
    for r in [rec(3, "A"), rec(1, "B"), rec(2, "A"), rec(2, "B")] {
        store.insert(&r).expect("insert");
    }
}

#[test]
fn test_two_key_insert_orderings() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));
    seed_four(&store);

    let by_num: Vec<i32> = collect(&store, 0).iter().map(|r| num(r)).collect();
    assert_eq!(by_num, vec![1, 2, 2, 3]);

    let by_tag: Vec<(u8, i32)> = collect(&store, 1).iter().map(|r| (r[4], num(r))).collect();
    assert_eq!(by_tag, vec![(b'A', 2), (b'A', 3), (b'B', 1), (b'B', 2)]);
}

#[test]
fn test_range_start_and_walk_off_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));
    seed_four(&store);

    let mut buf = rec(2, "");
    assert!(store.start_ge(0, &mut buf).unwrap());
    assert_eq!(num(&buf), 2);
    assert!(store.next(0, &mut buf).unwrap());
    assert_eq!(num(&buf), 2);
    assert!(store.next(0, &mut buf).unwrap());
    assert_eq!((num(&buf), buf[4]), (3, b'A'));
    assert!(!store.next(0, &mut buf).unwrap());
}

#[test]
fn test_delete_rethreads_and_prev_walks_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));
    seed_four(&store);

    assert!(store.delete(&rec(2, "A")).unwrap());

    let by_num: Vec<i32> = collect(&store, 0).iter().map(|r| num(r)).collect();
    assert_eq!(by_num, vec![1, 2, 3]);

    let report = store.scan(0).unwrap();
    assert_eq!(report.records, 3);
    assert_eq!(report.faults, 0);

    // Walk key 1 downward from just below (tag B, num 2).
    let mut buf = rec(2, "B");
    assert!(store.start_lt(1, &mut buf).unwrap());
    assert_eq!((buf[4], num(&buf)), (b'B', 1));
    assert!(store.prev(1, &mut buf).unwrap());
    assert_eq!((buf[4], num(&buf)), (b'A', 3));
    assert!(!store.prev(1, &mut buf).unwrap());
}

#[test]
fn test_payload_identical_duplicates_delete_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));

    store.insert(&rec(1, "X")).unwrap();
    store.insert(&rec(1, "X")).unwrap();
    assert_eq!(store.scan(0).unwrap().records, 2);

    assert!(store.delete(&rec(1, "X")).unwrap());
    assert_eq!(store.scan(0).unwrap().records, 2 - 1);

    let mut buf = rec(1, "X");
    assert!(store.find(0, &mut buf).unwrap());
    assert_eq!(tag(&buf), b"X\0\0\0\0\0\0\0");

    assert!(store.delete(&rec(1, "X")).unwrap());
    assert!(!store.delete(&rec(1, "X")).unwrap());
    assert_eq!(store.scan(0).unwrap().records, 0);
}

#[test]
fn test_squash_shrinks_to_live_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.avl");
    let store = open(&path);

    for i in 0..40 {
        store.insert(&rec(i, "churn")).unwrap();
    }
    for i in 0..40 {
        if i % 4 != 0 {
            assert!(store.delete(&rec(i, "churn")).unwrap());
        }
    }
    store.squash().expect("squash");

    let slot_len = 2 * 24 + 16 + PAYLOAD as u64;
    let header_len = 64 + 2 * 8;
    let n_live = 10; // every fourth record survived
    let n_cursors = 1; // this handle
    let want = header_len + slot_len * (n_live + n_cursors);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), want);

    let by_num: Vec<i32> = collect(&store, 0).iter().map(|r| num(r)).collect();
    assert_eq!(by_num, vec![0, 4, 8, 12, 16, 20, 24, 28, 32, 36]);
    assert_eq!(store.scan(0).unwrap().faults, 0);
    assert_eq!(store.scan(1).unwrap().faults, 0);
}

#[test]
fn test_squash_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.avl");
    let store = open(&path);

    for i in 0..20 {
        store.insert(&rec(i, "gone")).unwrap();
    }
    for i in 5..20 {
        assert!(store.delete(&rec(i, "gone")).unwrap());
    }
    store.squash().unwrap();
    let len_once = std::fs::metadata(&path).unwrap().len();
    let dump_once = store.dump().unwrap();

    store.squash().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len_once);
    assert_eq!(store.dump().unwrap(), dump_once);
}

#[test]
fn test_two_handles_have_independent_cursors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.avl");
    let h1 = open(&path);
    let h2 = open(&path);
    seed_four(&h1);

    let mut b2 = rec(i32::MIN, "");
    assert!(h2.start_ge(0, &mut b2).unwrap());
    assert_eq!(num(&b2), 1);

    // h1 races ahead; h2's position must not move.
    let mut b1 = rec(i32::MIN, "");
    assert!(h1.start_ge(0, &mut b1).unwrap());
    assert!(h1.next(0, &mut b1).unwrap());
    assert!(h1.next(0, &mut b1).unwrap());
    assert_eq!(num(&b1), 3);

    assert!(h2.next(0, &mut b2).unwrap());
    assert_eq!(num(&b2), 2);
}

#[test]
fn test_sequential_reads_newest_to_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));
    for i in [10, 20, 30] {
        store.insert(&rec(i, "seq")).unwrap();
    }

    store.start_seq().unwrap();
    let mut buf = [0u8; PAYLOAD];
    let mut seen = Vec::new();
    while store.read_seq(&mut buf).unwrap() {
        seen.push(num(&buf));
    }
    assert_eq!(seen, vec![30, 20, 10]);

    // The position is consumed; another pass needs another start.
    assert!(!store.read_seq(&mut buf).unwrap());
    store.start_seq().unwrap();
    assert!(store.read_seq(&mut buf).unwrap());
    assert_eq!(num(&buf), 30);
}

#[test]
fn test_delete_steps_cursors_past_the_victim() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));
    for i in [1, 2, 3] {
        store.insert(&rec(i, "cur")).unwrap();
    }

    // Cursor sits on 1; its next pivot is 2. Deleting 2 must advance the
    // pivot to 3, not leave it dangling.
    let mut buf = rec(1, "");
    assert!(store.start_ge(0, &mut buf).unwrap());
    assert_eq!(num(&buf), 1);
    assert!(store.delete(&rec(2, "cur")).unwrap());
    assert!(store.next(0, &mut buf).unwrap());
    assert_eq!(num(&buf), 3);

    // Same for the sequential position: newest is 3, delete it mid-scan.
    store.start_seq().unwrap();
    assert!(store.delete(&rec(3, "cur")).unwrap());
    assert!(store.read_seq(&mut buf).unwrap());
    assert_eq!(num(&buf), 1);
}

#[test]
fn test_reopen_preserves_trees_and_tickets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.avl");

    let store = open(&path);
    seed_four(&store);
    let t1 = store.next_ticket().unwrap();
    let before0 = collect(&store, 0);
    let before1 = collect(&store, 1);
    drop(store);

    let store = open(&path);
    assert_eq!(collect(&store, 0), before0);
    assert_eq!(collect(&store, 1), before1);
    let t2 = store.next_ticket().unwrap();
    assert!(t2 > t1);
    assert_eq!(store.scan(0).unwrap().records, 4);
}

#[test]
fn test_update_rewrites_nonkey_bytes_only() {
    // 16-byte records: num + tag as before, then 4 free bytes the keys
    // ignore - the part update exists to change.
    let dir = tempfile::tempdir().unwrap();
    let order: Order = order2; // keys only look at the first 12 bytes
    let store = Store::open(dir.path().join("t.avl"), 16, 2, order).unwrap();

    let mut r = [0u8; 16];
    r[..4].copy_from_slice(&9i32.to_le_bytes());
    r[4..9].copy_from_slice(b"fixed");
    r[12..].copy_from_slice(b"old!");
    store.insert(&r).unwrap();

    let mut updated = r;
    updated[12..].copy_from_slice(b"new!");
    assert!(store.update(&updated).unwrap());

    let mut buf = r;
    assert!(store.find(0, &mut buf).unwrap());
    assert_eq!(&buf[12..], b"new!");

    // No record matches these keys: benign no-match.
    let mut missing = [0u8; 16];
    missing[..4].copy_from_slice(&77i32.to_le_bytes());
    assert!(!store.update(&missing).unwrap());
}

#[test]
fn test_keyless_store_works_sequentially() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("t.avl"), 8, 0, order2 as Order).unwrap();

    store.insert(b"record-a").unwrap();
    store.insert(b"record-b").unwrap();
    store.insert(b"record-c").unwrap();

    store.start_seq().unwrap();
    let mut buf = [0u8; 8];
    let mut seen = Vec::new();
    while store.read_seq(&mut buf).unwrap() {
        seen.push(buf);
    }
    assert_eq!(seen, vec![*b"record-c", *b"record-b", *b"record-a"]);

    // Deletion has no tree to search; it falls back to the list.
    assert!(store.delete(b"record-b").unwrap());
    assert!(!store.delete(b"record-b").unwrap());

    store.start_seq().unwrap();
    let mut seen = Vec::new();
    while store.read_seq(&mut buf).unwrap() {
        seen.push(buf);
    }
    assert_eq!(seen, vec![*b"record-c", *b"record-a"]);
}

#[test]
fn test_squash_relocates_own_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.avl");

    // h1's cursor lands in the first slot; three records follow; h2's
    // cursor becomes the tail slot. Closing h1 frees the first slot, so
    // h2's squash must move its own cursor down into it.
    let h1 = open(&path);
    for i in [1, 2, 3] {
        h1.insert(&rec(i, "mv")).unwrap();
    }
    let h2 = open(&path);
    drop(h1);

    h2.squash().unwrap();

    let slot_len = 2 * 24 + 16 + PAYLOAD as u64;
    let header_len = 64 + 2 * 8;
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        header_len + slot_len * 4 // 3 records + h2's cursor
    );

    // The relocated cursor still navigates.
    let mut buf = rec(2, "");
    assert!(h2.start_ge(0, &mut buf).unwrap());
    assert_eq!(num(&buf), 2);
    assert!(h2.next(0, &mut buf).unwrap());
    assert_eq!(num(&buf), 3);
}

#[test]
fn test_caller_errors_leave_handle_usable() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));
    store.insert(&rec(1, "ok")).unwrap();

    let mut buf = [0u8; PAYLOAD];
    assert!(matches!(
        store.next(7, &mut buf),
        Err(StoreError::KeyOutOfRange { key: 7, n_keys: 2 })
    ));

    let mut short = [0u8; 4];
    assert!(matches!(
        store.find(0, &mut short),
        Err(StoreError::PayloadLength { expected: PAYLOAD, got: 4 })
    ));

    // Still works afterwards.
    let mut buf = rec(1, "");
    assert!(store.find(0, &mut buf).unwrap());
}

#[test]
fn test_geometry_checked_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.avl");
    drop(open(&path));

    let order: Order = order2;
    // Different payload length: slot geometry cannot match.
    assert!(matches!(
        Store::open(&path, 20, 2, order),
        Err(StoreError::SlotLenMismatch { .. })
    ));
    // Same slot length through a different split: key count must differ.
    // 2 keys * 24 + 16 + 12 == 1 key * 24 + 16 + 36
    assert!(matches!(
        Store::open(&path, 36, 1, order),
        Err(StoreError::KeyCountMismatch { file: 2, requested: 1 })
    ));
}

#[test]
fn test_non_store_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk");
    std::fs::write(&path, b"this is not a store file at all").unwrap();

    let order: Order = order2;
    assert!(matches!(
        Store::open(&path, 12, 2, order),
        Err(StoreError::BadMagic(_))
    ));
}

#[test]
fn test_user_lock_spans_operations() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));

    store.lock().unwrap();
    store.insert(&rec(1, "crit")).unwrap();
    store.insert(&rec(2, "crit")).unwrap();
    store.unlock().unwrap();

    assert_eq!(store.scan(0).unwrap().records, 2);
}

#[test]
fn test_dump_mentions_every_live_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("t.avl"));
    seed_four(&store);

    let text = store.dump().unwrap();
    assert!(text.starts_with("hdr: n_keys 2, payload_len 12"));
    assert!(text.contains("n_live 4"));
    // one header pair + one line per slot (4 records + 1 cursor)
    assert_eq!(text.lines().count(), 2 + 5);
}
