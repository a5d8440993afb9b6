// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # avlstore - embedded single-file record store with multiple indexes
//!
//! One file holds a homogeneous collection of fixed-length records,
//! indexed by up to `n_keys` caller-defined orderings at once. Records can
//! be walked in unordered (insertion-recency) sequence, or per key in
//! sorted order with forward and backward stepping from independent
//! pivots. Multiple processes and threads may hold the same file open;
//! a byte-range lock serializes every operation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use avlstore::{Result, Store};
//! use std::cmp::Ordering;
//!
//! fn main() -> Result<()> {
//!     // 12-byte records: a 4-byte LE id followed by an 8-byte tag.
//!     // Key 0 orders by id, key 1 by tag then id.
//!     let order = |key: u32, a: &[u8], b: &[u8]| -> Ordering {
//!         let id = |r: &[u8]| i32::from_le_bytes(r[..4].try_into().unwrap());
//!         match key {
//!             0 => id(a).cmp(&id(b)),
//!             _ => a[4..].cmp(&b[4..]).then(id(a).cmp(&id(b))),
//!         }
//!     };
//!     let store = Store::open("inventory.avl", 12, 2, order)?;
//!
//!     let mut rec = [0u8; 12];
//!     rec[..4].copy_from_slice(&7i32.to_le_bytes());
//!     rec[4..].copy_from_slice(b"GNU/Linx");
//!     store.insert(&rec)?;
//!
//!     // Walk key 0 upward from id 0.
//!     let mut buf = [0u8; 12];
//!     let mut more = store.start_ge(0, &mut buf)?;
//!     while more {
//!         println!("{buf:?}");
//!         more = store.next(0, &mut buf)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                       Store<C> handle                        |
//! |   handle mutex -> byte-0 file lock -> one operation          |
//! +--------------------------------------------------------------+
//! |  tree engine   | cursors        | sequential list | compact  |
//! |  n threaded    | one slot per   | doubly linked,  | reap +   |
//! |  AVL trees     | opener, locked | newest first    | shrink   |
//! +--------------------------------------------------------------+
//! |         slot file: header + uniform slots, EOF watermark     |
//! +--------------------------------------------------------------+
//! ```
//!
//! Every slot in the file has the same length and is a tree node (live
//! record), a cursor (one per opener), or free, marked by a tag in the
//! balance byte. The trees share the slots: one record is a node of all
//! `n_keys` trees simultaneously, with null child pointers replaced by
//! in-order neighbour threads.
//!
//! ## Concurrency
//!
//! Blocking and synchronous throughout. One handle may be shared between
//! threads; distinct handles (same or different processes) are serialized
//! by an advisory byte-range lock on byte 0 of the file, making
//! operations linearizable in lock order. Byte 1 is never touched
//! internally and is exposed through [`Store::lock`] / [`Store::unlock`]
//! for caller-built critical sections.
//!
//! ## Durability
//!
//! None beyond the host's write ordering. The format is deliberately
//! non-recoverable: a writer killed mid-operation leaves a corrupt file,
//! and a reader that stumbles onto the damage aborts the process rather
//! than serve garbage. Keep the file on a filesystem you trust and the
//! writers on a UPS you trust, or treat the file as a cache.

mod compact;
mod error;
mod file;
mod format;
mod order;
mod store;
mod tree;

pub use error::{Result, StoreError};
pub use format::Geometry;
pub use order::{KeyId, RecordOrder};
pub use store::Store;
pub use tree::audit::ScanReport;
