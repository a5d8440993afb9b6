// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Store file header.
//!
//! # Layout
//!
//! ```text
//! Offset      Size  Field
//! 0           8     magic tag ("AVLSTORE")
//! 8           4     n_keys (u32)
//! 12          4     payload_len (u32)
//! 16          4     slot_len (u32)
//! 20          4     reserved (zero)
//! 24          8     n_live (i64) - live record count
//! 32          8     next_ticket (u64) - ascending record-id counter
//! 40          8*n   root[k] (i64) - tree roots, 0 = empty
//! 40 + 8*n    8     head_seq (i64) - sequential list head
//! 48 + 8*n    8     head_free (i64) - free list head
//! 56 + 8*n    8     head_cursor (i64) - cursor list head
//! ```
//!
//! The geometry prefix (bytes 0..24) sits at fixed offsets regardless of
//! key count, so a reopen can validate it before it knows how many root
//! words follow.

use super::{Geometry, MAGIC};

/// Mutable header state, geometry excluded.
///
/// Read once at the start of an operation, written back when the operation
/// changed counters, roots, or list heads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Number of live records (equals the node count of every tree)
    pub n_live: i64,
    /// Next value handed out by the ticket counter
    pub next_ticket: u64,
    /// Per-key tree root offsets, 0 when the tree is empty
    pub roots: Vec<i64>,
    /// Most recently inserted live record, 0 when none
    pub head_seq: i64,
    /// Free list head, 0 when none
    pub head_free: i64,
    /// Cursor list head, 0 when none
    pub head_cursor: i64,
}

impl Header {
    /// Fresh header for a newly created file.
    #[must_use]
    pub fn new(geom: &Geometry) -> Self {
        Self {
            n_live: 0,
            next_ticket: 0,
            roots: vec![0; geom.n_keys],
            head_seq: 0,
            head_free: 0,
            head_cursor: 0,
        }
    }

    /// Geometry prefix read from raw header bytes: `(magic, n_keys,
    /// payload_len, slot_len)`.
    ///
    /// `raw` must hold at least 24 bytes.
    #[must_use]
    pub fn read_prefix(raw: &[u8]) -> ([u8; 8], u32, u32, u32) {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&raw[0..8]);
        let n_keys = u32::from_ne_bytes(raw[8..12].try_into().unwrap());
        let payload_len = u32::from_ne_bytes(raw[12..16].try_into().unwrap());
        let slot_len = u32::from_ne_bytes(raw[16..20].try_into().unwrap());
        (magic, n_keys, payload_len, slot_len)
    }

    /// Decode the mutable fields from raw header bytes.
    ///
    /// The caller has already validated the prefix against `geom`.
    #[must_use]
    pub fn decode(geom: &Geometry, raw: &[u8]) -> Self {
        let n = geom.n_keys;
        let word = |at: usize| i64::from_ne_bytes(raw[at..at + 8].try_into().unwrap());
        let mut roots = Vec::with_capacity(n);
        for k in 0..n {
            roots.push(word(40 + 8 * k));
        }
        Self {
            n_live: word(24),
            next_ticket: word(32) as u64,
            roots,
            head_seq: word(40 + 8 * n),
            head_free: word(48 + 8 * n),
            head_cursor: word(56 + 8 * n),
        }
    }

    /// Encode the full header, geometry prefix included.
    #[must_use]
    pub fn encode(&self, geom: &Geometry) -> Vec<u8> {
        let n = geom.n_keys;
        let mut raw = vec![0u8; geom.header_len()];
        raw[0..8].copy_from_slice(&MAGIC);
        raw[8..12].copy_from_slice(&(n as u32).to_ne_bytes());
        raw[12..16].copy_from_slice(&(geom.payload_len as u32).to_ne_bytes());
        raw[16..20].copy_from_slice(&(geom.slot_len() as u32).to_ne_bytes());
        raw[24..32].copy_from_slice(&self.n_live.to_ne_bytes());
        raw[32..40].copy_from_slice(&self.next_ticket.to_ne_bytes());
        for (k, root) in self.roots.iter().enumerate() {
            raw[40 + 8 * k..48 + 8 * k].copy_from_slice(&root.to_ne_bytes());
        }
        raw[40 + 8 * n..48 + 8 * n].copy_from_slice(&self.head_seq.to_ne_bytes());
        raw[48 + 8 * n..56 + 8 * n].copy_from_slice(&self.head_free.to_ne_bytes());
        raw[56 + 8 * n..64 + 8 * n].copy_from_slice(&self.head_cursor.to_ne_bytes());
        raw
    }
}
