// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record mutation: insert, update, delete.
//!
//! Deletion identifies its victim by full payload equality and locates it
//! in three phases of increasing cost (see `delete_op`); with duplicate
//! keys a single tree descent cannot be trusted to land on the right slot.

use crate::error::{fatal, Result, StoreError};
use crate::format::Cell;
use crate::order::RecordOrder;
use crate::store::Core;

impl<C: RecordOrder> Core<C> {
    /// Insert a new record: take a slot, push it on the sequential list
    /// head, splice it into every tree.
    pub(crate) fn insert_op(&mut self, payload: &[u8]) -> Result<()> {
        let mut hdr = self.load_header();
        if hdr.n_live == i64::MAX {
            return Err(StoreError::RecordLimit);
        }

        let (y, mut yr) = self.alloc_slot(&mut hdr);
        yr.prev = 0;
        yr.next = hdr.head_seq;
        if yr.next > 0 {
            let p = yr.next;
            let mut pr = self.load_slot(p);
            pr.prev = y;
            self.store_slot(p, &pr);
        }
        hdr.head_seq = y;

        yr.payload.copy_from_slice(payload);
        self.store_slot(y, &yr);

        for k in 0..self.geom.n_keys {
            self.tree_attach(&mut hdr, k, y);
        }

        hdr.n_live += 1;
        self.store_header(&hdr);
        Ok(())
    }

    /// Overwrite the payload of a record matching `payload` on every key.
    ///
    /// Keys are unchanged by construction (they all compare equal), so no
    /// tree is touched. Needs at least one key to search by.
    pub(crate) fn update_op(&mut self, payload: &[u8]) -> Result<bool> {
        if self.geom.n_keys == 0 {
            return Ok(false);
        }
        let hdr = self.load_header();
        let Some((y, mut yr)) = self.find_equal(hdr.roots[0], 0, payload, false) else {
            return Ok(false);
        };
        yr.payload.copy_from_slice(payload);
        self.store_slot(y, &yr);
        Ok(true)
    }

    /// Delete the record whose payload equals `payload` byte for byte.
    pub(crate) fn delete_op(&mut self, payload: &[u8]) -> Result<bool> {
        let mut hdr = self.load_header();

        // Phase 1: fast probe - one threaded-end candidate per key.
        let mut hit = self.probe_exact(&hdr, payload);

        // Phase 2: duplicate-tolerant search under each key.
        if hit.is_none() {
            for k in 0..self.geom.n_keys {
                hit = self.find_equal(hdr.roots[k], k, payload, true);
                if hit.is_some() {
                    break;
                }
            }
        }

        // Phase 3: linear sequential scan - the only option with no keys.
        if hit.is_none() {
            let mut a = hdr.head_seq;
            while a > 0 {
                let ar = self.load_slot(a);
                if ar.payload == payload {
                    hit = Some((a, ar));
                    break;
                }
                a = ar.next;
            }
        }

        let Some((y, yr)) = hit else {
            return Ok(false);
        };

        // In-order neighbours under every key, resolved while y's threads
        // are still intact; cursor fix-up and thread repair both need them.
        let nb: Vec<(i64, i64)> = (0..self.geom.n_keys)
            .map(|k| (self.pred_of(&yr, k), self.succ_of(&yr, k)))
            .collect();

        self.advance_cursors_past(&hdr, y, &yr, &nb);

        for k in 0..self.geom.n_keys {
            self.tree_detach(&mut hdr, k, y, &yr, nb[k].0, nb[k].1);
        }

        // Off the sequential list.
        if yr.next > 0 {
            let mut nr = self.load_slot(yr.next);
            nr.prev = yr.prev;
            self.store_slot(yr.next, &nr);
        }
        if hdr.head_seq == y {
            hdr.head_seq = yr.next;
        } else {
            if yr.prev <= 0 {
                fatal("sequential list does not reach the deleted record");
            }
            let mut pr = self.load_slot(yr.prev);
            pr.next = yr.next;
            self.store_slot(yr.prev, &pr);
        }

        // Onto the free list.
        let mut fr = yr;
        for cell in &mut fr.cells {
            *cell = Cell::free();
        }
        fr.prev = 0;
        fr.next = hdr.head_free;
        hdr.head_free = y;
        self.store_slot(y, &fr);

        hdr.n_live -= 1;
        self.store_header(&hdr);
        Ok(true)
    }
}
