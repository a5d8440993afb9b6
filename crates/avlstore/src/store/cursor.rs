// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cursor slots: persistent per-opener navigation state.
//!
//! Each opener owns one slot on the cursor list for as long as its handle
//! lives. The slot's per-key cells hold resolved previous/next record
//! offsets (independent pivots for backward and forward stepping), `prev`
//! holds the sequential-scan position, and the payload area starts with
//! the owner's pid.
//!
//! The slot's byte range stays locked for the handle's lifetime. That lock
//! is the liveness signal: an opener that died without closing leaves an
//! unlocked cursor slot behind, which open() may recycle and squash will
//! reap. The pid stamp backs the lock test up on platforms where a lock
//! test cannot see locks held by the calling process itself.

use crate::error::{Result, StoreError};
use crate::file::lock;
use crate::format::{Cell, Header, Slot};
use crate::order::RecordOrder;
use crate::store::Core;

/// Bytes of the payload area reserved for the owner pid, when they fit.
pub(crate) const PID_LEN: usize = std::mem::size_of::<libc::pid_t>();

/// Positioning mode for `start_ge` / `start_lt`.
#[derive(Clone, Copy)]
pub(crate) enum Bound {
    LowestGe,
    HighestLt,
}

/// Stepping direction for `next` / `prev`.
#[derive(Clone, Copy)]
pub(crate) enum Dir {
    Forward,
    Backward,
}

/// Owner pid stamped in a cursor slot's payload prefix.
///
/// Only meaningful when the payload is at least [`PID_LEN`] bytes.
pub(crate) fn cursor_pid(slot: &Slot) -> libc::pid_t {
    libc::pid_t::from_ne_bytes(slot.payload[..PID_LEN].try_into().unwrap())
}

impl<C: RecordOrder> Core<C> {
    /// Acquire a cursor slot for this opener.
    ///
    /// Preference order: an abandoned cursor slot (stamped by a different
    /// pid and no longer lock-protected, recycled in place so the cursor
    /// list is untouched), then the free list, then the end of the file.
    pub(crate) fn acquire_cursor(&mut self, hdr: &mut Header) -> Result<()> {
        let pid = std::process::id() as libc::pid_t;

        let mut reused = None;
        if self.geom.payload_len >= PID_LEN {
            let mut cp = hdr.head_cursor;
            while cp > 0 {
                let cpr = self.load_slot(cp);
                if cursor_pid(&cpr) != pid
                    && !lock::range_is_locked(self.file.file(), cp, self.slot_len())
                        .map_err(StoreError::Lock)?
                {
                    reused = Some((cp, cpr));
                    break;
                }
                cp = cpr.next;
            }
        }

        let (at, mut slot) = match reused {
            Some(found) => found,
            None => {
                let (at, mut slot) = self.alloc_slot(hdr);
                slot.next = hdr.head_cursor;
                hdr.head_cursor = at;
                (at, slot)
            }
        };

        for cell in &mut slot.cells {
            *cell = Cell::cursor();
        }
        slot.prev = 0;
        slot.payload.fill(0);
        if self.geom.payload_len >= PID_LEN {
            slot.payload[..PID_LEN].copy_from_slice(&pid.to_ne_bytes());
        }
        self.store_slot(at, &slot);

        lock::lock_range(self.file.file(), at, self.slot_len()).map_err(StoreError::Lock)?;
        self.cursor_at = at;
        Ok(())
    }

    /// Release this opener's cursor slot: unlock its range, unlink it from
    /// the cursor list, return it to the free list.
    pub(crate) fn release_cursor(&mut self) {
        let mut hdr = self.load_header();
        let cp = self.cursor_at;
        let cpr = self.load_slot(cp);

        let _ = lock::unlock_range(self.file.file(), cp, self.slot_len());

        if hdr.head_cursor == cp {
            hdr.head_cursor = cpr.next;
        } else {
            let mut sp = hdr.head_cursor;
            while sp > 0 {
                let mut spr = self.load_slot(sp);
                if spr.next == cp {
                    spr.next = cpr.next;
                    self.store_slot(sp, &spr);
                    break;
                }
                sp = spr.next;
            }
        }

        let mut fr = cpr;
        for cell in &mut fr.cells {
            *cell = Cell::free();
        }
        fr.next = hdr.head_free;
        hdr.head_free = cp;
        self.store_slot(cp, &fr);
        self.store_header(&hdr);
    }

    /// Position the cursor under `key` at the boundary record for `buf`,
    /// overwriting `buf` with it on success. Both stepping pivots are
    /// re-seated (or cleared when nothing satisfies the bound).
    pub(crate) fn position_op(&mut self, k: usize, buf: &mut [u8], bound: Bound) -> Result<bool> {
        let hdr = self.load_header();
        let found = match bound {
            Bound::LowestGe => self.descend_ge(hdr.roots[k], k, buf),
            Bound::HighestLt => self.descend_lt(hdr.roots[k], k, buf),
        };

        let cp = self.cursor_at;
        let mut cpr = self.load_slot(cp);
        let ok = if found > 0 {
            let ar = self.load_slot(found);
            buf.copy_from_slice(&ar.payload);
            cpr.cells[k].left = self.pred_of(&ar, k);
            cpr.cells[k].right = self.succ_of(&ar, k);
            true
        } else {
            cpr.cells[k].left = 0;
            cpr.cells[k].right = 0;
            false
        };
        self.store_slot(cp, &cpr);
        Ok(ok)
    }

    /// Consume the cursor's pivot in `dir` under `key`: read that record
    /// into `buf` and advance the pivot to its neighbour. The opposite
    /// pivot is untouched.
    pub(crate) fn step_op(&mut self, k: usize, buf: &mut [u8], dir: Dir) -> Result<bool> {
        let cp = self.cursor_at;
        let mut cpr = self.load_slot(cp);
        let a = match dir {
            Dir::Forward => cpr.cells[k].right,
            Dir::Backward => cpr.cells[k].left,
        };
        if a <= 0 {
            return Ok(false);
        }
        let ar = self.load_slot(a);
        buf.copy_from_slice(&ar.payload);
        match dir {
            Dir::Forward => cpr.cells[k].right = self.succ_of(&ar, k),
            Dir::Backward => cpr.cells[k].left = self.pred_of(&ar, k),
        }
        self.store_slot(cp, &cpr);
        Ok(true)
    }

    /// Step every cursor that references the doomed record at `y` past it:
    /// per-key pivots move to y's in-order neighbours (`nb`), sequential
    /// positions move to y's sequential successor. Runs before `y` leaves
    /// any tree, while its threads still resolve.
    pub(crate) fn advance_cursors_past(
        &mut self,
        hdr: &Header,
        y: i64,
        yr: &Slot,
        nb: &[(i64, i64)],
    ) {
        let mut cp = hdr.head_cursor;
        while cp > 0 {
            let mut cpr = self.load_slot(cp);
            let mut touched = false;

            if cpr.prev == y {
                cpr.prev = yr.next;
                touched = true;
            }
            for (k, &(pred, succ)) in nb.iter().enumerate() {
                if cpr.cells[k].left == y {
                    cpr.cells[k].left = pred;
                    touched = true;
                }
                if cpr.cells[k].right == y {
                    cpr.cells[k].right = succ;
                    touched = true;
                }
            }

            if touched {
                self.store_slot(cp, &cpr);
            }
            cp = cpr.next;
        }
    }

    /// Rewrite every cursor reference to `y` as `to`. Used when squash
    /// relocates a record without removing it.
    pub(crate) fn redirect_cursors(&mut self, hdr: &Header, y: i64, to: i64) {
        let mut cp = hdr.head_cursor;
        while cp > 0 {
            let mut cpr = self.load_slot(cp);
            let mut touched = false;

            if cpr.prev == y {
                cpr.prev = to;
                touched = true;
            }
            for cell in &mut cpr.cells {
                if cell.left == y {
                    cell.left = to;
                    touched = true;
                }
                if cell.right == y {
                    cell.right = to;
                    touched = true;
                }
            }

            if touched {
                self.store_slot(cp, &cpr);
            }
            cp = cpr.next;
        }
    }
}
