// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compaction: reclaim free slots and shorten the file.
//!
//! Squash runs in two phases. Phase one reaps abandoned cursors - slots
//! stamped by a pid other than ours whose byte range nobody holds locked
//! anymore; their openers are gone. Phase two repeatedly takes the
//! highest-offset slot in the file and either truncates it away (it was
//! free), relocates it into the lowest free slot (a record, or this
//! opener's own cursor), or stops (another opener's live cursor - the
//! file cannot be shortened past a slot whose range someone else holds).
//!
//! Relocating a record means finding every pointer that names its old
//! offset: the per-key tree parent, the in-order neighbour threads on
//! both sides of every key, the two sequential-list neighbours, and any
//! cursor positions. Each complete iteration leaves every invariant
//! intact, so a squash interrupted between iterations costs nothing but
//! unreclaimed space.

use log::{debug, error};

use crate::error::fatal;
use crate::file::lock;
use crate::format::{Cell, Header, Slot};
use crate::order::RecordOrder;
use crate::store::cursor::{cursor_pid, PID_LEN};
use crate::store::Core;

impl<C: RecordOrder> Core<C> {
    pub(crate) fn squash_op(&mut self) {
        let mut hdr = self.load_header();
        self.reap_abandoned_cursors(&mut hdr);

        while hdr.head_free > 0 {
            self.store_header(&hdr);

            // One pass over the free list: lowest slot (the relocation
            // target) and highest slot, each with its list predecessor.
            let mut low = hdr.head_free;
            let mut low_prev: i64 = 0;
            let mut high = hdr.head_free;
            let mut high_prev: i64 = 0;
            let mut prev: i64 = 0;
            let mut sp = hdr.head_free;
            while sp > 0 {
                let spr = self.load_slot(sp);
                if sp <= low {
                    low = sp;
                    low_prev = prev;
                }
                if sp >= high {
                    high = sp;
                    high_prev = prev;
                }
                prev = sp;
                sp = spr.next;
            }

            let y = self.file.eof() as i64 - self.slot_len();
            let yr = self.load_slot(y);

            if y == high {
                // The tail slot is itself free: unlink and cut it off.
                if high_prev > 0 {
                    let mut pr = self.load_slot(high_prev);
                    pr.next = yr.next;
                    self.store_slot(high_prev, &pr);
                } else {
                    hdr.head_free = yr.next;
                }
                self.truncate_to(y);
                continue;
            }

            if y == self.cursor_at {
                self.relocate_own_cursor(&mut hdr, y, &yr, low, low_prev);
                self.truncate_to(y);
                continue;
            }

            if self.geom.n_keys == 0 {
                // No balance byte to consult; a cursor is only knowable
                // from the cursor list.
                let mut cp = hdr.head_cursor;
                let mut foreign_cursor = false;
                while cp > 0 {
                    if cp == y {
                        foreign_cursor = true;
                        break;
                    }
                    cp = self.load_slot(cp).next;
                }
                if foreign_cursor {
                    break;
                }
            } else {
                let tag = yr.cells[0].balance;
                if tag.abs() > 1 {
                    if !yr.is_cursor() {
                        error!("[SQUASH] slot at {y} has unknown tag {tag:#04x}");
                    }
                    break;
                }
            }

            self.relocate_record(&mut hdr, y, &yr, low, low_prev);
            self.truncate_to(y);
        }

        self.store_header(&hdr);
        debug!("[SQUASH] done, file length {}", self.file.eof());
    }

    /// Phase one: free every cursor slot whose owner is gone. Gone means a
    /// different pid in the stamp and nobody holding the slot's byte-range
    /// lock.
    fn reap_abandoned_cursors(&mut self, hdr: &mut Header) {
        if self.geom.payload_len < PID_LEN {
            return;
        }
        let pid = std::process::id() as libc::pid_t;
        let mut kept: i64 = 0;
        let mut cp = hdr.head_cursor;
        while cp > 0 {
            let cpr = self.load_slot(cp);
            let next = cpr.next;

            let abandoned = cursor_pid(&cpr) != pid
                && !lock::range_is_locked(self.file.file(), cp, self.slot_len()).unwrap_or(true);
            if abandoned {
                if kept > 0 {
                    let mut kr = self.load_slot(kept);
                    kr.next = next;
                    self.store_slot(kept, &kr);
                } else {
                    hdr.head_cursor = next;
                }
                let mut fr = cpr;
                for cell in &mut fr.cells {
                    *cell = Cell::free();
                }
                fr.next = hdr.head_free;
                hdr.head_free = cp;
                self.store_slot(cp, &fr);
                debug!("[SQUASH] reaped abandoned cursor at {cp}");
            } else {
                kept = cp;
            }
            cp = next;
        }
    }

    /// Move this opener's own cursor from the tail slot `y` into the free
    /// slot `low`, carrying the byte-range lock along.
    fn relocate_own_cursor(&mut self, hdr: &mut Header, y: i64, yr: &Slot, low: i64, low_prev: i64) {
        let _ = lock::unlock_range(self.file.file(), y, self.slot_len());

        if hdr.head_cursor == y {
            hdr.head_cursor = yr.next;
        } else {
            let mut sp = hdr.head_cursor;
            while sp > 0 {
                let mut spr = self.load_slot(sp);
                if spr.next == y {
                    spr.next = yr.next;
                    self.store_slot(sp, &spr);
                    break;
                }
                sp = spr.next;
            }
        }

        self.unlink_free(hdr, low, low_prev);

        let mut moved = yr.clone();
        moved.next = hdr.head_cursor;
        hdr.head_cursor = low;
        self.cursor_at = low;
        self.store_slot(low, &moved);

        if let Err(e) = lock::lock_range(self.file.file(), low, self.slot_len()) {
            fatal(&format!("relocking relocated cursor failed: {e}"));
        }
        debug!("[SQUASH] own cursor moved {y} -> {low}");
    }

    /// Move the record in the tail slot `y` into the free slot `low`,
    /// rewriting every pointer that names `y`.
    fn relocate_record(&mut self, hdr: &mut Header, y: i64, yr: &Slot, low: i64, low_prev: i64) {
        self.unlink_free(hdr, low, low_prev);
        self.store_slot(low, yr);

        // Sequential neighbours.
        if yr.next > 0 {
            let mut zr = self.load_slot(yr.next);
            if zr.prev != y {
                fatal("sequential backlink does not match during squash");
            }
            zr.prev = low;
            self.store_slot(yr.next, &zr);
        }
        if yr.prev > 0 {
            let mut zr = self.load_slot(yr.prev);
            if zr.next != y {
                fatal("sequential forward link does not match during squash");
            }
            zr.next = low;
            self.store_slot(yr.prev, &zr);
        } else {
            hdr.head_seq = low;
        }

        // Per key: the parent's child pointer and the neighbours' threads.
        for k in 0..self.geom.n_keys {
            let Some(path) = self.path_to_slot(hdr.roots[k], k, &yr.payload, y) else {
                error!("[SQUASH] record at {y} missing from tree {k}, leaving that tree alone");
                continue;
            };
            let l = path.len() - 1;
            if l > 0 {
                let mut parent = path[l - 1].slot.clone();
                let pat = path[l - 1].at;
                if parent.cells[k].left == y {
                    parent.cells[k].left = low;
                } else {
                    parent.cells[k].right = low;
                }
                self.store_slot(pat, &parent);
            } else {
                hdr.roots[k] = low;
            }

            let mut sp = yr.cells[k].left;
            if sp > 0 {
                let mut sr = self.load_slot(sp);
                while sr.cells[k].right > 0 {
                    sp = sr.cells[k].right;
                    sr = self.load_slot(sp);
                }
                sr.cells[k].right = -low;
                self.store_slot(sp, &sr);
            }

            let mut sp = yr.cells[k].right;
            if sp > 0 {
                let mut sr = self.load_slot(sp);
                while sr.cells[k].left > 0 {
                    sp = sr.cells[k].left;
                    sr = self.load_slot(sp);
                }
                sr.cells[k].left = -low;
                self.store_slot(sp, &sr);
            }
        }

        self.redirect_cursors(hdr, y, low);
    }

    fn unlink_free(&mut self, hdr: &mut Header, low: i64, low_prev: i64) {
        let next = self.load_slot(low).next;
        if low_prev > 0 {
            let mut pr = self.load_slot(low_prev);
            pr.next = next;
            self.store_slot(low_prev, &pr);
        } else {
            hdr.head_free = next;
        }
    }

    fn truncate_to(&mut self, len: i64) {
        if let Err(e) = self.file.truncate(len as u64) {
            fatal(&format!("truncate to {len} failed: {e}"));
        }
    }
}
