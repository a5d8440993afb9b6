// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-only diagnostics: tree audit and file dump.
//!
//! The audit walks one key's tree in post-order with an explicit,
//! depth-bounded stack, recomputing every subtree height from the leaves
//! up. Findings that would be fatal anywhere else (balance byte not equal
//! to the height difference, node count diverging from the header) are
//! only counted and logged here: the audit exists to describe damage, not
//! to react to it.

use std::fmt::Write as _;

use crate::error::fatal;
use crate::format::MAX_DEPTH;
use crate::order::RecordOrder;
use crate::store::Core;

/// Result of auditing one key's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Height of the tree (0 when empty)
    pub height: u64,
    /// Nodes visited
    pub records: u64,
    /// Balance-byte mismatches plus count mismatches found
    pub faults: u64,
}

struct Frame {
    at: i64,
    balance: i8,
    left: i64,
    right: i64,
    hl: u64,
    hr: u64,
    stage: u8,
}

impl<C: RecordOrder> Core<C> {
    pub(crate) fn scan_op(&mut self, k: usize) -> ScanReport {
        let hdr = self.load_header();
        let mut records: u64 = 0;
        let mut faults: u64 = 0;

        let height = if hdr.roots[k] > 0 {
            self.scan_subtree(k, hdr.roots[k], &mut records, &mut faults)
        } else {
            0
        };

        if records != hdr.n_live as u64 {
            log::error!(
                "[AUDIT] key {k}: visited {records} records, header counts {}",
                hdr.n_live
            );
            faults += 1;
        }
        ScanReport { height, records, faults }
    }

    fn scan_subtree(&self, k: usize, root: i64, records: &mut u64, faults: &mut u64) -> u64 {
        let mut stack: Vec<Frame> = Vec::new();
        self.push_frame(&mut stack, k, root, records);

        loop {
            let top = stack.last_mut().expect("scan stack underflow");
            match top.stage {
                0 => {
                    top.stage = 1;
                    let left = top.left;
                    if left > 0 {
                        self.push_frame(&mut stack, k, left, records);
                    }
                }
                1 => {
                    top.stage = 2;
                    let right = top.right;
                    if right > 0 {
                        self.push_frame(&mut stack, k, right, records);
                    }
                }
                _ => {
                    let done = stack.pop().expect("scan stack underflow");
                    if i64::from(done.balance) != done.hl as i64 - done.hr as i64 {
                        log::error!(
                            "[AUDIT] key {k}: node at {} has balance {} for heights {}/{}",
                            done.at,
                            done.balance,
                            done.hl,
                            done.hr
                        );
                        *faults += 1;
                    }
                    let height = done.hl.max(done.hr);
                    match stack.last_mut() {
                        Some(parent) => {
                            if parent.stage == 1 {
                                parent.hl = 1 + height;
                            } else {
                                parent.hr = 1 + height;
                            }
                        }
                        None => return height,
                    }
                }
            }
        }
    }

    fn push_frame(&self, stack: &mut Vec<Frame>, k: usize, at: i64, records: &mut u64) {
        if stack.len() >= MAX_DEPTH {
            fatal("tree path exceeds the depth bound");
        }
        let slot = self.load_slot(at);
        *records += 1;
        stack.push(Frame {
            at,
            balance: slot.cells[k].balance,
            left: slot.cells[k].left,
            right: slot.cells[k].right,
            hl: 1,
            hr: 1,
            stage: 0,
        });
    }

    /// Render the header and every slot, one line each.
    pub(crate) fn dump_op(&mut self) -> String {
        let hdr = self.load_header();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "hdr: n_keys {}, payload_len {}, slot_len {}, n_live {}, next_ticket {}, \
             head_seq {}, head_free {}, head_cursor {}",
            self.geom.n_keys,
            self.geom.payload_len,
            self.geom.slot_len(),
            hdr.n_live,
            hdr.next_ticket,
            hdr.head_seq,
            hdr.head_free,
            hdr.head_cursor
        );
        let _ = write!(out, "hdr:");
        for (k, root) in hdr.roots.iter().enumerate() {
            let _ = write!(out, " {k:2}: {root:6} |");
        }
        let _ = writeln!(out);

        let slot_len = self.slot_len();
        let mut pos = self.geom.first_slot();
        while pos + slot_len <= self.file.eof() as i64 {
            let slot = self.load_slot(pos);
            let _ = write!(out, "  pos {pos:6}:");
            for (k, cell) in slot.cells.iter().enumerate() {
                let _ = write!(out, " {k:2}:{:3} {:6} {:6} |", cell.balance, cell.left, cell.right);
            }
            let _ = writeln!(out, "  prev {:6}, next {:6} |", slot.prev, slot.next);
            pos += slot_len;
        }
        out
    }
}
