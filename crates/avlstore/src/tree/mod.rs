// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The threaded AVL engine.
//!
//! Every live record is a node in `n_keys` trees at once; each tree is
//! ordered by the caller's comparator for its key and kept within AVL
//! balance. Null child pointers do not exist - where a child is missing,
//! the link word carries a negated in-order neighbour offset (a thread) or
//! zero at the ends, so ordered traversal needs no parent pointers and no
//! stack.
//!
//! The algorithms are the non-recursive threaded insertion and deletion
//! of Horowitz & Sahni, run once per key over the same slot:
//!
//! - insertion descends once, remembering the deepest ancestor whose
//!   balance is non-zero; only that ancestor can need a rotation;
//! - deletion promotes the in-order predecessor (or successor), then
//!   walks the recorded path upward, rotating wherever the balance hits
//!   two and stopping as soon as a subtree keeps its height;
//! - because duplicate keys are legal, locating a specific slot cannot
//!   rely on a single descent: every node comparing equal on the way down
//!   is stacked as a candidate, and each failed candidate resumes the
//!   descent in its right subtree (ties insert to the right, so equals
//!   always lie rightward).
//!
//! All paths are bounded by [`MAX_DEPTH`]; a deeper path cannot be
//! produced by these algorithms and is treated as corruption.

pub(crate) mod audit;

use std::cmp::Ordering;

use crate::error::fatal;
use crate::format::{Cell, Slot, MAX_DEPTH};
use crate::order::RecordOrder;
use crate::store::Core;

/// One step of a root-to-node path, with its in-memory slot copy.
pub(crate) struct PathEntry {
    pub at: i64,
    pub slot: Slot,
}

fn check_depth(depth: usize) {
    if depth >= MAX_DEPTH {
        fatal("tree path exceeds the depth bound");
    }
}

impl<C: RecordOrder> Core<C> {
    /// Resolve the in-order predecessor of a node under `key`: rightmost
    /// of the left subtree, or the left thread. Returns 0 at the lower
    /// end of the tree.
    pub(crate) fn pred_of(&self, slot: &Slot, k: usize) -> i64 {
        let mut sp = slot.cells[k].left;
        if sp <= 0 {
            return -sp;
        }
        let mut depth = 0;
        let mut sr = self.load_slot(sp);
        while sr.cells[k].right > 0 {
            check_depth(depth);
            depth += 1;
            sp = sr.cells[k].right;
            sr = self.load_slot(sp);
        }
        sp
    }

    /// Resolve the in-order successor of a node under `key`.
    pub(crate) fn succ_of(&self, slot: &Slot, k: usize) -> i64 {
        let mut sp = slot.cells[k].right;
        if sp <= 0 {
            return -sp;
        }
        let mut depth = 0;
        let mut sr = self.load_slot(sp);
        while sr.cells[k].left > 0 {
            check_depth(depth);
            depth += 1;
            sp = sr.cells[k].left;
            sr = self.load_slot(sp);
        }
        sp
    }

    /// Descend for the lowest node whose key is `>= probe`. Returns its
    /// offset, or 0 when every node compares below the probe.
    pub(crate) fn descend_ge(&self, root: i64, k: usize, probe: &[u8]) -> i64 {
        let mut a = root;
        let mut depth = 0;
        while a > 0 {
            check_depth(depth);
            depth += 1;
            let ar = self.load_slot(a);
            if self.cmp(k, probe, &ar.payload) != Ordering::Greater {
                if ar.cells[k].left > 0 {
                    a = ar.cells[k].left;
                } else {
                    break;
                }
            } else if ar.cells[k].right > 0 {
                a = ar.cells[k].right;
            } else {
                // the satisfying node, if any, is this node's successor
                a = -ar.cells[k].right;
                break;
            }
        }
        a
    }

    /// Descend for the highest node whose key is `< probe`. Returns its
    /// offset, or 0 when every node compares at or above the probe.
    pub(crate) fn descend_lt(&self, root: i64, k: usize, probe: &[u8]) -> i64 {
        let mut a = root;
        let mut depth = 0;
        while a > 0 {
            check_depth(depth);
            depth += 1;
            let ar = self.load_slot(a);
            if self.cmp(k, probe, &ar.payload) != Ordering::Greater {
                if ar.cells[k].left > 0 {
                    a = ar.cells[k].left;
                } else {
                    a = -ar.cells[k].left;
                    break;
                }
            } else if ar.cells[k].right > 0 {
                a = ar.cells[k].right;
            } else {
                break;
            }
        }
        a
    }

    /// Fast probe for a byte-identical record: under each key in turn,
    /// take the single threaded-end candidate and test it. Cheap, but with
    /// duplicate keys it can miss; callers fall back to
    /// [`Core::find_equal`].
    pub(crate) fn probe_exact(&self, hdr: &crate::format::Header, payload: &[u8]) -> Option<(i64, Slot)> {
        for k in 0..self.geom.n_keys {
            let a = self.descend_ge(hdr.roots[k], k, payload);
            if a > 0 {
                let ar = self.load_slot(a);
                if self.cmp(k, payload, &ar.payload) == Ordering::Equal && ar.payload == payload {
                    return Some((a, ar));
                }
            }
        }
        None
    }

    /// Duplicate-tolerant search under `key` for a record whose *every*
    /// key compares equal to `payload` (and, when `require_bytes`, whose
    /// payload matches byte for byte).
    pub(crate) fn find_equal(
        &self,
        root: i64,
        k: usize,
        payload: &[u8],
        require_bytes: bool,
    ) -> Option<(i64, Slot)> {
        let mut path: Vec<PathEntry> = Vec::new();
        let mut candidates: Vec<usize> = Vec::new();
        let mut cur = root;
        loop {
            while cur > 0 {
                check_depth(path.len());
                let slot = self.load_slot(cur);
                let ord = self.cmp(k, payload, &slot.payload);
                path.push(PathEntry { at: cur, slot });
                let l = path.len() - 1;
                if ord != Ordering::Greater {
                    if ord == Ordering::Equal {
                        candidates.push(l);
                    }
                    cur = path[l].slot.cells[k].left;
                } else {
                    cur = path[l].slot.cells[k].right;
                }
            }
            let l = candidates.pop()?;
            let keys_equal = (0..self.geom.n_keys)
                .all(|i| self.cmp(i, payload, &path[l].slot.payload) == Ordering::Equal);
            if keys_equal && (!require_bytes || path[l].slot.payload == payload) {
                let hit = path.swap_remove(l);
                return Some((hit.at, hit.slot));
            }
            cur = path[l].slot.cells[k].right;
            path.truncate(l + 1);
        }
    }

    /// Root-to-`target` path under `key`, searching by `payload` and
    /// disambiguating duplicates by offset. `None` when `target` is not
    /// reachable in this tree.
    pub(crate) fn path_to_slot(
        &self,
        root: i64,
        k: usize,
        payload: &[u8],
        target: i64,
    ) -> Option<Vec<PathEntry>> {
        let mut path: Vec<PathEntry> = Vec::new();
        let mut candidates: Vec<usize> = Vec::new();
        let mut cur = root;
        loop {
            while cur > 0 {
                check_depth(path.len());
                let slot = self.load_slot(cur);
                let ord = self.cmp(k, payload, &slot.payload);
                path.push(PathEntry { at: cur, slot });
                let l = path.len() - 1;
                if ord != Ordering::Greater {
                    if ord == Ordering::Equal {
                        candidates.push(l);
                    }
                    cur = path[l].slot.cells[k].left;
                } else {
                    cur = path[l].slot.cells[k].right;
                }
            }
            let l = candidates.pop()?;
            if path[l].at == target {
                path.truncate(l + 1);
                return Some(path);
            }
            cur = path[l].slot.cells[k].right;
            path.truncate(l + 1);
        }
    }

    /// Splice the record at `y` into the tree for `key`, rebalancing.
    ///
    /// `y`'s slot is already on disk with its payload in place; this
    /// initializes its cell for `key`. Equal keys descend right, so a new
    /// duplicate lands after its equals in traversal order.
    pub(crate) fn tree_attach(&mut self, hdr: &mut crate::format::Header, k: usize, y: i64) {
        let mut yr = self.load_slot(y);

        if hdr.roots[k] == 0 {
            yr.cells[k] = Cell::default();
            hdr.roots[k] = y;
            self.store_slot(y, &yr);
            return;
        }

        // Descend, remembering the deepest ancestor `a` with a non-zero
        // balance (the only rotation candidate), `a`'s parent `f`, and the
        // attach parent `q`.
        let mut a = hdr.roots[k];
        let mut f: i64 = 0;
        let mut p = hdr.roots[k];
        let mut q: i64 = 0;
        let mut qr = Slot::new(&self.geom);
        let mut depth = 0;
        while p > 0 {
            check_depth(depth);
            depth += 1;
            let pr = self.load_slot(p);
            if pr.cells[k].balance != 0 {
                a = p;
                f = q;
            }
            let step = if self.cmp(k, &yr.payload, &pr.payload) == Ordering::Less {
                pr.cells[k].left
            } else {
                pr.cells[k].right
            };
            q = p;
            qr = pr;
            p = step;
        }

        // Attach under `q`. The side's former link (`p`, a thread or 0)
        // becomes y's outer thread; q becomes the inner one.
        if self.cmp(k, &yr.payload, &qr.payload) == Ordering::Less {
            yr.cells[k] = Cell { balance: 0, left: p, right: -q };
            qr.cells[k].left = y;
        } else {
            yr.cells[k] = Cell { balance: 0, left: -q, right: p };
            qr.cells[k].right = y;
        }
        self.store_slot(y, &yr);
        self.store_slot(q, &qr);

        // q may be a itself; reload so the fresh child link is visible.
        let mut ar = self.load_slot(a);
        let (b, d): (i64, i8) = if self.cmp(k, &yr.payload, &ar.payload) == Ordering::Less {
            (ar.cells[k].left, 1)
        } else {
            (ar.cells[k].right, -1)
        };

        // Everything strictly between a and y had balance 0; tip each
        // toward the insertion.
        let mut walk = b;
        let mut depth = 0;
        while walk != y {
            check_depth(depth);
            depth += 1;
            let mut wr = self.load_slot(walk);
            if self.cmp(k, &yr.payload, &wr.payload) == Ordering::Less {
                wr.cells[k].balance = 1;
                self.store_slot(walk, &wr);
                walk = wr.cells[k].left;
            } else {
                wr.cells[k].balance = -1;
                self.store_slot(walk, &wr);
                walk = wr.cells[k].right;
            }
        }

        if ar.cells[k].balance == 0 {
            ar.cells[k].balance = d;
            self.store_slot(a, &ar);
            return;
        }
        if ar.cells[k].balance + d == 0 {
            ar.cells[k].balance = 0;
            self.store_slot(a, &ar);
            return;
        }

        // a went to +/-2: rotate.
        let sub = if d == 1 {
            let mut br = self.load_slot(b);
            if br.cells[k].balance == 1 {
                // single rotation right
                ar.cells[k].left = if br.cells[k].right > 0 { br.cells[k].right } else { -b };
                br.cells[k].right = a;
                ar.cells[k].balance = 0;
                br.cells[k].balance = 0;
                self.store_slot(a, &ar);
                self.store_slot(b, &br);
                b
            } else {
                self.rotate_double_left_heavy(k, a, &mut ar, b, &mut br)
            }
        } else {
            let mut br = self.load_slot(b);
            if br.cells[k].balance == -1 {
                // single rotation left
                ar.cells[k].right = if br.cells[k].left > 0 { br.cells[k].left } else { -b };
                br.cells[k].left = a;
                ar.cells[k].balance = 0;
                br.cells[k].balance = 0;
                self.store_slot(a, &ar);
                self.store_slot(b, &br);
                b
            } else {
                self.rotate_double_right_heavy(k, a, &mut ar, b, &mut br)
            }
        };

        if f == 0 {
            hdr.roots[k] = sub;
        } else {
            let mut fr = self.load_slot(f);
            if fr.cells[k].left == a {
                fr.cells[k].left = sub;
            } else if fr.cells[k].right == a {
                fr.cells[k].right = sub;
            }
            self.store_slot(f, &fr);
        }
    }

    /// Double rotation for a left-heavy `a` whose left child `b` leans
    /// right: the inner grandchild `c` becomes the subtree root. Returns
    /// `c`. Writes all three nodes.
    fn rotate_double_left_heavy(
        &mut self,
        k: usize,
        a: i64,
        ar: &mut Slot,
        b: i64,
        br: &mut Slot,
    ) -> i64 {
        let c = br.cells[k].right;
        let mut cr = self.load_slot(c);
        br.cells[k].right = if cr.cells[k].left > 0 { cr.cells[k].left } else { -c };
        ar.cells[k].left = if cr.cells[k].right > 0 { cr.cells[k].right } else { -c };
        cr.cells[k].left = b;
        cr.cells[k].right = a;
        match cr.cells[k].balance {
            1 => {
                ar.cells[k].balance = -1;
                br.cells[k].balance = 0;
            }
            -1 => {
                br.cells[k].balance = 1;
                ar.cells[k].balance = 0;
            }
            0 => {
                ar.cells[k].balance = 0;
                br.cells[k].balance = 0;
            }
            bal => fatal(&format!("impossible balance {bal} in rotation, key {k}")),
        }
        cr.cells[k].balance = 0;
        self.store_slot(a, ar);
        self.store_slot(b, br);
        self.store_slot(c, &cr);
        c
    }

    /// Mirror of [`Core::rotate_double_left_heavy`] for a right-heavy `a`.
    fn rotate_double_right_heavy(
        &mut self,
        k: usize,
        a: i64,
        ar: &mut Slot,
        b: i64,
        br: &mut Slot,
    ) -> i64 {
        let c = br.cells[k].left;
        let mut cr = self.load_slot(c);
        ar.cells[k].right = if cr.cells[k].left > 0 { cr.cells[k].left } else { -c };
        br.cells[k].left = if cr.cells[k].right > 0 { cr.cells[k].right } else { -c };
        cr.cells[k].right = b;
        cr.cells[k].left = a;
        match cr.cells[k].balance {
            1 => {
                br.cells[k].balance = -1;
                ar.cells[k].balance = 0;
            }
            -1 => {
                ar.cells[k].balance = 1;
                br.cells[k].balance = 0;
            }
            0 => {
                ar.cells[k].balance = 0;
                br.cells[k].balance = 0;
            }
            bal => fatal(&format!("impossible balance {bal} in rotation, key {k}")),
        }
        cr.cells[k].balance = 0;
        self.store_slot(a, ar);
        self.store_slot(b, br);
        self.store_slot(c, &cr);
        c
    }

    /// Unlink the record at `y` from the tree for `key`, rebalancing.
    ///
    /// `yr` is the caller's copy of the doomed slot; `pred` and `succ` are
    /// its in-order neighbours under `key`, resolved before any change.
    /// Only link words move - the slot itself keeps its file position.
    pub(crate) fn tree_detach(
        &mut self,
        hdr: &mut crate::format::Header,
        k: usize,
        y: i64,
        yr: &Slot,
        pred: i64,
        succ: i64,
    ) {
        let Some(mut path) = self.path_to_slot(hdr.roots[k], k, &yr.payload, y) else {
            fatal(&format!("record at {y} missing from tree {k}"));
        };
        let m = path.len() - 1;
        let mut ycell = yr.cells[k];
        let mut l: isize;

        if ycell.left > 0 {
            // Promote the in-order predecessor out of the left subtree.
            let mut at = ycell.left;
            path.push(PathEntry { at, slot: self.load_slot(at) });
            while path[path.len() - 1].slot.cells[k].right > 0 {
                check_depth(path.len());
                at = path[path.len() - 1].slot.cells[k].right;
                path.push(PathEntry { at, slot: self.load_slot(at) });
            }
            let last = path.len() - 1;
            if last > m + 1 {
                // Deep on the right spine: splice it off its parent.
                let spliced_at = path[last].at;
                let spliced_left = path[last].slot.cells[k].left;
                let parent = &mut path[last - 1];
                parent.slot.cells[k].right =
                    if spliced_left > 0 { spliced_left } else { -spliced_at };
                parent.slot.cells[k].balance += 1;
                let (pat, pslot) = (parent.at, parent.slot.clone());
                self.store_slot(pat, &pslot);
            } else {
                // y's left child is itself the predecessor.
                ycell.left = path[last].slot.cells[k].left;
                ycell.balance -= 1;
            }
            let promoted_at = path[last].at;
            let mut promoted = path[last].slot.clone();
            promoted.cells[k] = ycell;
            self.store_slot(promoted_at, &promoted);
            path[m] = PathEntry { at: promoted_at, slot: promoted };
            path.truncate(last);
            l = last as isize - 1;

            // The successor's back-thread still names y.
            if yr.cells[k].right > 0 {
                let mut sr = self.load_slot(succ);
                sr.cells[k].left = -promoted_at;
                self.store_slot(succ, &sr);
            }

            if m == 0 {
                hdr.roots[k] = promoted_at;
            } else {
                let parent = &mut path[m - 1];
                if parent.slot.cells[k].left == y {
                    parent.slot.cells[k].left = promoted_at;
                } else {
                    parent.slot.cells[k].right = promoted_at;
                }
                let (pat, pslot) = (parent.at, parent.slot.clone());
                self.store_slot(pat, &pslot);
            }
        } else if ycell.right > 0 {
            // Promote the in-order successor out of the right subtree.
            let mut at = ycell.right;
            path.push(PathEntry { at, slot: self.load_slot(at) });
            while path[path.len() - 1].slot.cells[k].left > 0 {
                check_depth(path.len());
                at = path[path.len() - 1].slot.cells[k].left;
                path.push(PathEntry { at, slot: self.load_slot(at) });
            }
            let last = path.len() - 1;
            if last > m + 1 {
                let spliced_at = path[last].at;
                let spliced_right = path[last].slot.cells[k].right;
                let parent = &mut path[last - 1];
                parent.slot.cells[k].left =
                    if spliced_right > 0 { spliced_right } else { -spliced_at };
                parent.slot.cells[k].balance -= 1;
                let (pat, pslot) = (parent.at, parent.slot.clone());
                self.store_slot(pat, &pslot);
            } else {
                ycell.right = path[last].slot.cells[k].right;
                ycell.balance += 1;
            }
            let promoted_at = path[last].at;
            let mut promoted = path[last].slot.clone();
            promoted.cells[k] = ycell;
            self.store_slot(promoted_at, &promoted);
            path[m] = PathEntry { at: promoted_at, slot: promoted };
            path.truncate(last);
            l = last as isize - 1;

            // The predecessor's forward-thread still names y.
            if yr.cells[k].left > 0 {
                let mut sr = self.load_slot(pred);
                sr.cells[k].right = -promoted_at;
                self.store_slot(pred, &sr);
            }

            if m == 0 {
                hdr.roots[k] = promoted_at;
            } else {
                let parent = &mut path[m - 1];
                if parent.slot.cells[k].left == y {
                    parent.slot.cells[k].left = promoted_at;
                } else {
                    parent.slot.cells[k].right = promoted_at;
                }
                let (pat, pslot) = (parent.at, parent.slot.clone());
                self.store_slot(pat, &pslot);
            }
        } else {
            // Leaf. The parent inherits y's thread on the attach side; the
            // neighbours' threads already bypass y (a leaf's threaded
            // neighbour on the parent side is the parent itself, and the
            // other neighbour reaches y only through a child pointer).
            if m == 0 {
                hdr.roots[k] = 0;
            } else {
                let parent = &mut path[m - 1];
                if parent.slot.cells[k].left == y {
                    parent.slot.cells[k].left = ycell.left;
                    parent.slot.cells[k].balance -= 1;
                } else if parent.slot.cells[k].right == y {
                    parent.slot.cells[k].right = ycell.right;
                    parent.slot.cells[k].balance += 1;
                }
                let (pat, pslot) = (parent.at, parent.slot.clone());
                self.store_slot(pat, &pslot);
            }
            path.truncate(m);
            l = m as isize - 1;
        }

        // Walk the path back up. A subtree that kept its height stops the
        // walk; one that shrank propagates; a balance of two rotates and
        // re-examines the same level.
        while l >= 0 {
            let li = l as usize;
            let a = path[li].at;
            let bal = path[li].slot.cells[k].balance;

            if bal == 1 || bal == -1 {
                break;
            }

            if bal == 0 {
                if li > 0 {
                    let parent = &mut path[li - 1];
                    if parent.slot.cells[k].left == a {
                        parent.slot.cells[k].balance -= 1;
                    } else if parent.slot.cells[k].right == a {
                        parent.slot.cells[k].balance += 1;
                    }
                    let (pat, pslot) = (parent.at, parent.slot.clone());
                    self.store_slot(pat, &pslot);
                }
                l -= 1;
                continue;
            }

            let mut ar = path[li].slot.clone();
            let sub = if bal == 2 {
                let b = ar.cells[k].left;
                let mut br = self.load_slot(b);
                if br.cells[k].balance >= 0 {
                    ar.cells[k].left = if br.cells[k].right > 0 { br.cells[k].right } else { -b };
                    br.cells[k].right = a;
                    if br.cells[k].balance == 0 {
                        ar.cells[k].balance = 1;
                        br.cells[k].balance = -1;
                    } else {
                        ar.cells[k].balance = 0;
                        br.cells[k].balance = 0;
                    }
                    self.store_slot(a, &ar);
                    self.store_slot(b, &br);
                    path[li] = PathEntry { at: b, slot: br };
                    b
                } else {
                    let c = self.rotate_double_left_heavy(k, a, &mut ar, b, &mut br);
                    path[li] = PathEntry { at: c, slot: self.load_slot(c) };
                    c
                }
            } else if bal == -2 {
                let b = ar.cells[k].right;
                let mut br = self.load_slot(b);
                if br.cells[k].balance <= 0 {
                    ar.cells[k].right = if br.cells[k].left > 0 { br.cells[k].left } else { -b };
                    br.cells[k].left = a;
                    if br.cells[k].balance == 0 {
                        ar.cells[k].balance = -1;
                        br.cells[k].balance = 1;
                    } else {
                        ar.cells[k].balance = 0;
                        br.cells[k].balance = 0;
                    }
                    self.store_slot(a, &ar);
                    self.store_slot(b, &br);
                    path[li] = PathEntry { at: b, slot: br };
                    b
                } else {
                    let c = self.rotate_double_right_heavy(k, a, &mut ar, b, &mut br);
                    path[li] = PathEntry { at: c, slot: self.load_slot(c) };
                    c
                }
            } else {
                fatal(&format!("impossible balance {bal} on deletion, key {k}"));
            };

            if li == 0 {
                hdr.roots[k] = sub;
            } else {
                let parent = &mut path[li - 1];
                if parent.slot.cells[k].left == a {
                    parent.slot.cells[k].left = sub;
                } else if parent.slot.cells[k].right == a {
                    parent.slot.cells[k].right = sub;
                }
                let (pat, pslot) = (parent.at, parent.slot.clone());
                self.store_slot(pat, &pslot);
            }
        }
    }
}
