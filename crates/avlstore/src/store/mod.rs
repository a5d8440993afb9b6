// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The store handle and the public operation surface.
//!
//! # Operation discipline
//!
//! Every public operation runs the same prologue:
//!
//! 1. take the in-memory handle mutex (sibling threads of one opener),
//! 2. take the exclusive byte-range lock on byte 0 (other openers,
//!    including other processes),
//! 3. refresh the end-of-file watermark,
//!
//! then executes without further suspension points, and releases the two
//! locks in reverse order. Operations are linearizable in the order they
//! win the byte-0 lock; an observer sees either the pre-state or the
//! post-state of a concurrent mutator, never an intermediate.
//!
//! # Crash behavior
//!
//! There is no journal and no recovery: a writer dying between its first
//! and last `write_at` leaves the file corrupted. Readers detect the
//! damage only when a pointer escapes the slot array, at which point the
//! process aborts (see [`crate::error`]).

pub(crate) mod cursor;
mod ops;

use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{fatal, Result, StoreError};
use crate::file::lock::{self, OpLock, USER_LOCK_BYTE};
use crate::file::SlotFile;
use crate::format::{Geometry, Header, Slot, MAGIC};
use crate::order::{KeyId, RecordOrder};
use crate::tree::audit::ScanReport;

/// Handle to one opener of a store file.
///
/// A handle may be shared between threads (`&self` operations, serialized
/// by an internal mutex). Each handle owns one on-disk cursor slot holding
/// its navigation state; dropping the handle releases it.
pub struct Store<C: RecordOrder> {
    geom: Geometry,
    lock_file: File,
    core: Mutex<Core<C>>,
}

/// Mutable per-handle state, behind the handle mutex.
pub(crate) struct Core<C> {
    pub(crate) file: SlotFile,
    pub(crate) geom: Geometry,
    pub(crate) order: C,
    /// Offset of this opener's cursor slot
    pub(crate) cursor_at: i64,
}

impl<C: RecordOrder> Store<C> {
    /// Open a store file, creating it when absent.
    ///
    /// `payload_len` and `n_keys` fix the record geometry; on reopen they
    /// must match what the file was created with, and `order` must be the
    /// comparator the trees were built with. A cursor slot is acquired for
    /// this opener and stays locked until the handle is dropped.
    pub fn open<P: AsRef<Path>>(
        path: P,
        payload_len: usize,
        n_keys: usize,
        order: C,
    ) -> Result<Self> {
        let geom = Geometry { n_keys, payload_len };
        let mut file = SlotFile::open(path.as_ref()).map_err(StoreError::Open)?;
        let lock_file = file.file().try_clone().map_err(StoreError::Open)?;

        let op = OpLock::acquire(&lock_file)?;
        file.refresh_eof();

        let mut hdr = if file.eof() == 0 {
            let hdr = Header::new(&geom);
            file.write_at(0, &hdr.encode(&geom));
            debug!(
                "[STORE] created {} ({payload_len}-byte payload, {n_keys} keys)",
                path.as_ref().display()
            );
            hdr
        } else {
            if file.eof() < 24 {
                return Err(StoreError::HeaderTruncated {
                    file_len: file.eof(),
                    header_len: geom.header_len() as u64,
                });
            }
            let mut prefix = [0u8; 24];
            file.read_at(0, &mut prefix);
            let (magic, f_keys, _, f_slot) = Header::read_prefix(&prefix);
            if magic != MAGIC {
                return Err(StoreError::BadMagic(magic));
            }
            if f_slot != geom.slot_len() as u32 {
                return Err(StoreError::SlotLenMismatch {
                    file: f_slot,
                    requested: geom.slot_len() as u32,
                });
            }
            if f_keys != n_keys as u32 {
                return Err(StoreError::KeyCountMismatch {
                    file: f_keys,
                    requested: n_keys as u32,
                });
            }
            if file.eof() < geom.header_len() as u64 {
                return Err(StoreError::HeaderTruncated {
                    file_len: file.eof(),
                    header_len: geom.header_len() as u64,
                });
            }
            let mut raw = vec![0u8; geom.header_len()];
            file.read_at(0, &mut raw);
            Header::decode(&geom, &raw)
        };

        let mut core = Core { file, geom, order, cursor_at: 0 };
        core.acquire_cursor(&mut hdr)?;
        core.store_header(&hdr);
        drop(op);

        Ok(Self { geom, lock_file, core: Mutex::new(core) })
    }

    /// Read the geometry of an existing store file without opening it.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Geometry> {
        use std::io::Read;
        let mut f = File::open(path.as_ref()).map_err(StoreError::Open)?;
        let mut prefix = [0u8; 24];
        let mut got = 0;
        while got < prefix.len() {
            match f.read(&mut prefix[got..]).map_err(StoreError::Open)? {
                0 => {
                    return Err(StoreError::HeaderTruncated {
                        file_len: got as u64,
                        header_len: 24,
                    })
                }
                n => got += n,
            }
        }
        let (magic, n_keys, payload_len, _) = Header::read_prefix(&prefix);
        if magic != MAGIC {
            return Err(StoreError::BadMagic(magic));
        }
        Ok(Geometry { n_keys: n_keys as usize, payload_len: payload_len as usize })
    }

    /// Close the handle, releasing its cursor slot.
    ///
    /// Equivalent to dropping the handle; provided for call sites that
    /// want the close to be visible in the control flow.
    pub fn close(self) {}

    /// Record payload length in bytes.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.geom.payload_len
    }

    /// Number of indexes maintained by this store.
    #[inline]
    #[must_use]
    pub fn n_keys(&self) -> usize {
        self.geom.n_keys
    }

    /// Draw the next value from the monotonic ticket counter.
    ///
    /// Tickets are unique and ascending across all openers of the file;
    /// they survive reopening and are never reissued.
    pub fn next_ticket(&self) -> Result<u64> {
        self.with_op(|core| {
            let mut hdr = core.load_header();
            hdr.next_ticket += 1;
            core.store_header(&hdr);
            Ok(hdr.next_ticket)
        })
    }

    /// Position the sequential cursor at the most recently inserted record.
    pub fn start_seq(&self) -> Result<()> {
        self.with_op(|core| {
            let hdr = core.load_header();
            let mut cpr = core.load_slot(core.cursor_at);
            cpr.prev = hdr.head_seq;
            core.store_slot(core.cursor_at, &cpr);
            Ok(())
        })
    }

    /// Read the next record in insertion-recency order into `buf`.
    ///
    /// Returns `Ok(false)` when the sequence is exhausted. Traversal runs
    /// newest to oldest.
    pub fn read_seq(&self, buf: &mut [u8]) -> Result<bool> {
        self.check_buf(buf)?;
        self.with_op(|core| {
            let mut cpr = core.load_slot(core.cursor_at);
            if cpr.prev == 0 {
                return Ok(false);
            }
            let ar = core.load_slot(cpr.prev);
            buf.copy_from_slice(&ar.payload);
            cpr.prev = ar.next;
            core.store_slot(core.cursor_at, &cpr);
            Ok(true)
        })
    }

    /// Insert a copy of `payload` as a new record, updating every index.
    pub fn insert(&self, payload: &[u8]) -> Result<()> {
        self.check_buf(payload)?;
        self.with_op(|core| core.insert_op(payload))
    }

    /// Overwrite the payload of a record whose keys all equal `payload`'s.
    ///
    /// Returns `Ok(false)` when no record matches under every key. With
    /// several key-identical records the one overwritten is arbitrary.
    pub fn update(&self, payload: &[u8]) -> Result<bool> {
        self.check_buf(payload)?;
        self.with_op(|core| core.update_op(payload))
    }

    /// Delete the record whose payload equals `payload` byte for byte.
    ///
    /// Returns `Ok(false)` when no such record exists. With several
    /// byte-identical records exactly one (arbitrary) is deleted.
    pub fn delete(&self, payload: &[u8]) -> Result<bool> {
        self.check_buf(payload)?;
        self.with_op(|core| core.delete_op(payload))
    }

    /// Position at the lowest record `>= buf` under `key` and read it.
    ///
    /// On `Ok(true)` the record overwrites `buf` and the cursor's
    /// per-key previous/next positions flank it; on `Ok(false)` both are
    /// cleared.
    pub fn start_ge(&self, key: KeyId, buf: &mut [u8]) -> Result<bool> {
        self.check_buf(buf)?;
        self.with_op(|core| {
            let k = core.check_key(key)?;
            core.position_op(k, buf, cursor::Bound::LowestGe)
        })
    }

    /// Position at the highest record `< buf` under `key` and read it.
    pub fn start_lt(&self, key: KeyId, buf: &mut [u8]) -> Result<bool> {
        self.check_buf(buf)?;
        self.with_op(|core| {
            let k = core.check_key(key)?;
            core.position_op(k, buf, cursor::Bound::HighestLt)
        })
    }

    /// Read the next record under `key` into `buf` and advance.
    ///
    /// The forward and backward positions are independent; `next` never
    /// disturbs what `prev` will yield.
    pub fn next(&self, key: KeyId, buf: &mut [u8]) -> Result<bool> {
        self.check_buf(buf)?;
        self.with_op(|core| {
            let k = core.check_key(key)?;
            core.step_op(k, buf, cursor::Dir::Forward)
        })
    }

    /// Read the previous record under `key` into `buf` and step back.
    pub fn prev(&self, key: KeyId, buf: &mut [u8]) -> Result<bool> {
        self.check_buf(buf)?;
        self.with_op(|core| {
            let k = core.check_key(key)?;
            core.step_op(k, buf, cursor::Dir::Backward)
        })
    }

    /// Look up a record comparing equal to `buf` under `key`.
    ///
    /// Positions the cursor like [`Store::start_ge`] but reports
    /// `Ok(true)` only on comparator equality; the cursor is left
    /// positioned either way and is not advanced.
    pub fn find(&self, key: KeyId, buf: &mut [u8]) -> Result<bool> {
        self.check_buf(buf)?;
        self.with_op(|core| {
            let k = core.check_key(key)?;
            let mut probe = buf.to_vec();
            if !core.position_op(k, &mut probe, cursor::Bound::LowestGe)? {
                return Ok(false);
            }
            if core.cmp(k, &probe, buf) != Ordering::Equal {
                return Ok(false);
            }
            buf.copy_from_slice(&probe);
            Ok(true)
        })
    }

    /// Audit the tree for `key`: height, node count, balance verification.
    ///
    /// Read-only. Faults are counted and reported on the log, not
    /// escalated; a clean tree reports zero faults and a record count
    /// equal to the live-record counter.
    pub fn scan(&self, key: KeyId) -> Result<ScanReport> {
        self.with_op(|core| {
            let k = core.check_key(key)?;
            Ok(core.scan_op(k))
        })
    }

    /// Render the header and every slot as text, for diagnostics.
    pub fn dump(&self) -> Result<String> {
        self.with_op(|core| Ok(core.dump_op()))
    }

    /// Compact the file: reap abandoned cursors, refill holes from the
    /// tail, shorten the file.
    pub fn squash(&self) -> Result<()> {
        self.with_op(|core| {
            core.squash_op();
            Ok(())
        })
    }

    /// Acquire the caller-visible cross-operation lock (blocking).
    ///
    /// This is the advisory lock on byte 1, untouched by every other
    /// operation. It serializes multi-operation critical sections between
    /// openers that agree to take it; it does not block openers that
    /// ignore it.
    pub fn lock(&self) -> Result<()> {
        let _core = self.core.lock();
        lock::lock_range(&self.lock_file, USER_LOCK_BYTE, 1).map_err(StoreError::Lock)
    }

    /// Release the caller-visible cross-operation lock.
    pub fn unlock(&self) -> Result<()> {
        let _core = self.core.lock();
        lock::unlock_range(&self.lock_file, USER_LOCK_BYTE, 1).map_err(StoreError::Lock)
    }

    /// Operation prologue: handle mutex, byte-0 lock, watermark refresh.
    fn with_op<T>(&self, body: impl FnOnce(&mut Core<C>) -> Result<T>) -> Result<T> {
        let mut core = self.core.lock();
        let _op = OpLock::acquire(&self.lock_file)?;
        core.file.refresh_eof();
        body(&mut *core)
    }

    fn check_buf(&self, buf: &[u8]) -> Result<()> {
        if buf.len() != self.geom.payload_len {
            return Err(StoreError::PayloadLength {
                expected: self.geom.payload_len,
                got: buf.len(),
            });
        }
        Ok(())
    }
}

impl<C: RecordOrder> Drop for Store<C> {
    fn drop(&mut self) {
        let mut core = self.core.lock();
        match OpLock::acquire(&self.lock_file) {
            Ok(_op) => {
                core.file.refresh_eof();
                core.release_cursor();
            }
            Err(e) => warn!("[STORE] close: cursor slot left for squash to reap: {e}"),
        }
    }
}

impl<C: RecordOrder> Core<C> {
    pub(crate) fn slot_len(&self) -> i64 {
        self.geom.slot_len() as i64
    }

    pub(crate) fn load_header(&self) -> Header {
        let mut raw = vec![0u8; self.geom.header_len()];
        self.file.read_at(0, &mut raw);
        Header::decode(&self.geom, &raw)
    }

    pub(crate) fn store_header(&mut self, hdr: &Header) {
        let raw = hdr.encode(&self.geom);
        self.file.write_at(0, &raw);
    }

    pub(crate) fn load_slot(&self, at: i64) -> Slot {
        if at < self.geom.first_slot() {
            fatal(&format!("slot pointer {at} inside the header region"));
        }
        let mut raw = vec![0u8; self.geom.slot_len()];
        self.file.read_at(at as u64, &mut raw);
        Slot::decode(&self.geom, &raw)
    }

    pub(crate) fn store_slot(&mut self, at: i64, slot: &Slot) {
        if at < self.geom.first_slot() {
            fatal(&format!("slot pointer {at} inside the header region"));
        }
        self.file.write_at(at as u64, &slot.encode(&self.geom));
    }

    /// Take a slot from the free list, or address a fresh one at the end
    /// of the file (materialized by the first `store_slot` to it).
    pub(crate) fn alloc_slot(&mut self, hdr: &mut Header) -> (i64, Slot) {
        let at = hdr.head_free;
        if at > 0 {
            let slot = self.load_slot(at);
            if self.geom.n_keys > 0 && !slot.is_free() {
                fatal(&format!("free list entry at {at} is not tagged free"));
            }
            hdr.head_free = slot.next;
            (at, slot)
        } else {
            (self.file.eof() as i64, Slot::new(&self.geom))
        }
    }

    #[inline]
    pub(crate) fn cmp(&self, k: usize, a: &[u8], b: &[u8]) -> Ordering {
        self.order.compare(k as KeyId, a, b)
    }

    pub(crate) fn check_key(&self, key: KeyId) -> Result<usize> {
        if (key as usize) < self.geom.n_keys {
            Ok(key as usize)
        } else {
            Err(StoreError::KeyOutOfRange { key, n_keys: self.geom.n_keys as u32 })
        }
    }
}
