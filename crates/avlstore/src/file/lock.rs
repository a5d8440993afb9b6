// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Advisory byte-range locks over the store file.
//!
//! Three disjoint ranges are locked, all through `fcntl`:
//!
//! | Range            | Held for                                        |
//! |------------------|-------------------------------------------------|
//! | byte 0           | the duration of one public operation            |
//! | byte 1           | caller-controlled multi-operation sections      |
//! | each cursor slot | the lifetime of the opener that owns the cursor |
//!
//! On Linux the open-file-description variants (`F_OFD_*`) are used, so two
//! handles in one process are serialized like two processes and one
//! handle's locks survive the other handle closing its descriptor. Other
//! Unixes fall back to classic POSIX record locks, which is why cursor
//! ownership is additionally stamped with the owner's pid (POSIX lock
//! tests cannot see locks held by the calling process itself).

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;

use crate::error::{Result, StoreError};

/// Byte locked for the duration of every public operation.
pub(crate) const OP_LOCK_BYTE: i64 = 0;

/// Byte exposed to callers through `Store::lock` / `Store::unlock`.
pub(crate) const USER_LOCK_BYTE: i64 = 1;

#[cfg(target_os = "linux")]
const CMD_SETLK: libc::c_int = libc::F_OFD_SETLK;
#[cfg(target_os = "linux")]
const CMD_SETLKW: libc::c_int = libc::F_OFD_SETLKW;
#[cfg(target_os = "linux")]
const CMD_GETLK: libc::c_int = libc::F_OFD_GETLK;

#[cfg(not(target_os = "linux"))]
const CMD_SETLK: libc::c_int = libc::F_SETLK;
#[cfg(not(target_os = "linux"))]
const CMD_SETLKW: libc::c_int = libc::F_SETLKW;
#[cfg(not(target_os = "linux"))]
const CMD_GETLK: libc::c_int = libc::F_GETLK;

fn flock_for(kind: libc::c_short, start: i64, len: i64) -> libc::flock {
    // SAFETY: flock is a plain C struct; all-zeroes is a valid value and
    // leaves l_pid = 0 as the OFD commands require.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = kind;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = start as libc::off_t;
    fl.l_len = len as libc::off_t;
    fl
}

fn fcntl_lock(file: &File, cmd: libc::c_int, fl: &mut libc::flock) -> io::Result<()> {
    loop {
        // SAFETY: fd is a valid open descriptor for the lifetime of `file`,
        // and fl points to a properly initialized flock struct.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), cmd, fl as *mut libc::flock) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Acquire an exclusive lock on `[start, start + len)`, blocking.
pub(crate) fn lock_range(file: &File, start: i64, len: i64) -> io::Result<()> {
    let mut fl = flock_for(libc::F_WRLCK as libc::c_short, start, len);
    fcntl_lock(file, CMD_SETLKW, &mut fl)
}

/// Release a previously acquired lock on `[start, start + len)`.
pub(crate) fn unlock_range(file: &File, start: i64, len: i64) -> io::Result<()> {
    let mut fl = flock_for(libc::F_UNLCK as libc::c_short, start, len);
    fcntl_lock(file, CMD_SETLK, &mut fl)
}

/// Test whether some other opener holds a lock on `[start, start + len)`.
///
/// Does not acquire anything. Locks held through this handle's own
/// descriptor are not reported.
pub(crate) fn range_is_locked(file: &File, start: i64, len: i64) -> io::Result<bool> {
    let mut fl = flock_for(libc::F_WRLCK as libc::c_short, start, len);
    fcntl_lock(file, CMD_GETLK, &mut fl)?;
    Ok(fl.l_type != libc::F_UNLCK as libc::c_short)
}

/// RAII guard for the per-operation lock on byte 0.
///
/// Every public operation acquires this after the in-memory handle mutex
/// and before its first read; dropping it releases the byte before the
/// mutex unlocks.
pub(crate) struct OpLock<'a> {
    file: &'a File,
}

impl<'a> OpLock<'a> {
    pub fn acquire(file: &'a File) -> Result<Self> {
        lock_range(file, OP_LOCK_BYTE, 1).map_err(StoreError::Lock)?;
        Ok(Self { file })
    }
}

impl Drop for OpLock<'_> {
    fn drop(&mut self) {
        let _ = unlock_range(self.file, OP_LOCK_BYTE, 1);
    }
}
