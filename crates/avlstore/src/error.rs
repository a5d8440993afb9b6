// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for store operations.
//!
//! Benign "no match" outcomes are not errors: operations that look up or
//! navigate return `Ok(false)` when nothing satisfies the request. Errors
//! cover caller mistakes (bad key index, geometry mismatch on reopen) and
//! resource failures surfaced by the OS. Structural corruption is not
//! representable here at all; it aborts the process (see [`fatal`]).

use std::fmt;
use std::io;

/// Errors surfaced by store operations.
///
/// The handle remains usable after any of these.
#[derive(Debug)]
pub enum StoreError {
    /// Opening or creating the store file failed
    Open(io::Error),

    /// Acquiring or releasing a byte-range lock failed
    Lock(io::Error),

    /// The file exists but is shorter than a full header
    HeaderTruncated { file_len: u64, header_len: u64 },

    /// The file's magic tag does not identify a store file
    BadMagic([u8; 8]),

    /// The file was created with a different slot geometry
    SlotLenMismatch { file: u32, requested: u32 },

    /// The file was created with a different number of keys
    KeyCountMismatch { file: u32, requested: u32 },

    /// Key index out of range for this store
    KeyOutOfRange { key: u32, n_keys: u32 },

    /// Caller buffer length differs from the store's payload length
    PayloadLength { expected: usize, got: usize },

    /// The live-record counter cannot be incremented further
    RecordLimit,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "store file open failed: {e}"),
            Self::Lock(e) => write!(f, "byte-range lock failed: {e}"),
            Self::HeaderTruncated { file_len, header_len } => {
                write!(f, "file too short for header: {file_len} bytes, need {header_len}")
            }
            Self::BadMagic(m) => write!(f, "not a store file (magic {m:02x?})"),
            Self::SlotLenMismatch { file, requested } => {
                write!(f, "slot length mismatch: file has {file}, caller requested {requested}")
            }
            Self::KeyCountMismatch { file, requested } => {
                write!(f, "key count mismatch: file has {file}, caller requested {requested}")
            }
            Self::KeyOutOfRange { key, n_keys } => {
                write!(f, "key index {key} out of range (store has {n_keys} keys)")
            }
            Self::PayloadLength { expected, got } => {
                write!(f, "payload buffer is {got} bytes, store records are {expected}")
            }
            Self::RecordLimit => write!(f, "live record counter at limit"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(e) | Self::Lock(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Abort the process on structural corruption.
///
/// The on-disk format has no recovery path: a pointer outside the file or an
/// inconsistent list is evidence that a previous writer died mid-operation,
/// and continuing would propagate garbage into the trees. The diagnostic is
/// recorded on the error channel before the process goes down.
pub(crate) fn fatal(what: &str) -> ! {
    log::error!("[STORE] fatal: {what}");
    std::process::abort();
}
