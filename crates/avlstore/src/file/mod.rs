// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Positioned slot I/O with an end-of-file watermark.
//!
//! All header and slot traffic goes through [`SlotFile::read_at`] and
//! [`SlotFile::write_at`]. Both check every access against a cached file
//! length: a read past the watermark, or a write that starts past it, can
//! only come from a pointer that escaped the slot array, so both are
//! treated as structural corruption and abort the process. The only
//! legitimate way the file grows is a write that *starts at* the
//! watermark - slot allocation appending at the end.
//!
//! The watermark is refreshed at the start of every public operation,
//! after the operation lock is held, so it reflects growth and truncation
//! performed by other openers in between.

pub(crate) mod lock;

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::fatal;

/// The store file plus its cached length.
pub(crate) struct SlotFile {
    file: File,
    eof: u64,
}

impl SlotFile {
    /// Open (creating if absent) for read/write. The watermark starts at
    /// zero; callers refresh it once the operation lock is held.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).create(true).open(path)?;
        Ok(Self { file, eof: 0 })
    }

    #[inline]
    pub fn file(&self) -> &File {
        &self.file
    }

    #[inline]
    pub fn eof(&self) -> u64 {
        self.eof
    }

    /// Re-read the file length from the OS.
    pub fn refresh_eof(&mut self) {
        match self.file.metadata() {
            Ok(md) => self.eof = md.len(),
            Err(e) => fatal(&format!("stat failed: {e}")),
        }
    }

    /// Read exactly `buf.len()` bytes at `pos`.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) {
        if pos + buf.len() as u64 > self.eof {
            fatal(&format!(
                "read past end of file: {}+{} > {}",
                pos,
                buf.len(),
                self.eof
            ));
        }
        if let Err(e) = self.file.read_exact_at(buf, pos) {
            fatal(&format!("read failed at {pos}: {e}"));
        }
    }

    /// Write `buf` at `pos`, extending the watermark when appending.
    pub fn write_at(&mut self, pos: u64, buf: &[u8]) {
        if pos > self.eof {
            fatal(&format!("write past end of file: {} > {}", pos, self.eof));
        }
        if let Err(e) = self.file.write_all_at(buf, pos) {
            fatal(&format!("write failed at {pos}: {e}"));
        }
        let end = pos + buf.len() as u64;
        if end > self.eof {
            self.eof = end;
        }
    }

    /// Shorten the file to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.eof = len;
        Ok(())
    }
}
