// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! avlctl - inspect store files from the command line.
//!
//! Only comparator-independent operations are offered (dump walks raw
//! slots, scan checks structure against recomputed heights), so the tool
//! can open any store file without knowing the application's ordering.

#![allow(clippy::uninlined_format_args)] // CLI output readability
#![allow(clippy::cast_possible_wrap)] // offsets printed as-is

use avlstore::{KeyId, Store};
use std::cmp::Ordering;
use std::path::Path;
use std::process::ExitCode;

fn usage() -> ExitCode {
    eprintln!("avlctl: store file inspector");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  avlctl dump <file>        print the header and every slot");
    eprintln!("  avlctl scan <file> [key]  audit one tree (default key 0)");
    ExitCode::from(2)
}

/// Placeholder ordering for comparator-independent commands.
fn raw_order(_key: KeyId, a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

fn open_store(path: &str) -> Result<Store<fn(KeyId, &[u8], &[u8]) -> Ordering>, ExitCode> {
    if !Path::new(path).exists() {
        eprintln!("[FAIL] no such file: {}", path);
        return Err(ExitCode::FAILURE);
    }
    let geom = match Store::<fn(KeyId, &[u8], &[u8]) -> Ordering>::probe(path) {
        Ok(geom) => geom,
        Err(e) => {
            eprintln!("[FAIL] {}: {}", path, e);
            return Err(ExitCode::FAILURE);
        }
    };
    let order: fn(KeyId, &[u8], &[u8]) -> Ordering = raw_order;
    match Store::open(path, geom.payload_len, geom.n_keys, order) {
        Ok(store) => Ok(store),
        Err(e) => {
            eprintln!("[FAIL] {}: {}", path, e);
            Err(ExitCode::FAILURE)
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        return usage();
    }

    match args[1].as_str() {
        "dump" => {
            let store = match open_store(&args[2]) {
                Ok(s) => s,
                Err(code) => return code,
            };
            match store.dump() {
                Ok(text) => {
                    print!("{}", text);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("[FAIL] dump: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        "scan" => {
            let key: KeyId = match args.get(3).map(|s| s.parse()) {
                None => 0,
                Some(Ok(k)) => k,
                Some(Err(_)) => return usage(),
            };
            let store = match open_store(&args[2]) {
                Ok(s) => s,
                Err(code) => return code,
            };
            match store.scan(key) {
                Ok(report) => {
                    println!(
                        "key {}: height {}, {} records, {} faults",
                        key, report.height, report.records, report.faults
                    );
                    if report.faults == 0 {
                        println!("[OK] tree is balanced and fully threaded");
                        ExitCode::SUCCESS
                    } else {
                        println!("[FAIL] tree audit found faults");
                        ExitCode::FAILURE
                    }
                }
                Err(e) => {
                    eprintln!("[FAIL] scan: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        _ => usage(),
    }
}
