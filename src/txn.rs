// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{calendar::Timestamp, error::Error, fs::FileSystem, mmap_region::MappedRegion};
use std::{
    path::Path,
    sync::atomic::{fence, Ordering::Acquire},
    time::Duration,
};

/// Name of the transaction file under a table root.
pub const TXN_FILE_NAME: &str = "_txi";

// Fixed little-endian `u64` offsets adopted from the writer contract this crate targets.
// The concrete numbers below are this crate's choice, documented in DESIGN.md's Open
// Question log.
const TXN_OFFSET: u64 = 0;
const TRANSIENT_OFFSET: u64 = 8;
const FIXED_OFFSET: u64 = 16;
const MAX_TS_OFFSET: u64 = 24;
const TXN_FILE_MIN_LEN: usize = 32;

const SPIN_ATTEMPTS: u32 = 64;
const PARK_DURATION: Duration = Duration::from_nanos(1_000);

/// A consistent `(txn, transientRowCount, fixedRowCount, maxTimestamp)` snapshot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxnSnapshot {
    txn: u64,
    transient_row_count: u64,
    fixed_row_count: u64,
    max_timestamp: Timestamp,
}

impl TxnSnapshot {
    /// The transaction number this snapshot was published under.
    #[must_use]
    pub fn txn(&self) -> u64 {
        self.txn
    }

    /// Row count of the currently-appended (last) partition.
    #[must_use]
    pub fn transient_row_count(&self) -> u64 {
        self.transient_row_count
    }

    /// Total row count of all closed partitions.
    #[must_use]
    pub fn fixed_row_count(&self) -> u64 {
        self.fixed_row_count
    }

    /// Maximum timestamp observed by the writer at the time of this snapshot.
    #[must_use]
    pub fn max_timestamp(&self) -> Timestamp {
        self.max_timestamp
    }

    /// `fixedRowCount + transientRowCount`.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.fixed_row_count + self.transient_row_count
    }
}

/// Whether a reload observed a new snapshot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reload {
    /// The txn number was unchanged; the previous snapshot still holds.
    Unchanged,
    /// A new, coherent snapshot was published and captured.
    Changed,
}

/// Reads the transaction file with a load-fence sequence-lock protocol, tolerating a concurrent
/// writer that updates the file in place without locks.
pub struct TxnView {
    region: MappedRegion,
    last: TxnSnapshot,
}

impl TxnView {
    /// Opens `<root>/_txi` and captures the initial snapshot.
    pub fn open(fs: &impl FileSystem, table_root: &Path) -> crate::Result<Self> {
        let path = table_root.join(TXN_FILE_NAME);

        if !fs.exists(&path) {
            return Err(Error::MissingFile(TXN_FILE_NAME));
        }

        let region = MappedRegion::open(fs, &path)?;

        if region.len() < TXN_FILE_MIN_LEN {
            return Err(Error::CorruptArchive {
                partition: TXN_FILE_NAME.to_string(),
            });
        }

        let mut view = Self {
            region,
            last: TxnSnapshot {
                txn: u64::MAX,
                transient_row_count: 0,
                fixed_row_count: 0,
                max_timestamp: 0,
            },
        };

        // Force the first read to always capture a snapshot, regardless of what txn number the
        // writer happens to have published (u64::MAX as a sentinel "never observed" marker).
        view.reload();

        Ok(view)
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TxnSnapshot {
        self.last
    }

    /// Re-reads the transaction file, returning [`Reload::Changed`] iff the txn number advanced.
    pub fn reload(&mut self) -> Reload {
        let mut spins = 0u32;

        loop {
            let txn1 = self.read_u64(TXN_OFFSET);

            if txn1 == self.last.txn {
                return Reload::Unchanged;
            }

            fence(Acquire);

            let transient_row_count = self.read_u64(TRANSIENT_OFFSET);
            let fixed_row_count = self.read_u64(FIXED_OFFSET);
            let max_timestamp = self.read_u64(MAX_TS_OFFSET) as Timestamp;

            fence(Acquire);

            let txn2 = self.read_u64(TXN_OFFSET);

            if txn2 == txn1 {
                self.last = TxnSnapshot {
                    txn: txn1,
                    transient_row_count,
                    fixed_row_count,
                    max_timestamp,
                };
                return Reload::Changed;
            }

            // Torn read: the writer is mid-publish. Spin briefly, then park, and retry — this
            // never returns a partially-published snapshot.
            log::trace!("torn transaction read detected, retrying");
            spins += 1;

            if spins < SPIN_ATTEMPTS {
                std::hint::spin_loop();
            } else {
                std::thread::park_timeout(PARK_DURATION);
            }
        }
    }

    fn read_u64(&self, offset: u64) -> u64 {
        // The txn file layout is explicitly little-endian, independent of the native-endian
        // contract `MappedRegion`'s generic typed getters use for column data.
        u64::from_le_bytes([
            self.byte(offset),
            self.byte(offset + 1),
            self.byte(offset + 2),
            self.byte(offset + 3),
            self.byte(offset + 4),
            self.byte(offset + 5),
            self.byte(offset + 6),
            self.byte(offset + 7),
        ])
    }

    fn byte(&self, offset: u64) -> u8 {
        self.region.get_byte(offset) as u8
    }
}
