// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    calendar::{PartitionScheme, Timestamp},
    cursor::{self, ColumnValue, CursorState, Record},
    error::Error,
    fs::{FileSystem, StdFileSystem},
    metadata::TableMetadata,
    partition::PartitionTable,
    partition_dir::PartitionDirectory,
    row_id::RowId,
    txn::{Reload, TxnView},
};
use std::path::{Path, PathBuf};

/// Marker file whose presence means a writer-side recovery is pending.
const TODO_FILE_NAME: &str = "_todo";

/// Construction-time knobs for a [`TableReader`].
///
/// There is no global configuration file in this crate: every table-reader-affecting setting is
/// a field here, set by the embedding application.
#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    initial_partition_capacity: u32,
}

impl ReaderOptions {
    /// Starts a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partition slots to pre-allocate at construction, as a minor allocation-count
    /// optimization for tables expected to grow quickly. Purely an allocation hint: it never
    /// changes observable behavior.
    #[must_use]
    pub fn initial_partition_capacity(mut self, capacity: u32) -> Self {
        self.initial_partition_capacity = capacity;
        self
    }
}

/// A read-only cursor over a partitioned, column-oriented, append-only time-series table.
///
/// Owns every file handle and mapped region it opens; dropping it (or calling [`TableReader::close`])
/// releases them all. A single `TableReader` is not `Sync`-shared across threads for mutation —
/// open independent readers per thread of control.
pub struct TableReader<FS: FileSystem = StdFileSystem> {
    fs: FS,
    table_root: PathBuf,
    metadata: TableMetadata,
    txn: TxnView,
    partitions: PartitionTable,
    partition_count: u32,
    max_timestamp: Timestamp,
    state: CursorState,
    closed: bool,
}

impl TableReader<StdFileSystem> {
    /// Opens the table at `root/name` against the real filesystem.
    pub fn open(root: &Path, name: &str) -> crate::Result<Self> {
        Self::open_with(StdFileSystem, root, name, &ReaderOptions::new())
    }
}

impl<FS: FileSystem> TableReader<FS> {
    /// Opens the table at `root/name` using a caller-supplied [`FileSystem`] and [`ReaderOptions`].
    pub fn open_with(fs: FS, root: &Path, name: &str, options: &ReaderOptions) -> crate::Result<Self> {
        let table_root = root.join(name);

        if fs.exists(&table_root.join(TODO_FILE_NAME)) {
            return Err(Error::PendingRecovery);
        }

        let metadata = TableMetadata::load(&fs, &table_root)?;
        let txn = TxnView::open(&fs, &table_root)?;
        let snapshot = txn.snapshot();

        let scheme = metadata.partition_scheme();
        let directory = PartitionDirectory::scan(&fs, &table_root, scheme)?;
        let partition_count = directory.partition_count(snapshot.max_timestamp());

        let mut partitions = PartitionTable::new(
            scheme,
            directory.partition_min().unwrap_or(0),
            metadata.column_count(),
        );
        partitions.ensure_capacity(partition_count.max(options.initial_partition_capacity));

        log::debug!(
            "opened table {:?}: {} column(s), {} partition(s)",
            table_root,
            metadata.column_count(),
            partition_count
        );

        Ok(Self {
            fs,
            table_root,
            metadata,
            txn,
            partitions,
            partition_count,
            max_timestamp: snapshot.max_timestamp(),
            state: CursorState::PreFirst,
            closed: false,
        })
    }

    /// Total row count across every partition.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.txn.snapshot().size()
    }

    /// The table's parsed metadata.
    #[must_use]
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Number of partitions this table currently has.
    #[must_use]
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Resets the cursor to before the first row. Unmaps nothing.
    pub fn to_top(&mut self) {
        self.state = CursorState::PreFirst;
    }

    /// `true` if another row can be read, lazily opening the next partition if needed.
    pub fn has_next(&mut self) -> crate::Result<bool> {
        let txn = self.txn.snapshot();
        let state = cursor::ensure_peekable(
            self.state,
            &self.fs,
            &self.table_root,
            &self.metadata,
            &mut self.partitions,
            txn,
            self.partition_count,
        )?;
        self.state = state;
        Ok(matches!(
            state,
            CursorState::InPartition { local_idx, max_idx, .. } if local_idx < max_idx
        ))
    }

    /// Advances the cursor and returns the newly current record, or `None` at the end.
    pub fn next(&mut self) -> crate::Result<Option<Record>> {
        let txn = self.txn.snapshot();
        let (record, state) = cursor::advance(
            self.state,
            &self.fs,
            &self.table_root,
            &self.metadata,
            &mut self.partitions,
            txn,
            self.partition_count,
        )?;
        self.state = state;
        Ok(record)
    }

    /// Builds a record addressing `row_id` directly, without opening its partition or checking
    /// bounds — the caller must already have visited that partition via forward iteration.
    #[must_use]
    pub fn record_at(&self, row_id: RowId) -> Record {
        Record::at(row_id)
    }

    /// Reads the value of `column_index` for `record`.
    #[must_use]
    pub fn column_value(&self, record: Record, column_index: usize) -> ColumnValue<'_> {
        cursor::column_value(record, &self.partitions, &self.metadata, column_index)
    }

    /// Re-reads the transaction snapshot and extends partition/column state to match. Returns
    /// `true` iff the writer had advanced.
    ///
    /// In-flight cursors keep seeing already-visited rows; newly appended rows become reachable
    /// only once the cursor crosses a partition boundary or [`TableReader::to_top`] is called.
    pub fn reload(&mut self) -> crate::Result<bool> {
        if self.txn.reload() == Reload::Unchanged {
            return Ok(false);
        }

        let snapshot = self.txn.snapshot();

        if self.metadata.partition_scheme() == PartitionScheme::None {
            #[allow(clippy::cast_possible_wrap)]
            let new_size = snapshot.size() as i64;
            self.partitions
                .reload_partition(&self.fs, &self.table_root, &self.metadata, 0, new_size)?;
            self.max_timestamp = snapshot.max_timestamp();
            log::trace!("reloaded non-partitioned table to size {new_size}");
            return Ok(true);
        }

        let scheme = self.metadata.partition_scheme();
        let previous_floor = scheme.floor(self.max_timestamp);
        let new_floor = scheme.floor(snapshot.max_timestamp());
        let delta = scheme.between(previous_floor, new_floor);

        if delta > 0 {
            #[allow(clippy::cast_sign_loss)]
            let delta = delta as u32;
            let previous_last = self.partition_count - 1;
            self.partition_count += delta;
            self.partitions.ensure_capacity(self.partition_count);

            // The previously-last partition is now closed: re-open it fresh so it picks up its
            // final archived row count instead of the stale transient one.
            self.partitions.open(
                &self.fs,
                &self.table_root,
                &self.metadata,
                previous_last,
                self.partition_count,
                snapshot,
            )?;

            log::trace!(
                "reload grew table by {delta} partition(s), now {}",
                self.partition_count
            );
        } else {
            let last = self.partition_count - 1;
            #[allow(clippy::cast_possible_wrap)]
            let new_size = snapshot.transient_row_count() as i64;
            self.partitions
                .reload_partition(&self.fs, &self.table_root, &self.metadata, last, new_size)?;
            log::trace!("reload extended live partition {last} to size {new_size}");
        }

        self.max_timestamp = snapshot.max_timestamp();
        Ok(true)
    }

    /// Releases every file handle and mapped region this reader holds. Idempotent: calling it
    /// more than once is a no-op. Rust's ownership model drops everything automatically, but
    /// `close` gives callers an explicit release point that does not depend on scope exit.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.partitions = PartitionTable::new(self.metadata.partition_scheme(), 0, 0);
        log::debug!("closed table {:?}", self.table_root);
    }
}

impl<FS: FileSystem> Drop for TableReader<FS> {
    fn drop(&mut self) {
        self.close();
    }
}
