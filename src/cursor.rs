// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    calendar::Timestamp,
    column_type::ColumnType,
    fs::FileSystem,
    metadata::TableMetadata,
    mmap_region::{BinaryValue, StringValue},
    partition::PartitionTable,
    row_id::RowId,
    txn::TxnSnapshot,
};
use std::path::Path;

/// Cursor position. `PreFirst` is the initial state; `next()`/`hasNext()` never revisit a row.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CursorState {
    /// Nothing has been read yet.
    PreFirst,
    /// Positioned within partition `partition`, at local row `local_idx`, which may range up to
    /// `max_idx` (the partition's last valid local row index).
    InPartition {
        /// Current partition index.
        partition: u32,
        /// Local row index already yielded, or `-1` if the partition was just opened.
        local_idx: i64,
        /// Last valid local row index in this partition (`size - 1`).
        max_idx: i64,
    },
    /// No more rows; every partition has been visited.
    Exhausted,
}

/// A flyweight reference to one row: `(partition, local row index)`. Valid only until the
/// cursor moves or the reader closes — it borrows nothing itself, but the column values it
/// yields borrow from the owning reader's mapped regions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Record {
    partition: u32,
    local_idx: i64,
}

impl Record {
    /// The composite row id for this record.
    #[must_use]
    pub fn row_id(&self) -> RowId {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        RowId::pack(self.partition, self.local_idx as u32)
    }

    /// Decomposes a row id into the record it addresses. Performs no bounds checking: the
    /// caller must guarantee the partition is open and the local index is valid.
    #[must_use]
    pub fn at(row_id: RowId) -> Self {
        let (partition, local_idx) = row_id.unpack();
        Self {
            partition,
            local_idx: i64::from(local_idx),
        }
    }

    /// Zero-based partition index.
    #[must_use]
    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Local row index within the partition.
    #[must_use]
    pub fn local_index(&self) -> i64 {
        self.local_idx
    }
}

/// A typed column value, or `Null` when the row predates the column's top or the column's data
/// file is absent from this partition.
#[derive(Copy, Clone, Debug)]
pub enum ColumnValue<'a> {
    /// No value: below the column's top, the column file is missing, or the column is `SYMBOL`
    /// (dictionary dereference is out of scope for this crate).
    Null,
    /// `BOOLEAN`.
    Bool(bool),
    /// `BYTE`.
    Byte(i8),
    /// `SHORT`.
    Short(i16),
    /// `INT`.
    Int(i32),
    /// `FLOAT`.
    Float(f32),
    /// `LONG`.
    Long(i64),
    /// `DOUBLE`.
    Double(f64),
    /// `DATE`, stored as an 8-byte microsecond epoch like `TIMESTAMP`.
    Date(Timestamp),
    /// `TIMESTAMP`.
    Timestamp(Timestamp),
    /// `STRING`.
    Str(StringValue<'a>),
    /// `BINARY`.
    Binary(BinaryValue<'a>),
}

/// Reads the value of column `column_index` for `record` out of `partitions`.
///
/// A row strictly below the column's top, or a partition whose column file is absent, reads as
/// [`ColumnValue::Null`] rather than touching any mapped bytes for that row.
#[must_use]
pub fn column_value<'a>(
    record: Record,
    partitions: &'a PartitionTable,
    metadata: &TableMetadata,
    column_index: usize,
) -> ColumnValue<'a> {
    let column_type = metadata.column_type(column_index);

    if column_type == ColumnType::Symbol {
        return ColumnValue::Null;
    }

    let Some(data) = partitions.data_region(record.partition, column_index) else {
        return ColumnValue::Null;
    };

    let top = partitions.column_top(record.partition, column_index);

    if record.local_idx < top {
        return ColumnValue::Null;
    }

    // A column added after this partition was created only has file entries for rows from its
    // top onward, stored starting at offset 0: the on-disk row index is `local_idx - top`, not
    // `local_idx`.
    #[allow(clippy::cast_sign_loss)]
    let rel_idx = (record.local_idx - top) as u64;

    match column_type {
        ColumnType::Boolean => ColumnValue::Bool(data.get_bool(rel_idx)),
        ColumnType::Byte => ColumnValue::Byte(data.get_byte(rel_idx)),
        ColumnType::Short => ColumnValue::Short(data.get_short(rel_idx * 2)),
        ColumnType::Int => ColumnValue::Int(data.get_int(rel_idx * 4)),
        ColumnType::Float => ColumnValue::Float(data.get_float(rel_idx * 4)),
        ColumnType::Long => ColumnValue::Long(data.get_long(rel_idx * 8)),
        ColumnType::Double => ColumnValue::Double(data.get_double(rel_idx * 8)),
        ColumnType::Date => ColumnValue::Date(data.get_long(rel_idx * 8)),
        ColumnType::Timestamp => ColumnValue::Timestamp(data.get_long(rel_idx * 8)),
        ColumnType::Symbol => unreachable!("handled above"),
        ColumnType::String => variable_length_offset(partitions, record, column_index, top)
            .map_or(ColumnValue::Null, |offset| ColumnValue::Str(data.get_str(offset))),
        ColumnType::Binary => variable_length_offset(partitions, record, column_index, top)
            .map_or(ColumnValue::Null, |offset| ColumnValue::Binary(data.get_bin(offset))),
    }
}

fn variable_length_offset(
    partitions: &PartitionTable,
    record: Record,
    column_index: usize,
    top: i64,
) -> Option<u64> {
    let index = partitions.index_region(record.partition, column_index)?;
    #[allow(clippy::cast_sign_loss)]
    let rel_idx = (record.local_idx - top) as u64;
    let offset = index.get_long(rel_idx * 8);
    Some(u64::try_from(offset).unwrap_or(0))
}

/// Advances `state` to the next readable position, lazily opening partitions and skipping empty
/// ones, without consuming a row. Returns [`CursorState::Exhausted`] if no more rows exist.
#[allow(clippy::too_many_arguments)]
pub fn ensure_peekable<FS: FileSystem>(
    state: CursorState,
    fs: &FS,
    table_root: &Path,
    metadata: &TableMetadata,
    partitions: &mut PartitionTable,
    txn: TxnSnapshot,
    partition_count: u32,
) -> crate::Result<CursorState> {
    match state {
        CursorState::Exhausted => Ok(CursorState::Exhausted),
        CursorState::PreFirst => {
            open_first_nonempty(0, fs, table_root, metadata, partitions, txn, partition_count)
        }
        CursorState::InPartition {
            partition,
            local_idx,
            max_idx,
        } => {
            if local_idx < max_idx {
                Ok(state)
            } else {
                open_first_nonempty(
                    partition + 1,
                    fs,
                    table_root,
                    metadata,
                    partitions,
                    txn,
                    partition_count,
                )
            }
        }
    }
}

fn open_first_nonempty<FS: FileSystem>(
    mut p: u32,
    fs: &FS,
    table_root: &Path,
    metadata: &TableMetadata,
    partitions: &mut PartitionTable,
    txn: TxnSnapshot,
    partition_count: u32,
) -> crate::Result<CursorState> {
    while p < partition_count {
        let size = if partitions.size(p) >= 0 {
            partitions.size(p)
        } else {
            partitions.open(fs, table_root, metadata, p, partition_count, txn)?
        };

        if size > 0 {
            return Ok(CursorState::InPartition {
                partition: p,
                local_idx: -1,
                max_idx: size - 1,
            });
        }

        p += 1;
    }

    Ok(CursorState::Exhausted)
}

/// Yields the next record and the state to store afterward, or `(None, Exhausted)` once every
/// partition has been visited.
#[allow(clippy::too_many_arguments)]
pub fn advance<FS: FileSystem>(
    state: CursorState,
    fs: &FS,
    table_root: &Path,
    metadata: &TableMetadata,
    partitions: &mut PartitionTable,
    txn: TxnSnapshot,
    partition_count: u32,
) -> crate::Result<(Option<Record>, CursorState)> {
    let state = ensure_peekable(state, fs, table_root, metadata, partitions, txn, partition_count)?;

    match state {
        CursorState::InPartition {
            partition,
            local_idx,
            max_idx,
        } if local_idx < max_idx => {
            let next_idx = local_idx + 1;
            let record = Record {
                partition,
                local_idx: next_idx,
            };
            Ok((
                Some(record),
                CursorState::InPartition {
                    partition,
                    local_idx: next_idx,
                    max_idx,
                },
            ))
        }
        _ => Ok((None, CursorState::Exhausted)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn row_id_roundtrips_through_record() {
        let record = Record {
            partition: 3,
            local_idx: 9,
        };
        let id = record.row_id();
        let restored = Record::at(id);
        assert_eq!(restored.partition(), 3);
        assert_eq!(restored.local_index(), 9);
    }

    #[test]
    fn column_value_offsets_by_top_for_columns_added_later() {
        use crate::{calendar::PartitionScheme, fs::StdFileSystem};
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("default")).unwrap();

        // Partition has 3 rows; "new" was added after row 0 and row 1 were written, so its top
        // is 2 and its data file holds only the one entry for local row 2, at file offset 0.
        {
            let mut f = std::fs::File::create(root.join("default/new.d")).unwrap();
            f.write_all(&99i32.to_ne_bytes()).unwrap();
        }
        std::fs::write(root.join("default/new.top"), 2i64.to_le_bytes()).unwrap();

        let metadata_bytes = {
            let mut b = Vec::new();
            b.extend_from_slice(&1i32.to_le_bytes());
            b.extend_from_slice(&0i32.to_le_bytes());
            b.extend_from_slice(&(-1i32).to_le_bytes());
            b.extend_from_slice(&3i32.to_le_bytes());
            b.extend_from_slice(b"new");
            b.push(u8::from(ColumnType::Int));
            b
        };
        let metadata = TableMetadata::parse_for_test(&metadata_bytes).unwrap();

        let mut partitions = PartitionTable::new(PartitionScheme::None, 0, 1);
        partitions
            .open(&StdFileSystem, root, &metadata, 0, 1, dummy_snapshot_with(3))
            .unwrap();

        let below_top = Record {
            partition: 0,
            local_idx: 1,
        };
        assert!(matches!(
            column_value(below_top, &partitions, &metadata, 0),
            ColumnValue::Null
        ));

        let at_top = Record {
            partition: 0,
            local_idx: 2,
        };
        assert!(matches!(
            column_value(at_top, &partitions, &metadata, 0),
            ColumnValue::Int(99)
        ));
    }

    fn dummy_snapshot_with(transient: u64) -> TxnSnapshot {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_txi");
        let mut bytes = [0u8; 32];
        bytes[8..16].copy_from_slice(&transient.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        crate::txn::TxnView::open(&crate::fs::StdFileSystem, dir.path())
            .unwrap()
            .snapshot()
    }

    #[test]
    fn ensure_peekable_on_pre_first_with_no_partitions_exhausts() {
        use crate::{calendar::PartitionScheme, fs::MemFileSystem};

        let fs = MemFileSystem::new();
        let metadata_bytes = {
            let mut b = Vec::new();
            b.extend_from_slice(&0i32.to_le_bytes());
            b.extend_from_slice(&0i32.to_le_bytes());
            b.extend_from_slice(&(-1i32).to_le_bytes());
            b
        };
        let metadata = TableMetadata::parse_for_test(&metadata_bytes).unwrap();
        let mut partitions = PartitionTable::new(PartitionScheme::None, 0, 0);

        let txn = dummy_snapshot();
        let state = ensure_peekable(
            CursorState::PreFirst,
            &fs,
            Path::new("/t"),
            &metadata,
            &mut partitions,
            txn,
            0,
        )
        .unwrap();

        assert_eq!(state, CursorState::Exhausted);
    }

    fn dummy_snapshot() -> TxnSnapshot {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_txi");
        std::fs::write(&path, [0u8; 32]).unwrap();
        crate::txn::TxnView::open(&crate::fs::StdFileSystem, dir.path())
            .unwrap()
            .snapshot()
    }
}
