// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    calendar::{PartitionScheme, Timestamp},
    error::Error,
    fs::FileSystem,
    metadata::TableMetadata,
    mmap_region::MappedRegion,
    txn::TxnSnapshot,
};
use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

/// Name of a partition's row-count archive file.
pub const ARCHIVE_FILE_NAME: &str = "_archive";

/// Suffix of a column's "top" file: the local row index at which the column first has data.
const TOP_FILE_SUFFIX: &str = ".top";

/// Column mappings for every partition, laid out at a fixed power-of-two stride per partition so
/// `base(p)` is a shift rather than a multiply.
///
/// Holds two slots per column: the data mapping and, for variable-length columns, the index
/// mapping. A partition that has never been opened has `size == -1` and no mapped slots.
pub struct PartitionTable {
    scheme: PartitionScheme,
    partition_min: Timestamp,
    column_count: usize,
    stride_shift: u32,
    partition_sizes: Vec<i64>,
    columns: Vec<Option<MappedRegion>>,
    column_tops: Vec<i64>,
}

impl PartitionTable {
    /// Creates an empty table. `partition_min` is the earliest partition-start instant found by
    /// the directory scan (irrelevant, but harmless, for [`PartitionScheme::None`]).
    #[must_use]
    pub fn new(scheme: PartitionScheme, partition_min: Timestamp, column_count: usize) -> Self {
        Self {
            scheme,
            partition_min,
            column_count,
            stride_shift: stride_shift(column_count),
            partition_sizes: Vec::new(),
            columns: Vec::new(),
            column_tops: Vec::new(),
        }
    }

    /// `K` in `base(p) = p << K`.
    #[must_use]
    pub fn stride_shift(&self) -> u32 {
        self.stride_shift
    }

    fn base(&self, p: u32) -> usize {
        (p as usize) << self.stride_shift
    }

    /// Grows internal storage so partition indices `0..partition_count` are addressable.
    /// Never shrinks.
    pub fn ensure_capacity(&mut self, partition_count: u32) {
        let partitions = partition_count as usize;

        if self.partition_sizes.len() < partitions {
            self.partition_sizes.resize(partitions, -1);
        }

        let tops_needed = partitions * self.column_count;
        if self.column_tops.len() < tops_needed {
            self.column_tops.resize(tops_needed, 0);
        }

        let slots_needed = self.base(partition_count);
        if self.columns.len() < slots_needed {
            self.columns.resize_with(slots_needed, || None);
        }
    }

    /// The on-disk directory for partition `p`.
    #[must_use]
    pub fn partition_path(&self, table_root: &Path, p: u32) -> PathBuf {
        let name = if self.scheme == PartitionScheme::None {
            crate::calendar::DEFAULT_PARTITION_NAME.to_string()
        } else {
            self.scheme
                .format(self.scheme.add(self.partition_min, i64::from(p)))
        };
        table_root.join(name)
    }

    /// Cached row count for partition `p`, or `-1` if never opened.
    #[must_use]
    pub fn size(&self, p: u32) -> i64 {
        self.partition_sizes.get(p as usize).copied().unwrap_or(-1)
    }

    /// The data-file mapping for column `c` of partition `p`, if that column's file exists.
    #[must_use]
    pub fn data_region(&self, p: u32, c: usize) -> Option<&MappedRegion> {
        self.columns[self.base(p) + 2 * c].as_ref()
    }

    /// The index-file mapping for column `c` of partition `p`, if the column is variable-length
    /// and its index file exists.
    #[must_use]
    pub fn index_region(&self, p: u32, c: usize) -> Option<&MappedRegion> {
        self.columns[self.base(p) + 2 * c + 1].as_ref()
    }

    /// Local row index at which column `c` of partition `p` first has data.
    #[must_use]
    pub fn column_top(&self, p: u32, c: usize) -> i64 {
        self.column_tops[p as usize * self.column_count + c]
    }

    /// Opens partition `p`: determines its row count and lazily maps every column whose data
    /// file is present. `partition_count` is the writer's currently-known total, used to decide
    /// whether `p` is the live (transient) partition.
    pub fn open(
        &mut self,
        fs: &impl FileSystem,
        table_root: &Path,
        metadata: &TableMetadata,
        p: u32,
        partition_count: u32,
        txn: TxnSnapshot,
    ) -> crate::Result<i64> {
        self.ensure_capacity(partition_count);

        let path = self.partition_path(table_root, p);

        if !fs.exists(&path) {
            self.partition_sizes[p as usize] = 0;
            return Ok(0);
        }

        #[allow(clippy::cast_possible_wrap)]
        let size = if partition_count > 0 && p == partition_count - 1 {
            txn.transient_row_count() as i64
        } else {
            read_archive_size(fs, &path)?
        };

        self.partition_sizes[p as usize] = size;

        if size > 0 {
            for c in 0..self.column_count {
                self.open_column(fs, &path, metadata, p, c)?;
            }
        }

        Ok(size)
    }

    fn open_column(
        &mut self,
        fs: &impl FileSystem,
        partition_path: &Path,
        metadata: &TableMetadata,
        p: u32,
        c: usize,
    ) -> crate::Result<()> {
        let name = metadata.column_name(c);
        let data_path = partition_path.join(format!("{name}.d"));

        // A missing column data file is permitted: the column may have been added to the
        // schema after this partition was created. Leave both slots empty.
        if !fs.exists(&data_path) {
            return Ok(());
        }

        let data = MappedRegion::open(fs, &data_path)?;
        let base = self.base(p);
        self.columns[base + 2 * c] = Some(data);

        if metadata.column_type(c).is_variable_length() {
            let index_path = partition_path.join(format!("{name}.i"));
            if fs.exists(&index_path) {
                self.columns[base + 2 * c + 1] = Some(MappedRegion::open(fs, &index_path)?);
            }
        }

        self.column_tops[p as usize * self.column_count + c] =
            read_column_top(fs, partition_path, name)?;

        Ok(())
    }

    /// Remaps every already-mapped column of partition `p` to observe writer appends, and
    /// updates its cached size.
    ///
    /// If `p` has never been opened (no column has been mapped yet), this leaves its cached size
    /// at `-1` instead of stamping `new_size`: otherwise a later lazy `open` would be skipped
    /// entirely (it only runs when the cached size is still `-1`), and the partition's columns
    /// would never get mapped at all even though its size looks populated.
    pub fn reload_partition(
        &mut self,
        fs: &impl FileSystem,
        table_root: &Path,
        metadata: &TableMetadata,
        p: u32,
        new_size: i64,
    ) -> crate::Result<()> {
        if self.size(p) < 0 {
            return Ok(());
        }

        let path = self.partition_path(table_root, p);
        let base = self.base(p);

        for c in 0..self.column_count {
            let name = metadata.column_name(c);

            if let Some(region) = self.columns[base + 2 * c].as_mut() {
                region.track_file_size(&path.join(format!("{name}.d")))?;
            }

            if let Some(region) = self.columns[base + 2 * c + 1].as_mut() {
                region.track_file_size(&path.join(format!("{name}.i")))?;
            }
        }

        self.partition_sizes[p as usize] = new_size;
        Ok(())
    }
}

/// `K = ceil(log2(columnCount * 2))`, with `columnCount == 0` treated as `1` so the stride is
/// always at least `2`.
fn stride_shift(column_count: usize) -> u32 {
    let n = u64::try_from(column_count.max(1)).unwrap_or(u64::MAX) * 2;
    ceil_log2(n)
}

fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        u64::BITS - (n - 1).leading_zeros()
    }
}

fn read_archive_size(fs: &impl FileSystem, partition_path: &Path) -> crate::Result<i64> {
    let path = partition_path.join(ARCHIVE_FILE_NAME);
    let bytes = fs.read(&path)?;

    if bytes.len() < 8 {
        let partition = partition_path
            .file_name()
            .map_or_else(|| partition_path.display().to_string(), |n| n.to_string_lossy().into_owned());
        return Err(Error::CorruptArchive { partition });
    }

    Cursor::new(bytes)
        .read_i64::<LittleEndian>()
        .map_err(|e| Error::io(path, e))
}

fn read_column_top(fs: &impl FileSystem, partition_path: &Path, column_name: &str) -> crate::Result<i64> {
    let path = partition_path.join(format!("{column_name}{TOP_FILE_SUFFIX}"));

    if !fs.exists(&path) {
        return Ok(0);
    }

    let bytes = fs.read(&path)?;
    if bytes.len() < 8 {
        return Ok(0);
    }

    Cursor::new(bytes)
        .read_i64::<LittleEndian>()
        .map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{column_type::ColumnType, fs::StdFileSystem};
    use std::io::Write;
    use test_log::test;

    fn snapshot(transient: u64) -> TxnSnapshot {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_txi");
        let mut bytes = [0u8; 32];
        bytes[0..8].copy_from_slice(&1u64.to_le_bytes());
        bytes[8..16].copy_from_slice(&transient.to_le_bytes());
        std::fs::File::create(&path).unwrap().write_all(&bytes).unwrap();
        crate::txn::TxnView::open(&StdFileSystem, dir.path()).unwrap().snapshot()
    }

    fn build_metadata(columns: &[(&str, ColumnType)]) -> TableMetadata {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(columns.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.extend_from_slice(&(-1i32).to_le_bytes());
        for (name, ty) in columns {
            bytes.extend_from_slice(&(name.len() as i32).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(u8::from(*ty));
        }
        TableMetadata::parse_for_test(&bytes).unwrap()
    }

    #[test]
    fn stride_shift_covers_two_slots_per_column() {
        assert_eq!(stride_shift(1), 2);
        assert_eq!(stride_shift(3), 3);
        assert_eq!(stride_shift(4), 4);
    }

    #[test]
    fn missing_partition_directory_has_zero_size() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = build_metadata(&[("v", ColumnType::Int)]);
        let mut table = PartitionTable::new(PartitionScheme::None, 0, 1);

        let size = table
            .open(&StdFileSystem, dir.path(), &metadata, 0, 1, snapshot(0))
            .unwrap();
        assert_eq!(size, 0);
        assert_eq!(table.size(0), 0);
    }

    #[test]
    fn opens_live_partition_columns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("default")).unwrap();
        {
            let mut f = std::fs::File::create(dir.path().join("default/v.d")).unwrap();
            f.write_all(&1i32.to_ne_bytes()).unwrap();
            f.write_all(&2i32.to_ne_bytes()).unwrap();
            f.write_all(&3i32.to_ne_bytes()).unwrap();
        }

        let metadata = build_metadata(&[("v", ColumnType::Int)]);
        let mut table = PartitionTable::new(PartitionScheme::None, 0, 1);

        let size = table
            .open(&StdFileSystem, dir.path(), &metadata, 0, 1, snapshot(3))
            .unwrap();
        assert_eq!(size, 3);

        let region = table.data_region(0, 0).unwrap();
        assert_eq!(region.get_int(4), 2);
        assert_eq!(table.column_top(0, 0), 0);
    }

    #[test]
    fn missing_column_file_leaves_slot_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("default")).unwrap();
        std::fs::write(dir.path().join("default/_archive"), 5i64.to_le_bytes()).unwrap();

        let metadata = build_metadata(&[("v", ColumnType::Int)]);
        let mut table = PartitionTable::new(PartitionScheme::None, 0, 1);

        table
            .open(&StdFileSystem, dir.path(), &metadata, 0, 2, snapshot(0))
            .unwrap();
        assert!(table.data_region(0, 0).is_none());
    }
}
