// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{calendar::PartitionScheme, column_type::ColumnType, error::Error, fs::FileSystem};
use byteorder::{LittleEndian, ReadBytesExt};
use std::{io::Cursor, path::Path};

/// Name of the metadata blob under a table root.
pub const META_FILE_NAME: &str = "_meta";

// Fixed little-endian layout adopted from the writer contract this crate targets:
//
//   [0..4)   column count            (i32)
//   [4..8)   partitioning scheme tag (i32: 0=none, 1=year, 2=month, 3=day)
//   [8..12)  designated timestamp column index, or -1 (i32)
//   [12..)   column table, one entry per column:
//              [0..4)  name length in UTF-8 bytes (i32)
//              [4..4+n) name bytes
//              [4+n..5+n) column type tag (u8)
const HEADER_LEN: usize = 12;

/// Parsed `_meta` contents: column count, names, types, the designated timestamp column, and
/// the table's partitioning scheme. Immutable once constructed.
#[derive(Debug)]
pub struct TableMetadata {
    column_names: Vec<String>,
    column_types: Vec<ColumnType>,
    designated_timestamp_index: Option<usize>,
    partition_scheme: PartitionScheme,
}

impl TableMetadata {
    /// Loads and parses `<root>/_meta`.
    pub fn load(fs: &impl FileSystem, table_root: &Path) -> crate::Result<Self> {
        let path = table_root.join(META_FILE_NAME);

        if !fs.exists(&path) {
            return Err(Error::MissingFile(META_FILE_NAME));
        }

        let bytes = fs.read(&path)?;
        Self::parse(&bytes)
    }

    /// Exposes `parse` to other modules' tests that need a `TableMetadata` without a file on
    /// disk (e.g. partition-opening tests).
    #[cfg(test)]
    pub(crate) fn parse_for_test(bytes: &[u8]) -> crate::Result<Self> {
        Self::parse(bytes)
    }

    fn parse(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::CorruptMetadata("truncated header".to_string()));
        }

        let mut cursor = Cursor::new(bytes);

        let column_count = cursor
            .read_i32::<LittleEndian>()
            .map_err(|e| Error::CorruptMetadata(e.to_string()))?;

        if !(0..=4096).contains(&column_count) {
            return Err(Error::CorruptMetadata(format!(
                "column count {column_count} out of range"
            )));
        }

        let scheme_tag = cursor
            .read_i32::<LittleEndian>()
            .map_err(|e| Error::CorruptMetadata(e.to_string()))?;

        let partition_scheme = match scheme_tag {
            0 => PartitionScheme::None,
            1 => PartitionScheme::Year,
            2 => PartitionScheme::Month,
            3 => PartitionScheme::Day,
            other => {
                return Err(Error::CorruptMetadata(format!(
                    "unknown partitioning scheme tag {other}"
                )))
            }
        };

        let designated_timestamp_raw = cursor
            .read_i32::<LittleEndian>()
            .map_err(|e| Error::CorruptMetadata(e.to_string()))?;

        #[allow(clippy::cast_sign_loss)]
        let column_count = column_count as usize;
        let mut column_names = Vec::with_capacity(column_count);
        let mut column_types = Vec::with_capacity(column_count);

        for _ in 0..column_count {
            let name_len = cursor
                .read_i32::<LittleEndian>()
                .map_err(|e| Error::CorruptMetadata(e.to_string()))?;

            if !(0..=1024).contains(&name_len) {
                return Err(Error::CorruptMetadata(format!(
                    "column name length {name_len} out of range"
                )));
            }

            #[allow(clippy::cast_sign_loss)]
            let name_len = name_len as usize;
            let start = cursor.position() as usize;
            let end = start
                .checked_add(name_len)
                .ok_or_else(|| Error::CorruptMetadata("name length overflow".to_string()))?;

            let name_bytes = bytes
                .get(start..end)
                .ok_or_else(|| Error::CorruptMetadata("truncated column name".to_string()))?;

            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|e| Error::CorruptMetadata(e.to_string()))?;

            cursor.set_position(end as u64);

            let type_tag = cursor
                .read_u8()
                .map_err(|e| Error::CorruptMetadata(e.to_string()))?;

            let column_type = ColumnType::try_from(type_tag)
                .map_err(|()| Error::CorruptMetadata(format!("unknown column type {type_tag}")))?;

            column_names.push(name);
            column_types.push(column_type);
        }

        let designated_timestamp_index = if designated_timestamp_raw < 0 {
            None
        } else {
            let index = designated_timestamp_raw as usize;
            if index >= column_count {
                return Err(Error::CorruptMetadata(format!(
                    "designated timestamp index {index} out of range"
                )));
            }
            Some(index)
        };

        Ok(Self {
            column_names,
            column_types,
            designated_timestamp_index,
            partition_scheme,
        })
    }

    /// Number of columns in the table.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    /// Case-insensitive lookup of a column's zero-based index by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Name of the column at `index`.
    #[must_use]
    pub fn column_name(&self, index: usize) -> &str {
        &self.column_names[index]
    }

    /// Type of the column at `index`.
    #[must_use]
    pub fn column_type(&self, index: usize) -> ColumnType {
        self.column_types[index]
    }

    /// Zero-based index of the designated timestamp column, or `None` if the table has none.
    #[must_use]
    pub fn designated_timestamp_index(&self) -> Option<usize> {
        self.designated_timestamp_index
    }

    /// The table's partitioning scheme.
    #[must_use]
    pub fn partition_scheme(&self) -> PartitionScheme {
        self.partition_scheme
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn build_meta(columns: &[(&str, ColumnType)], ts_index: i32, scheme: i32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(columns.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&scheme.to_le_bytes());
        bytes.extend_from_slice(&ts_index.to_le_bytes());

        for (name, ty) in columns {
            bytes.extend_from_slice(&(name.len() as i32).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(u8::from(*ty));
        }

        bytes
    }

    #[test]
    fn parses_simple_metadata() {
        let bytes = build_meta(&[("ts", ColumnType::Timestamp), ("v", ColumnType::Int)], 0, 3);
        let meta = TableMetadata::parse(&bytes).unwrap();

        assert_eq!(meta.column_count(), 2);
        assert_eq!(meta.column_name(0), "ts");
        assert_eq!(meta.column_type(1), ColumnType::Int);
        assert_eq!(meta.designated_timestamp_index(), Some(0));
        assert_eq!(meta.partition_scheme(), PartitionScheme::Day);
        assert_eq!(meta.column_index("V"), Some(1));
    }

    #[test]
    fn negative_timestamp_index_means_none() {
        let bytes = build_meta(&[("v", ColumnType::Int)], -1, 0);
        let meta = TableMetadata::parse(&bytes).unwrap();
        assert_eq!(meta.designated_timestamp_index(), None);
        assert_eq!(meta.partition_scheme(), PartitionScheme::None);
    }

    #[test]
    fn truncated_header_is_corrupt() {
        assert!(TableMetadata::parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn unknown_type_tag_is_corrupt() {
        let mut bytes = build_meta(&[("v", ColumnType::Int)], -1, 0);
        *bytes.last_mut().unwrap() = 200;
        assert!(TableMetadata::parse(&bytes).is_err());
    }
}
