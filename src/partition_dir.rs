// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    calendar::{PartitionScheme, Timestamp},
    fs::{EntryKind, FileSystem},
};
use std::path::Path;

/// Scans a table root for partition directories and locates the earliest one.
///
/// Unparseable directory names are silently skipped: they may be internal writer artifacts
/// (e.g. a temp directory used during a rename) rather than partitions.
pub struct PartitionDirectory {
    scheme: PartitionScheme,
    /// `None` if no directory parsed under this table's scheme.
    partition_min: Option<Timestamp>,
}

impl PartitionDirectory {
    /// Scans `table_root` for entries matching `scheme`'s directory-name format.
    pub fn scan(
        fs: &impl FileSystem,
        table_root: &Path,
        scheme: PartitionScheme,
    ) -> crate::Result<Self> {
        if scheme == PartitionScheme::None {
            return Ok(Self {
                scheme,
                partition_min: Some(0),
            });
        }

        let entries = fs.read_dir(table_root)?;
        let mut partition_min = None;

        for entry in entries {
            if !matches!(entry.kind(), EntryKind::Dir | EntryKind::Symlink) {
                continue;
            }

            let Ok(parsed) = scheme.parse(entry.file_name()) else {
                log::trace!("skipping unparseable directory entry {:?}", entry.path());
                continue;
            };

            partition_min = Some(match partition_min {
                Some(current) if current <= parsed => current,
                _ => parsed,
            });
        }

        Ok(Self {
            scheme,
            partition_min,
        })
    }

    /// The earliest partition-start instant found, or `None` if the table root contains no
    /// parseable partition directories.
    #[must_use]
    pub fn partition_min(&self) -> Option<Timestamp> {
        self.partition_min
    }

    /// Number of partitions implied by `partition_min` and the writer's current `maxTimestamp`.
    ///
    /// `0` if no partition directory parsed at all. `1` for a non-partitioned table.
    #[must_use]
    pub fn partition_count(&self, max_timestamp: Timestamp) -> u32 {
        if self.scheme == PartitionScheme::None {
            return 1;
        }

        let Some(partition_min) = self.partition_min else {
            return 0;
        };

        let floored_max = self.scheme.floor(max_timestamp);
        let delta = self.scheme.between(partition_min, floored_max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            (delta + 1).max(0) as u32
        }
    }

    /// The partitioning scheme this directory was scanned under.
    #[must_use]
    pub fn scheme(&self) -> PartitionScheme {
        self.scheme
    }
}
