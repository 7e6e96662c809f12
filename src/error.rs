// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::path::PathBuf;

/// Represents errors that can occur while opening or reading a table.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred against a specific path.
    Io {
        /// Path the operation was performed against.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// The table root contains a `_todo` marker: a writer-side recovery is pending and the
    /// table is not safe to open for reading.
    PendingRecovery,

    /// A required file (`_meta` or `_txi`) is missing from the table root.
    MissingFile(&'static str),

    /// `_meta` could not be parsed (truncated, bad column count, unknown column type tag).
    CorruptMetadata(String),

    /// A partition's `_archive` file is shorter than the 8 bytes it must contain.
    CorruptArchive {
        /// Name of the offending partition directory.
        partition: String,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TableReaderError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Table reader result.
pub type Result<T> = std::result::Result<T, Error>;
