// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A read-only cursor over a partitioned, column-oriented, append-only time-series table backed
//! by memory-mapped files.
//!
//! [`TableReader`] opens a table directory written by an external process, exposes forward
//! iteration and random access by row id, and tolerates a concurrent writer appending rows or
//! creating new partitions: call [`TableReader::reload`] to observe its progress.
//!
//! This crate does not write tables, evolve schemas, compact storage, or parse queries — it only
//! reads what is already on disk.
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)]

pub mod calendar;
pub mod column_type;
pub mod cursor;
mod error;
pub mod fs;
pub mod metadata;
pub mod mmap_region;
pub mod partition;
pub mod partition_dir;
pub mod reader;
pub mod row_id;
pub mod txn;

pub use calendar::{PartitionScheme, Timestamp};
pub use column_type::ColumnType;
pub use cursor::{ColumnValue, Record};
pub use error::{Error, Result};
pub use fs::{DirEntry, EntryKind, FileSystem, MemFileSystem, StdFileSystem};
pub use metadata::TableMetadata;
pub use mmap_region::{BinaryValue, StringValue};
pub use reader::{ReaderOptions, TableReader};
pub use row_id::RowId;
pub use txn::Reload;
