// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

/// Kind of a directory entry, as reported by a [`FileSystem`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link (not followed).
    Symlink,
}

/// Lightweight directory entry used by [`FileSystem`].
#[derive(Clone, Debug)]
pub struct DirEntry {
    path: PathBuf,
    file_name: String,
    kind: EntryKind,
}

impl DirEntry {
    /// Returns the full path for this entry.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file name for this entry.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the entry's kind.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }
}

/// Filesystem abstraction for the table reader.
///
/// Exists so the reader's construction and directory-scanning logic can run against an
/// in-memory double in tests, without involving real files, while production code runs
/// against [`StdFileSystem`].
pub trait FileSystem: Send + Sync {
    /// Checks whether a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Opens a file for reading, returning an error carrying the offending path on failure.
    fn open_read(&self, path: &Path) -> crate::Result<fs::File>;

    /// Reads an entire file into memory.
    fn read(&self, path: &Path) -> crate::Result<Vec<u8>>;

    /// Lists directory entries. Returns an empty vector if the directory does not exist.
    fn read_dir(&self, path: &Path) -> crate::Result<Vec<DirEntry>>;

    /// The OS page size used to size initial `mmap` windows.
    fn page_size(&self) -> usize;
}

/// `std::fs`-backed filesystem implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.try_exists().unwrap_or(false)
    }

    fn open_read(&self, path: &Path) -> crate::Result<fs::File> {
        fs::File::open(path).map_err(|e| crate::Error::io(path, e))
    }

    fn read(&self, path: &Path) -> crate::Result<Vec<u8>> {
        fs::read(path).map_err(|e| crate::Error::io(path, e))
    }

    fn read_dir(&self, path: &Path) -> crate::Result<Vec<DirEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();

        for entry in fs::read_dir(path).map_err(|e| crate::Error::io(path, e))? {
            let entry = entry.map_err(|e| crate::Error::io(path, e))?;
            let file_type = entry.file_type().map_err(|e| crate::Error::io(path, e))?;

            let kind = if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };

            out.push(DirEntry {
                path: entry.path(),
                file_name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }

        Ok(out)
    }

    fn page_size(&self) -> usize {
        // `memmap2` maps a file's full length in one call, so this is only used to size the
        // minimum window for a zero-length file; the common 4 KiB default is good enough and
        // avoids a platform-specific `sysconf` dependency for a value that is otherwise unused.
        4096
    }
}

/// An in-memory [`FileSystem`] test double.
///
/// Directories are implicit: any path with a registered descendant is treated as existing.
#[derive(Clone, Debug, Default)]
pub struct MemFileSystem {
    files: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<PathBuf, Vec<u8>>>>,
}

impl MemFileSystem {
    /// Creates an empty in-memory filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the bytes stored at `path`.
    pub fn write(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.files
            .write()
            .expect("lock is poisoned")
            .insert(path.into(), bytes.into());
    }
}

impl FileSystem for MemFileSystem {
    fn exists(&self, path: &Path) -> bool {
        let files = self.files.read().expect("lock is poisoned");
        files.contains_key(path) || files.keys().any(|p| p.starts_with(path))
    }

    fn open_read(&self, path: &Path) -> crate::Result<fs::File> {
        // The in-memory double is only used for directory-scan and metadata-parse unit tests
        // that never need a real file handle; real data flows through `read`/`read_dir`.
        Err(crate::Error::io(
            path,
            io::Error::new(io::ErrorKind::Unsupported, "MemFileSystem has no real fd"),
        ))
    }

    fn read(&self, path: &Path) -> crate::Result<Vec<u8>> {
        self.files
            .read()
            .expect("lock is poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| crate::Error::io(path, io::Error::from(io::ErrorKind::NotFound)))
    }

    fn read_dir(&self, path: &Path) -> crate::Result<Vec<DirEntry>> {
        let files = self.files.read().expect("lock is poisoned");
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for full_path in files.keys() {
            let Ok(rest) = full_path.strip_prefix(path) else {
                continue;
            };

            let Some(first) = rest.components().next() else {
                continue;
            };

            let child = path.join(first.as_os_str());

            if !seen.insert(child.clone()) {
                continue;
            }

            let kind = if child == *full_path {
                EntryKind::File
            } else {
                EntryKind::Dir
            };

            out.push(DirEntry {
                file_name: first.as_os_str().to_string_lossy().into_owned(),
                path: child,
                kind,
            });
        }

        Ok(out)
    }

    fn page_size(&self) -> usize {
        4096
    }
}
