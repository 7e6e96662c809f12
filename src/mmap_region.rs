// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{error::Error, fs::FileSystem};
use memmap2::Mmap;
use std::{fs::File, path::Path};

/// A byte window over a file that can grow: [`MappedRegion::track_file_size`] remaps it to
/// cover the file's current on-disk length, which is how a reader observes a writer's appends.
///
/// `memmap2` maps a file's entire current length in one call, so mapping in page units collapses
/// to "remap the whole file when it has grown"; there is no partial window to manage on top of
/// what `memmap2` already does.
pub struct MappedRegion {
    file: File,
    mmap: Option<Mmap>,
    mapped_len: usize,
}

impl MappedRegion {
    /// Opens `path` and maps its current contents. A zero-length file maps to an empty region
    /// rather than attempting to `mmap` zero bytes, which fails on some platforms.
    pub fn open(fs: &impl FileSystem, path: &Path) -> crate::Result<Self> {
        let file = fs.open_read(path)?;
        let len = file
            .metadata()
            .map_err(|e| Error::io(path, e))?
            .len();

        let mmap = map_if_nonempty(&file, path, len)?;

        Ok(Self {
            file,
            mmap,
            mapped_len: usize_from_u64(len),
        })
    }

    /// Remaps to cover the file's current on-disk length. Never shrinks the observed length:
    /// if the file did not grow, this is a no-op.
    pub fn track_file_size(&mut self, path: &Path) -> crate::Result<()> {
        let len = self
            .file
            .metadata()
            .map_err(|e| Error::io(path, e))?
            .len();

        let len = usize_from_u64(len);

        if len > self.mapped_len {
            self.mmap = map_if_nonempty(&self.file, path, len as u64)?;
            self.mapped_len = len;
        }

        Ok(())
    }

    /// The currently mapped length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapped_len
    }

    /// `true` if nothing is mapped (the backing file was empty at last observation).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapped_len == 0
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Reads a `bool` at `offset`.
    #[must_use]
    pub fn get_bool(&self, offset: u64) -> bool {
        self.get_byte(offset) != 0
    }

    /// Reads a signed byte at `offset`.
    #[must_use]
    pub fn get_byte(&self, offset: u64) -> i8 {
        read_array::<1>(self.bytes(), offset)[0] as i8
    }

    /// Reads a native-endian `i16` at `offset`.
    #[must_use]
    pub fn get_short(&self, offset: u64) -> i16 {
        i16::from_ne_bytes(read_array(self.bytes(), offset))
    }

    /// Reads a native-endian `i32` at `offset`.
    #[must_use]
    pub fn get_int(&self, offset: u64) -> i32 {
        i32::from_ne_bytes(read_array(self.bytes(), offset))
    }

    /// Reads a native-endian `i64` at `offset`.
    #[must_use]
    pub fn get_long(&self, offset: u64) -> i64 {
        i64::from_ne_bytes(read_array(self.bytes(), offset))
    }

    /// Reads a native-endian `f32` at `offset`.
    #[must_use]
    pub fn get_float(&self, offset: u64) -> f32 {
        f32::from_ne_bytes(read_array(self.bytes(), offset))
    }

    /// Reads a native-endian `f64` at `offset`.
    #[must_use]
    pub fn get_double(&self, offset: u64) -> f64 {
        f64::from_ne_bytes(read_array(self.bytes(), offset))
    }

    /// Reads the length-prefixed binary payload format (`i32 len` then `len` bytes;
    /// `len == -1` means null) at `offset`, as a zero-copy flyweight.
    #[must_use]
    pub fn get_bin(&self, offset: u64) -> BinaryValue<'_> {
        let len = i32::from_ne_bytes(read_array(self.bytes(), offset));

        if len < 0 {
            return BinaryValue(None);
        }

        #[allow(clippy::cast_sign_loss)]
        let len = len as usize;
        let start = offset as usize + 4;
        let end = start + len;

        BinaryValue(self.bytes().get(start..end))
    }

    /// A second, independent flyweight over the same binary payload as [`MappedRegion::get_bin`].
    ///
    /// In the observed source this exists because that language's flyweight views are mutable
    /// cursors that alias a single reusable buffer, so two concurrent reads from the same
    /// column need distinct instances. A Rust shared borrow has no such aliasing hazard — this
    /// method is kept only so call sites that need two simultaneous views read the same way.
    #[must_use]
    pub fn get_bin2(&self, offset: u64) -> BinaryValue<'_> {
        self.get_bin(offset)
    }

    /// Reads the length-prefixed UTF-16 string format (`i32 char-count` then
    /// `2 * char-count` bytes; `char-count == -1` means null) at `offset`.
    #[must_use]
    pub fn get_str(&self, offset: u64) -> StringValue<'_> {
        let char_count = i32::from_ne_bytes(read_array(self.bytes(), offset));

        if char_count < 0 {
            return StringValue { char_count, units: None };
        }

        #[allow(clippy::cast_sign_loss)]
        let byte_len = char_count as usize * 2;
        let start = offset as usize + 4;
        let end = start + byte_len;

        StringValue {
            char_count,
            units: self.bytes().get(start..end),
        }
    }

    /// A second, independent flyweight over the same string payload as [`MappedRegion::get_str`].
    /// See [`MappedRegion::get_bin2`] for why this exists.
    #[must_use]
    pub fn get_str2(&self, offset: u64) -> StringValue<'_> {
        self.get_str(offset)
    }

    /// Reads only the length prefix of a variable-length payload, without materializing it.
    #[must_use]
    pub fn get_var_len(&self, offset: u64) -> i32 {
        i32::from_ne_bytes(read_array(self.bytes(), offset))
    }
}

fn map_if_nonempty(file: &File, path: &Path, len: u64) -> crate::Result<Option<Mmap>> {
    if len == 0 {
        return Ok(None);
    }

    // SAFETY: the caller (the writer process) never truncates or shrinks a column/index/archive
    // file in place; it only appends, so the mapping stays valid for its observed length.
    #[allow(unsafe_code)]
    let mmap = unsafe { Mmap::map(file) }.map_err(|e| Error::io(path, e))?;

    Ok(Some(mmap))
}

fn usize_from_u64(value: u64) -> usize {
    #[allow(clippy::cast_possible_truncation)]
    {
        value as usize
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: u64) -> [u8; N] {
    let start = offset as usize;
    let end = start + N;

    bytes
        .get(start..end)
        .and_then(|slice| slice.try_into().ok())
        .unwrap_or([0; N])
}

/// A zero-copy flyweight over a `STRING` column's variable-length UTF-16 payload.
#[derive(Copy, Clone, Debug)]
pub struct StringValue<'a> {
    char_count: i32,
    units: Option<&'a [u8]>,
}

impl<'a> StringValue<'a> {
    /// `true` if this value is the null sentinel (`char_count == -1`).
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.units.is_none()
    }

    /// Number of UTF-16 code units, or `-1` for null.
    #[must_use]
    pub fn char_count(&self) -> i32 {
        self.char_count
    }

    /// Decodes the payload to an owned `String`, lossily replacing unpaired surrogates.
    /// Returns `None` for null values.
    #[must_use]
    pub fn to_string_lossy(&self) -> Option<String> {
        let units = self.units?;

        let code_units = units
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]));

        Some(char::decode_utf16(code_units)
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect())
    }
}

/// A zero-copy flyweight over a `BINARY` column's variable-length payload.
#[derive(Copy, Clone, Debug)]
pub struct BinaryValue<'a>(Option<&'a [u8]>);

impl<'a> BinaryValue<'a> {
    /// `true` if this value is the null sentinel (`len == -1`).
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Length in bytes, or `-1` for null.
    #[must_use]
    pub fn len(&self) -> i32 {
        self.0.map_or(-1, |b| b.len() as i32)
    }

    /// `true` if this is an empty (but non-null) payload.
    #[must_use]
    pub fn is_empty_payload(&self) -> bool {
        self.0.is_some_and(<[u8]>::is_empty)
    }

    /// Borrows the raw payload bytes, or `None` for null.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        self.0
    }
}
