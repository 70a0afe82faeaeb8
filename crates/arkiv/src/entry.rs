use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::format::ArchiveFormat;
use crate::handle::ArchiveHandle;
use crate::path;
use crate::source::ContainerSource;
use crate::stream::EntryReader;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// Zip central-directory metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZipDetails {
    pub compressed_size: u64,
    pub compression: zip::CompressionMethod,
    pub encrypted: bool,
    pub unix_mode: Option<u32>,
}

/// Tar header metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TarDetails {
    pub mode: Option<u32>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub username: Option<String>,
    pub groupname: Option<String>,
    pub link_target: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatDetails {
    Zip(ZipDetails),
    Tar(TarDetails),
}

/// Snapshot of one archive member.
///
/// An `Entry` does not track the container: after a mutation, call
/// [`Entry::refresh`] or re-resolve it through a handle.
#[derive(Clone, Debug)]
pub struct Entry {
    source: ContainerSource,
    relative_path: String,
    kind: EntryKind,
    format: ArchiveFormat,
    last_modified: Option<DateTime<Utc>>,
    uncompressed_len: u64,
    details: Option<FormatDetails>,
}

impl Entry {
    /// Build a snapshot. `relative_path` is canonicalized for `kind`; the
    /// container is not touched.
    pub fn new(
        source: ContainerSource,
        relative_path: &str,
        kind: EntryKind,
        format: ArchiveFormat,
    ) -> Self {
        let relative_path = path::normalize_entry_path(relative_path, kind == EntryKind::Directory);
        Self {
            source,
            relative_path,
            kind,
            format,
            last_modified: None,
            uncompressed_len: 0,
            details: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: Option<DateTime<Utc>>) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_uncompressed_len(mut self, len: u64) -> Self {
        self.uncompressed_len = len;
        self
    }

    pub fn with_details(mut self, details: FormatDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn source(&self) -> &ContainerSource {
        &self.source
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Final path segment, without the directory marker.
    pub fn name(&self) -> &str {
        path::leaf_name(&self.relative_path)
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn uncompressed_len(&self) -> u64 {
        self.uncompressed_len
    }

    /// Stored size. Only zip records one.
    pub fn compressed_len(&self) -> Option<u64> {
        match &self.details {
            Some(FormatDetails::Zip(zip)) => Some(zip.compressed_size),
            _ => None,
        }
    }

    pub fn details(&self) -> Option<&FormatDetails> {
        self.details.as_ref()
    }

    /// Rooted form used for display and sorting, e.g. `/docs/readme.txt`.
    pub fn format_directory_path(&self) -> String {
        format!("/{}", self.relative_path)
    }

    /// Re-read size, timestamp and format details from a live handle.
    ///
    /// # Panics
    ///
    /// Panics if `handle` belongs to a different container.
    pub fn refresh(&mut self, handle: &ArchiveHandle) -> Result<()> {
        assert!(
            handle.source().key() == self.source.key(),
            "entry '{}' of {} refreshed against a handle for {}",
            self.relative_path,
            self.source,
            handle.source()
        );
        let live = handle
            .entry(&self.relative_path)
            .ok_or_else(|| Error::EntryNotFound {
                path: self.relative_path.clone(),
            })?;
        self.last_modified = live.last_modified;
        self.uncompressed_len = live.uncompressed_len;
        self.details = live.details;
        Ok(())
    }

    /// Copy of this entry's metadata under another path.
    pub(crate) fn relocated(&self, relative_path: &str) -> Self {
        let mut moved = self.clone();
        moved.relative_path = path::normalize_entry_path(relative_path, self.is_directory());
        moved
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path)
    }
}

/// Entries whose payload can be streamed out of a live handle.
pub trait Extractable {
    /// Open the payload; `None` means the entry is missing or empty.
    fn open_content<'h>(&self, handle: &'h mut ArchiveHandle) -> Result<Option<EntryReader<'h>>>;
}

/// Entries that can be renamed, moved or removed when their container is a
/// file on disk.
pub trait MutableIfFileBacked {
    fn is_mutable(&self) -> bool;

    fn ensure_mutable(&self) -> Result<()>;
}

impl Extractable for Entry {
    fn open_content<'h>(&self, handle: &'h mut ArchiveHandle) -> Result<Option<EntryReader<'h>>> {
        EntryReader::open(handle, &self.relative_path)
    }
}

impl MutableIfFileBacked for Entry {
    fn is_mutable(&self) -> bool {
        !self.source.is_stream()
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_mutable() {
            Ok(())
        } else {
            Err(Error::UnsupportedOnStreamBackedEntry {
                path: self.relative_path.clone(),
            })
        }
    }
}
