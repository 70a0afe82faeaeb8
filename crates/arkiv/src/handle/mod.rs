//! Open sessions against one container.
//!
//! A handle loads the container's entry table once and keeps a live listing.
//! In update mode every mutation is staged against that listing: originals
//! are referenced, new payloads are spooled. Nothing touches the container
//! file until [`ArchiveHandle::commit`] rewrites it into a sibling temporary
//! file and atomically swaps it in.

mod tar;
mod zip;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::Path;

use arkiv_fs::PlaceOptions;
use chrono::Utc;
use tempfile::SpooledTempFile;

use crate::credential::Credential;
use crate::entry::{Entry, EntryKind, FormatDetails, TarDetails, ZipDetails};
use crate::error::{Error, Result};
use crate::format::{self, ArchiveFormat};
use crate::options::BatchOptions;
use crate::path;
use crate::source::ContainerSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpenMode {
    Read,
    Update,
}

/// Identity of a handle within its cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub(crate) u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a listed entry's bytes live.
pub(crate) enum Payload {
    /// Member of the container as it was opened, by backend ordinal.
    Original(usize),
    /// Content written during this session.
    Staged(SpooledTempFile),
    /// Directory created during this session.
    Empty,
}

impl Payload {
    fn duplicate(&mut self, spool_threshold: usize) -> io::Result<Payload> {
        match self {
            Self::Original(index) => Ok(Self::Original(*index)),
            Self::Empty => Ok(Self::Empty),
            Self::Staged(spool) => {
                spool.rewind()?;
                let mut copy = SpooledTempFile::new(spool_threshold);
                io::copy(spool, &mut copy)?;
                Ok(Self::Staged(copy))
            }
        }
    }
}

pub(crate) struct Slot {
    pub(crate) entry: Entry,
    pub(crate) payload: Payload,
}

enum Backend {
    Zip(zip::ZipBackend),
    Tar(tar::TarBackend),
}

pub struct ArchiveHandle {
    id: HandleId,
    source: ContainerSource,
    mode: OpenMode,
    format: ArchiveFormat,
    backend: Backend,
    slots: BTreeMap<String, Slot>,
    options: BatchOptions,
    dirty: bool,
}

impl ArchiveHandle {
    pub(crate) fn open(
        id: HandleId,
        source: &ContainerSource,
        mode: OpenMode,
        options: &BatchOptions,
    ) -> Result<Self> {
        let name = source.name();
        if mode == OpenMode::Update && source.is_stream() {
            return Err(Error::UnsupportedOnStreamBackedEntry { path: name });
        }

        let open_failed = |error| Error::Open {
            source_name: name.clone(),
            error,
        };
        let mut reader = source.open_reader().map_err(open_failed)?;
        let format = format::detect_from_reader(&mut reader)
            .map_err(open_failed)?
            .ok_or_else(|| Error::invalid_format(&name, "unrecognized container signature"))?;

        let (backend, slots) = match format {
            ArchiveFormat::Zip => {
                let (backend, slots) = zip::load(source, reader)?;
                (Backend::Zip(backend), slots)
            }
            ArchiveFormat::Tar(compress) => {
                let (backend, slots) = tar::load(source, reader, compress, options.spool_threshold)?;
                (Backend::Tar(backend), slots)
            }
        };

        tracing::debug!(
            handle = %id,
            source = %name,
            ?mode,
            ?format,
            entries = slots.len(),
            "opened archive"
        );

        Ok(Self {
            id,
            source: source.clone(),
            mode,
            format,
            backend,
            slots,
            options: options.clone(),
            dirty: false,
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn source(&self) -> &ContainerSource {
        &self.source
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub(crate) fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Whether staged mutations are waiting for [`commit`](Self::commit).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every live entry, ordered by path.
    pub fn entries(&self) -> Vec<Entry> {
        self.slots.values().map(|slot| slot.entry.clone()).collect()
    }

    pub fn entry(&self, path: &str) -> Option<Entry> {
        self.slots.get(path).map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.slots.contains_key(path)
    }

    /// Paths strictly below directory `dir`, ordered.
    pub fn descendant_paths(&self, dir: &str) -> Vec<String> {
        if !dir.ends_with('/') {
            return Vec::new();
        }
        self.slots
            .range::<str, _>((Bound::Excluded(dir), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(dir))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn descendants(&self, dir: &str) -> Vec<Entry> {
        self.descendant_paths(dir)
            .iter()
            .filter_map(|path| self.entry(path))
            .collect()
    }

    /// The live path that would collide with creating `path`, if any.
    ///
    /// Besides an exact match this catches the same name with the other kind
    /// (`a/b` against `a/b/`) and implicit directories formed by deeper
    /// members.
    pub fn occupant(&self, path: &str) -> Option<String> {
        if self.contains(path) {
            return Some(path.to_string());
        }
        let file_form = path.trim_end_matches('/');
        let dir_form = format!("{file_form}/");
        if path.ends_with('/') && self.contains(file_form) {
            return Some(file_form.to_string());
        }
        if self.contains(&dir_form) {
            return Some(dir_form);
        }
        self.slots
            .range::<str, _>((Bound::Excluded(dir_form.as_str()), Bound::Unbounded))
            .next()
            .filter(|(existing, _)| existing.starts_with(&dir_form))
            .map(|(existing, _)| existing.clone())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.source.is_stream() {
            return Err(Error::UnsupportedOnStreamBackedEntry {
                path: self.source.name(),
            });
        }
        if self.mode != OpenMode::Update {
            return Err(Error::ReadOnlyHandle {
                source_name: self.source.name(),
            });
        }
        Ok(())
    }

    /// Create `new` as a copy of `old`. Both are canonical entry paths; the
    /// kind of `new` follows `old`.
    pub fn copy_entry(&mut self, old: &str, new: &str) -> Result<Entry> {
        self.ensure_writable()?;
        let not_found = || Error::EntryNotFound {
            path: old.to_string(),
        };
        let directory = self.slots.get(old).ok_or_else(not_found)?.entry.is_directory();
        let new = path::normalize_entry_path(new, directory);
        path::validate_path(&new)?;
        if self.contains(&new) {
            return Err(Error::DuplicateEntry { path: new });
        }

        let threshold = self.options.spool_threshold;
        let source = self.slots.get_mut(old).ok_or_else(not_found)?;
        let payload = source.payload.duplicate(threshold)?;
        let entry = source.entry.relocated(&new);

        tracing::trace!(handle = %self.id, from = old, to = %new, "copied entry");
        self.slots.insert(
            new,
            Slot {
                entry: entry.clone(),
                payload,
            },
        );
        self.dirty = true;
        Ok(entry)
    }

    pub fn remove_entry(&mut self, path: &str) -> Result<Entry> {
        self.ensure_writable()?;
        let slot = self.slots.remove(path).ok_or_else(|| Error::EntryNotFound {
            path: path.to_string(),
        })?;
        tracing::trace!(handle = %self.id, path, "removed entry");
        self.dirty = true;
        Ok(slot.entry)
    }

    pub fn create_directory(&mut self, path: &str) -> Result<Entry> {
        self.ensure_writable()?;
        let path = path::normalize_directory_path(path);
        path::validate_path(&path)?;
        if let Some(existing) = self.occupant(&path) {
            return Err(Error::DuplicateEntry { path: existing });
        }
        let entry = Entry::new(self.source.clone(), &path, EntryKind::Directory, self.format)
            .with_last_modified(Some(Utc::now()))
            .with_details(self.fresh_details(None, 0));
        self.slots.insert(
            path,
            Slot {
                entry: entry.clone(),
                payload: Payload::Empty,
            },
        );
        self.dirty = true;
        Ok(entry)
    }

    /// Install spooled content as the payload of file `path`, replacing any
    /// previous payload.
    pub(crate) fn stage_file(&mut self, path: &str, mut spool: SpooledTempFile) -> Result<Entry> {
        self.ensure_writable()?;
        let len = spool.seek(SeekFrom::End(0))?;
        spool.rewind()?;

        let previous = self.slots.get(path).and_then(|slot| slot.entry.details().cloned());
        let entry = Entry::new(self.source.clone(), path, EntryKind::File, self.format)
            .with_uncompressed_len(len)
            .with_last_modified(Some(Utc::now()))
            .with_details(self.fresh_details(previous, len));
        self.slots.insert(
            path.to_string(),
            Slot {
                entry: entry.clone(),
                payload: Payload::Staged(spool),
            },
        );
        self.dirty = true;
        tracing::trace!(handle = %self.id, path, len, "staged entry content");
        Ok(entry)
    }

    fn fresh_details(&self, previous: Option<FormatDetails>, len: u64) -> FormatDetails {
        match (self.format, previous) {
            (ArchiveFormat::Zip, Some(FormatDetails::Zip(prev))) => FormatDetails::Zip(ZipDetails {
                compressed_size: len,
                compression: ::zip::CompressionMethod::Deflated,
                encrypted: false,
                unix_mode: prev.unix_mode,
            }),
            (ArchiveFormat::Zip, _) => FormatDetails::Zip(ZipDetails {
                compressed_size: len,
                compression: ::zip::CompressionMethod::Deflated,
                encrypted: false,
                unix_mode: None,
            }),
            (ArchiveFormat::Tar(_), Some(FormatDetails::Tar(prev))) => FormatDetails::Tar(TarDetails {
                link_target: None,
                ..prev
            }),
            (ArchiveFormat::Tar(_), _) => FormatDetails::Tar(TarDetails::default()),
        }
    }

    /// Open the payload of `path`. Missing and zero-length entries yield
    /// `None`.
    pub(crate) fn open_payload(
        &mut self,
        path: &str,
        credential: Option<Credential>,
    ) -> Result<Option<(Box<dyn Read + '_>, u64)>> {
        let Some(slot) = self.slots.get_mut(path) else {
            return Ok(None);
        };
        let len = slot.entry.uncompressed_len();
        if slot.entry.is_directory() || len == 0 {
            return Ok(None);
        }
        let reader: Box<dyn Read + '_> = match &mut slot.payload {
            Payload::Empty => return Ok(None),
            Payload::Staged(spool) => {
                spool.rewind()?;
                Box::new(spool)
            }
            Payload::Original(index) => match &mut self.backend {
                Backend::Zip(backend) => backend.read_original(*index, credential)?,
                Backend::Tar(backend) => backend.read_original(*index)?,
            },
        };
        Ok(Some((reader, len)))
    }

    /// Write staged mutations back to the container. Returns whether the
    /// container was rewritten.
    pub fn commit(mut self) -> Result<bool> {
        if !self.dirty {
            tracing::debug!(handle = %self.id, source = %self.source, "closed archive");
            return Ok(false);
        }
        let Some(dest) = self.source.path().map(|p| p.to_path_buf()) else {
            return Err(Error::UnsupportedOnStreamBackedEntry {
                path: self.source.name(),
            });
        };
        let place = placement_for(&dest)?;
        match &mut self.backend {
            Backend::Zip(backend) => backend.commit(&mut self.slots, &dest, place, &self.options)?,
            Backend::Tar(backend) => backend.commit(&mut self.slots, &dest, place, &self.options)?,
        }
        tracing::debug!(
            handle = %self.id,
            source = %self.source,
            entries = self.slots.len(),
            "rewrote archive"
        );
        Ok(true)
    }
}

/// Placement for the rewritten container, keeping the mode of the one it
/// replaces.
#[cfg(unix)]
fn placement_for(dest: &Path) -> Result<PlaceOptions> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(dest)?.permissions().mode() & 0o7777;
    Ok(PlaceOptions::new().permissions(mode))
}

#[cfg(not(unix))]
fn placement_for(_dest: &Path) -> Result<PlaceOptions> {
    Ok(PlaceOptions::new())
}

impl fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("mode", &self.mode)
            .field("format", &self.format)
            .field("entries", &self.slots.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
