use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use arkiv_fs::PlaceOptions;
use chrono::DateTime;
use tar::{EntryType, Header};
use tempfile::SpooledTempFile;

use super::{Payload, Slot};
use crate::entry::{Entry, EntryKind, FormatDetails, TarDetails};
use crate::error::{Error, Result};
use crate::format::{ArchiveFormat, TarCompress};
use crate::options::BatchOptions;
use crate::path;
use crate::source::{ContainerSource, ReadSeek};

/// Tar has no index, so originals are addressed by their ordinal in the
/// stream and reached by re-reading the source.
pub(crate) struct TarBackend {
    source: ContainerSource,
    compress: TarCompress,
    spool_threshold: usize,
}

pub(crate) fn load(
    source: &ContainerSource,
    reader: Box<dyn ReadSeek>,
    compress: TarCompress,
    spool_threshold: usize,
) -> Result<(TarBackend, BTreeMap<String, Slot>)> {
    let name = source.name();
    let corrupt = |e: io::Error| Error::invalid_format(&name, e);

    let decoded = compress.decoder(reader).map_err(corrupt)?;
    let mut archive = tar::Archive::new(decoded);
    let mut slots = BTreeMap::new();

    for (index, entry) in archive.entries().map_err(corrupt)?.enumerate() {
        let entry = entry.map_err(corrupt)?;
        let header = entry.header();
        let entry_type = header.entry_type();
        if entry_type.is_pax_global_extensions() {
            continue;
        }

        let kind = if entry_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let raw = entry.path().map_err(corrupt)?;
        let path = path::normalize_entry_path(&raw.to_string_lossy(), kind == EntryKind::Directory);
        if path.is_empty() {
            continue;
        }

        let details = TarDetails {
            mode: header.mode().ok(),
            uid: header.uid().ok(),
            gid: header.gid().ok(),
            username: header.username().ok().flatten().map(str::to_string),
            groupname: header.groupname().ok().flatten().map(str::to_string),
            link_target: entry
                .link_name()
                .ok()
                .flatten()
                .map(|target| target.to_string_lossy().into_owned()),
        };
        let modified = header
            .mtime()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(i64::try_from(secs).ok()?, 0));
        let len = if kind == EntryKind::Directory { 0 } else { entry.size() };

        let entry = Entry::new(source.clone(), &path, kind, ArchiveFormat::Tar(compress))
            .with_uncompressed_len(len)
            .with_last_modified(modified)
            .with_details(FormatDetails::Tar(details));

        if slots
            .insert(
                path.clone(),
                Slot {
                    entry,
                    payload: Payload::Original(index),
                },
            )
            .is_some()
        {
            tracing::debug!(source = %name, path, "duplicate tar member, later header wins");
        }
    }

    let backend = TarBackend {
        source: source.clone(),
        compress,
        spool_threshold,
    };
    Ok((backend, slots))
}

impl TarBackend {
    fn reopen(&self) -> io::Result<tar::Archive<Box<dyn Read>>> {
        let reader = self.source.open_reader()?;
        Ok(tar::Archive::new(self.compress.decoder(reader)?))
    }

    /// Spool the `index`th member out of a fresh pass over the source.
    pub(crate) fn read_original(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let mut archive = self.reopen()?;
        for (position, entry) in archive.entries()?.enumerate() {
            let mut entry = entry?;
            if position == index {
                let mut spool = SpooledTempFile::new(self.spool_threshold);
                io::copy(&mut entry, &mut spool)?;
                spool.rewind()?;
                return Ok(Box::new(spool));
            }
        }
        Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("tar member #{index} is gone from {}", self.source),
        )))
    }

    /// Rewrite the archive at `dest` from the live listing.
    ///
    /// Original members are re-streamed in source order under every path
    /// that now refers to them. Created directories and staged files follow.
    pub(crate) fn commit(
        &mut self,
        slots: &mut BTreeMap<String, Slot>,
        dest: &Path,
        place: PlaceOptions,
        options: &BatchOptions,
    ) -> Result<()> {
        let mut targets: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (path, slot) in slots.iter() {
            if let Payload::Original(index) = slot.payload {
                targets.entry(index).or_default().push(path.clone());
            }
        }

        let mut archive = self.reopen()?;
        let threshold = self.spool_threshold;
        let compress = self.compress;

        arkiv_fs::place_with(dest, place, |file| {
            let encoder = compress.encoder(file, options.compression_level)?;
            let mut builder = tar::Builder::new(encoder);

            for (index, entry) in archive.entries()?.enumerate() {
                let Some(names) = targets.get(&index) else {
                    continue;
                };
                let mut entry = entry?;
                let header = entry.header().clone();
                let link = entry.link_name()?.map(|target| target.into_owned());
                if let Some(link) = link {
                    for name in names {
                        builder.append_link(&mut header.clone(), name, &link)?;
                    }
                } else if names.len() == 1 || header.entry_type().is_dir() {
                    append_original(&mut builder, &header, names, &mut entry)?;
                } else {
                    let mut spool = SpooledTempFile::new(threshold);
                    io::copy(&mut entry, &mut spool)?;
                    for name in names {
                        spool.rewind()?;
                        builder.append_data(&mut header.clone(), name, &mut spool)?;
                    }
                }
            }

            for (path, slot) in slots.iter_mut() {
                match &mut slot.payload {
                    Payload::Original(_) => {}
                    Payload::Empty => {
                        let mut header = fresh_header(&slot.entry, EntryType::Directory, 0)?;
                        builder.append_data(&mut header, path, io::empty())?;
                    }
                    Payload::Staged(spool) => {
                        let len = spool.seek(SeekFrom::End(0))?;
                        spool.rewind()?;
                        let mut header = fresh_header(&slot.entry, EntryType::Regular, len)?;
                        builder.append_data(&mut header, path, spool)?;
                    }
                }
            }

            builder.into_inner()?.finish()?;
            Ok(())
        })?;
        Ok(())
    }
}

/// Emit a member whose data can be streamed once. Directories carry no data,
/// so every name gets an empty body.
fn append_original<W: io::Write, R: Read>(
    builder: &mut tar::Builder<W>,
    header: &Header,
    names: &[String],
    data: &mut R,
) -> io::Result<()> {
    let (first, rest) = match names.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };
    builder.append_data(&mut header.clone(), first, data)?;
    for name in rest {
        builder.append_data(&mut header.clone(), name, io::empty())?;
    }
    Ok(())
}

fn fresh_header(entry: &Entry, entry_type: EntryType, len: u64) -> io::Result<Header> {
    let details = match entry.details() {
        Some(FormatDetails::Tar(details)) => details.clone(),
        _ => TarDetails::default(),
    };
    let default_mode = if entry_type.is_dir() { 0o755 } else { 0o644 };

    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(len);
    header.set_mode(details.mode.unwrap_or(default_mode));
    header.set_uid(details.uid.unwrap_or(0));
    header.set_gid(details.gid.unwrap_or(0));
    if let Some(name) = &details.username {
        header.set_username(name)?;
    }
    if let Some(name) = &details.groupname {
        header.set_groupname(name)?;
    }
    let mtime = entry
        .last_modified()
        .and_then(|time| u64::try_from(time.timestamp()).ok())
        .unwrap_or(0);
    header.set_mtime(mtime);
    Ok(header)
}
