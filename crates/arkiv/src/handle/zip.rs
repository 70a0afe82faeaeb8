use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use arkiv_fs::PlaceOptions;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{Payload, Slot};
use crate::credential::Credential;
use crate::entry::{Entry, EntryKind, FormatDetails, ZipDetails};
use crate::error::{Error, Result, zip_to_io};
use crate::format::ArchiveFormat;
use crate::options::BatchOptions;
use crate::path;
use crate::source::{ContainerSource, ReadSeek};

pub(crate) struct ZipBackend {
    archive: ZipArchive<Box<dyn ReadSeek>>,
}

pub(crate) fn load(
    source: &ContainerSource,
    reader: Box<dyn ReadSeek>,
) -> Result<(ZipBackend, BTreeMap<String, Slot>)> {
    let name = source.name();
    let setup = |err: ZipError| match err {
        ZipError::Io(error) => Error::Open {
            source_name: name.clone(),
            error,
        },
        other => Error::invalid_format(&name, other),
    };

    let mut archive = ZipArchive::new(reader).map_err(setup)?;
    let mut slots = BTreeMap::new();

    for index in 0..archive.len() {
        let file = archive.by_index_raw(index).map_err(setup)?;
        let kind = if file.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let path = path::normalize_entry_path(file.name(), kind == EntryKind::Directory);
        if path.is_empty() {
            continue;
        }

        let entry = Entry::new(source.clone(), &path, kind, ArchiveFormat::Zip)
            .with_uncompressed_len(file.size())
            .with_last_modified(file.last_modified().and_then(from_zip_time))
            .with_details(FormatDetails::Zip(ZipDetails {
                compressed_size: file.compressed_size(),
                compression: file.compression(),
                encrypted: file.encrypted(),
                unix_mode: file.unix_mode(),
            }));

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
            tracing::debug!(source = %name, path, "duplicate zip member, later record wins");
        }
    }

    Ok((ZipBackend { archive }, slots))
}

impl ZipBackend {
    pub(crate) fn read_original(
        &mut self,
        index: usize,
        credential: Option<Credential>,
    ) -> Result<Box<dyn Read + '_>> {
        let file = match credential {
            Some(credential) => self.archive.by_index_decrypt(index, credential.as_bytes()),
            None => self.archive.by_index(index),
        };
        let file = file.map_err(|e| Error::Io(zip_to_io(e)))?;
        Ok(Box::new(file))
    }

    /// Rewrite the archive at `dest` from the live listing.
    ///
    /// Untouched members are raw-copied without recompression.
    pub(crate) fn commit(
        &mut self,
        slots: &mut BTreeMap<String, Slot>,
        dest: &Path,
        place: PlaceOptions,
        options: &BatchOptions,
    ) -> Result<()> {
        let archive = &mut self.archive;
        arkiv_fs::place_with(dest, place, |file| {
            let mut writer = ZipWriter::new(file);
            for (path, slot) in slots.iter_mut() {
                if slot.entry.is_directory() {
                    writer
                        .add_directory(path.as_str(), base_options(&slot.entry))
                        .map_err(zip_to_io)?;
                    continue;
                }
                match &mut slot.payload {
                    Payload::Original(index) => {
                        let raw = archive.by_index_raw(*index).map_err(zip_to_io)?;
                        writer
                            .raw_copy_file_rename(raw, path.as_str())
                            .map_err(zip_to_io)?;
                    }
                    Payload::Staged(spool) => {
                        let len = spool.seek(SeekFrom::End(0))?;
                        spool.rewind()?;
                        writer
                            .start_file(path.as_str(), file_options(&slot.entry, options, len))
                            .map_err(zip_to_io)?;
                        io::copy(spool, &mut writer)?;
                    }
                    Payload::Empty => {
                        writer
                            .start_file(path.as_str(), file_options(&slot.entry, options, 0))
                            .map_err(zip_to_io)?;
                    }
                }
            }
            writer.finish().map_err(zip_to_io)?;
            Ok(())
        })?;
        Ok(())
    }
}

fn base_options(entry: &Entry) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default();
    if let Some(time) = entry.last_modified().and_then(to_zip_time) {
        options = options.last_modified_time(time);
    }
    if let Some(FormatDetails::Zip(ZipDetails {
        unix_mode: Some(mode),
        ..
    })) = entry.details()
    {
        options = options.unix_permissions(*mode);
    }
    options
}

fn file_options(entry: &Entry, batch: &BatchOptions, len: u64) -> SimpleFileOptions {
    base_options(entry)
        .compression_method(CompressionMethod::Deflated)
        .compression_level(batch.compression_level.map(i64::from))
        .large_file(len >= u64::from(u32::MAX))
}

fn from_zip_time(time: zip::DateTime) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )
    .map(|naive| naive.and_utc())
}

/// `None` outside the DOS range (1980..=2107).
fn to_zip_time(time: DateTime<Utc>) -> Option<zip::DateTime> {
    let year = u16::try_from(time.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_time_round_trips_through_chrono() {
        let utc = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 45, 10)
            .unwrap()
            .and_utc();
        let dos = to_zip_time(utc).unwrap();
        assert_eq!(from_zip_time(dos), Some(utc));
    }

    #[test]
    fn pre_dos_epoch_has_no_zip_time() {
        let old = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        assert!(to_zip_time(old).is_none());
    }
}
