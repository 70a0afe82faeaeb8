use std::io;
use std::path::{Path, PathBuf};

use arkiv_fs::PlaceOptions;

use crate::entry::{Entry, EntryKind, FormatDetails};
use crate::error::{Error, Result};
use crate::handle::ArchiveHandle;
use crate::options::ExtractOptions;
use crate::sanitize::sanitize_entry_path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedEntry {
    pub relative_path: String,
    pub destination: PathBuf,
    pub kind: EntryKind,
    pub bytes: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ExtractReport {
    pub entries: Vec<ExtractedEntry>,
    /// Entries left out: fully stripped paths and link members.
    pub skipped: Vec<String>,
    pub total_bytes: u64,
}

/// Write `entry` (a directory brings its subtree) below `destination`.
///
/// Files are placed atomically; parents are created as needed.
pub fn extract_entry(
    handle: &mut ArchiveHandle,
    entry: &Entry,
    destination: &Path,
    options: &ExtractOptions,
) -> Result<ExtractReport> {
    let root = handle
        .entry(entry.relative_path())
        .ok_or_else(|| Error::EntryNotFound {
            path: entry.relative_path().to_string(),
        })?;
    let mut members = vec![root.clone()];
    if root.is_directory() {
        members.extend(handle.descendants(root.relative_path()));
    }

    arkiv_fs::ensure_dir(destination)?;
    let mut report = ExtractReport::default();

    for member in members {
        let path = member.relative_path().to_string();
        let Some(sanitized) = sanitize_entry_path(&path, destination, options.strip_components)? else {
            report.skipped.push(path);
            continue;
        };

        if member.is_directory() {
            arkiv_fs::ensure_dir(&sanitized.resolved)?;
            report.entries.push(ExtractedEntry {
                relative_path: path,
                destination: sanitized.resolved,
                kind: EntryKind::Directory,
                bytes: 0,
            });
            continue;
        }

        let (mode, link) = host_metadata(&member);
        if link {
            tracing::debug!(entry = %path, "skipping link member");
            report.skipped.push(path);
            continue;
        }
        if let Some(parent) = sanitized.resolved.parent() {
            arkiv_fs::ensure_dir(parent)?;
        }

        let mut place = PlaceOptions::new().overwrite(options.overwrite);
        if let Some(mode) = mode {
            place = place.permissions(mode & 0o7777);
        }
        let payload = handle.open_payload(&path, None)?;
        let placed = arkiv_fs::place_with(&sanitized.resolved, place, |file| match payload {
            Some((mut reader, _)) => io::copy(&mut reader, file),
            None => Ok(0),
        });
        let bytes = match placed {
            Ok(bytes) => bytes,
            Err(arkiv_fs::Error::AlreadyExists(existing)) => {
                return Err(Error::DuplicateEntry {
                    path: existing.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        report.total_bytes += bytes;
        report.entries.push(ExtractedEntry {
            relative_path: path,
            destination: sanitized.resolved,
            kind: EntryKind::File,
            bytes,
        });
    }

    tracing::debug!(
        entry = %entry,
        destination = %destination.display(),
        files = report.entries.len(),
        bytes = report.total_bytes,
        "extracted"
    );
    Ok(report)
}

/// Unix mode to apply and whether the member is a link.
fn host_metadata(entry: &Entry) -> (Option<u32>, bool) {
    match entry.details() {
        Some(FormatDetails::Tar(tar)) => (tar.mode, tar.link_target.is_some()),
        Some(FormatDetails::Zip(zip)) => (zip.unix_mode.filter(|mode| mode & 0o777 != 0), false),
        None => (None, false),
    }
}
