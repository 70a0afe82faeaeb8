//! Canonical entry paths.
//!
//! Entry paths inside a container are `/`-separated and relative. Directory
//! paths end with `/`, file paths never do. Everything that reaches the
//! handle listing or the rename engine has been through this module.

use crate::error::{Error, Result};

/// Upper bound on an entry path, in bytes.
const MAX_PATH_LENGTH: usize = 32 * 1024;

/// Characters no path segment may contain, in addition to control characters.
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Device names that cannot be used as a leaf on Windows hosts.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Strip every leading `X:` drive prefix together with the separators that
/// follow it.
fn strip_drive_prefix(mut path: &str) -> &str {
    loop {
        path = path.trim_start_matches(is_separator);
        let bytes = path.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            path = &path[2..];
        } else {
            return path;
        }
    }
}

/// True iff the raw input ends with a separator.
pub fn is_directory_path(path: &str) -> bool {
    path.ends_with(is_separator)
}

/// Canonicalize `path` into an entry path.
///
/// Backslashes become `/`, drive prefixes and leading separators are
/// dropped, repeated separators and `.` segments collapse. A trailing `/` is
/// present iff `directory` is set and the result is non-empty.
pub fn normalize_entry_path(path: &str, directory: bool) -> String {
    let mut out = collapse(strip_drive_prefix(path));
    // Dropping `.` segments can surface a new drive prefix ("./C:x").
    loop {
        let stripped = strip_drive_prefix(&out);
        if stripped.len() == out.len() {
            break;
        }
        out = collapse(stripped);
    }
    if directory && !out.is_empty() {
        out.push('/');
    }
    out
}

fn collapse(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split(is_separator) {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

pub fn normalize_directory_path(path: &str) -> String {
    normalize_entry_path(path, true)
}

pub fn normalize_file_entry_path(path: &str) -> String {
    normalize_entry_path(path, false)
}

/// Normalize while keeping the directory marker the caller supplied.
pub fn normalize_preserving_kind(path: &str) -> String {
    normalize_entry_path(path, is_directory_path(path))
}

/// Final segment of an entry path, without the directory marker.
pub fn leaf_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, leaf)) => leaf,
        None => trimmed,
    }
}

/// Parent directory of an entry path (with trailing `/`), or `""` at the root.
pub fn parent_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..=idx],
        None => "",
    }
}

/// Replace the last segment of `path` with `leaf`, keeping its kind.
pub fn replace_leaf(path: &str, leaf: &str) -> String {
    let directory = path.ends_with('/');
    let mut out = String::with_capacity(path.len() + leaf.len());
    out.push_str(parent_path(path));
    out.push_str(leaf);
    if directory {
        out.push('/');
    }
    out
}

fn invalid_char(c: char) -> bool {
    c.is_control() || RESERVED_CHARS.contains(&c)
}

fn is_reserved_name(name: &str) -> bool {
    let base = match name.find('.') {
        Some(pos) => &name[..pos],
        None => name,
    };
    RESERVED_NAMES
        .iter()
        .any(|reserved| base.eq_ignore_ascii_case(reserved))
}

/// Validate a single leaf name supplied for a rename.
pub fn validate_leaf_name(name: &str) -> Result<()> {
    let fail = |reason| {
        Err(Error::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return fail("name is empty");
    }
    if name == "." || name == ".." {
        return fail("name is a relative path marker");
    }
    if name.contains(is_separator) {
        return fail("contains a path separator");
    }
    if name.chars().any(invalid_char) {
        return fail("contains a reserved character");
    }
    if is_reserved_name(name) {
        return fail("is a reserved device name");
    }
    Ok(())
}

/// Validate a canonical entry path.
pub fn validate_path(path: &str) -> Result<()> {
    let fail = |reason| {
        Err(Error::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return fail("path is empty");
    }
    if path.len() > MAX_PATH_LENGTH {
        return fail("path is too long");
    }
    for segment in path.trim_end_matches('/').split('/') {
        if segment == ".." {
            return fail("contains a parent directory segment");
        }
        if segment.chars().any(invalid_char) {
            return fail("contains a reserved character");
        }
    }
    Ok(())
}
