use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// An entry path mapped onto the host.
#[derive(Clone, Debug)]
pub struct SanitizedPath {
    pub original: String,
    pub resolved: PathBuf,
}

/// Map `entry_path` below `base`, dropping `strip` leading components.
///
/// Returns `None` when stripping leaves nothing. Absolute paths and paths
/// that would resolve outside `base` fail with `InvalidPath` (zip-slip).
pub fn sanitize_entry_path(entry_path: &str, base: &Path, strip: usize) -> Result<Option<SanitizedPath>> {
    let escape = |reason| Error::InvalidPath {
        path: entry_path.to_string(),
        reason,
    };

    let relative = Path::new(entry_path.trim_end_matches('/'));
    if relative.is_absolute() || relative.has_root() {
        return Err(escape("is absolute"));
    }
    let normalized = normalize_path(relative).ok_or_else(|| escape("escapes the destination"))?;

    let components: Vec<_> = normalized.components().collect();
    if components.len() <= strip {
        return Ok(None);
    }
    let processed: PathBuf = components[strip..].iter().collect();

    let resolved = base.join(processed);
    if !resolved.starts_with(base) {
        return Err(escape("escapes the destination"));
    }

    Ok(Some(SanitizedPath {
        original: entry_path.to_string(),
        resolved,
    }))
}

/// Fold `.` and `..` lexically. `None` if `..` climbs above the start.
fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !result.pop() {
                    return None;
                }
            }
            Component::Normal(part) => result.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(result)
}
