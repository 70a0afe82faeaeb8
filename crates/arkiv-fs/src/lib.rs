//! Atomic file placement.
//!
//! Content is written into a temporary sibling of the destination and then
//! renamed over it, so readers never observe a half-written file. Archive
//! handles use this to replace a container after rewriting it; extraction
//! uses it for every file it places on the host.

mod error;

pub use error::{Error, Result};

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

#[derive(Clone, Copy, Debug)]
pub struct PlaceOptions {
    permissions: Option<u32>,
    sync:        bool,
    overwrite:   bool,
}

impl Default for PlaceOptions {
    fn default() -> Self { Self::new() }
}

impl PlaceOptions {
    pub fn new() -> Self {
        Self {
            permissions: None,
            sync:        false,
            overwrite:   true,
        }
    }

    /// Unix mode applied to the placed file. Ignored on other platforms.
    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn get_permissions(&self) -> Option<u32> { self.permissions }

    pub fn get_sync(&self) -> bool { self.sync }

    pub fn get_overwrite(&self) -> bool { self.overwrite }
}

/// Create `path` and all of its missing parents.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|source| Error::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Write through `fill` into a temporary sibling of `path`, then atomically
/// rename it into place.
///
/// The temporary file is removed if `fill` fails or the rename is refused.
pub fn place_with<T, F>(path: impl AsRef<Path>, options: PlaceOptions, fill: F) -> Result<T>
where
    F: FnOnce(&mut File) -> io::Result<T>,
{
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => return Err(Error::NoParent(path.to_path_buf())),
    };

    if !options.overwrite && path.exists() {
        return Err(Error::AlreadyExists(path.to_path_buf()));
    }

    let mut tmp = tempfile::Builder::new()
        .prefix(".arkiv-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|source| Error::Write {
            path: parent.to_path_buf(),
            source,
        })?;

    let value = fill(tmp.as_file_mut()).map_err(|source| Error::Write {
        path: tmp.path().to_path_buf(),
        source,
    })?;

    tmp.as_file_mut().flush().map_err(|source| Error::Write {
        path: tmp.path().to_path_buf(),
        source,
    })?;

    if options.sync {
        tmp.as_file().sync_all().map_err(|source| Error::Write {
            path: tmp.path().to_path_buf(),
            source,
        })?;
    }

    #[cfg(unix)]
    if let Some(mode) = options.permissions {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode)).map_err(
            |source| Error::Write {
                path: tmp.path().to_path_buf(),
                source,
            },
        )?;
    }

    let persisted = if options.overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map_err(|e| Error::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    tracing::trace!(path = %path.display(), "placed file");
    Ok(value)
}

/// Atomically replace `path` with `content`.
pub fn atomic_write(path: impl AsRef<Path>, content: &[u8], options: PlaceOptions) -> Result<()> {
    place_with(path, options, |file| file.write_all(content))
}
