use std::collections::HashMap;

use crate::entry::{Entry, MutableIfFileBacked};
use crate::error::{Error, Result};
use crate::handle::{ArchiveHandle, HandleId, OpenMode};
use crate::options::BatchOptions;
use crate::source::{ContainerSource, SourceKey};

/// Single owner of every open handle in a batch.
///
/// At most one handle is live per `(source, mode)`; path sources are matched
/// case-insensitively. A read lookup for a source that already has an update
/// handle is served by that handle, so staged writes are visible to later
/// reads in the same batch.
pub struct HandleCache {
    handles: HashMap<(SourceKey, OpenMode), ArchiveHandle>,
    options: BatchOptions,
    next_id: u64,
    opens: usize,
    disposed: bool,
}

impl HandleCache {
    pub fn new(options: BatchOptions) -> Self {
        Self {
            handles: HashMap::new(),
            options,
            next_id: 0,
            opens: 0,
            disposed: false,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn get_or_open(&mut self, source: &ContainerSource, mode: OpenMode) -> Result<&mut ArchiveHandle> {
        let key = source.key();
        let slot = match mode {
            OpenMode::Read if self.handles.contains_key(&(key.clone(), OpenMode::Update)) => {
                (key, OpenMode::Update)
            }
            _ => (key, mode),
        };

        if !self.handles.contains_key(&slot) {
            let id = HandleId(self.next_id);
            let handle = ArchiveHandle::open(id, source, slot.1, &self.options)?;
            self.next_id += 1;
            self.opens += 1;
            self.handles.insert(slot.clone(), handle);
        }

        self.handles.get_mut(&slot).ok_or_else(|| Error::Open {
            source_name: source.name(),
            error: std::io::Error::other("handle vanished from cache"),
        })
    }

    /// Open whatever handle `entry` can use: update for file-backed sources,
    /// read for streams.
    pub fn try_register(&mut self, entry: &Entry) -> Result<&mut ArchiveHandle> {
        let mode = if entry.is_mutable() {
            OpenMode::Update
        } else {
            OpenMode::Read
        };
        self.get_or_open(entry.source(), mode)
    }

    /// Cached handle for `source`, preferring the update handle.
    pub fn get(&self, source: &ContainerSource) -> Option<&ArchiveHandle> {
        let key = source.key();
        self.handles
            .get(&(key.clone(), OpenMode::Update))
            .or_else(|| self.handles.get(&(key, OpenMode::Read)))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of containers opened over the life of the cache.
    pub fn open_count(&self) -> usize {
        self.opens
    }

    /// Commit and release every handle.
    ///
    /// Every handle is attempted even after a failure; the first error is
    /// returned. Later calls are no-ops.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let mut handles: Vec<_> = self.handles.drain().map(|(_, handle)| handle).collect();
        handles.sort_by_key(|handle| handle.id().0);

        let mut first_error = None;
        for handle in handles {
            let source = handle.source().name();
            if let Err(e) = handle.commit() {
                tracing::warn!(source = %source, error = %e, "failed to commit archive");
                first_error.get_or_insert(e);
            }
        }
        tracing::debug!(opened = self.opens, "disposed handle cache");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for HandleCache {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!(error = %e, "handle cache dropped with a failed commit");
        }
    }
}

impl std::fmt::Debug for HandleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleCache")
            .field("handles", &self.handles.len())
            .field("opens", &self.opens)
            .field("disposed", &self.disposed)
            .finish()
    }
}
