//! The batch context.
//!
//! A [`Batch`] owns the handle cache and the pending-mapping table for one
//! sequence of requests. Requests run one at a time in submission order;
//! cancellation is checked between them. Dropping the batch disposes it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::HandleCache;
use crate::credential::Credential;
use crate::entry::{Entry, MutableIfFileBacked};
use crate::error::{Error, Result};
use crate::extract::{self, ExtractReport};
use crate::handle::{ArchiveHandle, OpenMode};
use crate::options::{BatchOptions, ExtractOptions};
use crate::path;
use crate::rename::{self, PathMapping, PendingMappings, RenameReport, RenameRequest};
use crate::source::ContainerSource;
use crate::stream::{EntryReader, EntryWriter, TextWriter, WriteMode};

/// Cooperative cancellation flag, shared by clones.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum Request {
    Rename(RenameRequest),
    Extract {
        entry: Entry,
        destination: PathBuf,
        options: ExtractOptions,
    },
    Read {
        source: ContainerSource,
        path: String,
    },
    Write {
        source: ContainerSource,
        path: String,
        data: Vec<u8>,
        mode: WriteMode,
    },
    Remove(Entry),
}

#[derive(Debug)]
pub enum Outcome {
    Renamed(Vec<PathMapping>),
    Extracted(ExtractReport),
    /// `None` for missing or empty entries.
    Read(Option<Vec<u8>>),
    Written(Entry),
    Removed(Vec<String>),
}

/// One outcome per request, in submission order.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<Result<Outcome>>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.as_ref().err().map(|e| (index, e)))
    }
}

pub struct Batch {
    cache: HandleCache,
    pending: PendingMappings,
    cancel: CancelToken,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(BatchOptions::default())
    }
}

impl Batch {
    pub fn new(options: BatchOptions) -> Self {
        Self::with_cancel_token(options, CancelToken::new())
    }

    pub fn with_cancel_token(options: BatchOptions, cancel: CancelToken) -> Self {
        Self {
            cache: HandleCache::new(options),
            pending: PendingMappings::default(),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &BatchOptions {
        self.cache.options()
    }

    pub fn handles(&mut self) -> &mut HandleCache {
        &mut self.cache
    }

    fn reader(&mut self, source: &ContainerSource) -> Result<&mut ArchiveHandle> {
        self.cache.get_or_open(source, OpenMode::Read)
    }

    fn writer(&mut self, source: &ContainerSource) -> Result<&mut ArchiveHandle> {
        self.cache.get_or_open(source, OpenMode::Update)
    }

    /// Live listing of `source`.
    pub fn list(&mut self, source: &ContainerSource) -> Result<Vec<Entry>> {
        Ok(self.reader(source)?.entries())
    }

    /// Snapshot of the entry at `path`, which is normalized keeping its kind.
    pub fn resolve(&mut self, source: &ContainerSource, path: &str) -> Result<Entry> {
        let path = path::normalize_preserving_kind(path);
        self.reader(source)?
            .entry(&path)
            .ok_or(Error::EntryNotFound { path })
    }

    /// Bring `entry` up to date with its container.
    pub fn refresh(&mut self, entry: &mut Entry) -> Result<()> {
        let source = entry.source().clone();
        entry.refresh(self.reader(&source)?)
    }

    pub fn rename(&mut self, requests: Vec<RenameRequest>) -> Result<RenameReport> {
        rename::rename_all(&mut self.cache, &mut self.pending, &self.cancel, &requests)
    }

    pub fn read_bytes(&mut self, source: &ContainerSource, path: &str) -> Result<Option<Vec<u8>>> {
        match EntryReader::open(self.reader(source)?, path)? {
            Some(reader) => reader.read_all().map(Some),
            None => Ok(None),
        }
    }

    /// Read an encrypted zip entry. The credential is wiped when this returns.
    pub fn read_bytes_with_credential(
        &mut self,
        source: &ContainerSource,
        path: &str,
        credential: Credential,
    ) -> Result<Option<Vec<u8>>> {
        match EntryReader::open_with_credential(self.reader(source)?, path, credential)? {
            Some(reader) => reader.read_all().map(Some),
            None => Ok(None),
        }
    }

    /// Decoded lines of `path` in the batch encoding. Empty for missing or
    /// empty entries.
    pub fn read_lines(&mut self, source: &ContainerSource, path: &str) -> Result<Vec<String>> {
        let encoding = self.options().encoding;
        match EntryReader::open(self.reader(source)?, path)? {
            Some(reader) => reader.lines(encoding).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Feed `path` to `sink` in blocks of the batch buffer size. Returns the
    /// number of bytes read.
    pub fn read_blocks<F>(&mut self, source: &ContainerSource, path: &str, mut sink: F) -> Result<u64>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let size = self.options().buffer_size;
        let Some(reader) = EntryReader::open(self.reader(source)?, path)? else {
            return Ok(0);
        };
        let mut total = 0;
        for block in reader.blocks(size) {
            let block = block?;
            total += block.len() as u64;
            sink(&block)?;
        }
        Ok(total)
    }

    pub fn write_bytes(
        &mut self,
        source: &ContainerSource,
        path: &str,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<Entry> {
        use std::io::Write;

        let mut writer = EntryWriter::create(self.writer(source)?, path, mode)?;
        writer.write_all(data)?;
        writer.finish()
    }

    pub fn write_lines<I, S>(
        &mut self,
        source: &ContainerSource,
        path: &str,
        lines: I,
        mode: WriteMode,
    ) -> Result<Entry>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut writer = TextWriter::create(self.writer(source)?, path, mode)?;
        for line in lines {
            writer.write_line(line.as_ref())?;
        }
        writer.finish()
    }

    pub fn create_directory(&mut self, source: &ContainerSource, path: &str) -> Result<Entry> {
        self.writer(source)?.create_directory(path)
    }

    /// Delete `entry`; a directory takes its subtree with it. Returns the
    /// removed paths.
    pub fn remove(&mut self, entry: &Entry) -> Result<Vec<String>> {
        entry.ensure_mutable()?;
        let handle = self.writer(entry.source())?;
        let path = entry.relative_path();
        if !handle.contains(path) {
            return Err(Error::EntryNotFound {
                path: path.to_string(),
            });
        }

        let mut doomed = handle.descendant_paths(path);
        doomed.reverse();
        doomed.push(path.to_string());
        for victim in &doomed {
            handle.remove_entry(victim)?;
        }
        tracing::debug!(entry = %entry, removed = doomed.len(), "removed entry");
        Ok(doomed)
    }

    pub fn extract(
        &mut self,
        entry: &Entry,
        destination: impl AsRef<std::path::Path>,
        options: &ExtractOptions,
    ) -> Result<ExtractReport> {
        let handle = self.reader(entry.source())?;
        extract::extract_entry(handle, entry, destination.as_ref(), options)
    }

    /// Process `requests` in order. Adjacent renames are planned together.
    ///
    /// A terminating failure or cancellation stops the batch and is returned
    /// instead of the report.
    pub fn run(&mut self, requests: Vec<Request>) -> Result<BatchReport> {
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut requests = requests.into_iter().peekable();

        while let Some(request) = requests.next() {
            if self.cancel.is_cancelled() {
                tracing::debug!(completed = outcomes.len(), "batch cancelled");
                return Err(Error::Cancelled);
            }

            if let Request::Rename(first) = request {
                let mut group = vec![first];
                while let Some(Request::Rename(_)) = requests.peek() {
                    if let Some(Request::Rename(next)) = requests.next() {
                        group.push(next);
                    }
                }
                let report = self.rename(group)?;
                outcomes.extend(report.into_outcomes().into_iter().map(|o| o.map(Outcome::Renamed)));
                continue;
            }

            match self.run_one(request) {
                Err(e) if e.is_terminating() => {
                    tracing::warn!(error = %e, "batch aborted");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(request = outcomes.len(), error = %e, "request failed");
                    outcomes.push(Err(e));
                }
                Ok(outcome) => outcomes.push(Ok(outcome)),
            }
        }

        tracing::debug!(requests = outcomes.len(), "batch finished");
        Ok(BatchReport { outcomes })
    }

    fn run_one(&mut self, request: Request) -> Result<Outcome> {
        match request {
            Request::Rename(request) => {
                let report = self.rename(vec![request])?;
                match report.into_outcomes().pop() {
                    Some(outcome) => outcome.map(Outcome::Renamed),
                    None => Ok(Outcome::Renamed(Vec::new())),
                }
            }
            Request::Extract {
                entry,
                destination,
                options,
            } => self.extract(&entry, destination, &options).map(Outcome::Extracted),
            Request::Read { source, path } => self.read_bytes(&source, &path).map(Outcome::Read),
            Request::Write {
                source,
                path,
                data,
                mode,
            } => self
                .write_bytes(&source, &path, &data, mode)
                .map(Outcome::Written),
            Request::Remove(entry) => self.remove(&entry).map(Outcome::Removed),
        }
    }

    /// Commit and release every handle. Dropping the batch does the same but
    /// can only log failures.
    pub fn dispose(mut self) -> Result<()> {
        self.cache.dispose()
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("cache", &self.cache)
            .field("pending", &self.pending)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
