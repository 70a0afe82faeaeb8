//! Reading and writing entry payloads through a live handle.
//!
//! Readers borrow the handle for as long as they live and writers stage
//! their content into it when finished or dropped, so a handle never holds
//! a dangling entry stream.

use std::io::{self, Read, Write};

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_16BE, UTF_16LE};
use tempfile::SpooledTempFile;

use crate::credential::Credential;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::handle::ArchiveHandle;
use crate::path;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace existing content.
    #[default]
    Truncate,
    /// Keep existing content and write after it.
    Append,
}

/// Decompressed payload of one entry.
pub struct EntryReader<'h> {
    inner: Box<dyn Read + 'h>,
    len: u64,
}

impl<'h> EntryReader<'h> {
    /// Open `path` on `handle`. Missing and zero-length entries yield `None`.
    pub fn open(handle: &'h mut ArchiveHandle, path: &str) -> Result<Option<Self>> {
        Self::open_inner(handle, path, None)
    }

    /// Like [`open`](Self::open), for encrypted zip entries. The credential
    /// is consumed by the call.
    pub fn open_with_credential(
        handle: &'h mut ArchiveHandle,
        path: &str,
        credential: Credential,
    ) -> Result<Option<Self>> {
        Self::open_inner(handle, path, Some(credential))
    }

    fn open_inner(
        handle: &'h mut ArchiveHandle,
        path: &str,
        credential: Option<Credential>,
    ) -> Result<Option<Self>> {
        let path = path::normalize_preserving_kind(path);
        let opened = handle.open_payload(&path, credential)?;
        Ok(opened.map(|(inner, len)| Self { inner, len }))
    }

    /// Uncompressed length recorded for the entry.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read_all(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        self.inner.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Iterate the payload in blocks of at most `size` bytes.
    pub fn blocks(self, size: usize) -> ByteBlocks<'h> {
        ByteBlocks {
            reader: self,
            size: size.max(1),
            done: false,
        }
    }

    /// Iterate decoded lines. `\n` and `\r\n` both end a line; a byte-order
    /// mark is honoured and stripped.
    pub fn lines(self, encoding: &'static Encoding) -> Lines<'h> {
        Lines {
            reader: self,
            decoder: encoding.new_decoder_with_bom_removal(),
            buf: vec![0; 8 * 1024],
            pending: String::new(),
            eof: false,
        }
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

pub struct ByteBlocks<'h> {
    reader: EntryReader<'h>,
    size: usize,
    done: bool,
}

impl Iterator for ByteBlocks<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut block = Vec::with_capacity(self.size);
        match (&mut self.reader).take(self.size as u64).read_to_end(&mut block) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => Some(Ok(block)),
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

pub struct Lines<'h> {
    reader: EntryReader<'h>,
    decoder: Decoder,
    buf: Vec<u8>,
    pending: String,
    eof: bool,
}

impl Lines<'_> {
    fn fill(&mut self) -> Result<()> {
        let n = loop {
            match self.reader.read(&mut self.buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        };
        let last = n == 0;
        let mut consumed = 0;
        loop {
            let remaining = n - consumed;
            let needed = self
                .decoder
                .max_utf8_buffer_length(remaining)
                .unwrap_or(remaining * 3 + 16);
            self.pending.reserve(needed);
            let (result, read, _) =
                self.decoder
                    .decode_to_string(&self.buf[consumed..n], &mut self.pending, last);
            consumed += read;
            if result == CoderResult::InputEmpty {
                break;
            }
        }
        self.eof = last;
        Ok(())
    }
}

impl Iterator for Lines<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pos) = self.pending.find('\n') {
                let mut line: String = self.pending.drain(..=pos).collect();
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
                return Some(Ok(line));
            }
            if self.eof {
                if self.pending.is_empty() {
                    return None;
                }
                return Some(Ok(std::mem::take(&mut self.pending)));
            }
            if let Err(e) = self.fill() {
                self.eof = true;
                self.pending.clear();
                return Some(Err(e));
            }
        }
    }
}

/// Buffered byte writer for one file entry.
///
/// Writes collect in a fixed-size buffer and spill into a spool. The spool
/// becomes the entry's payload on [`finish`](Self::finish), or on drop when
/// the caller never finished; errors during drop are logged.
pub struct EntryWriter<'h> {
    handle: &'h mut ArchiveHandle,
    path: String,
    spool: Option<SpooledTempFile>,
    buffer: Vec<u8>,
    capacity: usize,
}

impl<'h> EntryWriter<'h> {
    pub fn create(handle: &'h mut ArchiveHandle, path: &str, mode: WriteMode) -> Result<Self> {
        handle.ensure_writable()?;
        let path = path::normalize_file_entry_path(path);
        path::validate_path(&path)?;
        if let Some(existing) = handle.occupant(&path)
            && existing != path
        {
            return Err(Error::DuplicateEntry { path: existing });
        }

        let capacity = handle.options().buffer_size;
        let mut spool = SpooledTempFile::new(handle.options().spool_threshold);
        if mode == WriteMode::Append
            && let Some((mut existing, _)) = handle.open_payload(&path, None)?
        {
            io::copy(&mut existing, &mut spool)?;
        }

        Ok(Self {
            handle,
            path,
            spool: Some(spool),
            buffer: Vec::with_capacity(capacity),
            capacity,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn spill(&mut self) -> io::Result<()> {
        if let Some(spool) = self.spool.as_mut() {
            spool.write_all(&self.buffer)?;
        }
        self.buffer.clear();
        Ok(())
    }

    fn complete(&mut self) -> Result<Entry> {
        self.spill()?;
        let spool = self.spool.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "entry writer already finished")
        })?;
        self.handle.stage_file(&self.path, spool)
    }

    /// Stage the written content and return the updated entry.
    pub fn finish(mut self) -> Result<Entry> {
        self.complete()
    }
}

impl Write for EntryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.spool.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "entry writer already finished",
            ));
        }
        if self.buffer.len() + buf.len() > self.capacity {
            self.spill()?;
        }
        if buf.len() >= self.capacity {
            if let Some(spool) = self.spool.as_mut() {
                spool.write_all(buf)?;
            }
        } else {
            self.buffer.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.spill()
    }
}

impl Drop for EntryWriter<'_> {
    fn drop(&mut self) {
        if self.spool.is_some()
            && let Err(e) = self.complete()
        {
            tracing::warn!(path = %self.path, error = %e, "failed to stage entry on drop");
        }
    }
}

/// Line writer on top of [`EntryWriter`].
///
/// Lines are collected and encoded in batches, each followed by the
/// configured terminator.
pub struct TextWriter<'h> {
    inner: Option<EntryWriter<'h>>,
    encoding: &'static Encoding,
    terminator: String,
    lines: Vec<String>,
    batch: usize,
}

impl<'h> TextWriter<'h> {
    pub fn create(handle: &'h mut ArchiveHandle, path: &str, mode: WriteMode) -> Result<Self> {
        let options = handle.options();
        let encoding = options.encoding;
        let terminator = options.line_terminator.clone();
        let batch = options.line_batch;
        let inner = EntryWriter::create(handle, path, mode)?;
        Ok(Self {
            inner: Some(inner),
            encoding,
            terminator,
            lines: Vec::with_capacity(batch),
            batch,
        })
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.lines.push(line.to_string());
        if self.lines.len() >= self.batch {
            self.flush_lines()?;
        }
        Ok(())
    }

    fn flush_lines(&mut self) -> Result<()> {
        if self.lines.is_empty() {
            return Ok(());
        }
        let mut text = String::new();
        for line in self.lines.drain(..) {
            text.push_str(&line);
            text.push_str(&self.terminator);
        }
        let bytes = encode_text(self.encoding, &text);
        if let Some(inner) = self.inner.as_mut() {
            inner.write_all(&bytes)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<Entry> {
        self.flush_lines()?;
        match self.inner.take() {
            Some(inner) => inner.finish(),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "text writer already finished").into()),
        }
    }
}

/// `encoding_rs` only decodes UTF-16, so those two are encoded here; no BOM
/// is written.
fn encode_text(encoding: &'static Encoding, text: &str) -> Vec<u8> {
    if encoding == UTF_16LE {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    } else if encoding == UTF_16BE {
        text.encode_utf16().flat_map(u16::to_be_bytes).collect()
    } else {
        encoding.encode(text).0.into_owned()
    }
}

impl Drop for TextWriter<'_> {
    fn drop(&mut self) {
        if self.inner.is_some()
            && let Err(e) = self.flush_lines()
        {
            tracing::warn!(error = %e, "failed to flush lines on drop");
        }
    }
}
