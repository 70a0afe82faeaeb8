//! Entry-level manipulation of zip and tar archives.
//!
//! # Architecture
//!
//! - `path.rs` - Entry path normalization and validation
//! - `entry.rs` - Format-agnostic entry snapshots
//! - `handle/` - Open sessions and the zip/tar backends behind them
//! - `cache.rs` - One handle per container per batch
//! - `stream.rs` - Line and byte I/O against entry payloads
//! - `rename.rs` - Cascading rename/move via copy-then-delete
//! - `extract.rs` - Host extraction with zip-slip protection
//! - `batch.rs` - The batch context tying it together
//!
//! Mutations are staged inside the handle and written back when the batch
//! is disposed: the container is rewritten beside the original and swapped
//! in atomically.

pub use batch::{Batch, BatchReport, CancelToken, Outcome, Request};
pub use cache::HandleCache;
pub use credential::Credential;
pub use entry::{
    Entry, EntryKind, Extractable, FormatDetails, MutableIfFileBacked, TarDetails, ZipDetails,
};
pub use error::{Error, ErrorKind, Result};
pub use extract::{ExtractReport, ExtractedEntry, extract_entry};
pub use format::{ArchiveFormat, TarCompress, detect_format};
pub use handle::{ArchiveHandle, HandleId, OpenMode};
pub use options::{BatchOptions, ExtractOptions};
pub use rename::{PathMapping, PendingMappings, RenameReport, RenameRequest};
pub use sanitize::{SanitizedPath, sanitize_entry_path};
pub use source::{ContainerSource, SourceKey, StreamSource};
pub use stream::{ByteBlocks, EntryReader, EntryWriter, Lines, TextWriter, WriteMode};

pub mod path;
pub mod format;
pub mod options;
mod batch;
mod cache;
mod credential;
mod entry;
mod error;
mod extract;
mod handle;
mod rename;
mod sanitize;
mod source;
mod stream;
