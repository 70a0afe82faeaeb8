use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Anything the backends can read from and seek within.
pub(crate) trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Where a container's bytes come from.
///
/// Path sources can be rewritten; stream sources are read-only for every
/// mutating operation.
#[derive(Clone)]
pub enum ContainerSource {
    Path(PathBuf),
    Stream(StreamSource),
}

/// Caller-supplied in-memory container.
#[derive(Clone)]
pub struct StreamSource {
    label: Arc<str>,
    bytes: Arc<[u8]>,
}

impl StreamSource {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("label", &self.label)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Identity of a source inside a handle cache.
///
/// Paths compare case-insensitively. Streams compare by buffer identity, so
/// two distinct buffers never share a handle even under the same label.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceKey(String);

impl ContainerSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn from_bytes(label: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let label: String = label.into();
        let bytes: Vec<u8> = bytes.into();
        Self::Stream(StreamSource {
            label: Arc::from(label),
            bytes: Arc::from(bytes),
        })
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            Self::Stream(_) => None,
        }
    }

    /// Human-readable name used in errors and logs.
    pub fn name(&self) -> String {
        match self {
            Self::Path(p) => p.display().to_string(),
            Self::Stream(s) => format!("<stream:{}>", s.label),
        }
    }

    pub fn key(&self) -> SourceKey {
        match self {
            Self::Path(p) => SourceKey(p.to_string_lossy().to_lowercase()),
            Self::Stream(s) => SourceKey(format!("stream:{:p}", Arc::as_ptr(&s.bytes))),
        }
    }

    /// Open a fresh, independent reader positioned at the start.
    pub(crate) fn open_reader(&self) -> io::Result<Box<dyn ReadSeek>> {
        match self {
            Self::Path(p) => Ok(Box::new(BufReader::new(File::open(p)?))),
            Self::Stream(s) => Ok(Box::new(Cursor::new(Arc::clone(&s.bytes)))),
        }
    }
}

impl PartialEq for ContainerSource {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ContainerSource {}

impl fmt::Debug for ContainerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
        }
    }
}

impl fmt::Display for ContainerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl From<PathBuf> for ContainerSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ContainerSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}
