use std::io;

/// Failure category, independent of the data each variant carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EntryNotFound,
    DuplicateEntry,
    InvalidName,
    InvalidPath,
    UnsupportedOnStreamBackedEntry,
    InvalidArchiveFormat,
    ReadOnlyHandle,
    Cancelled,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("entry not found: '{path}'")]
    EntryNotFound { path: String },

    #[error("entry already exists: '{path}'")]
    DuplicateEntry { path: String },

    #[error("invalid entry name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("invalid entry path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("entry '{path}' is backed by a stream and cannot be modified")]
    UnsupportedOnStreamBackedEntry { path: String },

    #[error("'{source_name}' is not a valid archive: {reason}")]
    InvalidArchiveFormat { source_name: String, reason: String },

    #[error("cannot open '{source_name}': {error}")]
    Open {
        source_name: String,
        #[source]
        error: io::Error,
    },

    #[error("handle for '{source_name}' was opened read-only")]
    ReadOnlyHandle { source_name: String },

    #[error("batch cancelled")]
    Cancelled,

    #[error("failed to write archive: {0}")]
    Placement(#[from] arkiv_fs::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EntryNotFound { .. } => ErrorKind::EntryNotFound,
            Self::DuplicateEntry { .. } => ErrorKind::DuplicateEntry,
            Self::InvalidName { .. } => ErrorKind::InvalidName,
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::UnsupportedOnStreamBackedEntry { .. } => ErrorKind::UnsupportedOnStreamBackedEntry,
            Self::InvalidArchiveFormat { .. } => ErrorKind::InvalidArchiveFormat,
            Self::ReadOnlyHandle { .. } => ErrorKind::ReadOnlyHandle,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Open { .. } | Self::Placement(_) | Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this failure ends the whole batch rather than a single request.
    ///
    /// Opening or replacing a container is setup work; everything else is
    /// scoped to the entry it names.
    pub fn is_terminating(&self) -> bool {
        matches!(
            self,
            Self::InvalidArchiveFormat { .. }
                | Self::Open { .. }
                | Self::Placement(_)
                | Self::Cancelled
        )
    }

    /// Copy of this error for reporting against several requests. I/O
    /// sources are flattened to their message.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::EntryNotFound { path } => Self::EntryNotFound { path: path.clone() },
            Self::DuplicateEntry { path } => Self::DuplicateEntry { path: path.clone() },
            Self::InvalidName { name, reason } => Self::InvalidName {
                name: name.clone(),
                reason: *reason,
            },
            Self::InvalidPath { path, reason } => Self::InvalidPath {
                path: path.clone(),
                reason: *reason,
            },
            Self::UnsupportedOnStreamBackedEntry { path } => {
                Self::UnsupportedOnStreamBackedEntry { path: path.clone() }
            }
            Self::InvalidArchiveFormat {
                source_name,
                reason,
            } => Self::InvalidArchiveFormat {
                source_name: source_name.clone(),
                reason: reason.clone(),
            },
            Self::Open { source_name, error } => Self::Open {
                source_name: source_name.clone(),
                error: io::Error::new(error.kind(), error.to_string()),
            },
            Self::ReadOnlyHandle { source_name } => Self::ReadOnlyHandle {
                source_name: source_name.clone(),
            },
            Self::Cancelled => Self::Cancelled,
            Self::Placement(e) => Self::Io(io::Error::other(e.to_string())),
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
        }
    }

    pub(crate) fn invalid_format(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidArchiveFormat {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Collapse a zip error into `io::Error` inside I/O-shaped closures.
pub(crate) fn zip_to_io(err: zip::result::ZipError) -> io::Error {
    match err {
        zip::result::ZipError::Io(e) => e,
        other => io::Error::other(other),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
