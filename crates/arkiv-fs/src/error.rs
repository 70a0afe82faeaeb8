use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path has no parent directory: {0}")]
    NoParent(PathBuf),

    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to create directory '{path}': {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to persist '{path}': {source}")]
    Persist { path: PathBuf, source: io::Error },

    #[error("refusing to overwrite existing file: {0}")]
    AlreadyExists(PathBuf),
}

impl Error {
    /// Underlying I/O error, when there is one.
    pub fn io(&self) -> Option<&io::Error> {
        match self {
            Self::Write { source, .. }
            | Self::CreateDir { source, .. }
            | Self::Persist { source, .. } => Some(source),
            Self::NoParent(_) | Self::AlreadyExists(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
