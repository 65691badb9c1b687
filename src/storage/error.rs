//! Error taxonomy of the storage engine

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::domain::ValidationError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Tag '{0}' already exists")]
    DuplicateTag(String),

    #[error("Tag '{0}' not found")]
    NotFound(String),

    #[error("Failed to acquire lock {} within {}ms", path.display(), timeout.as_millis())]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True for failures the caller may simply retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
