use std::io;
use std::path::{Path, PathBuf};

use duct_types::Checksum;

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Checkout was requested for an artifact that was never committed.
    #[error("artifact {0:?} has no checksum; nothing to check out")]
    EmptyChecksum(String),

    /// The object named by an artifact's checksum is not in the cache.
    #[error("object {checksum} for artifact {path:?} is missing from the cache")]
    MissingObject { path: String, checksum: Checksum },

    /// A stored object's bytes do not hash to its key.
    #[error("integrity mismatch: object {expected} hashes to {actual}")]
    IntegrityMismatch {
        expected: Checksum,
        actual: Checksum,
    },

    /// A directory manifest could not be decoded.
    #[error("corrupt directory manifest {checksum}: {reason}")]
    CorruptManifest { checksum: Checksum, reason: String },

    /// The working tree holds a different kind of entry than the artifact
    /// describes (e.g. a directory where a file was declared).
    #[error("expected {path:?} to be a {expected}")]
    WrongKind {
        path: PathBuf,
        expected: &'static str,
    },

    /// I/O failure, with the operation and path that caused it.
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    /// Returns `true` if the error means a file or object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::MissingObject { .. } => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Attach an operation name and path to an [`io::Result`].
pub trait IoContext<T> {
    fn io_context(self, op: &'static str, path: &Path) -> CacheResult<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, op: &'static str, path: &Path) -> CacheResult<T> {
        self.map_err(|source| CacheError::Io {
            op,
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_context_keeps_path_and_op() {
        let result: io::Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = result.io_context("open", Path::new("data/x.bin")).unwrap_err();
        assert!(err.is_not_found());
        let text = err.to_string();
        assert!(text.contains("open"));
        assert!(text.contains("data/x.bin"));
    }
}
