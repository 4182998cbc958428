use std::io;
use std::path::PathBuf;

/// Errors from loading, saving and running stages.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// No stage definition (or lock file) exists at the path.
    #[error("stage file not found: {0}")]
    NotFound(String),

    /// A stage file exists but is not a valid definition.
    #[error("invalid stage file {path}: {reason}")]
    Parse { path: String, reason: String },

    /// A stage could not be encoded for writing.
    #[error("cannot encode stage file {path}: {reason}")]
    Encode { path: String, reason: String },

    /// The stage's command exited unsuccessfully.
    #[error("stage {stage}: command failed with {status}")]
    CommandFailed { stage: String, status: String },

    /// The stage's command was interrupted before it finished.
    #[error("stage {stage}: command cancelled")]
    Cancelled { stage: String },

    /// I/O failure, with the operation and path that caused it.
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    /// Returns `true` for a missing definition or lock file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Convenience alias for stage results.
pub type StageResult<T> = Result<T, StageError>;
