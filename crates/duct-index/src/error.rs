//! Error types for the index crate.

use std::io;
use std::path::PathBuf;

use duct_stage::StageError;
use duct_store::CacheError;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The stage path is not in the index.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// The stage path is already in the index.
    #[error("stage already in index: {0}")]
    AlreadyTracked(String),

    /// More than one stage declares the same output.
    #[error("artifact {path} is an output of more than one stage: {}", .stages.join(", "))]
    AmbiguousOwner { path: String, stages: Vec<String> },

    /// Following dependencies from a stage led back to it.
    #[error("cycle detected at stage {stage}")]
    CycleDetected { stage: String },

    /// A cache operation on one of a stage's artifacts failed.
    #[error("stage {stage}: artifact {path}: {source}")]
    Artifact {
        stage: String,
        path: String,
        #[source]
        source: CacheError,
    },

    /// The work for a stage panicked instead of returning.
    #[error("stage {stage} panicked: {message}")]
    TaskPanicked { stage: String, message: String },

    /// Loading, saving or running a stage failed.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// The index file could not be encoded or decoded.
    #[error("index file {path:?}: {reason}")]
    Serialization { path: PathBuf, reason: String },

    /// I/O failure on the index file.
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IndexError {
    pub(crate) fn artifact(stage: &str, path: &str, source: CacheError) -> Self {
        Self::Artifact {
            stage: stage.to_string(),
            path: path.to_string(),
            source,
        }
    }
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
