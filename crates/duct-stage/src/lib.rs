//! Pipeline stages for duct.
//!
//! A [`Stage`] is a shell command plus the artifacts it reads
//! (dependencies) and the artifacts it produces (outputs). Stages are
//! authored as TOML definition files; after a successful commit or run a
//! checksummed copy is written next to the definition as a lock file.
//!
//! # Key Types
//!
//! - [`Stage`] / [`StageFile`]: in-memory (path-keyed) and on-disk (list) forms
//! - [`StageStore`]: the stage file codec, with [`TomlStageStore`] and
//!   [`InMemoryStageStore`]
//! - [`Runner`] / [`ShellRunner`]: command execution, cancellable through a
//!   [`CancelToken`]
//!
//! # Design Rules
//!
//! 1. A lock file is only trusted while its stage is equivalent to the
//!    definition (same command, working directory and artifacts, checksums
//!    aside).
//! 2. A missing lock file means "not locked", never an error.
//! 3. Stage files are written atomically.

pub mod error;
pub mod runner;
pub mod stage;
pub mod store;

pub use error::{StageError, StageResult};
pub use runner::{CancelToken, Runner, ShellRunner};
pub use stage::{lock_path_for, normalize, resolve_dir, Stage, StageFile, LOCK_SUFFIX};
pub use store::{InMemoryStageStore, StageStore, TomlStageStore};
