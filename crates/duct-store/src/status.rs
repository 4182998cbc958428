//! Artifact status types.
//!
//! These describe how an artifact's working copy compares with its recorded
//! checksum and with the cache. Computing a status never mutates anything.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Drift between an artifact's working copy and its recorded state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Nothing exists at the artifact's path.
    Absent,
    /// The artifact has no recorded checksum.
    Uncommitted,
    /// The working copy matches the recorded checksum.
    Unchanged,
    /// The working copy differs from the recorded checksum.
    Modified,
    /// The working copy matches, but the cache lacks the object.
    MissingFromCache,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Absent => "absent",
            Self::Uncommitted => "uncommitted",
            Self::Unchanged => "up-to-date",
            Self::Modified => "modified",
            Self::MissingFromCache => "missing from cache",
        };
        f.write_str(text)
    }
}

/// What kind of filesystem entry sits at an artifact's path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    Absent,
    RegularFile,
    Link,
    Directory,
    Other,
}

impl fmt::Display for WorkspaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Absent => "absent",
            Self::RegularFile => "regular file",
            Self::Link => "link",
            Self::Directory => "directory",
            Self::Other => "other",
        };
        f.write_str(text)
    }
}

/// Status of one artifact, with per-entry detail for directories.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStatus {
    /// The artifact path the status was computed for.
    pub path: String,
    /// The overall drift state.
    pub status: FileStatus,
    /// The kind of entry found in the working tree.
    pub workspace: WorkspaceKind,
    /// Statuses of directory entries, keyed by entry name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, ArtifactStatus>,
}

impl ArtifactStatus {
    /// Create a status with no children.
    pub fn new(path: impl Into<String>, status: FileStatus, workspace: WorkspaceKind) -> Self {
        Self {
            path: path.into(),
            status,
            workspace,
            children: BTreeMap::new(),
        }
    }

    /// Returns `true` if the working copy matches the recorded checksum and
    /// the cache holds the object.
    pub fn is_unchanged(&self) -> bool {
        self.status == FileStatus::Unchanged
    }

    /// Fold child statuses into a directory's overall status.
    ///
    /// Any absent, modified or uncommitted child makes the directory
    /// modified; otherwise a child missing from the cache propagates.
    pub fn aggregate<'a>(children: impl IntoIterator<Item = &'a ArtifactStatus>) -> FileStatus {
        let mut missing = false;
        for child in children {
            match child.status {
                FileStatus::Unchanged => {}
                FileStatus::MissingFromCache => missing = true,
                FileStatus::Absent | FileStatus::Modified | FileStatus::Uncommitted => {
                    return FileStatus::Modified;
                }
            }
        }
        if missing {
            FileStatus::MissingFromCache
        } else {
            FileStatus::Unchanged
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.status, self.workspace)
    }
}
