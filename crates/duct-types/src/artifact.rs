//! The tracked-path record shared by stages, the cache and the index.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;

fn is_false(value: &bool) -> bool {
    !*value
}

/// A file or directory tracked by duct.
///
/// `path` is relative to the working directory of the stage that declares
/// the artifact. A `checksum` of `None` means the artifact has never been
/// committed; callers must treat it as absent from the cache.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Path relative to the owning stage's working directory.
    pub path: String,
    /// Content checksum recorded by the last successful commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Whether the artifact is a directory tree.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_dir: bool,
    /// Whether a directory's checksum covers its sub-directories too.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_recursive: bool,
    /// Hash the artifact but never store its bytes in the cache.
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_cache: bool,
}

impl Artifact {
    /// A regular-file artifact with no checksum.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// A directory artifact with no checksum.
    pub fn directory(path: impl Into<String>, is_recursive: bool) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            is_recursive,
            ..Default::default()
        }
    }

    /// Builder-style checksum setter.
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Derive an artifact from what currently exists at `root/path`.
    ///
    /// Directories become directory artifacts; everything else (including a
    /// missing path) is treated as a regular file.
    pub fn from_path(root: &Path, path: &str, is_recursive: bool) -> io::Result<Self> {
        match std::fs::metadata(root.join(path)) {
            Ok(meta) if meta.is_dir() => Ok(Self::directory(path, is_recursive)),
            Ok(_) => Ok(Self::new(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new(path)),
            Err(e) => Err(e),
        }
    }

    /// Returns `true` if the artifact has been committed at least once.
    pub fn is_committed(&self) -> bool {
        self.checksum.is_some()
    }

    /// Structural equality: everything except the checksum.
    ///
    /// `skip_cache` is excluded as well; it is assigned during traversal to
    /// dependencies that no stage owns.
    pub fn is_equivalent(&self, other: &Artifact) -> bool {
        self.path == other.path
            && self.is_dir == other.is_dir
            && self.is_recursive == other.is_recursive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_artifact_is_uncommitted() {
        let art = Artifact::new("data/raw.bin");
        assert!(!art.is_committed());
        assert!(!art.is_dir);
    }

    #[test]
    fn equivalence_ignores_checksum_and_skip_cache() {
        let a = Artifact::new("x.bin");
        let mut b = Artifact::new("x.bin").with_checksum(Checksum::from_hash([3; 32]));
        b.skip_cache = true;
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn equivalence_respects_flags() {
        let a = Artifact::directory("out", true);
        let b = Artifact::directory("out", false);
        assert!(!a.is_equivalent(&b));
        assert!(!a.is_equivalent(&Artifact::new("out")));
    }

    #[test]
    fn absent_fields_are_not_serialized() {
        let json = serde_json::to_string(&Artifact::new("a.bin")).unwrap();
        assert_eq!(json, r#"{"path":"a.bin"}"#);
    }

    #[test]
    fn from_path_detects_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("file.txt"), b"x").unwrap();

        let sub = Artifact::from_path(dir.path(), "sub", true).unwrap();
        assert!(sub.is_dir && sub.is_recursive);

        let file = Artifact::from_path(dir.path(), "file.txt", true).unwrap();
        assert!(!file.is_dir && !file.is_recursive);

        let missing = Artifact::from_path(dir.path(), "missing.txt", false).unwrap();
        assert!(!missing.is_dir);
    }
}
