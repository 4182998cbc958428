use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use duct_types::{Artifact, Checksum, ContentHasher};

use crate::error::{CacheError, CacheResult};
use crate::status::{ArtifactStatus, FileStatus, WorkspaceKind};
use crate::strategy::CheckoutStrategy;
use crate::traits::Cache;

/// A cache call recorded by [`InMemoryCache`], with the resolved path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheOp {
    Commit(PathBuf),
    Checkout(PathBuf),
    Status(PathBuf),
    Detach(PathBuf),
}

/// In-memory cache with its own in-memory working tree.
///
/// Intended for tests of stage and index logic. Files live in a map keyed
/// by `working_dir.join(artifact.path)`; only file artifacts are supported
/// and the checkout strategy is ignored. Every call is appended to an
/// operation log so tests can assert on ordering.
pub struct InMemoryCache {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
    objects: RwLock<HashMap<Checksum, Vec<u8>>>,
    ops: Mutex<Vec<CacheOp>>,
}

impl InMemoryCache {
    /// Create an empty cache and working tree.
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
        }
    }

    /// Write a working-tree file.
    pub fn write_file(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.files
            .write()
            .expect("lock poisoned")
            .insert(path.into(), data.into());
    }

    /// Read a working-tree file.
    pub fn read_file(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.read().expect("lock poisoned").get(path).cloned()
    }

    /// Delete a working-tree file, returning whether it existed.
    pub fn remove_file(&self, path: &Path) -> bool {
        self.files
            .write()
            .expect("lock poisoned")
            .remove(path)
            .is_some()
    }

    /// Number of distinct objects stored.
    pub fn object_count(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Snapshot of the operation log.
    pub fn operations(&self) -> Vec<CacheOp> {
        self.ops.lock().expect("lock poisoned").clone()
    }

    fn record(&self, op: CacheOp) {
        self.ops.lock().expect("lock poisoned").push(op);
    }

    fn require_file(path: &Path, artifact: &Artifact) -> CacheResult<()> {
        if artifact.is_dir {
            return Err(CacheError::WrongKind {
                path: path.to_path_buf(),
                expected: "file",
            });
        }
        Ok(())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for InMemoryCache {
    fn commit(
        &self,
        working_dir: &Path,
        artifact: &mut Artifact,
        _strategy: CheckoutStrategy,
    ) -> CacheResult<()> {
        let path = working_dir.join(&artifact.path);
        self.record(CacheOp::Commit(path.clone()));
        Self::require_file(&path, artifact)?;

        let data = self.read_file(&path).ok_or_else(|| CacheError::Io {
            op: "stat",
            path: path.clone(),
            source: std::io::ErrorKind::NotFound.into(),
        })?;
        let checksum = ContentHasher::FILE.hash(&data);
        if !artifact.skip_cache {
            self.objects
                .write()
                .expect("lock poisoned")
                .entry(checksum)
                .or_insert(data);
        }
        artifact.checksum = Some(checksum);
        Ok(())
    }

    fn checkout(
        &self,
        working_dir: &Path,
        artifact: &Artifact,
        _strategy: CheckoutStrategy,
    ) -> CacheResult<()> {
        let path = working_dir.join(&artifact.path);
        self.record(CacheOp::Checkout(path.clone()));
        Self::require_file(&path, artifact)?;
        if artifact.skip_cache {
            return Ok(());
        }

        let checksum = artifact
            .checksum
            .ok_or_else(|| CacheError::EmptyChecksum(artifact.path.clone()))?;
        let data = self
            .objects
            .read()
            .expect("lock poisoned")
            .get(&checksum)
            .cloned()
            .ok_or_else(|| CacheError::MissingObject {
                path: artifact.path.clone(),
                checksum,
            })?;
        self.write_file(path, data);
        Ok(())
    }

    /// The in-memory working tree never links into the object map.
    fn detach(&self, working_dir: &Path, artifact: &Artifact) -> CacheResult<()> {
        self.record(CacheOp::Detach(working_dir.join(&artifact.path)));
        Ok(())
    }

    fn status(&self, working_dir: &Path, artifact: &Artifact) -> CacheResult<ArtifactStatus> {
        let path = working_dir.join(&artifact.path);
        self.record(CacheOp::Status(path.clone()));
        Self::require_file(&path, artifact)?;

        let Some(data) = self.read_file(&path) else {
            return Ok(ArtifactStatus::new(
                &artifact.path,
                FileStatus::Absent,
                WorkspaceKind::Absent,
            ));
        };
        let status = match artifact.checksum {
            None => FileStatus::Uncommitted,
            Some(checksum) if ContentHasher::FILE.hash(&data) != checksum => FileStatus::Modified,
            Some(_) if artifact.skip_cache => FileStatus::Unchanged,
            Some(checksum) => {
                if self.objects.read().expect("lock poisoned").contains_key(&checksum) {
                    FileStatus::Unchanged
                } else {
                    FileStatus::MissingFromCache
                }
            }
        };
        Ok(ArtifactStatus::new(&artifact.path, status, WorkspaceKind::RegularFile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_checkout_roundtrip() {
        let cache = InMemoryCache::new();
        let work = Path::new("/w");
        cache.write_file("/w/a.txt", "hello");
        let mut art = Artifact::new("a.txt");

        cache.commit(work, &mut art, CheckoutStrategy::Link).unwrap();
        assert!(cache.remove_file(Path::new("/w/a.txt")));
        cache.checkout(work, &art, CheckoutStrategy::Link).unwrap();

        assert_eq!(cache.read_file(Path::new("/w/a.txt")).unwrap(), b"hello");
        assert_eq!(
            cache.operations(),
            vec![
                CacheOp::Commit(PathBuf::from("/w/a.txt")),
                CacheOp::Checkout(PathBuf::from("/w/a.txt")),
            ]
        );
    }

    #[test]
    fn status_follows_working_copy() {
        let cache = InMemoryCache::new();
        let work = Path::new("/w");
        let mut art = Artifact::new("a.txt");
        assert_eq!(cache.status(work, &art).unwrap().status, FileStatus::Absent);

        cache.write_file("/w/a.txt", "v1");
        assert_eq!(cache.status(work, &art).unwrap().status, FileStatus::Uncommitted);

        cache.commit(work, &mut art, CheckoutStrategy::Copy).unwrap();
        assert!(cache.status(work, &art).unwrap().is_unchanged());

        cache.write_file("/w/a.txt", "v2");
        assert_eq!(cache.status(work, &art).unwrap().status, FileStatus::Modified);
    }

    #[test]
    fn skip_cache_stores_nothing() {
        let cache = InMemoryCache::new();
        cache.write_file("/w/ext", "x");
        let mut art = Artifact::new("ext");
        art.skip_cache = true;
        cache.commit(Path::new("/w"), &mut art, CheckoutStrategy::Copy).unwrap();
        assert!(art.checksum.is_some());
        assert_eq!(cache.object_count(), 0);
    }

    #[test]
    fn directories_are_rejected() {
        let cache = InMemoryCache::new();
        let mut art = Artifact::directory("d", true);
        let err = cache
            .commit(Path::new("/w"), &mut art, CheckoutStrategy::Copy)
            .unwrap_err();
        assert!(matches!(err, CacheError::WrongKind { .. }));
    }
}
