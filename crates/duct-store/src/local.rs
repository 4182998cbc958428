//! On-disk content-addressed cache.
//!
//! Layout: `<root>/<first two hex chars>/<remaining 62 hex chars>`. Every
//! object is written to a temporary file inside `<root>`, hashed, made
//! read-only and then renamed onto its checksum path, so a crash never
//! leaves a partial object under a valid-looking key.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use duct_types::{Artifact, Checksum, ContentHasher};

use crate::error::{CacheError, CacheResult, IoContext};
use crate::fsutil;
use crate::manifest::DirectoryManifest;
use crate::status::{ArtifactStatus, FileStatus, WorkspaceKind};
use crate::strategy::CheckoutStrategy;
use crate::traits::Cache;

/// Filesystem-backed cache rooted at a directory.
#[derive(Clone, Debug)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    /// Open (creating if needed) the cache at `root`.
    ///
    /// The root is canonicalized so links created by the link strategy are
    /// absolute and survive moving the working copy.
    pub fn new(root: impl AsRef<Path>) -> CacheResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).io_context("create cache directory", root)?;
        let root = fs::canonicalize(root).io_context("resolve cache directory", root)?;
        Ok(Self { root })
    }

    /// The canonical cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the object for `checksum` lives (whether or not it exists).
    pub fn object_path(&self, checksum: &Checksum) -> PathBuf {
        let (dir, file) = checksum.shard();
        self.root.join(dir).join(file)
    }

    /// Returns `true` if the cache holds the object for `checksum`.
    pub fn contains(&self, checksum: &Checksum) -> CacheResult<bool> {
        let path = self.object_path(checksum);
        fsutil::exists(&path, true).io_context("stat object", &path)
    }

    // ---------------------------------------------------------------
    // Integrity
    // ---------------------------------------------------------------

    /// Re-hash a stored object and check it against its key.
    ///
    /// Objects may hold file bytes or a directory manifest; either domain
    /// matching the key is accepted.
    pub fn verify(&self, checksum: &Checksum) -> CacheResult<()> {
        let path = self.object_path(checksum);
        if !self.contains(checksum)? {
            return Err(CacheError::MissingObject {
                path: path.display().to_string(),
                checksum: *checksum,
            });
        }
        let actual = ContentHasher::FILE
            .hash_file(&path)
            .io_context("read object", &path)?;
        if actual == *checksum {
            return Ok(());
        }
        let as_manifest = ContentHasher::MANIFEST
            .hash_file(&path)
            .io_context("read object", &path)?;
        if as_manifest == *checksum {
            return Ok(());
        }
        Err(CacheError::IntegrityMismatch {
            expected: *checksum,
            actual,
        })
    }

    /// Verify every object in the cache, returning the corrupt ones.
    pub fn fsck(&self) -> CacheResult<Vec<CacheError>> {
        let mut corrupt = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| walk_error(&self.root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(checksum) = self.checksum_for_object(entry.path()) else {
                warn!(path = %entry.path().display(), "unexpected file in cache");
                continue;
            };
            match self.verify(&checksum) {
                Ok(()) => {}
                Err(err @ CacheError::IntegrityMismatch { .. }) => corrupt.push(err),
                Err(err) => return Err(err),
            }
        }
        Ok(corrupt)
    }

    // ---------------------------------------------------------------
    // Object publication
    // ---------------------------------------------------------------

    /// Copy `source` into the cache and return the checksum it was stored
    /// under. The checksum is taken from the copied bytes, so a file that
    /// changes mid-commit can never be published under a stale key.
    fn store_file(&self, source: &Path) -> CacheResult<Checksum> {
        let mut tmp = self.temp_object()?;
        let mut reader = File::open(source).io_context("open", source)?;
        io::copy(&mut reader, tmp.as_file_mut()).io_context("copy into cache", source)?;
        let checksum = ContentHasher::FILE
            .hash_file(tmp.path())
            .io_context("hash temporary object", tmp.path())?;
        self.publish(tmp, &checksum)?;
        Ok(checksum)
    }

    /// Store raw bytes (a directory manifest) under `checksum`.
    fn store_bytes(&self, checksum: &Checksum, data: &[u8]) -> CacheResult<()> {
        if self.contains(checksum)? {
            return Ok(());
        }
        let mut tmp = self.temp_object()?;
        io::Write::write_all(tmp.as_file_mut(), data).io_context("write temporary object", tmp.path())?;
        self.publish(tmp, checksum)
    }

    fn temp_object(&self) -> CacheResult<NamedTempFile> {
        NamedTempFile::new_in(&self.root).io_context("create temporary object", &self.root)
    }

    fn publish(&self, tmp: NamedTempFile, checksum: &Checksum) -> CacheResult<()> {
        let dest = self.object_path(checksum);
        if self.contains(checksum)? {
            // Identical content already published; the temp file is dropped.
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).io_context("create shard directory", parent)?;
        }
        tmp.as_file().sync_all().io_context("sync temporary object", tmp.path())?;
        fsutil::set_readonly(tmp.path(), true).io_context("protect object", tmp.path())?;
        tmp.persist(&dest).map_err(|e| CacheError::Io {
            op: "publish object",
            path: dest.clone(),
            source: e.error,
        })?;
        debug!(checksum = %checksum.short_hex(), "published object");
        Ok(())
    }

    fn read_object(&self, artifact_path: &str, checksum: &Checksum) -> CacheResult<Vec<u8>> {
        let path = self.object_path(checksum);
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CacheError::MissingObject {
                path: artifact_path.to_string(),
                checksum: *checksum,
            }),
            Err(e) => Err(e).io_context("read object", &path),
        }
    }

    fn load_manifest(&self, artifact_path: &str, checksum: &Checksum) -> CacheResult<DirectoryManifest> {
        let data = self.read_object(artifact_path, checksum)?;
        DirectoryManifest::from_bytes(checksum, &data)
    }

    /// Recover the checksum from an object path inside the cache.
    fn checksum_for_object(&self, object: &Path) -> Option<Checksum> {
        let rel = object.strip_prefix(&self.root).ok()?;
        let mut parts = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned());
        let (Some(dir), Some(file), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        Checksum::from_hex(&format!("{dir}{file}")).ok()
    }

    /// If `link` points at an existing cache object, return its checksum.
    fn linked_object(&self, link: &Path) -> CacheResult<Option<Checksum>> {
        let target = fs::read_link(link).io_context("read link", link)?;
        match self.checksum_for_object(&target) {
            Some(checksum) if self.contains(&checksum)? => Ok(Some(checksum)),
            _ => Ok(None),
        }
    }

    fn cached_state(&self, checksum: &Checksum) -> CacheResult<FileStatus> {
        Ok(if self.contains(checksum)? {
            FileStatus::Unchanged
        } else {
            FileStatus::MissingFromCache
        })
    }

    // ---------------------------------------------------------------
    // Files
    // ---------------------------------------------------------------

    fn commit_file(
        &self,
        working_dir: &Path,
        artifact: &mut Artifact,
        strategy: CheckoutStrategy,
    ) -> CacheResult<()> {
        let path = working_dir.join(&artifact.path);
        let meta = fs::symlink_metadata(&path).io_context("stat", &path)?;
        if meta.is_dir() {
            return Err(CacheError::WrongKind {
                path,
                expected: "file",
            });
        }

        if meta.file_type().is_symlink() && !artifact.skip_cache {
            if let Some(checksum) = self.linked_object(&path)? {
                debug!(path = %path.display(), "already linked into cache");
                artifact.checksum = Some(checksum);
                return Ok(());
            }
        }

        let mut checksum = ContentHasher::FILE
            .hash_file(&path)
            .io_context("read", &path)?;
        if !artifact.skip_cache {
            if !self.contains(&checksum)? {
                checksum = self.store_file(&path)?;
            }
            if strategy == CheckoutStrategy::Link {
                fs::remove_file(&path).io_context("remove", &path)?;
                fsutil::symlink_file(&self.object_path(&checksum), &path)
                    .io_context("link", &path)?;
            }
        }
        debug!(path = %path.display(), checksum = %checksum.short_hex(), "committed file");
        artifact.checksum = Some(checksum);
        Ok(())
    }

    fn checkout_file(
        &self,
        working_dir: &Path,
        artifact: &Artifact,
        strategy: CheckoutStrategy,
    ) -> CacheResult<()> {
        let checksum = artifact
            .checksum
            .ok_or_else(|| CacheError::EmptyChecksum(artifact.path.clone()))?;
        if !self.contains(&checksum)? {
            return Err(CacheError::MissingObject {
                path: artifact.path.clone(),
                checksum,
            });
        }
        let object = self.object_path(&checksum);
        let dest = working_dir.join(&artifact.path);

        match fs::symlink_metadata(&dest) {
            Ok(meta) if meta.is_dir() => {
                return Err(CacheError::WrongKind {
                    path: dest,
                    expected: "file",
                });
            }
            Ok(meta) => {
                let linked = meta.file_type().is_symlink()
                    && fs::read_link(&dest).io_context("read link", &dest)? == object;
                if linked && strategy == CheckoutStrategy::Link {
                    return Ok(());
                }
                fs::remove_file(&dest).io_context("remove", &dest)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).io_context("create directory", parent)?;
                }
            }
            Err(e) => return Err(e).io_context("stat", &dest),
        }

        match strategy {
            CheckoutStrategy::Link => {
                fsutil::symlink_file(&object, &dest).io_context("link", &dest)?;
            }
            CheckoutStrategy::Copy => {
                fs::copy(&object, &dest).io_context("copy from cache", &dest)?;
                fsutil::set_readonly(&dest, false).io_context("make writable", &dest)?;
            }
        }
        debug!(path = %dest.display(), %strategy, "checked out file");
        Ok(())
    }

    fn status_file(&self, working_dir: &Path, artifact: &Artifact) -> CacheResult<ArtifactStatus> {
        let path = working_dir.join(&artifact.path);
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(ArtifactStatus::new(
                    &artifact.path,
                    FileStatus::Absent,
                    WorkspaceKind::Absent,
                ));
            }
            Err(e) => return Err(e).io_context("stat", &path),
        };
        let kind = workspace_kind(&meta);
        let Some(checksum) = artifact.checksum else {
            return Ok(ArtifactStatus::new(&artifact.path, FileStatus::Uncommitted, kind));
        };

        let status = match kind {
            WorkspaceKind::RegularFile => self.compare_file(&path, &checksum, artifact.skip_cache)?,
            WorkspaceKind::Link => {
                let target = fs::read_link(&path).io_context("read link", &path)?;
                if target == self.object_path(&checksum) {
                    self.cached_state(&checksum)?
                } else if fsutil::exists(&path, true).io_context("stat", &path)? {
                    self.compare_file(&path, &checksum, artifact.skip_cache)?
                } else {
                    FileStatus::Modified
                }
            }
            _ => FileStatus::Modified,
        };
        Ok(ArtifactStatus::new(&artifact.path, status, kind))
    }

    fn compare_file(&self, path: &Path, checksum: &Checksum, skip_cache: bool) -> CacheResult<FileStatus> {
        let actual = ContentHasher::FILE.hash_file(path).io_context("read", path)?;
        if actual != *checksum {
            Ok(FileStatus::Modified)
        } else if skip_cache {
            Ok(FileStatus::Unchanged)
        } else {
            self.cached_state(checksum)
        }
    }

    // ---------------------------------------------------------------
    // Directories
    // ---------------------------------------------------------------

    fn commit_dir(
        &self,
        working_dir: &Path,
        artifact: &mut Artifact,
        strategy: CheckoutStrategy,
    ) -> CacheResult<()> {
        let dir = working_dir.join(&artifact.path);
        let meta = fs::metadata(&dir).io_context("stat", &dir)?;
        if !meta.is_dir() {
            return Err(CacheError::WrongKind {
                path: dir,
                expected: "directory",
            });
        }

        let mut manifest = DirectoryManifest::new();
        let entries = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in entries {
            let entry = entry.map_err(|e| walk_error(&dir, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            let mut child = if entry.file_type().is_dir() {
                if !artifact.is_recursive {
                    continue;
                }
                Artifact::directory(name, true)
            } else {
                Artifact::new(name)
            };
            child.skip_cache = artifact.skip_cache;
            if child.is_dir {
                self.commit_dir(&dir, &mut child, strategy)?;
            } else {
                self.commit_file(&dir, &mut child, strategy)?;
            }
            manifest.insert(child);
        }

        let checksum = manifest.checksum();
        if !artifact.skip_cache {
            self.store_bytes(&checksum, &manifest.to_bytes())?;
        }
        debug!(
            path = %dir.display(),
            entries = manifest.len(),
            checksum = %checksum.short_hex(),
            "committed directory"
        );
        artifact.checksum = Some(checksum);
        Ok(())
    }

    fn checkout_dir(
        &self,
        working_dir: &Path,
        artifact: &Artifact,
        strategy: CheckoutStrategy,
    ) -> CacheResult<()> {
        let checksum = artifact
            .checksum
            .ok_or_else(|| CacheError::EmptyChecksum(artifact.path.clone()))?;
        let manifest = self.load_manifest(&artifact.path, &checksum)?;
        let dir = working_dir.join(&artifact.path);
        match fs::metadata(&dir) {
            Ok(meta) if !meta.is_dir() => {
                return Err(CacheError::WrongKind {
                    path: dir,
                    expected: "directory",
                });
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&dir).io_context("create directory", &dir)?;
            }
            Err(e) => return Err(e).io_context("stat", &dir),
        }
        for child in manifest.contents.values() {
            if child.is_dir {
                self.checkout_dir(&dir, child, strategy)?;
            } else {
                self.checkout_file(&dir, child, strategy)?;
            }
        }
        Ok(())
    }

    fn status_dir(&self, working_dir: &Path, artifact: &Artifact) -> CacheResult<ArtifactStatus> {
        let dir = working_dir.join(&artifact.path);
        let meta = match fs::metadata(&dir) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(ArtifactStatus::new(
                    &artifact.path,
                    FileStatus::Absent,
                    WorkspaceKind::Absent,
                ));
            }
            Err(e) => return Err(e).io_context("stat", &dir),
        };
        if !meta.is_dir() {
            let kind = if meta.is_file() {
                WorkspaceKind::RegularFile
            } else {
                WorkspaceKind::Other
            };
            return Ok(ArtifactStatus::new(&artifact.path, FileStatus::Modified, kind));
        }
        let Some(checksum) = artifact.checksum else {
            return Ok(ArtifactStatus::new(
                &artifact.path,
                FileStatus::Uncommitted,
                WorkspaceKind::Directory,
            ));
        };

        if artifact.skip_cache {
            // Hash-only commit of a copy: nothing is stored or linked.
            let mut probe = artifact.clone();
            self.commit_dir(working_dir, &mut probe, CheckoutStrategy::Copy)?;
            let status = if probe.checksum == Some(checksum) {
                FileStatus::Unchanged
            } else {
                FileStatus::Modified
            };
            return Ok(ArtifactStatus::new(&artifact.path, status, WorkspaceKind::Directory));
        }

        let manifest = match self.load_manifest(&artifact.path, &checksum) {
            Ok(manifest) => manifest,
            Err(CacheError::MissingObject { .. }) => {
                return Ok(ArtifactStatus::new(
                    &artifact.path,
                    FileStatus::MissingFromCache,
                    WorkspaceKind::Directory,
                ));
            }
            Err(e) => return Err(e),
        };

        let mut result = ArtifactStatus::new(&artifact.path, FileStatus::Unchanged, WorkspaceKind::Directory);
        for child in manifest.contents.values() {
            let status = if child.is_dir {
                self.status_dir(&dir, child)?
            } else {
                self.status_file(&dir, child)?
            };
            result.children.insert(child.path.clone(), status);
        }

        // Entries on disk the manifest does not know about.
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| walk_error(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if manifest.get(&name).is_some() {
                continue;
            }
            let is_dir = entry.file_type().is_dir();
            if is_dir && !artifact.is_recursive {
                continue;
            }
            let kind = if is_dir {
                WorkspaceKind::Directory
            } else if entry.file_type().is_symlink() {
                WorkspaceKind::Link
            } else {
                WorkspaceKind::RegularFile
            };
            result
                .children
                .insert(name.clone(), ArtifactStatus::new(name, FileStatus::Uncommitted, kind));
        }

        result.status = ArtifactStatus::aggregate(result.children.values());
        Ok(result)
    }

    // ---------------------------------------------------------------
    // Detaching
    // ---------------------------------------------------------------

    /// Swap a link to a cache object for a private, writable copy. Links
    /// pointing elsewhere are left alone; a link to a missing object is
    /// removed.
    fn detach_link(&self, link: &Path) -> CacheResult<()> {
        let target = fs::read_link(link).io_context("read link", link)?;
        if self.checksum_for_object(&target).is_none() {
            return Ok(());
        }
        if !fsutil::exists(&target, true).io_context("stat object", &target)? {
            fs::remove_file(link).io_context("remove", link)?;
            return Ok(());
        }
        let parent = link.parent().unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(parent).io_context("create temporary copy", parent)?;
        let mut reader = File::open(&target).io_context("open", &target)?;
        io::copy(&mut reader, tmp.as_file_mut()).io_context("copy from cache", link)?;
        // Renaming onto the link replaces the link, never its target.
        tmp.persist(link).map_err(|e| CacheError::Io {
            op: "replace link",
            path: link.to_path_buf(),
            source: e.error,
        })?;
        debug!(path = %link.display(), "detached from cache");
        Ok(())
    }
}

impl Cache for LocalCache {
    fn commit(
        &self,
        working_dir: &Path,
        artifact: &mut Artifact,
        strategy: CheckoutStrategy,
    ) -> CacheResult<()> {
        if artifact.is_dir {
            self.commit_dir(working_dir, artifact, strategy)
        } else {
            self.commit_file(working_dir, artifact, strategy)
        }
    }

    fn checkout(
        &self,
        working_dir: &Path,
        artifact: &Artifact,
        strategy: CheckoutStrategy,
    ) -> CacheResult<()> {
        if artifact.skip_cache {
            debug!(path = %artifact.path, "skip-cache artifact; nothing to check out");
            return Ok(());
        }
        if artifact.is_dir {
            self.checkout_dir(working_dir, artifact, strategy)
        } else {
            self.checkout_file(working_dir, artifact, strategy)
        }
    }

    fn status(&self, working_dir: &Path, artifact: &Artifact) -> CacheResult<ArtifactStatus> {
        if artifact.is_dir {
            self.status_dir(working_dir, artifact)
        } else {
            self.status_file(working_dir, artifact)
        }
    }

    fn detach(&self, working_dir: &Path, artifact: &Artifact) -> CacheResult<()> {
        let path = working_dir.join(&artifact.path);
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).io_context("stat", &path),
        };
        if meta.file_type().is_symlink() {
            return self.detach_link(&path);
        }
        if meta.is_dir() {
            for entry in WalkDir::new(&path).min_depth(1) {
                let entry = entry.map_err(|e| walk_error(&path, e))?;
                if entry.path_is_symlink() {
                    self.detach_link(entry.path())?;
                }
            }
        }
        Ok(())
    }
}

fn workspace_kind(meta: &fs::Metadata) -> WorkspaceKind {
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        WorkspaceKind::Link
    } else if file_type.is_file() {
        WorkspaceKind::RegularFile
    } else if file_type.is_dir() {
        WorkspaceKind::Directory
    } else {
        WorkspaceKind::Other
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> CacheError {
    let path = err.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
    CacheError::Io {
        op: "walk directory",
        path,
        source: err.into(),
    }
}
