use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tempfile::NamedTempFile;

use crate::error::{StageError, StageResult};
use crate::stage::StageFile;

/// Codec and storage for stage definition and lock files.
///
/// Paths are project-root-relative strings, the same keys the index uses.
pub trait StageStore: Send + Sync {
    /// Read and decode a stage file. A missing file is
    /// [`StageError::NotFound`].
    fn load(&self, path: &str) -> StageResult<StageFile>;

    /// Encode and write a stage file, replacing any previous content.
    fn save(&self, path: &str, file: &StageFile) -> StageResult<()>;
}

/// TOML stage files on disk, resolved against a project root.
#[derive(Clone, Debug)]
pub struct TomlStageStore {
    root: PathBuf,
}

impl TomlStageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StageStore for TomlStageStore {
    fn load(&self, path: &str) -> StageResult<StageFile> {
        let full = self.root.join(path);
        let text = match fs::read_to_string(&full) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StageError::NotFound(path.to_string()));
            }
            Err(source) => {
                return Err(StageError::Io {
                    op: "read stage file",
                    path: full,
                    source,
                });
            }
        };
        toml::from_str(&text).map_err(|e| StageError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn save(&self, path: &str, file: &StageFile) -> StageResult<()> {
        let full = self.root.join(path);
        let text = toml::to_string_pretty(file).map_err(|e| StageError::Encode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let dir = full.parent().unwrap_or(&self.root);
        let io_err = |op: &'static str, path: &Path| {
            let path = path.to_path_buf();
            move |source| StageError::Io { op, path, source }
        };

        // Write beside the target and rename so readers never see half a file.
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err("create temporary file", dir))?;
        tmp.write_all(text.as_bytes())
            .map_err(io_err("write stage file", &full))?;
        tmp.persist(&full).map_err(|e| StageError::Io {
            op: "replace stage file",
            path: full.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

/// In-memory stage files for tests.
#[derive(Debug, Default)]
pub struct InMemoryStageStore {
    files: RwLock<HashMap<String, StageFile>>,
}

impl InMemoryStageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a file exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.files.read().expect("lock poisoned").contains_key(path)
    }

    /// Delete a file, returning whether it existed.
    pub fn remove(&self, path: &str) -> bool {
        self.files
            .write()
            .expect("lock poisoned")
            .remove(path)
            .is_some()
    }
}

impl StageStore for InMemoryStageStore {
    fn load(&self, path: &str) -> StageResult<StageFile> {
        self.files
            .read()
            .expect("lock poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| StageError::NotFound(path.to_string()))
    }

    fn save(&self, path: &str, file: &StageFile) -> StageResult<()> {
        self.files
            .write()
            .expect("lock poisoned")
            .insert(path.to_string(), file.clone());
        Ok(())
    }
}
