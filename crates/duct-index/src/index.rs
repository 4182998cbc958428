//! The [`Index`]: every known stage, keyed by its definition path.
//!
//! The stage graph is never materialized. Edges are implicit: a stage
//! depends on whichever stage declares one of its dependencies as an
//! output, which [`Index::find_owner`] resolves on demand.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use duct_stage::{Stage, StageStore};
use duct_types::Artifact;

use crate::error::{IndexError, IndexResult};

/// One indexed stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub stage: Stage,
    /// Whether `stage` came from (or was written as) a valid lock file.
    #[serde(default)]
    pub locked: bool,
}

impl Entry {
    pub fn new(stage: Stage, locked: bool) -> Self {
        Self { stage, locked }
    }
}

/// The stage that declares an artifact as an output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Owner<'a> {
    /// The owning stage's path.
    pub stage: &'a str,
    /// The output artifact as declared by the owner.
    pub artifact: &'a Artifact,
}

/// All known stages, keyed by definition-file path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    entries: BTreeMap<String, Entry>,
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stages in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the index holds no stages.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Get an entry by stage path.
    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Get an entry, failing for unknown stages.
    pub fn entry(&self, path: &str) -> IndexResult<&Entry> {
        self.entries
            .get(path)
            .ok_or_else(|| IndexError::UnknownStage(path.to_string()))
    }

    pub(crate) fn entry_mut(&mut self, path: &str) -> IndexResult<&mut Entry> {
        self.entries
            .get_mut(path)
            .ok_or_else(|| IndexError::UnknownStage(path.to_string()))
    }

    /// Iterate entries in stage-path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// All stage paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Insert or replace an entry directly.
    pub fn insert(&mut self, path: impl Into<String>, stage: Stage, locked: bool) {
        self.entries.insert(path.into(), Entry::new(stage, locked));
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    /// Load an index file. A missing file is an empty index.
    pub fn from_file(path: &Path) -> IndexResult<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no index file; starting empty");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(IndexError::Io {
                    op: "read index",
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&data).map_err(|e| IndexError::Serialization {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write the index file atomically.
    pub fn to_file(&self, path: &Path) -> IndexResult<()> {
        let data = serde_json::to_vec_pretty(self).map_err(|e| IndexError::Serialization {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let io_err = |op: &'static str| {
            move |source| IndexError::Io {
                op,
                path: path.to_path_buf(),
                source,
            }
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err("create temporary index"))?;
        tmp.write_all(&data).map_err(io_err("write index"))?;
        tmp.persist(path).map_err(|e| IndexError::Io {
            op: "replace index",
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------

    /// Load the stage at `path` (honouring its lock file) and add it.
    ///
    /// Fails if the stage is already indexed or if it declares an output
    /// another stage already owns; the index is unchanged on failure.
    pub fn add(&mut self, store: &dyn StageStore, path: &str) -> IndexResult<()> {
        if self.contains(path) {
            return Err(IndexError::AlreadyTracked(path.to_string()));
        }
        let (stage, locked) = Stage::from_file(store, path)?;
        self.insert(path, stage, locked);
        if let Err(err) = self.check_ownership() {
            self.entries.remove(path);
            return Err(err);
        }
        debug!(stage = path, locked, "added stage");
        Ok(())
    }

    /// Remove a stage from the index.
    pub fn remove(&mut self, path: &str) -> IndexResult<Entry> {
        self.entries
            .remove(path)
            .ok_or_else(|| IndexError::UnknownStage(path.to_string()))
    }

    /// Re-read every stage definition, picking up edits and lock files.
    pub fn reload(&mut self, store: &dyn StageStore) -> IndexResult<()> {
        for (path, entry) in self.entries.iter_mut() {
            let (stage, locked) = Stage::from_file(store, path)?;
            *entry = Entry::new(stage, locked);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Ownership and validation
    // ---------------------------------------------------------------

    /// Find the stage whose outputs include `artifact_path` (a normalized,
    /// project-root-relative path).
    ///
    /// `Ok(None)` means the artifact is external. Two or more claimants is
    /// [`IndexError::AmbiguousOwner`].
    pub fn find_owner(&self, artifact_path: &str) -> IndexResult<Option<Owner<'_>>> {
        let mut found: Vec<Owner<'_>> = Vec::new();
        for (stage_path, entry) in &self.entries {
            for art in entry.stage.outputs.values() {
                if entry.stage.artifact_path_for(stage_path, &art.path) == artifact_path {
                    found.push(Owner {
                        stage: stage_path,
                        artifact: art,
                    });
                }
            }
        }
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(IndexError::AmbiguousOwner {
                path: artifact_path.to_string(),
                stages: found.iter().map(|o| o.stage.to_string()).collect(),
            }),
        }
    }

    /// Check the whole index before anything is touched: every output has
    /// at most one owner and no stage can reach itself.
    pub fn validate(&self) -> IndexResult<()> {
        self.check_ownership()?;
        self.plan(&[])?;
        Ok(())
    }

    fn check_ownership(&self) -> IndexResult<()> {
        let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (stage_path, entry) in &self.entries {
            for art in entry.stage.outputs.values() {
                owners
                    .entry(entry.stage.artifact_path_for(stage_path, &art.path))
                    .or_default()
                    .push(stage_path.clone());
            }
        }
        match owners.into_iter().find(|(_, stages)| stages.len() > 1) {
            Some((path, stages)) => Err(IndexError::AmbiguousOwner { path, stages }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use duct_stage::InMemoryStageStore;

    /// Build a stage from dependency and output paths.
    pub(crate) fn stage(deps: &[&str], outs: &[&str]) -> Stage {
        let mut stage = Stage::default();
        for d in deps {
            stage.dependencies.insert(d.to_string(), Artifact::new(*d));
        }
        for o in outs {
            stage.outputs.insert(o.to_string(), Artifact::new(*o));
        }
        stage
    }

    /// Build an index from `(path, deps, outs)` triples.
    pub(crate) fn index(stages: &[(&str, &[&str], &[&str])]) -> Index {
        let mut idx = Index::new();
        for (path, deps, outs) in stages {
            idx.insert(*path, stage(deps, outs), false);
        }
        idx
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    #[test]
    fn unowned_artifact_is_external() {
        let idx = index(&[("a.toml", &["raw.csv"], &["a.bin"])]);
        assert!(idx.find_owner("raw.csv").unwrap().is_none());
    }

    #[test]
    fn single_owner_is_found() {
        let idx = index(&[("a.toml", &[], &["a.bin"]), ("b.toml", &["a.bin"], &["b.bin"])]);
        let owner = idx.find_owner("a.bin").unwrap().unwrap();
        assert_eq!(owner.stage, "a.toml");
        assert_eq!(owner.artifact.path, "a.bin");
    }

    #[test]
    fn two_owners_is_ambiguous() {
        let idx = index(&[("a.toml", &[], &["x.bin"]), ("b.toml", &[], &["x.bin"])]);
        match idx.find_owner("x.bin").unwrap_err() {
            IndexError::AmbiguousOwner { path, stages } => {
                assert_eq!(path, "x.bin");
                assert_eq!(stages, ["a.toml", "b.toml"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(idx.validate(), Err(IndexError::AmbiguousOwner { .. })));
    }

    #[test]
    fn ownership_respects_working_dirs() {
        let mut idx = Index::new();
        // Working dir defaults to the stage file's directory.
        idx.insert("prep/prep.toml", stage(&[], &["clean.csv"]), false);
        let mut train = stage(&["../prep/clean.csv"], &["model.bin"]);
        train.working_dir = Some("train".into());
        idx.insert("train.toml", train, false);

        let owner = idx.find_owner("prep/clean.csv").unwrap().unwrap();
        assert_eq!(owner.stage, "prep/prep.toml");
        assert!(idx.find_owner("clean.csv").unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    #[test]
    fn add_reads_definition_and_lock() {
        let store = InMemoryStageStore::new();
        let def = stage(&[], &["out.bin"]);
        def.to_file(&store, "s.toml").unwrap();
        def.to_lock_file(&store, "s.toml").unwrap();

        let mut idx = Index::new();
        idx.add(&store, "s.toml").unwrap();

        assert!(idx.entry("s.toml").unwrap().locked);
        assert!(matches!(
            idx.add(&store, "s.toml"),
            Err(IndexError::AlreadyTracked(_))
        ));
    }

    #[test]
    fn add_rejects_conflicting_output() {
        let store = InMemoryStageStore::new();
        stage(&[], &["x.bin"]).to_file(&store, "a.toml").unwrap();
        stage(&[], &["x.bin"]).to_file(&store, "b.toml").unwrap();

        let mut idx = Index::new();
        idx.add(&store, "a.toml").unwrap();
        assert!(matches!(
            idx.add(&store, "b.toml"),
            Err(IndexError::AmbiguousOwner { .. })
        ));
        assert!(!idx.contains("b.toml"));
    }

    #[test]
    fn remove_unknown_stage_fails() {
        let mut idx = index(&[("a.toml", &[], &["a.bin"])]);
        assert!(idx.remove("a.toml").is_ok());
        assert!(matches!(idx.remove("a.toml"), Err(IndexError::UnknownStage(_))));
    }

    #[test]
    fn reload_picks_up_edits() {
        let store = InMemoryStageStore::new();
        stage(&[], &["a.bin"]).to_file(&store, "a.toml").unwrap();
        let mut idx = Index::new();
        idx.add(&store, "a.toml").unwrap();

        stage(&[], &["a.bin", "extra.bin"]).to_file(&store, "a.toml").unwrap();
        idx.reload(&store).unwrap();

        assert_eq!(idx.entry("a.toml").unwrap().stage.outputs.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[test]
    fn missing_index_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let idx = Index::from_file(&dir.path().join("index")).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn index_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let mut idx = index(&[("a.toml", &["raw.csv"], &["a.bin"])]);
        idx.entry_mut("a.toml").unwrap().locked = true;

        idx.to_file(&path).unwrap();
        assert_eq!(Index::from_file(&path).unwrap(), idx);
    }

    #[test]
    fn corrupt_index_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            Index::from_file(&path),
            Err(IndexError::Serialization { .. })
        ));
    }
}
