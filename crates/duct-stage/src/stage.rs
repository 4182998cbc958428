//! The stage model and its on-disk form.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use duct_types::Artifact;

use crate::error::{StageError, StageResult};
use crate::store::StageStore;

/// Suffix appended to a definition path to name its lock file.
pub const LOCK_SUFFIX: &str = ".lock";

/// One reproducible step of a pipeline.
///
/// Artifact paths, and the directory the command runs in, are relative to
/// the stage's working directory. Artifacts are keyed by their path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Shell text to run. A stage without a command only owns its outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Working directory relative to the project root. When absent, the
    /// directory holding the stage file is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Artifact>,
}

/// The on-disk form of a [`Stage`]: artifacts as lists instead of maps.
///
/// Absent fields stay absent when written back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Artifact>,
}

impl From<&Stage> for StageFile {
    fn from(stage: &Stage) -> Self {
        Self {
            command: stage.command.clone(),
            working_dir: stage.working_dir.clone(),
            dependencies: stage.dependencies.values().cloned().collect(),
            outputs: stage.outputs.values().cloned().collect(),
        }
    }
}

impl From<StageFile> for Stage {
    fn from(file: StageFile) -> Self {
        let keyed = |arts: Vec<Artifact>| {
            arts.into_iter()
                .map(|art| (art.path.clone(), art))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            command: file.command,
            working_dir: file.working_dir,
            dependencies: keyed(file.dependencies),
            outputs: keyed(file.outputs),
        }
    }
}

impl Stage {
    /// Load the stage defined at `path`.
    ///
    /// If a lock file exists and its stage is equivalent to the definition,
    /// the locked (checksummed) version is returned with `true`. Otherwise
    /// the definition is returned with `false`. A missing lock file is not
    /// an error.
    pub fn from_file(store: &dyn StageStore, path: &str) -> StageResult<(Stage, bool)> {
        let stage = Stage::from(store.load(path)?);
        let lock_path = lock_path_for(path);
        let locked = match store.load(&lock_path) {
            Ok(file) => Stage::from(file),
            Err(err) if err.is_not_found() => return Ok((stage, false)),
            Err(err) => return Err(err),
        };
        if locked.is_equivalent(&stage) {
            Ok((locked, true))
        } else {
            debug!(stage = path, "lock file is stale");
            Ok((stage, false))
        }
    }

    /// Write the stage definition to `path`.
    pub fn to_file(&self, store: &dyn StageStore, path: &str) -> StageResult<()> {
        store.save(path, &StageFile::from(self))
    }

    /// Write the stage (with its checksums) as the lock file for `path`.
    pub fn to_lock_file(&self, store: &dyn StageStore, path: &str) -> StageResult<()> {
        store.save(&lock_path_for(path), &StageFile::from(self))
    }

    /// Build an output-only stage from paths under `root`.
    pub fn from_paths<S: AsRef<str>>(root: &Path, is_recursive: bool, paths: &[S]) -> StageResult<Stage> {
        let mut stage = Stage::default();
        for path in paths {
            let path = path.as_ref();
            let art = Artifact::from_path(root, path, is_recursive).map_err(|source| StageError::Io {
                op: "stat",
                path: root.join(path),
                source,
            })?;
            stage.outputs.insert(path.to_string(), art);
        }
        Ok(stage)
    }

    /// Structural equality: command, working directory and every artifact
    /// compared without checksums.
    pub fn is_equivalent(&self, other: &Stage) -> bool {
        fn same(a: &BTreeMap<String, Artifact>, b: &BTreeMap<String, Artifact>) -> bool {
            a.len() == b.len()
                && a.iter()
                    .all(|(path, art)| b.get(path).is_some_and(|o| art.is_equivalent(o)))
        }
        self.command == other.command
            && self.working_dir == other.working_dir
            && same(&self.outputs, &other.outputs)
            && same(&self.dependencies, &other.dependencies)
    }

    /// The working directory relative to the project root, for a stage
    /// defined at `stage_path`. `"."` is the root itself.
    pub fn working_dir_for(&self, stage_path: &str) -> String {
        match &self.working_dir {
            Some(dir) => normalize(Path::new(dir)),
            None => normalize(Path::new(stage_path).parent().unwrap_or(Path::new(""))),
        }
    }

    /// The project-root-relative path of one of this stage's artifacts.
    pub fn artifact_path_for(&self, stage_path: &str, artifact: &str) -> String {
        normalize(&Path::new(&self.working_dir_for(stage_path)).join(artifact))
    }

    /// A shell invocation of the stage's command in `dir`, with standard
    /// output and error inherited from this process. `None` when the stage
    /// has no command.
    ///
    /// The shell is `$SHELL`, or `sh` when unset.
    pub fn create_command(&self, dir: &Path) -> Option<Command> {
        let text = self.command.as_deref()?;
        let shell = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "sh".to_string());
        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(text)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        Some(cmd)
    }
}

/// The lock file path paired with a stage definition path.
pub fn lock_path_for(stage_path: &str) -> String {
    format!("{stage_path}{LOCK_SUFFIX}")
}

/// Lexically clean a relative path: drop `.` components, fold `..` into
/// their parent, use `/` separators. The empty path becomes `"."`.
pub fn normalize(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push("..".to_string()),
            },
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => {
                parts.clear();
                absolute = true;
            }
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Resolve a project-relative directory against the project root.
pub fn resolve_dir(root: &Path, dir: &str) -> PathBuf {
    if dir == "." {
        root.to_path_buf()
    } else {
        root.join(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStageStore;
    use duct_types::Checksum;
    use proptest::prelude::*;

    fn sample() -> Stage {
        let mut stage = Stage {
            command: Some("python train.py".into()),
            working_dir: Some("ml".into()),
            ..Default::default()
        };
        stage.dependencies.insert("data.csv".into(), Artifact::new("data.csv"));
        stage.outputs.insert("model".into(), Artifact::directory("model", true));
        stage
    }

    fn checksummed(mut stage: Stage) -> Stage {
        for (i, art) in stage
            .dependencies
            .values_mut()
            .chain(stage.outputs.values_mut())
            .enumerate()
        {
            art.checksum = Some(Checksum::from_hash([i as u8 + 1; 32]));
        }
        stage
    }

    // -----------------------------------------------------------------------
    // Equivalence
    // -----------------------------------------------------------------------

    #[test]
    fn equivalence_ignores_checksums() {
        let stage = sample();
        assert!(stage.is_equivalent(&checksummed(stage.clone())));
    }

    #[test]
    fn equivalence_detects_structural_changes() {
        let base = sample();

        let mut other = base.clone();
        other.command = Some("python train.py --fast".into());
        assert!(!base.is_equivalent(&other));

        let mut other = base.clone();
        other.working_dir = None;
        assert!(!base.is_equivalent(&other));

        let mut other = base.clone();
        other.outputs.insert("extra".into(), Artifact::new("extra"));
        assert!(!base.is_equivalent(&other));

        let mut other = base.clone();
        other.dependencies.clear();
        other.dependencies.insert("other.csv".into(), Artifact::new("other.csv"));
        assert!(!base.is_equivalent(&other));
    }

    // -----------------------------------------------------------------------
    // Loading and lock files
    // -----------------------------------------------------------------------

    #[test]
    fn missing_lock_means_not_locked() {
        let store = InMemoryStageStore::new();
        sample().to_file(&store, "train.toml").unwrap();

        let (stage, locked) = Stage::from_file(&store, "train.toml").unwrap();
        assert!(!locked);
        assert_eq!(stage, sample());
    }

    #[test]
    fn equivalent_lock_is_authoritative() {
        let store = InMemoryStageStore::new();
        sample().to_file(&store, "train.toml").unwrap();
        let locked_stage = checksummed(sample());
        locked_stage.to_lock_file(&store, "train.toml").unwrap();

        let (stage, locked) = Stage::from_file(&store, "train.toml").unwrap();
        assert!(locked);
        assert_eq!(stage, locked_stage);
    }

    #[test]
    fn stale_lock_is_ignored() {
        let store = InMemoryStageStore::new();
        let mut stale = checksummed(sample());
        stale.command = Some("python old.py".into());
        stale.to_lock_file(&store, "train.toml").unwrap();
        sample().to_file(&store, "train.toml").unwrap();

        let (stage, locked) = Stage::from_file(&store, "train.toml").unwrap();
        assert!(!locked);
        assert_eq!(stage, sample());
    }

    #[test]
    fn missing_definition_is_not_found() {
        let store = InMemoryStageStore::new();
        let err = Stage::from_file(&store, "nope.toml").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(lock_path_for("stages/a.toml"), "stages/a.toml.lock");
    }

    #[test]
    fn from_paths_builds_output_only_stage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("labels.csv"), b"x").unwrap();

        let stage = Stage::from_paths(dir.path(), true, &["images", "labels.csv"]).unwrap();

        assert!(stage.command.is_none());
        assert!(stage.dependencies.is_empty());
        assert!(stage.outputs["images"].is_dir);
        assert!(!stage.outputs["labels.csv"].is_dir);
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    #[test]
    fn working_dir_defaults_to_stage_file_directory() {
        let stage = Stage::default();
        assert_eq!(stage.working_dir_for("pipelines/prep.toml"), "pipelines");
        assert_eq!(stage.working_dir_for("prep.toml"), ".");
    }

    #[test]
    fn artifact_paths_resolve_against_working_dir() {
        let stage = sample();
        assert_eq!(stage.artifact_path_for("x.toml", "data.csv"), "ml/data.csv");
        assert_eq!(stage.artifact_path_for("x.toml", "../raw/in.csv"), "raw/in.csv");
        assert_eq!(Stage::default().artifact_path_for("x.toml", "./a"), "a");
    }

    #[test]
    fn normalize_handles_edge_cases() {
        assert_eq!(normalize(Path::new("")), ".");
        assert_eq!(normalize(Path::new("a/./b/../c")), "a/c");
        assert_eq!(normalize(Path::new("../x")), "../x");
        assert_eq!(normalize(Path::new("/a/../../b")), "/b");
    }

    #[test]
    fn create_command_runs_in_dir() {
        let cmd = sample().create_command(Path::new("/tmp/work")).unwrap();
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp/work")));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-c", "python train.py"]);
        assert!(Stage::default().create_command(Path::new(".")).is_none());
    }

    // -----------------------------------------------------------------------
    // On-disk form
    // -----------------------------------------------------------------------

    #[test]
    fn absent_fields_stay_absent() {
        let mut stage = Stage::default();
        stage.outputs.insert("out.bin".into(), Artifact::new("out.bin"));
        let text = toml::to_string(&StageFile::from(&stage)).unwrap();
        assert!(!text.contains("command"));
        assert!(!text.contains("working_dir"));
        assert!(!text.contains("dependencies"));
        assert!(!text.contains("is_dir"));
    }

    fn unique_artifacts() -> impl Strategy<Value = Vec<Artifact>> {
        prop::collection::btree_map("[a-z]{1,8}", (any::<bool>(), any::<bool>()), 0..8).prop_map(|m| {
            m.into_iter()
                .map(|(path, (is_dir, recursive))| {
                    if is_dir {
                        Artifact::directory(path, recursive)
                    } else {
                        Artifact::new(path)
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn artifact_list_order_is_irrelevant(
            (deps, shuffled_deps) in unique_artifacts().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
            (outs, shuffled_outs) in unique_artifacts().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
        ) {
            let a = Stage::from(StageFile { dependencies: deps, outputs: outs, ..Default::default() });
            let b = Stage::from(StageFile { dependencies: shuffled_deps, outputs: shuffled_outs, ..Default::default() });
            prop_assert_eq!(a, b);
        }
    }
}
