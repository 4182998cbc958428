//! Project layout: the `.duct/` data directory and root discovery.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::debug;

use duct_index::Index;
use duct_stage::normalize;

use crate::config::Config;

pub const DATA_DIR: &str = ".duct";
const CONFIG_FILE: &str = "config.toml";
const INDEX_FILE: &str = "index";
const RCLONE_CONFIG: &str = "rclone.conf";

/// A project root and its loaded configuration.
#[derive(Clone, Debug)]
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
}

impl Project {
    /// Create the data directory under `root`.
    pub fn init(root: &Path) -> anyhow::Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", root.display()))?;
        let data = root.join(DATA_DIR);
        if data.exists() {
            bail!("{} already exists", data.display());
        }
        let config = Config::default();
        fs::create_dir_all(config.cache_dir(&root))
            .with_context(|| format!("failed to create {}", data.display()))?;
        config.to_file(&data.join(CONFIG_FILE))?;
        fs::write(data.join(".gitignore"), "/cache/\n").context("failed to write .gitignore")?;
        fs::write(data.join(RCLONE_CONFIG), "").context("failed to write rclone.conf")?;

        let project = Self { root, config };
        project.save_index(&Index::new())?;
        Ok(project)
    }

    /// Find the nearest ancestor of `start` holding a data directory.
    pub fn discover(start: &Path) -> anyhow::Result<Self> {
        let start = start
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", start.display()))?;
        let Some(root) = start.ancestors().find(|dir| dir.join(DATA_DIR).is_dir()) else {
            bail!("not a duct project (or any parent): {}", start.display());
        };
        debug!(root = %root.display(), "found project");
        let config = Config::from_file(&root.join(DATA_DIR).join(CONFIG_FILE))?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.config.cache_dir(&self.root)
    }

    pub fn rclone_config(&self) -> PathBuf {
        self.data_dir().join(RCLONE_CONFIG)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir().join(INDEX_FILE)
    }

    pub fn load_index(&self) -> anyhow::Result<Index> {
        Ok(Index::from_file(&self.index_path())?)
    }

    pub fn save_index(&self, index: &Index) -> anyhow::Result<()> {
        Ok(index.to_file(&self.index_path())?)
    }

    /// Turn a path given relative to `cwd` into a normalized,
    /// root-relative stage path.
    pub fn stage_path(&self, cwd: &Path, path: &str) -> anyhow::Result<String> {
        // The root is canonical, so the cwd must be too.
        let cwd = cwd
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", cwd.display()))?;
        let full = PathBuf::from(normalize(&cwd.join(path)));
        match full.strip_prefix(&self.root) {
            Ok(rel) => Ok(normalize(rel)),
            Err(_) => bail!("{path} is outside the project at {}", self.root.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::init(dir.path()).unwrap();

        let data = project.data_dir();
        assert!(data.join("cache").is_dir());
        assert!(data.join("config.toml").is_file());
        assert!(data.join("rclone.conf").is_file());
        assert_eq!(fs::read_to_string(data.join(".gitignore")).unwrap(), "/cache/\n");
        assert!(project.load_index().unwrap().is_empty());
    }

    #[test]
    fn init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        Project::init(dir.path()).unwrap();
        assert!(Project::init(dir.path()).is_err());
    }

    #[test]
    fn discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::init(dir.path()).unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let found = Project::discover(&nested).unwrap();
        assert_eq!(found.root, project.root);
        assert_eq!(found.config, Config::default());
    }

    #[test]
    fn discover_without_project_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Project::discover(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a duct project"));
    }

    #[test]
    fn stage_paths_are_root_relative() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::init(dir.path()).unwrap();
        let sub = project.root.join("ml");
        fs::create_dir_all(&sub).unwrap();

        assert_eq!(project.stage_path(&sub, "train.toml").unwrap(), "ml/train.toml");
        assert_eq!(project.stage_path(&sub, "../prep.toml").unwrap(), "prep.toml");
        assert!(project.stage_path(&project.root, "../elsewhere.toml").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn stage_paths_resolve_through_a_symlinked_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(real.join("ml")).unwrap();
        Project::init(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let project = Project::discover(&link).unwrap();

        assert_eq!(project.stage_path(&link, "train.toml").unwrap(), "train.toml");
        assert_eq!(project.stage_path(&link.join("ml"), "a.toml").unwrap(), "ml/a.toml");
    }
}
