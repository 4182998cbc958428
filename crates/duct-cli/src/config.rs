use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use duct_index::default_jobs;
use duct_store::CheckoutStrategy;

/// Project settings stored in `.duct/config.toml`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache directory, relative to the project root unless absolute.
    pub cache: PathBuf,
    /// rclone remote the cache is pushed to and fetched from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    pub strategy: CheckoutStrategy,
    /// Worker pool size; the machine's parallelism when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: PathBuf::from(".duct/cache"),
            remote: None,
            strategy: CheckoutStrategy::Link,
            jobs: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}; run `duct init` first", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let text = toml::to_string_pretty(self).context("failed to encode config")?;
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Apply per-invocation overrides from the command line.
    pub fn with_overrides(mut self, copy: bool, jobs: Option<usize>) -> Self {
        if copy {
            self.strategy = CheckoutStrategy::Copy;
        }
        if jobs.is_some() {
            self.jobs = jobs;
        }
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(default_jobs).max(1)
    }

    /// Absolute cache directory for a project rooted at `root`.
    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.cache)
    }
}
