use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;

use duct_stage::{resolve_dir, Stage, StageStore};
use duct_store::{Cache, CheckoutStrategy};

/// Everything a graph operation needs besides the index itself.
///
/// Built once per command and passed down by reference.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    /// Absolute project root; stage working directories are relative to it.
    pub root: &'a Path,
    pub cache: &'a dyn Cache,
    pub stages: &'a dyn StageStore,
    pub strategy: CheckoutStrategy,
    /// Upper bound on stages processed at once.
    pub jobs: usize,
}

impl<'a> Context<'a> {
    pub fn new(root: &'a Path, cache: &'a dyn Cache, stages: &'a dyn StageStore) -> Self {
        Self {
            root,
            cache,
            stages,
            strategy: CheckoutStrategy::default(),
            jobs: default_jobs(),
        }
    }

    pub fn with_strategy(mut self, strategy: CheckoutStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Absolute working directory of the stage defined at `stage_path`.
    pub fn working_dir(&self, stage_path: &str, stage: &Stage) -> PathBuf {
        resolve_dir(self.root, &stage.working_dir_for(stage_path))
    }
}

/// Worker count used when none is configured.
pub fn default_jobs() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}
