//! Status: compare every stage's artifacts with their recorded checksums.

use std::collections::BTreeMap;

use duct_store::ArtifactStatus;

use crate::context::Context;
use crate::error::{IndexError, IndexResult};
use crate::index::Index;
use crate::scheduler::{self, Reports};

/// Status of one stage's artifacts. Nothing is modified to compute it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageStatus {
    /// Whether the stage was loaded from a valid lock file.
    pub locked: bool,
    pub dependencies: BTreeMap<String, ArtifactStatus>,
    pub outputs: BTreeMap<String, ArtifactStatus>,
}

impl StageStatus {
    /// Locked, with every artifact matching its recorded checksum.
    pub fn is_up_to_date(&self) -> bool {
        self.locked
            && self
                .dependencies
                .values()
                .chain(self.outputs.values())
                .all(ArtifactStatus::is_unchanged)
    }
}

impl Index {
    /// Report the status of the given stages (all when empty) and their
    /// upstream stages.
    pub fn status(&self, ctx: &Context<'_>, starts: &[String]) -> IndexResult<Reports<StageStatus>> {
        let plan = self.plan(starts)?;
        Ok(scheduler::execute(&plan, ctx.jobs, |path, _| {
            let entry = self.entry(path)?;
            let dir = ctx.working_dir(path, &entry.stage);
            let node = plan.node(path)?;

            let mut status = StageStatus {
                locked: entry.locked,
                dependencies: BTreeMap::new(),
                outputs: BTreeMap::new(),
            };
            for dep in &node.deps {
                let Some(art) = entry.stage.dependencies.get(&dep.key) else {
                    continue;
                };
                let mut art = art.clone();
                if dep.owner.is_none() {
                    art.skip_cache = true;
                }
                let st = ctx
                    .cache
                    .status(&dir, &art)
                    .map_err(|e| IndexError::artifact(path, &art.path, e))?;
                status.dependencies.insert(dep.key.clone(), st);
            }
            for (key, art) in &entry.stage.outputs {
                let st = ctx
                    .cache
                    .status(&dir, art)
                    .map_err(|e| IndexError::artifact(path, &art.path, e))?;
                status.outputs.insert(key.clone(), st);
            }
            Ok(status)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::index;
    use duct_stage::InMemoryStageStore;
    use duct_store::{FileStatus, InMemoryCache};
    use std::path::Path;

    #[test]
    fn status_tracks_commit_and_edits() {
        let mut idx = index(&[
            ("a.toml", &["raw.csv"], &["a.bin"]),
            ("b.toml", &["a.bin"], &["b.bin"]),
        ]);
        let cache = InMemoryCache::new();
        let stages = InMemoryStageStore::new();
        let ctx = Context::new(Path::new("/p"), &cache, &stages);
        cache.write_file("/p/raw.csv", "raw");
        cache.write_file("/p/a.bin", "a");
        cache.write_file("/p/b.bin", "b");

        let before = idx.status(&ctx, &[]).unwrap();
        let a = before["a.toml"].done().unwrap();
        assert!(!a.is_up_to_date());
        assert_eq!(a.outputs["a.bin"].status, FileStatus::Uncommitted);

        idx.commit(&ctx, &[]).unwrap();
        let after = idx.status(&ctx, &[]).unwrap();
        assert!(after.values().all(|r| r.done().unwrap().is_up_to_date()));

        cache.write_file("/p/a.bin", "changed");
        let edited = idx.status(&ctx, &["b.toml".to_string()]).unwrap();
        let b = edited["b.toml"].done().unwrap();
        assert_eq!(b.dependencies["a.bin"].status, FileStatus::Modified);
        assert!(!edited["a.toml"].done().unwrap().is_up_to_date());
    }

    #[test]
    fn status_is_read_only() {
        let idx = index(&[("a.toml", &[], &["a.bin"])]);
        let cache = InMemoryCache::new();
        let stages = InMemoryStageStore::new();
        let ctx = Context::new(Path::new("/p"), &cache, &stages);
        cache.write_file("/p/a.bin", "a");

        idx.status(&ctx, &[]).unwrap();

        assert_eq!(cache.object_count(), 0);
        assert!(!stages.contains("a.toml.lock"));
    }
}
