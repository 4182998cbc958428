//! Checkout: restore every stage's outputs from the cache, upstream first.

use tracing::info;

use crate::context::Context;
use crate::error::{IndexError, IndexResult};
use crate::index::Index;
use crate::scheduler::{self, Reports};

impl Index {
    /// Check out the outputs of the given stages (all when empty) and of
    /// every stage they depend on. External dependencies are left alone.
    pub fn checkout(&self, ctx: &Context<'_>, starts: &[String]) -> IndexResult<Reports<()>> {
        self.validate()?;
        let plan = self.plan(starts)?;

        Ok(scheduler::execute(&plan, ctx.jobs, |path, _| {
            let stage = &self.entry(path)?.stage;
            let dir = ctx.working_dir(path, stage);
            for art in stage.outputs.values() {
                ctx.cache
                    .checkout(&dir, art, ctx.strategy)
                    .map_err(|e| IndexError::artifact(path, &art.path, e))?;
            }
            info!(stage = path, outputs = stage.outputs.len(), "checked out");
            Ok(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::index;
    use crate::scheduler::Report;
    use duct_stage::InMemoryStageStore;
    use duct_store::{CacheError, InMemoryCache};
    use std::path::Path;

    #[test]
    fn commit_then_checkout_restores_outputs() {
        let mut idx = index(&[
            ("a.toml", &[], &["a.bin"]),
            ("b.toml", &["a.bin"], &["b.bin"]),
        ]);
        let cache = InMemoryCache::new();
        let stages = InMemoryStageStore::new();
        let ctx = Context::new(Path::new("/p"), &cache, &stages);
        cache.write_file("/p/a.bin", "a");
        cache.write_file("/p/b.bin", "b");
        idx.commit(&ctx, &[]).unwrap();
        cache.remove_file(Path::new("/p/a.bin"));
        cache.remove_file(Path::new("/p/b.bin"));

        let reports = idx.checkout(&ctx, &["b.toml".to_string()]).unwrap();

        assert!(reports.values().all(Report::is_done));
        assert_eq!(cache.read_file(Path::new("/p/a.bin")).unwrap(), b"a");
        assert_eq!(cache.read_file(Path::new("/p/b.bin")).unwrap(), b"b");
    }

    #[test]
    fn uncommitted_output_fails_with_empty_checksum() {
        let idx = index(&[("a.toml", &[], &["a.bin"])]);
        let cache = InMemoryCache::new();
        let stages = InMemoryStageStore::new();
        let ctx = Context::new(Path::new("/p"), &cache, &stages);

        let reports = idx.checkout(&ctx, &[]).unwrap();

        assert!(matches!(
            reports["a.toml"],
            Report::Failed(IndexError::Artifact {
                source: CacheError::EmptyChecksum(_),
                ..
            })
        ));
    }
}
