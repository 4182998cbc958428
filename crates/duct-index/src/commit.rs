//! Commit: store every stage's outputs, upstream first, and lock them.

use std::collections::BTreeMap;

use tracing::{debug, info};

use duct_stage::Stage;

use crate::context::Context;
use crate::error::{IndexError, IndexResult};
use crate::index::Index;
use crate::scheduler::{self, Report, Reports};
use crate::walk::PlanNode;

impl Index {
    /// Commit the given stages (all stages when empty) and everything they
    /// depend on.
    ///
    /// The whole index is validated before anything is written. Each
    /// committed stage gets a lock file and is marked locked.
    pub fn commit(&mut self, ctx: &Context<'_>, starts: &[String]) -> IndexResult<Reports<()>> {
        self.validate()?;
        let plan = self.plan(starts)?;

        let reports = scheduler::execute(&plan, ctx.jobs, |path, upstream| {
            let mut stage = self.entry(path)?.stage.clone();
            commit_artifacts(ctx, path, plan.node(path)?, &mut stage, |owner| upstream.get(owner))?;
            stage.to_lock_file(ctx.stages, path)?;
            info!(stage = path, "committed");
            Ok(stage)
        });

        let mut out = BTreeMap::new();
        for (path, report) in reports {
            if let Report::Done(stage) = &report {
                let entry = self.entry_mut(&path)?;
                entry.stage = stage.clone();
                entry.locked = true;
            }
            out.insert(path, report.map(|_| ()));
        }
        Ok(out)
    }
}

/// Commit one stage's dependencies and outputs into the cache.
///
/// External dependencies are hashed in place without being stored. Owned
/// dependencies take the checksum their upstream stage just recorded,
/// looked up through `upstream`.
pub(crate) fn commit_artifacts<'u>(
    ctx: &Context<'_>,
    path: &str,
    node: &PlanNode,
    stage: &mut Stage,
    upstream: impl Fn(&str) -> Option<&'u Stage>,
) -> IndexResult<()> {
    let dir = ctx.working_dir(path, stage);
    for dep in &node.deps {
        let Some(art) = stage.dependencies.get_mut(&dep.key) else {
            continue;
        };
        match &dep.owner {
            None => {
                art.skip_cache = true;
                ctx.cache
                    .commit(&dir, art, ctx.strategy)
                    .map_err(|e| IndexError::artifact(path, &art.path, e))?;
            }
            Some((owner, output)) => {
                art.checksum = upstream(owner)
                    .and_then(|s| s.outputs.get(output))
                    .and_then(|a| a.checksum);
            }
        }
        debug!(stage = path, dep = %dep.key, "dependency recorded");
    }
    for art in stage.outputs.values_mut() {
        ctx.cache
            .commit(&dir, art, ctx.strategy)
            .map_err(|e| IndexError::artifact(path, &art.path, e))?;
    }
    Ok(())
}
