//! Run: execute stale stages, upstream first, then commit and lock them.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use duct_stage::{Runner, Stage};

use crate::commit::commit_artifacts;
use crate::context::Context;
use crate::error::{IndexError, IndexResult};
use crate::index::{Entry, Index};
use crate::scheduler::{self, Report, Reports};
use crate::walk::PlanNode;

/// Whether a stage's command was executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Ran,
    NotRun,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ran => "run",
            Self::NotRun => "not run",
        })
    }
}

#[derive(Clone)]
struct Outcome {
    ran: bool,
    stage: Stage,
}

impl Index {
    /// Run the given stages (all when empty) and everything upstream of
    /// them.
    ///
    /// A stage runs when it has a command and it is not locked, an upstream
    /// stage ran, or any of its artifacts differs from what was recorded.
    /// After a successful run its outputs and external dependencies are
    /// committed and its lock file is written.
    pub fn run(
        &mut self,
        ctx: &Context<'_>,
        runner: &dyn Runner,
        starts: &[String],
    ) -> IndexResult<Reports<RunStatus>> {
        self.validate()?;
        let plan = self.plan(starts)?;

        let reports = scheduler::execute(&plan, ctx.jobs, |path, upstream| {
            let entry = self.entry(path)?;
            let node = plan.node(path)?;
            let mut stage = entry.stage.clone();

            if entry.stage.command.is_none() || !self.needs_run(ctx, path, entry, node, upstream)? {
                debug!(stage = path, "up to date");
                return Ok(Outcome { ran: false, stage });
            }

            let dir = ctx.working_dir(path, &stage);
            // A command writing through a link would rewrite the cached object.
            for art in stage.outputs.values() {
                ctx.cache
                    .detach(&dir, art)
                    .map_err(|e| IndexError::artifact(path, &art.path, e))?;
            }
            runner.run(path, &stage, &dir)?;
            commit_artifacts(ctx, path, node, &mut stage, |owner| {
                upstream.get(owner).map(|o| &o.stage)
            })?;
            stage.to_lock_file(ctx.stages, path)?;
            info!(stage = path, "ran");
            Ok(Outcome { ran: true, stage })
        });

        let mut out = BTreeMap::new();
        for (path, report) in reports {
            if let Report::Done(Outcome { ran: true, stage }) = &report {
                let entry = self.entry_mut(&path)?;
                entry.stage = stage.clone();
                entry.locked = true;
            }
            out.insert(
                path,
                report.map(|o| if o.ran { RunStatus::Ran } else { RunStatus::NotRun }),
            );
        }
        Ok(out)
    }

    fn needs_run(
        &self,
        ctx: &Context<'_>,
        path: &str,
        entry: &Entry,
        node: &PlanNode,
        upstream: &BTreeMap<String, Outcome>,
    ) -> IndexResult<bool> {
        if !entry.locked {
            debug!(stage = path, "not locked");
            return Ok(true);
        }
        if upstream.values().any(|o| o.ran) {
            debug!(stage = path, "upstream stage ran");
            return Ok(true);
        }

        let stage = &entry.stage;
        let dir = ctx.working_dir(path, stage);
        for dep in &node.deps {
            let Some(art) = stage.dependencies.get(&dep.key) else {
                continue;
            };
            let changed = match &dep.owner {
                // The upstream stage's recorded output is the source of truth.
                Some((owner, output)) => {
                    let current = upstream
                        .get(owner)
                        .and_then(|o| o.stage.outputs.get(output))
                        .and_then(|a| a.checksum);
                    current != art.checksum
                }
                None => {
                    let mut probe = art.clone();
                    probe.skip_cache = true;
                    let st = ctx
                        .cache
                        .status(&dir, &probe)
                        .map_err(|e| IndexError::artifact(path, &art.path, e))?;
                    !st.is_unchanged()
                }
            };
            if changed {
                debug!(stage = path, dep = %dep.key, "dependency changed");
                return Ok(true);
            }
        }
        for art in stage.outputs.values() {
            let st = ctx
                .cache
                .status(&dir, art)
                .map_err(|e| IndexError::artifact(path, &art.path, e))?;
            if !st.is_unchanged() {
                debug!(stage = path, output = %art.path, status = %st.status, "output changed");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
