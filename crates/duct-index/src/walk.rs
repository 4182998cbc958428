//! The shared depth-first traversal.
//!
//! Every graph operation starts by walking the implicit DAG from its start
//! stages. The walk memoizes finished stages, detects cycles with an
//! in-progress set, and records each stage's resolved dependencies plus a
//! topological order. The result is a [`Plan`] that the scheduler executes.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{IndexError, IndexResult};
use crate::index::Index;

/// Where one dependency of a stage comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDep {
    /// The dependency's key in the stage's dependency map.
    pub key: String,
    /// The upstream stage and its output key, or `None` for an external
    /// artifact.
    pub owner: Option<(String, String)>,
}

/// A stage in a plan: its resolved dependencies and upstream stages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlanNode {
    pub deps: Vec<ResolvedDep>,
    pub upstream: BTreeSet<String>,
}

/// Traversal state. `done` and `in_progress` persist across walks from
/// several start stages so shared upstream stages are visited once.
#[derive(Debug, Default)]
pub struct Walk {
    pub done: BTreeSet<String>,
    pub in_progress: BTreeSet<String>,
    order: Vec<String>,
    nodes: BTreeMap<String, PlanNode>,
}

impl Walk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_plan(self) -> Plan {
        Plan {
            order: self.order,
            nodes: self.nodes,
        }
    }
}

/// Stages reachable from a set of start stages, in dependency order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Every upstream stage appears before its dependents.
    pub order: Vec<String>,
    pub nodes: BTreeMap<String, PlanNode>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn node(&self, stage: &str) -> IndexResult<&PlanNode> {
        self.nodes
            .get(stage)
            .ok_or_else(|| IndexError::UnknownStage(stage.to_string()))
    }
}

impl Index {
    /// Visit `start` and, first, every stage it transitively depends on.
    ///
    /// On a cycle the walk fails with [`IndexError::CycleDetected`] and
    /// leaves `walk.in_progress` holding the stages on the path that closed
    /// the cycle.
    pub fn walk(&self, start: &str, walk: &mut Walk) -> IndexResult<()> {
        if walk.done.contains(start) {
            return Ok(());
        }
        if walk.in_progress.contains(start) {
            return Err(IndexError::CycleDetected {
                stage: start.to_string(),
            });
        }
        let entry = self.entry(start)?;
        walk.in_progress.insert(start.to_string());

        let mut node = PlanNode::default();
        for (key, dep) in &entry.stage.dependencies {
            let full = entry.stage.artifact_path_for(start, &dep.path);
            let owner = match self.find_owner(&full)? {
                None => None,
                Some(owner) => {
                    self.walk(owner.stage, walk)?;
                    node.upstream.insert(owner.stage.to_string());
                    Some((owner.stage.to_string(), owner.artifact.path.clone()))
                }
            };
            node.deps.push(ResolvedDep {
                key: key.clone(),
                owner,
            });
        }

        walk.in_progress.remove(start);
        walk.done.insert(start.to_string());
        walk.order.push(start.to_string());
        walk.nodes.insert(start.to_string(), node);
        Ok(())
    }

    /// Walk from every stage in `starts` (all stages when empty).
    pub fn plan(&self, starts: &[String]) -> IndexResult<Plan> {
        let all;
        let starts = if starts.is_empty() {
            all = self.paths();
            &all
        } else {
            starts
        };
        let mut walk = Walk::new();
        for start in starts {
            self.walk(start, &mut walk)?;
        }
        Ok(walk.into_plan())
    }
}
