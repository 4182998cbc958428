//! Parallel execution of a [`Plan`].
//!
//! A bounded set of scoped worker threads pulls ready stages from a shared
//! queue. A stage becomes ready once every upstream stage has finished
//! successfully. When a stage fails, everything downstream of it is marked
//! [`Report::Blocked`] and never starts; unrelated stages keep running.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::thread;

use tracing::{debug, warn};

use crate::error::IndexError;
use crate::walk::Plan;

/// Outcome of one stage in a graph operation.
#[derive(Debug)]
pub enum Report<T> {
    /// The stage's action succeeded.
    Done(T),
    /// The stage's action failed.
    Failed(IndexError),
    /// The stage was skipped because the named upstream stage failed.
    Blocked(String),
}

impl<T> Report<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn done(&self) -> Option<&T> {
        match self {
            Self::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Report<U> {
        match self {
            Self::Done(value) => Report::Done(f(value)),
            Self::Failed(err) => Report::Failed(err),
            Self::Blocked(upstream) => Report::Blocked(upstream),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Report<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done(value) => write!(f, "{value}"),
            Self::Failed(err) => write!(f, "failed: {err}"),
            Self::Blocked(upstream) => write!(f, "blocked by {upstream}"),
        }
    }
}

/// Per-stage outcomes, keyed by stage path.
pub type Reports<T> = BTreeMap<String, Report<T>>;

struct State<T> {
    ready: VecDeque<String>,
    waiting_on: HashMap<String, usize>,
    running: usize,
    results: Reports<T>,
}

/// Run `task` for every stage in `plan` on up to `jobs` threads.
///
/// `task` receives the stage path and the results of its direct upstream
/// stages.
pub fn execute<T, F>(plan: &Plan, jobs: usize, task: F) -> Reports<T>
where
    T: Clone + Send,
    F: Fn(&str, &BTreeMap<String, T>) -> Result<T, IndexError> + Sync,
{
    let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut waiting_on = HashMap::new();
    let mut ready = VecDeque::new();
    for stage in &plan.order {
        let upstream = plan.nodes.get(stage).map(|n| &n.upstream);
        let count = upstream.map_or(0, |u| u.len());
        for up in upstream.into_iter().flatten() {
            downstream.entry(up.as_str()).or_default().push(stage.as_str());
        }
        if count == 0 {
            ready.push_back(stage.clone());
        }
        waiting_on.insert(stage.clone(), count);
    }

    let state = Mutex::new(State {
        ready,
        waiting_on,
        running: 0,
        results: BTreeMap::new(),
    });
    let wake = Condvar::new();

    let worker = || loop {
        let (stage, inputs) = {
            let mut st = state.lock().expect("lock poisoned");
            loop {
                if let Some(stage) = st.ready.pop_front() {
                    st.running += 1;
                    let inputs = upstream_results(plan, &stage, &st.results);
                    break (stage, inputs);
                }
                if st.running == 0 {
                    return;
                }
                st = wake.wait(st).expect("lock poisoned");
            }
        };

        debug!(stage = %stage, "starting");
        // A panic is a failure: `running` must still be decremented.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&stage, &inputs)))
            .unwrap_or_else(|payload| {
                Err(IndexError::TaskPanicked {
                    stage: stage.clone(),
                    message: panic_message(payload.as_ref()),
                })
            });

        let mut guard = state.lock().expect("lock poisoned");
        let st = &mut *guard;
        st.running -= 1;
        let children = downstream.get(stage.as_str()).cloned().unwrap_or_default();
        match outcome {
            Ok(value) => {
                for child in children {
                    if st.results.contains_key(child) {
                        continue;
                    }
                    if let Some(count) = st.waiting_on.get_mut(child) {
                        *count -= 1;
                        if *count == 0 {
                            st.ready.push_back(child.to_string());
                        }
                    }
                }
                st.results.insert(stage, Report::Done(value));
            }
            Err(err) => {
                warn!(stage = %stage, error = %err, "stage failed");
                block_downstream(&downstream, &stage, &mut st.results);
                st.results.insert(stage, Report::Failed(err));
            }
        }
        wake.notify_all();
    };

    let workers = jobs.max(1).min(plan.len().max(1));
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(&worker);
        }
    });

    state.into_inner().expect("lock poisoned").results
}

fn upstream_results<T: Clone>(plan: &Plan, stage: &str, results: &Reports<T>) -> BTreeMap<String, T> {
    plan.nodes
        .get(stage)
        .into_iter()
        .flat_map(|node| node.upstream.iter())
        .filter_map(|up| results.get(up).and_then(Report::done).map(|v| (up.clone(), v.clone())))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn block_downstream<T>(downstream: &HashMap<&str, Vec<&str>>, failed: &str, results: &mut Reports<T>) {
    let mut pending: Vec<&str> = downstream.get(failed).cloned().unwrap_or_default();
    while let Some(stage) = pending.pop() {
        if results.contains_key(stage) {
            continue;
        }
        results.insert(stage.to_string(), Report::Blocked(failed.to_string()));
        if let Some(children) = downstream.get(stage) {
            pending.extend(children.iter().copied());
        }
    }
}
