//! The stage index for duct.
//!
//! The [`Index`] maps stage definition paths to loaded stages. Edges
//! between stages are implied by artifact ownership: a stage depends on
//! whichever stage lists one of its dependencies as an output. Every graph
//! operation walks that implicit DAG depth-first into a [`Plan`], then the
//! scheduler executes the plan on a bounded worker pool.
//!
//! # Key Types
//!
//! - [`Index`] / [`Entry`]: the stage map and its persisted form
//! - [`Walk`] / [`Plan`]: memoized, cycle-checked traversal
//! - [`Context`]: cache, stage store, project root and worker count
//! - [`Report`]: per-stage outcome of commit, checkout, run and status
//! - [`Graph`]: Graphviz model of the pipeline
//!
//! # Design Rules
//!
//! 1. An artifact has at most one owning stage.
//! 2. Commit, checkout and run validate the whole index first; nothing is
//!    touched when ownership is ambiguous or a cycle exists.
//! 3. A stage starts only after every upstream stage succeeded. A failure
//!    blocks its dependents and nothing else.
//! 4. Stage tasks only read the index; results are applied once the plan
//!    has finished.

pub mod checkout;
pub mod commit;
pub mod context;
pub mod error;
pub mod graph;
pub mod index;
pub mod run;
pub mod scheduler;
pub mod status;
pub mod walk;

pub use context::{default_jobs, Context};
pub use error::{IndexError, IndexResult};
pub use graph::{cluster_name, Attrs, Graph, Node};
pub use index::{Entry, Index, Owner};
pub use run::RunStatus;
pub use scheduler::{execute, Report, Reports};
pub use status::StageStatus;
pub use walk::{Plan, PlanNode, ResolvedDep, Walk};
