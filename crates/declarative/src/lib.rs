//! # Declarative
//!
//! A task reconciliation engine for cloud infrastructure.
//!
//! Each resource is declared once as desired state (a [`Task`]). For one run
//! the engine discovers actual state, computes the minimal [`Changes`], orders
//! tasks by their dependencies and hands each one to the render routine for
//! the run's [`Target`], either live API calls or generated terraform.
//!
//! ## Core Concepts
//!
//! - **Task**: a typed resource declaration with tri-state [`Field`]s
//! - **TaskSet / TaskGraph**: deduplicated declarations and their acyclic
//!   dependency order
//! - **Changes**: the sparse delta between actual and expected state
//! - **Renderers**: per-type capability registry, one routine per target
//! - **Scheduler**: [`execute`] runs eligible nodes concurrently and reports
//!   one [`NodeStatus`] per node
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ApiTarget, Target, TaskSet, execute_simple};
//! use std::sync::Arc;
//!
//! let mut tasks = TaskSet::new();
//! tasks.add(Network::new("net-1"))?;
//! tasks.add(Instance::new("vm-1").on_network("net-1"))?;
//! let graph = tasks.build()?;
//!
//! let target = Target::Api(ApiTarget::new(Arc::new(backend)));
//! let report = execute_simple(&graph, &target)?;
//! for outcome in &report.outcomes {
//!     println!("{}: {}", outcome.key, outcome.status);
//! }
//! ```
//!
//! ## Provider Traits
//!
//! The engine depends on nothing provider-specific:
//!
//! - [`Backend`]: find / create / update / await for one provider
//! - [`Observer`]: receives progress updates from worker threads
//! - [`Resolve`]: cross-resource lookups, live or symbolic per target

pub mod backend;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod field;
pub mod graph;
mod node;
pub mod target;
pub mod task;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use backend::{
    Backend, BackendResult, Client, MemoryBackend, Operation, OperationStatus, Record,
};
pub use context::{CancelToken, NoProgress, Observer};
pub use diff::{Changes, Delta};
pub use error::{BackendError, Error, ErrorCategory, Result};
pub use executor::{RunOptions, execute, execute_simple};
pub use field::{Computed, Field};
pub use graph::{TaskGraph, TaskSet};
pub use target::{
    ApiTarget, Reference, RenderApi, RenderTerraform, Renderers, Resolve, TERRAFORM_FILE, Target,
    TargetKind, TerraformTarget, terraform_name,
};
pub use task::Task;
pub use types::{Lifecycle, NodeOutcome, NodeStatus, RunReport, RunSummary, TaskKey};
