//! Scheduler - runs a task graph on a worker pool in dependency order
//!
//! A node becomes eligible the moment its last dependency succeeds, not when
//! a whole depth level finishes. Completion bookkeeping is the only shared
//! mutable state and sits behind one mutex, touched once per finished node.

use crate::context::{CancelToken, NoProgress, Observer};
use crate::error::{ErrorCategory, Result};
use crate::graph::TaskGraph;
use crate::target::Target;
use crate::types::{NodeOutcome, NodeStatus, RunReport};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Options for one reconciliation run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker threads
    pub jobs: usize,
    /// Discover and diff only; never render
    pub dry_run: bool,
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            dry_run: false,
            cancel: CancelToken::new(),
        }
    }
}

struct Bookkeeping {
    /// Dependencies not yet finished, per node
    waiting: Vec<usize>,
    outcomes: Vec<Option<NodeOutcome>>,
}

struct Run<'a> {
    graph: &'a TaskGraph,
    target: &'a Target,
    options: &'a RunOptions,
    observer: &'a dyn Observer,
    state: Mutex<Bookkeeping>,
}

impl<'a> Run<'a> {
    fn lock(&self) -> MutexGuard<'_, Bookkeeping> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_node<'s>(&'s self, scope: &rayon::Scope<'s>, index: usize) {
        let node = self.graph.node(index);
        let key = node.key();
        let started = Instant::now();

        let status = if self.options.cancel.is_cancelled() {
            log::debug!("{key}: run cancelled before start");
            NodeStatus::Cancelled
        } else {
            self.observer.on_node_start(&key);
            match node.reconcile(self.target, &self.options.cancel, self.options.dry_run) {
                Ok(status) => status,
                Err(err) if err.category() == ErrorCategory::Cancelled => {
                    log::debug!("{key}: cancelled mid-node");
                    NodeStatus::Cancelled
                }
                Err(err) => {
                    log::debug!("{key} failed: {err}");
                    NodeStatus::Failed {
                        reason: err.to_string(),
                        category: err.category(),
                    }
                }
            }
        };

        let outcome = NodeOutcome {
            key,
            status,
            elapsed: started.elapsed(),
        };
        self.complete(scope, index, outcome);
    }

    /// Record an outcome, then start newly eligible dependents or mark the
    /// blocked ones.
    fn complete<'s>(&'s self, scope: &rayon::Scope<'s>, index: usize, outcome: NodeOutcome) {
        let mut decided = vec![outcome.clone()];
        let mut eligible = Vec::new();

        {
            let mut state = self.lock();
            if outcome.status.is_success() {
                for &dependent in self.graph.dependent_indices(index) {
                    state.waiting[dependent] -= 1;
                    if state.waiting[dependent] == 0 && state.outcomes[dependent].is_none() {
                        eligible.push(dependent);
                    }
                }
            } else {
                let blocked = match &outcome.status {
                    NodeStatus::Cancelled => NodeStatus::Cancelled,
                    _ => NodeStatus::Skipped {
                        blocked_by: outcome.key.clone(),
                    },
                };
                let mut stack = self.graph.dependent_indices(index).to_vec();
                while let Some(dependent) = stack.pop() {
                    if state.outcomes[dependent].is_some() {
                        continue;
                    }
                    let skipped = NodeOutcome {
                        key: self.graph.node(dependent).key(),
                        status: blocked.clone(),
                        elapsed: Duration::ZERO,
                    };
                    state.outcomes[dependent] = Some(skipped.clone());
                    decided.push(skipped);
                    stack.extend_from_slice(self.graph.dependent_indices(dependent));
                }
            }
            state.outcomes[index] = Some(outcome);
        }

        for outcome in &decided {
            self.observer.on_node_complete(outcome);
        }
        for dependent in eligible {
            scope.spawn(move |scope| self.run_node(scope, dependent));
        }
    }
}

/// Reconcile every task in `graph` against `target`.
///
/// Fails up front, with no backend call, if some task cannot render for the
/// target. Otherwise per-node failures are reported in the returned
/// [`RunReport`] rather than aborting the run: a failed node's dependents are
/// skipped and independent branches still run.
pub fn execute(
    graph: &TaskGraph,
    target: &Target,
    options: &RunOptions,
    observer: &dyn Observer,
) -> Result<RunReport> {
    graph.check_target(target.kind())?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .build()?;

    let run = Run {
        graph,
        target,
        options,
        observer,
        state: Mutex::new(Bookkeeping {
            waiting: (0..graph.len())
                .map(|i| graph.dependency_indices(i).len())
                .collect(),
            outcomes: vec![None; graph.len()],
        }),
    };

    observer.on_run_start(graph.len());
    log::debug!(
        "running {} tasks against the {} target with {} jobs",
        graph.len(),
        target.kind(),
        options.jobs.max(1)
    );

    pool.scope(|scope| {
        for &index in graph.order_indices() {
            if graph.dependency_indices(index).is_empty() {
                let run = &run;
                scope.spawn(move |scope| run.run_node(scope, index));
            }
        }
    });

    let mut outcomes = run
        .state
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .outcomes;
    let report = RunReport {
        dry_run: options.dry_run,
        outcomes: graph
            .order_indices()
            .iter()
            .map(|&i| {
                outcomes[i].take().unwrap_or_else(|| NodeOutcome {
                    key: graph.node(i).key(),
                    status: NodeStatus::Cancelled,
                    elapsed: Duration::ZERO,
                })
            })
            .collect(),
    };

    if !options.dry_run {
        if report.is_success() {
            if let Some(path) = target.finish()? {
                log::debug!("artifact written to {}", path.display());
            }
        } else if let Target::Terraform(tf) = target {
            log::warn!(
                "not writing {}: the run did not complete",
                tf.output_path().display()
            );
        }
    }

    observer.on_run_complete(&report);
    Ok(report)
}

/// Run with default options and no progress reporting
pub fn execute_simple(graph: &TaskGraph, target: &Target) -> Result<RunReport> {
    execute(graph, target, &RunOptions::default(), &NoProgress)
}
