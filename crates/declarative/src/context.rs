//! Run context: progress hooks and cancellation
//!
//! These let the engine report progress and be stopped without depending on
//! any particular UI or signal handling.

use crate::types::{NodeOutcome, RunReport, TaskKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress hooks for a reconciliation run
///
/// Called from worker threads, so implementations must be thread-safe.
pub trait Observer: Send + Sync {
    /// Called once before any node starts
    fn on_run_start(&self, _total: usize) {}

    /// Called when a node begins discovery
    fn on_node_start(&self, _key: &TaskKey) {}

    /// Called when a node's outcome is decided, including skipped and
    /// cancelled nodes that never started
    fn on_node_complete(&self, _outcome: &NodeOutcome) {}

    /// Called once after the last node completes
    fn on_run_complete(&self, _report: &RunReport) {}
}

/// No-op observer
pub struct NoProgress;

impl Observer for NoProgress {}

/// Run-scoped cancellation signal.
///
/// Cloning shares the signal. Once cancelled, no new node starts and no new
/// backend call is issued; calls already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
