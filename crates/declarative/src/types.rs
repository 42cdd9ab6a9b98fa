//! Core types for task reconciliation

use crate::error::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity of a task: its kind plus a name unique within that kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    /// Task kind, e.g. "Instance"
    pub kind: &'static str,
    /// Stable name, unique per kind
    pub name: String,
}

impl TaskKey {
    /// Create a key from a kind and a name
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Per-task policy controlling what the engine may do to a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Create the resource if missing, update it if it differs
    #[default]
    Sync,
    /// Leave the resource alone; neither discovered nor rendered
    Ignore,
    /// The resource must exist and match; drift fails the task
    ExistsAndValidates,
    /// The resource must exist; drift is logged but not corrected
    ExistsAndWarnIfChanges,
}

impl Lifecycle {
    /// Whether this policy allows the engine to create or mutate the resource
    pub fn allows_mutation(&self) -> bool {
        matches!(self, Self::Sync)
    }

    /// Whether the resource is expected to already exist
    pub fn requires_existing(&self) -> bool {
        matches!(self, Self::ExistsAndValidates | Self::ExistsAndWarnIfChanges)
    }
}

/// Outcome of a single node in a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    /// Applied, nothing needed to change
    Unchanged,
    /// Applied, the listed fields were updated
    Updated { fields: Vec<String> },
    /// The resource did not exist and was created
    Created,
    /// The node failed
    Failed {
        reason: String,
        category: ErrorCategory,
    },
    /// Not run because a dependency did not succeed
    Skipped { blocked_by: TaskKey },
    /// Not run because its lifecycle defers it
    Deferred { reason: String },
    /// Not started because the run was cancelled
    Cancelled,
}

impl NodeStatus {
    /// Whether dependents may proceed after this outcome
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Unchanged | Self::Updated { .. } | Self::Created | Self::Deferred { .. }
        )
    }

    /// Whether the node changed (or, in a dry run, would change) a resource
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Updated { .. } | Self::Created)
    }

    /// Short label used in reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Updated { .. } => "updated",
            Self::Created => "created",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Deferred { .. } => "deferred",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated { fields } => write!(f, "updated ({})", fields.join(", ")),
            Self::Failed { reason, .. } => write!(f, "failed: {reason}"),
            Self::Skipped { blocked_by } => write!(f, "skipped: blocked by {blocked_by}"),
            Self::Deferred { reason } => write!(f, "deferred: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Outcome of one node, with timing
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    pub key: TaskKey,
    pub status: NodeStatus,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Result of a reconciliation run, one outcome per node in dependency order
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Whether renderers were skipped (plan only)
    pub dry_run: bool,
    pub outcomes: Vec<NodeOutcome>,
}

impl RunReport {
    /// Status of a given node
    pub fn status(&self, key: &TaskKey) -> Option<&NodeStatus> {
        self.outcomes
            .iter()
            .find(|o| &o.key == key)
            .map(|o| &o.status)
    }

    /// Nodes that failed
    pub fn failed(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, NodeStatus::Failed { .. }))
    }

    /// Nodes skipped because of a failed dependency
    pub fn skipped(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, NodeStatus::Skipped { .. }))
    }

    /// Nodes that succeeded
    pub fn succeeded(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_success())
    }

    /// Summary counts
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for outcome in &self.outcomes {
            summary.add_status(&outcome.status);
        }
        summary
    }

    /// Whether every node succeeded
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_success())
    }
}

/// Summary of run results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deferred: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl RunSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated
    }

    /// Check if the run was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.cancelled == 0
    }

    /// Total number of nodes accounted for
    pub fn total(&self) -> usize {
        self.created
            + self.updated
            + self.unchanged
            + self.deferred
            + self.failed
            + self.skipped
            + self.cancelled
    }

    /// Add a node status to the summary
    pub fn add_status(&mut self, status: &NodeStatus) {
        match status {
            NodeStatus::Unchanged => self.unchanged += 1,
            NodeStatus::Updated { .. } => self.updated += 1,
            NodeStatus::Created => self.created += 1,
            NodeStatus::Failed { .. } => self.failed += 1,
            NodeStatus::Skipped { .. } => self.skipped += 1,
            NodeStatus::Deferred { .. } => self.deferred += 1,
            NodeStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_display() {
        assert_eq!(TaskKey::new("Network", "net-1").to_string(), "Network/net-1");
    }

    #[test]
    fn test_lifecycle_policies() {
        assert!(Lifecycle::Sync.allows_mutation());
        assert!(!Lifecycle::ExistsAndValidates.allows_mutation());
        assert!(Lifecycle::ExistsAndWarnIfChanges.requires_existing());
        assert!(!Lifecycle::Ignore.requires_existing());
    }

    #[test]
    fn test_summary_counts() {
        let report = RunReport {
            dry_run: false,
            outcomes: vec![
                NodeOutcome {
                    key: TaskKey::new("Network", "a"),
                    status: NodeStatus::Created,
                    elapsed: Duration::ZERO,
                },
                NodeOutcome {
                    key: TaskKey::new("Instance", "b"),
                    status: NodeStatus::Skipped {
                        blocked_by: TaskKey::new("Network", "a"),
                    },
                    elapsed: Duration::ZERO,
                },
            ],
        };

        let summary = report.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 2);
        assert!(!summary.is_success());
        assert!(!report.is_success());
        assert_eq!(report.skipped().count(), 1);
    }

    #[test]
    fn test_status_display() {
        let status = NodeStatus::Skipped {
            blocked_by: TaskKey::new("Network", "net-1"),
        };
        assert_eq!(status.to_string(), "skipped: blocked by Network/net-1");
        assert!(!status.is_change());
        assert!(NodeStatus::Created.is_change());
        assert_eq!(
            NodeStatus::Updated {
                fields: vec!["metadata".into()]
            }
            .to_string(),
            "updated (metadata)"
        );
    }
}
