//! Per-node reconciliation: discover, diff, validate, render.

use crate::context::CancelToken;
use crate::diff::Changes;
use crate::error::{Error, Result};
use crate::target::{Renderers, Target, TargetKind};
use crate::task::Task;
use crate::types::{Lifecycle, NodeStatus, TaskKey};
use std::any::Any;
use std::fmt;

/// A task with its type erased, as stored in the graph.
pub(crate) trait Node: Send + Sync + fmt::Debug {
    fn key(&self) -> TaskKey;

    fn dependencies(&self) -> Vec<TaskKey>;

    fn lifecycle(&self) -> Lifecycle;

    fn supports(&self, kind: TargetKind) -> bool;

    fn as_any(&self) -> &dyn Any;

    /// Whether `other` declares exactly the same task
    fn same_as(&self, other: &dyn Node) -> bool;

    fn reconcile(
        &self,
        target: &Target,
        cancel: &CancelToken,
        dry_run: bool,
    ) -> Result<NodeStatus>;
}

pub(crate) struct TaskNode<T: Task> {
    task: T,
    renderers: Renderers<T>,
}

impl<T: Task> TaskNode<T> {
    pub(crate) fn new(task: T) -> Self {
        Self {
            task,
            renderers: T::renderers(),
        }
    }

    pub(crate) fn task(&self) -> &T {
        &self.task
    }
}

impl<T: Task> fmt::Debug for TaskNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode").field("task", &self.task).finish()
    }
}

/// Status a node reaches once its changes are applied
fn applied_status<T>(changes: &Changes<T>) -> NodeStatus {
    if changes.is_create() {
        NodeStatus::Created
    } else if changes.is_empty() {
        NodeStatus::Unchanged
    } else {
        NodeStatus::Updated {
            fields: changes.fields().iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl<T: Task> Node for TaskNode<T> {
    fn key(&self) -> TaskKey {
        self.task.key()
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.task.dependencies()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.task.lifecycle()
    }

    fn supports(&self, kind: TargetKind) -> bool {
        self.renderers.supports(kind)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_as(&self, other: &dyn Node) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| other.task == self.task)
    }

    fn reconcile(
        &self,
        target: &Target,
        cancel: &CancelToken,
        dry_run: bool,
    ) -> Result<NodeStatus> {
        let expected = &self.task;
        let key = expected.key();
        let lifecycle = expected.lifecycle();

        if lifecycle == Lifecycle::Ignore {
            log::debug!("{key}: lifecycle is Ignore");
            return Ok(NodeStatus::Deferred {
                reason: "lifecycle is Ignore".to_string(),
            });
        }

        let client = target.discovery_client(cancel);
        if client.is_none() && lifecycle.requires_existing() {
            log::debug!("{key}: managed outside this {} run", target.kind());
            return Ok(NodeStatus::Deferred {
                reason: format!("{lifecycle:?} is not checked by the {} target", target.kind()),
            });
        }

        let actual = match &client {
            Some(client) => expected.find(client)?,
            None => None,
        };
        if actual.is_none() {
            log::debug!("{key}: not found");
        }

        let changes = Changes::compute(actual.as_ref(), expected);

        match lifecycle {
            Lifecycle::ExistsAndValidates | Lifecycle::ExistsAndWarnIfChanges => {
                if actual.is_none() {
                    return Err(Error::MissingResource(key));
                }
                if !changes.is_empty() {
                    let fields: Vec<String> =
                        changes.fields().iter().map(|f| f.to_string()).collect();
                    if lifecycle == Lifecycle::ExistsAndValidates {
                        return Err(Error::Drift { key, fields });
                    }
                    log::warn!("{key} differs from its declaration in: {}", fields.join(", "));
                }
                return Ok(NodeStatus::Unchanged);
            }
            Lifecycle::Sync | Lifecycle::Ignore => {}
        }

        T::check_changes(actual.as_ref(), expected, &changes)?;

        let status = applied_status(&changes);
        if dry_run {
            return Ok(status);
        }

        if target.kind() == TargetKind::Api && changes.is_empty() {
            log::debug!("{key}: no changes");
            return Ok(status);
        }

        match &status {
            NodeStatus::Created => log::info!("creating {key}"),
            NodeStatus::Updated { fields } => log::info!("updating {key}: {}", fields.join(", ")),
            _ => {}
        }
        self.renderers
            .render(target, cancel, actual.as_ref(), expected, &changes)?;
        Ok(status)
    }
}
