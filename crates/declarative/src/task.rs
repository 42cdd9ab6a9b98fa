//! The Task trait: one declared unit of infrastructure
//!
//! A task describes desired state for a single resource. It knows its own
//! identity and dependencies, how to discover the live resource, how to compare
//! itself field by field, and which render targets it supports.

use crate::backend::Client;
use crate::diff::{Changes, Delta};
use crate::error::Result;
use crate::target::Renderers;
use crate::types::{Lifecycle, TaskKey};
use std::fmt;

/// Core trait for declared resources
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq)]
/// struct Network {
///     name: String,
///     cidr: Field<String>,
/// }
///
/// impl Task for Network {
///     const KIND: &'static str = "Network";
///
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     fn find(&self, client: &Client<'_>) -> Result<Option<Self>> {
///         let Some(record) = client.find(&self.key())? else {
///             return Ok(None);
///         };
///         Ok(Some(Self {
///             name: self.name.clone(),
///             cidr: record.field("cidr")?,
///         }))
///     }
///
///     fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
///         Self {
///             name: expected.name.clone(),
///             cidr: delta.field("cidr", &actual.cidr, &expected.cidr),
///         }
///     }
///
///     fn renderers() -> Renderers<Self> {
///         Renderers::new().with_api().with_terraform()
///     }
/// }
/// ```
pub trait Task: fmt::Debug + Clone + PartialEq + Send + Sync + 'static {
    /// Resource kind, e.g. "Instance"
    const KIND: &'static str;

    /// Stable name, unique within [`Self::KIND`]
    fn name(&self) -> &str;

    fn key(&self) -> TaskKey {
        TaskKey::new(Self::KIND, self.name())
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// Tasks that must be fully applied before this one starts
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Discover the live resource.
    ///
    /// Returns `Ok(None)` when the resource does not exist. Errors mean the
    /// state could not be determined.
    fn find(&self, client: &Client<'_>) -> Result<Option<Self>>;

    /// Compare `actual` with `expected` field by field, returning a copy of
    /// `expected` in which only the changed fields are set.
    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self;

    /// Reject field transitions this resource cannot perform.
    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let _ = (actual, expected, changes);
        Ok(())
    }

    /// Render routines this type provides, one per supported target
    fn renderers() -> Renderers<Self>;
}
