//! Delta computation between an observed and a declared task
//!
//! Each task type writes its own comparison with [`Delta`], field by field,
//! producing a sparse copy of the declaration that carries only the fields
//! that must move.

use crate::field::Field;
use crate::task::Task;

/// Field-by-field comparison recorder, passed to [`Task::diff`].
#[derive(Debug, Default)]
pub struct Delta {
    creating: bool,
    fields: Vec<&'static str>,
}

impl Delta {
    /// A delta against an existing resource
    pub fn new() -> Self {
        Self::default()
    }

    /// A delta for a resource that does not exist yet: every concrete
    /// expected value counts as a change
    pub fn creating() -> Self {
        Self {
            creating: true,
            fields: Vec::new(),
        }
    }

    /// Compare one field. Returns the expected value when it must change and
    /// `Unknown` otherwise.
    pub fn field<V: Clone + PartialEq>(
        &mut self,
        name: &'static str,
        actual: &Field<V>,
        expected: &Field<V>,
    ) -> Field<V> {
        let changed = if self.creating {
            matches!(expected, Field::Value(_))
        } else {
            Field::needs_change(actual, expected)
        };

        if changed {
            self.fields.push(name);
            expected.clone()
        } else {
            Field::Unknown
        }
    }

    /// Fields recorded as changed so far, in comparison order
    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    fn into_fields(self) -> Vec<&'static str> {
        self.fields
    }
}

/// Sparse result of comparing actual and expected state.
///
/// `value` has the shape of the task; a field is set only if it must change,
/// and then holds the expected value verbatim.
#[derive(Debug, Clone)]
pub struct Changes<T> {
    pub value: T,
    fields: Vec<&'static str>,
    creating: bool,
}

impl<T: Task> Changes<T> {
    /// Compare `actual` (or its absence) against `expected`.
    ///
    /// When the resource is absent the changes are the whole declaration.
    pub fn compute(actual: Option<&T>, expected: &T) -> Self {
        match actual {
            Some(actual) => {
                let mut delta = Delta::new();
                let value = T::diff(actual, expected, &mut delta);
                Self {
                    value,
                    fields: delta.into_fields(),
                    creating: false,
                }
            }
            None => {
                let mut delta = Delta::creating();
                T::diff(expected, expected, &mut delta);
                Self {
                    value: expected.clone(),
                    fields: delta.into_fields(),
                    creating: true,
                }
            }
        }
    }
}

impl<T> Changes<T> {
    /// Whether no mutation is needed
    pub fn is_empty(&self) -> bool {
        !self.creating && self.fields.is_empty()
    }

    /// Whether the resource must be created
    pub fn is_create(&self) -> bool {
        self.creating
    }

    /// Names of the fields that differ
    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| *f == field)
    }

    /// Changed fields other than those listed
    pub fn fields_except<'a>(
        &'a self,
        allowed: &'a [&'a str],
    ) -> impl Iterator<Item = &'static str> + 'a {
        self.fields
            .iter()
            .copied()
            .filter(move |f| !allowed.contains(f))
    }
}
