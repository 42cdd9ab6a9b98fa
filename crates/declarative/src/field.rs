//! Tri-state task fields and write-once computed fields

use crate::error::{Error, Result};
use std::fmt;
use std::sync::OnceLock;

/// A declared or observed field value.
///
/// `Unknown` means "no opinion": in an expected task it is never diffed, in an
/// observed task it means discovery could not tell. `Absent` means the field is
/// intentionally empty. `Value` carries a concrete value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Field<T> {
    #[default]
    Unknown,
    Absent,
    Value(T),
}

impl<T> Field<T> {
    /// Build an observed field: `None` means the backend reported nothing.
    pub fn observed(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Self::Value)
    }

    /// Build a declared field: `None` means "don't care".
    pub fn declared(value: Option<T>) -> Self {
        value.map_or(Self::Unknown, Self::Value)
    }

    /// The concrete value, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the field carries an opinion (absent or a value)
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Whether the field is unknown / unspecified
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn as_ref(&self) -> Field<&T> {
        match self {
            Self::Unknown => Field::Unknown,
            Self::Absent => Field::Absent,
            Self::Value(v) => Field::Value(v),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Self::Unknown => Field::Unknown,
            Self::Absent => Field::Absent,
            Self::Value(v) => Field::Value(f(v)),
        }
    }

    /// Convert into an `Option`, collapsing `Unknown` and `Absent`
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: PartialEq> Field<T> {
    /// Whether moving from `actual` to `expected` requires a change.
    ///
    /// An unspecified expected field never requires one.
    pub fn needs_change(actual: &Self, expected: &Self) -> bool {
        match (expected, actual) {
            (Self::Unknown, _) => false,
            (Self::Value(e), Self::Value(a)) => e != a,
            (Self::Value(_), _) => true,
            (Self::Absent, Self::Value(_)) => true,
            (Self::Absent, _) => false,
        }
    }
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("<unknown>"),
            Self::Absent => f.write_str("<absent>"),
            Self::Value(v) => v.fmt(f),
        }
    }
}

/// A field computed by the engine during rendering, written at most once.
///
/// Computed fields never take part in equality or diffing.
pub struct Computed<T> {
    cell: OnceLock<T>,
}

impl<T> Computed<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// A computed field that already holds a value (used by discovery)
    pub fn with(value: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self { cell }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Write the value; a second write is an error.
    pub fn set(&self, name: &'static str, value: T) -> Result<()> {
        self.cell
            .set(value)
            .map_err(|_| Error::ComputedAlreadySet(name))
    }
}

impl<T> Default for Computed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for Computed<T> {
    fn clone(&self) -> Self {
        match self.get() {
            Some(v) => Self::with(v.clone()),
            None => Self::new(),
        }
    }
}

impl<T> PartialEq for Computed<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> Eq for Computed<T> {}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => write!(f, "Computed({v:?})"),
            None => f.write_str("Computed(<pending>)"),
        }
    }
}
