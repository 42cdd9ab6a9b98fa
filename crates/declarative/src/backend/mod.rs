//! Backend client interface.
//!
//! The engine never talks to a provider transport directly. Tasks discover and
//! mutate resources through a [`Backend`], reached via a run-scoped [`Client`]
//! that enforces cancellation and the per-operation timeout.
//!
//! # Testing
//!
//! Use [`MemoryBackend`] for tests without a real provider:
//!
//! ```
//! use declarative::backend::{Backend, MemoryBackend, Record};
//! use declarative::TaskKey;
//!
//! let backend = MemoryBackend::new();
//! let key = TaskKey::new("Network", "net-1");
//! backend.insert(key.clone(), Record::new().with("cidr", "10.0.0.0/16"));
//!
//! let found = backend.find(&key).unwrap().unwrap();
//! assert_eq!(found.get_str("cidr"), Some("10.0.0.0/16"));
//! ```

mod memory;

pub use memory::{Call, MemoryBackend};

use crate::context::CancelToken;
use crate::error::BackendError;
use crate::field::Field;
use crate::types::TaskKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::thread;
use std::time::{Duration, Instant};

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Provider-side representation of one resource: a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Record::set`]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    /// Write a task field: a value is serialized, `Absent` is written as
    /// null (clearing it on update), `Unknown` is left out.
    pub fn set_field<T: Serialize>(&mut self, name: &str, field: &Field<T>) -> BackendResult<()> {
        match field {
            Field::Unknown => {}
            Field::Absent => {
                self.0.insert(name.to_string(), Value::Null);
            }
            Field::Value(v) => {
                self.0.insert(name.to_string(), serde_json::to_value(v)?);
            }
        }
        Ok(())
    }

    /// Read a field as observed state: missing or null is `Absent`.
    pub fn field<T: DeserializeOwned>(&self, name: &str) -> BackendResult<Field<T>> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(Field::Absent),
            Some(v) => Ok(Field::Value(serde_json::from_value(v.clone())?)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|v| !v.is_null())
    }

    /// Apply an update on top of this record; null values remove fields.
    pub fn merge(&mut self, update: &Record) {
        for (name, value) in &update.0 {
            if value.is_null() {
                self.0.remove(name);
            } else {
                self.0.insert(name.clone(), value.clone());
            }
        }
    }

    /// Field names, in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Handle to an asynchronous provider operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    /// Resource the operation acts on
    pub target: String,
}

/// Status of an asynchronous operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done,
    Failed(String),
}

/// Backend trait for provider calls.
///
/// Implementations must be safe for concurrent use: the scheduler calls them
/// from several worker threads at once.
pub trait Backend: Send + Sync {
    /// Look up a resource. Absence is `Ok(None)`, never an error.
    fn find(&self, key: &TaskKey) -> BackendResult<Option<Record>>;

    /// Start creating a resource.
    fn create(&self, key: &TaskKey, record: Record) -> BackendResult<Operation>;

    /// Start updating the given fields of an existing resource.
    fn update(&self, key: &TaskKey, changes: Record) -> BackendResult<Operation>;

    /// Poll an operation once.
    fn operation_status(&self, operation: &Operation) -> BackendResult<OperationStatus>;

    /// Delay between status polls
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    /// Block until the operation reaches a terminal state or `timeout` passes.
    fn wait_for_operation(&self, operation: &Operation, timeout: Duration) -> BackendResult<()> {
        let started = Instant::now();
        loop {
            match self.operation_status(operation)? {
                OperationStatus::Done => return Ok(()),
                OperationStatus::Failed(message) => {
                    return Err(BackendError::OperationFailed {
                        operation: operation.id.clone(),
                        message,
                    });
                }
                OperationStatus::Pending => {}
            }

            if started.elapsed() >= timeout {
                return Err(BackendError::Timeout {
                    operation: operation.id.clone(),
                    seconds: timeout.as_secs_f64(),
                });
            }
            thread::sleep(self.poll_interval().min(timeout));
        }
    }
}

/// Run-scoped access to a [`Backend`].
///
/// Every call checks the run's cancellation signal first. Waiting on an
/// operation that was already started is never interrupted.
#[derive(Clone, Copy)]
pub struct Client<'a> {
    backend: &'a dyn Backend,
    cancel: &'a CancelToken,
    timeout: Duration,
}

impl<'a> Client<'a> {
    pub fn new(backend: &'a dyn Backend, cancel: &'a CancelToken, timeout: Duration) -> Self {
        Self {
            backend,
            cancel,
            timeout,
        }
    }

    fn check_cancelled(&self) -> BackendResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        Ok(())
    }

    pub fn find(&self, key: &TaskKey) -> BackendResult<Option<Record>> {
        self.check_cancelled()?;
        self.backend.find(key)
    }

    pub fn create(&self, key: &TaskKey, record: Record) -> BackendResult<Operation> {
        self.check_cancelled()?;
        log::debug!("create {key}");
        self.backend.create(key, record)
    }

    pub fn update(&self, key: &TaskKey, changes: Record) -> BackendResult<Operation> {
        self.check_cancelled()?;
        log::debug!("update {key}: {}", changes.names().collect::<Vec<_>>().join(", "));
        self.backend.update(key, changes)
    }

    /// Wait for an operation within the run's operation timeout
    pub fn wait(&self, operation: &Operation) -> BackendResult<()> {
        self.backend.wait_for_operation(operation, self.timeout)
    }

    /// Create and wait for the resource to be ready
    pub fn create_and_wait(&self, key: &TaskKey, record: Record) -> BackendResult<()> {
        let operation = self.create(key, record)?;
        self.wait(&operation)
    }

    /// Update and wait for the change to commit
    pub fn update_and_wait(&self, key: &TaskKey, changes: Record) -> BackendResult<()> {
        let operation = self.update(key, changes)?;
        self.wait(&operation)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
