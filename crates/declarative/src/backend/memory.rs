//! In-memory backend for tests.

use super::{Backend, BackendResult, Operation, OperationStatus, Record};
use crate::error::BackendError;
use crate::types::TaskKey;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A call observed by [`MemoryBackend`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Find(TaskKey),
    Create(TaskKey),
    Update(TaskKey, Vec<String>),
    /// A pending operation completed and its record became visible
    Commit(TaskKey),
}

type CreateHook = Arc<dyn Fn(&TaskKey, &mut Record) + Send + Sync>;

struct Pending {
    key: TaskKey,
    record: Record,
}

#[derive(Default)]
struct State {
    records: BTreeMap<TaskKey, Record>,
    pending: HashMap<String, Pending>,
    calls: Vec<Call>,
    failures: HashMap<TaskKey, String>,
    stalled: HashSet<TaskKey>,
}

/// Backend that keeps records in memory.
///
/// Mutations complete asynchronously: a create or update returns a pending
/// operation, and the record only becomes visible to `find` once the
/// operation is polled. Failures and never-completing operations can be
/// injected per resource.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    next_operation: Arc<AtomicU64>,
    on_create: Option<CreateHook>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in provider-assigned values (addresses, fingerprints) on create.
    #[must_use]
    pub fn on_create(
        mut self,
        hook: impl Fn(&TaskKey, &mut Record) + Send + Sync + 'static,
    ) -> Self {
        self.on_create = Some(Arc::new(hook));
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an existing resource.
    pub fn insert(&self, key: TaskKey, record: Record) {
        self.lock().records.insert(key, record);
    }

    /// Committed record for a resource
    pub fn record(&self, key: &TaskKey) -> Option<Record> {
        self.lock().records.get(key).cloned()
    }

    /// Make every mutation of `key` fail with a transient error.
    pub fn fail_on(&self, key: TaskKey, message: impl Into<String>) {
        self.lock().failures.insert(key, message.into());
    }

    /// Make operations on `key` never complete.
    pub fn stall(&self, key: TaskKey) {
        self.lock().stalled.insert(key);
    }

    /// Let stalled operations on `key` complete on their next poll.
    pub fn release(&self, key: &TaskKey) {
        self.lock().stalled.remove(key);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of create and update calls
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Create(_) | Call::Update(..)))
            .count()
    }

    /// Position of the first matching call, for ordering assertions
    pub fn position(&self, call: &Call) -> Option<usize> {
        self.lock().calls.iter().position(|c| c == call)
    }

    fn start(
        &self,
        state: &mut State,
        key: &TaskKey,
        record: Record,
    ) -> BackendResult<Operation> {
        if let Some(message) = state.failures.get(key) {
            return Err(BackendError::Transient {
                message: message.clone(),
            });
        }

        let id = format!(
            "operation-{}",
            self.next_operation.fetch_add(1, Ordering::Relaxed) + 1
        );
        state.pending.insert(
            id.clone(),
            Pending {
                key: key.clone(),
                record,
            },
        );
        Ok(Operation {
            id,
            target: key.to_string(),
        })
    }
}

impl Backend for MemoryBackend {
    fn find(&self, key: &TaskKey) -> BackendResult<Option<Record>> {
        let mut state = self.lock();
        state.calls.push(Call::Find(key.clone()));
        Ok(state.records.get(key).cloned())
    }

    fn create(&self, key: &TaskKey, mut record: Record) -> BackendResult<Operation> {
        if let Some(hook) = &self.on_create {
            hook(key, &mut record);
        }

        let mut state = self.lock();
        state.calls.push(Call::Create(key.clone()));
        if state.records.contains_key(key) {
            return Err(BackendError::Rejected {
                key: key.clone(),
                message: "already exists".to_string(),
            });
        }
        self.start(&mut state, key, record)
    }

    fn update(&self, key: &TaskKey, changes: Record) -> BackendResult<Operation> {
        let mut state = self.lock();
        state.calls.push(Call::Update(
            key.clone(),
            changes.names().map(str::to_string).collect(),
        ));

        let Some(existing) = state.records.get(key) else {
            return Err(BackendError::NotFound(key.clone()));
        };
        let mut record = existing.clone();
        record.merge(&changes);
        self.start(&mut state, key, record)
    }

    fn operation_status(&self, operation: &Operation) -> BackendResult<OperationStatus> {
        let mut state = self.lock();
        let Some(pending) = state.pending.get(&operation.id) else {
            return Ok(OperationStatus::Done);
        };
        if state.stalled.contains(&pending.key) {
            return Ok(OperationStatus::Pending);
        }

        if let Some(Pending { key, record }) = state.pending.remove(&operation.id) {
            state.calls.push(Call::Commit(key.clone()));
            state.records.insert(key, record);
        }
        Ok(OperationStatus::Done)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(2)
    }
}
