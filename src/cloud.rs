//! Local file-backed cloud
//!
//! Stands in for a provider when none is wired up: records live in one JSON
//! state file keyed by `Kind/name`, mutations return an operation that
//! commits on its first status poll, and provider-assigned values (address
//! IPs, metadata fingerprints, ids) are derived deterministically with blake3.
//! Managed files are routed to the discovery object store.

use crate::store::ObjectStore;
use crate::tasks::{Address, Instance, ManagedFile};
use declarative::{
    Backend, BackendError, BackendResult, Operation, OperationStatus, Record, Task, TaskKey,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CloudState {
    #[serde(default)]
    records: BTreeMap<String, Record>,
}

#[derive(Debug)]
struct Pending {
    key: TaskKey,
    record: Record,
}

pub struct LocalCloud {
    path: PathBuf,
    state: Mutex<CloudState>,
    pending: Mutex<BTreeMap<String, Pending>>,
    next_operation: AtomicU64,
    store: Option<Arc<dyn ObjectStore>>,
}

/// Fingerprint of an instance's metadata, as the provider reports it
pub fn metadata_fingerprint(metadata: Option<&Value>) -> String {
    let bytes = metadata
        .map(|m| m.to_string().into_bytes())
        .unwrap_or_default();
    blake3::hash(&bytes).to_hex()[..16].to_string()
}

/// Deterministic external IP for an address without a requested one
fn assigned_ip(name: &str) -> String {
    let hash = blake3::hash(name.as_bytes());
    let bytes = hash.as_bytes();
    format!("34.{}.{}.{}", bytes[0], bytes[1], bytes[2].max(1))
}

fn rejected(key: &TaskKey, message: impl Into<String>) -> BackendError {
    BackendError::Rejected {
        key: key.clone(),
        message: message.into(),
    }
}

impl LocalCloud {
    /// Open the state file at `path`, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> BackendResult<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => CloudState::default(),
            Err(e) => return Err(e.into()),
        };
        log::debug!("local cloud state: {}", path.display());
        Ok(Self {
            path,
            state: Mutex::new(state),
            pending: Mutex::new(BTreeMap::new()),
            next_operation: AtomicU64::new(0),
            store: None,
        })
    }

    /// Route managed files to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Number of records in the state file
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_for(&self, key: &TaskKey) -> BackendResult<&dyn ObjectStore> {
        self.store
            .as_deref()
            .ok_or_else(|| rejected(key, "no discovery store is configured"))
    }

    fn save(&self, state: &CloudState) -> BackendResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn start(&self, key: &TaskKey, record: Record) -> Operation {
        let id = format!(
            "operation-{}",
            self.next_operation.fetch_add(1, Ordering::Relaxed) + 1
        );
        log::trace!("{id}: {key}");
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                Pending {
                    key: key.clone(),
                    record,
                },
            );
        Operation {
            id,
            target: key.to_string(),
        }
    }

    fn commit(&self, pending: Pending) -> BackendResult<()> {
        let Pending { key, record } = pending;
        if key.kind == ManagedFile::KIND {
            let store = self.store_for(&key)?;
            let contents = record.get_str("contents").unwrap_or_default();
            let public = record
                .get("public_acl")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            store
                .write(&key.name, contents.as_bytes(), public)
                .map_err(|e| BackendError::OperationFailed {
                    operation: key.to_string(),
                    message: e.to_string(),
                })?;
            return Ok(());
        }

        let mut state = self.state();
        state.records.insert(key.to_string(), record);
        self.save(&state)
    }

    /// Current record, including managed files read back from the store
    fn current(&self, key: &TaskKey) -> BackendResult<Option<Record>> {
        if key.kind != ManagedFile::KIND {
            return Ok(self.state().records.get(&key.to_string()).cloned());
        }
        let object = self
            .store_for(key)?
            .read(&key.name)
            .map_err(|e| BackendError::Transient {
                message: e.to_string(),
            })?;
        Ok(object.map(|object| {
            Record::new()
                .with("contents", String::from_utf8_lossy(&object.contents).into_owned())
                .with("public_acl", object.public)
        }))
    }
}

impl Backend for LocalCloud {
    fn find(&self, key: &TaskKey) -> BackendResult<Option<Record>> {
        self.current(key)
    }

    fn create(&self, key: &TaskKey, mut record: Record) -> BackendResult<Operation> {
        if self.current(key)?.is_some() {
            return Err(rejected(key, "already exists"));
        }

        if key.kind != ManagedFile::KIND {
            let hash = blake3::hash(key.to_string().as_bytes());
            record.set("id", hash.to_hex()[..20].to_string());
            record.set("creation_timestamp", chrono::Utc::now().to_rfc3339());
        }
        if key.kind == Address::KIND && !record.contains("address") {
            record.set("address", assigned_ip(&key.name));
        }
        if key.kind == Instance::KIND {
            record.set(
                "metadata_fingerprint",
                metadata_fingerprint(record.get("metadata")),
            );
        }
        Ok(self.start(key, record))
    }

    fn update(&self, key: &TaskKey, changes: Record) -> BackendResult<Operation> {
        let Some(mut record) = self.current(key)? else {
            return Err(BackendError::NotFound(key.clone()));
        };

        if key.kind == Instance::KIND && changes.contains("metadata") {
            let current = record.get_str("metadata_fingerprint");
            let sent = changes.get_str("metadata_fingerprint");
            if current != sent {
                return Err(rejected(
                    key,
                    format!(
                        "metadata fingerprint mismatch (sent {}, current {})",
                        sent.unwrap_or("none"),
                        current.unwrap_or("none")
                    ),
                ));
            }
        }

        record.merge(&changes);
        if key.kind == Instance::KIND {
            record.set(
                "metadata_fingerprint",
                metadata_fingerprint(record.get("metadata")),
            );
        }
        Ok(self.start(key, record))
    }

    fn operation_status(&self, operation: &Operation) -> BackendResult<OperationStatus> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&operation.id);
        match pending {
            Some(pending) => match self.commit(pending) {
                Ok(()) => Ok(OperationStatus::Done),
                Err(e) => Ok(OperationStatus::Failed(e.to_string())),
            },
            None => Ok(OperationStatus::Done),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::tasks::Network;
    use declarative::{ApiTarget, NodeStatus, Target, TaskSet, execute_simple};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn cloud(temp: &TempDir) -> LocalCloud {
        LocalCloud::open(temp.path().join("cloud.json")).unwrap()
    }

    #[test]
    fn test_commit_on_first_poll_and_persist() {
        let temp = TempDir::new().unwrap();
        let key = TaskKey::new("Address", "master");
        {
            let cloud = cloud(&temp);
            let op = cloud.create(&key, Record::new()).unwrap();
            assert!(cloud.find(&key).unwrap().is_none());
            assert_eq!(cloud.operation_status(&op).unwrap(), OperationStatus::Done);
            assert!(cloud.find(&key).unwrap().is_some());
        }

        let reopened = cloud(&temp);
        let record = reopened.find(&key).unwrap().unwrap();
        assert_eq!(record.get_str("address"), Some(assigned_ip("master").as_str()));
        assert!(record.contains("creation_timestamp"));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_create_existing_rejected() {
        let temp = TempDir::new().unwrap();
        let cloud = cloud(&temp);
        let key = TaskKey::new("Network", "default");
        let op = cloud.create(&key, Record::new()).unwrap();
        cloud.wait_for_operation(&op, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            cloud.create(&key, Record::new()),
            Err(BackendError::Rejected { .. })
        ));
    }

    #[test]
    fn test_metadata_update_requires_fingerprint() {
        let temp = TempDir::new().unwrap();
        let cloud = cloud(&temp);
        let key = TaskKey::new("Instance", "vm");
        let metadata = serde_json::json!({ "a": "1" });

        let op = cloud
            .create(&key, Record::new().with("metadata", metadata.clone()))
            .unwrap();
        cloud.wait_for_operation(&op, Duration::from_secs(1)).unwrap();
        let fingerprint = metadata_fingerprint(Some(&metadata));
        assert_eq!(
            cloud.find(&key).unwrap().unwrap().get_str("metadata_fingerprint"),
            Some(fingerprint.as_str())
        );

        let stale = Record::new()
            .with("metadata", serde_json::json!({ "a": "2" }))
            .with("metadata_fingerprint", "stale");
        assert!(matches!(
            cloud.update(&key, stale),
            Err(BackendError::Rejected { .. })
        ));

        let fresh = Record::new()
            .with("metadata", serde_json::json!({ "a": "2" }))
            .with("metadata_fingerprint", fingerprint.as_str());
        let op = cloud.update(&key, fresh).unwrap();
        cloud.wait_for_operation(&op, Duration::from_secs(1)).unwrap();
        let record = cloud.find(&key).unwrap().unwrap();
        assert_ne!(record.get_str("metadata_fingerprint"), Some(fingerprint.as_str()));
    }

    #[test]
    fn test_managed_files_go_to_store() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemStore::new("memfs://issuer"));
        let cloud = cloud(&temp).with_store(store.clone());
        let key = TaskKey::new("ManagedFile", "openid/v1/jwks");

        let op = cloud
            .create(
                &key,
                Record::new().with("contents", "{}").with("public_acl", true),
            )
            .unwrap();
        cloud.wait_for_operation(&op, Duration::from_secs(1)).unwrap();

        let object = store.read("openid/v1/jwks").unwrap().unwrap();
        assert_eq!(object.contents, b"{}");
        assert!(object.public);
        assert!(cloud.is_empty());

        let record = cloud.find(&key).unwrap().unwrap();
        assert_eq!(record.get_str("contents"), Some("{}"));
    }

    #[test]
    fn test_managed_file_without_store() {
        let temp = TempDir::new().unwrap();
        let cloud = cloud(&temp);
        let key = TaskKey::new("ManagedFile", "openid/v1/jwks");
        assert!(matches!(cloud.find(&key), Err(BackendError::Rejected { .. })));
    }

    #[test]
    fn test_instance_converges() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cloud.json");
        let run = |metadata: &str| {
            let cloud = LocalCloud::open(&path).unwrap();
            let mut tasks = TaskSet::new();
            tasks.add(Network::new("demo", "default")).unwrap();
            tasks.add(Address::new("master-ip")).unwrap();
            tasks
                .add(
                    Instance::new("demo", "master")
                        .with_zone("us-central1-a")
                        .with_machine_type("e2-small")
                        .with_image("debian-12")
                        .on_network("default")
                        .with_address(Some("master-ip"))
                        .with_metadata(BTreeMap::from([(
                            "role".to_string(),
                            metadata.to_string(),
                        )]))
                        .with_scheduling(false, false),
                )
                .unwrap();
            let graph = tasks.build().unwrap();
            let target = Target::Api(ApiTarget::new(Arc::new(cloud)));
            let report = execute_simple(&graph, &target).unwrap();
            report
                .status(&TaskKey::new("Instance", "master"))
                .cloned()
        };

        assert_eq!(run("master"), Some(NodeStatus::Created));
        assert_eq!(run("master"), Some(NodeStatus::Unchanged));
        assert_eq!(
            run("control-plane"),
            Some(NodeStatus::Updated {
                fields: vec!["metadata".to_string()]
            })
        );
        assert_eq!(run("control-plane"), Some(NodeStatus::Unchanged));
    }
}
