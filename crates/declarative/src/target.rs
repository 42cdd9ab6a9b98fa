//! Render targets and the per-type renderer registry.
//!
//! A run produces exactly one kind of artifact: live API mutations
//! ([`ApiTarget`]) or a generated declarative config ([`TerraformTarget`]).
//! Each task type opts into targets by implementing [`RenderApi`] and/or
//! [`RenderTerraform`] and listing them in its [`Renderers`]; the engine checks
//! every declared task against the chosen target before any node runs.

use crate::backend::{Backend, Client};
use crate::context::CancelToken;
use crate::diff::Changes;
use crate::error::{Error, Result};
use crate::task::Task;
use crate::types::TaskKey;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Name of the generated terraform file
pub const TERRAFORM_FILE: &str = "kubernetes.tf.json";

/// Default time allowed for one asynchronous backend operation
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// The kind of artifact a run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Direct provider API calls
    Api,
    /// Generated terraform JSON
    Terraform,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api => f.write_str("api"),
            Self::Terraform => f.write_str("terraform"),
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "api" | "direct" => Ok(Self::Api),
            "terraform" | "tf" => Ok(Self::Terraform),
            other => Err(format!("unknown target '{other}' (expected api or terraform)")),
        }
    }
}

/// A value owned by another task, e.g. an address's assigned IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub key: TaskKey,
    /// Terraform resource type of the referenced task
    pub resource_type: &'static str,
    pub attribute: &'static str,
}

impl Reference {
    pub fn new(key: TaskKey, resource_type: &'static str, attribute: &'static str) -> Self {
        Self {
            key,
            resource_type,
            attribute,
        }
    }
}

/// Resolves cross-resource references for the active target.
pub trait Resolve {
    fn resolve(&self, reference: &Reference) -> Result<String>;
}

/// Live resolution: look the value up through the backend.
impl Resolve for Client<'_> {
    fn resolve(&self, reference: &Reference) -> Result<String> {
        let unresolved = || Error::Unresolved {
            key: reference.key.clone(),
            attribute: reference.attribute,
        };
        let record = self.find(&reference.key)?.ok_or_else(unresolved)?;
        record
            .get_str(reference.attribute)
            .map(str::to_string)
            .ok_or_else(unresolved)
    }
}

/// Symbolic resolution: the referenced resource only exists once the
/// generated config is applied, so emit an interpolation instead.
impl Resolve for TerraformTarget {
    fn resolve(&self, reference: &Reference) -> Result<String> {
        Ok(format!(
            "${{{}.{}.{}}}",
            reference.resource_type,
            terraform_name(&reference.key.name),
            reference.attribute
        ))
    }
}

/// Live API rendering for a task type
pub trait RenderApi: Task {
    /// Create or update the resource and wait for it to be ready.
    ///
    /// Called only when `changes` is not empty.
    fn render_api(
        client: &Client<'_>,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()>;
}

/// Terraform rendering for a task type
pub trait RenderTerraform: Task {
    /// Register this task's resource block with the target.
    fn render_terraform(
        target: &TerraformTarget,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()>;
}

type ApiRenderFn<T> = fn(&Client<'_>, Option<&T>, &T, &Changes<T>) -> Result<()>;
type TerraformRenderFn<T> = fn(&TerraformTarget, Option<&T>, &T, &Changes<T>) -> Result<()>;

/// The render routines a task type provides, one slot per target.
pub struct Renderers<T> {
    api: Option<ApiRenderFn<T>>,
    terraform: Option<TerraformRenderFn<T>>,
}

impl<T: Task> Renderers<T> {
    /// No targets supported
    pub fn new() -> Self {
        Self {
            api: None,
            terraform: None,
        }
    }

    #[must_use]
    pub fn with_api(mut self) -> Self
    where
        T: RenderApi,
    {
        self.api = Some(T::render_api);
        self
    }

    #[must_use]
    pub fn with_terraform(mut self) -> Self
    where
        T: RenderTerraform,
    {
        self.terraform = Some(T::render_terraform);
        self
    }

    pub fn supports(&self, kind: TargetKind) -> bool {
        match kind {
            TargetKind::Api => self.api.is_some(),
            TargetKind::Terraform => self.terraform.is_some(),
        }
    }

    /// Invoke the routine for `target`.
    pub(crate) fn render(
        &self,
        target: &Target,
        cancel: &CancelToken,
        actual: Option<&T>,
        expected: &T,
        changes: &Changes<T>,
    ) -> Result<()> {
        let unsupported = || Error::UnsupportedTarget {
            target: target.kind(),
            tasks: vec![expected.key()],
        };
        match target {
            Target::Api(api) => {
                let render = self.api.ok_or_else(unsupported)?;
                render(&api.client(cancel), actual, expected, changes)
            }
            Target::Terraform(tf) => {
                let render = self.terraform.ok_or_else(unsupported)?;
                render(tf, actual, expected, changes)
            }
        }
    }
}

impl<T: Task> Default for Renderers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Live target: mutate real infrastructure through a backend.
#[derive(Clone)]
pub struct ApiTarget {
    backend: Arc<dyn Backend>,
    operation_timeout: Duration,
}

impl ApiTarget {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn client<'a>(&'a self, cancel: &'a CancelToken) -> Client<'a> {
        Client::new(self.backend.as_ref(), cancel, self.operation_timeout)
    }
}

type Blocks = BTreeMap<String, BTreeMap<String, Value>>;

/// Declarative-config target: collect terraform resource blocks and write
/// them as one JSON file.
///
/// With a backend attached, existing resources are still discovered so the
/// run can report what would change.
pub struct TerraformTarget {
    out_dir: PathBuf,
    backend: Option<Arc<dyn Backend>>,
    resources: Mutex<Blocks>,
}

impl TerraformTarget {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            backend: None,
            resources: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Register a resource block keyed by (type, name).
    ///
    /// Fails if the sanitised name is already taken for this type.
    pub fn render_resource(&self, resource_type: &str, name: &str, block: Value) -> Result<()> {
        let name = terraform_name(name);
        let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        let blocks = resources.entry(resource_type.to_string()).or_default();
        if blocks.contains_key(&name) {
            return Err(Error::DuplicateResource {
                resource_type: resource_type.to_string(),
                name,
            });
        }
        log::debug!("terraform block {resource_type}.{name}");
        blocks.insert(name, block);
        Ok(())
    }

    /// Block previously registered for (type, name)
    pub fn resource(&self, resource_type: &str, name: &str) -> Option<Value> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_type)
            .and_then(|blocks| blocks.get(&terraform_name(name)))
            .cloned()
    }

    pub fn resource_count(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// The whole document: `{"resource": {type: {name: block}}}`
    pub fn to_json(&self) -> Value {
        let resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        let by_type: Map<String, Value> = resources
            .iter()
            .map(|(resource_type, blocks)| {
                let blocks: Map<String, Value> = blocks
                    .iter()
                    .map(|(name, block)| (name.clone(), block.clone()))
                    .collect();
                (resource_type.clone(), Value::Object(blocks))
            })
            .collect();

        let mut root = Map::new();
        root.insert("resource".to_string(), Value::Object(by_type));
        Value::Object(root)
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn output_path(&self) -> PathBuf {
        self.out_dir.join(TERRAFORM_FILE)
    }

    /// Write the collected blocks to [`TERRAFORM_FILE`].
    pub fn finish(&self) -> Result<PathBuf> {
        let path = self.output_path();
        let mut json = serde_json::to_string_pretty(&self.to_json())?;
        json.push('\n');

        fs::create_dir_all(&self.out_dir)
            .and_then(|()| fs::write(&path, json))
            .map_err(|source| Error::Output {
                path: path.clone(),
                source,
            })?;
        log::info!("wrote {}", path.display());
        Ok(path)
    }
}

/// The render target for one run
pub enum Target {
    Api(ApiTarget),
    Terraform(TerraformTarget),
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Api(_) => TargetKind::Api,
            Self::Terraform(_) => TargetKind::Terraform,
        }
    }

    /// Client used for discovery, if this target can see live state
    pub fn discovery_client<'a>(&'a self, cancel: &'a CancelToken) -> Option<Client<'a>> {
        match self {
            Self::Api(api) => Some(api.client(cancel)),
            Self::Terraform(tf) => tf.backend.as_ref().map(|backend| {
                Client::new(backend.as_ref(), cancel, DEFAULT_OPERATION_TIMEOUT)
            }),
        }
    }

    /// Commit generated artifacts, returning the written file if any
    pub fn finish(&self) -> Result<Option<PathBuf>> {
        match self {
            Self::Api(_) => Ok(None),
            Self::Terraform(tf) => tf.finish().map(Some),
        }
    }
}

/// Terraform resource name for a task name
pub fn terraform_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
