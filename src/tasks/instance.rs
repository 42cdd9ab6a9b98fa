use super::{
    Address, COMPUTE_API, Disk, Network, ServiceAccount, Subnet, disk_url, last_component,
    network_url, observed_name, service_account_email,
};
use anyhow::{Context, bail};
use declarative::{
    Changes, Client, Computed, Delta, Error, Field, Lifecycle, Record, RenderApi,
    RenderTerraform, Renderers, Resolve, Result, Task, TaskKey, TerraformTarget,
};
use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Short scope names accepted in declarations
const SCOPE_ALIASES: [(&str, &str); 8] = [
    ("storage-ro", "https://www.googleapis.com/auth/devstorage.read_only"),
    ("storage-rw", "https://www.googleapis.com/auth/devstorage.read_write"),
    ("compute-ro", "https://www.googleapis.com/auth/compute.read_only"),
    ("compute-rw", "https://www.googleapis.com/auth/compute"),
    ("monitoring", "https://www.googleapis.com/auth/monitoring"),
    ("monitoring-write", "https://www.googleapis.com/auth/monitoring.write"),
    ("logging-write", "https://www.googleapis.com/auth/logging.write"),
    ("cloud-platform", "https://www.googleapis.com/auth/cloud-platform"),
];

/// `.../projects/<project>/<scope>/<collection>/<name>`
static RESOURCE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https://www\.googleapis\.com/compute/(?:v1|beta)/projects/([^/]+)/(?:global|zones/[^/]+|regions/[^/]+)/([^/]+)/([^/]+)$",
    )
    .expect("resource URL pattern is valid")
});

/// Device name of the boot disk
const BOOT_DEVICE: &str = "persistent-disks-0";

fn scope_to_long_form(scope: &str) -> String {
    SCOPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == scope)
        .map_or(scope, |(_, url)| *url)
        .to_string()
}

fn scope_to_short_form(scope: &str) -> String {
    SCOPE_ALIASES
        .iter()
        .find(|(_, url)| *url == scope)
        .map_or(scope, |(alias, _)| *alias)
        .to_string()
}

fn build_machine_type_url(project: &str, zone: &str, name: &str) -> String {
    format!("{COMPUTE_API}/projects/{project}/zones/{zone}/machineTypes/{name}")
}

/// Image URL for `name` or `project/name`
fn build_image_url(default_project: &str, spec: &str) -> anyhow::Result<String> {
    let (project, name) = match spec.split('/').collect::<Vec<_>>().as_slice() {
        [name] => (default_project, *name),
        [project, name] => (*project, *name),
        _ => bail!("cannot parse image spec {spec:?}"),
    };
    let url = format!("{COMPUTE_API}/projects/{project}/global/images/{name}");
    log::trace!("mapped image {spec:?} to {url}");
    Ok(url)
}

/// Inverse of [`build_image_url`]: images in `default_project` lose the prefix
fn shorten_image_url(default_project: &str, url: &str) -> anyhow::Result<String> {
    let captures = RESOURCE_URL
        .captures(url)
        .with_context(|| format!("cannot parse image URL {url:?}"))?;
    let project = &captures[1];
    let name = &captures[3];
    if project == default_project {
        Ok(name.to_string())
    } else {
        Ok(format!("{project}/{name}"))
    }
}

/// Canonical short form of an image spec, as discovery reports it
fn normalize_image(default_project: &str, spec: &str) -> String {
    match spec.split_once('/') {
        Some((project, name)) if project == default_project => name.to_string(),
        _ => spec.to_string(),
    }
}

/// A compute instance
///
/// After creation only the metadata can change; the provider requires the
/// current metadata fingerprint with every metadata update.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    pub project: String,
    pub lifecycle: Lifecycle,

    pub zone: Field<String>,
    pub machine_type: Field<String>,
    /// Short form: `name` or `project/name`
    pub image: Field<String>,
    /// Names of the attached network, subnet and address tasks
    pub network: Field<String>,
    pub subnet: Field<String>,
    pub ip_address: Field<String>,
    pub service_account: Field<String>,
    /// Short forms where an alias exists
    pub scopes: Field<Vec<String>>,
    pub tags: Field<Vec<String>>,
    /// Device name to disk task name
    pub disks: Field<BTreeMap<String, String>>,
    pub metadata: Field<BTreeMap<String, String>>,
    pub preemptible: Field<bool>,
    pub can_ip_forward: Field<bool>,

    pub metadata_fingerprint: Computed<String>,
}

impl Instance {
    pub fn new(project: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            lifecycle: Lifecycle::Sync,
            zone: Field::Unknown,
            machine_type: Field::Unknown,
            image: Field::Unknown,
            network: Field::Unknown,
            subnet: Field::Unknown,
            ip_address: Field::Unknown,
            service_account: Field::Unknown,
            scopes: Field::Unknown,
            tags: Field::Unknown,
            disks: Field::Unknown,
            metadata: Field::Unknown,
            preemptible: Field::Unknown,
            can_ip_forward: Field::Unknown,
            metadata_fingerprint: Computed::new(),
        }
    }

    pub fn with_zone(mut self, zone: &str) -> Self {
        self.zone = Field::Value(zone.to_string());
        self
    }

    pub fn with_machine_type(mut self, machine_type: &str) -> Self {
        self.machine_type = Field::Value(machine_type.to_string());
        self
    }

    pub fn with_image(mut self, spec: &str) -> Self {
        self.image = Field::Value(normalize_image(&self.project, spec));
        self
    }

    pub fn on_network(mut self, network: &str) -> Self {
        self.network = Field::Value(network.to_string());
        self
    }

    pub fn in_subnet(mut self, subnet: Option<&str>) -> Self {
        self.subnet = Field::declared(subnet.map(str::to_string));
        self
    }

    pub fn with_address(mut self, address: Option<&str>) -> Self {
        self.ip_address = Field::declared(address.map(str::to_string));
        self
    }

    pub fn with_service_account(mut self, account: Option<&str>) -> Self {
        self.service_account = Field::declared(account.map(str::to_string));
        self
    }

    pub fn with_scopes(mut self, scopes: &[String]) -> Self {
        self.scopes = non_empty(scopes.iter().map(|s| scope_to_short_form(s)).collect());
        self
    }

    pub fn with_tags(mut self, tags: &[String]) -> Self {
        self.tags = non_empty(tags.to_vec());
        self
    }

    pub fn with_disks(mut self, disks: BTreeMap<String, String>) -> Self {
        self.disks = if disks.is_empty() {
            Field::Unknown
        } else {
            Field::Value(disks)
        };
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = if metadata.is_empty() {
            Field::Unknown
        } else {
            Field::Value(metadata)
        };
        self
    }

    pub fn with_scheduling(mut self, preemptible: bool, can_ip_forward: bool) -> Self {
        self.preemptible = Field::Value(preemptible);
        self.can_ip_forward = Field::Value(can_ip_forward);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// External IP for the primary interface, resolved for the active target
    fn nat_ip(&self, resolver: &dyn Resolve) -> Result<Option<String>> {
        match self.ip_address.value() {
            Some(address) => resolver.resolve(&Address::ip_reference(address)).map(Some),
            None => Ok(None),
        }
    }

    fn service_account_email(&self) -> Option<String> {
        self.service_account
            .value()
            .map(|account| service_account_email(&self.project, account))
    }

    fn long_scopes(&self) -> Vec<String> {
        self.scopes
            .value()
            .map(|scopes| scopes.iter().map(|s| scope_to_long_form(s)).collect())
            .unwrap_or_default()
    }

    /// Full provider record for a new instance
    fn to_record(&self, client: &Client<'_>) -> Result<Record> {
        let zone = self.zone.value().map_or("", String::as_str);
        let mut record = Record::new();

        record.set_field("zone", &self.zone)?;
        if let Some(machine_type) = self.machine_type.value() {
            record.set(
                "machine_type",
                build_machine_type_url(&self.project, zone, machine_type),
            );
        }
        if let Some(image) = self.image.value() {
            record.set("image", build_image_url(&self.project, image)?);
        }
        if let Some(network) = self.network.value() {
            record.set("network", network_url(&self.project, network));
        }
        record.set_field("subnetwork", &self.subnet)?;
        if let Some(ip) = self.nat_ip(client)? {
            record.set("nat_ip", ip);
        }
        if let Some(email) = self.service_account_email() {
            record.set("service_account", email);
        }
        if self.scopes.is_set() {
            record.set("scopes", self.long_scopes());
        }
        record.set_field("tags", &self.tags)?;
        if let Some(disks) = self.disks.value() {
            let attached: serde_json::Map<String, Value> = disks
                .iter()
                .map(|(device, disk)| {
                    (device.clone(), disk_url(&self.project, zone, disk).into())
                })
                .collect();
            record.set("disks", Value::Object(attached));
        }
        record.set_field("metadata", &self.metadata)?;
        record.set_field("preemptible", &self.preemptible)?;
        record.set_field("can_ip_forward", &self.can_ip_forward)?;
        record.set("scheduling", self.scheduling());
        Ok(record)
    }

    fn scheduling(&self) -> Value {
        if self.preemptible.value().copied().unwrap_or(false) {
            json!({
                "automatic_restart": false,
                "on_host_maintenance": "TERMINATE",
                "preemptible": true,
            })
        } else {
            json!({
                "automatic_restart": true,
                "on_host_maintenance": "MIGRATE",
                "preemptible": false,
            })
        }
    }

    /// Record the provider's current metadata fingerprint for dependents
    fn write_back_fingerprint(&self, client: &Client<'_>) -> Result<()> {
        if let Some(record) = client.find(&self.key())?
            && let Some(fingerprint) = record.get_str("metadata_fingerprint")
        {
            self.metadata_fingerprint
                .set("metadata_fingerprint", fingerprint.to_string())?;
        }
        Ok(())
    }
}

fn non_empty(values: Vec<String>) -> Field<Vec<String>> {
    if values.is_empty() {
        Field::Unknown
    } else {
        Field::Value(values)
    }
}

impl Task for Instance {
    const KIND: &'static str = "Instance";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps = Vec::new();
        if let Some(network) = self.network.value() {
            deps.push(TaskKey::new(Network::KIND, network.as_str()));
        }
        if let Some(subnet) = self.subnet.value() {
            deps.push(TaskKey::new(Subnet::KIND, subnet.as_str()));
        }
        if let Some(address) = self.ip_address.value() {
            deps.push(TaskKey::new(Address::KIND, address.as_str()));
        }
        if let Some(account) = self.service_account.value() {
            deps.push(TaskKey::new(ServiceAccount::KIND, account.as_str()));
        }
        if let Some(disks) = self.disks.value() {
            deps.extend(disks.values().map(|d| TaskKey::new(Disk::KIND, d.as_str())));
        }
        deps
    }

    fn find(&self, client: &Client<'_>) -> Result<Option<Self>> {
        let Some(record) = client.find(&self.key())? else {
            return Ok(None);
        };

        let image = match record.get_str("image") {
            Some(url) => Field::Value(shorten_image_url(&self.project, url)?),
            None => Field::Absent,
        };

        // The interface only knows the IP; map it back to the declared
        // address when that address currently holds it.
        let ip_address = match record.get_str("nat_ip") {
            None => Field::Absent,
            Some(ip) => {
                let declared = match self.ip_address.value() {
                    Some(address) => client
                        .find(&TaskKey::new(Address::KIND, address.as_str()))?
                        .filter(|a| a.get_str("address") == Some(ip))
                        .map(|_| address.clone()),
                    None => None,
                };
                Field::Value(declared.unwrap_or_else(|| ip.to_string()))
            }
        };

        let service_account = Field::observed(
            record
                .get_str("service_account")
                .and_then(|email| email.split('@').next())
                .map(str::to_string),
        );

        let scopes = record
            .field::<Vec<String>>("scopes")?
            .map(|scopes| scopes.iter().map(|s| scope_to_short_form(s)).collect());

        let disks = record
            .field::<BTreeMap<String, String>>("disks")?
            .map(|disks| {
                disks
                    .into_iter()
                    .map(|(device, url)| (device, last_component(&url).to_string()))
                    .collect()
            });

        let metadata_fingerprint = match record.get_str("metadata_fingerprint") {
            Some(fingerprint) => Computed::with(fingerprint.to_string()),
            None => Computed::new(),
        };

        Ok(Some(Self {
            name: self.name.clone(),
            project: self.project.clone(),
            lifecycle: self.lifecycle,
            zone: observed_name(&record, "zone"),
            machine_type: observed_name(&record, "machine_type"),
            image,
            network: observed_name(&record, "network"),
            subnet: observed_name(&record, "subnetwork"),
            ip_address,
            service_account,
            scopes,
            tags: record.field("tags")?,
            disks,
            metadata: record.field("metadata")?,
            preemptible: record.field("preemptible")?,
            can_ip_forward: record.field("can_ip_forward")?,
            metadata_fingerprint,
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            project: expected.project.clone(),
            lifecycle: expected.lifecycle,
            zone: delta.field("zone", &actual.zone, &expected.zone),
            machine_type: delta.field("machine_type", &actual.machine_type, &expected.machine_type),
            image: delta.field("image", &actual.image, &expected.image),
            network: delta.field("network", &actual.network, &expected.network),
            subnet: delta.field("subnet", &actual.subnet, &expected.subnet),
            ip_address: delta.field("ip_address", &actual.ip_address, &expected.ip_address),
            service_account: delta.field(
                "service_account",
                &actual.service_account,
                &expected.service_account,
            ),
            scopes: delta.field("scopes", &actual.scopes, &expected.scopes),
            tags: delta.field("tags", &actual.tags, &expected.tags),
            disks: delta.field("disks", &actual.disks, &expected.disks),
            metadata: delta.field("metadata", &actual.metadata, &expected.metadata),
            preemptible: delta.field("preemptible", &actual.preemptible, &expected.preemptible),
            can_ip_forward: delta.field(
                "can_ip_forward",
                &actual.can_ip_forward,
                &expected.can_ip_forward,
            ),
            metadata_fingerprint: Computed::new(),
        }
    }

    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        if actual.is_none() {
            return Ok(());
        }
        if let Some(field) = changes.fields_except(&["metadata"]).next() {
            log::error!("cannot apply changes to {}: {field}", expected.key());
            return Err(Error::DisallowedChange {
                key: expected.key(),
                field: field.to_string(),
                reason: "only metadata can change on an existing instance".to_string(),
            });
        }
        Ok(())
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().with_api().with_terraform()
    }
}

impl RenderApi for Instance {
    fn render_api(
        client: &Client<'_>,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let key = expected.key();
        match actual {
            None => {
                let record = expected.to_record(client)?;
                client.create_and_wait(&key, record)?;
            }
            Some(actual) if changes.contains("metadata") => {
                log::debug!("updating instance metadata on {key}");
                let mut update = Record::new();
                update.set_field("metadata", &changes.value.metadata)?;
                if let Some(fingerprint) = actual.metadata_fingerprint.get() {
                    update.set("metadata_fingerprint", fingerprint.as_str());
                }
                client.update_and_wait(&key, update)?;
            }
            Some(_) => {}
        }
        expected.write_back_fingerprint(client)
    }
}

impl RenderTerraform for Instance {
    fn render_terraform(
        target: &TerraformTarget,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let mut disks = Vec::new();
        if let Some(image) = expected.image.value() {
            disks.push(json!({
                "auto_delete": true,
                "device_name": BOOT_DEVICE,
                "image": build_image_url(&expected.project, image)?,
            }));
        }
        if let Some(attached) = expected.disks.value() {
            for (device, disk) in attached {
                disks.push(json!({
                    "auto_delete": false,
                    "device_name": device,
                    "disk": target.resolve(&Disk::self_link_reference(disk))?,
                }));
            }
        }

        let mut interface = json!({});
        if let Some(network) = expected.network.value() {
            interface["network"] = target
                .resolve(&Network::self_link_reference(network))?
                .into();
        }
        if let Some(subnet) = expected.subnet.value() {
            interface["subnetwork"] = target
                .resolve(&Subnet::self_link_reference(subnet))?
                .into();
        }
        let mut access = json!({});
        if let Some(ip) = expected.nat_ip(target)? {
            access["nat_ip"] = ip.into();
        }
        interface["access_config"] = json!([access]);

        let mut block = json!({
            "name": expected.name,
            "can_ip_forward": expected.can_ip_forward.value().copied().unwrap_or(false),
            "disk": disks,
            "network_interface": [interface],
            "scheduling": expected.scheduling(),
        });
        if let Some(zone) = expected.zone.value() {
            block["zone"] = zone.as_str().into();
        }
        if let Some(machine_type) = expected.machine_type.value() {
            block["machine_type"] = machine_type.as_str().into();
        }
        if let Some(tags) = expected.tags.value() {
            block["tags"] = json!(tags);
        }
        if let Some(account) = expected.service_account.value() {
            block["service_account"] = json!([{
                "email": target.resolve(&ServiceAccount::email_reference(account))?,
                "scopes": expected.long_scopes(),
            }]);
        }
        if let Some(metadata) = expected.metadata.value() {
            block["metadata"] = json!(metadata);
        }

        target.render_resource("google_compute_instance", &expected.name, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::backend::Call;
    use declarative::{
        ApiTarget, ErrorCategory, MemoryBackend, NodeStatus, RunReport, Target, TaskGraph,
        TaskSet, execute_simple,
    };
    use std::sync::Arc;

    const PROJECT: &str = "demo";

    fn backend() -> MemoryBackend {
        MemoryBackend::new().on_create(|key, record| match key.kind {
            "Address" => record.set("address", "203.0.113.7"),
            "Instance" => record.set("metadata_fingerprint", "fp-1"),
            _ => {}
        })
    }

    fn instance() -> Instance {
        Instance::new(PROJECT, "master")
            .with_zone("us-central1-a")
            .with_machine_type("e2-standard-2")
            .with_image("cos-cloud/cos-stable")
            .on_network("default")
            .with_address(Some("master-ip"))
            .with_service_account(Some("control-plane"))
            .with_scopes(&[
                "storage-ro".to_string(),
                "https://www.googleapis.com/auth/compute".to_string(),
            ])
            .with_tags(&["master".to_string()])
            .with_disks(BTreeMap::from([(
                "etcd".to_string(),
                "etcd-main".to_string(),
            )]))
            .with_metadata(BTreeMap::from([(
                "startup-script".to_string(),
                "#!/bin/sh".to_string(),
            )]))
            .with_scheduling(false, false)
    }

    fn graph(instance: Instance) -> TaskGraph {
        let mut tasks = TaskSet::new();
        tasks.add(Network::new(PROJECT, "default")).unwrap();
        tasks.add(Address::new("master-ip")).unwrap();
        tasks.add(ServiceAccount::new(PROJECT, "control-plane")).unwrap();
        tasks
            .add(Disk::new("etcd-main").with_zone("us-central1-a"))
            .unwrap();
        tasks.add(instance).unwrap();
        tasks.build().unwrap()
    }

    fn apply(backend: &MemoryBackend, graph: &TaskGraph) -> RunReport {
        let target = Target::Api(ApiTarget::new(Arc::new(backend.clone())));
        execute_simple(graph, &target).unwrap()
    }

    fn key() -> TaskKey {
        TaskKey::new("Instance", "master")
    }

    #[test]
    fn test_scope_aliases() {
        assert_eq!(
            scope_to_long_form("storage-ro"),
            "https://www.googleapis.com/auth/devstorage.read_only"
        );
        assert_eq!(
            scope_to_short_form("https://www.googleapis.com/auth/compute"),
            "compute-rw"
        );
        assert_eq!(scope_to_long_form("custom"), "custom");
        assert_eq!(
            scope_to_short_form("https://example.com/scope"),
            "https://example.com/scope"
        );
    }

    #[test]
    fn test_image_urls() {
        assert_eq!(
            build_image_url("demo", "debian-12").unwrap(),
            "https://www.googleapis.com/compute/v1/projects/demo/global/images/debian-12"
        );
        let url = build_image_url("demo", "cos-cloud/cos-stable").unwrap();
        assert_eq!(
            url,
            "https://www.googleapis.com/compute/v1/projects/cos-cloud/global/images/cos-stable"
        );
        assert_eq!(shorten_image_url("demo", &url).unwrap(), "cos-cloud/cos-stable");
        assert_eq!(
            shorten_image_url("cos-cloud", &url).unwrap(),
            "cos-stable"
        );
        assert!(build_image_url("demo", "a/b/c").is_err());
        assert!(shorten_image_url("demo", "not a url").is_err());
        assert_eq!(normalize_image("demo", "demo/debian-12"), "debian-12");
    }

    #[test]
    fn test_machine_type_url() {
        assert_eq!(
            build_machine_type_url("demo", "us-central1-a", "e2-medium"),
            "https://www.googleapis.com/compute/v1/projects/demo/zones/us-central1-a/machineTypes/e2-medium"
        );
    }

    #[test]
    fn test_dependencies() {
        let deps = instance().dependencies();
        assert_eq!(
            deps,
            vec![
                TaskKey::new("Network", "default"),
                TaskKey::new("Address", "master-ip"),
                TaskKey::new("ServiceAccount", "control-plane"),
                TaskKey::new("Disk", "etcd-main"),
            ]
        );
    }

    #[test]
    fn test_create_resolves_ip_and_writes_back_fingerprint() {
        let backend = backend();
        let graph = graph(instance());
        let report = apply(&backend, &graph);
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.status(&key()), Some(&NodeStatus::Created));

        let record = backend.record(&key()).unwrap();
        assert_eq!(record.get_str("nat_ip"), Some("203.0.113.7"));
        assert_eq!(
            record.get_str("service_account"),
            Some("control-plane@demo.iam.gserviceaccount.com")
        );
        assert_eq!(
            record.get_str("machine_type"),
            Some("https://www.googleapis.com/compute/v1/projects/demo/zones/us-central1-a/machineTypes/e2-standard-2")
        );

        let declared = graph.task::<Instance>("master").unwrap();
        assert_eq!(
            declared.metadata_fingerprint.get().map(String::as_str),
            Some("fp-1")
        );
    }

    #[test]
    fn test_second_run_is_unchanged() {
        let backend = backend();
        apply(&backend, &graph(instance()));
        let mutations = backend.mutation_count();

        let report = apply(&backend, &graph(instance()));
        assert_eq!(report.status(&key()), Some(&NodeStatus::Unchanged));
        assert_eq!(backend.mutation_count(), mutations);
    }

    #[test]
    fn test_metadata_update_sends_fingerprint() {
        let backend = backend();
        apply(&backend, &graph(instance()));

        let changed = instance().with_metadata(BTreeMap::from([(
            "startup-script".to_string(),
            "#!/bin/bash".to_string(),
        )]));
        let report = apply(&backend, &graph(changed));
        assert_eq!(
            report.status(&key()),
            Some(&NodeStatus::Updated {
                fields: vec!["metadata".to_string()]
            })
        );
        assert!(backend.calls().contains(&Call::Update(
            key(),
            vec!["metadata".to_string(), "metadata_fingerprint".to_string()]
        )));
    }

    #[test]
    fn test_machine_type_change_rejected() {
        let backend = backend();
        apply(&backend, &graph(instance()));

        let report = apply(&backend, &graph(instance().with_machine_type("e2-standard-8")));
        let Some(NodeStatus::Failed { reason, category }) = report.status(&key()) else {
            panic!("expected failure: {report:?}");
        };
        assert_eq!(*category, ErrorCategory::Configuration);
        assert!(reason.contains("machine_type"));
        assert!(
            !backend
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Update(k, _) if *k == key()))
        );
    }

    #[test]
    fn test_unassigned_ip_fails() {
        // no hook: the address is created without an IP
        let backend = MemoryBackend::new();
        let report = apply(&backend, &graph(instance()));
        let Some(NodeStatus::Failed { reason, .. }) = report.status(&key()) else {
            panic!("expected failure: {report:?}");
        };
        assert!(reason.contains("has not yet been created"));
    }

    #[test]
    fn test_terraform_block_references_other_blocks() {
        let target = TerraformTarget::new("out");
        let expected = instance().in_subnet(Some("nodes"));
        let changes = Changes::compute(None, &expected);
        Instance::render_terraform(&target, None, &expected, &changes).unwrap();

        let block = target.resource("google_compute_instance", "master").unwrap();
        let interface = &block["network_interface"][0];
        assert_eq!(
            interface["access_config"][0]["nat_ip"],
            "${google_compute_address.master-ip.address}"
        );
        assert_eq!(
            interface["network"],
            "${google_compute_network.default.self_link}"
        );
        assert_eq!(
            interface["subnetwork"],
            "${google_compute_subnetwork.nodes.self_link}"
        );
        assert_eq!(
            block["disk"][1]["disk"],
            "${google_compute_disk.etcd-main.self_link}"
        );
        assert_eq!(
            block["service_account"][0]["email"],
            "${google_service_account.control-plane.email}"
        );
        assert_eq!(block["machine_type"], "e2-standard-2");
        assert_eq!(block["disk"][0]["device_name"], BOOT_DEVICE);
        assert_eq!(
            block["service_account"][0]["scopes"][1],
            "https://www.googleapis.com/auth/compute"
        );
        assert_eq!(block["scheduling"]["on_host_maintenance"], "MIGRATE");
    }

    #[test]
    fn test_terraform_run_writes_linked_blocks() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = Target::Terraform(TerraformTarget::new(dir.path()));
        let report = execute_simple(&graph(instance()), &target).unwrap();
        assert!(report.is_success(), "{report:?}");

        let written =
            std::fs::read_to_string(dir.path().join(declarative::TERRAFORM_FILE)).unwrap();
        let parsed: Value = serde_json::from_str(&written).unwrap();
        let resources = &parsed["resource"];
        assert_eq!(resources["google_compute_network"]["default"]["name"], "default");
        assert_eq!(
            resources["google_compute_instance"]["master"]["network_interface"][0]["network"],
            "${google_compute_network.default.self_link}"
        );
        assert_eq!(
            resources["google_compute_disk"]["etcd-main"]["zone"],
            "us-central1-a"
        );
    }
}
