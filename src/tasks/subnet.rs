use super::{Network, network_url, observed_name};
use declarative::{
    Changes, Client, Delta, Error, Field, Lifecycle, Record, Reference, RenderApi,
    RenderTerraform, Renderers, Resolve, Result, Task, TaskKey, TerraformTarget,
};
use serde_json::json;

const TERRAFORM_TYPE: &str = "google_compute_subnetwork";

/// A regional subnetwork of a declared [`Network`]
#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    pub name: String,
    pub project: String,
    pub lifecycle: Lifecycle,
    /// Name of the owning network task
    pub network: Field<String>,
    pub region: Field<String>,
    pub cidr: Field<String>,
}

impl Subnet {
    pub fn new(project: &str, name: &str, network: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            lifecycle: Lifecycle::Sync,
            network: Field::Value(network.to_string()),
            region: Field::Unknown,
            cidr: Field::Unknown,
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Field::Value(region.to_string());
        self
    }

    pub fn with_cidr(mut self, cidr: &str) -> Self {
        self.cidr = Field::Value(cidr.to_string());
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn self_link_reference(name: &str) -> Reference {
        Reference::new(TaskKey::new(Self::KIND, name), TERRAFORM_TYPE, "self_link")
    }
}

impl Task for Subnet {
    const KIND: &'static str = "Subnet";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.network
            .value()
            .map(|network| TaskKey::new(Network::KIND, network.as_str()))
            .into_iter()
            .collect()
    }

    fn find(&self, client: &Client<'_>) -> Result<Option<Self>> {
        let Some(record) = client.find(&self.key())? else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: self.name.clone(),
            project: self.project.clone(),
            lifecycle: self.lifecycle,
            network: observed_name(&record, "network"),
            region: observed_name(&record, "region"),
            cidr: record.field("ip_cidr_range")?,
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            project: expected.project.clone(),
            lifecycle: expected.lifecycle,
            network: delta.field("network", &actual.network, &expected.network),
            region: delta.field("region", &actual.region, &expected.region),
            cidr: delta.field("cidr", &actual.cidr, &expected.cidr),
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
        // the range may be widened in place; everything else is fixed
        if let Some(field) = changes.fields_except(&["cidr"]).next() {
            return Err(Error::DisallowedChange {
                key: expected.key(),
                field: field.to_string(),
                reason: "only the range of a subnet can change".to_string(),
            });
        }
        Ok(())
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().with_api().with_terraform()
    }
}

impl RenderApi for Subnet {
    fn render_api(
        client: &Client<'_>,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let mut record = Record::new();
        record.set_field("ip_cidr_range", &changes.value.cidr)?;

        if actual.is_some() {
            client.update_and_wait(&expected.key(), record)?;
            return Ok(());
        }

        if let Some(network) = expected.network.value() {
            record.set("network", network_url(&expected.project, network));
        }
        record.set_field("region", &expected.region)?;
        client.create_and_wait(&expected.key(), record)?;
        Ok(())
    }
}

impl RenderTerraform for Subnet {
    fn render_terraform(
        target: &TerraformTarget,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let mut block = json!({
            "name": expected.name,
            "project": expected.project,
        });
        if let Some(network) = expected.network.value() {
            block["network"] = target
                .resolve(&Network::self_link_reference(network))?
                .into();
        }
        if let Some(region) = expected.region.value() {
            block["region"] = region.as_str().into();
        }
        if let Some(cidr) = expected.cidr.value() {
            block["ip_cidr_range"] = cidr.as_str().into();
        }
        target.render_resource(TERRAFORM_TYPE, &expected.name, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::backend::Call;
    use declarative::{ApiTarget, MemoryBackend, NodeStatus, Target, TaskSet, execute_simple};
    use std::sync::Arc;

    fn apply(backend: &MemoryBackend, subnet: Subnet) -> declarative::RunReport {
        let mut tasks = TaskSet::new();
        tasks.add(Network::new("p", "net-1")).unwrap();
        tasks.add(subnet).unwrap();
        let graph = tasks.build().unwrap();
        let target = Target::Api(ApiTarget::new(Arc::new(backend.clone())));
        execute_simple(&graph, &target).unwrap()
    }

    fn subnet() -> Subnet {
        Subnet::new("p", "nodes", "net-1")
            .with_region("us-central1")
            .with_cidr("10.0.16.0/20")
    }

    #[test]
    fn test_created_after_network() {
        let backend = MemoryBackend::new();
        let report = apply(&backend, subnet());
        assert!(report.is_success());

        let network_commit = backend
            .position(&Call::Commit(TaskKey::new("Network", "net-1")))
            .unwrap();
        let subnet_create = backend
            .position(&Call::Create(TaskKey::new("Subnet", "nodes")))
            .unwrap();
        assert!(network_commit < subnet_create);

        let report = apply(&backend, subnet());
        assert_eq!(
            report.status(&TaskKey::new("Subnet", "nodes")),
            Some(&NodeStatus::Unchanged)
        );
    }

    #[test]
    fn test_range_update_allowed_region_change_rejected() {
        let backend = MemoryBackend::new();
        apply(&backend, subnet());

        let report = apply(&backend, subnet().with_cidr("10.0.0.0/16"));
        assert_eq!(
            report.status(&TaskKey::new("Subnet", "nodes")),
            Some(&NodeStatus::Updated {
                fields: vec!["cidr".to_string()]
            })
        );

        let report = apply(&backend, subnet().with_region("europe-west1"));
        assert!(matches!(
            report.status(&TaskKey::new("Subnet", "nodes")),
            Some(NodeStatus::Failed { .. })
        ));
    }

    #[test]
    fn test_terraform_block_references_network() {
        let target = TerraformTarget::new("out");
        let expected = Subnet::new("p", "sub-1", "net.main").with_region("us-central1");
        let changes = Changes::compute(None, &expected);
        Subnet::render_terraform(&target, None, &expected, &changes).unwrap();

        let block = target.resource("google_compute_subnetwork", "sub-1").unwrap();
        assert_eq!(block["network"], "${google_compute_network.net-main.self_link}");
        assert_eq!(block["region"], "us-central1");
    }
}
