use super::network_url;
use declarative::{
    Changes, Client, Delta, Error, Field, Lifecycle, Record, Reference, RenderApi,
    RenderTerraform, Renderers, Result, Task, TaskKey, TerraformTarget,
};
use serde_json::json;

const TERRAFORM_TYPE: &str = "google_compute_network";

/// A VPC network
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub name: String,
    pub project: String,
    pub lifecycle: Lifecycle,
    /// Legacy network range
    pub cidr: Field<String>,
    pub auto_create_subnetworks: Field<bool>,
}

impl Network {
    pub fn new(project: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            lifecycle: Lifecycle::Sync,
            cidr: Field::Unknown,
            auto_create_subnetworks: Field::Unknown,
        }
    }

    pub fn with_cidr(mut self, cidr: Option<&str>) -> Self {
        self.cidr = Field::declared(cidr.map(str::to_string));
        self
    }

    pub fn with_auto_create_subnetworks(mut self, auto: Option<bool>) -> Self {
        self.auto_create_subnetworks = Field::declared(auto);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Reference to the self link of the network named `name`
    pub fn self_link_reference(name: &str) -> Reference {
        Reference::new(TaskKey::new(Self::KIND, name), TERRAFORM_TYPE, "self_link")
    }
}

impl Task for Network {
    const KIND: &'static str = "Network";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn find(&self, client: &Client<'_>) -> Result<Option<Self>> {
        let Some(record) = client.find(&self.key())? else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: self.name.clone(),
            project: self.project.clone(),
            lifecycle: self.lifecycle,
            cidr: record.field("cidr")?,
            auto_create_subnetworks: record.field("auto_create_subnetworks")?,
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            project: expected.project.clone(),
            lifecycle: expected.lifecycle,
            cidr: delta.field("cidr", &actual.cidr, &expected.cidr),
            auto_create_subnetworks: delta.field(
                "auto_create_subnetworks",
                &actual.auto_create_subnetworks,
                &expected.auto_create_subnetworks,
            ),
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
        match changes.fields().first() {
            Some(field) => Err(Error::DisallowedChange {
                key: expected.key(),
                field: (*field).to_string(),
                reason: "networks cannot be modified after creation".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().with_api().with_terraform()
    }
}

impl RenderApi for Network {
    fn render_api(
        client: &Client<'_>,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let mut record = Record::new();
        record.set_field("cidr", &changes.value.cidr)?;
        record.set_field(
            "auto_create_subnetworks",
            &changes.value.auto_create_subnetworks,
        )?;

        if actual.is_none() {
            record.set("self_link", network_url(&expected.project, &expected.name));
            client.create_and_wait(&expected.key(), record)?;
        } else {
            client.update_and_wait(&expected.key(), record)?;
        }
        Ok(())
    }
}

impl RenderTerraform for Network {
    fn render_terraform(
        target: &TerraformTarget,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        // terraform creates subnetworks unless told otherwise
        let auto_create = expected
            .auto_create_subnetworks
            .value()
            .copied()
            .unwrap_or(false);
        let mut block = json!({
            "name": expected.name,
            "project": expected.project,
            "auto_create_subnetworks": auto_create,
        });
        if let Some(cidr) = expected.cidr.value() {
            block["ipv4_range"] = cidr.as_str().into();
        }
        target.render_resource(TERRAFORM_TYPE, &expected.name, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{
        ApiTarget, ErrorCategory, MemoryBackend, NodeStatus, Target, TaskKey, TaskSet,
        execute_simple,
    };
    use std::sync::Arc;

    fn api(backend: &MemoryBackend) -> Target {
        Target::Api(ApiTarget::new(Arc::new(backend.clone())))
    }

    fn run(backend: &MemoryBackend, network: Network) -> NodeStatus {
        let mut tasks = TaskSet::new();
        tasks.add(network).unwrap();
        let graph = tasks.build().unwrap();
        let report = execute_simple(&graph, &api(backend)).unwrap();
        report.outcomes[0].status.clone()
    }

    #[test]
    fn test_create_then_unchanged() {
        let backend = MemoryBackend::new();
        let network = Network::new("p", "net-1").with_auto_create_subnetworks(Some(false));

        assert_eq!(run(&backend, network.clone()), NodeStatus::Created);
        let record = backend.record(&TaskKey::new("Network", "net-1")).unwrap();
        assert_eq!(
            record.get_str("self_link"),
            Some("https://www.googleapis.com/compute/v1/projects/p/global/networks/net-1")
        );

        assert_eq!(run(&backend, network), NodeStatus::Unchanged);
        assert_eq!(backend.mutation_count(), 1);
    }

    #[test]
    fn test_cidr_change_rejected() {
        let backend = MemoryBackend::new();
        backend.insert(
            TaskKey::new("Network", "net-1"),
            Record::new().with("cidr", "10.0.0.0/16"),
        );

        let status = run(
            &backend,
            Network::new("p", "net-1").with_cidr(Some("10.9.0.0/16")),
        );
        let NodeStatus::Failed { reason, category } = status else {
            panic!("expected failure, got {status:?}");
        };
        assert_eq!(category, ErrorCategory::Configuration);
        assert!(reason.contains("cidr"));
        assert_eq!(backend.mutation_count(), 0);
    }

    #[test]
    fn test_terraform_block() {
        let target = TerraformTarget::new("out");
        let network = Network::new("p", "net-1").with_cidr(Some("10.0.0.0/16"));
        let changes = Changes::compute(None, &network);
        Network::render_terraform(&target, None, &network, &changes).unwrap();

        let block = target.resource("google_compute_network", "net-1").unwrap();
        assert_eq!(block["ipv4_range"], "10.0.0.0/16");
        assert_eq!(block["auto_create_subnetworks"], false);
    }
}
