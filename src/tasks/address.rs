use declarative::{
    Changes, Client, Delta, Error, Field, Lifecycle, Record, Reference, RenderApi,
    RenderTerraform, Renderers, Result, Task, TaskKey, TerraformTarget,
};
use serde_json::json;

/// Terraform type of an address, also used for symbolic references to it
pub(crate) const TERRAFORM_TYPE: &str = "google_compute_address";

/// A reserved static external IP
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub name: String,
    pub lifecycle: Lifecycle,
    pub region: Field<String>,
    /// The IP itself; assigned by the provider unless requested
    pub ip_address: Field<String>,
}

impl Address {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lifecycle: Lifecycle::Sync,
            region: Field::Unknown,
            ip_address: Field::Unknown,
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Field::Value(region.to_string());
        self
    }

    pub fn with_ip_address(mut self, ip: Option<&str>) -> Self {
        self.ip_address = Field::declared(ip.map(str::to_string));
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Reference to the assigned IP of the address named `name`
    pub fn ip_reference(name: &str) -> Reference {
        Reference::new(TaskKey::new(Self::KIND, name), TERRAFORM_TYPE, "address")
    }
}

impl Task for Address {
    const KIND: &'static str = "Address";

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
            lifecycle: self.lifecycle,
            region: record.field("region")?,
            ip_address: record.field("address")?,
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            lifecycle: expected.lifecycle,
            region: delta.field("region", &actual.region, &expected.region),
            ip_address: delta.field("ip_address", &actual.ip_address, &expected.ip_address),
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
                reason: "a reserved address cannot be moved; release it first".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().with_api().with_terraform()
    }
}

impl RenderApi for Address {
    fn render_api(
        client: &Client<'_>,
        _actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let mut record = Record::new();
        record.set_field("region", &changes.value.region)?;
        record.set_field("address", &changes.value.ip_address)?;
        client.create_and_wait(&expected.key(), record)?;
        Ok(())
    }
}

impl RenderTerraform for Address {
    fn render_terraform(
        target: &TerraformTarget,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let mut block = json!({ "name": expected.name });
        if let Some(region) = expected.region.value() {
            block["region"] = region.as_str().into();
        }
        if let Some(ip) = expected.ip_address.value() {
            block["address"] = ip.as_str().into();
        }
        target.render_resource(TERRAFORM_TYPE, &expected.name, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{
        ApiTarget, MemoryBackend, NodeStatus, Resolve, Target, TaskSet, execute_simple,
    };
    use std::sync::Arc;

    #[test]
    fn test_assigned_ip_is_not_a_change() {
        let backend = MemoryBackend::new().on_create(|key, record| {
            if key.kind == "Address" {
                record.set("address", "203.0.113.7");
            }
        });
        let target = Target::Api(ApiTarget::new(Arc::new(backend.clone())));

        for expected in [NodeStatus::Created, NodeStatus::Unchanged] {
            let mut tasks = TaskSet::new();
            tasks
                .add(Address::new("master").with_region("us-central1"))
                .unwrap();
            let report = execute_simple(&tasks.build().unwrap(), &target).unwrap();
            assert_eq!(report.outcomes[0].status, expected);
        }
    }

    #[test]
    fn test_symbolic_reference() {
        let target = TerraformTarget::new("out");
        assert_eq!(
            target.resolve(&Address::ip_reference("master.example")).unwrap(),
            "${google_compute_address.master-example.address}"
        );
    }

    #[test]
    fn test_names_that_sanitise_alike_fail_terraform_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = Target::Terraform(TerraformTarget::new(dir.path()));
        let mut tasks = TaskSet::new();
        tasks.add(Address::new("master.example.com")).unwrap();
        tasks.add(Address::new("master-example-com")).unwrap();
        let graph = tasks.build().unwrap();

        let Err(Error::NameCollision { name, tasks }) = execute_simple(&graph, &target) else {
            panic!("expected a name collision");
        };
        assert_eq!(name, "master-example-com");
        assert_eq!(tasks.len(), 2);
        assert!(!dir.path().join(declarative::TERRAFORM_FILE).exists());
    }
}
