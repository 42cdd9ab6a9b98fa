//! Small task types used by the engine's own tests.

use crate::backend::{Client, Record};
use crate::diff::{Changes, Delta};
use crate::error::Result;
use crate::field::{Computed, Field};
use crate::target::{Reference, RenderApi, RenderTerraform, Renderers, Resolve, TerraformTarget};
use crate::task::Task;
use crate::types::{Lifecycle, TaskKey};
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub name: String,
    pub cidr: Field<String>,
    pub lifecycle: Lifecycle,
    pub after: Vec<String>,
}

impl Network {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cidr: Field::Unknown,
            lifecycle: Lifecycle::Sync,
            after: Vec::new(),
        }
    }

    pub fn with_cidr(mut self, cidr: &str) -> Self {
        self.cidr = Field::Value(cidr.to_string());
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn after(mut self, network: &str) -> Self {
        self.after.push(network.to_string());
        self
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

    fn dependencies(&self) -> Vec<TaskKey> {
        self.after
            .iter()
            .map(|name| TaskKey::new(Self::KIND, name.as_str()))
            .collect()
    }

    fn find(&self, client: &Client<'_>) -> Result<Option<Self>> {
        let Some(record) = client.find(&self.key())? else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: self.name.clone(),
            cidr: record.field("cidr")?,
            lifecycle: self.lifecycle,
            after: self.after.clone(),
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            cidr: delta.field("cidr", &actual.cidr, &expected.cidr),
            lifecycle: expected.lifecycle,
            after: expected.after.clone(),
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
        if actual.is_none() {
            record.set("self_link", format!("networks/{}", expected.name));
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
        let mut block = Record::new().with("name", expected.name.as_str());
        block.set_field("cidr", &expected.cidr)?;
        target.render_resource("test_network", &expected.name, block.into_value())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    pub network: Field<String>,
    pub machine_type: Field<String>,
    pub after: Vec<String>,
    pub fingerprint: Computed<String>,
}

impl Instance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            network: Field::Unknown,
            machine_type: Field::Unknown,
            after: Vec::new(),
            fingerprint: Computed::new(),
        }
    }

    pub fn on_network(mut self, network: &str) -> Self {
        self.network = Field::Value(network.to_string());
        self
    }

    pub fn with_machine_type(mut self, machine_type: &str) -> Self {
        self.machine_type = Field::Value(machine_type.to_string());
        self
    }

    pub fn after(mut self, instance: &str) -> Self {
        self.after.push(instance.to_string());
        self
    }

    fn network_link(&self, resolver: &dyn Resolve) -> Result<Option<String>> {
        match self.network.value() {
            Some(network) => {
                let reference = Reference::new(
                    TaskKey::new(Network::KIND, network.as_str()),
                    "test_network",
                    "self_link",
                );
                resolver.resolve(&reference).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Task for Instance {
    const KIND: &'static str = "Instance";

    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps: Vec<TaskKey> = self
            .network
            .value()
            .map(|n| TaskKey::new(Network::KIND, n.as_str()))
            .into_iter()
            .collect();
        deps.extend(self.after.iter().map(|n| TaskKey::new(Self::KIND, n.as_str())));
        deps
    }

    fn find(&self, client: &Client<'_>) -> Result<Option<Self>> {
        let Some(record) = client.find(&self.key())? else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: self.name.clone(),
            network: record.field("network")?,
            machine_type: record.field("machine_type")?,
            after: self.after.clone(),
            fingerprint: Computed::new(),
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            network: delta.field("network", &actual.network, &expected.network),
            machine_type: delta.field(
                "machine_type",
                &actual.machine_type,
                &expected.machine_type,
            ),
            after: expected.after.clone(),
            fingerprint: Computed::new(),
        }
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
        let mut record = Record::new();
        record.set_field("network", &changes.value.network)?;
        record.set_field("machine_type", &changes.value.machine_type)?;
        if actual.is_some() {
            client.update_and_wait(&expected.key(), record)?;
            return Ok(());
        }

        if let Some(link) = expected.network_link(client)? {
            record.set("network_link", link);
        }
        client.create_and_wait(&expected.key(), record)?;
        expected
            .fingerprint
            .set("fingerprint", format!("fp-{}", expected.name))
    }
}

impl RenderTerraform for Instance {
    fn render_terraform(
        target: &TerraformTarget,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let mut block = json!({ "name": expected.name });
        if let Some(link) = expected.network_link(target)? {
            block["network"] = link.into();
        }
        target.render_resource("test_instance", &expected.name, block)
    }
}

/// A task that only supports the live target
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub name: String,
}

impl Bucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Task for Bucket {
    const KIND: &'static str = "Bucket";

    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, client: &Client<'_>) -> Result<Option<Self>> {
        Ok(client.find(&self.key())?.map(|_| self.clone()))
    }

    fn diff(_actual: &Self, expected: &Self, _delta: &mut Delta) -> Self {
        expected.clone()
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().with_api()
    }
}

impl RenderApi for Bucket {
    fn render_api(
        client: &Client<'_>,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        client.create_and_wait(&expected.key(), Record::new())?;
        Ok(())
    }
}
