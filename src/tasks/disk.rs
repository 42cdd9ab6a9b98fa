use declarative::{
    Changes, Client, Delta, Error, Field, Lifecycle, Record, Reference, RenderApi,
    RenderTerraform, Renderers, Result, Task, TaskKey, TerraformTarget,
};
use serde_json::json;

const TERRAFORM_TYPE: &str = "google_compute_disk";

/// A zonal persistent disk
#[derive(Debug, Clone, PartialEq)]
pub struct Disk {
    pub name: String,
    pub lifecycle: Lifecycle,
    pub zone: Field<String>,
    pub size_gb: Field<u64>,
    /// `pd-standard`, `pd-ssd`, ...
    pub disk_type: Field<String>,
}

impl Disk {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lifecycle: Lifecycle::Sync,
            zone: Field::Unknown,
            size_gb: Field::Unknown,
            disk_type: Field::Unknown,
        }
    }

    pub fn with_zone(mut self, zone: &str) -> Self {
        self.zone = Field::Value(zone.to_string());
        self
    }

    pub fn with_size_gb(mut self, size_gb: Option<u64>) -> Self {
        self.size_gb = Field::declared(size_gb);
        self
    }

    pub fn with_disk_type(mut self, disk_type: Option<&str>) -> Self {
        self.disk_type = Field::declared(disk_type.map(str::to_string));
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

impl Task for Disk {
    const KIND: &'static str = "Disk";

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
            zone: record.field("zone")?,
            size_gb: record.field("size_gb")?,
            disk_type: record.field("type")?,
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            lifecycle: expected.lifecycle,
            zone: delta.field("zone", &actual.zone, &expected.zone),
            size_gb: delta.field("size_gb", &actual.size_gb, &expected.size_gb),
            disk_type: delta.field("disk_type", &actual.disk_type, &expected.disk_type),
        }
    }

    /// Disks can grow in place. Shrinking, retyping or moving one cannot be
    /// done without losing its data.
    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let Some(actual) = actual else {
            return Ok(());
        };
        let disallowed = |field: &str, reason: String| Error::DisallowedChange {
            key: expected.key(),
            field: field.to_string(),
            reason,
        };

        if let Some(field) = changes.fields_except(&["size_gb"]).next() {
            return Err(disallowed(field, "disks cannot be retyped or moved".to_string()));
        }
        if let (Field::Value(current), Field::Value(wanted)) = (&actual.size_gb, &expected.size_gb)
            && wanted < current
        {
            return Err(disallowed(
                "size_gb",
                format!("cannot shrink from {current}GB to {wanted}GB"),
            ));
        }
        Ok(())
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().with_api().with_terraform()
    }
}

impl RenderApi for Disk {
    fn render_api(
        client: &Client<'_>,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let mut record = Record::new();
        record.set_field("size_gb", &changes.value.size_gb)?;
        if actual.is_some() {
            client.update_and_wait(&expected.key(), record)?;
        } else {
            record.set_field("zone", &expected.zone)?;
            record.set_field("type", &expected.disk_type)?;
            client.create_and_wait(&expected.key(), record)?;
        }
        Ok(())
    }
}

impl RenderTerraform for Disk {
    fn render_terraform(
        target: &TerraformTarget,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let mut block = json!({ "name": expected.name });
        if let Some(zone) = expected.zone.value() {
            block["zone"] = zone.as_str().into();
        }
        if let Some(size) = expected.size_gb.value() {
            block["size"] = (*size).into();
        }
        if let Some(disk_type) = expected.disk_type.value() {
            block["type"] = disk_type.as_str().into();
        }
        target.render_resource(TERRAFORM_TYPE, &expected.name, block)
    }
}
