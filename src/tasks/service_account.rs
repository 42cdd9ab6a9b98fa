use declarative::{
    Changes, Client, Delta, Field, Lifecycle, Record, Reference, RenderApi, RenderTerraform,
    Renderers, Result, Task, TaskKey, TerraformTarget,
};
use serde_json::json;

const TERRAFORM_TYPE: &str = "google_service_account";

/// Email of the service account `account_id` in `project`
pub fn service_account_email(project: &str, account_id: &str) -> String {
    format!("{account_id}@{project}.iam.gserviceaccount.com")
}

/// An IAM service account, attached to instances
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceAccount {
    /// Account id, the part of the email before `@`
    pub name: String,
    pub project: String,
    pub lifecycle: Lifecycle,
    pub display_name: Field<String>,
    pub description: Field<String>,
}

impl ServiceAccount {
    pub fn new(project: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            lifecycle: Lifecycle::Sync,
            display_name: Field::Unknown,
            description: Field::Unknown,
        }
    }

    pub fn with_display_name(mut self, display_name: Option<&str>) -> Self {
        self.display_name = Field::declared(display_name.map(str::to_string));
        self
    }

    pub fn with_description(mut self, description: Option<&str>) -> Self {
        self.description = Field::declared(description.map(str::to_string));
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn email(&self) -> String {
        service_account_email(&self.project, &self.name)
    }

    /// Reference to the email of the account named `name`
    pub fn email_reference(name: &str) -> Reference {
        Reference::new(TaskKey::new(Self::KIND, name), TERRAFORM_TYPE, "email")
    }
}

impl Task for ServiceAccount {
    const KIND: &'static str = "ServiceAccount";

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
            display_name: record.field("display_name")?,
            description: record.field("description")?,
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            project: expected.project.clone(),
            lifecycle: expected.lifecycle,
            display_name: delta.field("display_name", &actual.display_name, &expected.display_name),
            description: delta.field("description", &actual.description, &expected.description),
        }
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().with_api().with_terraform()
    }
}

impl RenderApi for ServiceAccount {
    fn render_api(
        client: &Client<'_>,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let mut record = Record::new();
        record.set_field("display_name", &changes.value.display_name)?;
        record.set_field("description", &changes.value.description)?;
        if actual.is_some() {
            client.update_and_wait(&expected.key(), record)?;
        } else {
            record.set("email", expected.email());
            client.create_and_wait(&expected.key(), record)?;
        }
        Ok(())
    }
}

impl RenderTerraform for ServiceAccount {
    fn render_terraform(
        target: &TerraformTarget,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let mut block = json!({
            "account_id": expected.name,
            "project": expected.project,
        });
        if let Some(display_name) = expected.display_name.value() {
            block["display_name"] = display_name.as_str().into();
        }
        if let Some(description) = expected.description.value() {
            block["description"] = description.as_str().into();
        }
        target.render_resource(TERRAFORM_TYPE, &expected.name, block)
    }
}
