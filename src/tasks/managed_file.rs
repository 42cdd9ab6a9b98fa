use anyhow::{Context, bail};
use declarative::{
    Changes, Client, Delta, Field, Lifecycle, Record, RenderApi, RenderTerraform, Renderers,
    Result, Task, TerraformTarget,
};
use serde_json::json;

/// A file in the cluster's object store, addressed by its path under the
/// store location.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedFile {
    /// Path under [`Self::base`], e.g. `openid/v1/jwks`
    pub name: String,
    /// Store location, e.g. `gs://bucket/prefix`
    pub base: String,
    pub lifecycle: Lifecycle,
    pub contents: Field<String>,
    /// Grant anonymous read on the object itself
    pub public_acl: Field<bool>,
}

impl ManagedFile {
    pub fn new(base: &str, location: &str, contents: impl Into<String>) -> Self {
        Self {
            name: location.to_string(),
            base: base.to_string(),
            lifecycle: Lifecycle::Sync,
            contents: Field::Value(contents.into()),
            public_acl: Field::Unknown,
        }
    }

    pub fn with_public_acl(mut self, public_acl: Field<bool>) -> Self {
        self.public_acl = public_acl;
        self
    }

    /// Bucket and full object name, for `gs://` locations
    fn bucket_object(&self) -> anyhow::Result<(String, String)> {
        let Some(rest) = self.base.strip_prefix("gs://") else {
            bail!(
                "{}: only gs:// locations can be rendered as terraform, got {:?}",
                self.name,
                self.base
            );
        };
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            bail!("{}: no bucket in {:?}", self.name, self.base);
        }
        let prefix = prefix.trim_matches('/');
        let object = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{prefix}/{}", self.name)
        };
        Ok((bucket.to_string(), object))
    }
}

impl Task for ManagedFile {
    const KIND: &'static str = "ManagedFile";

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
            base: self.base.clone(),
            lifecycle: self.lifecycle,
            contents: record.field("contents")?,
            public_acl: record.field("public_acl")?,
        }))
    }

    fn diff(actual: &Self, expected: &Self, delta: &mut Delta) -> Self {
        Self {
            name: expected.name.clone(),
            base: expected.base.clone(),
            lifecycle: expected.lifecycle,
            contents: delta.field("contents", &actual.contents, &expected.contents),
            public_acl: delta.field("public_acl", &actual.public_acl, &expected.public_acl),
        }
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().with_api().with_terraform()
    }
}

impl RenderApi for ManagedFile {
    fn render_api(
        client: &Client<'_>,
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let mut record = Record::new();
        record.set_field("contents", &changes.value.contents)?;
        record.set_field("public_acl", &changes.value.public_acl)?;
        if actual.is_some() {
            client.update_and_wait(&expected.key(), record)?;
        } else {
            client.create_and_wait(&expected.key(), record)?;
        }
        Ok(())
    }
}

impl RenderTerraform for ManagedFile {
    fn render_terraform(
        target: &TerraformTarget,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let (bucket, object) = expected
            .bucket_object()
            .with_context(|| format!("rendering {}", expected.key()))?;
        let resource_name = format!("file-{}", expected.name);

        let mut block = json!({ "bucket": bucket, "name": object });
        if let Some(contents) = expected.contents.value() {
            block["content"] = contents.as_str().into();
        }
        target.render_resource("google_storage_bucket_object", &resource_name, block)?;

        if expected.public_acl.value().copied().unwrap_or(false) {
            target.render_resource(
                "google_storage_object_acl",
                &resource_name,
                json!({
                    "bucket": bucket,
                    "object": object,
                    "role_entity": ["READER:allUsers"],
                }),
            )?;
        }
        Ok(())
    }
}
