//! Cluster declaration file (`cluster.toml`)
//!
//! The file lists the infrastructure of one cluster. It is deserialized as-is
//! and checked for the mistakes that would otherwise surface late: empty
//! names, duplicates, missing location settings and an incomplete issuer
//! discovery setup. References between resources are checked later by the
//! graph builder.

use anyhow::{Context, Result, bail};
use declarative::Lifecycle;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub name: String,
    pub project: String,
    pub region: String,
    pub zone: String,

    /// Issuer URL placed in service account tokens
    #[serde(default)]
    pub service_account_issuer: Option<String>,
    /// Store the OIDC discovery documents are published to
    /// (`gs://bucket/prefix`, `s3://bucket/prefix`, `memfs://name` or a local path)
    #[serde(default)]
    pub discovery_store: Option<String>,
    /// Service account keyset file, relative to the cluster file
    #[serde(default)]
    pub service_account_keyset: Option<String>,

    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
    #[serde(default)]
    pub addresses: Vec<AddressSpec>,
    #[serde(default)]
    pub disks: Vec<DiskSpec>,
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountSpec>,
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub auto_create_subnetworks: Option<bool>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetSpec {
    pub name: String,
    pub network: String,
    pub cidr: String,
    /// Defaults to the cluster region
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddressSpec {
    pub name: String,
    /// Request a specific IP; otherwise one is assigned
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskSpec {
    pub name: String,
    #[serde(default)]
    pub size_gb: Option<u64>,
    #[serde(default)]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceAccountSpec {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSpec {
    pub name: String,
    pub machine_type: String,
    /// `name` or `project/name`
    pub image: String,
    pub network: String,
    #[serde(default)]
    pub subnet: Option<String>,
    /// Name of a declared address to use as the external IP
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Device name to declared disk name
    #[serde(default)]
    pub disks: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub preemptible: bool,
    #[serde(default)]
    pub can_ip_forward: bool,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl ClusterConfig {
    /// Load and validate a cluster file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid cluster file {}", path.display()))?;
        log::debug!(
            "Loaded cluster '{}' from {} ({} instances)",
            config.name,
            path.display(),
            config.instances.len()
        );
        Ok(config)
    }

    /// Parse and validate TOML content
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check for obviously invalid declarations
    pub fn validate(&self) -> Result<()> {
        for (setting, value) in [
            ("name", &self.name),
            ("project", &self.project),
            ("region", &self.region),
            ("zone", &self.zone),
        ] {
            if value.trim().is_empty() {
                bail!("'{setting}' must not be empty");
            }
        }

        check_names("network", self.networks.iter().map(|n| n.name.as_str()))?;
        check_names("subnet", self.subnets.iter().map(|s| s.name.as_str()))?;
        check_names("address", self.addresses.iter().map(|a| a.name.as_str()))?;
        check_names("disk", self.disks.iter().map(|d| d.name.as_str()))?;
        check_names(
            "service account",
            self.service_accounts.iter().map(|s| s.name.as_str()),
        )?;
        check_names("instance", self.instances.iter().map(|i| i.name.as_str()))?;

        for instance in &self.instances {
            if instance.machine_type.trim().is_empty() {
                bail!("instance '{}' has no machine_type", instance.name);
            }
            if instance.image.split('/').count() > 2 {
                bail!(
                    "instance '{}': cannot parse image '{}' (expected name or project/name)",
                    instance.name,
                    instance.image
                );
            }
        }

        match (&self.service_account_issuer, &self.discovery_store) {
            (None, Some(_)) => bail!("discovery_store requires service_account_issuer"),
            (Some(issuer), Some(_)) => {
                if !issuer.starts_with("https://") {
                    bail!("service_account_issuer must be an https URL, got '{issuer}'");
                }
                if self.service_account_keyset.is_none() {
                    bail!("discovery_store requires service_account_keyset");
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Whether the OIDC issuer discovery documents should be published
    pub fn publishes_discovery(&self) -> bool {
        self.service_account_issuer.is_some() && self.discovery_store.is_some()
    }

    /// Keyset file, resolved against the directory of the cluster file
    pub fn keyset_path(&self, cluster_file: &Path) -> Option<PathBuf> {
        let base = cluster_file.parent().unwrap_or_else(|| Path::new("."));
        self.service_account_keyset
            .as_deref()
            .map(|path| crate::paths::resolve_relative(base, path))
    }
}

fn check_names<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            bail!("{what} with an empty name");
        }
        if !seen.insert(name) {
            bail!("{what} '{name}' is declared twice");
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
