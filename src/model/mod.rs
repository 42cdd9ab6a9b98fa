//! Declaration stage: cluster file to task set
//!
//! Each builder adds the tasks for one part of the cluster. Defaults (region,
//! zone) are filled in here so tasks always carry concrete values; references
//! between resources stay names and are checked when the graph is built.

mod issuer_discovery;

pub use issuer_discovery::IssuerDiscoveryBuilder;

use crate::config::ClusterConfig;
use crate::tasks::{Address, Disk, Instance, Network, ServiceAccount, Subnet};
use anyhow::{Context, Result};
use declarative::TaskSet;

/// Adds the tasks for one part of the cluster
pub trait ModelBuilder {
    fn build(&self, tasks: &mut TaskSet) -> Result<()>;
}

/// Networks, addresses, disks, service accounts and instances
pub struct InfrastructureBuilder<'a> {
    pub config: &'a ClusterConfig,
}

impl ModelBuilder for InfrastructureBuilder<'_> {
    fn build(&self, tasks: &mut TaskSet) -> Result<()> {
        let config = self.config;
        let project = config.project.as_str();

        for spec in &config.networks {
            tasks.add(
                Network::new(project, &spec.name)
                    .with_cidr(spec.cidr.as_deref())
                    .with_auto_create_subnetworks(spec.auto_create_subnetworks)
                    .with_lifecycle(spec.lifecycle),
            )?;
        }

        for spec in &config.subnets {
            tasks.add(
                Subnet::new(project, &spec.name, &spec.network)
                    .with_region(spec.region.as_deref().unwrap_or(&config.region))
                    .with_cidr(&spec.cidr)
                    .with_lifecycle(spec.lifecycle),
            )?;
        }

        for spec in &config.addresses {
            tasks.add(
                Address::new(&spec.name)
                    .with_region(spec.region.as_deref().unwrap_or(&config.region))
                    .with_ip_address(spec.address.as_deref())
                    .with_lifecycle(spec.lifecycle),
            )?;
        }

        for spec in &config.disks {
            tasks.add(
                Disk::new(&spec.name)
                    .with_zone(spec.zone.as_deref().unwrap_or(&config.zone))
                    .with_size_gb(spec.size_gb)
                    .with_disk_type(spec.disk_type.as_deref())
                    .with_lifecycle(spec.lifecycle),
            )?;
        }

        for spec in &config.service_accounts {
            tasks.add(
                ServiceAccount::new(project, &spec.name)
                    .with_display_name(spec.display_name.as_deref())
                    .with_description(spec.description.as_deref())
                    .with_lifecycle(spec.lifecycle),
            )?;
        }

        for spec in &config.instances {
            let instance = Instance::new(project, &spec.name)
                .with_zone(spec.zone.as_deref().unwrap_or(&config.zone))
                .with_machine_type(&spec.machine_type)
                .with_image(&spec.image)
                .on_network(&spec.network)
                .in_subnet(spec.subnet.as_deref())
                .with_address(spec.address.as_deref())
                .with_service_account(spec.service_account.as_deref())
                .with_scopes(&spec.scopes)
                .with_tags(&spec.tags)
                .with_disks(spec.disks.clone())
                .with_metadata(spec.metadata.clone())
                .with_scheduling(spec.preemptible, spec.can_ip_forward)
                .with_lifecycle(spec.lifecycle);
            tasks
                .add(instance)
                .with_context(|| format!("instance '{}'", spec.name))?;
        }

        Ok(())
    }
}

/// Run every builder into one task set
pub fn build(builders: &[&dyn ModelBuilder]) -> Result<TaskSet> {
    let mut tasks = TaskSet::new();
    for builder in builders {
        builder.build(&mut tasks)?;
    }
    log::debug!("declared {} tasks", tasks.len());
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Field, TaskKey};

    const CLUSTER: &str = r#"
name = "demo"
project = "demo-project"
region = "us-central1"
zone = "us-central1-a"

[[networks]]
name = "net-1"

[[subnets]]
name = "nodes"
network = "net-1"
cidr = "10.0.16.0/20"

[[addresses]]
name = "master-ip"

[[disks]]
name = "etcd"
size_gb = 20
zone = "us-central1-b"

[[service_accounts]]
name = "control-plane"

[[instances]]
name = "vm-1"
machine_type = "e2-medium"
image = "demo-project/debian-12"
network = "net-1"
subnet = "nodes"
address = "master-ip"
service_account = "control-plane"
scopes = ["https://www.googleapis.com/auth/compute"]
disks = { etcd = "etcd" }
"#;

    fn graph(content: &str) -> declarative::TaskGraph {
        let config = ClusterConfig::parse(content).unwrap();
        let tasks = build(&[&InfrastructureBuilder { config: &config }]).unwrap();
        tasks.build().unwrap()
    }

    #[test]
    fn test_defaults_and_normalization() {
        let graph = graph(CLUSTER);
        assert_eq!(graph.len(), 6);

        let subnet = graph.task::<Subnet>("nodes").unwrap();
        assert_eq!(subnet.region, Field::Value("us-central1".to_string()));

        let disk = graph.task::<Disk>("etcd").unwrap();
        assert_eq!(disk.zone, Field::Value("us-central1-b".to_string()));

        let instance = graph.task::<Instance>("vm-1").unwrap();
        assert_eq!(instance.zone, Field::Value("us-central1-a".to_string()));
        assert_eq!(instance.image, Field::Value("debian-12".to_string()));
        assert_eq!(
            instance.scopes,
            Field::Value(vec!["compute-rw".to_string()])
        );
        // nothing declared, no opinion
        assert_eq!(instance.tags, Field::Unknown);
        assert_eq!(instance.metadata, Field::Unknown);
    }

    #[test]
    fn test_instance_ordered_after_network_when_declared_first() {
        let content = r#"
name = "demo"
project = "p"
region = "us-central1"
zone = "us-central1-a"

[[instances]]
name = "vm-1"
machine_type = "e2-medium"
image = "debian-12"
network = "net-1"

[[networks]]
name = "net-1"
"#;
        let order = graph(content).order();
        let network = order
            .iter()
            .position(|k| *k == TaskKey::new("Network", "net-1"))
            .unwrap();
        let instance = order
            .iter()
            .position(|k| *k == TaskKey::new("Instance", "vm-1"))
            .unwrap();
        assert!(network < instance);
    }

    #[test]
    fn test_undeclared_reference_rejected() {
        let content = CLUSTER.replace("address = \"master-ip\"", "address = \"missing-ip\"");
        let config = ClusterConfig::parse(&content).unwrap();
        let tasks = build(&[&InfrastructureBuilder { config: &config }]).unwrap();
        let err = tasks.build().unwrap_err();
        assert!(err.to_string().contains("Address/missing-ip"));
    }
}
