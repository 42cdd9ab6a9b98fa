//! GCE-style tasks plugged into the reconciliation engine
//!
//! Each task maps one declared resource onto backend records (live target)
//! and onto a terraform resource block. Field mapping lives here; ordering,
//! diffing and dispatch live in the engine.

mod address;
mod disk;
mod instance;
mod managed_file;
mod network;
mod service_account;
mod subnet;

pub use address::Address;
pub use disk::Disk;
pub use instance::Instance;
pub use managed_file::ManagedFile;
pub use network::Network;
pub use service_account::{ServiceAccount, service_account_email};
pub use subnet::Subnet;

use declarative::{Field, Record};

/// Base of every compute API resource URL
pub const COMPUTE_API: &str = "https://www.googleapis.com/compute/v1";

/// Last path segment of a resource URL (or the input, if it has none)
pub fn last_component(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Global network URL
pub fn network_url(project: &str, name: &str) -> String {
    format!("{COMPUTE_API}/projects/{project}/global/networks/{name}")
}

/// Zonal disk URL
pub fn disk_url(project: &str, zone: &str, name: &str) -> String {
    format!("{COMPUTE_API}/projects/{project}/zones/{zone}/disks/{name}")
}

/// Read a field that holds a resource URL, keeping only its name
fn observed_name(record: &Record, name: &str) -> Field<String> {
    Field::observed(record.get_str(name).map(|url| last_component(url).to_string()))
}
