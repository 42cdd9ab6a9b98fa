use super::ModelBuilder;
use crate::oidc::{self, DISCOVERY_PATH, JWKS_PATH, Keyset};
use crate::store::ObjectStore;
use crate::tasks::ManagedFile;
use anyhow::{Context, Result};
use declarative::{Field, TaskSet};

/// Publishes the OIDC discovery document and key set for the service
/// account issuer.
pub struct IssuerDiscoveryBuilder<'a> {
    pub issuer: &'a str,
    pub keyset: &'a Keyset,
    pub store: &'a dyn ObjectStore,
}

impl IssuerDiscoveryBuilder<'_> {
    /// Whether objects need their own public-read ACL
    fn public_acl(&self) -> Result<Field<bool>> {
        let location = self.store.location();
        if self.store.public_url() != Some(self.issuer) {
            log::info!("using user managed serviceAccountIssuers");
            return Ok(Field::Unknown);
        }

        let public = self
            .store
            .is_public()
            .with_context(|| format!("checking whether {location} is public"))?;
        if public {
            log::debug!("serviceAccountIssuers bucket {location} is public");
            Ok(Field::Unknown)
        } else {
            log::info!("serviceAccountIssuers bucket {location} is not public; will use object ACL");
            Ok(Field::Value(true))
        }
    }
}

impl ModelBuilder for IssuerDiscoveryBuilder<'_> {
    fn build(&self, tasks: &mut TaskSet) -> Result<()> {
        let public_acl = self.public_acl()?;
        let base = self.store.location();

        let discovery = oidc::discovery_document(self.issuer)?;
        tasks.add(
            ManagedFile::new(base, DISCOVERY_PATH, discovery).with_public_acl(public_acl.clone()),
        )?;

        let jwks = oidc::jwks_document(self.keyset)?;
        tasks.add(ManagedFile::new(base, JWKS_PATH, jwks).with_public_acl(public_acl))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use declarative::TaskGraph;

    fn build(issuer: &str, store: &MemStore) -> TaskGraph {
        let keyset = Keyset::default();
        let builder = IssuerDiscoveryBuilder {
            issuer,
            keyset: &keyset,
            store,
        };
        let mut tasks = TaskSet::new();
        builder.build(&mut tasks).unwrap();
        tasks.build().unwrap()
    }

    fn acl(graph: &TaskGraph, path: &str) -> Field<bool> {
        graph.task::<ManagedFile>(path).unwrap().public_acl.clone()
    }

    #[test]
    fn test_private_store_serving_issuer_uses_object_acl() {
        let store = MemStore::new("gs://issuer/demo")
            .with_public_url("https://storage.googleapis.com/issuer/demo");
        let graph = build("https://storage.googleapis.com/issuer/demo", &store);
        assert_eq!(graph.len(), 2);
        assert_eq!(acl(&graph, DISCOVERY_PATH), Field::Value(true));
        assert_eq!(acl(&graph, JWKS_PATH), Field::Value(true));

        let discovery = graph.task::<ManagedFile>(DISCOVERY_PATH).unwrap();
        let contents = discovery.contents.value().unwrap();
        assert!(contents.contains(
            "\"jwks_uri\": \"https://storage.googleapis.com/issuer/demo/openid/v1/jwks\""
        ));
    }

    #[test]
    fn test_public_store_needs_no_acl() {
        let store = MemStore::new("gs://issuer")
            .with_public_url("https://storage.googleapis.com/issuer")
            .public();
        let graph = build("https://storage.googleapis.com/issuer", &store);
        assert_eq!(acl(&graph, JWKS_PATH), Field::Unknown);
    }

    #[test]
    fn test_issuer_must_match_store_url_exactly() {
        let store = MemStore::new("gs://issuer")
            .with_public_url("https://storage.googleapis.com/issuer");
        let graph = build("https://storage.googleapis.com/issuer", &store);
        assert_eq!(acl(&graph, JWKS_PATH), Field::Value(true));

        // a trailing slash makes it a different, user managed issuer
        let graph = build("https://storage.googleapis.com/issuer/", &store);
        assert_eq!(acl(&graph, JWKS_PATH), Field::Unknown);
    }

    #[test]
    fn test_user_managed_issuer() {
        let store = MemStore::new("gs://issuer")
            .with_public_url("https://storage.googleapis.com/issuer");
        let graph = build("https://oidc.example.com", &store);
        assert_eq!(acl(&graph, DISCOVERY_PATH), Field::Unknown);

        let store = MemStore::new("memfs://issuer");
        let graph = build("https://oidc.example.com", &store);
        assert_eq!(acl(&graph, JWKS_PATH), Field::Unknown);
    }
}
