pub mod apply;
pub mod graph;
pub mod oidc;
pub mod plan;

use crate::Context;
use crate::cli::{ClusterArgs, RunArgs};
use crate::cloud::LocalCloud;
use crate::config::ClusterConfig;
use crate::model::{self, InfrastructureBuilder, IssuerDiscoveryBuilder, ModelBuilder};
use crate::oidc::Keyset;
use crate::paths;
use crate::store::{self, ObjectStore};
use crate::ui::ProgressObserver;
use anyhow::{Context as AnyhowContext, Result};
use declarative::{
    ApiTarget, RunOptions, RunReport, Target, TargetKind, TaskGraph, TerraformTarget, execute,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A loaded cluster file and the collaborators it names
pub struct Cluster {
    pub path: PathBuf,
    pub config: ClusterConfig,
    /// Discovery store, when issuer discovery is published
    pub store: Option<Arc<dyn ObjectStore>>,
}

impl Cluster {
    pub fn load(args: &ClusterArgs) -> Result<Self> {
        let path = paths::cluster_file(args.config.as_deref())?;
        let config = ClusterConfig::load(&path)?;

        let store = match (&config.discovery_store, config.publishes_discovery()) {
            (Some(location), true) => {
                let state_dir = paths::state_dir()?;
                let store = store::open(location, &state_dir)
                    .with_context(|| format!("Could not open discovery store {location}"))?;
                Some(store)
            }
            _ => None,
        };

        Ok(Self {
            path,
            config,
            store,
        })
    }

    /// The service account keyset named by the cluster file
    pub fn keyset(&self) -> Result<Keyset> {
        match self.config.keyset_path(&self.path) {
            Some(path) => Keyset::load(&path),
            None => Ok(Keyset::default()),
        }
    }

    /// Declare every task and build the dependency graph
    pub fn graph(&self) -> Result<TaskGraph> {
        let infrastructure = InfrastructureBuilder {
            config: &self.config,
        };

        let keyset;
        let discovery;
        let mut builders: Vec<&dyn ModelBuilder> = vec![&infrastructure];
        if let (Some(issuer), Some(store)) = (&self.config.service_account_issuer, &self.store) {
            keyset = self.keyset()?;
            discovery = IssuerDiscoveryBuilder {
                issuer,
                keyset: &keyset,
                store: store.as_ref(),
            };
            builders.push(&discovery);
        }

        let tasks = model::build(&builders)?;
        let graph = tasks
            .build()
            .with_context(|| format!("Invalid cluster {}", self.path.display()))?;
        Ok(graph)
    }
}

/// The render target for a run, backed by the local cloud state
pub fn target(args: &RunArgs, cluster: &Cluster) -> Result<Target> {
    let backend = || -> Result<LocalCloud> {
        let path = match &args.state {
            Some(path) => path.clone(),
            None => paths::state_dir()?.join(paths::CLOUD_STATE_FILE),
        };
        let cloud = LocalCloud::open(&path)
            .with_context(|| format!("Could not open cloud state {}", path.display()))?;
        Ok(match &cluster.store {
            Some(store) => cloud.with_store(Arc::clone(store)),
            None => cloud,
        })
    };

    Ok(match args.target {
        TargetKind::Api => Target::Api(
            ApiTarget::new(Arc::new(backend()?))
                .with_operation_timeout(Duration::from_secs(args.operation_timeout)),
        ),
        TargetKind::Terraform => {
            let mut target = TerraformTarget::new(&args.out);
            if args.discover {
                target = target.with_backend(Arc::new(backend()?));
            }
            Target::Terraform(target)
        }
    })
}

/// Run the graph against the target with a progress bar
pub fn execute_with_progress(
    ctx: &Context,
    graph: &TaskGraph,
    target: &Target,
    jobs: usize,
    dry_run: bool,
) -> Result<RunReport> {
    let observer = ProgressObserver::new(ctx.quiet)?;
    let options = RunOptions {
        jobs,
        dry_run,
        ..RunOptions::default()
    };
    let report = execute(graph, target, &options, &observer)?;
    Ok(report)
}
