use super::Cluster;
use crate::Context;
use crate::cli::OidcArgs;
use crate::{oidc, ui};
use anyhow::{Context as AnyhowContext, Result};

/// Print the documents that would be published for the service account
/// issuer.
pub fn run(ctx: &Context, args: &OidcArgs) -> Result<()> {
    let cluster = Cluster::load(&args.cluster)?;
    let issuer = cluster
        .config
        .service_account_issuer
        .as_deref()
        .context("no service_account_issuer in the cluster file")?;
    let keyset = cluster.keyset()?;

    let show_discovery = args.only.as_deref() != Some("jwks");
    let show_jwks = args.only.as_deref() != Some("discovery");

    if show_discovery {
        if !ctx.quiet {
            ui::header(oidc::DISCOVERY_PATH);
        }
        println!("{}", oidc::discovery_document(issuer)?);
    }
    if show_jwks {
        if !ctx.quiet {
            ui::header(oidc::JWKS_PATH);
        }
        println!("{}", oidc::jwks_document(&keyset)?);
    }
    if !ctx.quiet && !cluster.config.publishes_discovery() {
        println!();
        ui::info("no discovery_store set; the documents are not published");
    }
    Ok(())
}
