//! Registry inspection

use super::ids;
use crate::context::Context;
use crate::error::{CliError, CliResult};
use crate::output::{print_output, print_warning, OutputFormat};
use apim_controller::{DirectWriteDistributor, DistributionMethod, ReleaseTarget};
use apim_registry::{KvRegistry, Registry};
use apim_types::{ParseResourceKindError, ResourceKind};
use clap::Args;
use futures::StreamExt;
use serde::Serialize;
use tabled::Tabled;

/// List what the fleet currently sees for a stage
#[derive(Args)]
pub struct InspectArgs {
    /// Gateway id
    #[arg(short, long)]
    pub gateway: i64,

    /// Stage id
    #[arg(short, long)]
    pub stage: i64,

    /// Resource kind (stage, service, route, plugin_metadata, gateway_config)
    #[arg(short, long)]
    pub kind: Option<String>,
}

#[derive(Serialize, Tabled)]
struct ResourceRow {
    #[tabled(rename = "MICRO-GATEWAY")]
    micro_gateway: String,
    #[tabled(rename = "SCOPE")]
    scope: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
}

fn kinds(raw: Option<&str>) -> CliResult<Vec<ResourceKind>> {
    match raw {
        Some(raw) => raw
            .parse()
            .map(|kind| vec![kind])
            .map_err(|e: ParseResourceKindError| CliError::InvalidInput(e.to_string())),
        None => Ok(ResourceKind::ALL.to_vec()),
    }
}

pub async fn inspect(ctx: &Context, args: InspectArgs, format: OutputFormat) -> CliResult<()> {
    let (gateway_id, stage_id) = ids(args.gateway, args.stage);
    let kinds = kinds(args.kind.as_deref())?;

    let target = ReleaseTarget::load(ctx.repository(), gateway_id, stage_id).await?;
    let planned = ctx.combine().plan(&target).await?;

    let mut rows = Vec::new();
    for branch in planned {
        let include_global = match branch.method {
            DistributionMethod::DirectWrite {
                include_global_config,
            } => include_global_config,
            DistributionMethod::PackageDeploy { .. } => {
                print_warning(&format!(
                    "{} is package deployed; its configuration is not in the registry",
                    branch.micro_gateway.name
                ));
                continue;
            }
        };

        let writer = DirectWriteDistributor::new(
            ctx.repo.clone(),
            ctx.store.clone(),
            branch.micro_gateway.clone(),
            ctx.convertor().clone(),
            include_global,
        );
        let mut scopes = vec![("stage", writer.stage_prefix(&target.gateway, &target.stage))];
        if include_global {
            scopes.push(("global", writer.global_prefix(&target.gateway)));
        }

        for (scope, prefix) in scopes {
            let registry = KvRegistry::new(ctx.store.clone(), prefix);
            for kind in &kinds {
                let mut resources = registry.iter_by_type(*kind);
                while let Some(resource) = resources.next().await {
                    let resource = resource?;
                    rows.push(ResourceRow {
                        micro_gateway: branch.micro_gateway.name.clone(),
                        scope: scope.to_string(),
                        kind: kind.to_string(),
                        id: resource.id,
                        name: resource.metadata.name,
                    });
                }
            }
        }
    }

    print_output(rows, format)
}
