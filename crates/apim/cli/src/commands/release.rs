//! Release commands: publish and revoke

use super::{default_fleet, finished, ids};
use crate::context::Context;
use crate::error::{CliError, CliResult};
use crate::output::{print_output, print_single, print_success, OutputFormat};
use apim_controller::GatewayRepository;
use apim_types::{PublishSource, ReleaseStatus, ResourceVersionId, StageStatus};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tracing::info;

/// Publish a stage
#[derive(Args)]
pub struct PublishArgs {
    /// Gateway id
    #[arg(short, long)]
    pub gateway: i64,

    /// Stage id
    #[arg(short, long)]
    pub stage: i64,

    /// Resource version to release; omit to re-sync the current release
    #[arg(short, long)]
    pub resource_version: Option<i64>,
}

/// Mark a stage inactive and remove its configuration from the fleet
#[derive(Args)]
pub struct DeactivateStageArgs {
    /// Gateway id
    #[arg(short, long)]
    pub gateway: i64,

    /// Stage id
    #[arg(short, long)]
    pub stage: i64,
}

/// Move every stage of a gateway back to the default shared fleet
#[derive(Args)]
pub struct BindDefaultFleetArgs {
    /// Gateway id
    #[arg(short, long)]
    pub gateway: i64,
}

#[derive(Serialize, Tabled)]
struct RebindRow {
    #[tabled(rename = "STAGE")]
    stage: String,
    #[tabled(rename = "REVOKED")]
    revoked: String,
    #[tabled(rename = "PUBLISHED")]
    published: String,
}

pub async fn publish(ctx: &Context, args: PublishArgs, format: OutputFormat) -> CliResult<()> {
    let (gateway_id, stage_id) = ids(args.gateway, args.stage);
    let version = args.resource_version.map(ResourceVersionId::new);
    let source = if version.is_some() {
        PublishSource::VersionPublish
    } else {
        PublishSource::CliSync
    };

    let history = ctx
        .trigger()
        .trigger_publish(source, ctx.operator(), gateway_id, stage_id, version, true)
        .await?;

    print_single(&history, format)?;
    finished(&history, ReleaseStatus::Success)?;
    print_success(&format!("Published {} {}", gateway_id, stage_id));
    Ok(())
}

pub async fn deactivate_stage(
    ctx: &Context,
    args: DeactivateStageArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let (gateway_id, stage_id) = ids(args.gateway, args.stage);
    let repo = ctx.repository();

    // 1. Mark the stage inactive so no later publish brings it back
    let mut stage = repo
        .get_stage(stage_id)
        .await?
        .filter(|stage| stage.gateway_id == gateway_id)
        .ok_or_else(|| CliError::NotFound(stage_id.to_string()))?;
    stage.status = StageStatus::Inactive;
    repo.update_stage(stage).await?;
    info!(stage_id = %stage_id, "Stage marked inactive");

    // 2. Revoke through the pipeline
    let history = ctx
        .trigger()
        .trigger_revoke(
            PublishSource::StageDisable,
            ctx.operator(),
            gateway_id,
            stage_id,
            true,
        )
        .await?;

    print_single(&history, format)?;
    finished(&history, ReleaseStatus::Unreleased)?;
    print_success(&format!("Deactivated {}", stage_id));
    Ok(())
}

pub async fn bind_default_fleet(
    ctx: &Context,
    args: BindDefaultFleetArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let repo = ctx.repository();
    let gateway_id = apim_types::GatewayId::new(args.gateway);
    repo.get_gateway(gateway_id)
        .await?
        .ok_or_else(|| CliError::NotFound(gateway_id.to_string()))?;
    let fleet = default_fleet(repo).await?;
    let trigger = ctx.trigger();

    let mut rows = Vec::new();
    let mut failures = Vec::new();
    for mut stage in repo.list_stages(gateway_id).await? {
        match stage.micro_gateway_id {
            None => continue,
            Some(id) if id == fleet.id => continue,
            Some(_) => {}
        }
        let stage_id = stage.id;
        let current = repo.get_release(stage_id).await?;

        // 1. Take the configuration off the dedicated micro-gateway
        let revoked = match &current {
            Some(_) => {
                let history = trigger
                    .trigger_revoke(
                        PublishSource::CliSync,
                        ctx.operator(),
                        gateway_id,
                        stage_id,
                        true,
                    )
                    .await?;
                if let Err(e) = finished(&history, ReleaseStatus::Unreleased) {
                    failures.push(e.to_string());
                    rows.push(RebindRow {
                        stage: stage.name.clone(),
                        revoked: history.status.to_string(),
                        published: "-".into(),
                    });
                    continue;
                }
                history.status.to_string()
            }
            None => "-".into(),
        };

        // 2. Rebind
        stage.micro_gateway_id = None;
        let name = stage.name.clone();
        repo.update_stage(stage).await?;

        // 3. Publish the same version to the default fleet
        let published = match current {
            Some(release) => {
                let history = trigger
                    .trigger_publish(
                        PublishSource::CliSync,
                        ctx.operator(),
                        gateway_id,
                        stage_id,
                        Some(release.resource_version_id),
                        true,
                    )
                    .await?;
                if let Err(e) = finished(&history, ReleaseStatus::Success) {
                    failures.push(e.to_string());
                }
                history.status.to_string()
            }
            None => "-".into(),
        };

        rows.push(RebindRow {
            stage: name,
            revoked,
            published,
        });
    }

    print_output(rows, format)?;
    if failures.is_empty() {
        print_success(&format!("{} bound to {}", gateway_id, fleet.name));
        Ok(())
    } else {
        Err(CliError::ReleaseFailed(failures.join("; ")))
    }
}
