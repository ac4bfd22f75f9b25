//! Micro-gateway fleet commands

use super::{default_fleet, micro_gateway_id};
use crate::context::Context;
use crate::error::{CliError, CliResult};
use crate::output::{print_single, print_success, OutputFormat};
use clap::Args;

/// Re-publish every stage served by a micro-gateway
#[derive(Args)]
pub struct RollingUpdateArgs {
    /// Micro-gateway id; defaults to the default shared fleet
    #[arg(short, long)]
    pub micro_gateway: Option<uuid::Uuid>,
}

pub async fn rolling_update(
    ctx: &Context,
    args: RollingUpdateArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let id = match args.micro_gateway {
        Some(raw) => micro_gateway_id(raw),
        None => default_fleet(ctx.repository()).await?.id,
    };

    let report = ctx.rolling_updater().run(id).await?;
    print_single(&report, format)?;

    if report.is_success() {
        print_success(&format!("{} gateways updated", report.succeeded.len()));
        Ok(())
    } else {
        Err(CliError::ReleaseFailed(format!(
            "rolling update failed for {}",
            report.failed.join(", ")
        )))
    }
}
