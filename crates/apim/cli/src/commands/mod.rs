//! apimctl subcommands

pub mod fleet;
pub mod inspect;
pub mod release;

use crate::error::{CliError, CliResult};
use apim_controller::GatewayRepository;
use apim_types::{
    GatewayId, MicroGateway, MicroGatewayId, ReleaseHistory, ReleaseStatus, StageId,
};

/// Turn a finished history into the command's result
pub(crate) fn finished(history: &ReleaseHistory, expected: ReleaseStatus) -> CliResult<()> {
    if history.status == expected {
        Ok(())
    } else {
        Err(CliError::ReleaseFailed(format!(
            "{} for {} {}: {}",
            history.status, history.gateway_id, history.stage_id, history.message
        )))
    }
}

pub(crate) async fn default_fleet(repo: &dyn GatewayRepository) -> CliResult<MicroGateway> {
    repo.default_shared_micro_gateway()
        .await?
        .ok_or_else(|| CliError::NotFound("default shared micro-gateway".into()))
}

pub(crate) fn ids(gateway: i64, stage: i64) -> (GatewayId, StageId) {
    (GatewayId::new(gateway), StageId::new(stage))
}

pub(crate) fn micro_gateway_id(raw: uuid::Uuid) -> MicroGatewayId {
    MicroGatewayId::from_uuid(raw)
}
