//! Distributors deliver converted configuration to the micro-gateway fleet
//!
//! Delivery failures (a store write, a deploy call) are reported through a
//! failed [`DistributeOutcome`]: half a fleet updated is a reportable result,
//! not an exception. Conversion and registry listing errors still surface as
//! `Err`.

mod combine;
mod direct;
mod package;

pub use combine::{CombineDistributor, DistributionMethod, DistributionTarget};
pub use direct::DirectWriteDistributor;
pub use package::PackageDeployDistributor;

use crate::error::Result;
use crate::release_data::{ReleaseData, ReleaseTarget};
use async_trait::async_trait;

/// Result of one distribute or revoke call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributeOutcome {
    pub success: bool,
    pub message: String,
}

impl DistributeOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Distributor: Send + Sync {
    /// Deliver a release. `publish_id` identifies the release attempt.
    async fn distribute(
        &self,
        data: &ReleaseData,
        publish_id: Option<&str>,
    ) -> Result<DistributeOutcome>;

    /// Remove a stage's configuration from the fleet
    async fn revoke(&self, target: &ReleaseTarget, publish_id: Option<&str>)
        -> Result<DistributeOutcome>;

    fn name(&self) -> &str;
}
