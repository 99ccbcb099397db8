use async_trait::async_trait;
use bastion_common::BastionError;

use crate::ApplicationRecord;

/// A principal's view of the access policy.
///
/// Implementations must consult the policy as it is at call time: callers never cache the answer.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// `Err(AccessDenied)` when the principal may not use `app`.
    async fn check_access_to_app(&self, app: &ApplicationRecord) -> Result<(), BastionError>;
}
