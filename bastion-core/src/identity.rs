use std::sync::Arc;

use async_trait::async_trait;
use bastion_common::BastionError;

use crate::AccessChecker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    /// Public host of the application the session token was issued for.
    pub app_host: String,
}

/// Turns a session token into the identity behind it.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Fails with `AuthenticationFailed` for unknown or revoked tokens.
    async fn authenticate(
        &self,
        token: &str,
    ) -> Result<(Identity, Arc<dyn AccessChecker>), BastionError>;
}
