use std::sync::Arc;

use bastion_common::UpstreamHostKeyVerificationMode;
use russh::keys::{HashAlg, PublicKey};
use tracing::*;

use crate::SshError;

pub struct ClientHandler {
    pub address: String,
    pub verification: UpstreamHostKeyVerificationMode,
    pub known_keys: Arc<Vec<PublicKey>>,
}

impl russh::client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, SshError> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);
        match self.verification {
            UpstreamHostKeyVerificationMode::AutoAccept => {
                info!(address=%self.address, %fingerprint, "Accepting upstream host key");
                Ok(true)
            }
            UpstreamHostKeyVerificationMode::KnownKeys => {
                let known = self
                    .known_keys
                    .iter()
                    .any(|key| key.key_data() == server_public_key.key_data());
                if !known {
                    warn!(address=%self.address, %fingerprint, "Upstream host key is not known");
                }
                Ok(known)
            }
        }
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        debug!(address=%self.address, "Upstream connection dropped");
    }
}
