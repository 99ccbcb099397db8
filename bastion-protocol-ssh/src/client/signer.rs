use russh::keys::agent::client::AgentClient;
use russh::keys::agent::AgentIdentity;
use russh::keys::{HashAlg, PublicKey};
use russh::{AgentAuthError, ChannelStream};

/// Signs upstream authentication challenges with the client's forwarded agent.
pub struct AgentSigner {
    agent: AgentClient<ChannelStream<russh::server::Msg>>,
}

impl AgentSigner {
    pub fn new(agent: AgentClient<ChannelStream<russh::server::Msg>>) -> Self {
        Self { agent }
    }
}

/// Agents index their keys by the plain public key blob, so a certificate
/// identity is signed for by its public key.
fn signing_identity(identity: &AgentIdentity) -> AgentIdentity {
    match identity {
        AgentIdentity::Certificate {
            certificate,
            comment,
        } => AgentIdentity::PublicKey {
            key: PublicKey::new(certificate.public_key().clone(), comment.as_str()),
            comment: comment.clone(),
        },
        other => other.clone(),
    }
}

impl russh::Signer for AgentSigner {
    type Error = AgentAuthError;

    async fn auth_sign(
        &mut self,
        key: &AgentIdentity,
        hash_alg: Option<HashAlg>,
        to_sign: Vec<u8>,
    ) -> Result<Vec<u8>, Self::Error> {
        let identity = signing_identity(key);
        Ok(self.agent.sign_request(&identity, hash_alg, to_sign).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use bastion_common::helpers::rng::get_crypto_rng;
    use russh::keys::ssh_key::certificate::{Builder, CertType};
    use russh::keys::{Algorithm, PrivateKey};

    use super::*;

    #[test]
    fn test_certificate_identity_signs_by_public_key() {
        let ca = PrivateKey::random(&mut get_crypto_rng(), Algorithm::Ed25519).unwrap();
        let user = PrivateKey::random(&mut get_crypto_rng(), Algorithm::Ed25519).unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let mut builder = Builder::new_with_random_nonce(
            &mut get_crypto_rng(),
            user.public_key().key_data().clone(),
            now,
            now + 60,
        )
        .unwrap();
        builder.cert_type(CertType::User).unwrap();
        builder.valid_principal("alice").unwrap();
        let certificate = builder.sign(&ca).unwrap();

        let identity = signing_identity(&AgentIdentity::Certificate {
            certificate,
            comment: "alice".into(),
        });
        let AgentIdentity::PublicKey { key, .. } = identity else {
            panic!("expected a public key identity");
        };
        assert_eq!(key.key_data(), user.public_key().key_data());
    }
}
