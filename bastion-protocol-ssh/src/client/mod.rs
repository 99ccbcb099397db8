mod handler;
mod signer;

use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bastion_common::{SshConfig, UpstreamHostKeyVerificationMode};
pub use handler::ClientHandler;
use russh::client::Msg;
use russh::keys::{Certificate, PublicKey};
use russh::Channel;
pub use signer::AgentSigner;
use tracing::*;

use crate::common::PtyRequest;
use crate::keys::parse_known_keys;
use crate::SshError;

/// A command to run on another SSH server on the user's behalf.
#[derive(Clone, Debug)]
pub struct UpstreamTarget {
    pub address: String,
    pub username: String,
    pub certificate: Certificate,
    pub command: String,
    pub pty: Option<PtyRequest>,
}

/// An exec channel on an upstream server. Dropping it drops the connection.
pub struct UpstreamSession {
    pub channel: Channel<Msg>,
    _connection: Box<dyn Any + Send>,
}

impl UpstreamSession {
    pub fn new<C: Send + 'static>(channel: Channel<Msg>, connection: C) -> Self {
        Self {
            channel,
            _connection: Box::new(connection),
        }
    }
}

#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Connects, authenticates with the target's certificate and starts its command.
    async fn connect(
        &self,
        target: &UpstreamTarget,
        signer: AgentSigner,
    ) -> Result<UpstreamSession, SshError>;
}

pub struct SshUpstreamConnector {
    verification: UpstreamHostKeyVerificationMode,
    known_keys: Arc<Vec<PublicKey>>,
}

impl SshUpstreamConnector {
    pub fn new(verification: UpstreamHostKeyVerificationMode, known_keys: Vec<PublicKey>) -> Self {
        Self {
            verification,
            known_keys: Arc::new(known_keys),
        }
    }

    pub fn from_config(config: &SshConfig) -> Result<Self> {
        Ok(Self::new(
            config.upstream_host_key_verification,
            parse_known_keys(&config.upstream_known_keys)?,
        ))
    }
}

#[async_trait]
impl UpstreamConnector for SshUpstreamConnector {
    async fn connect(
        &self,
        target: &UpstreamTarget,
        mut signer: AgentSigner,
    ) -> Result<UpstreamSession, SshError> {
        let address = with_default_port(&target.address);
        let handler = ClientHandler {
            address: address.clone(),
            verification: self.verification,
            known_keys: self.known_keys.clone(),
        };
        let config = Arc::new(russh::client::Config::default());

        debug!(%address, "Connecting upstream");
        let mut handle = russh::client::connect(config, address.as_str(), handler).await?;

        let hash_alg = if target.certificate.algorithm().is_rsa() {
            handle.best_supported_rsa_hash().await?.flatten()
        } else {
            None
        };
        let auth = handle
            .authenticate_certificate_with(
                target.username.clone(),
                target.certificate.clone(),
                hash_alg,
                &mut signer,
            )
            .await?;
        if !auth.success() {
            return Err(SshError::UpstreamAuthFailed);
        }

        let channel = handle.channel_open_session().await?;
        if let Some(pty) = &target.pty {
            channel
                .request_pty(
                    true,
                    &pty.term,
                    pty.col_width,
                    pty.row_height,
                    pty.pix_width,
                    pty.pix_height,
                    &pty.modes,
                )
                .await?;
        }
        channel.exec(true, target.command.as_bytes()).await?;

        Ok(UpstreamSession::new(channel, handle))
    }
}

/// Appends port 22 unless the address already names one.
pub fn with_default_port(address: &str) -> String {
    let has_port = match address.rsplit_once(':') {
        Some((host, port)) => {
            !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    };
    if has_port {
        address.to_owned()
    } else if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]:22")
    } else {
        format!("{address}:22")
    }
}
