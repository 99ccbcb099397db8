mod client;
mod common;
mod error;
mod keys;
mod server;
use std::fmt::Debug;

use anyhow::Result;
use async_trait::async_trait;
use bastion_common::ListenEndpoint;
use bastion_core::{ProtocolServer, Services};
pub use client::*;
pub use common::*;
pub use error::SshError;
pub use keys::*;
pub use server::{
    make_russh_config, run_server, serve, validate_user_certificate, ServerContext,
};

#[derive(Clone)]
pub struct SSHProtocolServer {
    services: Services,
}

impl SSHProtocolServer {
    pub async fn new(services: &Services) -> Result<Self> {
        let config = services.config.lock().await;
        generate_host_keys(&config)?;
        Ok(SSHProtocolServer {
            services: services.clone(),
        })
    }
}

#[async_trait]
impl ProtocolServer for SSHProtocolServer {
    async fn run(self, address: ListenEndpoint) -> Result<()> {
        run_server(self.services, address).await
    }
}

impl Debug for SSHProtocolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSHProtocolServer")
    }
}
