use anyhow::Result;
use async_trait::async_trait;
use bastion_common::ListenEndpoint;

#[async_trait]
pub trait ProtocolServer {
    async fn run(self, address: ListenEndpoint) -> Result<()>;
}
