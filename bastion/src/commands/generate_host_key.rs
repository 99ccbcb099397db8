use anyhow::Result;
use bastion_protocol_ssh::generate_host_keys;
use tracing::*;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(&cli.config, true)?;
    generate_host_keys(&config)?;
    info!(path=%config.host_key_path().display(), "Host key is in place");
    Ok(())
}
