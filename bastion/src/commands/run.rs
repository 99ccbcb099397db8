use anyhow::Result;
use bastion_core::{ProtocolServer, Services};
use bastion_protocol_http::HTTPProtocolServer;
use bastion_protocol_ssh::SSHProtocolServer;
use futures::StreamExt;
use tracing::*;

use crate::config::{load_config, watch_config};

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "Bastion");

    let config = load_config(&cli.config, true)?;
    let services = Services::new(config.clone()).await?;

    let mut protocol_futures = futures::stream::FuturesUnordered::new();

    if config.store.ssh.enable {
        protocol_futures.push(
            SSHProtocolServer::new(&services)
                .await?
                .run(config.store.ssh.listen),
        );
    }

    if config.store.http.enable {
        protocol_futures.push(
            HTTPProtocolServer::new(&services)
                .await?
                .run(config.store.http.listen),
        );
    }

    if protocol_futures.is_empty() {
        anyhow::bail!("Neither the SSH nor the HTTP server is enabled");
    }

    if console::user_attended() {
        info!("--------------------------------------------");
        info!("Bastion is now running.");
        if config.store.ssh.enable {
            info!("Accepting SSH connections on  {}", config.store.ssh.listen);
        }
        if config.store.http.enable {
            info!("Accepting HTTP connections on {}", config.store.http.listen);
        }
        info!("--------------------------------------------");
    }

    drop(config);

    tokio::spawn({
        let path = cli.config.clone();
        let config = services.config.clone();
        async move {
            if let Err(error) = watch_config(path, config).await {
                error!(?error, "Config watcher stopped");
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            result = protocol_futures.next() => {
                match result {
                    Some(Err(error)) => {
                        error!(?error, "Server error");
                        std::process::exit(1);
                    },
                    None => break,
                    _ => (),
                }
            }
        }
    }

    info!("Exiting");
    Ok(())
}
