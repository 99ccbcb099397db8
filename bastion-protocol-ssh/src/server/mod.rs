mod certificate;
mod channel_writer;
mod russh_handler;
mod session;
mod worker;

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bastion_common::{ListenEndpoint, SshConfig};
use bastion_core::Services;
pub use certificate::validate_user_certificate;
use russh::keys::ssh_key::Fingerprint;
use russh::keys::PrivateKey;
use russh::{MethodKind, MethodSet};
pub use russh_handler::ServerHandler;
pub use session::ServerSession;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::client::{SshUpstreamConnector, UpstreamConnector};
use crate::keys::{load_host_keys, parse_trusted_cas};

/// What every session of one listener shares.
pub struct ServerContext {
    pub trusted_cas: Vec<Fingerprint>,
    pub connector: Arc<dyn UpstreamConnector>,
}

impl ServerContext {
    pub fn from_config(config: &SshConfig) -> Result<Self> {
        let trusted_cas = parse_trusted_cas(&config.trusted_user_ca_keys)?;
        if trusted_cas.is_empty() {
            warn!("No trusted user CAs configured, every login will be refused");
        }
        Ok(Self {
            trusted_cas,
            connector: Arc::new(SshUpstreamConnector::from_config(config)?),
        })
    }
}

pub fn make_russh_config(
    host_keys: Vec<PrivateKey>,
    inactivity_timeout: Duration,
) -> russh::server::Config {
    russh::server::Config {
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        methods: MethodSet::from(&[MethodKind::PublicKey][..]),
        inactivity_timeout: Some(inactivity_timeout),
        keys: host_keys,
        nodelay: true,
        ..Default::default()
    }
}

pub async fn run_server(services: Services, address: ListenEndpoint) -> Result<()> {
    let (russh_config, context) = {
        let config = services.config.lock().await;
        let host_keys = load_host_keys(&config).context("Failed to load the host key")?;
        (
            make_russh_config(host_keys, config.store.ssh.inactivity_timeout),
            ServerContext::from_config(&config.store.ssh)?,
        )
    };

    let listener = TcpListener::bind(address.0)
        .await
        .with_context(|| format!("Failed to bind {}", address.0))?;
    info!(?address, "Listening");
    serve(listener, Arc::new(russh_config), Arc::new(context)).await
}

/// Accepts connections from `listener` until it fails.
pub async fn serve(
    listener: TcpListener,
    config: Arc<russh::server::Config>,
    context: Arc<ServerContext>,
) -> Result<()> {
    loop {
        let (socket, remote_address) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                error!(%error, "Failed to accept a connection");
                if let Some(delay) = accept_retry_delay(&error) {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }
        };
        let handler = make_handler(remote_address, context.clone());
        let span = info_span!("SSH", session=%handler.id, client_ip=%remote_address.ip());
        tokio::spawn(_run_stream(config.clone(), socket, handler).instrument(span));
    }
}

/// Errors about a single aborted peer are retried at once. Anything else,
/// such as running out of descriptors, backs off before the next accept.
fn accept_retry_delay(error: &std::io::Error) -> Option<Duration> {
    match error.kind() {
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted => None,
        _ => Some(Duration::from_millis(100)),
    }
}

fn make_handler(remote_address: SocketAddr, context: Arc<ServerContext>) -> ServerHandler {
    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let session = ServerSession::new(id, remote_address, context, cancel.clone());
    info!(session=%id, %remote_address, "New connection");
    ServerHandler {
        id,
        session: Arc::new(Mutex::new(session)),
        cancel,
    }
}

async fn _run_stream<R>(config: Arc<russh::server::Config>, socket: R, handler: ServerHandler)
where
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let result = async { russh::server::run_stream(config, socket, handler).await?.await }.await;
    match result {
        Ok(()) => debug!("Connection closed"),
        Err(error) => debug!(%error, "Connection closed with an error"),
    }
}
