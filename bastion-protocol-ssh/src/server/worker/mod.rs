mod mux;
mod process;
mod pty;
mod tunnel;

use std::future::Future;

use bytes::Bytes;
pub use mux::run_mux;
pub use process::run_process;
pub use pty::run_pty;
pub use tunnel::run_tunnel;
use tracing::*;

use super::channel_writer::ChannelWriter;
use crate::SshError;

pub enum WorkerOutcome {
    /// Report this exit status, then EOF and close.
    Exited(u32),
    /// The worker already sent EOF, only close is left.
    Finished,
    /// The channel is going away, nothing more to send.
    Cancelled,
}

/// What a shell or exec channel runs.
#[derive(Clone, Debug)]
pub struct Program {
    pub program: String,
    pub args: Vec<String>,
}

impl Program {
    pub fn command(command: &str) -> Self {
        Self {
            program: "sh".into(),
            args: vec!["-c".into(), command.into()],
        }
    }

    pub fn shell() -> Self {
        Self {
            program: std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into()),
            args: vec![],
        }
    }
}

/// Runs a channel worker and reports how it ended to the client.
pub fn spawn_worker<F>(writer: ChannelWriter, worker: F)
where
    F: Future<Output = Result<WorkerOutcome, SshError>> + Send + 'static,
{
    tokio::spawn(
        async move {
            match worker.await {
                Ok(WorkerOutcome::Exited(status)) => {
                    debug!(status, "Channel worker exited");
                    writer.exit(status).await;
                }
                Ok(WorkerOutcome::Finished) => writer.close().await,
                Ok(WorkerOutcome::Cancelled) => debug!("Channel worker cancelled"),
                Err(error) => {
                    warn!(%error, "Channel worker failed");
                    writer
                        .extended_data(1, Bytes::from(format!("bastion: {error}\r\n")))
                        .await;
                    writer.exit(1).await;
                }
            }
        }
        .in_current_span(),
    );
}
