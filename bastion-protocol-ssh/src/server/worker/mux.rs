use std::sync::Arc;

use russh::keys::agent::client::AgentClient;
use russh::server::Handle;
use russh::{ChannelMsg, Sig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;

use super::WorkerOutcome;
use crate::client::{AgentSigner, UpstreamConnector, UpstreamTarget};
use crate::common::ChannelInput;
use crate::server::channel_writer::ChannelWriter;
use crate::SshError;

fn signal_number(signal: &Sig) -> Option<u32> {
    Some(match signal {
        Sig::HUP => 1,
        Sig::INT => 2,
        Sig::QUIT => 3,
        Sig::ILL => 4,
        Sig::ABRT => 6,
        Sig::FPE => 8,
        Sig::KILL => 9,
        Sig::USR1 => 10,
        Sig::SEGV => 11,
        Sig::PIPE => 13,
        Sig::ALRM => 14,
        Sig::TERM => 15,
        Sig::Custom(_) => return None,
    })
}

fn signal_exit_status(signal: &Sig) -> u32 {
    signal_number(signal).map(|n| 128 + n).unwrap_or(1)
}

/// Runs the target's command upstream and relays it over this channel.
///
/// Authentication signs through an agent channel opened back to the client.
pub async fn run_mux(
    connector: Arc<dyn UpstreamConnector>,
    target: UpstreamTarget,
    handle: Handle,
    mut input: mpsc::UnboundedReceiver<ChannelInput>,
    writer: ChannelWriter,
    cancel: CancellationToken,
) -> Result<WorkerOutcome, SshError> {
    let connect = async {
        let agent = handle.channel_open_agent().await?;
        let signer = AgentSigner::new(AgentClient::connect(agent.into_stream()));
        connector.connect(&target, signer).await
    };
    let mut upstream = tokio::select! {
        _ = cancel.cancelled() => return Ok(WorkerOutcome::Cancelled),
        upstream = connect => upstream?,
    };
    info!(address=%target.address, command=%target.command, "Upstream command started");

    let mut exit_status = None;
    let mut input_open = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = upstream.channel.close().await;
                return Ok(WorkerOutcome::Cancelled);
            }
            msg = upstream.channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => writer.data(data).await,
                Some(ChannelMsg::ExtendedData { data, ext }) => writer.extended_data(ext, data).await,
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    exit_status = Some(signal_exit_status(&signal_name))
                }
                Some(ChannelMsg::Failure) => return Err(SshError::UpstreamRequestFailed),
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            item = input.recv(), if input_open => match item {
                Some(ChannelInput::Data(data)) => upstream.channel.data(&data[..]).await?,
                Some(ChannelInput::Eof) => upstream.channel.eof().await?,
                Some(ChannelInput::Resize(pty)) => {
                    upstream
                        .channel
                        .window_change(pty.col_width, pty.row_height, pty.pix_width, pty.pix_height)
                        .await?
                }
                None => input_open = false,
            }
        }
    }

    debug!(?exit_status, "Upstream channel closed");
    Ok(WorkerOutcome::Exited(exit_status.unwrap_or(1)))
}
