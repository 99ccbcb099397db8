use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;

use super::WorkerOutcome;
use crate::common::ChannelInput;
use crate::server::channel_writer::ChannelWriter;
use crate::SshError;

/// Copies bytes between the channel and a TCP connection to `address`.
///
/// EOF on either side shuts down the write half of the other.
pub async fn run_tunnel(
    address: String,
    mut input: mpsc::UnboundedReceiver<ChannelInput>,
    writer: ChannelWriter,
    cancel: CancellationToken,
) -> Result<WorkerOutcome, SshError> {
    let stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(WorkerOutcome::Cancelled),
        stream = TcpStream::connect(&address) => stream?,
    };
    info!(%address, "Tunnel connected");
    let (mut tcp_reader, mut tcp_writer) = stream.into_split();

    let downstream = async {
        let mut buf = vec![0u8; 16384];
        loop {
            let n = tcp_reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.data(Bytes::copy_from_slice(&buf[..n])).await;
        }
        writer.eof().await;
        Ok::<_, std::io::Error>(())
    };

    let upstream = async {
        while let Some(item) = input.recv().await {
            match item {
                ChannelInput::Data(data) => tcp_writer.write_all(&data).await?,
                ChannelInput::Eof => break,
                ChannelInput::Resize(_) => {}
            }
        }
        let _ = tcp_writer.shutdown().await;
        Ok::<_, std::io::Error>(())
    };

    tokio::select! {
        _ = cancel.cancelled() => Ok(WorkerOutcome::Cancelled),
        (down, up) = futures::future::join(downstream, upstream) => {
            down?;
            up?;
            debug!(%address, "Tunnel finished");
            Ok(WorkerOutcome::Finished)
        }
    }
}
