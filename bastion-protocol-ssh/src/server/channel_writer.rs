use bytes::Bytes;
use russh::server::Handle;
use russh::ChannelId;
use tokio::sync::mpsc;
use tracing::*;

enum ChannelOutput {
    Data(Bytes),
    ExtendedData(u32, Bytes),
    ExitStatus(u32),
    Eof,
    Close,
}

/// Sequences writes to one channel and runs them in background to avoid lockups.
///
/// Everything queued before an exit status reaches the client before it.
#[derive(Clone)]
pub struct ChannelWriter {
    tx: mpsc::Sender<ChannelOutput>,
}

impl ChannelWriter {
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        let (tx, mut rx) = mpsc::channel::<ChannelOutput>(64);
        tokio::spawn(
            async move {
                while let Some(output) = rx.recv().await {
                    let delivered = match output {
                        ChannelOutput::Data(data) => handle.data(channel, data).await.is_ok(),
                        ChannelOutput::ExtendedData(ext, data) => {
                            handle.extended_data(channel, ext, data).await.is_ok()
                        }
                        ChannelOutput::ExitStatus(status) => {
                            handle.exit_status_request(channel, status).await.is_ok()
                        }
                        ChannelOutput::Eof => handle.eof(channel).await.is_ok(),
                        ChannelOutput::Close => handle.close(channel).await.is_ok(),
                    };
                    if !delivered {
                        debug!(%channel, "Channel is gone, dropping output");
                        break;
                    }
                }
            }
            .in_current_span(),
        );
        ChannelWriter { tx }
    }

    pub async fn data(&self, data: Bytes) {
        let _ = self.tx.send(ChannelOutput::Data(data)).await;
    }

    pub async fn extended_data(&self, ext: u32, data: Bytes) {
        let _ = self.tx.send(ChannelOutput::ExtendedData(ext, data)).await;
    }

    pub async fn eof(&self) {
        let _ = self.tx.send(ChannelOutput::Eof).await;
    }

    pub async fn close(&self) {
        let _ = self.tx.send(ChannelOutput::Close).await;
    }

    /// Exit status, EOF and close, in that order.
    pub async fn exit(&self, status: u32) {
        for output in [
            ChannelOutput::ExitStatus(status),
            ChannelOutput::Eof,
            ChannelOutput::Close,
        ] {
            if self.tx.send(output).await.is_err() {
                break;
            }
        }
    }

    /// For reader threads that cannot await. Returns false once the channel is gone.
    pub fn blocking_data(&self, data: Bytes) -> bool {
        self.tx.blocking_send(ChannelOutput::Data(data)).is_ok()
    }
}
