use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;

use super::{Program, WorkerOutcome};
use crate::common::ChannelInput;
use crate::server::channel_writer::ChannelWriter;
use crate::SshError;

/// Runs `program` on pipes: stdout to channel data, stderr to extended data 1.
pub async fn run_process(
    program: Program,
    input: mpsc::UnboundedReceiver<ChannelInput>,
    writer: ChannelWriter,
    cancel: CancellationToken,
) -> Result<WorkerOutcome, SshError> {
    let mut child = Command::new(&program.program)
        .args(&program.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    debug!(program=%program.program, pid=?child.id(), "Process started");

    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(SshError::Io(std::io::Error::other("child stdio was not captured")));
    };

    let stdin_task = tokio::spawn(forward_input(stdin, input));
    let stdout_task = tokio::spawn(pump(stdout, writer.clone(), None));
    let stderr_task = tokio::spawn(pump(stderr, writer.clone(), Some(1)));

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            stdin_task.abort();
            return Ok(WorkerOutcome::Cancelled);
        }
        status = child.wait() => status?,
    };
    stdin_task.abort();

    // Output still buffered in the pipes goes out before the exit status.
    tokio::select! {
        _ = cancel.cancelled() => return Ok(WorkerOutcome::Cancelled),
        _ = async { let _ = tokio::join!(stdout_task, stderr_task); } => {}
    }

    Ok(WorkerOutcome::Exited(exit_code(status)))
}

async fn forward_input(mut stdin: ChildStdin, mut input: mpsc::UnboundedReceiver<ChannelInput>) {
    while let Some(item) = input.recv().await {
        match item {
            ChannelInput::Data(data) => {
                if stdin.write_all(&data).await.is_err() {
                    break;
                }
            }
            ChannelInput::Eof => break,
            ChannelInput::Resize(_) => {}
        }
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, writer: ChannelWriter, ext: Option<u32>) {
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let data = Bytes::copy_from_slice(&buf[..n]);
                match ext {
                    Some(ext) => writer.extended_data(ext, data).await,
                    None => writer.data(data).await,
                }
            }
            Err(error) => {
                debug!(%error, "Process output read failed");
                break;
            }
        }
    }
}

/// The exit code, or 128 + signal number for a killed process.
pub(crate) fn exit_code(status: ExitStatus) -> u32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code as u32,
        (None, Some(signal)) => 128 + signal as u32,
        (None, None) => 1,
    }
}
