use std::io::{Read, Write};
#[cfg(unix)]
use std::os::fd::BorrowedFd;

use bytes::Bytes;
use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize, PtySystem, SlavePty,
};
#[cfg(unix)]
use russh::Pty;
#[cfg(unix)]
use rustix::termios::{
    self, InputModes, LocalModes, OptionalActions, OutputModes, SpecialCodeIndex as Sc,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;

use super::{Program, WorkerOutcome};
use crate::common::{ChannelInput, PtyRequest};
use crate::server::channel_writer::ChannelWriter;
use crate::SshError;

fn clamp(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn pty_size(request: &PtyRequest) -> PtySize {
    PtySize {
        rows: clamp(request.row_height),
        cols: clamp(request.col_width),
        pixel_width: clamp(request.pix_width),
        pixel_height: clamp(request.pix_height),
    }
}

/// Applies the `pty-req` terminal modes that have a termios counterpart.
#[cfg(unix)]
fn apply_modes(master: &dyn MasterPty, modes: &[(Pty, u32)]) -> Result<(), SshError> {
    let Some(fd) = master.as_raw_fd() else {
        return Ok(());
    };
    // SAFETY: the descriptor belongs to `master`, which outlives this borrow
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut term = termios::tcgetattr(fd).map_err(SshError::pty)?;

    for &(mode, value) in modes {
        let on = value != 0;
        let special = match mode {
            Pty::VINTR => Sc::VINTR,
            Pty::VQUIT => Sc::VQUIT,
            Pty::VERASE => Sc::VERASE,
            Pty::VKILL => Sc::VKILL,
            Pty::VEOF => Sc::VEOF,
            Pty::VEOL => Sc::VEOL,
            Pty::VEOL2 => Sc::VEOL2,
            Pty::VSTART => Sc::VSTART,
            Pty::VSTOP => Sc::VSTOP,
            Pty::VSUSP => Sc::VSUSP,
            Pty::VREPRINT => Sc::VREPRINT,
            Pty::VWERASE => Sc::VWERASE,
            Pty::VLNEXT => Sc::VLNEXT,
            Pty::VDISCARD => Sc::VDISCARD,
            _ => {
                set_flag(&mut term, mode, on);
                continue;
            }
        };
        if let Ok(value) = u8::try_from(value) {
            term.special_codes[special] = value;
        }
    }

    termios::tcsetattr(fd, OptionalActions::Now, &term).map_err(SshError::pty)
}

#[cfg(unix)]
fn set_flag(term: &mut termios::Termios, mode: Pty, on: bool) {
    match mode {
        Pty::IGNPAR => term.input_modes.set(InputModes::IGNPAR, on),
        Pty::INPCK => term.input_modes.set(InputModes::INPCK, on),
        Pty::ISTRIP => term.input_modes.set(InputModes::ISTRIP, on),
        Pty::INLCR => term.input_modes.set(InputModes::INLCR, on),
        Pty::IGNCR => term.input_modes.set(InputModes::IGNCR, on),
        Pty::ICRNL => term.input_modes.set(InputModes::ICRNL, on),
        Pty::IXON => term.input_modes.set(InputModes::IXON, on),
        Pty::IXANY => term.input_modes.set(InputModes::IXANY, on),
        Pty::IXOFF => term.input_modes.set(InputModes::IXOFF, on),
        Pty::IMAXBEL => term.input_modes.set(InputModes::IMAXBEL, on),
        Pty::ISIG => term.local_modes.set(LocalModes::ISIG, on),
        Pty::ICANON => term.local_modes.set(LocalModes::ICANON, on),
        Pty::ECHO => term.local_modes.set(LocalModes::ECHO, on),
        Pty::ECHOE => term.local_modes.set(LocalModes::ECHOE, on),
        Pty::ECHOK => term.local_modes.set(LocalModes::ECHOK, on),
        Pty::ECHONL => term.local_modes.set(LocalModes::ECHONL, on),
        Pty::NOFLSH => term.local_modes.set(LocalModes::NOFLSH, on),
        Pty::TOSTOP => term.local_modes.set(LocalModes::TOSTOP, on),
        Pty::IEXTEN => term.local_modes.set(LocalModes::IEXTEN, on),
        Pty::ECHOCTL => term.local_modes.set(LocalModes::ECHOCTL, on),
        Pty::ECHOKE => term.local_modes.set(LocalModes::ECHOKE, on),
        Pty::OPOST => term.output_modes.set(OutputModes::OPOST, on),
        Pty::ONLCR => term.output_modes.set(OutputModes::ONLCR, on),
        Pty::OCRNL => term.output_modes.set(OutputModes::OCRNL, on),
        Pty::ONOCR => term.output_modes.set(OutputModes::ONOCR, on),
        Pty::ONLRET => term.output_modes.set(OutputModes::ONLRET, on),
        // speeds and character size mean nothing on a pseudo terminal
        _ => {}
    }
}

/// Runs `program` on a new PTY sized after the client's `pty-req`.
///
/// The PTY library only reports signal names, so a killed process exits
/// with its generic failure code here.
pub async fn run_pty(
    program: Program,
    request: PtyRequest,
    mut input: mpsc::UnboundedReceiver<ChannelInput>,
    writer: ChannelWriter,
    cancel: CancellationToken,
) -> Result<WorkerOutcome, SshError> {
    let pair = native_pty_system()
        .openpty(pty_size(&request))
        .map_err(SshError::pty)?;
    #[cfg(unix)]
    if let Err(error) = apply_modes(&*pair.master, &request.modes) {
        debug!(%error, "Terminal modes not applied");
    }

    let mut command = CommandBuilder::new(&program.program);
    command.args(&program.args);
    command.env("TERM", &request.term);
    let mut child = pair.slave.spawn_command(command).map_err(SshError::pty)?;
    drop(pair.slave);
    debug!(program=%program.program, term=%request.term, "PTY process started");

    let mut killer = child.clone_killer();
    let master = pair.master;
    let mut reader = master.try_clone_reader().map_err(SshError::pty)?;
    let mut pty_writer = master.take_writer().map_err(SshError::pty)?;

    let output = writer.clone();
    let reader_task = tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if !output.blocking_data(Bytes::copy_from_slice(&buf[..n])) {
                        break;
                    }
                }
            }
        }
    });

    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::task::spawn_blocking(move || {
        while let Some(data) = stdin_rx.blocking_recv() {
            if pty_writer
                .write_all(&data)
                .and_then(|_| pty_writer.flush())
                .is_err()
            {
                break;
            }
        }
    });
    let mut stdin_tx = Some(stdin_tx);

    let mut wait = tokio::task::spawn_blocking(move || child.wait());
    let mut input_open = true;
    let status = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = killer.kill();
                return Ok(WorkerOutcome::Cancelled);
            }
            status = &mut wait => break status.map_err(SshError::pty)??,
            item = input.recv(), if input_open => match item {
                Some(ChannelInput::Data(data)) => {
                    if let Some(tx) = &stdin_tx {
                        let _ = tx.send(data);
                    }
                }
                Some(ChannelInput::Eof) => stdin_tx = None,
                Some(ChannelInput::Resize(request)) => {
                    if let Err(error) = master.resize(pty_size(&request)) {
                        debug!(%error, "PTY resize failed");
                    }
                }
                None => input_open = false,
            }
        }
    };
    drop(stdin_tx);

    // The reader stops once the last slave descriptor is gone.
    tokio::select! {
        _ = cancel.cancelled() => return Ok(WorkerOutcome::Cancelled),
        _ = reader_task => {}
    }

    Ok(WorkerOutcome::Exited(status.exit_code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_size_clamps() {
        let size = pty_size(&PtyRequest {
            term: "xterm".into(),
            col_width: 80,
            row_height: 100_000,
            pix_width: 0,
            pix_height: 0,
            modes: vec![],
        });
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, u16::MAX);
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_modes() {
        let pair = native_pty_system()
            .openpty(pty_size(&PtyRequest::default()))
            .unwrap();
        apply_modes(
            &*pair.master,
            &[
                (Pty::ECHO, 0),
                (Pty::ICRNL, 0),
                (Pty::VINTR, 7),
                (Pty::TTY_OP_ISPEED, 38400),
            ],
        )
        .unwrap();

        let fd = pair.master.as_raw_fd().unwrap();
        let term = termios::tcgetattr(unsafe { BorrowedFd::borrow_raw(fd) }).unwrap();
        assert!(!term.local_modes.contains(LocalModes::ECHO));
        assert!(!term.input_modes.contains(InputModes::ICRNL));
        assert!(term.local_modes.contains(LocalModes::ICANON));
        assert_eq!(term.special_codes[Sc::VINTR], 7);
    }
}
