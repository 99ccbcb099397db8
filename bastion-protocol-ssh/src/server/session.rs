use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bastion_common::BastionError;
use bytes::Bytes;
use russh::keys::Certificate;
use russh::server::{Auth, Handle, Session};
use russh::{MethodKind, MethodSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use super::certificate::validate_user_certificate;
use super::channel_writer::ChannelWriter;
use super::worker::{run_mux, run_process, run_pty, run_tunnel, spawn_worker, Program};
use super::ServerContext;
use crate::client::UpstreamTarget;
use crate::common::{ChannelInput, ChannelRequest, PtyRequest, ServerChannelId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChannelKind {
    Shell,
    Exec,
    Mux,
    Tun,
}

/// A session channel. It stays configurable until `exec`, `shell` or a
/// subsystem fixes its kind, after which only data flows.
struct ChannelState {
    kind: Option<ChannelKind>,
    pty: Option<PtyRequest>,
    env: Vec<(String, String)>,
    input: Option<mpsc::UnboundedSender<ChannelInput>>,
    cancel: CancellationToken,
}

impl ChannelState {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            kind: None,
            pty: None,
            env: vec![],
            input: None,
            cancel,
        }
    }

    /// Fixes the channel kind and hands out the worker's ends of the channel.
    fn start(
        &mut self,
        kind: ChannelKind,
        handle: Handle,
        channel: ServerChannelId,
    ) -> Result<
        (
            mpsc::UnboundedReceiver<ChannelInput>,
            ChannelWriter,
            CancellationToken,
        ),
        BastionError,
    > {
        if let Some(existing) = self.kind {
            return Err(BastionError::bad_parameter(format!(
                "channel is already running {existing:?}"
            )));
        }
        if !self.env.is_empty() {
            debug!(count = self.env.len(), "Environment variables are not passed on");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.kind = Some(kind);
        self.input = Some(tx);
        Ok((
            rx,
            ChannelWriter::new(handle, channel.0),
            self.cancel.clone(),
        ))
    }

    fn send(&self, item: ChannelInput) -> bool {
        match &self.input {
            Some(input) => input.send(item).is_ok(),
            None => false,
        }
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: Some(MethodSet::from(&[MethodKind::PublicKey][..])),
        partial_success: false,
    }
}

pub struct ServerSession {
    pub id: Uuid,
    remote_address: SocketAddr,
    context: Arc<ServerContext>,
    username: Option<String>,
    certificate: Option<Certificate>,
    agent_forwarding: bool,
    channels: HashMap<ServerChannelId, ChannelState>,
    cancel: CancellationToken,
}

impl ServerSession {
    pub fn new(
        id: Uuid,
        remote_address: SocketAddr,
        context: Arc<ServerContext>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            remote_address,
            context,
            username: None,
            certificate: None,
            agent_forwarding: false,
            channels: HashMap::new(),
            cancel,
        }
    }

    pub fn make_logging_span(&self) -> tracing::Span {
        let client_ip = self.remote_address.ip().to_string();
        match self.username {
            Some(ref username) => {
                info_span!("SSH", session=%self.id, session_username=%username, %client_ip)
            }
            None => info_span!("SSH", session=%self.id, %client_ip),
        }
    }

    pub async fn _auth_certificate(&mut self, username: &str, certificate: &Certificate) -> Auth {
        match validate_user_certificate(certificate, username, &self.context.trusted_cas) {
            Ok(()) => {
                info!(
                    %username,
                    key_id=%certificate.key_id(),
                    serial=certificate.serial(),
                    "Authenticated with a certificate"
                );
                self.username = Some(username.to_owned());
                self.certificate = Some(certificate.clone());
                Auth::Accept
            }
            Err(error) => {
                warn!(%username, key_id=%certificate.key_id(), %error, "Certificate rejected");
                reject()
            }
        }
    }

    pub async fn _auth_rejected(&self, username: &str, method: &str) -> Auth {
        info!(%username, method, "Rejecting non-certificate authentication");
        reject()
    }

    pub async fn _channel_open_session(&mut self, channel: ServerChannelId) -> bool {
        if self.username.is_none() {
            warn!(%channel, "Channel opened before authentication");
            return false;
        }
        debug!(%channel, "Opening session channel");
        self.channels
            .insert(channel, ChannelState::new(self.cancel.child_token()));
        true
    }

    /// Applies a channel request and answers it. Returns whether it was accepted.
    pub async fn _channel_request(
        &mut self,
        channel: ServerChannelId,
        request: Result<ChannelRequest, BastionError>,
        session: &mut Session,
    ) -> Result<bool, russh::Error> {
        let request_name = request.as_ref().map(|r| r.name()).unwrap_or("invalid");
        match request.and_then(|request| self.apply_request(channel, request, session.handle())) {
            Ok(()) => {
                debug!(%channel, request=request_name, "Channel request accepted");
                session.channel_success(channel.0)?;
                Ok(true)
            }
            Err(error) => {
                warn!(%channel, request=request_name, %error, "Channel request refused");
                session.channel_failure(channel.0)?;
                Ok(false)
            }
        }
    }

    fn apply_request(
        &mut self,
        channel: ServerChannelId,
        request: ChannelRequest,
        handle: Handle,
    ) -> Result<(), BastionError> {
        let Some(state) = self.channels.get_mut(&channel) else {
            return Err(BastionError::not_found(format!("channel {channel}")));
        };

        match request {
            ChannelRequest::PtyReq(pty) => {
                if state.pty.is_some() {
                    return Err(BastionError::bad_parameter("a PTY is already allocated"));
                }
                if state.kind.is_some() {
                    return Err(BastionError::bad_parameter("the channel is already running"));
                }
                debug!(
                    term=%pty.term,
                    cols=pty.col_width,
                    rows=pty.row_height,
                    "PTY allocated"
                );
                state.pty = Some(pty);
            }
            ChannelRequest::Env { name, value } => {
                debug!(%name, "Recording environment variable");
                state.env.push((name, value));
            }
            ChannelRequest::AgentForward => {
                info!("Agent forwarding enabled");
                self.agent_forwarding = true;
            }
            ChannelRequest::Exec(command) => {
                let pty = state.pty.clone();
                let (input, writer, cancel) = state.start(ChannelKind::Exec, handle, channel)?;
                info!(%command, pty = pty.is_some(), "Executing");
                let program = Program::command(&command);
                match pty {
                    Some(pty) => {
                        spawn_worker(writer.clone(), run_pty(program, pty, input, writer, cancel))
                    }
                    None => spawn_worker(writer.clone(), run_process(program, input, writer, cancel)),
                }
            }
            ChannelRequest::Shell => {
                let requested = state.pty.is_some();
                // Interactive input ends lines with CR, which only a terminal turns into NL
                let pty = state.pty.clone().unwrap_or_default();
                let (input, writer, cancel) = state.start(ChannelKind::Shell, handle, channel)?;
                info!(pty = requested, "Starting shell");
                spawn_worker(
                    writer.clone(),
                    run_pty(Program::shell(), pty, input, writer, cancel),
                );
            }
            ChannelRequest::Mux { address, command } => {
                if !self.agent_forwarding {
                    return Err(BastionError::bad_parameter(
                        "mux requires agent forwarding to be enabled first",
                    ));
                }
                let (Some(username), Some(certificate)) = (&self.username, &self.certificate)
                else {
                    return Err(BastionError::AuthenticationFailed);
                };
                let target = UpstreamTarget {
                    address,
                    username: username.clone(),
                    certificate: certificate.clone(),
                    command,
                    pty: state.pty.clone(),
                };
                let (input, writer, cancel) =
                    state.start(ChannelKind::Mux, handle.clone(), channel)?;
                info!(address=%target.address, command=%target.command, "Starting mux");
                spawn_worker(
                    writer.clone(),
                    run_mux(
                        self.context.connector.clone(),
                        target,
                        handle,
                        input,
                        writer,
                        cancel,
                    ),
                );
            }
            ChannelRequest::Tun { address } => {
                let (input, writer, cancel) = state.start(ChannelKind::Tun, handle, channel)?;
                info!(%address, "Opening tunnel");
                spawn_worker(writer.clone(), run_tunnel(address, input, writer, cancel));
            }
        }
        Ok(())
    }

    pub async fn _channel_data(&mut self, channel: ServerChannelId, data: Bytes) {
        match self.channels.get(&channel) {
            Some(state) if state.send(ChannelInput::Data(data.clone())) => {}
            Some(_) => debug!(%channel, len=data.len(), "Dropping data for an idle channel"),
            // also the agent channels this side opened
            None => trace!(%channel, len=data.len(), "Data for an untracked channel"),
        }
    }

    pub async fn _channel_eof(&mut self, channel: ServerChannelId) {
        if let Some(state) = self.channels.get(&channel) {
            debug!(%channel, "EOF");
            state.send(ChannelInput::Eof);
        }
    }

    pub async fn _window_change_request(
        &mut self,
        channel: ServerChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    ) {
        let Some(state) = self.channels.get_mut(&channel) else {
            return;
        };
        let Some(pty) = state.pty.as_mut() else {
            debug!(%channel, "Ignoring window change without a PTY");
            return;
        };
        pty.col_width = col_width;
        pty.row_height = row_height;
        pty.pix_width = pix_width;
        pty.pix_height = pix_height;
        let resize = ChannelInput::Resize(pty.clone());
        state.send(resize);
    }

    pub async fn _channel_close(&mut self, channel: ServerChannelId) {
        if let Some(state) = self.channels.remove(&channel) {
            debug!(%channel, kind=?state.kind, "Channel closed");
            state.cancel.cancel();
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        info!(session=%self.id, "Closed session");
    }
}
