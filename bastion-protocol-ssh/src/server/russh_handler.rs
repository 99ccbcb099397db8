use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use russh::keys::{Certificate, PublicKey};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use super::session::ServerSession;
use crate::common::{ChannelRequest, PtyRequest, ServerChannelId};

pub struct ServerHandler {
    pub id: Uuid,
    pub session: Arc<Mutex<ServerSession>>,
    pub cancel: CancellationToken,
}

impl russh::server::Handler for ServerHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth> {
        let this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        Ok(this_session
            ._auth_rejected(user, "none")
            .instrument(span)
            .await)
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth> {
        let this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        Ok(this_session
            ._auth_rejected(user, "password")
            .instrument(span)
            .await)
    }

    async fn auth_publickey(&mut self, user: &str, _key: &PublicKey) -> Result<Auth> {
        let this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        Ok(this_session
            ._auth_rejected(user, "publickey")
            .instrument(span)
            .await)
    }

    async fn auth_openssh_certificate(
        &mut self,
        user: &str,
        certificate: &Certificate,
    ) -> Result<Auth> {
        let mut this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        Ok(this_session
            ._auth_certificate(user, certificate)
            .instrument(span)
            .await)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        // Traffic arrives through the callbacks below, the channel object is not needed
        let channel = ServerChannelId(channel.id());
        let mut this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        Ok(this_session
            ._channel_open_session(channel)
            .instrument(span)
            .await)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<()> {
        let modes = modes
            .iter()
            .take_while(|x| (x.0 as u8) > 0 && (x.0 as u8) < 160)
            .copied()
            .collect();
        let request = ChannelRequest::PtyReq(PtyRequest {
            term: term.to_string(),
            col_width,
            row_height,
            pix_width,
            pix_height,
            modes,
        });
        self.channel_request(channel, Ok(request), session).await?;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<()> {
        let request = ChannelRequest::Env {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        };
        self.channel_request(channel, Ok(request), session).await?;
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        self.channel_request(channel, Ok(ChannelRequest::Shell), session)
            .await?;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        self.channel_request(channel, ChannelRequest::parse_exec(data), session)
            .await?;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<()> {
        self.channel_request(channel, ChannelRequest::parse_subsystem(name), session)
            .await?;
        Ok(())
    }

    async fn agent_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<bool> {
        self.channel_request(channel, Ok(ChannelRequest::AgentForward), session)
            .await
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<()> {
        let mut this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        this_session
            ._window_change_request(
                ServerChannelId(channel),
                col_width,
                row_height,
                pix_width,
                pix_height,
            )
            .instrument(span)
            .await;
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<()> {
        let data = Bytes::copy_from_slice(data);
        let mut this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        this_session
            ._channel_data(ServerChannelId(channel), data)
            .instrument(span)
            .await;
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        let mut this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        this_session
            ._channel_eof(ServerChannelId(channel))
            .instrument(span)
            .await;
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        let mut this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        this_session
            ._channel_close(ServerChannelId(channel))
            .instrument(span)
            .await;
        Ok(())
    }
}

impl ServerHandler {
    async fn channel_request(
        &mut self,
        channel: ChannelId,
        request: Result<ChannelRequest, bastion_common::BastionError>,
        session: &mut Session,
    ) -> Result<bool> {
        let mut this_session = self.session.lock().await;
        let span = this_session.make_logging_span();
        Ok(this_session
            ._channel_request(ServerChannelId(channel), request, session)
            .instrument(span)
            .await?)
    }
}

impl Drop for ServerHandler {
    fn drop(&mut self) {
        debug!(session=%self.id, "Dropped");
        self.cancel.cancel();
    }
}
