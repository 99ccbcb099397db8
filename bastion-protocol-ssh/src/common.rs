use std::fmt::{Display, Formatter};

use bastion_common::BastionError;
use bytes::Bytes;
use russh::{ChannelId, Pty};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub col_width: u32,
    pub row_height: u32,
    pub pix_width: u32,
    pub pix_height: u32,
    pub modes: Vec<(Pty, u32)>,
}

impl Default for PtyRequest {
    /// Terminal for a `shell` that arrives without `pty-req`.
    fn default() -> Self {
        Self {
            term: "dumb".into(),
            col_width: 80,
            row_height: 24,
            pix_width: 0,
            pix_height: 0,
            modes: vec![],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Hash, Eq)]
pub struct ServerChannelId(pub ChannelId);

impl Display for ServerChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Every request a session channel understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRequest {
    Exec(String),
    Shell,
    PtyReq(PtyRequest),
    Env { name: String, value: String },
    AgentForward,
    /// Run `command` on another SSH server, signing with the client's forwarded agent.
    Mux { address: String, command: String },
    /// Raw TCP tunnel.
    Tun { address: String },
}

impl ChannelRequest {
    /// `mux:<address>/<command>` or `tun:<address>`.
    pub fn parse_subsystem(name: &str) -> Result<Self, BastionError> {
        if let Some(rest) = name.strip_prefix("mux:") {
            let Some((address, command)) = rest.split_once('/') else {
                return Err(BastionError::bad_parameter(format!(
                    "mux subsystem without a command: {name:?}"
                )));
            };
            if address.is_empty() || command.is_empty() {
                return Err(BastionError::bad_parameter(format!(
                    "mux subsystem needs an address and a command: {name:?}"
                )));
            }
            return Ok(Self::Mux {
                address: address.to_owned(),
                command: command.to_owned(),
            });
        }

        if let Some(address) = name.strip_prefix("tun:") {
            if address.is_empty() {
                return Err(BastionError::bad_parameter("tun subsystem without an address"));
            }
            return Ok(Self::Tun {
                address: address.to_owned(),
            });
        }

        Err(BastionError::bad_parameter(format!(
            "unknown subsystem {name:?}"
        )))
    }

    pub fn parse_exec(command: &[u8]) -> Result<Self, BastionError> {
        let command = std::str::from_utf8(command)
            .map_err(|_| BastionError::bad_parameter("exec command is not valid UTF-8"))?;
        Ok(Self::Exec(command.to_owned()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Exec(_) => "exec",
            Self::Shell => "shell",
            Self::PtyReq(_) => "pty-req",
            Self::Env { .. } => "env",
            Self::AgentForward => "auth-agent-req",
            Self::Mux { .. } => "mux",
            Self::Tun { .. } => "tun",
        }
    }
}

/// Client-to-worker traffic on a running channel.
#[derive(Clone, Debug)]
pub enum ChannelInput {
    Data(Bytes),
    Eof,
    Resize(PtyRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mux() {
        assert_eq!(
            ChannelRequest::parse_subsystem("mux:10.0.0.7:22/expr 22 + 55").unwrap(),
            ChannelRequest::Mux {
                address: "10.0.0.7:22".into(),
                command: "expr 22 + 55".into(),
            }
        );
        // only the first slash separates the command
        assert_eq!(
            ChannelRequest::parse_subsystem("mux:db1/cat /etc/hostname").unwrap(),
            ChannelRequest::Mux {
                address: "db1".into(),
                command: "cat /etc/hostname".into(),
            }
        );
    }

    #[test]
    fn test_parse_tun() {
        assert_eq!(
            ChannelRequest::parse_subsystem("tun:[::1]:5432").unwrap(),
            ChannelRequest::Tun {
                address: "[::1]:5432".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for name in [
            "sftp",
            "",
            "mux:",
            "mux:host",
            "mux:/uptime",
            "mux:host/",
            "tun:",
            "tunnel:host:1",
        ] {
            assert!(
                matches!(
                    ChannelRequest::parse_subsystem(name),
                    Err(BastionError::BadParameter(_))
                ),
                "{name:?}"
            );
        }
    }

    #[test]
    fn test_parse_exec() {
        assert_eq!(
            ChannelRequest::parse_exec(b"expr 2 + 3").unwrap(),
            ChannelRequest::Exec("expr 2 + 3".into())
        );
        assert!(ChannelRequest::parse_exec(&[0xff, 0xfe]).is_err());
    }
}
