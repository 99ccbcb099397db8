use bastion_common::BastionError;

#[derive(thiserror::Error, Debug)]
pub enum SshError {
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),
    #[error("key error: {0}")]
    Key(#[from] russh::keys::Error),
    #[error("agent error: {0}")]
    Agent(#[from] russh::AgentAuthError),
    #[error("certificate rejected: {0}")]
    CertificateRejected(&'static str),
    #[error("upstream rejected the certificate")]
    UpstreamAuthFailed,
    #[error("upstream refused the command")]
    UpstreamRequestFailed,
    #[error("pty error: {0}")]
    Pty(String),
    #[error(transparent)]
    Bastion(#[from] BastionError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl SshError {
    pub fn pty<E: std::fmt::Display>(err: E) -> Self {
        Self::Pty(err.to_string())
    }
}
