use std::error::Error;

use poem::error::ResponseError;

#[derive(thiserror::Error, Debug)]
pub enum BastionError {
    #[error("bad parameter: {0}")]
    BadParameter(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("access denied")]
    AccessDenied,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("deserialization failed: {0}")]
    DeserializeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Everything leaves the gateway as a bare 500, the cause stays in the logs.
impl ResponseError for BastionError {
    fn status(&self) -> poem::http::StatusCode {
        poem::http::StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl BastionError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }

    pub fn bad_parameter<S: Into<String>>(message: S) -> Self {
        Self::BadParameter(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// True for errors caused by backend or local I/O rather than by the caller.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Internal(_) | Self::Io(_) | Self::Other(_) | Self::Anyhow(_)
        )
    }
}

/// Wrapped causes that cannot be cloned collapse into `Internal` with their message.
impl Clone for BastionError {
    fn clone(&self) -> Self {
        match self {
            Self::BadParameter(m) => Self::BadParameter(m.clone()),
            Self::NotFound(m) => Self::NotFound(m.clone()),
            Self::AuthenticationFailed => Self::AuthenticationFailed,
            Self::AccessDenied => Self::AccessDenied,
            Self::Internal(m) => Self::Internal(m.clone()),
            other => Self::Internal(other.to_string()),
        }
    }
}
