use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unauthorized after token refresh")]
    Unauthorized,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream is not connected")]
    NotConnected,

    #[error("Stream connect superseded")]
    Superseded,

    #[error("Channel send error")]
    ChannelSend,
}

impl Error {
    /// Errors after which the caller should drop to the logged-out state.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Error::Unauthorized | Error::RefreshFailed(_) => true,
            Error::Status { status, .. } => *status == 401,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Unauthorized => Some(401),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
