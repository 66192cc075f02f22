use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("gateway handshake failed: {0}")]
    Handshake(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("push channel closed")]
    Closed,
}

impl ClientError {
    /// Business rejections (4xx) as opposed to transport or server failures.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { status, .. } if (400..500).contains(status))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
