use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network or I/O failure talking to the service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with something that breaks the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The service refused the request; `payload` is its report.
    #[error("server rejected request: {payload}")]
    ServerRejected { payload: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RemoteError {
    pub fn rejected(payload: impl Into<String>) -> Self {
        Self::ServerRejected {
            payload: payload.into(),
        }
    }

    /// True for failures of the channel rather than of the request.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Sqlite(_))
    }
}
