use thiserror::Error;
use wfst_core::CoreError;
use wfst_remote::RemoteError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("service returned {returned} identifier(s) for {sent} insert(s) of {type_name}")]
    IdentifierCountMismatch {
        type_name: String,
        sent: usize,
        returned: usize,
    },

    #[error("service answered for unexpected feature type: {0}")]
    UnexpectedType(String),
}

impl EngineError {
    /// True if the failure came from the service refusing the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::ServerRejected { .. }))
    }

    /// True if the service broke the request/response contract.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::Remote(RemoteError::Protocol(_))
                | Self::IdentifierCountMismatch { .. }
                | Self::UnexpectedType(_)
        )
    }
}
