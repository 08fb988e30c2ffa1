use serde::{Deserialize, Serialize};

use crate::network::NetworkError;
use crate::signing::SigningError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no client for {0}")]
    NoClient(String),
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    #[error(transparent)]
    Signing(SigningError),
    #[error("no message: {0}")]
    NoMessage(String),
    #[error("stream {key} failed: {reason}")]
    StreamFailure { key: String, reason: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Transport(NetworkError),
}

impl From<NetworkError> for BridgeError {
    fn from(error: NetworkError) -> Self {
        match error {
            NetworkError::Signing(e) => Self::Signing(e),
            other => Self::Transport(other),
        }
    }
}

impl From<SigningError> for BridgeError {
    fn from(error: SigningError) -> Self {
        Self::Signing(error)
    }
}

impl BridgeError {
    /// Stable discriminator the host can branch on.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::NoClient(_) => "noClient",
            BridgeError::ConversationNotFound(_) => "conversationNotFound",
            BridgeError::Signing(SigningError::MalformedSignature { .. }) => "malformedSignature",
            BridgeError::Signing(SigningError::InvalidEncoding(_)) => "malformedSignature",
            BridgeError::Signing(SigningError::TimedOut { .. }) => "signingTimedOut",
            BridgeError::Signing(_) => "signingFailed",
            BridgeError::NoMessage(_) => "noMessage",
            BridgeError::StreamFailure { .. } => "streamFailure",
            BridgeError::InvalidRequest(_) => "invalidRequest",
            BridgeError::Transport(_) => "transportFailure",
        }
    }
}

/// Error as it crosses the host boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&BridgeError> for ErrorBody {
    fn from(error: &BridgeError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}
