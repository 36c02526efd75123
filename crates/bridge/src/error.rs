//! Bridge error types.

/// Failures while parsing peer messages or talking to the peer.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("MALFORMED_MESSAGE: invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("MALFORMED_MESSAGE: missing field `{0}`")]
    MissingField(&'static str),

    #[error("MALFORMED_MESSAGE: unknown message type `{0}`")]
    UnknownType(String),

    #[error("MALFORMED_MESSAGE: invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("PEER_UNREACHABLE: {0}")]
    Transport(String),

    #[error("PEER_UNCONFIRMED: {0}")]
    Unconfirmed(String),
}

impl From<BridgeError> for storysdk_core::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Transport(msg) => storysdk_core::Error::PeerUnreachable(msg),
            BridgeError::Unconfirmed(msg) => storysdk_core::Error::PeerUnconfirmed(msg),
            other => storysdk_core::Error::MalformedMessage(other.to_string()),
        }
    }
}
