//! Errors raised while handling one stdin line.
//!
//! None of these end the process; the read loop logs them and moves on.

use storysdk_bridge::BridgeError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A host control message was missing fields.
    #[error("INVALID_CONTROL: {0}")]
    InvalidControl(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// stdout is gone.
    #[error("OUTPUT_CLOSED: {0}")]
    Output(#[from] std::io::Error),
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        HostError::Bridge(BridgeError::InvalidJson(err))
    }
}
