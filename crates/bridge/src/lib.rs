//! Message bridge between the native cache and an embedded web peer.
//!
//! The peer reads and writes native storage with `storysdk:storage:*`
//! envelopes, answered by [`StorageBridge`]. Invalidation flows the other
//! way: [`PeerChannel`] turns each [`storysdk_core::InvalidationCommand`]
//! into an injected script and, when configured, waits for the peer's
//! acknowledgement.

pub mod callbacks;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod instruction;
pub mod peer;

pub use callbacks::CallbackRegistry;
pub use envelope::{Envelope, PeerMessage, ResponseData, ResponseEnvelope};
pub use error::BridgeError;
pub use handler::{Outcome, StorageBridge};
pub use instruction::{GlobPattern, PeerInstruction};
pub use peer::{PeerChannel, PeerTransport};
