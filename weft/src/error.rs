//! Error types for the fabric layer.

use crate::codec::split::SplitError;
use crate::codec::WireError;
use crate::correlate::CorrelationError;
use crate::op::OpError;

/// Errors surfaced by dispatch, channels, and the message layer.
///
/// Handler and channel failures are caught per packet inside dispatch and
/// reported through the router's error hook; they never propagate back to
/// the `dispatch` caller.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Wire encoding or decoding failed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Op header packing or unpacking failed.
    #[error(transparent)]
    Op(#[from] OpError),

    /// Body splitting or reassembly failed.
    #[error(transparent)]
    Split(#[from] SplitError),

    /// A correlation future rejected.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// A packet handler failed.
    #[error("handler error: {message}")]
    Handler {
        /// Details reported by the handler.
        message: String,
    },

    /// The channel collaborator failed to carry a packet.
    #[error("channel error: {message}")]
    Channel {
        /// Details reported by the channel.
        message: String,
    },

    /// Attempted to register under an id reserved by the fabric.
    #[error("route id {id:?} is reserved")]
    ReservedRoute {
        /// The rejected route id.
        id: String,
    },

    /// A message-handle operation was used in the wrong role (e.g.
    /// answering on a handle that has no inbound message id).
    #[error("invalid handle state: {message}")]
    InvalidHandle {
        /// What the handle was missing.
        message: String,
    },
}

impl FabricError {
    /// Wrap a handler-side failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Wrap a channel-side failure.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }
}
