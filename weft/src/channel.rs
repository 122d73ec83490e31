//! The channel collaborator contract.
//!
//! A channel is the fabric's narrow view of the transport: something that
//! can carry a packet to the far side and absorb the ones nobody can
//! deliver. Socket/TLS adapters implement this trait outside the fabric.

use std::rc::Rc;

use async_trait::async_trait;

use crate::error::FabricError;
use crate::packet::Packet;
use crate::router::{Router, TargetRouter};

/// Which resolution step exhausted its options.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Undeliverable {
    /// No route entry and route discovery came up empty.
    Route,
    /// The route resolved locally but no target entry matched.
    Target,
}

/// Transport collaborator carrying packets for one connection.
#[async_trait(?Send)]
pub trait Channel {
    /// Carry a packet to the far side.
    async fn send(&self, pkt: Packet) -> Result<(), FabricError>;

    /// Absorb a packet whose destination could not be resolved.
    ///
    /// Reported exactly once per failed packet; never an error.
    async fn undeliverable(&self, pkt: Packet, kind: Undeliverable);
}

/// Shared handle to a channel.
pub type ChannelRef = Rc<dyn Channel>;

/// Context handed to every handler invocation.
#[derive(Clone)]
pub struct DispatchContext {
    /// The channel the packet arrived on (and the one replies go out on).
    pub channel: ChannelRef,
    /// The router that resolved the packet.
    pub router: Rc<Router>,
    /// The target router that resolved the packet, when dispatch got that
    /// far. Lets handlers register further targets.
    pub target_router: Option<Rc<TargetRouter>>,
}

/// A channel that goes nowhere: sends are dropped with a debug log,
/// undeliverable packets with a warning. Used for hub-local loopback
/// dispatch, where no transport is involved.
#[derive(Debug, Default)]
pub struct NullChannel;

#[async_trait(?Send)]
impl Channel for NullChannel {
    async fn send(&self, pkt: Packet) -> Result<(), FabricError> {
        tracing::debug!(
            id_route = %pkt.id_route,
            id_target = %pkt.id_target,
            "null channel dropped outbound packet"
        );
        Ok(())
    }

    async fn undeliverable(&self, pkt: Packet, kind: Undeliverable) {
        tracing::warn!(
            id_route = %pkt.id_route,
            id_target = %pkt.id_target,
            ?kind,
            "packet undeliverable"
        );
    }
}
