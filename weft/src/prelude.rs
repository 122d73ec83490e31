//! Common imports for the weft message fabric.
//!
//! This module provides a convenient prelude for importing commonly used
//! types and traits.

pub use crate::channel::{Channel, ChannelRef, DispatchContext, NullChannel, Undeliverable};
pub use crate::codec::split::{join_packets, split_packets, SplitError};
pub use crate::codec::{decode, encode, try_decode, WireError, WireFormat};
pub use crate::config::FabricConfig;
pub use crate::correlate::{CorrelationContext, CorrelationError, Correlator, TimeoutReaper};
pub use crate::discovery::{DiscoveryBroker, Resolver};
pub use crate::error::FabricError;
pub use crate::hub::Hub;
pub use crate::message::{MessageHandle, PartWriter};
pub use crate::op::{Frame, FrameRole, FrameTable, Op, OpField, OpKind};
pub use crate::packet::{Body, Packet, PacketKind};
pub use crate::router::{
    PacketHandler, PeerRouter, Route, RouteHit, Router, TargetHit, TargetRouter,
};
pub use crate::types::Token;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use std::rc::Rc;
pub use std::time::Duration;

/// Result type specialized to fabric errors.
pub type Result<T> = std::result::Result<T, FabricError>;
