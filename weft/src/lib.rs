//! # Weft
//!
//! A message fabric: a routing and correlation substrate layered over an
//! abstract bidirectional packet channel. Independently addressed routes
//! (peers/hubs) exchange messages addressed to named targets (handlers
//! within a route).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Hub                                                         │
//! │   ┌──────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │   │ Router   │  │ PeerRouter   │  │ CorrelationContext   │  │
//! │   │ routes → │  │ hello/olleh  │  │ pending replies      │  │
//! │   │ local /  │  │ on route ""  │  │ reassembly buffers   │  │
//! │   │ forward  │  └──────────────┘  │ shared TimeoutReaper │  │
//! │   └────┬─────┘                    └──────────────────────┘  │
//! │        │ TargetRouter per served route                      │
//! │        └── targets → handlers                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │ codec: text / binary / length-prefixed wire variants        │
//! │ split: oversized bodies → seq'd chunks + terminal marker    │
//! │ op:    (kind, action-symbol) → header field framing         │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Channel (transport collaborator; sockets live outside)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fabric runs on a single-threaded cooperative runtime: interior
//! mutability is `Rc`/`RefCell`/`Cell`, background work (dispatch
//! draining, timeout reaping) goes through `tokio::task::spawn_local`,
//! and the embedder provides the `LocalSet`.
//!
//! Delivery semantics: at-most-once local delivery with idempotent
//! registration. First registration for an id wins, duplicates are
//! no-ops, and the peer handshake leans on that idempotency to converge
//! regardless of greeting order.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Channel collaborator contract and dispatch context.
pub mod channel;

/// Wire codec: three variants over one packet model, plus splitting.
pub mod codec;

/// Hub configuration: timeouts and wire budgets.
pub mod config;

/// Correlation: pending replies, timeout reaping, reassembly.
pub mod correlate;

/// Candidate-racing discovery with per-key de-duplication.
pub mod discovery;

/// Error types for the fabric layer.
pub mod error;

/// The hub facade.
pub mod hub;

/// Bound message handles and part writers.
pub mod message;

/// Operation framing table.
pub mod op;

/// Packet model.
pub mod packet;

/// Common imports.
pub mod prelude;

/// Serialized dispatch queue.
pub mod queue;

/// Route, target, and peer routers.
pub mod router;

/// Correlation identifier types.
pub mod types;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use channel::{Channel, ChannelRef, DispatchContext, NullChannel, Undeliverable};
pub use codec::split::{join_packets, split_packets, SplitError};
pub use codec::{decode, encode, try_decode, WireError, WireFormat};
pub use config::FabricConfig;
pub use correlate::{
    CorrelationContext, CorrelationError, Correlator, ReassemblyBuffer, ReplyFuture, TimeoutReaper,
};
pub use discovery::{DiscoveryBroker, Resolver};
pub use error::FabricError;
pub use hub::Hub;
pub use message::{MessageHandle, PartWriter};
pub use op::{Frame, FrameRole, FrameTable, Op, OpError, OpField, OpKind};
pub use packet::{Body, Packet, PacketKind};
pub use queue::DispatchQueue;
pub use router::{
    PacketHandler, PeerRouter, Route, RouteHit, Router, TargetHit, TargetRouter, HELLO_TARGET,
    OLLEH_TARGET,
};
pub use types::Token;
