//! The hub: one fabric endpoint wiring router, handshake, and
//! correlation together.
//!
//! A [`Hub`] owns a [`Router`], its own [`TargetRouter`] (under the hub's
//! route id), the [`PeerRouter`] on the reserved empty route, one
//! [`CorrelationContext`], and the frame table. Inbound packets enter
//! through [`Hub::ingest`] (or the byte-level `deliver_*` helpers), which
//! runs the correlation interception before route dispatch:
//!
//! 1. split-kind chunks addressed to a locally served route feed the
//!    reassembly table; a completed transfer re-enters as its joined
//!    packet,
//! 2. msgid-bearing packets addressed to a locally served route resolve
//!    the pending reply (late ones are dropped silently),
//! 3. everything else (handshake greetings, requests, datagrams, and
//!    packets for forwarded routes) goes to the router untouched.
//!
//! Packets for forwarded (relayed) routes are never intercepted; relays
//! pass chunks through unassembled.

use std::rc::Rc;

use crate::channel::{ChannelRef, NullChannel};
use crate::codec::{self, WireError, WireFormat};
use crate::config::FabricConfig;
use crate::correlate::{CorrelationContext, Correlator, TimeoutReaper};
use crate::discovery::Resolver;
use crate::error::FabricError;
use crate::message::MessageHandle;
use crate::op::FrameTable;
use crate::packet::Packet;
use crate::router::{
    DispatchErrorHook, PacketHandler, PeerRouter, RouteHit, Router, TargetHit, TargetRouter,
};

/// One fabric endpoint.
pub struct Hub {
    id: String,
    config: FabricConfig,
    frames: Rc<FrameTable>,
    router: Rc<Router>,
    targets: Rc<TargetRouter>,
    peer: Rc<PeerRouter>,
    correlator: Correlator,
    corr_ctx: CorrelationContext,
}

impl Hub {
    /// Build a hub serving `id` with the default frame table.
    ///
    /// The hub's own id is auto-published for the peer handshake.
    ///
    /// # Errors
    ///
    /// The hub id must be a non-empty, separator-free route id.
    pub fn new(id: impl Into<String>, config: FabricConfig) -> Result<Rc<Self>, FabricError> {
        Self::with_frames(id, config, FrameTable::new())
    }

    /// Build a hub with a custom (e.g. override-composed) frame table.
    ///
    /// # Errors
    ///
    /// As [`Hub::new`].
    pub fn with_frames(
        id: impl Into<String>,
        config: FabricConfig,
        frames: FrameTable,
    ) -> Result<Rc<Self>, FabricError> {
        let id = id.into();
        if id.is_empty() {
            return Err(FabricError::ReservedRoute { id });
        }

        let router = Router::new(config.discovery_timeout);
        let targets = TargetRouter::bind(&router, &id, config.discovery_timeout)?;
        let peer = PeerRouter::bind(&router, config.discovery_timeout)?;
        peer.publish_route(&id);

        let correlator = Correlator::new(config.reply_timeout);
        let corr_ctx = correlator.context();

        tracing::info!(hub = %id, "hub constructed");
        Ok(Rc::new(Self {
            id,
            config,
            frames: Rc::new(frames),
            router,
            targets,
            peer,
            correlator,
            corr_ctx,
        }))
    }

    /// The hub's route id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The hub's router.
    pub fn router(&self) -> &Rc<Router> {
        &self.router
    }

    /// The hub's own target registry.
    pub fn targets(&self) -> &Rc<TargetRouter> {
        &self.targets
    }

    /// The frame table.
    pub fn frames(&self) -> &Rc<FrameTable> {
        &self.frames
    }

    /// The hub's correlation context.
    pub fn correlation(&self) -> &CorrelationContext {
        &self.corr_ctx
    }

    /// The shared timeout reaper.
    pub fn reaper(&self) -> TimeoutReaper {
        self.correlator.reaper()
    }

    /// Spawn the reaper's interval loop on the current `LocalSet`.
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_local(self.correlator.reaper().run())
    }

    /// Register a handler under the hub's own route.
    pub fn register_target(
        &self,
        id_target: &str,
        handler: Rc<dyn PacketHandler>,
    ) -> Rc<dyn PacketHandler> {
        self.targets.register_target(id_target, handler)
    }

    /// Append a route-discovery candidate.
    pub fn add_route_resolver(&self, resolver: Rc<dyn Resolver<RouteHit>>) {
        self.router.add_route_resolver(resolver);
    }

    /// Append a target-discovery candidate for the hub's own route.
    pub fn add_target_resolver(&self, resolver: Rc<dyn Resolver<TargetHit>>) {
        self.targets.add_target_resolver(resolver);
    }

    /// Replace the dispatch error hook.
    pub fn set_dispatch_error_hook(&self, hook: DispatchErrorHook) {
        self.router.set_error_hook(hook);
    }

    /// Advertise an additional route id in the peer handshake.
    pub fn publish_route(&self, id_route: &str) {
        self.peer.publish_route(id_route);
    }

    /// Send the initial `hello` greeting over `channel`.
    ///
    /// # Errors
    ///
    /// Propagates the channel's send failure.
    pub async fn greet(&self, channel: &ChannelRef) -> Result<(), FabricError> {
        self.peer.greet(channel).await
    }

    /// Feed inbound packets from `channel` through correlation
    /// interception and into the router. Returns immediately; processing
    /// is serialized by the dispatch queue.
    pub fn ingest(&self, pkts: Vec<Packet>, channel: ChannelRef) {
        let mut pass = Vec::new();
        for pkt in pkts {
            if let Some(pkt) = self.intercept(pkt) {
                pass.push(pkt);
            }
        }
        if !pass.is_empty() {
            self.router.dispatch(pass, channel);
        }
    }

    /// Correlation interception; returns the packet when it should
    /// continue to route dispatch.
    fn intercept(&self, pkt: Packet) -> Option<Packet> {
        if !self.router.is_local(&pkt.id_route) {
            return Some(pkt);
        }
        if pkt.kind.is_split() {
            let snapshot = pkt.clone();
            return match self.corr_ctx.accept_split(pkt) {
                Ok(None) => None,
                Ok(Some(joined)) => self.consume_reply(joined),
                Err(err) => {
                    // Not recoverable locally; surface through the
                    // dispatch error hook.
                    let err = FabricError::from(err);
                    self.router.dispatch_error(&err, &snapshot);
                    None
                }
            };
        }
        self.consume_reply(pkt)
    }

    /// Offer a msgid-bearing packet to the pending-reply table. Late or
    /// unmatched replies are dropped silently.
    fn consume_reply(&self, pkt: Packet) -> Option<Packet> {
        let msgid = pkt.op.as_ref().and_then(|op| op.msgid.clone());
        match msgid {
            Some(msgid) => {
                if !self.corr_ctx.resolve(&msgid, pkt) {
                    tracing::debug!(msgid = %msgid, "late reply dropped");
                }
                None
            }
            None => Some(pkt),
        }
    }

    /// Decode one frame and ingest it.
    ///
    /// # Errors
    ///
    /// Propagates decode errors (framing violations) to the transport
    /// caller.
    pub fn deliver_bytes(
        &self,
        buf: &[u8],
        format: WireFormat,
        channel: ChannelRef,
    ) -> Result<(), WireError> {
        let pkt = codec::decode(buf, format, &self.frames)?;
        self.ingest(vec![pkt], channel);
        Ok(())
    }

    /// Decode every complete length-prefixed frame in `buf`, ingesting
    /// each; returns the number of bytes consumed (the caller keeps the
    /// remainder for the next read).
    ///
    /// # Errors
    ///
    /// Propagates decode errors; previously ingested frames stay
    /// ingested.
    pub fn deliver_stream(
        &self,
        buf: &[u8],
        channel: ChannelRef,
    ) -> Result<usize, WireError> {
        let mut consumed = 0;
        while let Some((pkt, used)) = codec::try_decode(&buf[consumed..], &self.frames)? {
            self.ingest(vec![pkt], Rc::clone(&channel));
            consumed += used;
        }
        Ok(consumed)
    }

    /// Dispatch a packet locally (loopback), e.g. to the hub's own
    /// targets. No transport is involved; replies from handlers that
    /// only know this channel are dropped.
    pub fn send(&self, pkt: Packet) {
        self.ingest(vec![pkt], Rc::new(NullChannel));
    }

    /// Build a source message handle addressed to `(id_route,
    /// id_target)`, sending over `channel`.
    ///
    /// Chain [`MessageHandle::with_from`] to give it a reply address
    /// (conventionally this hub's id plus a registered target).
    pub fn messenger(
        &self,
        id_route: impl Into<String>,
        id_target: impl Into<String>,
        channel: ChannelRef,
    ) -> MessageHandle {
        MessageHandle::new(
            id_route,
            id_target,
            channel,
            self.corr_ctx.clone(),
            Rc::clone(&self.frames),
            self.config.body_budget(),
        )
    }

    /// Build a reply handle for an inbound correlated packet.
    pub fn reply_to(&self, pkt: &Packet, channel: ChannelRef) -> Option<MessageHandle> {
        MessageHandle::reply_to(
            pkt,
            channel,
            self.corr_ctx.clone(),
            Rc::clone(&self.frames),
            self.config.body_budget(),
        )
    }
}
