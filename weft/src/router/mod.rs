//! Route registry and dispatch pipeline.
//!
//! A [`Router`] maps route ids to [`Route`] entries and drives packet
//! dispatch through the serial queue. A route is either served locally by
//! a handler or forwarded over a channel to the peer that advertised it,
//! decided once at registration and never re-inspected at dispatch time.
//!
//! Registration is idempotent: the first entry for an id wins, later
//! registrations return the existing entry untouched. The peer-handshake
//! protocol leans on this to tolerate races.

mod peer;
mod target;

pub use peer::{PeerRouter, HELLO_TARGET, OLLEH_TARGET};
pub use target::{TargetHit, TargetRouter};

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{Channel, ChannelRef, DispatchContext, Undeliverable};
use crate::discovery::{DiscoveryBroker, Resolver};
use crate::error::FabricError;
use crate::packet::Packet;
use crate::queue::DispatchQueue;

/// A registered packet handler.
#[async_trait(?Send)]
pub trait PacketHandler {
    /// Handle one packet. Errors are caught by dispatch and reported
    /// through the router's error hook.
    async fn on_packet(&self, pkt: Packet, ctx: DispatchContext) -> Result<(), FabricError>;
}

/// One route registry entry.
#[derive(Clone)]
pub enum Route {
    /// Served by a local handler.
    Local(Rc<dyn PacketHandler>),
    /// Bridged to a remote peer: packets re-sent over this channel.
    Forwarding(ChannelRef),
}

impl Route {
    /// The local handler, when this route is served locally.
    pub fn as_local(&self) -> Option<&Rc<dyn PacketHandler>> {
        match self {
            Route::Local(handler) => Some(handler),
            Route::Forwarding(_) => None,
        }
    }
}

/// A route-discovery answer: either a handler to serve the route locally
/// or a channel-like peer to forward it to.
#[derive(Clone)]
pub enum RouteHit {
    /// Register the route as locally served.
    Handler(Rc<dyn PacketHandler>),
    /// Register the route as forwarded over this channel.
    Channel(ChannelRef),
}

/// Hook receiving handler/forwarding errors caught during dispatch.
pub type DispatchErrorHook = Rc<dyn Fn(&FabricError, &Packet)>;

/// Route registry plus the dispatch pipeline.
pub struct Router {
    routes: RefCell<HashMap<String, Route>>,
    resolvers: RefCell<Vec<Rc<dyn Resolver<RouteHit>>>>,
    broker: DiscoveryBroker<RouteHit>,
    queue: DispatchQueue,
    error_hook: RefCell<DispatchErrorHook>,
    self_ref: RefCell<Weak<Router>>,
}

impl Router {
    /// Create a router with the given discovery timeout.
    pub fn new(discovery_timeout: Duration) -> Rc<Self> {
        let router = Rc::new(Self {
            routes: RefCell::new(HashMap::new()),
            resolvers: RefCell::new(Vec::new()),
            broker: DiscoveryBroker::new(discovery_timeout),
            queue: DispatchQueue::new(),
            error_hook: RefCell::new(Rc::new(|err, pkt| {
                tracing::warn!(
                    error = %err,
                    id_route = %pkt.id_route,
                    id_target = %pkt.id_target,
                    "error in dispatch"
                );
            })),
            self_ref: RefCell::new(Weak::new()),
        });
        *router.self_ref.borrow_mut() = Rc::downgrade(&router);
        router
    }

    /// Replace the dispatch error hook.
    pub fn set_error_hook(&self, hook: DispatchErrorHook) {
        *self.error_hook.borrow_mut() = hook;
    }

    /// Report an error through the dispatch error hook.
    pub(crate) fn dispatch_error(&self, err: &FabricError, pkt: &Packet) {
        let hook = self.error_hook.borrow().clone();
        hook(err, pkt);
    }

    /// Append a route-discovery candidate.
    pub fn add_route_resolver(&self, resolver: Rc<dyn Resolver<RouteHit>>) {
        self.resolvers.borrow_mut().push(resolver);
    }

    /// Register a locally served route.
    ///
    /// Idempotent: a duplicate id returns the existing entry untouched.
    ///
    /// # Errors
    ///
    /// The empty id is reserved for the peer-handshake targets.
    pub fn register_route(
        &self,
        id_route: &str,
        handler: Rc<dyn PacketHandler>,
    ) -> Result<Route, FabricError> {
        if id_route.is_empty() {
            return Err(FabricError::ReservedRoute {
                id: id_route.to_string(),
            });
        }
        Ok(self.register_route_raw(id_route, Route::Local(handler)))
    }

    /// Register a forwarding route: packets addressed to `id_route` are
    /// re-sent over `channel`. Idempotent like [`Router::register_route`].
    ///
    /// # Errors
    ///
    /// The empty id is reserved.
    pub fn register_peer_route(
        &self,
        id_route: &str,
        channel: ChannelRef,
    ) -> Result<Route, FabricError> {
        if id_route.is_empty() {
            return Err(FabricError::ReservedRoute {
                id: id_route.to_string(),
            });
        }
        Ok(self.register_route_raw(id_route, Route::Forwarding(channel)))
    }

    /// First-wins insert, reserved ids included (for the handshake
    /// router's own registration).
    pub(crate) fn register_route_raw(&self, id_route: &str, route: Route) -> Route {
        let mut routes = self.routes.borrow_mut();
        if let Some(existing) = routes.get(id_route) {
            tracing::debug!(id_route, "route already registered; keeping first");
            return existing.clone();
        }
        tracing::debug!(id_route, "route registered");
        routes.insert(id_route.to_string(), route.clone());
        route
    }

    /// Whether `id_route` is registered (locally or forwarded).
    pub fn has_route(&self, id_route: &str) -> bool {
        self.routes.borrow().contains_key(id_route)
    }

    /// Whether `id_route` resolves to a local handler.
    pub fn is_local(&self, id_route: &str) -> bool {
        matches!(self.routes.borrow().get(id_route), Some(Route::Local(_)))
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.routes.borrow().len()
    }

    /// Enqueue packets for dispatch; they begin processing in submission
    /// order. Returns immediately; all failures are absorbed by
    /// `undeliverable` or the error hook, never thrown to the caller.
    pub fn dispatch(&self, pkts: Vec<Packet>, channel: ChannelRef) {
        let Some(this) = self.self_ref.borrow().upgrade() else {
            return;
        };
        for pkt in pkts {
            let router = Rc::clone(&this);
            let ctx = DispatchContext {
                channel: Rc::clone(&channel),
                router: Rc::clone(&this),
                target_router: None,
            };
            self.queue.enqueue(Box::pin(async move {
                let snapshot = pkt.clone();
                if let Err(err) = router.dispatch_one(pkt, ctx).await {
                    router.dispatch_error(&err, &snapshot);
                }
            }));
        }
    }

    /// Resolve and deliver one packet.
    ///
    /// Route misses run discovery; a still-unresolved destination goes to
    /// `channel.undeliverable` (not an error).
    ///
    /// # Errors
    ///
    /// Handler and forwarding failures propagate to the caller; the
    /// dispatch queue wrapper routes them to the error hook.
    pub async fn dispatch_one(
        &self,
        pkt: Packet,
        ctx: DispatchContext,
    ) -> Result<(), FabricError> {
        let route = self.routes.borrow().get(&pkt.id_route).cloned();
        let route = match route {
            Some(route) => Some(route),
            None => self.discover_route(&pkt.id_route).await,
        };

        match route {
            None => {
                tracing::debug!(id_route = %pkt.id_route, "no route after discovery");
                ctx.channel.undeliverable(pkt, Undeliverable::Route).await;
                Ok(())
            }
            Some(Route::Forwarding(peer)) => peer.send(pkt).await,
            Some(Route::Local(handler)) => handler.on_packet(pkt, ctx).await,
        }
    }

    /// Run route discovery for `id_route`, registering a hit under the
    /// idempotent policy (a racing registration keeps the first entry).
    pub async fn discover_route(&self, id_route: &str) -> Option<Route> {
        let resolvers = self.resolvers.borrow().clone();
        let hit = self.broker.discover_first(&resolvers, id_route).await?;
        let route = match hit {
            RouteHit::Handler(handler) => Route::Local(handler),
            RouteHit::Channel(channel) => Route::Forwarding(channel),
        };
        Some(self.register_route_raw(id_route, route))
    }
}
