//! Per-route target registry.
//!
//! A [`TargetRouter`] owns the named handlers of exactly one route. It
//! registers itself into a [`Router`] as that route's local handler at
//! construction, then resolves `id_target` the same way the router
//! resolves `id_route`: registry first, discovery on a miss,
//! `undeliverable` when both come up empty.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{Channel as _, DispatchContext, Undeliverable};
use crate::discovery::{DiscoveryBroker, Resolver};
use crate::error::FabricError;
use crate::packet::Packet;
use crate::router::{PacketHandler, Route, Router};

/// A target-discovery answer.
#[derive(Clone)]
pub struct TargetHit {
    /// The handler serving the target.
    pub handler: Rc<dyn PacketHandler>,
    /// Ephemeral hits are invoked but not registered for reuse.
    pub ephemeral: bool,
}

/// Target registry scoped to one route id.
pub struct TargetRouter {
    route_id: String,
    targets: RefCell<HashMap<String, Rc<dyn PacketHandler>>>,
    resolvers: RefCell<Vec<Rc<dyn Resolver<TargetHit>>>>,
    broker: DiscoveryBroker<TargetHit>,
    self_ref: RefCell<Weak<TargetRouter>>,
}

impl TargetRouter {
    /// Construct a target router for `route_id` and register it as that
    /// route's handler.
    ///
    /// # Errors
    ///
    /// The empty route id is reserved, and a route that already has an
    /// entry cannot be re-bound (registration is first-wins).
    pub fn bind(
        router: &Rc<Router>,
        route_id: &str,
        discovery_timeout: Duration,
    ) -> Result<Rc<Self>, FabricError> {
        if route_id.is_empty() {
            return Err(FabricError::ReservedRoute {
                id: route_id.to_string(),
            });
        }
        Self::bind_raw(router, route_id, discovery_timeout)
    }

    /// Reserved-id variant used by the peer router to claim the empty
    /// route.
    pub(crate) fn bind_reserved(
        router: &Rc<Router>,
        discovery_timeout: Duration,
    ) -> Result<Rc<Self>, FabricError> {
        Self::bind_raw(router, "", discovery_timeout)
    }

    fn bind_raw(
        router: &Rc<Router>,
        route_id: &str,
        discovery_timeout: Duration,
    ) -> Result<Rc<Self>, FabricError> {
        let target_router = Rc::new(Self {
            route_id: route_id.to_string(),
            targets: RefCell::new(HashMap::new()),
            resolvers: RefCell::new(Vec::new()),
            broker: DiscoveryBroker::new(discovery_timeout),
            self_ref: RefCell::new(Weak::new()),
        });
        *target_router.self_ref.borrow_mut() = Rc::downgrade(&target_router);

        let as_handler: Rc<dyn PacketHandler> = target_router.clone();
        let kept = router.register_route_raw(route_id, Route::Local(as_handler.clone()));
        let ours = kept
            .as_local()
            .map(|h| Rc::ptr_eq(h, &as_handler))
            .unwrap_or(false);
        if !ours {
            return Err(FabricError::ReservedRoute {
                id: route_id.to_string(),
            });
        }
        Ok(target_router)
    }

    /// The route id this registry serves.
    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    /// Append a target-discovery candidate.
    pub fn add_target_resolver(&self, resolver: Rc<dyn Resolver<TargetHit>>) {
        self.resolvers.borrow_mut().push(resolver);
    }

    /// Register a target handler.
    ///
    /// Idempotent: a duplicate id returns the first-registered handler
    /// and leaves the registry unchanged.
    pub fn register_target(
        &self,
        id_target: &str,
        handler: Rc<dyn PacketHandler>,
    ) -> Rc<dyn PacketHandler> {
        let mut targets = self.targets.borrow_mut();
        if let Some(existing) = targets.get(id_target) {
            tracing::debug!(
                id_route = %self.route_id,
                id_target,
                "target already registered; keeping first"
            );
            return existing.clone();
        }
        tracing::debug!(id_route = %self.route_id, id_target, "target registered");
        targets.insert(id_target.to_string(), handler.clone());
        handler
    }

    /// Whether `id_target` is registered.
    pub fn has_target(&self, id_target: &str) -> bool {
        self.targets.borrow().contains_key(id_target)
    }

    /// Number of registered targets.
    pub fn target_count(&self) -> usize {
        self.targets.borrow().len()
    }

    /// Resolve and deliver one packet to its target.
    ///
    /// The handler runs with `ctx.target_router` set to this registry so
    /// it may register further targets.
    ///
    /// # Errors
    ///
    /// Handler failures propagate to the dispatch wrapper (and its error
    /// hook); an unresolved target goes to `undeliverable` instead.
    pub async fn dispatch_target(
        &self,
        pkt: Packet,
        ctx: DispatchContext,
    ) -> Result<(), FabricError> {
        let handler = self.targets.borrow().get(&pkt.id_target).cloned();
        let handler = match handler {
            Some(handler) => Some(handler),
            None => self.discover_target(&pkt.id_target).await,
        };

        match handler {
            None => {
                tracing::debug!(
                    id_route = %self.route_id,
                    id_target = %pkt.id_target,
                    "no target after discovery"
                );
                ctx.channel.undeliverable(pkt, Undeliverable::Target).await;
                Ok(())
            }
            Some(handler) => {
                let mut ctx = ctx;
                ctx.target_router = self.self_ref.borrow().upgrade();
                handler.on_packet(pkt, ctx).await
            }
        }
    }

    /// Run target discovery; non-ephemeral hits are registered for reuse
    /// under the first-wins policy.
    async fn discover_target(&self, id_target: &str) -> Option<Rc<dyn PacketHandler>> {
        let resolvers = self.resolvers.borrow().clone();
        let hit = self.broker.discover_first(&resolvers, id_target).await?;
        if hit.ephemeral {
            return Some(hit.handler);
        }
        Some(self.register_target(id_target, hit.handler))
    }
}

#[async_trait(?Send)]
impl PacketHandler for TargetRouter {
    async fn on_packet(&self, pkt: Packet, ctx: DispatchContext) -> Result<(), FabricError> {
        self.dispatch_target(pkt, ctx).await
    }
}
