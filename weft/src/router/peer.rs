//! Bootstrap peer discovery: the hello/olleh handshake.
//!
//! A [`PeerRouter`] is a target router bound to the reserved empty route
//! id. Two connected hubs exchange their advertised route-id lists over
//! the `hello` and `olleh` targets; every advertised id is registered as
//! a forwarding route bound to the channel it arrived on.
//!
//! The exchange is deliberately idempotent and order-insensitive:
//! simultaneous greetings from both sides converge to the same registered
//! routes because duplicate registration is a no-op.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::channel::{Channel as _, ChannelRef, DispatchContext};
use crate::error::FabricError;
use crate::packet::{Body, Packet};
use crate::router::{PacketHandler, Router, TargetRouter};

/// Reserved target id for the greeting that expects an answer.
pub const HELLO_TARGET: &str = "hello";

/// Reserved target id for the answering greeting.
pub const OLLEH_TARGET: &str = "olleh";

/// Handshake endpoint advertising this hub's route ids.
pub struct PeerRouter {
    router: Weak<Router>,
    targets: Rc<TargetRouter>,
    published: RefCell<Vec<String>>,
}

impl PeerRouter {
    /// Claim the empty route on `router` and register the handshake
    /// targets.
    ///
    /// # Errors
    ///
    /// Fails when the empty route already has an entry.
    pub fn bind(router: &Rc<Router>, discovery_timeout: Duration) -> Result<Rc<Self>, FabricError> {
        let targets = TargetRouter::bind_reserved(router, discovery_timeout)?;
        let peer = Rc::new(Self {
            router: Rc::downgrade(router),
            targets: targets.clone(),
            published: RefCell::new(Vec::new()),
        });
        targets.register_target(
            HELLO_TARGET,
            Rc::new(HelloHandler {
                peer: Rc::downgrade(&peer),
            }),
        );
        targets.register_target(
            OLLEH_TARGET,
            Rc::new(OllehHandler {
                peer: Rc::downgrade(&peer),
            }),
        );
        Ok(peer)
    }

    /// Append `id_route` to this hub's publicly advertised list.
    pub fn publish_route(&self, id_route: &str) {
        if id_route.is_empty() {
            return;
        }
        let mut published = self.published.borrow_mut();
        if !published.iter().any(|id| id == id_route) {
            published.push(id_route.to_string());
        }
    }

    /// The advertised route-id list.
    pub fn advertised(&self) -> Vec<String> {
        self.published.borrow().clone()
    }

    /// The handshake target registry (the empty route's targets).
    pub fn targets(&self) -> &Rc<TargetRouter> {
        &self.targets
    }

    /// Build a greeting packet for `target` carrying the advertised list.
    fn greeting(&self, target: &str) -> Packet {
        let ids = self.published.borrow().clone();
        Packet::to("", target, Body::Json(Value::from(ids)))
    }

    /// Send the initial `hello` over `channel`.
    ///
    /// # Errors
    ///
    /// Propagates the channel's send failure.
    pub async fn greet(&self, channel: &ChannelRef) -> Result<(), FabricError> {
        tracing::info!(advertised = ?self.advertised(), "greeting peer");
        channel.send(self.greeting(HELLO_TARGET)).await
    }

    /// Register every advertised id in a greeting body as a forwarding
    /// route bound to `channel`. Duplicates (including our own locally
    /// served ids) are no-ops under the first-wins policy.
    fn adopt_routes(&self, body: &Body, channel: &ChannelRef) -> Result<usize, FabricError> {
        let ids = match body {
            Body::Json(Value::Array(ids)) => ids,
            other => {
                return Err(FabricError::handler(format!(
                    "malformed handshake body: {other:?}"
                )))
            }
        };
        let router = self
            .router
            .upgrade()
            .ok_or_else(|| FabricError::handler("router torn down"))?;

        let mut adopted = 0;
        for id in ids {
            let Some(id) = id.as_str() else {
                tracing::warn!(?id, "skipping non-string advertised route id");
                continue;
            };
            if id.is_empty() {
                continue;
            }
            router.register_peer_route(id, Rc::clone(channel))?;
            adopted += 1;
        }
        tracing::info!(adopted, "adopted peer routes");
        Ok(adopted)
    }
}

struct HelloHandler {
    peer: Weak<PeerRouter>,
}

#[async_trait(?Send)]
impl PacketHandler for HelloHandler {
    async fn on_packet(&self, pkt: Packet, ctx: DispatchContext) -> Result<(), FabricError> {
        let Some(peer) = self.peer.upgrade() else {
            return Ok(());
        };
        peer.adopt_routes(&pkt.body, &ctx.channel)?;
        // Answer on the same channel with our advertised list.
        ctx.channel.send(peer.greeting(OLLEH_TARGET)).await
    }
}

struct OllehHandler {
    peer: Weak<PeerRouter>,
}

#[async_trait(?Send)]
impl PacketHandler for OllehHandler {
    async fn on_packet(&self, pkt: Packet, ctx: DispatchContext) -> Result<(), FabricError> {
        let Some(peer) = self.peer.upgrade() else {
            return Ok(());
        };
        peer.adopt_routes(&pkt.body, &ctx.channel).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::test_support::{test_context, RecordingChannel};
    use serde_json::json;

    const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(100);

    fn bound() -> (Rc<Router>, Rc<PeerRouter>) {
        let router = Router::new(DISCOVERY_TIMEOUT);
        let peer = PeerRouter::bind(&router, DISCOVERY_TIMEOUT).expect("bind");
        (router, peer)
    }

    #[tokio::test]
    async fn test_bind_claims_empty_route_and_targets() {
        let (router, peer) = bound();
        assert!(router.is_local(""));
        assert!(peer.targets().has_target(HELLO_TARGET));
        assert!(peer.targets().has_target(OLLEH_TARGET));
    }

    #[tokio::test]
    async fn test_publish_route_dedupes() {
        let (_router, peer) = bound();
        peer.publish_route("$a$");
        peer.publish_route("$a$");
        peer.publish_route("$b$");
        peer.publish_route("");
        assert_eq!(peer.advertised(), vec!["$a$", "$b$"]);
    }

    #[tokio::test]
    async fn test_hello_adopts_and_answers_olleh() {
        let (router, peer) = bound();
        peer.publish_route("$me$");

        let channel = Rc::new(RecordingChannel::default());
        let ctx = test_context(&router, channel.clone());
        let hello = Packet::to("", HELLO_TARGET, Body::Json(json!(["$them$", "$other$"])));
        router.dispatch_one(hello, ctx).await.expect("dispatch");

        // Their advertised ids became forwarding routes.
        assert!(router.has_route("$them$"));
        assert!(router.has_route("$other$"));
        assert!(!router.is_local("$them$"));

        // We answered with olleh carrying our list on the same channel.
        let sent = channel.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id_target, OLLEH_TARGET);
        assert_eq!(sent[0].body, Body::Json(json!(["$me$"])));
    }

    #[tokio::test]
    async fn test_olleh_adopts_without_answering() {
        let (router, _peer) = bound();

        let channel = Rc::new(RecordingChannel::default());
        let ctx = test_context(&router, channel.clone());
        let olleh = Packet::to("", OLLEH_TARGET, Body::Json(json!(["$them$"])));
        router.dispatch_one(olleh, ctx).await.expect("dispatch");

        assert!(router.has_route("$them$"));
        assert!(channel.sent.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_handshake_is_noop() {
        let (router, _peer) = bound();

        let channel = Rc::new(RecordingChannel::default());
        for _ in 0..2 {
            let ctx = test_context(&router, channel.clone());
            let olleh = Packet::to("", OLLEH_TARGET, Body::Json(json!(["$them$"])));
            router.dispatch_one(olleh, ctx).await.expect("dispatch");
        }
        // One forwarding route plus the reserved empty route.
        assert_eq!(router.route_count(), 2);
    }

    #[tokio::test]
    async fn test_local_routes_win_over_advertised_ones() {
        let (router, peer) = bound();
        let local = Rc::new(crate::router::test_support::CountingHandler::default());
        router.register_route("$mine$", local).expect("register");

        let channel = Rc::new(RecordingChannel::default());
        let ctx = test_context(&router, channel.clone());
        let olleh = Packet::to("", OLLEH_TARGET, Body::Json(json!(["$mine$"])));
        router.dispatch_one(olleh, ctx).await.expect("dispatch");

        assert!(router.is_local("$mine$"), "first registration wins");
        let _ = peer;
    }

    #[tokio::test]
    async fn test_malformed_handshake_body_errors() {
        let (router, _peer) = bound();
        let channel = Rc::new(RecordingChannel::default());
        let ctx = test_context(&router, channel.clone());
        let bad = Packet::to("", HELLO_TARGET, Body::from("not json"));
        let result = router.dispatch_one(bad, ctx).await;
        assert!(result.is_err());
    }
}
