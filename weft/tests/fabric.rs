//! End-to-end fabric tests: local dispatch, peer handshake convergence,
//! and cross-hub forwarding over wire-encoded channels.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{settle, LinkChannel, RecordingHandler};
use serde_json::json;
use tokio::task::LocalSet;
use weft::prelude::*;

fn hub(id: &str) -> Rc<Hub> {
    Hub::new(id, FabricConfig::default()).expect("hub")
}

#[tokio::test]
async fn test_local_send_invokes_target_once() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let hub = hub("$unit$");
            let handler = Rc::new(RecordingHandler::default());
            hub.register_target("a-tgt", handler.clone());

            hub.send(Packet::to("$unit$", "a-tgt", Body::Json(json!({"msg": "hi"}))));
            settle().await;

            let bodies = handler.bodies.borrow();
            assert_eq!(bodies.len(), 1, "handler invoked exactly once");
            assert_eq!(bodies[0], Body::Json(json!({"msg": "hi"})));
        })
        .await;
}

#[tokio::test]
async fn test_handshake_converges_after_one_exchange() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let a = hub("$A$");
            let b = hub("$B$");
            let (a_to_b, b_to_a) = LinkChannel::pair(&a, &b, WireFormat::Binary);

            a.greet(&(a_to_b.clone() as ChannelRef)).await.expect("greet");
            settle().await;

            // Both sides learned the other's advertised id.
            assert!(a.router().has_route("$B$"));
            assert!(b.router().has_route("$A$"));
            assert!(!a.router().is_local("$B$"));
            assert!(!b.router().is_local("$A$"));

            // Dispatch reaches the far target with no undeliverable.
            let sink = Rc::new(RecordingHandler::default());
            b.register_target("sink", sink.clone());
            a.ingest(
                vec![Packet::to("$B$", "sink", Body::from("across"))],
                a_to_b.clone() as ChannelRef,
            );
            settle().await;

            assert_eq!(sink.bodies.borrow().len(), 1);
            assert!(a_to_b.dead.borrow().is_empty());
            assert!(b_to_a.dead.borrow().is_empty());
        })
        .await;
}

#[tokio::test]
async fn test_simultaneous_handshake_is_idempotent() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let a = hub("$A$");
            let b = hub("$B$");
            let (a_to_b, b_to_a) = LinkChannel::pair(&a, &b, WireFormat::Text);

            // Both sides greet before either answer lands.
            a.greet(&(a_to_b.clone() as ChannelRef)).await.expect("greet a");
            b.greet(&(b_to_a.clone() as ChannelRef)).await.expect("greet b");
            settle().await;

            assert!(a.router().has_route("$B$"));
            assert!(b.router().has_route("$A$"));

            // Each hub: its own route, the reserved empty route, and one
            // forwarding route; the double exchange added nothing extra.
            assert_eq!(a.router().route_count(), 3);
            assert_eq!(b.router().route_count(), 3);
        })
        .await;
}

#[tokio::test]
async fn test_unknown_route_is_undeliverable_exactly_once() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let a = hub("$A$");
            let b = hub("$B$");
            let (a_to_b, _b_to_a) = LinkChannel::pair(&a, &b, WireFormat::Binary);

            a.ingest(
                vec![Packet::to("$nowhere$", "tgt", Body::Empty)],
                a_to_b.clone() as ChannelRef,
            );
            settle().await;

            let dead = a_to_b.dead.borrow();
            assert_eq!(dead.len(), 1);
            assert_eq!(dead[0].1, Undeliverable::Route);
        })
        .await;
}

#[tokio::test]
async fn test_published_extra_routes_are_advertised() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let a = hub("$A$");
            let b = hub("$B$");
            a.publish_route("$A-aux$");
            let (a_to_b, _b_to_a) = LinkChannel::pair(&a, &b, WireFormat::Binary);

            a.greet(&(a_to_b as ChannelRef)).await.expect("greet");
            settle().await;

            assert!(b.router().has_route("$A$"));
            assert!(b.router().has_route("$A-aux$"));
        })
        .await;
}

#[tokio::test]
async fn test_length_prefixed_stream_delivery() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let hub = hub("$unit$");
            let handler = Rc::new(RecordingHandler::default());
            hub.register_target("a-tgt", handler.clone());

            // Two frames back to back plus a partial third.
            let frames_table = hub.frames();
            let one = encode(
                &Packet::to("$unit$", "a-tgt", Body::from("one")),
                WireFormat::LengthPrefixed,
                frames_table,
            )
            .expect("encode");
            let two = encode(
                &Packet::to("$unit$", "a-tgt", Body::from("two")),
                WireFormat::LengthPrefixed,
                frames_table,
            )
            .expect("encode");

            let mut buf = Vec::new();
            buf.extend_from_slice(&one);
            buf.extend_from_slice(&two);
            buf.extend_from_slice(&two[..3]);

            let consumed = hub
                .deliver_stream(&buf, Rc::new(NullChannel) as ChannelRef)
                .expect("deliver");
            settle().await;

            assert_eq!(consumed, one.len() + two.len());
            let bodies = handler.bodies.borrow();
            assert_eq!(bodies.len(), 2);
            assert_eq!(bodies[0], Body::from("one"));
            assert_eq!(bodies[1], Body::from("two"));
        })
        .await;
}

/// A handler that registers a late route via discovery when asked.
struct LateRouteResolver {
    handler: Rc<RecordingHandler>,
    hits: RefCell<Vec<String>>,
}

#[async_trait(?Send)]
impl Resolver<RouteHit> for LateRouteResolver {
    async fn resolve(&self, key: &str) -> Result<Option<RouteHit>> {
        self.hits.borrow_mut().push(key.to_string());
        Ok(Some(RouteHit::Handler(self.handler.clone())))
    }
}

#[tokio::test]
async fn test_route_discovery_registers_and_delivers() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let hub = hub("$unit$");
            let handler = Rc::new(RecordingHandler::default());
            let resolver = Rc::new(LateRouteResolver {
                handler: handler.clone(),
                hits: RefCell::new(Vec::new()),
            });
            hub.add_route_resolver(resolver.clone());

            hub.send(Packet::to("$lazy$", "x", Body::from("first")));
            settle().await;
            hub.send(Packet::to("$lazy$", "x", Body::from("second")));
            settle().await;

            assert_eq!(handler.bodies.borrow().len(), 2);
            assert_eq!(
                resolver.hits.borrow().len(),
                1,
                "second dispatch reuses the registered route"
            );
        })
        .await;
}
