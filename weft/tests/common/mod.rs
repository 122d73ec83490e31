//! Shared harness for fabric integration tests: two hubs linked by an
//! in-memory channel pair that round-trips every packet through the wire
//! codec.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use weft::prelude::*;

/// One side of a connected channel pair. Sending encodes the packet and
/// delivers the frame into the far hub, exactly as a socket adapter
/// would.
pub struct LinkChannel {
    far_hub: RefCell<Option<Rc<Hub>>>,
    far_side: RefCell<Option<Rc<LinkChannel>>>,
    format: WireFormat,
    /// Packets the far side could not deliver.
    pub dead: RefCell<Vec<(Packet, Undeliverable)>>,
}

impl LinkChannel {
    /// Connect `a` and `b`; returns (a's channel to b, b's channel to a).
    pub fn pair(
        a: &Rc<Hub>,
        b: &Rc<Hub>,
        format: WireFormat,
    ) -> (Rc<LinkChannel>, Rc<LinkChannel>) {
        let a_to_b = Rc::new(LinkChannel {
            far_hub: RefCell::new(Some(b.clone())),
            far_side: RefCell::new(None),
            format,
            dead: RefCell::new(Vec::new()),
        });
        let b_to_a = Rc::new(LinkChannel {
            far_hub: RefCell::new(Some(a.clone())),
            far_side: RefCell::new(None),
            format,
            dead: RefCell::new(Vec::new()),
        });
        *a_to_b.far_side.borrow_mut() = Some(b_to_a.clone());
        *b_to_a.far_side.borrow_mut() = Some(a_to_b.clone());
        (a_to_b, b_to_a)
    }
}

#[async_trait(?Send)]
impl Channel for LinkChannel {
    async fn send(&self, pkt: Packet) -> Result<()> {
        let hub = self
            .far_hub
            .borrow()
            .clone()
            .ok_or_else(|| FabricError::channel("link torn down"))?;
        let far_side = self
            .far_side
            .borrow()
            .clone()
            .ok_or_else(|| FabricError::channel("link torn down"))?;

        let frame = encode(&pkt, self.format, hub.frames())?;
        hub.deliver_bytes(&frame, self.format, far_side as ChannelRef)
            .map_err(FabricError::from)?;
        Ok(())
    }

    async fn undeliverable(&self, pkt: Packet, kind: Undeliverable) {
        self.dead.borrow_mut().push((pkt, kind));
    }
}

/// Let spawned dispatch tasks run to quiescence.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Handler recording every body it receives.
#[derive(Default)]
pub struct RecordingHandler {
    /// Bodies seen, in arrival order.
    pub bodies: RefCell<Vec<Body>>,
}

#[async_trait(?Send)]
impl PacketHandler for RecordingHandler {
    async fn on_packet(&self, pkt: Packet, _ctx: DispatchContext) -> Result<()> {
        self.bodies.borrow_mut().push(pkt.body);
        Ok(())
    }
}
