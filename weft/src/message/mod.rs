//! Bound message handles: the send/reply surface over the fabric.
//!
//! A [`MessageHandle`] binds a destination `(id_route, id_target)` pair
//! to a channel, a correlation context, and a frame-table role. It
//! exposes the operation set: `post`/`send` (fire-and-forget,
//! automatically multi-packet for oversized bodies), `query`/`answer`
//! (correlated request and reply), `ctrl` (control datagrams), and the
//! [`PartWriter`] returned by `stream`/`multipart`.
//!
//! A reply handle, built from an inbound packet with
//! [`MessageHandle::reply_to`], sets `reply_expected` and aliases
//! `send` to `answer`, so reply-side code reads like request-side code.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::channel::{Channel as _, ChannelRef};
use crate::codec::split::{chunk_body, split_packets};
use crate::correlate::CorrelationContext;
use crate::error::FabricError;
use crate::op::{Frame, FrameRole, FrameTable, Op, OpField, OpKind};
use crate::packet::{Body, Packet};
use crate::types::Token;

/// A send/reply handle bound to one destination.
pub struct MessageHandle {
    id_route: String,
    id_target: String,
    from: Option<(String, String)>,
    reply_msgid: Option<Token>,
    reply_expected: bool,
    channel: ChannelRef,
    ctx: CorrelationContext,
    frames: Rc<FrameTable>,
    body_budget: usize,
}

impl MessageHandle {
    /// Build a source handle addressed to `(id_route, id_target)`.
    pub fn new(
        id_route: impl Into<String>,
        id_target: impl Into<String>,
        channel: ChannelRef,
        ctx: CorrelationContext,
        frames: Rc<FrameTable>,
        body_budget: usize,
    ) -> Self {
        Self {
            id_route: id_route.into(),
            id_target: id_target.into(),
            from: None,
            reply_msgid: None,
            reply_expected: false,
            channel,
            ctx,
            frames,
            body_budget,
        }
    }

    /// Attach this hub's reply address, upgrading the handle to the
    /// addressed frame subset.
    pub fn with_from(
        mut self,
        from_route: impl Into<String>,
        from_target: impl Into<String>,
    ) -> Self {
        self.from = Some((from_route.into(), from_target.into()));
        self
    }

    /// Build a reply handle from an inbound correlated packet.
    ///
    /// The inbound token becomes this handle's message id; the reply is
    /// addressed to the packet's from-address when present, otherwise it
    /// travels anonymously (empty ids) back over the same channel.
    ///
    /// Returns `None` when the packet carries no token to answer.
    pub fn reply_to(
        pkt: &Packet,
        channel: ChannelRef,
        ctx: CorrelationContext,
        frames: Rc<FrameTable>,
        body_budget: usize,
    ) -> Option<Self> {
        let op = pkt.op.as_ref()?;
        let msgid = op.token.clone()?;
        let (id_route, id_target) = match (&op.from_route, &op.from_target) {
            (Some(route), Some(target)) => (route.clone(), target.clone()),
            _ => (String::new(), String::new()),
        };
        Some(Self {
            id_route,
            id_target,
            from: None,
            reply_msgid: Some(msgid),
            reply_expected: true,
            channel,
            ctx,
            frames,
            body_budget,
        })
    }

    /// Whether this handle answers an inbound request.
    pub fn reply_expected(&self) -> bool {
        self.reply_expected
    }

    /// The destination route id.
    pub fn id_route(&self) -> &str {
        &self.id_route
    }

    /// The destination target id.
    pub fn id_target(&self) -> &str {
        &self.id_target
    }

    fn role(&self, reply: bool) -> FrameRole {
        match (self.from.is_some(), reply) {
            (true, false) => FrameRole::AddressedSource,
            (true, true) => FrameRole::AddressedReply,
            (false, false) => FrameRole::AnonSource,
            (false, true) => FrameRole::AnonReply,
        }
    }

    fn frame(&self, kind: OpKind, reply: bool) -> Result<&Frame, FabricError> {
        let role = self.role(reply);
        self.frames
            .select(kind, role)
            .ok_or_else(|| FabricError::InvalidHandle {
                message: format!("no frame for {kind:?} in role {role:?}"),
            })
    }

    /// Build an op for `frame`, filling fields from the handle (and
    /// `token` where the frame wants one).
    fn build_op(&self, frame: &Frame, token: Option<&Token>) -> Result<Op, FabricError> {
        let mut op = Op::for_frame(frame);
        for field in frame.fields {
            match field {
                OpField::Token => {
                    op.token = Some(token.cloned().ok_or_else(|| FabricError::InvalidHandle {
                        message: "frame wants a token but none was minted".to_string(),
                    })?);
                }
                OpField::MsgId => {
                    op.msgid =
                        Some(
                            self.reply_msgid
                                .clone()
                                .ok_or_else(|| FabricError::InvalidHandle {
                                    message: "answering without an inbound message id".to_string(),
                                })?,
                        );
                }
                OpField::FromRoute => {
                    op.from_route = self.from.as_ref().map(|(route, _)| route.clone());
                }
                OpField::FromTarget => {
                    op.from_target = self.from.as_ref().map(|(_, target)| target.clone());
                }
                OpField::Seq => {}
            }
        }
        Ok(op)
    }

    fn packet(&self, op: Op, body: Body) -> Packet {
        Packet::to(self.id_route.clone(), self.id_target.clone(), body).with_op(op)
    }

    async fn send_split(&self, op: Op, body: Body) -> Result<(), FabricError> {
        let template = self.packet(op, body);
        for part in split_packets(template, self.body_budget)? {
            self.channel.send(part).await?;
        }
        Ok(())
    }

    /// Dispatch a body under `kind` (source role), switching to multipart
    /// frames when the body exceeds the budget.
    async fn post_body(&self, body: Body, reply: bool) -> Result<(), FabricError> {
        if body.wire_len() <= self.body_budget && !reply {
            let frame = self.frame(OpKind::Datagram, false)?;
            let op = self.build_op(frame, None)?;
            return self.channel.send(self.packet(op, body)).await;
        }
        if body.wire_len() <= self.body_budget {
            let frame = self.frame(OpKind::Direct, true)?;
            let op = self.build_op(frame, None)?;
            return self.channel.send(self.packet(op, body)).await;
        }
        // Oversized: multipart under a fresh token (source) or the
        // inbound msgid (reply).
        let frame = self.frame(OpKind::Multipart, reply)?;
        let token = Token::random();
        let op = self.build_op(frame, Some(&token))?;
        self.send_split(op, body).await
    }

    /// Fire-and-forget send. Oversized bodies switch to multipart frames
    /// automatically.
    ///
    /// # Errors
    ///
    /// Propagates channel and framing failures.
    pub async fn post(&self, body: Body) -> Result<(), FabricError> {
        self.post_body(body, false).await
    }

    /// `post` on a source handle, `answer` on a reply handle.
    ///
    /// # Errors
    ///
    /// Propagates channel and framing failures.
    pub async fn send(&self, body: Body) -> Result<(), FabricError> {
        if self.reply_expected {
            self.answer(body).await
        } else {
            self.post(body).await
        }
    }

    /// Correlated request: mints a token, registers the pending reply,
    /// sends, and awaits the answer (or the configured timeout).
    ///
    /// # Errors
    ///
    /// Channel failures, framing failures, and
    /// [`crate::correlate::CorrelationError`] rejections (timeout or
    /// teardown).
    pub async fn query(&self, body: Body) -> Result<Packet, FabricError> {
        let token = Token::random();
        let deferred = self.ctx.deferred_for(&token);

        if body.wire_len() <= self.body_budget {
            let frame = self.frame(OpKind::Direct, false)?;
            let op = self.build_op(frame, Some(&token))?;
            self.channel.send(self.packet(op, body)).await?;
        } else {
            let frame = self.frame(OpKind::Multipart, false)?;
            let op = self.build_op(frame, Some(&token))?;
            self.send_split(op, body).await?;
        }

        tracing::debug!(token = %token, id_route = %self.id_route, "query sent");
        Ok(deferred.await?)
    }

    /// Answer the inbound request this handle replies to.
    ///
    /// # Errors
    ///
    /// Fails on a handle with no inbound message id, plus channel and
    /// framing failures.
    pub async fn answer(&self, body: Body) -> Result<(), FabricError> {
        self.post_body(body, true).await
    }

    /// Send a control datagram (token on source handles, msgid echo on
    /// reply handles; never a reply address).
    ///
    /// # Errors
    ///
    /// Propagates channel and framing failures.
    pub async fn ctrl(&self, body: Body) -> Result<(), FabricError> {
        let reply = self.reply_expected;
        let frame = self
            .frames
            .select(OpKind::Ctrl, self.role(reply))
            .ok_or_else(|| FabricError::InvalidHandle {
                message: "no ctrl frame".to_string(),
            })?;
        let token = Token::random();
        let op = self.build_op(frame, Some(&token))?;
        self.channel.send(self.packet(op, body)).await
    }

    /// Control query: like [`MessageHandle::ctrl`] on a source handle,
    /// but registers a pending reply under the minted token and awaits
    /// the `!` answer.
    ///
    /// # Errors
    ///
    /// As [`MessageHandle::query`].
    pub async fn ctrl_query(&self, body: Body) -> Result<Packet, FabricError> {
        let frame = self
            .frames
            .select(OpKind::Ctrl, FrameRole::AnonSource)
            .ok_or_else(|| FabricError::InvalidHandle {
                message: "no ctrl frame".to_string(),
            })?;
        let token = Token::random();
        let deferred = self.ctx.deferred_for(&token);
        let op = self.build_op(frame, Some(&token))?;
        self.channel.send(self.packet(op, body)).await?;
        Ok(deferred.await?)
    }

    /// Open a stream writer (open-ended part sequence).
    ///
    /// # Errors
    ///
    /// Fails when the role has no stream frame (or a reply handle lacks
    /// its message id).
    pub fn stream(&self) -> Result<PartWriter, FabricError> {
        self.writer(OpKind::Stream)
    }

    /// Open a multipart writer (one logical message in parts).
    ///
    /// # Errors
    ///
    /// As [`MessageHandle::stream`].
    pub fn multipart(&self) -> Result<PartWriter, FabricError> {
        self.writer(OpKind::Multipart)
    }

    fn writer(&self, kind: OpKind) -> Result<PartWriter, FabricError> {
        let reply = self.reply_expected;
        let frame = self.frame(kind, reply)?;
        let token = Token::random();
        let template = self.build_op(frame, Some(&token))?;
        Ok(PartWriter {
            id_route: self.id_route.clone(),
            id_target: self.id_target.clone(),
            template,
            channel: Rc::clone(&self.channel),
            seq: Cell::new(0),
            kind: Cell::new(crate::packet::PacketKind::SplitData),
            pending_meta: RefCell::new(None),
            ended: Cell::new(false),
            body_budget: self.body_budget,
        })
    }
}

/// Explicit writer for stream/multipart transfers.
///
/// Every written body becomes one or more parts with auto-incrementing
/// `seq`; [`PartWriter::end`] emits the terminal marker whose negated
/// `seq` carries the final part count.
pub struct PartWriter {
    id_route: String,
    id_target: String,
    template: Op,
    channel: ChannelRef,
    seq: Cell<i64>,
    kind: Cell<crate::packet::PacketKind>,
    pending_meta: RefCell<Option<String>>,
    ended: Cell<bool>,
    body_budget: usize,
}

impl PartWriter {
    /// Parts written so far.
    pub fn parts_written(&self) -> i64 {
        self.seq.get()
    }

    /// Attach meta text to the next written part (by convention, call
    /// before the first write so it lands on part 0).
    pub fn write_meta(&self, meta: impl Into<String>) {
        *self.pending_meta.borrow_mut() = Some(meta.into());
    }

    /// Write one body as the next part(s), chunking it to the budget.
    ///
    /// # Errors
    ///
    /// Fails after [`PartWriter::end`], and propagates channel failures.
    pub async fn write(&self, body: Body) -> Result<(), FabricError> {
        if self.ended.get() {
            return Err(FabricError::InvalidHandle {
                message: "write after end".to_string(),
            });
        }
        let (chunks, kind) = chunk_body(&body, self.body_budget);
        self.kind.set(kind);
        for chunk in chunks {
            let mut op = self.template.clone();
            op.seq = Some(self.seq.get());
            self.seq.set(self.seq.get() + 1);
            let pkt = Packet {
                id_route: self.id_route.clone(),
                id_target: self.id_target.clone(),
                kind,
                op: Some(op),
                meta: self.pending_meta.borrow_mut().take(),
                body: chunk,
            };
            self.channel.send(pkt).await?;
        }
        Ok(())
    }

    /// Close the transfer: emits the terminal marker with `seq` set to
    /// the negated part count. An empty transfer first writes one empty
    /// part so the count is well-formed.
    ///
    /// # Errors
    ///
    /// Fails when already ended, and propagates channel failures.
    pub async fn end(&self) -> Result<(), FabricError> {
        if self.ended.get() {
            return Err(FabricError::InvalidHandle {
                message: "stream already ended".to_string(),
            });
        }
        if self.seq.get() == 0 {
            self.write(Body::Empty).await?;
        }
        self.ended.set(true);

        let mut op = self.template.clone();
        op.seq = Some(-self.seq.get());
        let pkt = Packet {
            id_route: self.id_route.clone(),
            id_target: self.id_target.clone(),
            // The terminal marker shares the transfer's chunk kind.
            kind: self.kind.get(),
            op: Some(op),
            meta: None,
            body: Body::Empty,
        };
        self.channel.send(pkt).await
    }

    /// Write every body, then end the transfer.
    ///
    /// # Errors
    ///
    /// As [`PartWriter::write`] and [`PartWriter::end`].
    pub async fn write_all(
        &self,
        bodies: impl IntoIterator<Item = Body>,
    ) -> Result<(), FabricError> {
        for body in bodies {
            self.write(body).await?;
        }
        self.end().await
    }
}
