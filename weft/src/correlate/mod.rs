//! Message correlation: pending replies, timeout expiry, reassembly.
//!
//! A [`CorrelationContext`] is one conversation's bookkeeping: the
//! pending-reply table (token → oneshot completion) and the reassembly
//! table (token → split-transfer buffer). Both expire through one shared
//! coarse [`TimeoutReaper`].
//!
//! Completion is idempotent: the first resolution or timeout wins, and a
//! late or unmatched resolve is a silent no-op.

mod reaper;
mod reassembly;

pub use reaper::TimeoutReaper;
pub use reassembly::ReassemblyBuffer;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::codec::split::{join_packets, SplitError};
use crate::packet::Packet;
use crate::types::Token;

/// Why a correlation future rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// No reply arrived within the configured timeout.
    #[error("reply timed out")]
    Timeout,

    /// The pending entry was dropped before resolving (context torn down
    /// or the deferred replaced).
    #[error("correlation dropped")]
    Dropped,
}

/// Builds correlation contexts that share one reaper and timeout.
pub struct Correlator {
    reaper: TimeoutReaper,
    timeout: Duration,
}

impl Correlator {
    /// Create a correlator with the given reply timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            reaper: TimeoutReaper::new(timeout),
            timeout,
        }
    }

    /// The shared reaper (drive it via [`TimeoutReaper::run`] or manual
    /// ticks).
    pub fn reaper(&self) -> TimeoutReaper {
        self.reaper.clone()
    }

    /// The configured reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One correlation table for a logical conversation.
    pub fn context(&self) -> CorrelationContext {
        CorrelationContext {
            inner: Rc::new(ContextInner {
                pending: RefCell::new(HashMap::new()),
                reassembly: RefCell::new(HashMap::new()),
                reaper: self.reaper.clone(),
            }),
        }
    }
}

struct PendingReply {
    sender: oneshot::Sender<Result<Packet, CorrelationError>>,
    armed: Rc<Cell<bool>>,
}

struct ContextInner {
    pending: RefCell<HashMap<Token, PendingReply>>,
    reassembly: RefCell<HashMap<Token, ReassemblyBuffer>>,
    reaper: TimeoutReaper,
}

/// Pending-reply and reassembly bookkeeping for one conversation.
#[derive(Clone)]
pub struct CorrelationContext {
    inner: Rc<ContextInner>,
}

impl CorrelationContext {
    /// Register a pending reply for `token` and return its future.
    ///
    /// The entry expires through the shared reaper; on expiry the future
    /// rejects [`CorrelationError::Timeout`] and the entry is removed, so
    /// a later call for the same token creates a fresh entry. Registering
    /// over a live entry replaces it (the old future rejects
    /// [`CorrelationError::Dropped`]).
    pub fn deferred_for(&self, token: &Token) -> ReplyFuture {
        let (tx, rx) = oneshot::channel();

        let weak = Rc::downgrade(&self.inner);
        let key = token.clone();
        let armed = self.inner.reaper.register(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let removed = inner.pending.borrow_mut().remove(&key);
            if let Some(entry) = removed {
                tracing::debug!(token = %key, "pending reply timed out");
                let _ = entry.sender.send(Err(CorrelationError::Timeout));
            }
        }));

        let mut pending = self.inner.pending.borrow_mut();
        if let Some(old) = pending.insert(token.clone(), PendingReply { sender: tx, armed }) {
            tracing::warn!(token = %token, "replaced live pending reply");
            old.armed.set(false);
        }
        ReplyFuture { rx }
    }

    /// Resolve the pending reply for `msgid` with `pkt`.
    ///
    /// Returns whether a pending entry consumed the packet; unmatched or
    /// late calls are no-ops.
    pub fn resolve(&self, msgid: &Token, pkt: Packet) -> bool {
        match self.inner.pending.borrow_mut().remove(msgid) {
            Some(entry) => {
                entry.armed.set(false);
                let _ = entry.sender.send(Ok(pkt));
                true
            }
            None => {
                tracing::debug!(msgid = %msgid, "unmatched reply resolution ignored");
                false
            }
        }
    }

    /// Feed one split-transfer chunk into its reassembly buffer.
    ///
    /// The buffer is keyed by the op's token/msgid and created lazily; a
    /// chunk with `seq >= 0` fills that index, a negative `seq` records
    /// the total count. Returns the joined packet exactly when every
    /// index filled (arrival order is arbitrary). Routing the joined
    /// packet, resolving a pending reply vs re-dispatching to a handler,
    /// is the caller's concern.
    ///
    /// Buffers that never complete expire through the shared reaper.
    ///
    /// # Errors
    ///
    /// Chunk/buffer kind mismatches, missing ordinals, and undecodable
    /// joined bodies are hard [`SplitError`]s.
    pub fn accept_split(&self, pkt: Packet) -> Result<Option<Packet>, SplitError> {
        let key = pkt.correlation_key().cloned().ok_or(SplitError::MissingSeq)?;

        let complete = {
            let mut map = self.inner.reassembly.borrow_mut();
            if !map.contains_key(&key) {
                let weak = Rc::downgrade(&self.inner);
                let stale_key = key.clone();
                let armed = self.inner.reaper.register(Box::new(move || {
                    let Some(inner) = weak.upgrade() else { return };
                    let removed = inner.reassembly.borrow_mut().remove(&stale_key);
                    if let Some(buf) = removed {
                        tracing::warn!(
                            key = %stale_key,
                            parts = buf.filled(),
                            "dropping stale partial reassembly"
                        );
                    }
                }));
                map.insert(key.clone(), ReassemblyBuffer::new(pkt.kind, armed));
            }
            let Some(buffer) = map.get_mut(&key) else {
                return Ok(None);
            };
            buffer.accept(pkt)?;
            buffer.is_complete()
        };

        if !complete {
            return Ok(None);
        }
        let buffer = self.inner.reassembly.borrow_mut().remove(&key);
        match buffer {
            Some(buffer) => Ok(Some(join_packets(buffer.take_parts())?)),
            None => Ok(None),
        }
    }

    /// Number of pending replies.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Number of in-progress reassemblies.
    pub fn reassembly_count(&self) -> usize {
        self.inner.reassembly.borrow().len()
    }
}

/// Future resolving to the correlated reply packet.
pub struct ReplyFuture {
    rx: oneshot::Receiver<Result<Packet, CorrelationError>>,
}

impl Future for ReplyFuture {
    type Output = Result<Packet, CorrelationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(inner) => inner,
            Err(_) => Err(CorrelationError::Dropped),
        })
    }
}
