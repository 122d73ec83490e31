//! Discovery: racing candidate resolvers with per-key de-duplication.
//!
//! A router that cannot resolve an id locally fans the lookup out to an
//! ordered list of candidate resolvers. All candidates race; the first
//! defined answer wins. Candidates that fail are reported through the
//! error hook and drop out without cancelling the rest. When every
//! candidate settles empty (or the shared timeout fires first), the
//! lookup yields `None`.
//!
//! Concurrent lookups sharing one key are de-duplicated: the second
//! caller parks on the in-flight entry and observes the identical result.
//! The entry is removed once the result settles, so a later lookup for
//! the same key races afresh instead of replaying a stale answer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::FabricError;

/// One discovery candidate.
#[async_trait(?Send)]
pub trait Resolver<T> {
    /// Resolve `key`, returning `Ok(None)` when this candidate has no
    /// answer.
    async fn resolve(&self, key: &str) -> Result<Option<T>, FabricError>;
}

/// Hook invoked when a candidate resolver fails.
pub type DiscoveryErrorHook = Box<dyn Fn(&str, &FabricError)>;

/// Fans a lookup out to candidate resolvers, de-duplicating concurrent
/// lookups by key under one shared timeout.
pub struct DiscoveryBroker<T: Clone + 'static> {
    inflight: RefCell<HashMap<String, Vec<oneshot::Sender<Option<T>>>>>,
    timeout: Duration,
    error_hook: DiscoveryErrorHook,
}

impl<T: Clone + 'static> DiscoveryBroker<T> {
    /// Create a broker with the given shared lookup timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inflight: RefCell::new(HashMap::new()),
            timeout,
            error_hook: Box::new(|key, err| {
                tracing::warn!(key, error = %err, "discovery candidate failed");
            }),
        }
    }

    /// Replace the candidate-failure hook.
    pub fn set_error_hook(&mut self, hook: DiscoveryErrorHook) {
        self.error_hook = hook;
    }

    /// Race the candidates for `key`, or piggyback on an in-flight lookup
    /// for the same key.
    pub async fn discover_first(
        &self,
        resolvers: &[Rc<dyn Resolver<T>>],
        key: &str,
    ) -> Option<T> {
        {
            let mut inflight = self.inflight.borrow_mut();
            if let Some(waiters) = inflight.get_mut(key) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                drop(inflight);
                tracing::debug!(key, "piggybacking on in-flight discovery");
                // A dropped leading lookup drops our sender; observe None.
                return rx.await.ok().flatten();
            }
            inflight.insert(key.to_string(), Vec::new());
        }

        // Clears the dedup entry even if this future is dropped mid-race,
        // so parked waiters settle to None instead of hanging.
        let mut guard = InflightGuard {
            inflight: &self.inflight,
            key: Some(key.to_string()),
        };

        let result = self.race(resolvers, key).await;

        if let Some(key) = guard.key.take() {
            let waiters = self
                .inflight
                .borrow_mut()
                .remove(&key)
                .unwrap_or_default();
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
        result
    }

    async fn race(&self, resolvers: &[Rc<dyn Resolver<T>>], key: &str) -> Option<T> {
        if resolvers.is_empty() {
            return None;
        }
        let slots = resolvers
            .iter()
            .map(|resolver| {
                let resolver = Rc::clone(resolver);
                let key = key.to_string();
                let fut: Pin<Box<dyn Future<Output = Result<Option<T>, FabricError>>>> =
                    Box::pin(async move { resolver.resolve(&key).await });
                Some(fut)
            })
            .collect();
        let race = RaceFirst {
            slots,
            key,
            hook: &self.error_hook,
        };
        match tokio::time::timeout(self.timeout, race).await {
            Ok(answer) => answer,
            Err(_) => {
                tracing::debug!(key, "discovery timed out");
                None
            }
        }
    }
}

struct InflightGuard<'a, T> {
    inflight: &'a RefCell<HashMap<String, Vec<oneshot::Sender<Option<T>>>>>,
    key: Option<String>,
}

impl<T> Drop for InflightGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inflight.borrow_mut().remove(&key);
        }
    }
}

/// Polls all candidate futures; first defined answer wins, failures are
/// reported and dropped, all-empty resolves `None`.
struct RaceFirst<'a, T> {
    slots: Vec<Option<Pin<Box<dyn Future<Output = Result<Option<T>, FabricError>>>>>>,
    key: &'a str,
    hook: &'a DiscoveryErrorHook,
}

impl<T> Future for RaceFirst<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut pending = false;
        for slot in this.slots.iter_mut() {
            let Some(fut) = slot else { continue };
            match fut.as_mut().poll(cx) {
                Poll::Ready(Ok(Some(answer))) => return Poll::Ready(Some(answer)),
                Poll::Ready(Ok(None)) => *slot = None,
                Poll::Ready(Err(err)) => {
                    (this.hook)(this.key, &err);
                    *slot = None;
                }
                Poll::Pending => pending = true,
            }
        }
        if pending {
            Poll::Pending
        } else {
            Poll::Ready(None)
        }
    }
}
