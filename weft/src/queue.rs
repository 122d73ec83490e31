//! Serialized dispatch queue.
//!
//! Guarantees that packets submitted to one router begin processing in
//! submission order, even though each packet's resolution is
//! asynchronous. Jobs land in a FIFO backlog; a single drainer task pops
//! them in order and spawns each as its own task, yielding between spawns
//! so job N gets its first poll before job N+1 is spawned. Invocation
//! order is therefore FIFO; completion order is not, since independent
//! packets interleave at their suspension points.
//!
//! The drainer exits and the queue resets to empty once the backlog
//! drains, so cost is O(1) amortized and nothing accumulates while idle.
//!
//! Requires a `tokio::task::LocalSet` context (single-threaded runtime).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

/// One unit of packet processing.
pub type DispatchJob = Pin<Box<dyn Future<Output = ()>>>;

/// FIFO-invocation dispatch queue for one router.
#[derive(Clone, Default)]
pub struct DispatchQueue {
    inner: Rc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    backlog: RefCell<VecDeque<DispatchJob>>,
    draining: Cell<bool>,
}

impl DispatchQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job, starting the drainer if the queue was idle.
    pub fn enqueue(&self, job: DispatchJob) {
        self.inner.backlog.borrow_mut().push_back(job);
        if !self.inner.draining.get() {
            self.inner.draining.set(true);
            let inner = Rc::clone(&self.inner);
            tokio::task::spawn_local(drain(inner));
        }
    }

    /// Number of jobs waiting to be invoked.
    pub fn backlog_len(&self) -> usize {
        self.inner.backlog.borrow().len()
    }

    /// Whether the queue has no backlog and no running drainer.
    pub fn is_idle(&self) -> bool {
        !self.inner.draining.get() && self.inner.backlog.borrow().is_empty()
    }
}

async fn drain(inner: Rc<QueueInner>) {
    loop {
        let job = inner.backlog.borrow_mut().pop_front();
        match job {
            Some(job) => {
                tokio::task::spawn_local(job);
                // Give the spawned job its first poll before invoking the
                // next one.
                tokio::task::yield_now().await;
            }
            None => break,
        }
    }
    inner.draining.set(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;

    fn record_job(log: Rc<RefCell<Vec<&'static str>>>, label: &'static str) -> DispatchJob {
        Box::pin(async move {
            log.borrow_mut().push(label);
        })
    }

    #[tokio::test]
    async fn test_fifo_invocation_order() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let queue = DispatchQueue::new();
                let log = Rc::new(RefCell::new(Vec::new()));

                for label in ["a", "b", "c", "d"] {
                    queue.enqueue(record_job(log.clone(), label));
                }
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                while !queue.is_idle() {
                    tokio::task::yield_now().await;
                }

                assert_eq!(*log.borrow(), vec!["a", "b", "c", "d"]);
            })
            .await;
    }

    #[tokio::test]
    async fn test_completion_order_may_interleave() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let queue = DispatchQueue::new();
                let log = Rc::new(RefCell::new(Vec::new()));
                let (tx, rx) = oneshot::channel::<()>();

                // First job suspends until the second resolves it.
                let log_a = log.clone();
                queue.enqueue(Box::pin(async move {
                    let _ = rx.await;
                    log_a.borrow_mut().push("a");
                }));
                let log_b = log.clone();
                queue.enqueue(Box::pin(async move {
                    log_b.borrow_mut().push("b");
                    let _ = tx.send(());
                }));

                for _ in 0..8 {
                    tokio::task::yield_now().await;
                }

                // "b" finished first even though "a" was invoked first.
                assert_eq!(*log.borrow(), vec!["b", "a"]);
            })
            .await;
    }

    #[tokio::test]
    async fn test_queue_resets_to_idle() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let queue = DispatchQueue::new();
                let log = Rc::new(RefCell::new(Vec::new()));

                queue.enqueue(record_job(log.clone(), "one"));
                while !queue.is_idle() {
                    tokio::task::yield_now().await;
                }
                assert_eq!(queue.backlog_len(), 0);

                // A later batch starts a fresh drainer.
                queue.enqueue(record_job(log.clone(), "two"));
                while !queue.is_idle() {
                    tokio::task::yield_now().await;
                }
                assert_eq!(*log.borrow(), vec!["one", "two"]);
            })
            .await;
    }
}
