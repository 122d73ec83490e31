//! Coarse shared timeout timer.
//!
//! One interval timer serves every pending expiry in a correlation
//! context. Registrations land in the incoming generation bucket; each
//! tick fires the aged bucket and rotates incoming into its place, so a
//! callback registered within one tick window fires together with its
//! cohort one to two periods later. Approximate, O(1)-amortized expiry,
//! never a per-item timer.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// Floor for the tick period.
const MIN_PERIOD: Duration = Duration::from_millis(1000);

/// Expiry callback plus its disarm flag.
struct Expiry {
    armed: Rc<Cell<bool>>,
    callback: Box<dyn FnOnce()>,
}

/// Shared coarse interval timer bucketing expiries by tick generation.
#[derive(Clone)]
pub struct TimeoutReaper {
    inner: Rc<ReaperInner>,
}

struct ReaperInner {
    period: Duration,
    incoming: RefCell<Vec<Expiry>>,
    aged: RefCell<Vec<Expiry>>,
}

impl TimeoutReaper {
    /// Create a reaper for the given timeout; the tick period is
    /// `max(1s, timeout)`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Rc::new(ReaperInner {
                period: timeout.max(MIN_PERIOD),
                incoming: RefCell::new(Vec::new()),
                aged: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The tick period.
    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Register an expiry callback. The returned flag starts armed; set
    /// it to `false` to cancel. Disarmed entries are skipped at fire
    /// time and dropped.
    pub fn register(&self, callback: Box<dyn FnOnce()>) -> Rc<Cell<bool>> {
        let armed = Rc::new(Cell::new(true));
        self.inner.incoming.borrow_mut().push(Expiry {
            armed: armed.clone(),
            callback,
        });
        armed
    }

    /// Advance one generation: fire the aged bucket, rotate incoming into
    /// its place.
    ///
    /// Exposed so tests (and embedders with their own timers) can drive
    /// expiry deterministically.
    pub fn tick(&self) {
        let expired: Vec<Expiry> = self.inner.aged.borrow_mut().drain(..).collect();
        {
            let mut incoming = self.inner.incoming.borrow_mut();
            self.inner.aged.borrow_mut().extend(incoming.drain(..));
        }
        // Fire after the borrows are released; callbacks may register
        // fresh expiries.
        for entry in expired {
            if entry.armed.get() {
                (entry.callback)();
            }
        }
    }

    /// Number of registered, not-yet-fired entries (armed or not).
    pub fn entry_count(&self) -> usize {
        self.inner.incoming.borrow().len() + self.inner.aged.borrow().len()
    }

    /// Drive the reaper on its interval until dropped.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.period());
        // The first interval tick completes immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.tick();
        }
    }
}
