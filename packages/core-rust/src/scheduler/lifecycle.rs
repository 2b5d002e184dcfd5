//! Shutdown bookkeeping shared by every scheduler implementation.
//!
//! Uses `ArcSwap` for lock-free state reads, a `DashMap` of listeners keyed
//! by id, and an atomic counter with RAII guards for in-flight work.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error};

use super::{ListenerId, SchedulerState, ShutdownListener};
use crate::deferred::Deferred;
use crate::future::Future;

/// Tracks a scheduler's lifecycle, shutdown listeners and in-flight work.
///
/// The registry guarantees that every listener registered before or during
/// shutdown is invoked exactly once, including listeners that race with
/// [`ShutdownRegistry::begin_shutdown`].
pub struct ShutdownRegistry {
    state: ArcSwap<SchedulerState>,
    started: AtomicBool,
    transition: Mutex<()>,
    grace_ms: AtomicU64,
    listeners: DashMap<ListenerId, Arc<dyn ShutdownListener>>,
    next_id: AtomicU64,
    in_flight: Arc<AtomicU64>,
    waiters: Mutex<Vec<Deferred<()>>>,
}

impl ShutdownRegistry {
    /// Creates a registry in the `Running` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(SchedulerState::Running),
            started: AtomicBool::new(false),
            transition: Mutex::new(()),
            grace_ms: AtomicU64::new(0),
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
            in_flight: Arc::new(AtomicU64::new(0)),
            waiters: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Grace period passed to [`ShutdownRegistry::begin_shutdown`], or zero
    /// while still running.
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms.load(Ordering::SeqCst))
    }

    /// Registers `listener`.
    ///
    /// If shutdown has already begun the listener is invoked before this
    /// method returns.
    pub fn add(&self, listener: Arc<dyn ShutdownListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);

        // Either the drain in `begin_shutdown` or this branch removes the
        // entry; whichever wins the removal invokes it.
        if self.started.load(Ordering::SeqCst) {
            if let Some((_, listener)) = self.listeners.remove(&id) {
                notify(id, listener.as_ref(), self.grace());
            }
        }
        id
    }

    /// Removes a listener. Returns `false` if it was unknown or already
    /// invoked.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Transitions to `ShuttingDown` and invokes every registered listener in
    /// registration order.
    ///
    /// Returns `false` without doing anything if shutdown had already begun.
    pub fn begin_shutdown(&self, grace: Duration) -> bool {
        {
            // Grace and state are published before `started`, which late
            // listeners in `add` key off.
            let _transition = self.transition.lock();
            if self.started.load(Ordering::SeqCst) {
                return false;
            }
            let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
            self.grace_ms.store(grace_ms, Ordering::SeqCst);
            self.state.store(Arc::new(SchedulerState::ShuttingDown));
            self.started.store(true, Ordering::SeqCst);
        }

        // Collect first: removing while iterating a DashMap shard deadlocks.
        let mut ids: Vec<ListenerId> = self.listeners.iter().map(|entry| *entry.key()).collect();
        ids.sort_by_key(|id| id.0);
        debug!(listeners = ids.len(), ?grace, "notifying shutdown listeners");
        for id in ids {
            if let Some((_, listener)) = self.listeners.remove(&id) {
                notify(id, listener.as_ref(), grace);
            }
        }
        true
    }

    /// Transitions to the terminal `Shutdown` state and resolves every
    /// termination future.
    pub fn mark_shutdown(&self) {
        let waiters = {
            let mut waiters = self.waiters.lock();
            self.state.store(Arc::new(SchedulerState::Shutdown));
            std::mem::take(&mut *waiters)
        };
        for waiter in waiters {
            waiter.succeed(());
        }
    }

    /// Returns a future resolved once the state reaches `Shutdown`.
    pub fn termination(&self) -> Future<()> {
        let mut waiters = self.waiters.lock();
        if self.state() == SchedulerState::Shutdown {
            return Future::done();
        }
        let (deferred, future) = Deferred::pair();
        waiters.push(deferred);
        future
    }

    /// Creates an RAII guard that tracks one unit of in-flight work.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight work to finish, up to `timeout`.
    ///
    /// Returns `false` if the timeout expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Blocking variant of [`ShutdownRegistry::wait_for_drain`] for use off
    /// the runtime being drained.
    #[must_use]
    pub fn wait_for_drain_blocking(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownRegistry")
            .field("state", &self.state())
            .field("listeners", &self.listeners.len())
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

fn notify(id: ListenerId, listener: &dyn ShutdownListener, grace: Duration) {
    if catch_unwind(AssertUnwindSafe(|| listener.on_shutdown(grace))).is_err() {
        error!(listener = id.0, "shutdown listener panicked");
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Clone for InFlightGuard {
    fn clone(&self) -> Self {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
