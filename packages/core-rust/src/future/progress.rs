//! Futures that report incremental progress before resolving.
//!
//! Used by body-streaming operations: the producer reports how many bytes
//! (or items) have been handled so far, and listeners observe those events
//! strictly before the final outcome is delivered.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Canceller, Future};
use crate::deferred::Deferred;
use crate::result::{Fault, Outcome};

/// A single progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Units handled so far.
    pub current: u64,
    /// Total units expected, if known.
    pub total: Option<u64>,
}

type Listener = Box<dyn FnMut(Progress) + Send>;

/// Listener registry; `None` once the future has resolved.
struct Hub {
    listeners: Mutex<Option<Vec<Listener>>>,
}

impl Hub {
    fn open() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(Some(Vec::new())),
        })
    }

    fn closed() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(None),
        })
    }

    fn close(&self) {
        let listeners = self.listeners.lock().take();
        drop(listeners);
    }

    fn add(&self, listener: Listener) {
        if let Some(listeners) = self.listeners.lock().as_mut() {
            listeners.push(listener);
        }
    }

    fn emit(&self, progress: Progress) -> bool {
        // Take the listeners out so they run without the lock held.
        let Some(mut active) = self.listeners.lock().as_mut().map(std::mem::take) else {
            return false;
        };
        for listener in &mut active {
            listener(progress);
        }
        let mut guard = self.listeners.lock();
        if let Some(added) = guard.as_mut() {
            active.append(added);
            *added = active;
        }
        true
    }
}

/// A [`Future`] that also publishes [`Progress`] events.
///
/// Combinators live on [`Future`]; call [`FutureProgress::into_future`] once
/// progress listeners are registered to compose further.
#[must_use = "a future does nothing unless a consumer is registered"]
pub struct FutureProgress<V> {
    future: Future<V>,
    hub: Arc<Hub>,
}

impl<V: Send + 'static> FutureProgress<V> {
    /// An already-successful progress future; listeners never fire.
    pub fn success(value: V) -> Self {
        Self {
            future: Future::success(value),
            hub: Hub::closed(),
        }
    }

    /// An already-failed progress future; listeners never fire.
    pub fn failure(fault: impl Into<Fault>) -> Self {
        Self {
            future: Future::failure(fault),
            hub: Hub::closed(),
        }
    }

    /// Adds a listener for progress events.
    ///
    /// Has no effect once the future has resolved.
    pub fn add_progress_listener<F>(&self, listener: F) -> &Self
    where
        F: FnMut(Progress) + Send + 'static,
    {
        self.hub.add(Box::new(listener));
        self
    }

    /// Registers the consumer of the final outcome.
    pub fn on_result<F>(self, consumer: F)
    where
        F: FnOnce(Outcome<V>) + Send + 'static,
    {
        self.future.on_result(consumer);
    }

    pub fn cancel(&self) {
        self.future.cancel();
    }

    pub fn canceller(&self) -> Canceller {
        self.future.canceller()
    }

    /// Drops progress reporting, keeping only the outcome.
    ///
    /// Listeners already added keep receiving events.
    pub fn into_future(self) -> Future<V> {
        self.future
    }
}

impl<V: Send + 'static> From<FutureProgress<V>> for Future<V> {
    fn from(progress: FutureProgress<V>) -> Self {
        progress.into_future()
    }
}

/// Producer side of a [`FutureProgress`].
pub struct ProgressDeferred<V: Send + 'static> {
    deferred: Deferred<V>,
    hub: Arc<Hub>,
}

impl<V: Send + 'static> ProgressDeferred<V> {
    /// Creates a producer and the progress future it drives.
    #[must_use]
    pub fn pair() -> (Self, FutureProgress<V>) {
        let (deferred, future) = Deferred::pair();
        let hub = Hub::open();
        let on_cancel = Arc::clone(&hub);
        deferred.on_cancel(move || on_cancel.close());
        (
            Self {
                deferred,
                hub: Arc::clone(&hub),
            },
            FutureProgress { future, hub },
        )
    }

    /// Publishes a progress event to every listener.
    ///
    /// Returns `false` if the future has already resolved.
    pub fn report(&self, current: u64, total: Option<u64>) -> bool {
        self.hub.emit(Progress { current, total })
    }

    /// Completes the future. No progress event is delivered afterwards.
    pub fn complete(&self, outcome: Outcome<V>) -> bool {
        self.hub.close();
        self.deferred.complete(outcome)
    }

    pub fn succeed(&self, value: V) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, fault: impl Into<Fault>) -> bool {
        self.complete(Err(fault.into()))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.deferred.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_before_outcome() {
        let (producer, future) = ProgressDeferred::<&str>::pair();
        let log = Arc::new(Mutex::new(Vec::new()));

        let events = Arc::clone(&log);
        future.add_progress_listener(move |p| events.lock().push(format!("progress:{}", p.current)));
        let outcome = Arc::clone(&log);
        future.on_result(move |o| outcome.lock().push(format!("result:{}", o.unwrap())));

        assert!(producer.report(10, Some(30)));
        assert!(producer.report(30, Some(30)));
        producer.succeed("body");
        assert!(!producer.report(40, Some(30)));

        assert_eq!(
            *log.lock(),
            vec!["progress:10", "progress:30", "result:body"]
        );
    }

    #[test]
    fn listener_added_after_completion_is_noop() {
        let (producer, future) = ProgressDeferred::<u8>::pair();
        producer.succeed(1);

        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        future.add_progress_listener(move |_| *counter.lock() += 1);
        producer.report(1, None);
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn resolved_progress_future_never_reports() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let future = FutureProgress::success(5);
        future.add_progress_listener(move |_| *counter.lock() += 1);
        future.on_result(|o| assert_eq!(o.unwrap(), 5));
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn cancellation_stops_progress() {
        let (producer, future) = ProgressDeferred::<u8>::pair();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        future.add_progress_listener(move |_| *counter.lock() += 1);

        future.cancel();
        assert!(producer.is_cancelled());
        assert!(!producer.report(1, None));
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn later_listener_sees_only_later_events() {
        let (producer, future) = ProgressDeferred::<u8>::pair();
        let totals = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&totals);
        future.add_progress_listener(move |p| sink.lock().push(p.current));
        producer.report(1, None);
        let sink = Arc::clone(&totals);
        future.add_progress_listener(move |p| sink.lock().push(p.current * 100));
        producer.report(2, None);

        assert_eq!(*totals.lock(), vec![1, 2, 200]);
    }
}
