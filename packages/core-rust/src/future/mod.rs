//! Composable handles to outcomes that become known at most once.
//!
//! A [`Future`] is either already resolved, carrying its [`Outcome`] inline,
//! or pending on a completion cell driven by a [`Deferred`](crate::Deferred).
//! Registering a consumer on a resolved future invokes it synchronously,
//! before [`Future::on_result`] returns, so chains built entirely from known
//! values run without any scheduling.
//!
//! This type is unrelated to [`std::future::Future`]; use
//! [`Future::into_async`] to await one from async code.

mod cell;
mod combinators;
pub mod progress;

use std::sync::Arc;

use tokio::sync::oneshot;

pub(crate) use cell::Cell;
pub use cell::Canceller;

use crate::result::{Fault, Outcome};

pub(crate) enum Repr<V> {
    Resolved(Outcome<V>),
    Pending(Arc<Cell<V>>),
}

/// Handle to an [`Outcome`] that becomes known at most once.
///
/// Exactly one consumer may observe the outcome: [`Future::on_result`] and
/// every combinator take `self` by value. Use [`Future::canceller`] to keep
/// the ability to cancel after handing the future off.
#[must_use = "a future does nothing unless a consumer is registered"]
pub struct Future<V> {
    pub(crate) repr: Repr<V>,
}

impl<V: Send + 'static> Future<V> {
    /// Creates an already-resolved future.
    pub fn of(outcome: Outcome<V>) -> Self {
        Self {
            repr: Repr::Resolved(outcome),
        }
    }

    /// Creates an already-successful future.
    pub fn success(value: V) -> Self {
        Self::of(Ok(value))
    }

    /// Creates an already-failed future.
    pub fn failure(fault: impl Into<Fault>) -> Self {
        Self::of(Err(fault.into()))
    }

    pub(crate) fn pending(cell: Arc<Cell<V>>) -> Self {
        Self {
            repr: Repr::Pending(cell),
        }
    }

    /// Registers the consumer of this future's outcome.
    ///
    /// If the future is already resolved the consumer runs on the calling
    /// thread before this method returns. Otherwise it runs exactly once, on
    /// whichever thread completes the future.
    pub fn on_result<F>(self, consumer: F)
    where
        F: FnOnce(Outcome<V>) + Send + 'static,
    {
        match self.repr {
            Repr::Resolved(outcome) => consumer(outcome),
            Repr::Pending(cell) => cell.register(Box::new(consumer)),
        }
    }

    /// Registers a consumer that only observes failures.
    pub fn on_failure<F>(self, consumer: F)
    where
        F: FnOnce(Fault) + Send + 'static,
    {
        self.on_result(move |outcome| {
            if let Err(fault) = outcome {
                consumer(fault);
            }
        });
    }

    /// Requests cancellation.
    ///
    /// Effective only while pending: the consumer, if registered, receives
    /// [`Fault::Cancelled`], and cancellation propagates to every future this
    /// one was derived from. Has no effect on a resolved future.
    pub fn cancel(&self) {
        if let Repr::Pending(cell) = &self.repr {
            cell.cancel();
        }
    }

    /// Returns a detached handle able to cancel this future later.
    pub fn canceller(&self) -> Canceller {
        match &self.repr {
            Repr::Resolved(_) => Canceller::noop(),
            Repr::Pending(cell) => Canceller::for_cell(cell),
        }
    }

    /// Returns `true` once the outcome is known (or was cancelled).
    #[must_use]
    pub fn is_done(&self) -> bool {
        match &self.repr {
            Repr::Resolved(_) => true,
            Repr::Pending(cell) => cell.is_done(),
        }
    }

    /// Converts this future into an awaitable [`std::future::Future`].
    ///
    /// Dropping the returned future does not cancel this one; use a
    /// [`Canceller`] obtained beforehand for that.
    pub fn into_async(self) -> impl std::future::Future<Output = Outcome<V>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.on_result(move |outcome| {
            // The receiver may already be gone; the outcome is then unobserved.
            let _ = tx.send(outcome);
        });
        async move { rx.await.unwrap_or(Err(Fault::Abandoned)) }
    }
}

impl Future<()> {
    /// An already-successful future carrying no value.
    pub fn done() -> Self {
        Self::success(())
    }
}

impl<V> std::fmt::Debug for Future<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.repr {
            Repr::Resolved(Ok(_)) => "resolved(success)",
            Repr::Resolved(Err(_)) => "resolved(failure)",
            Repr::Pending(_) => "pending",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

impl<V: Send + 'static> From<Outcome<V>> for Future<V> {
    fn from(outcome: Outcome<V>) -> Self {
        Self::of(outcome)
    }
}
