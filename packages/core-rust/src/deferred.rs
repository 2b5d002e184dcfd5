//! Producer-side completion handles and pipelined request matching.
//!
//! A [`Deferred`] resolves its paired [`Future`] exactly once. A
//! [`PendingQueue`] holds the outstanding deferreds of one pipelined
//! connection and resolves them strictly in issue order.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::future::{Cell, Future};
use crate::result::{Fault, Outcome};

/// Producer handle resolving exactly one [`Future`].
///
/// Only the first completion is honoured; later calls return `false`. If the
/// deferred is dropped without completing, its future fails with
/// [`Fault::Abandoned`].
pub struct Deferred<V: Send + 'static> {
    cell: Arc<Cell<V>>,
}

impl<V: Send + 'static> Deferred<V> {
    /// Creates a deferred and the pending future it resolves.
    #[must_use]
    pub fn pair() -> (Self, Future<V>) {
        let cell = Cell::new();
        let future = Future::pending(Arc::clone(&cell));
        (Self { cell }, future)
    }

    /// Completes the paired future with `outcome`.
    ///
    /// Returns `false` if the future was already completed or cancelled.
    pub fn complete(&self, outcome: Outcome<V>) -> bool {
        self.cell.complete(outcome)
    }

    /// Completes the paired future successfully.
    pub fn succeed(&self, value: V) -> bool {
        self.complete(Ok(value))
    }

    /// Completes the paired future with a failure.
    pub fn fail(&self, fault: impl Into<Fault>) -> bool {
        self.complete(Err(fault.into()))
    }

    /// Returns `true` if the paired future was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }

    /// Returns `true` once the paired future is resolved or cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    /// Registers a hook run if the paired future is cancelled.
    ///
    /// Producers use this to stop work nobody is waiting for. The hook runs
    /// immediately if cancellation already happened.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        self.cell.on_cancel(Box::new(hook));
    }
}

impl<V: Send + 'static> Drop for Deferred<V> {
    fn drop(&mut self) {
        self.cell.complete(Err(Fault::Abandoned));
    }
}

impl<V: Send + 'static> std::fmt::Debug for Deferred<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A completion arrived with no outstanding request to match it.
///
/// This signals an ordering bug in the collaborator driving the queue and is
/// never delivered to a consumer as an ordinary failure.
#[derive(Debug, thiserror::Error)]
#[error("protocol violation: no pending request for received completion")]
pub struct ProtocolViolation {
    /// The fault carried by the unmatched completion, if it was a failure.
    #[source]
    pub unmatched: Option<Fault>,
}

/// FIFO of outstanding deferreds for one pipelined connection.
///
/// Owned by the connection's single driver; not meant to be shared.
pub struct PendingQueue<V: Send + 'static> {
    queue: VecDeque<Deferred<V>>,
}

impl<V: Send + 'static> PendingQueue<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Enqueues a new outstanding request, returning its response future.
    pub fn push(&mut self) -> Future<V> {
        let (deferred, future) = Deferred::pair();
        self.queue.push_back(deferred);
        future
    }

    /// Enqueues a deferred created elsewhere.
    pub fn push_deferred(&mut self, deferred: Deferred<V>) {
        self.queue.push_back(deferred);
    }

    /// Resolves the oldest outstanding request with `outcome`.
    ///
    /// Returns `Ok(false)` if the request's future had been cancelled, in
    /// which case the outcome is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation`] if no request is outstanding.
    pub fn complete_next(&mut self, outcome: Outcome<V>) -> Result<bool, ProtocolViolation> {
        match self.queue.pop_front() {
            Some(deferred) => Ok(deferred.complete(outcome)),
            None => Err(ProtocolViolation {
                unmatched: outcome.err(),
            }),
        }
    }

    /// Fails every outstanding request with `fault`, in issue order.
    ///
    /// Returns the number of requests drained.
    pub fn fail_all(&mut self, fault: &Fault) -> usize {
        let count = self.queue.len();
        for deferred in self.queue.drain(..) {
            deferred.fail(fault.clone());
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<V: Send + 'static> Default for PendingQueue<V> {
    fn default() -> Self {
        Self::new()
    }
}
