//! Completion cell shared by a pending [`Future`](super::Future) and its
//! [`Deferred`](crate::Deferred) producer.
//!
//! All state lives behind one mutex. Consumers and cancel hooks are never
//! invoked while the lock is held, so a consumer may freely complete,
//! cancel, or register on other cells (or this one) without deadlocking.

use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::result::{Fault, Outcome};

pub(crate) type Consumer<V> = Box<dyn FnOnce(Outcome<V>) + Send>;
pub(crate) type CancelHook = Box<dyn FnOnce() + Send>;

/// Completion state machine.
///
/// `Empty -> ConsumerWaiting -> Delivered` when the consumer registers first,
/// `Empty -> Completed -> Delivered` when the outcome arrives first.
enum Slot<V> {
    Empty,
    ConsumerWaiting(Consumer<V>),
    Completed(Outcome<V>),
    Delivered,
}

impl<V> Slot<V> {
    fn is_pending(&self) -> bool {
        matches!(self, Self::Empty | Self::ConsumerWaiting(_))
    }
}

struct State<V> {
    slot: Slot<V>,
    cancel_hooks: Vec<CancelHook>,
    cancelled: bool,
}

pub(crate) struct Cell<V> {
    state: Mutex<State<V>>,
}

impl<V: Send + 'static> Cell<V> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                slot: Slot::Empty,
                cancel_hooks: Vec::new(),
                cancelled: false,
            }),
        })
    }

    /// Stores `outcome`, delivering it if a consumer is waiting.
    ///
    /// Returns `false` if the cell had already been completed or cancelled.
    pub(crate) fn complete(&self, outcome: Outcome<V>) -> bool {
        let mut state = self.state.lock();
        let consumer = match mem::replace(&mut state.slot, Slot::Delivered) {
            Slot::Empty => {
                state.slot = Slot::Completed(outcome);
                let hooks = mem::take(&mut state.cancel_hooks);
                drop(state);
                drop(hooks);
                return true;
            }
            Slot::ConsumerWaiting(consumer) => consumer,
            other => {
                state.slot = other;
                return false;
            }
        };
        let hooks = mem::take(&mut state.cancel_hooks);
        drop(state);
        drop(hooks);
        consumer(outcome);
        true
    }

    /// Registers the single consumer, invoking it inline if already completed.
    pub(crate) fn register(&self, consumer: Consumer<V>) {
        let mut state = self.state.lock();
        match mem::replace(&mut state.slot, Slot::Delivered) {
            Slot::Empty => state.slot = Slot::ConsumerWaiting(consumer),
            Slot::Completed(outcome) => {
                drop(state);
                consumer(outcome);
            }
            other => {
                state.slot = other;
                drop(state);
                warn!("second consumer registered on a future; ignoring it");
            }
        }
    }

    /// Cancels the cell if still pending, then runs its cancel hooks.
    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock();
        if !state.slot.is_pending() {
            return;
        }
        state.cancelled = true;
        let hooks = mem::take(&mut state.cancel_hooks);
        let consumer = match mem::replace(&mut state.slot, Slot::Delivered) {
            Slot::ConsumerWaiting(consumer) => Some(consumer),
            _ => {
                state.slot = Slot::Completed(Err(Fault::Cancelled));
                None
            }
        };
        drop(state);

        if let Some(consumer) = consumer {
            consumer(Err(Fault::Cancelled));
        }
        for hook in hooks {
            hook();
        }
    }

    /// Adds a hook run when the cell is cancelled.
    ///
    /// Runs the hook immediately if the cell was already cancelled; drops it
    /// if the cell completed normally.
    pub(crate) fn on_cancel(&self, hook: CancelHook) {
        let mut state = self.state.lock();
        if state.cancelled {
            drop(state);
            hook();
        } else if state.slot.is_pending() {
            state.cancel_hooks.push(hook);
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub(crate) fn is_done(&self) -> bool {
        !self.state.lock().slot.is_pending()
    }
}

/// Type-erased cancellation target.
pub(crate) trait Cancel: Send + Sync {
    fn cancel(&self);
}

impl<V: Send + 'static> Cancel for Cell<V> {
    fn cancel(&self) {
        Cell::cancel(self);
    }
}

/// Detached handle able to cancel a future after it has been consumed.
///
/// Holds only a weak reference: cancelling after the future's producer and
/// consumer are both gone is a no-op.
#[derive(Clone, Default)]
pub struct Canceller {
    target: Option<Weak<dyn Cancel>>,
}

impl Canceller {
    pub(crate) fn for_cell<V: Send + 'static>(cell: &Arc<Cell<V>>) -> Self {
        let strong: Arc<dyn Cancel> = cell.clone();
        Self {
            target: Some(Arc::downgrade(&strong)),
        }
    }

    /// A canceller that does nothing, used for already-resolved futures.
    #[must_use]
    pub fn noop() -> Self {
        Self { target: None }
    }

    /// Cancels the target future if it is still pending.
    pub fn cancel(&self) {
        if let Some(target) = self.target.as_ref().and_then(Weak::upgrade) {
            target.cancel();
        }
    }
}

impl std::fmt::Debug for Canceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canceller")
            .field("attached", &self.target.is_some())
            .finish()
    }
}
