//! The combinator algebra over [`Future`].
//!
//! Every combinator consumes its source, preserves synchronous delivery when
//! the source is already resolved, and wires cancellation of the derived
//! future back to the source (and, for the `flat_map` family, to whichever
//! inner future is currently active).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::cell::{Canceller, Cell};
use super::{Future, Repr};
use crate::deferred::Deferred;
use crate::result::{guard, Fault, FaultFilter, Outcome};

impl<V: Send + 'static> Future<V> {
    /// Derives a future whose outcome is `step` applied to this one's.
    ///
    /// `step` must not panic; callers wrap user code in [`guard`].
    fn transform<U, F>(self, step: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<V>) -> Outcome<U> + Send + 'static,
    {
        match self.repr {
            Repr::Resolved(outcome) => Future::of(step(outcome)),
            Repr::Pending(source) => {
                let (deferred, derived) = Deferred::pair();
                deferred.on_cancel(cancel_source(&source));
                source.register(Box::new(move |outcome| {
                    deferred.complete(step(outcome));
                }));
                derived
            }
        }
    }

    /// Derives a future that follows the future produced by `step`.
    ///
    /// A panic inside `step` fails the derived future.
    fn transform_flat<U, F>(self, step: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<V>) -> Future<U> + Send + 'static,
    {
        match self.repr {
            Repr::Resolved(outcome) => match guard(|| step(outcome)) {
                Ok(next) => next,
                Err(fault) => Future::of(Err(fault)),
            },
            Repr::Pending(source) => {
                let (deferred, derived) = Deferred::pair();
                let inner: Arc<Mutex<Option<Canceller>>> = Arc::new(Mutex::new(None));

                let hook_inner = Arc::clone(&inner);
                let upstream = cancel_source(&source);
                deferred.on_cancel(Box::new(move || {
                    upstream();
                    if let Some(active) = hook_inner.lock().take() {
                        active.cancel();
                    }
                }));

                source.register(Box::new(move |outcome| {
                    let next = match guard(|| step(outcome)) {
                        Ok(next) => next,
                        Err(fault) => {
                            deferred.fail(fault);
                            return;
                        }
                    };
                    if deferred.is_cancelled() {
                        next.cancel();
                        return;
                    }
                    *inner.lock() = Some(next.canceller());
                    next.on_result(move |outcome| {
                        deferred.complete(outcome);
                    });
                }));
                derived
            }
        }
    }

    /// Maps a success value; failures pass through unchanged.
    ///
    /// A panic in `mapper` fails the derived future.
    pub fn map<U, F>(self, mapper: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(V) -> U + Send + 'static,
    {
        self.transform(move |outcome| outcome.and_then(|value| guard(|| mapper(value))))
    }

    /// Recovers failures matching `filter` into a success value.
    ///
    /// Non-matching failures and all successes pass through unchanged.
    pub fn map_catch<K, F>(self, filter: K, mapper: F) -> Future<V>
    where
        K: FaultFilter,
        F: FnOnce(Fault) -> V + Send + 'static,
    {
        self.transform(move |outcome| match outcome {
            Err(fault) if filter.matches(&fault) => guard(|| mapper(fault)),
            other => other,
        })
    }

    /// Replaces failures matching `filter` with the fault `mapper` returns.
    pub fn map_fault<K, F>(self, filter: K, mapper: F) -> Future<V>
    where
        K: FaultFilter,
        F: FnOnce(Fault) -> Fault + Send + 'static,
    {
        self.transform(move |outcome| match outcome {
            Err(fault) if filter.matches(&fault) => match guard(|| mapper(fault)) {
                Ok(mapped) | Err(mapped) => Err(mapped),
            },
            other => other,
        })
    }

    /// Maps the whole outcome, whether success or failure.
    pub fn map_result<U, F>(self, mapper: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<V>) -> Outcome<U> + Send + 'static,
    {
        self.transform(move |outcome| guard(|| mapper(outcome)).and_then(std::convert::identity))
    }

    /// Turns a success into the failure returned by `mapper`.
    pub fn map_throw<U, F>(self, mapper: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(V) -> Fault + Send + 'static,
    {
        self.transform(move |outcome| match outcome {
            Ok(value) => match guard(|| mapper(value)) {
                Ok(fault) | Err(fault) => Err(fault),
            },
            Err(fault) => Err(fault),
        })
    }

    /// Chains a future-returning step onto a success value.
    pub fn flat_map<U, F>(self, mapper: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(V) -> Future<U> + Send + 'static,
    {
        self.transform_flat(move |outcome| match outcome {
            Ok(value) => mapper(value),
            Err(fault) => Future::failure(fault),
        })
    }

    /// Recovers matching failures through a future-returning step.
    pub fn flat_map_catch<K, F>(self, filter: K, mapper: F) -> Future<V>
    where
        K: FaultFilter,
        F: FnOnce(Fault) -> Future<V> + Send + 'static,
    {
        self.transform_flat(move |outcome| match outcome {
            Err(fault) if filter.matches(&fault) => mapper(fault),
            other => Future::of(other),
        })
    }

    /// Replaces matching failures with the fault a future-returning step yields.
    ///
    /// If the step's future itself fails, that fault is used instead.
    pub fn flat_map_fault<K, F>(self, filter: K, mapper: F) -> Future<V>
    where
        K: FaultFilter,
        F: FnOnce(Fault) -> Future<Fault> + Send + 'static,
    {
        self.transform_flat(move |outcome| match outcome {
            Err(fault) if filter.matches(&fault) => mapper(fault).transform(|replacement| {
                match replacement {
                    Ok(fault) | Err(fault) => Err(fault),
                }
            }),
            other => Future::of(other),
        })
    }

    /// Chains a future-returning step onto the whole outcome.
    pub fn flat_map_result<U, F>(self, mapper: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<V>) -> Future<U> + Send + 'static,
    {
        self.transform_flat(mapper)
    }

    /// Turns a success into the failure produced by a future-returning step.
    pub fn flat_map_throw<U, F>(self, mapper: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(V) -> Future<Fault> + Send + 'static,
    {
        self.transform_flat(move |outcome| match outcome {
            Ok(value) => mapper(value).transform(|produced| match produced {
                Ok(fault) | Err(fault) => Err(fault),
            }),
            Err(fault) => Future::failure(fault),
        })
    }

    /// Discards a success value, replacing it with `value`.
    pub fn pass<U>(self, value: U) -> Future<U>
    where
        U: Send + 'static,
    {
        self.transform(move |outcome| outcome.map(|_| value))
    }

    /// Turns a success into failure with `fault`.
    ///
    /// An upstream failure is kept rather than replaced.
    pub fn fail<U>(self, fault: impl Into<Fault>) -> Future<U>
    where
        U: Send + 'static,
    {
        let fault = fault.into();
        self.transform(move |outcome| match outcome {
            Ok(_) => Err(fault),
            Err(upstream) => Err(upstream),
        })
    }
}

/// Builds a cancel hook that cancels `source` if it still exists.
fn cancel_source<V: Send + 'static>(source: &Arc<Cell<V>>) -> Box<dyn FnOnce() + Send> {
    let weak: Weak<Cell<V>> = Arc::downgrade(source);
    Box::new(move || {
        if let Some(source) = weak.upgrade() {
            source.cancel();
        }
    })
}
