//! Pluggable execution contexts with cooperative shutdown.
//!
//! A [`Scheduler`] decides *where* asynchronous work runs. Two
//! implementations are provided:
//!
//! - [`RuntimeScheduler`] -- a general worker pool backed by a multi-threaded
//!   tokio runtime, used as the process default.
//! - [`ReactorScheduler`] -- a single serial task, used per connection so
//!   that work touching the connection runs in order on its own driver.
//!
//! Both share the lifecycle `Running -> ShuttingDown -> Shutdown` and a
//! registry of shutdown listeners, each invoked exactly once with the grace
//! period granted for releasing resources.

pub mod config;
mod default;
mod lifecycle;
mod reactor;
mod runtime;

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::error;

pub use config::SchedulerConfig;
pub use default::{default_scheduler, shutdown_default_scheduler};
pub use lifecycle::{InFlightGuard, ShutdownRegistry};
pub use reactor::ReactorScheduler;
pub use runtime::RuntimeScheduler;

use crate::deferred::Deferred;
use crate::future::Future;
use crate::result::{Fault, Outcome};

/// A synchronous unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An asynchronous unit of work.
pub type BoxedWork = Pin<Box<dyn std::future::Future<Output = ()> + Send + 'static>>;

/// Scheduler lifecycle state.
///
/// State machine: Running -> ShuttingDown -> Shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Accepting and running work.
    Running,
    /// Shutdown listeners have been notified; no new work is accepted.
    ShuttingDown,
    /// All work has stopped. Terminal.
    Shutdown,
}

impl SchedulerState {
    /// Returns the state name as a static string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Error returned when a scheduler cannot accept work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    ShutDown,
    #[error("failed to start scheduler: {0}")]
    Start(String),
}

/// Identifies a registered shutdown listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Notified once when a scheduler begins shutting down.
///
/// A component built on a scheduler treats this notification as being told
/// to shut itself down, and should release its resources within `grace`.
pub trait ShutdownListener: Send + Sync + 'static {
    fn on_shutdown(&self, grace: Duration);
}

impl<F> ShutdownListener for F
where
    F: Fn(Duration) + Send + Sync + 'static,
{
    fn on_shutdown(&self, grace: Duration) {
        self(grace);
    }
}

/// Execution context for asynchronous work.
pub trait Scheduler: Send + Sync + 'static {
    /// Runs a synchronous task.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ShutDown`] once shutdown has begun.
    fn submit(&self, task: Task) -> Result<(), SchedulerError>;

    /// Runs an asynchronous unit of work to completion.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ShutDown`] once shutdown has begun.
    fn spawn_boxed(&self, work: BoxedWork) -> Result<(), SchedulerError>;

    /// Registers a listener notified when shutdown begins.
    ///
    /// If shutdown has already begun the listener is invoked immediately.
    fn add_shutdown_listener(&self, listener: Arc<dyn ShutdownListener>) -> ListenerId;

    /// Removes a listener. Returns `false` if it was not registered (or has
    /// already been notified).
    fn remove_shutdown_listener(&self, id: ListenerId) -> bool;

    /// Tracks work running on this scheduler's threads that it did not
    /// start itself. Shutdown waits for every outstanding guard, up to the
    /// grace period, before the scheduler stops. Guards may be taken while
    /// shutting down.
    fn in_flight_guard(&self) -> InFlightGuard;

    /// Returns the current lifecycle state.
    fn state(&self) -> SchedulerState;

    /// Returns `true` once shutdown has begun.
    fn is_shutting_down(&self) -> bool {
        self.state() != SchedulerState::Running
    }

    /// Begins shutdown, notifying listeners with `grace`.
    ///
    /// The returned future resolves once the scheduler reaches
    /// [`SchedulerState::Shutdown`]. Calling this again returns a future for
    /// the same termination.
    fn shutdown(&self, grace: Duration) -> Future<()>;
}

/// Future-returning helpers available on every [`Scheduler`].
pub trait SchedulerExt: Scheduler {
    /// Runs async `work` on this scheduler, resolving with its outcome.
    fn spawn<V, W>(&self, work: W) -> Future<V>
    where
        V: Send + 'static,
        W: std::future::Future<Output = Outcome<V>> + Send + 'static,
    {
        let (deferred, future) = Deferred::pair();
        let spawned = self.spawn_boxed(Box::pin(async move {
            if deferred.is_cancelled() {
                return;
            }
            deferred.complete(work.await);
        }));
        match spawned {
            Ok(()) => future,
            Err(error) => Future::failure(error),
        }
    }

    /// Runs `task` on this scheduler, resolving with its outcome.
    fn execute<V, F>(&self, task: F) -> Future<V>
    where
        V: Send + 'static,
        F: FnOnce() -> Outcome<V> + Send + 'static,
    {
        let (deferred, future) = Deferred::pair();
        let submitted = self.submit(Box::new(move || {
            if !deferred.is_cancelled() {
                deferred.complete(crate::result::guard(task).and_then(std::convert::identity));
            }
        }));
        match submitted {
            Ok(()) => future,
            Err(error) => Future::failure(error),
        }
    }

    /// Runs `task` after `delay`, resolving with its outcome.
    ///
    /// Cancelling the returned future before the delay elapses skips `task`.
    fn schedule<V, F>(&self, delay: Duration, task: F) -> Future<V>
    where
        V: Send + 'static,
        F: FnOnce() -> Outcome<V> + Send + 'static,
    {
        let (deferred, future) = Deferred::pair();
        let spawned = self.spawn_boxed(Box::pin(async move {
            tokio::time::sleep(delay).await;
            if !deferred.is_cancelled() {
                deferred.complete(crate::result::guard(task).and_then(std::convert::identity));
            }
        }));
        match spawned {
            Ok(()) => future,
            Err(error) => Future::failure(Fault::from(error)),
        }
    }
}

impl<S: Scheduler + ?Sized> SchedulerExt for S {}

/// Runs a task, logging instead of propagating a panic.
pub(crate) fn run_task(task: Task) {
    if let Err(fault) = crate::result::guard(task) {
        error!(%fault, "scheduled task panicked");
    }
}

/// Wraps async work so that a panic is logged instead of propagated.
pub(crate) fn guarded(work: BoxedWork) -> BoxedWork {
    Box::pin(async move {
        if let Err(payload) = AssertUnwindSafe(work).catch_unwind().await {
            let fault = Fault::from_panic(payload.as_ref());
            error!(%fault, "scheduled work panicked");
        }
    })
}
