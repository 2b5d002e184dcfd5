//! Arkalix core: the future/result algebra, deferred completion, and
//! pluggable schedulers that the rest of the framework is built on.
//!
//! Every asynchronous operation in Arkalix returns a [`Future`], which is
//! either already resolved or pending on a [`Deferred`] held by whatever
//! component will produce its [`Outcome`]. Futures compose through the
//! combinators in [`future`] and cancel back through their whole chain.

pub mod aggregate;
pub mod deferred;
pub mod future;
pub mod result;
pub mod scheduler;

pub use aggregate::{first_fault, join_all, serialize};
pub use deferred::{Deferred, PendingQueue, ProtocolViolation};
pub use future::progress::{FutureProgress, Progress, ProgressDeferred};
pub use future::{Canceller, Future};
pub use result::{collect_outcomes, failure, success, Fault, FaultFilter, FaultKind, Outcome};
pub use scheduler::{
    default_scheduler, shutdown_default_scheduler, ListenerId, ReactorScheduler,
    RuntimeScheduler, Scheduler, SchedulerConfig, SchedulerError, SchedulerExt, SchedulerState,
    ShutdownListener,
};
