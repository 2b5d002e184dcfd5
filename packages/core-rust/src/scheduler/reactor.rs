//! Serial scheduler driving all work on a single tokio task.
//!
//! Each [`ReactorScheduler`] owns one driver task that:
//! 1. Receives jobs on an unbounded mpsc channel
//! 2. Runs synchronous tasks inline, strictly in submission order
//! 3. Polls accepted async work concurrently on the same task
//! 4. On shutdown, runs already-queued jobs and then polls outstanding work
//!    until it finishes or the grace period elapses

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    guarded, run_task, BoxedWork, InFlightGuard, ListenerId, Scheduler, SchedulerError,
    SchedulerState, ShutdownListener, ShutdownRegistry, Task,
};
use crate::future::Future;

enum Job {
    Run(Task),
    Await(BoxedWork),
    Stop(Duration),
}

/// Single-task scheduler. Nothing it runs ever executes in parallel with
/// anything else it runs.
pub struct ReactorScheduler {
    name: String,
    tx: mpsc::UnboundedSender<Job>,
    registry: Arc<ShutdownRegistry>,
    driver: JoinHandle<()>,
}

impl ReactorScheduler {
    /// Starts a reactor on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self::start_on(&tokio::runtime::Handle::current(), name)
    }

    /// Starts a reactor whose driver task runs on `handle`.
    #[must_use]
    pub fn start_on(handle: &tokio::runtime::Handle, name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ShutdownRegistry::new());
        let driver = handle.spawn(drive(name.clone(), rx, Arc::clone(&registry)));
        Self {
            name,
            tx,
            registry,
            driver,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(&self, job: Job) -> Result<(), SchedulerError> {
        if !self.registry.is_running() {
            return Err(SchedulerError::ShutDown);
        }
        self.tx.send(job).map_err(|_| SchedulerError::ShutDown)
    }
}

impl Scheduler for ReactorScheduler {
    fn submit(&self, task: Task) -> Result<(), SchedulerError> {
        self.enqueue(Job::Run(task))
    }

    fn spawn_boxed(&self, work: BoxedWork) -> Result<(), SchedulerError> {
        self.enqueue(Job::Await(work))
    }

    fn add_shutdown_listener(&self, listener: Arc<dyn ShutdownListener>) -> ListenerId {
        self.registry.add(listener)
    }

    fn remove_shutdown_listener(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    fn in_flight_guard(&self) -> InFlightGuard {
        self.registry.in_flight_guard()
    }

    fn state(&self) -> SchedulerState {
        self.registry.state()
    }

    fn shutdown(&self, grace: Duration) -> Future<()> {
        let termination = self.registry.termination();
        if self.registry.begin_shutdown(grace) {
            debug!(reactor = %self.name, ?grace, "reactor shutting down");
            if self.tx.send(Job::Stop(grace)).is_err() {
                // Driver already gone.
                self.registry.mark_shutdown();
            }
        }
        termination
    }
}

impl Drop for ReactorScheduler {
    fn drop(&mut self) {
        // Dropped without a shutdown: stop the driver and the work it holds.
        if self.registry.is_running() {
            self.driver.abort();
        }
    }
}

impl std::fmt::Debug for ReactorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorScheduler")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

async fn drive(name: String, mut rx: mpsc::UnboundedReceiver<Job>, registry: Arc<ShutdownRegistry>) {
    let mut active: FuturesUnordered<BoxedWork> = FuturesUnordered::new();

    let grace = loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(Job::Run(task)) => run_task(task),
                Some(Job::Await(work)) => active.push(guarded(work)),
                Some(Job::Stop(grace)) => break grace,
                None => break Duration::ZERO,
            },
            Some(()) = active.next(), if !active.is_empty() => {}
        }
    };

    // Jobs accepted before shutdown began still run.
    rx.close();
    while let Ok(job) = rx.try_recv() {
        match job {
            Job::Run(task) => run_task(task),
            Job::Await(work) => active.push(guarded(work)),
            Job::Stop(_) => {}
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    let mut drained = tokio::time::timeout_at(deadline, async {
        while active.next().await.is_some() {}
    })
    .await
    .is_ok();
    if drained {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        drained = registry.wait_for_drain(left).await;
    }
    if !drained {
        warn!(reactor = %name, remaining = active.len(), tracked = registry.in_flight_count(), "grace period elapsed; dropping unfinished work");
    }
    drop(active);
    registry.mark_shutdown();
    debug!(reactor = %name, "reactor stopped");
}
