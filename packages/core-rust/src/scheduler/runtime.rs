//! General-purpose worker-pool scheduler backed by a tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{error, info, warn};

use super::{
    guarded, run_task, BoxedWork, InFlightGuard, ListenerId, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerState, ShutdownListener, ShutdownRegistry, Task,
};
use crate::future::Future;

/// Scheduler running work on a multi-threaded tokio runtime.
///
/// Either owns its runtime ([`RuntimeScheduler::new`]) or borrows an
/// existing one ([`RuntimeScheduler::from_handle`]). An owned runtime is
/// stopped once in-flight work drains or the shutdown grace period elapses,
/// whichever comes first; a borrowed runtime is left running.
pub struct RuntimeScheduler {
    handle: Handle,
    runtime: Arc<Mutex<Option<Runtime>>>,
    registry: Arc<ShutdownRegistry>,
}

impl RuntimeScheduler {
    /// Builds a scheduler owning a new multi-threaded runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Start`] if the runtime cannot be built.
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let mut builder = Builder::new_multi_thread();
        builder.thread_name(config.thread_name.clone()).enable_all();
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        let runtime = builder
            .build()
            .map_err(|e| SchedulerError::Start(e.to_string()))?;
        info!(
            thread_name = %config.thread_name,
            worker_threads = ?config.worker_threads,
            "runtime scheduler started"
        );
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Arc::new(Mutex::new(Some(runtime))),
            registry: Arc::new(ShutdownRegistry::new()),
        })
    }

    /// Wraps an existing runtime. Shutting the scheduler down stops
    /// accepting work but leaves the runtime itself running.
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: Arc::new(Mutex::new(None)),
            registry: Arc::new(ShutdownRegistry::new()),
        }
    }

    /// Handle to the runtime work is spawned on.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Number of tasks accepted but not yet finished.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.registry.in_flight_count()
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.registry.is_running() {
            Ok(())
        } else {
            Err(SchedulerError::ShutDown)
        }
    }
}

impl Scheduler for RuntimeScheduler {
    fn submit(&self, task: Task) -> Result<(), SchedulerError> {
        self.ensure_running()?;
        let guard = self.registry.in_flight_guard();
        self.handle.spawn(async move {
            let _guard = guard;
            run_task(task);
        });
        Ok(())
    }

    fn spawn_boxed(&self, work: BoxedWork) -> Result<(), SchedulerError> {
        self.ensure_running()?;
        let guard = self.registry.in_flight_guard();
        let work = guarded(work);
        self.handle.spawn(async move {
            let _guard = guard;
            work.await;
        });
        Ok(())
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
        if !self.registry.begin_shutdown(grace) {
            return termination;
        }
        info!(?grace, in_flight = self.in_flight_count(), "runtime scheduler shutting down");

        let registry = Arc::clone(&self.registry);
        if self.runtime.lock().is_none() {
            self.handle.spawn(async move {
                if !registry.wait_for_drain(grace).await {
                    warn!(remaining = registry.in_flight_count(), "grace period elapsed with work in flight");
                }
                registry.mark_shutdown();
            });
            return termination;
        }

        // An owned runtime cannot be stopped from one of its own threads, so
        // draining and teardown happen on a dedicated thread.
        let slot = Arc::clone(&self.runtime);
        let spawned = std::thread::Builder::new()
            .name("arkalix-shutdown".to_string())
            .spawn({
                let slot = Arc::clone(&slot);
                let registry = Arc::clone(&registry);
                move || {
                    if !registry.wait_for_drain_blocking(grace) {
                        warn!(remaining = registry.in_flight_count(), "grace period elapsed with work in flight");
                    }
                    if let Some(runtime) = slot.lock().take() {
                        runtime.shutdown_background();
                    }
                    registry.mark_shutdown();
                    info!("runtime scheduler stopped");
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn shutdown thread; stopping runtime immediately");
            if let Some(runtime) = slot.lock().take() {
                runtime.shutdown_background();
            }
            registry.mark_shutdown();
        }
        termination
    }
}

impl Drop for RuntimeScheduler {
    fn drop(&mut self) {
        // Once shutdown has begun the shutdown thread owns the teardown.
        if !self.registry.is_running() {
            return;
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for RuntimeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeScheduler")
            .field("owned", &self.runtime.lock().is_some())
            .field("registry", &self.registry)
            .finish()
    }
}
