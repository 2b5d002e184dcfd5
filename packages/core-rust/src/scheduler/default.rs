//! Process-wide default scheduler.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{RuntimeScheduler, Scheduler, SchedulerConfig, SchedulerError};
use crate::future::Future;

static DEFAULT: Mutex<Option<Arc<RuntimeScheduler>>> = Mutex::new(None);

/// Returns the process-wide default scheduler, creating it on first use.
///
/// A default scheduler that has begun shutting down is replaced by a fresh
/// one, so callers never receive a scheduler that rejects all work.
///
/// # Errors
///
/// Returns [`SchedulerError::Start`] if the runtime cannot be built.
pub fn default_scheduler() -> Result<Arc<RuntimeScheduler>, SchedulerError> {
    let mut slot = DEFAULT.lock();
    if let Some(scheduler) = slot.as_ref() {
        if !scheduler.is_shutting_down() {
            return Ok(Arc::clone(scheduler));
        }
    }
    debug!("creating default scheduler");
    let scheduler = Arc::new(RuntimeScheduler::new(&SchedulerConfig::default())?);
    *slot = Some(Arc::clone(&scheduler));
    Ok(scheduler)
}

/// Shuts down the default scheduler, if one exists.
///
/// `None` uses the grace period of [`SchedulerConfig::default`].
pub fn shutdown_default_scheduler(grace: Option<Duration>) -> Future<()> {
    let current = DEFAULT.lock().take();
    match current {
        Some(scheduler) => {
            scheduler.shutdown(grace.unwrap_or_else(|| SchedulerConfig::default().shutdown_grace))
        }
        None => Future::done(),
    }
}
