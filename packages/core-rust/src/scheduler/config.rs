//! Scheduler configuration.

use std::time::Duration;

/// Configuration for a [`RuntimeScheduler`](super::RuntimeScheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads. `None` uses one per available core.
    pub worker_threads: Option<usize>,
    /// Name given to worker threads.
    pub thread_name: String,
    /// Grace period used when the process-wide default scheduler is shut
    /// down without an explicit one.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: "arkalix-worker".to_string(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.worker_threads, None);
        assert_eq!(config.thread_name, "arkalix-worker");
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }
}
