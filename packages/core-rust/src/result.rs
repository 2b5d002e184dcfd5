//! Outcome values and the faults carried by failed outcomes.
//!
//! An [`Outcome`] is the resolved value of a [`Future`](crate::Future): either
//! a success value or a [`Fault`]. Faults are opaque to the combinator engine;
//! the only inspection it performs is through a caller-supplied
//! [`FaultFilter`], which is either a [`FaultKind`] discriminator or a
//! predicate closure.

use std::any::Any;
use std::sync::Arc;

use crate::scheduler::SchedulerError;

/// Resolved outcome of an asynchronous operation.
pub type Outcome<V> = Result<V, Fault>;

/// Creates a successful outcome.
#[must_use]
pub fn success<V>(value: V) -> Outcome<V> {
    Ok(value)
}

/// Creates a failed outcome.
#[must_use]
pub fn failure<V>(fault: impl Into<Fault>) -> Outcome<V> {
    Err(fault.into())
}

/// Error payload of a failed [`Outcome`].
///
/// Cloning is cheap: every variant carrying a foreign error stores it
/// behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Fault {
    /// The future was cancelled before it resolved.
    #[error("operation cancelled")]
    Cancelled,
    /// The producing side was dropped without ever completing.
    #[error("producer dropped without completing")]
    Abandoned,
    /// A user-supplied callback panicked while producing a value.
    #[error("callback panicked: {message}")]
    Panicked { message: String },
    /// A scheduler refused to run the work.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The owning system has begun shutting down.
    #[error("system is shutting down")]
    ShuttingDown,
    /// An I/O operation failed.
    #[error("i/o error: {0}")]
    Io(Arc<std::io::Error>),
    /// A collaborator-defined fault, tagged with a static kind name.
    #[error("{kind}: {error}")]
    Custom {
        kind: &'static str,
        error: Arc<anyhow::Error>,
    },
    /// Any other error.
    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

/// Discriminator used to select faults by kind without inspecting payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Cancelled,
    Abandoned,
    Panicked,
    Scheduler,
    ShuttingDown,
    Io,
    /// Matches [`Fault::Custom`] faults carrying the same kind name.
    Custom(&'static str),
    Other,
}

impl Fault {
    /// Returns the discriminator of this fault.
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Cancelled => FaultKind::Cancelled,
            Self::Abandoned => FaultKind::Abandoned,
            Self::Panicked { .. } => FaultKind::Panicked,
            Self::Scheduler(_) => FaultKind::Scheduler,
            Self::ShuttingDown => FaultKind::ShuttingDown,
            Self::Io(_) => FaultKind::Io,
            Self::Custom { kind, .. } => FaultKind::Custom(*kind),
            Self::Other(_) => FaultKind::Other,
        }
    }

    /// Creates a collaborator-defined fault tagged with `kind`.
    pub fn custom(kind: &'static str, error: impl Into<anyhow::Error>) -> Self {
        Self::Custom {
            kind,
            error: Arc::new(error.into()),
        }
    }

    /// Creates an untagged fault from a message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Other(Arc::new(anyhow::Error::msg(message)))
    }

    /// Returns `true` if this fault signals cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Converts a caught panic payload into a fault.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

impl From<std::io::Error> for Fault {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<anyhow::Error> for Fault {
    fn from(error: anyhow::Error) -> Self {
        Self::Other(Arc::new(error))
    }
}

/// Selects which faults a recovering combinator applies to.
pub trait FaultFilter: Send + 'static {
    /// Returns `true` if `fault` should be handled.
    fn matches(&self, fault: &Fault) -> bool;
}

impl FaultFilter for FaultKind {
    fn matches(&self, fault: &Fault) -> bool {
        fault.kind() == *self
    }
}

impl<F> FaultFilter for F
where
    F: Fn(&Fault) -> bool + Send + 'static,
{
    fn matches(&self, fault: &Fault) -> bool {
        self(fault)
    }
}

/// Runs `f`, turning a panic into a [`Fault::Panicked`] failure.
pub(crate) fn guard<T>(f: impl FnOnce() -> T) -> Outcome<T> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .map_err(|payload| Fault::from_panic(payload.as_ref()))
}

/// Collapses a set of outcomes into the successful values, or the first fault.
///
/// # Errors
///
/// Returns the first fault found, in input order.
pub fn collect_outcomes<V>(outcomes: Vec<Outcome<V>>) -> Outcome<Vec<V>> {
    outcomes.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_populate_one_variant() {
        let ok: Outcome<u32> = success(7);
        assert!(ok.is_ok());
        assert_eq!(ok.ok(), Some(7));

        let err: Outcome<u32> = failure(Fault::Cancelled);
        assert!(err.is_err());
        assert!(err.unwrap_err().is_cancelled());
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Fault::Cancelled.kind(), FaultKind::Cancelled);
        assert_eq!(Fault::ShuttingDown.kind(), FaultKind::ShuttingDown);
        assert_eq!(
            Fault::custom("timeout", anyhow::anyhow!("slow")).kind(),
            FaultKind::Custom("timeout")
        );
        assert_eq!(Fault::msg("boom").kind(), FaultKind::Other);
    }

    #[test]
    fn kind_filter_only_matches_same_kind() {
        let filter = FaultKind::Custom("timeout");
        assert!(filter.matches(&Fault::custom("timeout", anyhow::anyhow!("x"))));
        assert!(!filter.matches(&Fault::custom("refused", anyhow::anyhow!("x"))));
        assert!(!filter.matches(&Fault::Cancelled));
    }

    #[test]
    fn predicate_filter() {
        let filter = |fault: &Fault| matches!(fault, Fault::Io(_));
        let io = Fault::from(std::io::Error::other("disk"));
        assert!(filter.matches(&io));
        assert!(!filter.matches(&Fault::Abandoned));
    }

    #[test]
    fn guard_captures_panic_message() {
        let outcome: Outcome<()> = guard(|| panic!("bad input"));
        match outcome {
            Err(Fault::Panicked { message }) => assert_eq!(message, "bad input"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn collect_outcomes_reports_first_fault() {
        let all_ok = collect_outcomes(vec![success(1), success(2)]);
        assert_eq!(all_ok.unwrap(), vec![1, 2]);

        let mixed = collect_outcomes(vec![
            success(1),
            failure(Fault::Abandoned),
            failure(Fault::Cancelled),
        ]);
        assert_eq!(mixed.unwrap_err().kind(), FaultKind::Abandoned);
    }

    #[test]
    fn display_messages() {
        assert_eq!(Fault::Cancelled.to_string(), "operation cancelled");
        assert_eq!(
            Fault::custom("timeout", anyhow::anyhow!("after 5s")).to_string(),
            "timeout: after 5s"
        );
    }
}
