//! Helpers operating on many futures at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::deferred::Deferred;
use crate::future::{Canceller, Future};
use crate::result::{guard, Fault, Outcome};

// ---------------------------------------------------------------------------
// serialize
// ---------------------------------------------------------------------------

const REGISTERING: u8 = 0;
const RESOLVED_INLINE: u8 = 1;
const DEFERRED: u8 = 2;

struct Sequence<V: Send + 'static, F> {
    remaining: VecDeque<F>,
    outcomes: Vec<Outcome<V>>,
    deferred: Option<Deferred<Vec<Outcome<V>>>>,
    current: Option<Canceller>,
}

/// Runs each thunk's future strictly after the previous one resolved.
///
/// No two thunks are ever started concurrently, and a failure does not stop
/// the sequence. The returned future resolves with every individual outcome,
/// in input order. Cancelling it cancels the future currently running and
/// skips every thunk not yet started.
///
/// Thunks whose futures resolve synchronously are driven by a loop rather
/// than by recursion, so arbitrarily long sequences run in constant stack.
pub fn serialize<V, F, I>(thunks: I) -> Future<Vec<Outcome<V>>>
where
    V: Send + 'static,
    F: FnOnce() -> Future<V> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let remaining: VecDeque<F> = thunks.into_iter().collect();
    if remaining.is_empty() {
        return Future::success(Vec::new());
    }

    let (deferred, future) = Deferred::pair();
    let outcomes = Vec::with_capacity(remaining.len());
    let sequence = Arc::new(Mutex::new(Sequence {
        remaining,
        outcomes,
        deferred: None,
        current: None,
    }));

    let weak: Weak<Mutex<Sequence<V, F>>> = Arc::downgrade(&sequence);
    deferred.on_cancel(move || {
        let current = weak.upgrade().and_then(|sequence| sequence.lock().current.take());
        if let Some(current) = current {
            current.cancel();
        }
    });
    sequence.lock().deferred = Some(deferred);

    advance(sequence);
    future
}

fn advance<V, F>(sequence: Arc<Mutex<Sequence<V, F>>>)
where
    V: Send + 'static,
    F: FnOnce() -> Future<V> + Send + 'static,
{
    loop {
        let next = {
            let mut state = sequence.lock();
            let cancelled = state.deferred.as_ref().map_or(true, Deferred::is_cancelled);
            match state.remaining.pop_front() {
                Some(thunk) if !cancelled => Some(thunk),
                _ => None,
            }
        };
        let Some(thunk) = next else {
            finish(&sequence);
            return;
        };

        let future = guard(thunk).unwrap_or_else(|fault| Future::of(Err(fault)));
        sequence.lock().current = Some(future.canceller());

        let flag = Arc::new(AtomicU8::new(REGISTERING));
        let on_result_flag = Arc::clone(&flag);
        let on_result_sequence = Arc::clone(&sequence);
        future.on_result(move |outcome| {
            on_result_sequence.lock().outcomes.push(outcome);
            // Resolved while still registering: the loop below continues.
            // Resolved later: this callback drives the next step itself.
            if on_result_flag
                .compare_exchange(REGISTERING, RESOLVED_INLINE, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                advance(on_result_sequence);
            }
        });

        if flag
            .compare_exchange(REGISTERING, DEFERRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }
}

fn finish<V, F>(sequence: &Mutex<Sequence<V, F>>)
where
    V: Send + 'static,
{
    let (deferred, outcomes) = {
        let mut state = sequence.lock();
        state.current = None;
        (state.deferred.take(), std::mem::take(&mut state.outcomes))
    };
    if let Some(deferred) = deferred {
        deferred.succeed(outcomes);
    }
}

// ---------------------------------------------------------------------------
// join_all / first_fault
// ---------------------------------------------------------------------------

/// Waits for every already-started future, keeping outcomes in input order.
///
/// Cancelling the returned future cancels every input still pending.
pub fn join_all<V: Send + 'static>(futures: Vec<Future<V>>) -> Future<Vec<Outcome<V>>> {
    if futures.is_empty() {
        return Future::success(Vec::new());
    }

    let (deferred, joined) = Deferred::pair();
    let cancellers: Vec<Canceller> = futures.iter().map(Future::canceller).collect();
    deferred.on_cancel(move || {
        for canceller in cancellers {
            canceller.cancel();
        }
    });

    let total = futures.len();
    let slots: Arc<Mutex<Vec<Option<Outcome<V>>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    let remaining = Arc::new(AtomicUsize::new(total));
    let deferred = Arc::new(deferred);

    for (index, future) in futures.into_iter().enumerate() {
        let slots = Arc::clone(&slots);
        let remaining = Arc::clone(&remaining);
        let deferred = Arc::clone(&deferred);
        future.on_result(move |outcome| {
            slots.lock()[index] = Some(outcome);
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let outcomes = std::mem::take(&mut *slots.lock())
                    .into_iter()
                    .map(|slot| slot.unwrap_or(Err(Fault::Abandoned)))
                    .collect();
                deferred.succeed(outcomes);
            }
        });
    }
    joined
}

/// Returns the first fault among `outcomes`, in input order.
///
/// # Errors
///
/// Returns a clone of the first failed outcome's fault.
pub fn first_fault<V>(outcomes: &[Outcome<V>]) -> Outcome<()> {
    match outcomes.iter().find_map(|outcome| outcome.as_ref().err()) {
        Some(fault) => Err(fault.clone()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::result::FaultKind;

    fn capture<V: Send + 'static>(future: Future<V>) -> Arc<Mutex<Option<Outcome<V>>>> {
        let slot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        future.on_result(move |outcome| *sink.lock() = Some(outcome));
        slot
    }

    #[test]
    fn serialize_empty_resolves_immediately() {
        let result = capture(serialize(Vec::<fn() -> Future<u8>>::new()));
        assert!(result.lock().take().unwrap().unwrap().is_empty());
    }

    #[test]
    fn serialize_keeps_every_outcome_in_order() {
        let thunks: Vec<Box<dyn FnOnce() -> Future<u32> + Send>> = vec![
            Box::new(|| Future::success(1)),
            Box::new(|| Future::failure(Fault::Abandoned)),
            Box::new(|| Future::success(3)),
        ];
        let outcomes = capture(serialize(thunks)).lock().take().unwrap().unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(*outcomes[0].as_ref().unwrap(), 1);
        assert_eq!(outcomes[1].as_ref().unwrap_err().kind(), FaultKind::Abandoned);
        assert_eq!(*outcomes[2].as_ref().unwrap(), 3);
    }

    #[test]
    fn serialize_starts_next_only_after_previous_resolves() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let producers: Arc<Mutex<Vec<Deferred<u32>>>> = Arc::new(Mutex::new(Vec::new()));

        let thunks: Vec<_> = (0..3)
            .map(|i| {
                let log = Arc::clone(&log);
                let producers = Arc::clone(&producers);
                move || {
                    log.lock().push(format!("start:{i}"));
                    let (deferred, future) = Deferred::pair();
                    producers.lock().push(deferred);
                    future
                }
            })
            .collect();
        let result = capture(serialize(thunks));

        for i in 0..3u32 {
            assert_eq!(log.lock().len(), i as usize + 1);
            let producer = producers.lock().remove(0);
            log.lock().push(format!("end:{i}"));
            producer.succeed(i * 10);
        }

        assert_eq!(
            *log.lock(),
            vec!["start:0", "end:0", "start:1", "end:1", "start:2", "end:2"]
        );
        let values: Vec<u32> = result
            .lock()
            .take()
            .unwrap()
            .unwrap()
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(values, vec![0, 10, 20]);
    }

    #[test]
    fn serialize_long_resolved_chain_runs_in_constant_stack() {
        let thunks = (0..200_000u32).map(|i| move || Future::success(i));
        let outcomes = capture(serialize(thunks)).lock().take().unwrap().unwrap();
        assert_eq!(outcomes.len(), 200_000);
        assert_eq!(*outcomes[199_999].as_ref().unwrap(), 199_999);
    }

    #[test]
    fn serialize_panicking_thunk_is_recorded() {
        let thunks: Vec<Box<dyn FnOnce() -> Future<u8> + Send>> = vec![
            Box::new(|| -> Future<u8> { panic!("thunk exploded") }),
            Box::new(|| Future::success(2)),
        ];
        let outcomes = capture(serialize(thunks)).lock().take().unwrap().unwrap();
        assert_eq!(outcomes[0].as_ref().unwrap_err().kind(), FaultKind::Panicked);
        assert_eq!(*outcomes[1].as_ref().unwrap(), 2);
    }

    #[test]
    fn cancelling_serialize_cancels_current_and_skips_rest() {
        let second_started = Arc::new(AtomicBool::new(false));
        let started = Arc::clone(&second_started);
        let (first, first_future) = Deferred::<u8>::pair();

        let thunks: Vec<Box<dyn FnOnce() -> Future<u8> + Send>> = vec![
            Box::new(move || first_future),
            Box::new(move || {
                started.store(true, Ordering::SeqCst);
                Future::success(2)
            }),
        ];
        let sequence = serialize(thunks);
        let canceller = sequence.canceller();
        let result = capture(sequence);

        canceller.cancel();
        assert!(first.is_cancelled());
        assert!(!second_started.load(Ordering::SeqCst));
        assert!(result.lock().take().unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn join_all_keeps_input_order() {
        let (a, fa) = Deferred::pair();
        let (b, fb) = Deferred::pair();
        let result = capture(join_all(vec![fa, fb, Future::success("c")]));

        b.succeed("b");
        assert!(result.lock().is_none());
        a.fail(Fault::ShuttingDown);

        let outcomes = result.lock().take().unwrap().unwrap();
        assert_eq!(outcomes[0].as_ref().unwrap_err().kind(), FaultKind::ShuttingDown);
        assert_eq!(*outcomes[1].as_ref().unwrap(), "b");
        assert_eq!(*outcomes[2].as_ref().unwrap(), "c");
    }

    #[test]
    fn cancelling_join_all_cancels_inputs() {
        let (a, fa) = Deferred::<u8>::pair();
        let joined = join_all(vec![fa, Future::success(1)]);
        joined.cancel();
        assert!(a.is_cancelled());
    }

    #[test]
    fn first_fault_picks_earliest() {
        let outcomes: Vec<Outcome<u8>> =
            vec![Ok(1), Err(Fault::Abandoned), Err(Fault::Cancelled)];
        assert_eq!(first_fault(&outcomes).unwrap_err().kind(), FaultKind::Abandoned);
        assert!(first_fault(&[Ok::<u8, Fault>(1)]).is_ok());
    }
}
