//! Request-scoped timing and trace bookkeeping.
//!
//! Every compiled step enters the recorder before its handler runs and
//! receives a [`StepGuard`]. The guard records `{name, durationMs}` on every
//! exit path: normal return, error, panic, or cancellation. A step that
//! never finishes normally is recorded with the error `panicked` or
//! `cancelled`, so the timing list always holds one entry per step that
//! started.
//!
//! Durations are inclusive: a policy's entry covers everything it wraps.
//! See [`self_times`] for the exclusive view.

use crate::trace::{PolicyTraceEntry, TraceDetail};
use parking_lot::Mutex;
use stoma_core::{PipelineError, INTERNAL_ERROR_CODE};
use std::sync::Arc;
use std::time::Instant;

/// Inclusive duration of one policy invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTiming {
    /// Policy name.
    pub name: Arc<str>,
    /// Duration in milliseconds.
    pub duration_ms: f64,
}

/// Derives exclusive self-times from inclusive timings.
///
/// `timings` is in append order, innermost first. The first entry's self
/// time is its inclusive time; every later entry subtracts the inclusive
/// time of the entry before it, floored at zero. The result reads
/// outermost first.
///
/// ```
/// use stoma_pipeline::{self_times, PolicyTiming};
///
/// let inclusive = [("c", 3.2), ("b", 15.9), ("a", 16.0)]
///     .map(|(name, duration_ms)| PolicyTiming { name: name.into(), duration_ms });
///
/// let names: Vec<_> = self_times(&inclusive).iter().map(|t| t.name.to_string()).collect();
/// assert_eq!(names, ["a", "b", "c"]);
/// ```
#[must_use]
pub fn self_times(timings: &[PolicyTiming]) -> Vec<PolicyTiming> {
    let mut previous: Option<f64> = None;
    let mut result: Vec<PolicyTiming> = timings
        .iter()
        .map(|timing| {
            let duration_ms = match previous {
                None => timing.duration_ms,
                Some(inner) => (timing.duration_ms - inner).max(0.0),
            };
            previous = Some(timing.duration_ms);
            PolicyTiming {
                name: Arc::clone(&timing.name),
                duration_ms,
            }
        })
        .collect();
    result.reverse();
    result
}

#[derive(Default)]
struct State {
    timings: Vec<PolicyTiming>,
    traced: Vec<TracedStep>,
    abandoned: Option<&'static str>,
}

struct TracedStep {
    step: usize,
    entry: PolicyTraceEntry,
}

struct Shared {
    tracing: bool,
    state: Mutex<State>,
}

/// Shared per-request recorder.
///
/// Cloning is cheap. The lock is never held across an await and is only
/// ever contended by the single task running the request.
#[derive(Clone)]
pub(crate) struct Recorder {
    inner: Arc<Shared>,
}

impl Recorder {
    pub(crate) fn new(tracing: bool) -> Self {
        Self {
            inner: Arc::new(Shared {
                tracing,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub(crate) fn is_tracing(&self) -> bool {
        self.inner.tracing
    }

    /// Starts timing step `index`.
    pub(crate) fn enter(&self, index: usize, name: &Arc<str>, priority: i32) -> StepGuard {
        if self.inner.tracing {
            self.inner.state.lock().traced.push(TracedStep {
                step: index,
                entry: PolicyTraceEntry::started(name, priority),
            });
        }
        StepGuard {
            recorder: self.clone(),
            step: index,
            name: Arc::clone(name),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Notes that step `index` handed control to the next step.
    pub(crate) fn mark_advanced(&self, index: usize) {
        if !self.inner.tracing {
            return;
        }
        let mut state = self.inner.state.lock();
        if let Some(traced) = state.traced.iter_mut().rev().find(|t| t.step == index) {
            traced.entry.called_next = true;
        }
    }

    /// Marks every still-running step as having unwound from a panic.
    pub(crate) fn mark_panicked(&self) {
        self.inner.state.lock().abandoned = Some("panicked");
    }

    pub(crate) fn report(&self, policy: &str, detail: TraceDetail) {
        let mut state = self.inner.state.lock();
        match state.traced.iter_mut().rev().find(|t| t.entry.name == policy) {
            Some(traced) => traced.entry.detail = Some(detail),
            None => tracing::trace!(policy, "trace detail reported for a policy that has not run"),
        }
    }

    /// Inclusive timings in append order (innermost first).
    pub(crate) fn timings(&self) -> Vec<PolicyTiming> {
        self.inner.state.lock().timings.clone()
    }

    /// Trace entries in execution order.
    pub(crate) fn trace_entries(&self) -> Vec<PolicyTraceEntry> {
        self.inner
            .state
            .lock()
            .traced
            .iter()
            .map(|t| t.entry.clone())
            .collect()
    }

    fn record(&self, step: usize, name: &Arc<str>, started: Instant, error: Option<String>) {
        let elapsed = started.elapsed();
        stoma_telemetry::metrics::record_policy_duration(name, elapsed);

        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        let mut state = self.inner.state.lock();
        state.timings.push(PolicyTiming {
            name: Arc::clone(name),
            duration_ms,
        });
        if let Some(traced) = state.traced.iter_mut().rev().find(|t| t.step == step) {
            traced.entry.duration_ms = duration_ms;
            traced.entry.error = error;
        }
    }
}

/// Records a step's duration when finished or dropped.
pub(crate) struct StepGuard {
    recorder: Recorder,
    step: usize,
    name: Arc<str>,
    started: Instant,
    finished: bool,
}

impl StepGuard {
    /// Records a normal return, with the error it returned, if any.
    pub(crate) fn finish(mut self, error: Option<&PipelineError>) {
        self.finished = true;
        let error = error.map(|err| match err {
            PipelineError::Gateway(err) => err.to_string(),
            PipelineError::Internal(_) => INTERNAL_ERROR_CODE.to_string(),
        });
        self.recorder
            .record(self.step, &self.name, self.started, error);
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let reason = if std::thread::panicking() {
            "panicked"
        } else {
            self.recorder
                .inner
                .state
                .lock()
                .abandoned
                .unwrap_or("cancelled")
        };
        self.recorder
            .record(self.step, &self.name, self.started, Some(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoma_core::GatewayError;

    fn timing(name: &str, duration_ms: f64) -> PolicyTiming {
        PolicyTiming {
            name: Arc::from(name),
            duration_ms,
        }
    }

    #[test]
    fn test_self_times_reads_outermost_first() {
        let inclusive = vec![timing("c", 3.2), timing("b", 15.9), timing("a", 16.0)];
        let exclusive = self_times(&inclusive);

        let names: Vec<_> = exclusive.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let expected = [0.1, 12.7, 3.2];
        for (timing, expected) in exclusive.iter().zip(expected) {
            assert!((timing.duration_ms - expected).abs() < 1e-9, "{timing:?}");
        }
    }

    #[test]
    fn test_self_times_never_negative() {
        let inclusive = vec![timing("c", 5.0), timing("b", 4.0)];
        let exclusive = self_times(&inclusive);
        assert!(exclusive.iter().all(|t| t.duration_ms >= 0.0));
        assert!(self_times(&[]).is_empty());
    }

    #[test]
    fn test_guard_records_on_finish() {
        let recorder = Recorder::new(true);
        let guard = recorder.enter(0, &Arc::from("auth"), 10);
        guard.finish(Some(&GatewayError::unauthorized("nope").into()));

        let timings = recorder.timings();
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[0].name.as_ref(), "auth");

        let entries = recorder.trace_entries();
        assert_eq!(entries[0].priority, 10);
        assert!(entries[0].error.as_deref().unwrap().contains("unauthorized"));
    }

    #[test]
    fn test_internal_errors_are_not_leaked_into_trace() {
        let recorder = Recorder::new(true);
        let guard = recorder.enter(0, &Arc::from("db"), 0);
        guard.finish(Some(&PipelineError::internal(anyhow::anyhow!("password=hunter2"))));
        assert_eq!(
            recorder.trace_entries()[0].error.as_deref(),
            Some(INTERNAL_ERROR_CODE)
        );
    }

    #[test]
    fn test_dropped_guard_records_cancellation() {
        let recorder = Recorder::new(true);
        drop(recorder.enter(3, &Arc::from("timeout"), 0));

        assert_eq!(recorder.timings().len(), 1);
        assert_eq!(recorder.trace_entries()[0].error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_abandoned_after_panic() {
        let recorder = Recorder::new(true);
        let guard = recorder.enter(0, &Arc::from("boom"), 0);
        recorder.mark_panicked();
        drop(guard);
        assert_eq!(recorder.trace_entries()[0].error.as_deref(), Some("panicked"));
    }

    #[test]
    fn test_untraced_recorder_keeps_timings_only() {
        let recorder = Recorder::new(false);
        let guard = recorder.enter(0, &Arc::from("a"), 0);
        recorder.mark_advanced(0);
        guard.finish(None);

        assert!(!recorder.is_tracing());
        assert_eq!(recorder.timings().len(), 1);
        assert!(recorder.trace_entries().is_empty());
    }
}
