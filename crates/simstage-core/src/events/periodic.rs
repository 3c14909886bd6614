//! Fixed-interval scheduled events.
//!
//! A [`PeriodicSchedule`] fires at every integer multiple of its interval.
//! The adapters wrap a closure so a periodic action can be registered
//! without a dedicated handler type.

use super::{ScheduledEventHandler, ScheduledEventReporter};
use crate::{EventOutcome, SimError, State};
use std::fmt;

/// Event times `k * interval` for integer `k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicSchedule {
    interval: f64,
}

impl PeriodicSchedule {
    /// `None` unless `interval` is finite and strictly positive.
    #[must_use]
    pub fn new(interval: f64) -> Option<Self> {
        (interval.is_finite() && interval > 0.0).then_some(Self { interval })
    }

    #[must_use]
    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// First multiple of the interval strictly after `now`.
    #[must_use]
    pub fn next_after(&self, now: f64) -> f64 {
        let mut count = (now / self.interval).floor();
        let mut time = count * self.interval;
        while time <= now {
            count += 1.0;
            time = count * self.interval;
        }
        time
    }
}

/// Scheduled handler running `action` on every multiple of the interval.
pub struct PeriodicEventHandler<F> {
    schedule: PeriodicSchedule,
    action: F,
}

impl<F> PeriodicEventHandler<F>
where
    F: Fn(&mut State) -> Result<EventOutcome, SimError>,
{
    pub fn new(schedule: PeriodicSchedule, action: F) -> Self {
        Self { schedule, action }
    }

    #[must_use]
    pub fn schedule(&self) -> PeriodicSchedule {
        self.schedule
    }
}

impl<F> fmt::Debug for PeriodicEventHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicEventHandler")
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl<F> ScheduledEventHandler for PeriodicEventHandler<F>
where
    F: Fn(&mut State) -> Result<EventOutcome, SimError>,
{
    fn next_event_time(&self, state: &State) -> Result<f64, SimError> {
        Ok(self.schedule.next_after(state.time()))
    }

    fn handle_event(
        &self,
        state: &mut State,
        _accuracy: f64,
        _y_weights: &[f64],
        _constraint_tols: &[f64],
    ) -> Result<EventOutcome, SimError> {
        (self.action)(state)
    }
}

/// Scheduled reporter observing the state on every multiple of the interval.
pub struct PeriodicEventReporter<F> {
    schedule: PeriodicSchedule,
    report: F,
}

impl<F> PeriodicEventReporter<F>
where
    F: Fn(&State) -> Result<(), SimError>,
{
    pub fn new(schedule: PeriodicSchedule, report: F) -> Self {
        Self { schedule, report }
    }
}

impl<F> fmt::Debug for PeriodicEventReporter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicEventReporter")
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl<F> ScheduledEventReporter for PeriodicEventReporter<F>
where
    F: Fn(&State) -> Result<(), SimError>,
{
    fn next_event_time(&self, state: &State) -> Result<f64, SimError> {
        Ok(self.schedule.next_after(state.time()))
    }

    fn handle_event(&self, state: &State) -> Result<(), SimError> {
        (self.report)(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;

    #[test]
    fn rejects_non_positive_intervals() {
        assert!(PeriodicSchedule::new(0.0).is_none());
        assert!(PeriodicSchedule::new(-1.0).is_none());
        assert!(PeriodicSchedule::new(f64::NAN).is_none());
        assert!(PeriodicSchedule::new(f64::INFINITY).is_none());
    }

    #[test]
    fn next_after_is_strictly_later() {
        let schedule = PeriodicSchedule::new(0.5).expect("interval");
        assert_eq!(schedule.next_after(0.0), 0.5);
        assert_eq!(schedule.next_after(0.5), 1.0);
        assert_eq!(schedule.next_after(0.7), 1.0);
        assert_eq!(schedule.next_after(-0.2), 0.0);
    }

    #[test]
    fn handler_runs_its_action() {
        let schedule = PeriodicSchedule::new(2.0).expect("interval");
        let handler = PeriodicEventHandler::new(schedule, |state: &mut State| {
            state.set_time(state.time() + 1.0);
            Ok(EventOutcome::modified(Stage::Time))
        });
        let mut state = State::new();
        assert_eq!(handler.next_event_time(&state).expect("time"), 2.0);
        let outcome = handler
            .handle_event(&mut state, 1e-3, &[], &[])
            .expect("handled");
        assert_eq!(outcome.lowest_modified, Stage::Time);
        assert_eq!(state.time(), 1.0);
        assert_eq!(handler.schedule().interval(), 2.0);
    }
}
