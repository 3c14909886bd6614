//! # Events
//!
//! Handler and reporter capabilities registered with the default subsystem,
//! plus the registry that mints event ids and dispatches firing events.
//!
//! | Kind | Fires when | May modify the state |
//! |---|---|---|
//! | Scheduled handler | its next event time is reached | yes |
//! | Triggered handler | its trigger value crosses zero | yes |
//! | Scheduled reporter | its next event time is reached | no |
//! | Triggered reporter | its trigger value crosses zero | no |

pub mod periodic;
pub mod registry;

pub use periodic::{PeriodicEventHandler, PeriodicEventReporter, PeriodicSchedule};
pub use registry::{DefaultSubsystem, EventRegistry};

use crate::{EventOutcome, EventTriggerInfo, SimError, Stage, State};

/// An event that fires at a time it computes itself.
pub trait ScheduledEventHandler {
    /// Next time this handler wants to fire. `f64::INFINITY` for never.
    fn next_event_time(&self, state: &State) -> Result<f64, SimError>;

    /// React to the event. The outcome reports the lowest stage the handler
    /// invalidated and whether it wants the simulation to stop.
    fn handle_event(
        &self,
        state: &mut State,
        accuracy: f64,
        y_weights: &[f64],
        constraint_tols: &[f64],
    ) -> Result<EventOutcome, SimError>;
}

/// An event that fires when a trigger function crosses zero.
pub trait TriggeredEventHandler {
    /// Stage at which the trigger value can be computed.
    fn required_stage(&self) -> Stage;

    /// Current trigger function value.
    fn value(&self, state: &State) -> Result<f64, SimError>;

    /// Crossing detection parameters.
    fn trigger_info(&self) -> EventTriggerInfo {
        EventTriggerInfo::default()
    }

    fn handle_event(
        &self,
        state: &mut State,
        accuracy: f64,
        y_weights: &[f64],
        constraint_tols: &[f64],
    ) -> Result<EventOutcome, SimError>;
}

/// A scheduled observer. Never modifies the state.
pub trait ScheduledEventReporter {
    fn next_event_time(&self, state: &State) -> Result<f64, SimError>;

    fn handle_event(&self, state: &State) -> Result<(), SimError>;
}

/// A triggered observer. Never modifies the state.
pub trait TriggeredEventReporter {
    fn required_stage(&self) -> Stage;

    fn value(&self, state: &State) -> Result<f64, SimError>;

    fn trigger_info(&self) -> EventTriggerInfo {
        EventTriggerInfo::default()
    }

    fn handle_event(&self, state: &State) -> Result<(), SimError>;
}
