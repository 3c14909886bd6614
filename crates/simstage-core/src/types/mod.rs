//! # Core Type Definitions
//!
//! This module contains the value types shared by every part of the CORE:
//! - Slot and event identifiers (`SubsystemId`, `EventId`)
//! - Event metadata (`EventCause`, `EventTriggerInfo`, `EventOutcome`, `NextScheduledEvent`)
//! - The decorative geometry record appended by visualization hooks
//! - Error types (`SimError`)

use crate::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Slot index of a subsystem in its containing system and in every state
/// realized from that system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubsystemId(pub usize);

impl SubsystemId {
    /// Get the raw slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subsystem#{}", self.0)
    }
}

/// Event identifier minted by the event registry.
///
/// Unique within one state instance since its last topology realization.
/// Ids from different states are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl EventId {
    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event#{}", self.0)
    }
}

// =============================================================================
// EVENT METADATA
// =============================================================================

/// What produced a batch of firing event ids.
///
/// A batch is homogeneous: the caller never mixes causes in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCause {
    /// The events' scheduled time was reached.
    Scheduled,
    /// The events' trigger functions crossed zero.
    Triggered,
}

/// How a triggered event wants its zero crossing detected.
///
/// `event_id` is stamped by the registry; handlers leave it `None`.
/// A `None` localization window is replaced by the configured default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTriggerInfo {
    /// Event this info describes.
    pub event_id: Option<EventId>,
    /// Fire on a negative-to-positive transition.
    pub trigger_on_rising: bool,
    /// Fire on a positive-to-negative transition.
    pub trigger_on_falling: bool,
    /// Width of the time window the crossing must be localized to.
    pub localization_window: Option<f64>,
}

impl Default for EventTriggerInfo {
    fn default() -> Self {
        Self {
            event_id: None,
            trigger_on_rising: true,
            trigger_on_falling: true,
            localization_window: None,
        }
    }
}

impl EventTriggerInfo {
    /// Trigger on both transitions with the default window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger on rising transitions only.
    #[must_use]
    pub fn rising() -> Self {
        Self {
            trigger_on_falling: false,
            ..Self::default()
        }
    }

    /// Trigger on falling transitions only.
    #[must_use]
    pub fn falling() -> Self {
        Self {
            trigger_on_rising: false,
            ..Self::default()
        }
    }

    /// Set the localization window.
    #[must_use]
    pub fn with_localization_window(mut self, window: f64) -> Self {
        self.localization_window = Some(window);
        self
    }

    /// Stamp the event id.
    pub fn set_event_id(&mut self, id: EventId) {
        self.event_id = Some(id);
    }

    /// Check whether the trigger value moving from `before` to `after`
    /// is a transition this event fires on.
    ///
    /// Zero counts as a sign of its own: `-1 -> 0` is rising, `0 -> -1` is falling,
    /// `0 -> 0` is nothing.
    #[must_use]
    pub fn should_trigger(&self, before: f64, after: f64) -> bool {
        let rising = (before < 0.0 && after >= 0.0) || (before == 0.0 && after > 0.0);
        let falling = (before > 0.0 && after <= 0.0) || (before == 0.0 && after < 0.0);
        (rising && self.trigger_on_rising) || (falling && self.trigger_on_falling)
    }
}

/// Effects of handling one or more events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    /// Lowest stage whose realized results were invalidated.
    /// `Stage::HIGHEST` means nothing was touched.
    pub lowest_modified: Stage,
    /// Cooperative request for the driving loop to stop stepping.
    pub should_terminate: bool,
}

impl Default for EventOutcome {
    fn default() -> Self {
        Self::unchanged()
    }
}

impl EventOutcome {
    /// Nothing modified, no termination request.
    #[must_use]
    pub const fn unchanged() -> Self {
        Self {
            lowest_modified: Stage::HIGHEST,
            should_terminate: false,
        }
    }

    /// Modified everything at or above `stage`.
    #[must_use]
    pub const fn modified(stage: Stage) -> Self {
        Self {
            lowest_modified: stage,
            should_terminate: false,
        }
    }

    /// Request termination, nothing modified.
    #[must_use]
    pub const fn terminate() -> Self {
        Self {
            lowest_modified: Stage::HIGHEST,
            should_terminate: true,
        }
    }

    /// Fold another handler's outcome into this one: lesser stage wins,
    /// termination requests are OR-ed.
    pub fn merge(&mut self, other: EventOutcome) {
        self.lowest_modified = self.lowest_modified.min(other.lowest_modified);
        self.should_terminate |= other.should_terminate;
    }
}

/// Earliest upcoming scheduled time and every event tied at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextScheduledEvent {
    /// `f64::INFINITY` when nothing is scheduled.
    pub time: f64,
    /// Events due at `time`, in discovery order.
    pub event_ids: Vec<EventId>,
}

impl Default for NextScheduledEvent {
    fn default() -> Self {
        Self::none()
    }
}

impl NextScheduledEvent {
    /// Nothing scheduled.
    #[must_use]
    pub fn none() -> Self {
        Self {
            time: f64::INFINITY,
            event_ids: Vec::new(),
        }
    }

    /// True if nothing is scheduled.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.time == f64::INFINITY && self.event_ids.is_empty()
    }

    /// Offer `id` due at `time`, skipping anything earlier than `now`.
    ///
    /// Ties (`time == self.time`) accumulate; a strictly earlier time
    /// restarts the set.
    pub fn offer(&mut self, time: f64, now: f64, id: EventId) {
        if time <= self.time && time >= now {
            if time < self.time {
                self.event_ids.clear();
            }
            self.time = time;
            self.event_ids.push(id);
        }
    }

    /// Fold another subsystem's answer into this one with the same tie rule.
    pub fn merge(&mut self, other: NextScheduledEvent) {
        if other.time < self.time {
            *self = other;
        } else if other.time == self.time {
            self.event_ids.extend(other.event_ids);
        }
    }
}

// =============================================================================
// DECORATIVE GEOMETRY
// =============================================================================

/// An opaque visualization record appended by geometry hooks.
///
/// Generating geometry is out of scope; subsystems only append records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecorativeGeometry {
    /// What the record depicts.
    pub label: String,
    /// Stage the record was computed at.
    pub stage: Stage,
}

impl DecorativeGeometry {
    /// Create a new geometry record.
    #[must_use]
    pub fn new(label: impl Into<String>, stage: Stage) -> Self {
        Self {
            label: label.into(),
            stage,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the CORE.
///
/// Everything except [`SimError::Unimplemented`] is a precondition violation:
/// a programming error in the caller, never a condition to retry. Diagnostics
/// name the subsystem as `"name version"` and the offending operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// A stage check that requires an exact stage failed.
    #[error("{subsystem}: {operation}: stage is {actual}, expected exactly {expected}")]
    StageMismatch {
        subsystem: String,
        operation: &'static str,
        expected: Stage,
        actual: Stage,
    },

    /// A stage check that requires a minimum stage failed.
    #[error("{subsystem}: {operation}: stage is {actual}, required at least {required}")]
    StageTooLow {
        subsystem: String,
        operation: &'static str,
        required: Stage,
        actual: Stage,
    },

    /// Model or later realization attempted while the topology is not realized.
    #[error("{subsystem}: {operation}: topology has not been realized")]
    TopologyNotRealized {
        subsystem: String,
        operation: &'static str,
    },

    /// The body is not bound to a system slot yet.
    #[error("{subsystem}: {operation}: subsystem is not in a system")]
    NotInSystem {
        subsystem: String,
        operation: &'static str,
    },

    /// The body is already bound to a different system or slot.
    #[error("{subsystem}: already bound to {existing}, cannot rebind to {requested}")]
    AlreadyInSystem {
        subsystem: String,
        existing: SubsystemId,
        requested: SubsystemId,
    },

    /// The handle owns no body.
    #[error("{operation}: subsystem handle is empty")]
    EmptyHandle { operation: &'static str },

    /// The handle already owns a body.
    #[error("{operation}: subsystem handle is already in use")]
    HandleInUse { operation: &'static str },

    /// No such slot in the system or state.
    #[error("unknown {0}")]
    UnknownSubsystem(SubsystemId),

    /// A per-slot index (discrete variable, cache entry, trigger slot) is out of range.
    #[error("{subsystem}: {what} index {index} out of range")]
    IndexOutOfRange {
        subsystem: SubsystemId,
        what: &'static str,
        index: usize,
    },

    /// A boxed discrete variable or cache entry holds a different type.
    #[error("{subsystem}: {what} {index} does not hold the requested type")]
    TypeMismatch {
        subsystem: SubsystemId,
        what: &'static str,
        index: usize,
    },

    /// Permanent state resources can only be allocated below Model stage.
    #[error("{subsystem}: cannot allocate {what} once the slot is at {stage}")]
    AllocationTooLate {
        subsystem: SubsystemId,
        what: &'static str,
        stage: Stage,
    },

    /// The event id was never minted in this state.
    #[error("{0} was not minted in this state")]
    UnknownEvent(EventId),

    /// The state was realized for an older topology of the system.
    #[error("state was built for topology version {state}, system is at {system}")]
    StaleState { state: u64, system: u64 },

    /// Empty, Topology and Model can only be realized through a writable state.
    #[error("{subsystem}: stage {stage} requires a writable state")]
    WritableStageRequired { subsystem: String, stage: Stage },

    /// A state access made on behalf of a subsystem failed.
    ///
    /// Wraps the slot-level error raised by [`crate::State`] with the
    /// subsystem's label and the operation that issued the access.
    #[error("{subsystem}: {operation}: {source}")]
    InSubsystem {
        subsystem: String,
        operation: &'static str,
        #[source]
        source: Box<SimError>,
    },

    /// A capability the subsystem claims was not supplied.
    #[error("{subsystem}: {method} is not implemented")]
    Unimplemented {
        subsystem: String,
        method: &'static str,
    },
}

impl SimError {
    /// True for programming errors (every kind except `Unimplemented`).
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        match self {
            SimError::Unimplemented { .. } => false,
            SimError::InSubsystem { source, .. } => source.is_precondition(),
            _ => true,
        }
    }

    /// The slot-level error under any subsystem context.
    #[must_use]
    pub fn root_cause(&self) -> &SimError {
        match self {
            SimError::InSubsystem { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_merge_takes_lesser_stage() {
        let mut outcome = EventOutcome::modified(Stage::Dynamics);
        outcome.merge(EventOutcome::modified(Stage::Velocity));
        assert_eq!(outcome.lowest_modified, Stage::Velocity);
        assert!(!outcome.should_terminate);

        outcome.merge(EventOutcome::terminate());
        assert_eq!(outcome.lowest_modified, Stage::Velocity);
        assert!(outcome.should_terminate);
    }

    #[test]
    fn next_event_offer_accumulates_ties() {
        let mut next = NextScheduledEvent::none();
        next.offer(5.0, 0.0, EventId(0));
        next.offer(7.0, 0.0, EventId(1));
        next.offer(5.0, 0.0, EventId(2));
        assert_eq!(next.time, 5.0);
        assert_eq!(next.event_ids, vec![EventId(0), EventId(2)]);

        next.offer(3.0, 0.0, EventId(3));
        assert_eq!(next.event_ids, vec![EventId(3)]);
    }

    #[test]
    fn next_event_offer_skips_past_times() {
        let mut next = NextScheduledEvent::none();
        next.offer(1.0, 2.0, EventId(0));
        assert!(next.is_none());
        next.offer(2.0, 2.0, EventId(1));
        assert_eq!(next.time, 2.0);
    }

    #[test]
    fn next_event_merge() {
        let mut a = NextScheduledEvent {
            time: 4.0,
            event_ids: vec![EventId(1)],
        };
        a.merge(NextScheduledEvent {
            time: 4.0,
            event_ids: vec![EventId(7)],
        });
        assert_eq!(a.event_ids, vec![EventId(1), EventId(7)]);
        a.merge(NextScheduledEvent::none());
        assert_eq!(a.time, 4.0);
    }

    #[test]
    fn trigger_directions() {
        let both = EventTriggerInfo::new();
        assert!(both.should_trigger(-1.0, 1.0));
        assert!(both.should_trigger(1.0, -1.0));
        assert!(!both.should_trigger(1.0, 2.0));
        assert!(!both.should_trigger(0.0, 0.0));

        let rising = EventTriggerInfo::rising();
        assert!(rising.should_trigger(-1.0, 0.0));
        assert!(!rising.should_trigger(1.0, -1.0));

        let falling = EventTriggerInfo::falling();
        assert!(falling.should_trigger(0.0, -0.5));
        assert!(!falling.should_trigger(-1.0, 1.0));
    }

    #[test]
    fn subsystem_context_names_label_and_operation() {
        let err = SimError::InSubsystem {
            subsystem: "pendulum 2.1".into(),
            operation: "SubsystemBody::allocate_q",
            source: Box::new(SimError::UnknownEvent(EventId(4))),
        };
        assert_eq!(
            err.to_string(),
            "pendulum 2.1: SubsystemBody::allocate_q: event#4 was not minted in this state"
        );
        assert_eq!(err.root_cause(), &SimError::UnknownEvent(EventId(4)));
        assert!(err.is_precondition());
    }

    #[test]
    fn unimplemented_is_not_a_precondition() {
        let err = SimError::Unimplemented {
            subsystem: "x 1".into(),
            method: "handle_events",
        };
        assert!(!err.is_precondition());
        assert!(SimError::EmptyHandle { operation: "name" }.is_precondition());
    }
}
