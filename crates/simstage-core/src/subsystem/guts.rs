//! # Operation Table
//!
//! `SubsystemGuts` is the capability set a concrete subsystem variant
//! supplies. Every method except [`SubsystemGuts::clone_guts`] has a default,
//! so a variant overrides only the stages it computes something at.
//!
//! Methods receive the owning [`SubsystemBody`] so they can reach the
//! body's slot-scoped state forwarders and event minting without knowing
//! their slot index.

use crate::primitives::NEUTRAL_UNIT_WEIGHT;
use crate::subsystem::SubsystemBody;
use crate::{
    DecorativeGeometry, EventCause, EventId, EventOutcome, EventTriggerInfo, NextScheduledEvent,
    SimError, Stage, State,
};
use std::any::Any;
use std::fmt;

/// Downcasting support for operation tables.
///
/// Blanket-implemented for every `'static` type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The per-variant operation table.
pub trait SubsystemGuts: AsAny + fmt::Debug {
    /// Duplicate this variant's configuration. Never shares state bindings.
    fn clone_guts(&self) -> Box<dyn SubsystemGuts>;

    /// Teardown hook, run right before the body is released.
    fn destruct(&mut self) {}

    // =========================================================================
    // REALIZATION
    // =========================================================================

    fn realize_topology(&self, _body: &SubsystemBody, _state: &mut State) -> Result<(), SimError> {
        Ok(())
    }

    fn realize_model(&self, _body: &SubsystemBody, _state: &mut State) -> Result<(), SimError> {
        Ok(())
    }

    fn realize_instance(&self, _body: &SubsystemBody, _state: &State) -> Result<(), SimError> {
        Ok(())
    }

    fn realize_time(&self, _body: &SubsystemBody, _state: &State) -> Result<(), SimError> {
        Ok(())
    }

    fn realize_position(&self, _body: &SubsystemBody, _state: &State) -> Result<(), SimError> {
        Ok(())
    }

    fn realize_velocity(&self, _body: &SubsystemBody, _state: &State) -> Result<(), SimError> {
        Ok(())
    }

    fn realize_dynamics(&self, _body: &SubsystemBody, _state: &State) -> Result<(), SimError> {
        Ok(())
    }

    fn realize_acceleration(&self, _body: &SubsystemBody, _state: &State) -> Result<(), SimError> {
        Ok(())
    }

    fn realize_report(&self, _body: &SubsystemBody, _state: &State) -> Result<(), SimError> {
        Ok(())
    }

    // =========================================================================
    // WEIGHTS & TOLERANCES
    // =========================================================================

    fn calc_q_unit_weights(&self, body: &SubsystemBody, state: &State) -> Result<Vec<f64>, SimError> {
        Ok(neutral(body.nq(state)?))
    }

    fn calc_u_unit_weights(&self, body: &SubsystemBody, state: &State) -> Result<Vec<f64>, SimError> {
        Ok(neutral(body.nu(state)?))
    }

    fn calc_z_unit_weights(&self, body: &SubsystemBody, state: &State) -> Result<Vec<f64>, SimError> {
        Ok(neutral(body.nz(state)?))
    }

    fn calc_qerr_unit_tolerances(
        &self,
        body: &SubsystemBody,
        state: &State,
    ) -> Result<Vec<f64>, SimError> {
        Ok(neutral(body.nqerr(state)?))
    }

    fn calc_uerr_unit_tolerances(
        &self,
        body: &SubsystemBody,
        state: &State,
    ) -> Result<Vec<f64>, SimError> {
        Ok(neutral(body.nuerr(state)?))
    }

    // =========================================================================
    // GEOMETRY & EVENTS
    // =========================================================================

    fn calc_decorative_geometry_and_append(
        &self,
        _body: &SubsystemBody,
        _state: &State,
        _stage: Stage,
        _geometry: &mut Vec<DecorativeGeometry>,
    ) -> Result<(), SimError> {
        Ok(())
    }

    fn calc_event_trigger_info(
        &self,
        _body: &SubsystemBody,
        _state: &State,
    ) -> Result<Vec<EventTriggerInfo>, SimError> {
        Ok(Vec::new())
    }

    fn calc_time_of_next_scheduled_event(
        &self,
        _body: &SubsystemBody,
        _state: &State,
    ) -> Result<NextScheduledEvent, SimError> {
        Ok(NextScheduledEvent::none())
    }

    /// React to a batch of this subsystem's events.
    ///
    /// A variant that mints events must override this; the default reports
    /// the capability as missing.
    fn handle_events(
        &self,
        body: &SubsystemBody,
        _state: &mut State,
        _cause: EventCause,
        _event_ids: &[EventId],
        _accuracy: f64,
        _y_weights: &[f64],
        _constraint_tols: &[f64],
    ) -> Result<EventOutcome, SimError> {
        Err(SimError::Unimplemented {
            subsystem: body.label(),
            method: "handle_events",
        })
    }
}

fn neutral(len: usize) -> Vec<f64> {
    vec![NEUTRAL_UNIT_WEIGHT; len]
}
