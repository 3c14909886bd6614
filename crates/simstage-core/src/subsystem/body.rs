//! # Subsystem Body
//!
//! The common representation behind every subsystem handle: identity, the
//! system binding, the topology-realized flag, and the variant's operation
//! table. The staged realization state machine lives here.
//!
//! ## Realization Rules
//!
//! | Transition | Guard | Runs when |
//! |---|---|---|
//! | Empty → Topology | slot stage is exactly Empty | always |
//! | Topology → Model | topology realized, stage ≥ Topology | stage < Model |
//! | X-1 → X (Instance..Report) | stage ≥ X-1 | stage < X |
//!
//! Everything above Topology is idempotent; Topology is not, because it
//! makes the slot's permanent allocations.

use crate::events::registry;
use crate::subsystem::guts::SubsystemGuts;
use crate::system::SystemLink;
use crate::{
    DecorativeGeometry, EventCause, EventId, EventOutcome, EventTriggerInfo, NextScheduledEvent,
    SimError, Stage, State, SubsystemId,
};
use std::any::Any;
use std::cell::{Cell, Ref, RefMut};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

/// Where a body sits: the containing system and its slot.
#[derive(Debug, Clone)]
struct SystemBinding {
    link: Rc<SystemLink>,
    id: SubsystemId,
}

/// One subsystem's polymorphic behavior and its binding into a system slot.
///
/// A body is owned by exactly one [`crate::Subsystem`] handle. Cloning
/// produces an unbound body whose topology must be realized again.
pub struct SubsystemBody {
    name: String,
    version: String,
    binding: Option<SystemBinding>,
    /// Logically-const cache; set by topology realization, cleared by invalidation.
    topology_realized: Cell<bool>,
    guts: Box<dyn SubsystemGuts>,
}

impl fmt::Debug for SubsystemBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemBody")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("id", &self.binding.as_ref().map(|b| b.id))
            .field("topology_realized", &self.topology_realized.get())
            .field("guts", &self.guts)
            .finish()
    }
}

impl Clone for SubsystemBody {
    fn clone(&self) -> Self {
        Self::from_boxed(
            self.name.clone(),
            self.version.clone(),
            self.guts.clone_guts(),
        )
    }
}

impl Drop for SubsystemBody {
    fn drop(&mut self) {
        trace!(subsystem = %self.label(), "destructing subsystem body");
        self.guts.destruct();
    }
}

impl SubsystemBody {
    /// Create an unbound body around a variant's operation table.
    #[must_use]
    pub fn new<G: SubsystemGuts + 'static>(
        name: impl Into<String>,
        version: impl Into<String>,
        guts: G,
    ) -> Self {
        Self::from_boxed(name.into(), version.into(), Box::new(guts))
    }

    fn from_boxed(name: String, version: String, guts: Box<dyn SubsystemGuts>) -> Self {
        Self {
            name,
            version,
            binding: None,
            topology_realized: Cell::new(false),
            guts,
        }
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// Subsystem name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subsystem version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// `"name version"`, as used in diagnostics.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.name, self.version)
    }

    /// The variant's operation table.
    #[must_use]
    pub fn guts(&self) -> &dyn SubsystemGuts {
        self.guts.as_ref()
    }

    /// Downcast the operation table to its concrete variant.
    #[must_use]
    pub fn guts_as<T: Any>(&self) -> Option<&T> {
        self.guts.as_ref().as_any().downcast_ref::<T>()
    }

    /// Mutably downcast the operation table to its concrete variant.
    pub fn guts_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.guts.as_mut().as_any_mut().downcast_mut::<T>()
    }

    // =========================================================================
    // SYSTEM BINDING
    // =========================================================================

    /// Record the containing system and slot.
    ///
    /// Binding again to the same system and slot is a no-op.
    pub(crate) fn bind_to_system(
        &mut self,
        link: Rc<SystemLink>,
        id: SubsystemId,
    ) -> Result<(), SimError> {
        if let Some(existing) = &self.binding {
            if Rc::ptr_eq(&existing.link, &link) && existing.id == id {
                return Ok(());
            }
            return Err(SimError::AlreadyInSystem {
                subsystem: self.label(),
                existing: existing.id,
                requested: id,
            });
        }
        self.attach(link, id);
        Ok(())
    }

    /// Bind a body known to be fresh.
    pub(crate) fn attach(&mut self, link: Rc<SystemLink>, id: SubsystemId) {
        self.binding = Some(SystemBinding { link, id });
    }

    /// True once the body has been adopted by a system.
    #[must_use]
    pub fn is_in_system(&self) -> bool {
        self.binding.is_some()
    }

    /// True if both bodies are bound into the same system.
    #[must_use]
    pub fn is_in_same_system(&self, other: &SubsystemBody) -> bool {
        match (&self.binding, &other.binding) {
            (Some(a), Some(b)) => Rc::ptr_eq(&a.link, &b.link),
            _ => false,
        }
    }

    fn binding(&self, operation: &'static str) -> Result<&SystemBinding, SimError> {
        self.binding.as_ref().ok_or_else(|| SimError::NotInSystem {
            subsystem: self.label(),
            operation,
        })
    }

    /// Slot assigned by the containing system.
    pub fn subsystem_id(&self) -> Result<SubsystemId, SimError> {
        Ok(self.binding("SubsystemBody::subsystem_id")?.id)
    }

    pub(crate) fn system_link(&self, operation: &'static str) -> Result<&Rc<SystemLink>, SimError> {
        Ok(&self.binding(operation)?.link)
    }

    // =========================================================================
    // TOPOLOGY CACHE
    // =========================================================================

    /// True if topology realization has run since the last invalidation.
    #[must_use]
    pub fn topology_has_been_realized(&self) -> bool {
        self.topology_realized.get()
    }

    /// Mark the topology unrealized, and the containing system's with it.
    ///
    /// States are not touched here; a realized slot is reset the next time
    /// topology is realized into it.
    pub fn invalidate_topology_cache(&self) {
        self.topology_realized.set(false);
        if let Some(binding) = &self.binding {
            binding.link.invalidate_topology();
        }
        info!(subsystem = %self.label(), "subsystem topology cache invalidated");
    }

    // =========================================================================
    // REALIZATION
    // =========================================================================

    /// Empty → Topology. Fails unless the slot is exactly Empty.
    pub fn realize_topology(&self, state: &mut State) -> Result<(), SimError> {
        const OPERATION: &str = "SubsystemBody::realize_topology";
        let id = self.binding(OPERATION)?.id;

        if !self.topology_realized.get()
            && self.scoped(OPERATION, state.subsystem_stage(id))? != Stage::Empty
        {
            warn!(
                subsystem = %self.label(),
                "slot realized against an invalidated topology; resetting"
            );
            self.scoped(OPERATION, state.reset_subsystem(id))?;
        }

        let actual = self.scoped(OPERATION, state.subsystem_stage(id))?;
        if actual != Stage::Empty {
            return Err(SimError::StageMismatch {
                subsystem: self.label(),
                operation: OPERATION,
                expected: Stage::Empty,
                actual,
            });
        }

        self.guts.realize_topology(self, state)?;
        self.topology_realized.set(true);
        self.scoped(OPERATION, state.advance_subsystem_to_stage(id, Stage::Topology))?;
        debug!(subsystem = %self.label(), stage = %Stage::Topology, "realized");
        Ok(())
    }

    /// Topology → Model. No-op if the slot is already at Model or above.
    pub fn realize_model(&self, state: &mut State) -> Result<(), SimError> {
        const OPERATION: &str = "SubsystemBody::realize_model";
        let id = self.binding(OPERATION)?.id;

        if !self.topology_realized.get() {
            return Err(SimError::TopologyNotRealized {
                subsystem: self.label(),
                operation: OPERATION,
            });
        }
        let actual = self.scoped(OPERATION, state.subsystem_stage(id))?;
        if actual < Stage::Topology {
            return Err(SimError::StageTooLow {
                subsystem: self.label(),
                operation: OPERATION,
                required: Stage::Topology,
                actual,
            });
        }

        if actual < Stage::Model {
            self.guts.realize_model(self, state)?;
            self.scoped(OPERATION, state.advance_subsystem_to_stage(id, Stage::Model))?;
            debug!(subsystem = %self.label(), stage = %Stage::Model, "realized");
        }
        Ok(())
    }

    /// Realize one of Instance..Report through a read-only state.
    ///
    /// Requires the slot to be at least at `stage`'s predecessor; no-op if it
    /// is already at `stage` or above.
    pub fn realize_stage(&self, state: &State, stage: Stage) -> Result<(), SimError> {
        if stage < Stage::LOWEST_RUNTIME {
            return Err(SimError::WritableStageRequired {
                subsystem: self.label(),
                stage,
            });
        }
        let operation = realize_operation(stage);
        let id = self.binding(operation)?.id;

        let required = stage.previous_or_empty();
        let actual = self.scoped(operation, state.subsystem_stage(id))?;
        if actual < required {
            return Err(SimError::StageTooLow {
                subsystem: self.label(),
                operation,
                required,
                actual,
            });
        }

        if actual < stage {
            self.run_stage(state, stage)?;
            self.scoped(operation, state.advance_subsystem_to_stage(id, stage))?;
            trace!(subsystem = %self.label(), stage = %stage, "realized");
        }
        Ok(())
    }

    fn run_stage(&self, state: &State, stage: Stage) -> Result<(), SimError> {
        let guts = self.guts.as_ref();
        match stage {
            Stage::Instance => guts.realize_instance(self, state),
            Stage::Time => guts.realize_time(self, state),
            Stage::Position => guts.realize_position(self, state),
            Stage::Velocity => guts.realize_velocity(self, state),
            Stage::Dynamics => guts.realize_dynamics(self, state),
            Stage::Acceleration => guts.realize_acceleration(self, state),
            Stage::Report => guts.realize_report(self, state),
            Stage::Empty | Stage::Topology | Stage::Model => Err(SimError::WritableStageRequired {
                subsystem: self.label(),
                stage,
            }),
        }
    }

    pub fn realize_instance(&self, state: &State) -> Result<(), SimError> {
        self.realize_stage(state, Stage::Instance)
    }

    pub fn realize_time(&self, state: &State) -> Result<(), SimError> {
        self.realize_stage(state, Stage::Time)
    }

    pub fn realize_position(&self, state: &State) -> Result<(), SimError> {
        self.realize_stage(state, Stage::Position)
    }

    pub fn realize_velocity(&self, state: &State) -> Result<(), SimError> {
        self.realize_stage(state, Stage::Velocity)
    }

    pub fn realize_dynamics(&self, state: &State) -> Result<(), SimError> {
        self.realize_stage(state, Stage::Dynamics)
    }

    pub fn realize_acceleration(&self, state: &State) -> Result<(), SimError> {
        self.realize_stage(state, Stage::Acceleration)
    }

    pub fn realize_report(&self, state: &State) -> Result<(), SimError> {
        self.realize_stage(state, Stage::Report)
    }

    // =========================================================================
    // OPERATION TABLE FORWARDERS
    // =========================================================================

    pub fn calc_q_unit_weights(&self, state: &State) -> Result<Vec<f64>, SimError> {
        self.guts.calc_q_unit_weights(self, state)
    }

    pub fn calc_u_unit_weights(&self, state: &State) -> Result<Vec<f64>, SimError> {
        self.guts.calc_u_unit_weights(self, state)
    }

    pub fn calc_z_unit_weights(&self, state: &State) -> Result<Vec<f64>, SimError> {
        self.guts.calc_z_unit_weights(self, state)
    }

    pub fn calc_qerr_unit_tolerances(&self, state: &State) -> Result<Vec<f64>, SimError> {
        self.guts.calc_qerr_unit_tolerances(self, state)
    }

    pub fn calc_uerr_unit_tolerances(&self, state: &State) -> Result<Vec<f64>, SimError> {
        self.guts.calc_uerr_unit_tolerances(self, state)
    }

    pub fn calc_decorative_geometry_and_append(
        &self,
        state: &State,
        stage: Stage,
        geometry: &mut Vec<DecorativeGeometry>,
    ) -> Result<(), SimError> {
        self.guts
            .calc_decorative_geometry_and_append(self, state, stage, geometry)
    }

    pub fn calc_event_trigger_info(&self, state: &State) -> Result<Vec<EventTriggerInfo>, SimError> {
        self.guts.calc_event_trigger_info(self, state)
    }

    pub fn calc_time_of_next_scheduled_event(
        &self,
        state: &State,
    ) -> Result<NextScheduledEvent, SimError> {
        self.guts.calc_time_of_next_scheduled_event(self, state)
    }

    pub fn handle_events(
        &self,
        state: &mut State,
        cause: EventCause,
        event_ids: &[EventId],
        accuracy: f64,
        y_weights: &[f64],
        constraint_tols: &[f64],
    ) -> Result<EventOutcome, SimError> {
        trace!(subsystem = %self.label(), ?cause, count = event_ids.len(), "handling events");
        self.guts.handle_events(
            self,
            state,
            cause,
            event_ids,
            accuracy,
            y_weights,
            constraint_tols,
        )
    }

    // =========================================================================
    // EVENT MINTING
    // =========================================================================

    /// Mint a scheduled event owned by this subsystem. Call during Model realization.
    pub fn create_scheduled_event(&self, state: &State) -> Result<EventId, SimError> {
        let binding = self.binding("SubsystemBody::create_scheduled_event")?;
        registry::create_event_id(&binding.link, binding.id, state)
    }

    /// Mint a triggered event owned by this subsystem and allocate its
    /// trigger value slot at `stage`. Returns the id and the slot index.
    pub fn create_triggered_event(
        &self,
        state: &mut State,
        stage: Stage,
    ) -> Result<(EventId, usize), SimError> {
        let binding = self.binding("SubsystemBody::create_triggered_event")?;
        let event_id = registry::create_event_id(&binding.link, binding.id, state)?;
        let index = self.scoped(
            "SubsystemBody::create_triggered_event",
            state.allocate_event(binding.id, stage, 1),
        )?;
        Ok((event_id, index))
    }

    // =========================================================================
    // STATE FORWARDERS (scoped to this body's slot)
    // =========================================================================

    fn slot(&self, operation: &'static str) -> Result<SubsystemId, SimError> {
        Ok(self.binding(operation)?.id)
    }

    /// Attach this subsystem's label and `operation` to a slot-level error.
    pub(crate) fn scoped<T>(
        &self,
        operation: &'static str,
        result: Result<T, SimError>,
    ) -> Result<T, SimError> {
        result.map_err(|source| SimError::InSubsystem {
            subsystem: self.label(),
            operation,
            source: Box::new(source),
        })
    }

    pub fn stage(&self, state: &State) -> Result<Stage, SimError> {
        const OPERATION: &str = "SubsystemBody::stage";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.subsystem_stage(id))
    }

    pub fn allocate_q(&self, state: &mut State, init: &[f64]) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_q";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_q(id, init))
    }

    pub fn allocate_u(&self, state: &mut State, init: &[f64]) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_u";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_u(id, init))
    }

    pub fn allocate_z(&self, state: &mut State, init: &[f64]) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_z";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_z(id, init))
    }

    pub fn allocate_qerr(&self, state: &mut State, count: usize) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_qerr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_qerr(id, count))
    }

    pub fn allocate_uerr(&self, state: &mut State, count: usize) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_uerr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_uerr(id, count))
    }

    /// Multipliers are allocated alongside.
    pub fn allocate_udoterr(&self, state: &mut State, count: usize) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_udoterr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_udoterr(id, count))
    }

    pub fn allocate_discrete_variable(
        &self,
        state: &mut State,
        stage: Stage,
        value: Box<dyn Any>,
    ) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_discrete_variable";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_discrete_variable(id, stage, value))
    }

    pub fn allocate_cache_entry(
        &self,
        state: &mut State,
        stage: Stage,
        value: Box<dyn Any>,
    ) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_cache_entry";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_cache_entry(id, stage, value))
    }

    /// Allocate `count` trigger values evaluated at `stage`.
    pub fn allocate_event(
        &self,
        state: &mut State,
        stage: Stage,
        count: usize,
    ) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::allocate_event";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.allocate_event(id, stage, count))
    }

    pub fn events_by_stage<'s>(
        &self,
        state: &'s State,
        stage: Stage,
    ) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::events_by_stage";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.events_by_stage(id, stage))
    }

    pub fn upd_events_by_stage<'s>(
        &self,
        state: &'s State,
        stage: Stage,
    ) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_events_by_stage";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_events_by_stage(id, stage))
    }

    pub fn q<'s>(&self, state: &'s State) -> Result<&'s [f64], SimError> {
        const OPERATION: &str = "SubsystemBody::q";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.q(id))
    }

    pub fn u<'s>(&self, state: &'s State) -> Result<&'s [f64], SimError> {
        const OPERATION: &str = "SubsystemBody::u";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.u(id))
    }

    pub fn z<'s>(&self, state: &'s State) -> Result<&'s [f64], SimError> {
        const OPERATION: &str = "SubsystemBody::z";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.z(id))
    }

    pub fn upd_q<'s>(&self, state: &'s mut State) -> Result<&'s mut [f64], SimError> {
        const OPERATION: &str = "SubsystemBody::upd_q";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_q(id))
    }

    pub fn upd_u<'s>(&self, state: &'s mut State) -> Result<&'s mut [f64], SimError> {
        const OPERATION: &str = "SubsystemBody::upd_u";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_u(id))
    }

    pub fn upd_z<'s>(&self, state: &'s mut State) -> Result<&'s mut [f64], SimError> {
        const OPERATION: &str = "SubsystemBody::upd_z";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_z(id))
    }

    pub fn qdot<'s>(&self, state: &'s State) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::qdot";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.qdot(id))
    }

    pub fn udot<'s>(&self, state: &'s State) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::udot";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.udot(id))
    }

    pub fn zdot<'s>(&self, state: &'s State) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::zdot";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.zdot(id))
    }

    pub fn qdotdot<'s>(&self, state: &'s State) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::qdotdot";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.qdotdot(id))
    }

    pub fn qerr<'s>(&self, state: &'s State) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::qerr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.qerr(id))
    }

    pub fn uerr<'s>(&self, state: &'s State) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::uerr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.uerr(id))
    }

    pub fn udoterr<'s>(&self, state: &'s State) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::udoterr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.udoterr(id))
    }

    pub fn multipliers<'s>(&self, state: &'s State) -> Result<Ref<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::multipliers";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.multipliers(id))
    }

    pub fn upd_qdot<'s>(&self, state: &'s State) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_qdot";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_qdot(id))
    }

    pub fn upd_udot<'s>(&self, state: &'s State) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_udot";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_udot(id))
    }

    pub fn upd_zdot<'s>(&self, state: &'s State) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_zdot";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_zdot(id))
    }

    pub fn upd_qdotdot<'s>(&self, state: &'s State) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_qdotdot";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_qdotdot(id))
    }

    pub fn upd_qerr<'s>(&self, state: &'s State) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_qerr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_qerr(id))
    }

    pub fn upd_uerr<'s>(&self, state: &'s State) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_uerr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_uerr(id))
    }

    pub fn upd_udoterr<'s>(&self, state: &'s State) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_udoterr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_udoterr(id))
    }

    pub fn upd_multipliers<'s>(&self, state: &'s State) -> Result<RefMut<'s, [f64]>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_multipliers";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_multipliers(id))
    }

    pub fn discrete_variable<'s, T: Any>(
        &self,
        state: &'s State,
        index: usize,
    ) -> Result<&'s T, SimError> {
        const OPERATION: &str = "SubsystemBody::discrete_variable";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.discrete_variable(id, index))
    }

    pub fn upd_discrete_variable<'s, T: Any>(
        &self,
        state: &'s mut State,
        index: usize,
    ) -> Result<&'s mut T, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_discrete_variable";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_discrete_variable(id, index))
    }

    pub fn cache_entry<'s, T: Any>(
        &self,
        state: &'s State,
        index: usize,
    ) -> Result<Ref<'s, T>, SimError> {
        const OPERATION: &str = "SubsystemBody::cache_entry";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.cache_entry(id, index))
    }

    pub fn upd_cache_entry<'s, T: Any>(
        &self,
        state: &'s State,
        index: usize,
    ) -> Result<RefMut<'s, T>, SimError> {
        const OPERATION: &str = "SubsystemBody::upd_cache_entry";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.upd_cache_entry(id, index))
    }

    pub fn nq(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::nq";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.nq(id))
    }

    pub fn nu(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::nu";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.nu(id))
    }

    pub fn nz(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::nz";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.nz(id))
    }

    pub fn nqerr(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::nqerr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.nqerr(id))
    }

    pub fn nuerr(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::nuerr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.nuerr(id))
    }

    pub fn nudoterr(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::nudoterr";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.nudoterr(id))
    }

    pub fn nmultipliers(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::nmultipliers";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.nmultipliers(id))
    }

    pub fn q_start(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::q_start";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.q_start(id))
    }

    pub fn u_start(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::u_start";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.u_start(id))
    }

    pub fn z_start(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::z_start";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.z_start(id))
    }

    pub fn qerr_start(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::qerr_start";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.qerr_start(id))
    }

    pub fn uerr_start(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::uerr_start";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.uerr_start(id))
    }

    pub fn udoterr_start(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::udoterr_start";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.udoterr_start(id))
    }

    pub fn multipliers_start(&self, state: &State) -> Result<usize, SimError> {
        const OPERATION: &str = "SubsystemBody::multipliers_start";
        let id = self.slot(OPERATION)?;
        self.scoped(OPERATION, state.multipliers_start(id))
    }
}

fn realize_operation(stage: Stage) -> &'static str {
    match stage {
        Stage::Empty | Stage::Topology => "SubsystemBody::realize_topology",
        Stage::Model => "SubsystemBody::realize_model",
        Stage::Instance => "SubsystemBody::realize_instance",
        Stage::Time => "SubsystemBody::realize_time",
        Stage::Position => "SubsystemBody::realize_position",
        Stage::Velocity => "SubsystemBody::realize_velocity",
        Stage::Dynamics => "SubsystemBody::realize_dynamics",
        Stage::Acceleration => "SubsystemBody::realize_acceleration",
        Stage::Report => "SubsystemBody::realize_report",
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{Subsystem, System};

    /// One coordinate; optionally reads a cache entry it never allocated.
    #[derive(Debug, Clone)]
    struct Gauge {
        read_missing_cache: bool,
    }

    impl SubsystemGuts for Gauge {
        fn clone_guts(&self) -> Box<dyn SubsystemGuts> {
            Box::new(self.clone())
        }

        fn realize_topology(&self, body: &SubsystemBody, state: &mut State) -> Result<(), SimError> {
            body.allocate_q(state, &[0.5])?;
            Ok(())
        }

        fn realize_position(&self, body: &SubsystemBody, state: &State) -> Result<(), SimError> {
            if self.read_missing_cache {
                body.cache_entry::<f64>(state, 7)?;
            }
            Ok(())
        }
    }

    fn system_with(read_missing_cache: bool) -> (System, SubsystemId) {
        let mut system = System::new("sys", "1");
        let id = system
            .adopt_subsystem(Subsystem::from_guts(
                "late",
                "9.9",
                Gauge { read_missing_cache },
            ))
            .unwrap();
        (system, id)
    }

    #[test]
    fn unbound_body_reports_not_in_system() {
        let body = SubsystemBody::new("late", "9.9", Gauge { read_missing_cache: false });
        let mut state = State::with_subsystems(1);
        assert!(matches!(
            body.realize_topology(&mut state),
            Err(SimError::NotInSystem { .. })
        ));
        assert!(matches!(
            body.subsystem_id(),
            Err(SimError::NotInSystem { .. })
        ));
    }

    #[test]
    fn late_allocation_names_subsystem_and_operation() {
        let (system, id) = system_with(false);
        let mut state = system.realize_topology().unwrap();
        system.realize(&mut state, Stage::Time).unwrap();

        let body = system.subsystem(id).unwrap().body().unwrap();
        let err = body.allocate_q(&mut state, &[1.0]).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("late 9.9"), "{text}");
        assert!(text.contains("SubsystemBody::allocate_q"), "{text}");
        assert!(matches!(
            err.root_cause(),
            SimError::AllocationTooLate { stage: Stage::Time, .. }
        ));
    }

    #[test]
    fn failed_cache_read_during_realize_names_subsystem() {
        let (system, _) = system_with(true);
        let mut state = system.realize_topology().unwrap();
        let err = system.realize(&mut state, Stage::Position).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("late 9.9"), "{text}");
        assert!(text.contains("SubsystemBody::cache_entry"), "{text}");
        assert!(matches!(
            err.root_cause(),
            SimError::IndexOutOfRange { index: 7, .. }
        ));
    }

    #[test]
    fn invalidated_topology_resets_slot_before_realizing() {
        let (system, id) = system_with(false);
        let mut state = system.realize_topology().unwrap();
        system.realize(&mut state, Stage::Velocity).unwrap();

        let body = system.subsystem(id).unwrap().body().unwrap();
        body.invalidate_topology_cache();
        assert!(!body.topology_has_been_realized());

        body.realize_topology(&mut state).unwrap();
        assert!(body.topology_has_been_realized());
        assert_eq!(body.stage(&state).unwrap(), Stage::Topology);
        assert_eq!(body.nq(&state).unwrap(), 1);
    }

    #[test]
    fn realized_topology_is_not_repeated() {
        let (system, id) = system_with(false);
        let mut state = system.realize_topology().unwrap();
        let body = system.subsystem(id).unwrap().body().unwrap();
        assert!(matches!(
            body.realize_topology(&mut state),
            Err(SimError::StageMismatch {
                expected: Stage::Empty,
                actual: Stage::Topology,
                ..
            })
        ));
    }

    #[test]
    fn writable_stages_rejected_through_shared_state() {
        let (system, id) = system_with(false);
        let state = system.realize_topology().unwrap();
        let body = system.subsystem(id).unwrap().body().unwrap();
        for stage in [Stage::Empty, Stage::Topology, Stage::Model] {
            assert!(matches!(
                body.realize_stage(&state, stage),
                Err(SimError::WritableStageRequired { .. })
            ));
        }
    }

    #[test]
    fn skipped_stage_is_too_low() {
        let (system, id) = system_with(false);
        let mut state = system.realize_topology().unwrap();
        system.realize_model(&mut state).unwrap();
        let body = system.subsystem(id).unwrap().body().unwrap();
        assert!(matches!(
            body.realize_time(&state),
            Err(SimError::StageTooLow {
                required: Stage::Instance,
                actual: Stage::Model,
                ..
            })
        ));
        body.realize_instance(&state).unwrap();
        body.realize_instance(&state).unwrap();
        body.realize_time(&state).unwrap();
        assert_eq!(body.stage(&state).unwrap(), Stage::Time);
    }
}
