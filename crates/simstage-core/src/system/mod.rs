//! # System Module
//!
//! The stage ladder and the container that drives realization across every
//! subsystem it adopted.
//!
//! A [`System`] always owns the event registry in slot 0. Subsystems adopted
//! later get increasing slots, and every state realized from the system has
//! exactly one slot per subsystem.
//!
//! The system's topology cache is shared with its subsystem bodies through a
//! shared link, so invalidating any body's topology invalidates the
//! system's as well.

mod stage;

pub use stage::*;

use crate::config::SystemConfig;
use crate::events::{DefaultSubsystem, EventRegistry, registry};
use crate::primitives::{
    DEFAULT_EVENT_ACCURACY, DEFAULT_SUBSYSTEM_ID, DEFAULT_SUBSYSTEM_NAME,
    DEFAULT_SUBSYSTEM_VERSION,
};
use crate::subsystem::{Subsystem, SubsystemBody};
use crate::{
    DecorativeGeometry, EventCause, EventId, EventOutcome, EventTriggerInfo, NextScheduledEvent,
    SimError, State, SubsystemId,
};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info};

// =============================================================================
// SYSTEM LINK
// =============================================================================

/// State shared between a system and the bodies it adopted.
#[derive(Debug, Default)]
pub(crate) struct SystemLink {
    topology_realized: Cell<bool>,
    topology_version: Cell<u64>,
    /// Registry cache entry index in slot 0, once its topology is realized.
    event_cache: Cell<Option<usize>>,
}

impl SystemLink {
    pub(crate) fn invalidate_topology(&self) {
        self.topology_realized.set(false);
    }

    pub(crate) fn event_cache(&self) -> Option<usize> {
        self.event_cache.get()
    }

    pub(crate) fn set_event_cache(&self, index: usize) {
        self.event_cache.set(Some(index));
    }
}

// =============================================================================
// SYSTEM
// =============================================================================

/// Ordered collection of subsystems realized together.
#[derive(Debug)]
pub struct System {
    name: String,
    version: String,
    accuracy: f64,
    link: Rc<SystemLink>,
    subsystems: Vec<Subsystem>,
}

impl System {
    /// Create a system holding only the default event registry.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_registry(
            name.into(),
            version.into(),
            DEFAULT_EVENT_ACCURACY,
            EventRegistry::default(),
        )
    }

    /// Create a system from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &SystemConfig) -> Self {
        Self::with_registry(
            config.system.name.clone(),
            config.system.version.clone(),
            config.events.accuracy,
            EventRegistry::new(config.events.localization_window),
        )
    }

    fn with_registry(name: String, version: String, accuracy: f64, registry: EventRegistry) -> Self {
        let link = Rc::new(SystemLink::default());
        let mut body = SubsystemBody::new(DEFAULT_SUBSYSTEM_NAME, DEFAULT_SUBSYSTEM_VERSION, registry);
        body.attach(Rc::clone(&link), DEFAULT_SUBSYSTEM_ID);
        Self {
            name,
            version,
            accuracy,
            link,
            subsystems: vec![Subsystem::new(body)],
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Accuracy handed to event handlers when the driver has no better value.
    #[must_use]
    pub fn default_accuracy(&self) -> f64 {
        self.accuracy
    }

    fn label(&self) -> String {
        format!("{} {}", self.name, self.version)
    }

    // =========================================================================
    // SUBSYSTEMS
    // =========================================================================

    /// Adopt a subsystem into the next free slot.
    ///
    /// Invalidates the system topology; states realized before this call
    /// are stale.
    pub fn adopt_subsystem(&mut self, mut subsystem: Subsystem) -> Result<SubsystemId, SimError> {
        let id = SubsystemId(self.subsystems.len());
        let body = subsystem.body_mut()?;
        body.bind_to_system(Rc::clone(&self.link), id)?;
        info!(system = %self.label(), subsystem = %body.label(), slot = %id, "subsystem adopted");
        self.subsystems.push(subsystem);
        self.invalidate_system_topology_cache();
        Ok(id)
    }

    /// Number of subsystems, the registry included.
    #[must_use]
    pub fn subsystem_count(&self) -> usize {
        self.subsystems.len()
    }

    pub fn subsystem(&self, id: SubsystemId) -> Result<&Subsystem, SimError> {
        self.subsystems
            .get(id.index())
            .ok_or(SimError::UnknownSubsystem(id))
    }

    /// Mutable access to a subsystem's operation table.
    ///
    /// Changes that affect allocations must be followed by
    /// [`SubsystemBody::invalidate_topology_cache`].
    pub fn upd_subsystem_guts<T: std::any::Any>(
        &mut self,
        id: SubsystemId,
    ) -> Result<Option<&mut T>, SimError> {
        self.subsystems
            .get_mut(id.index())
            .ok_or(SimError::UnknownSubsystem(id))?
            .guts_as_mut::<T>()
    }

    fn bodies(&self) -> impl Iterator<Item = Result<&SubsystemBody, SimError>> {
        self.subsystems.iter().map(Subsystem::body)
    }

    /// The event registry and its body.
    pub fn default_subsystem(&self) -> Result<DefaultSubsystem<'_>, SimError> {
        let body = self.subsystem(DEFAULT_SUBSYSTEM_ID)?.body()?;
        let registry = body
            .guts_as::<EventRegistry>()
            .ok_or_else(|| SimError::TypeMismatch {
                subsystem: DEFAULT_SUBSYSTEM_ID,
                what: "default subsystem",
                index: DEFAULT_SUBSYSTEM_ID.index(),
            })?;
        Ok(DefaultSubsystem::new(body, registry))
    }

    /// Mutable registry, for adding event handlers.
    pub fn upd_default_subsystem(&mut self) -> Result<&mut EventRegistry, SimError> {
        self.upd_subsystem_guts::<EventRegistry>(DEFAULT_SUBSYSTEM_ID)?
            .ok_or_else(|| SimError::TypeMismatch {
                subsystem: DEFAULT_SUBSYSTEM_ID,
                what: "default subsystem",
                index: DEFAULT_SUBSYSTEM_ID.index(),
            })
    }

    // =========================================================================
    // TOPOLOGY CACHE
    // =========================================================================

    pub fn invalidate_system_topology_cache(&self) {
        self.link.invalidate_topology();
    }

    #[must_use]
    pub fn system_topology_has_been_realized(&self) -> bool {
        self.link.topology_realized.get()
    }

    /// Version stamped on states by the latest topology realization.
    #[must_use]
    pub fn topology_version(&self) -> u64 {
        self.link.topology_version.get()
    }

    fn check_state(&self, state: &State, operation: &'static str) -> Result<(), SimError> {
        if !self.system_topology_has_been_realized() {
            return Err(SimError::TopologyNotRealized {
                subsystem: self.label(),
                operation,
            });
        }
        let system = self.topology_version();
        if state.topology_version() != system {
            return Err(SimError::StaleState {
                state: state.topology_version(),
                system,
            });
        }
        Ok(())
    }

    // =========================================================================
    // REALIZATION
    // =========================================================================

    /// Build a fresh state and realize every subsystem's topology into it,
    /// in slot order.
    ///
    /// The topology version advances only when the topology was invalidated
    /// since the last call, so states built from an unchanged topology stay
    /// usable side by side.
    pub fn realize_topology(&self) -> Result<State, SimError> {
        let mut state = State::with_subsystems(self.subsystems.len());
        for body in self.bodies() {
            body?.realize_topology(&mut state)?;
        }
        let version = if self.system_topology_has_been_realized() {
            self.topology_version()
        } else {
            self.topology_version() + 1
        };
        state.set_topology_version(version);
        self.link.topology_version.set(version);
        self.link.topology_realized.set(true);
        debug!(system = %self.label(), version, "system topology realized");
        Ok(state)
    }

    pub fn realize_model(&self, state: &mut State) -> Result<(), SimError> {
        self.check_state(state, "System::realize_model")?;
        for body in self.bodies() {
            body?.realize_model(state)?;
        }
        Ok(())
    }

    /// Realize every subsystem up to `target`, one stage at a time.
    pub fn realize(&self, state: &mut State, target: Stage) -> Result<(), SimError> {
        self.check_state(state, "System::realize")?;
        if target < Stage::Model {
            return Ok(());
        }
        self.realize_model(state)?;
        for stage in Stage::Model.up_to(target) {
            for body in self.bodies() {
                body?.realize_stage(state, stage)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // AGGREGATES
    // =========================================================================

    /// Earliest scheduled event across all subsystems.
    pub fn calc_time_of_next_scheduled_event(
        &self,
        state: &State,
    ) -> Result<NextScheduledEvent, SimError> {
        self.check_state(state, "System::calc_time_of_next_scheduled_event")?;
        let mut next = NextScheduledEvent::none();
        for body in self.bodies() {
            next.merge(body?.calc_time_of_next_scheduled_event(state)?);
        }
        Ok(next)
    }

    pub fn calc_event_trigger_info(&self, state: &State) -> Result<Vec<EventTriggerInfo>, SimError> {
        self.check_state(state, "System::calc_event_trigger_info")?;
        let mut infos = Vec::new();
        for body in self.bodies() {
            infos.extend(body?.calc_event_trigger_info(state)?);
        }
        Ok(infos)
    }

    /// Route a batch of firing ids to their owners and aggregate the outcomes.
    pub fn handle_events(
        &self,
        state: &mut State,
        cause: EventCause,
        event_ids: &[EventId],
        accuracy: f64,
        y_weights: &[f64],
        constraint_tols: &[f64],
    ) -> Result<EventOutcome, SimError> {
        self.check_state(state, "System::handle_events")?;
        let mut outcome = EventOutcome::unchanged();
        for body in self.bodies() {
            let body = body?;
            let owned = registry::find_subsystem_event_ids(
                &self.link,
                body.subsystem_id()?,
                state,
                event_ids,
            )?;
            if owned.is_empty() {
                continue;
            }
            outcome.merge(body.handle_events(
                state,
                cause,
                &owned,
                accuracy,
                y_weights,
                constraint_tols,
            )?);
        }
        debug!(
            system = %self.label(),
            ?cause,
            lowest_modified = %outcome.lowest_modified,
            terminate = outcome.should_terminate,
            "events handled"
        );
        Ok(outcome)
    }

    /// Unit weights for y = {q, u, z}: every q, then every u, then every z.
    pub fn calc_y_unit_weights(&self, state: &State) -> Result<Vec<f64>, SimError> {
        let mut q = Vec::new();
        let mut u = Vec::new();
        let mut z = Vec::new();
        for body in self.bodies() {
            let body = body?;
            q.extend(body.calc_q_unit_weights(state)?);
            u.extend(body.calc_u_unit_weights(state)?);
            z.extend(body.calc_z_unit_weights(state)?);
        }
        q.extend(u);
        q.extend(z);
        Ok(q)
    }

    /// Unit tolerances for the constraint errors: every qerr, then every uerr.
    pub fn calc_yerr_unit_tolerances(&self, state: &State) -> Result<Vec<f64>, SimError> {
        let mut qerr = Vec::new();
        let mut uerr = Vec::new();
        for body in self.bodies() {
            let body = body?;
            qerr.extend(body.calc_qerr_unit_tolerances(state)?);
            uerr.extend(body.calc_uerr_unit_tolerances(state)?);
        }
        qerr.extend(uerr);
        Ok(qerr)
    }

    /// Decorative geometry from every subsystem at `stage`.
    pub fn calc_decorative_geometry(
        &self,
        state: &State,
        stage: Stage,
    ) -> Result<Vec<DecorativeGeometry>, SimError> {
        let mut geometry = Vec::new();
        for body in self.bodies() {
            body?.calc_decorative_geometry_and_append(state, stage, &mut geometry)?;
        }
        Ok(geometry)
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new("system", "0.0.0")
    }
}

// =============================================================================
// TESTS
// =============================================================================
