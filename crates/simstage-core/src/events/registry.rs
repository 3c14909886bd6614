//! # Event Registry
//!
//! The default subsystem. It owns the registered handlers and reporters and,
//! per state, a cache entry holding the event id counter, the owner map and
//! the ids minted for each registration.
//!
//! ## Lifecycle
//!
//! - Topology: allocate the cache entry and publish its location on the
//!   system link so every subsystem can mint ids.
//! - Model: clear the id lists and mint a fresh id per registration;
//!   triggered kinds also get a trigger value slot at their required stage.
//! - Instance..Report: refresh the trigger values whose required stage is
//!   the stage being realized.
//!
//! The counter is not reset at Model, so repeated Model realizations of one
//! state keep minting increasing ids.

use crate::primitives::{
    DEFAULT_LOCALIZATION_WINDOW, DEFAULT_SUBSYSTEM_ID, default_subsystem_label,
};
use crate::subsystem::{SubsystemBody, SubsystemGuts};
use crate::system::SystemLink;
use crate::{
    EventCause, EventId, EventOutcome, EventTriggerInfo, NextScheduledEvent, SimError, Stage,
    State, SubsystemId,
};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

use super::{
    ScheduledEventHandler, ScheduledEventReporter, TriggeredEventHandler, TriggeredEventReporter,
};

// =============================================================================
// PER-STATE CACHE
// =============================================================================

/// Registry bookkeeping stored in the state's cache area.
#[derive(Debug, Default)]
pub(crate) struct EventCache {
    next_id: u64,
    owners: BTreeMap<EventId, SubsystemId>,
    scheduled_handler_ids: Vec<EventId>,
    triggered_handler_ids: Vec<EventId>,
    triggered_handler_slots: Vec<usize>,
    scheduled_reporter_ids: Vec<EventId>,
    triggered_reporter_ids: Vec<EventId>,
    triggered_reporter_slots: Vec<usize>,
}

impl EventCache {
    fn mint(&mut self, owner: SubsystemId) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.owners.insert(id, owner);
        id
    }

    fn clear_registrations(&mut self) {
        self.scheduled_handler_ids.clear();
        self.triggered_handler_ids.clear();
        self.triggered_handler_slots.clear();
        self.scheduled_reporter_ids.clear();
        self.triggered_reporter_ids.clear();
        self.triggered_reporter_slots.clear();
    }
}

fn minting_cache<'s>(
    link: &SystemLink,
    state: &'s State,
    operation: &'static str,
) -> Result<Ref<'s, EventCache>, SimError> {
    let index = link.event_cache().ok_or(SimError::TopologyNotRealized {
        subsystem: default_subsystem_label(),
        operation,
    })?;
    state.cache_entry::<EventCache>(DEFAULT_SUBSYSTEM_ID, index)
}

fn minting_cache_mut<'s>(
    link: &SystemLink,
    state: &'s State,
    operation: &'static str,
) -> Result<RefMut<'s, EventCache>, SimError> {
    let index = link.event_cache().ok_or(SimError::TopologyNotRealized {
        subsystem: default_subsystem_label(),
        operation,
    })?;
    state.upd_cache_entry::<EventCache>(DEFAULT_SUBSYSTEM_ID, index)
}

/// Mint the next id in `state` and record `owner` as its owner.
pub(crate) fn create_event_id(
    link: &SystemLink,
    owner: SubsystemId,
    state: &State,
) -> Result<EventId, SimError> {
    let id = minting_cache_mut(link, state, "EventRegistry::create_event_id")?.mint(owner);
    trace!(event = %id, owner = %owner, "minted event id");
    Ok(id)
}

/// The subset of `event_ids` owned by `owner`, in input order.
///
/// Ids never minted in `state` are skipped.
pub(crate) fn find_subsystem_event_ids(
    link: &SystemLink,
    owner: SubsystemId,
    state: &State,
    event_ids: &[EventId],
) -> Result<Vec<EventId>, SimError> {
    let cache = minting_cache(link, state, "EventRegistry::find_subsystem_event_ids")?;
    Ok(event_ids
        .iter()
        .copied()
        .filter(|id| cache.owners.get(id) == Some(&owner))
        .collect())
}

fn event_owner(link: &SystemLink, id: EventId, state: &State) -> Result<SubsystemId, SimError> {
    minting_cache(link, state, "EventRegistry::event_owner")?
        .owners
        .get(&id)
        .copied()
        .ok_or(SimError::UnknownEvent(id))
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Operation table of the default subsystem.
///
/// Handlers are added through `&mut self` before topology realization.
/// Reporters never modify the state, so they may be added through `&self`.
#[derive(Clone)]
pub struct EventRegistry {
    localization_window: f64,
    cache_index: Cell<Option<usize>>,
    scheduled_handlers: Vec<Rc<dyn ScheduledEventHandler>>,
    triggered_handlers: Vec<Rc<dyn TriggeredEventHandler>>,
    scheduled_reporters: RefCell<Vec<Rc<dyn ScheduledEventReporter>>>,
    triggered_reporters: RefCell<Vec<Rc<dyn TriggeredEventReporter>>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("localization_window", &self.localization_window)
            .field("cache_index", &self.cache_index.get())
            .field("scheduled_handlers", &self.scheduled_handlers.len())
            .field("triggered_handlers", &self.triggered_handlers.len())
            .field("scheduled_reporters", &self.scheduled_reporters.borrow().len())
            .field("triggered_reporters", &self.triggered_reporters.borrow().len())
            .finish()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LOCALIZATION_WINDOW)
    }
}

impl EventRegistry {
    /// Create a registry whose trigger infos default to `localization_window`.
    #[must_use]
    pub fn new(localization_window: f64) -> Self {
        Self {
            localization_window,
            cache_index: Cell::new(None),
            scheduled_handlers: Vec::new(),
            triggered_handlers: Vec::new(),
            scheduled_reporters: RefCell::new(Vec::new()),
            triggered_reporters: RefCell::new(Vec::new()),
        }
    }

    /// Window applied to trigger infos that leave it unset.
    #[must_use]
    pub fn localization_window(&self) -> f64 {
        self.localization_window
    }

    pub fn add_scheduled_event_handler<H: ScheduledEventHandler + 'static>(&mut self, handler: H) {
        self.scheduled_handlers.push(Rc::new(handler));
    }

    pub fn add_triggered_event_handler<H: TriggeredEventHandler + 'static>(&mut self, handler: H) {
        self.triggered_handlers.push(Rc::new(handler));
    }

    pub fn add_scheduled_event_reporter<R: ScheduledEventReporter + 'static>(&self, reporter: R) {
        self.scheduled_reporters.borrow_mut().push(Rc::new(reporter));
    }

    pub fn add_triggered_event_reporter<R: TriggeredEventReporter + 'static>(&self, reporter: R) {
        self.triggered_reporters.borrow_mut().push(Rc::new(reporter));
    }

    /// Number of registered handlers and reporters, all kinds.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.scheduled_handlers.len()
            + self.triggered_handlers.len()
            + self.scheduled_reporters.borrow().len()
            + self.triggered_reporters.borrow().len()
    }

    fn own_cache<'s>(
        &self,
        body: &SubsystemBody,
        state: &'s State,
        operation: &'static str,
    ) -> Result<Ref<'s, EventCache>, SimError> {
        let index = self
            .cache_index
            .get()
            .ok_or_else(|| SimError::TopologyNotRealized {
                subsystem: body.label(),
                operation,
            })?;
        body.cache_entry::<EventCache>(state, index)
    }

    fn own_cache_mut<'s>(
        &self,
        body: &SubsystemBody,
        state: &'s State,
        operation: &'static str,
    ) -> Result<RefMut<'s, EventCache>, SimError> {
        let index = self
            .cache_index
            .get()
            .ok_or_else(|| SimError::TopologyNotRealized {
                subsystem: body.label(),
                operation,
            })?;
        body.upd_cache_entry::<EventCache>(state, index)
    }

    fn with_default_window(&self, mut info: EventTriggerInfo, id: EventId) -> EventTriggerInfo {
        info.set_event_id(id);
        if info.localization_window.is_none() {
            info.localization_window = Some(self.localization_window);
        }
        info
    }

    /// Recompute trigger values due at `stage`.
    fn refresh_trigger_values(
        &self,
        body: &SubsystemBody,
        state: &State,
        stage: Stage,
    ) -> Result<(), SimError> {
        let (handler_slots, reporter_slots) = {
            let cache = self.own_cache(body, state, "EventRegistry::realize_stage")?;
            (
                cache.triggered_handler_slots.clone(),
                cache.triggered_reporter_slots.clone(),
            )
        };

        let mut updates = Vec::new();
        for (handler, &slot) in self.triggered_handlers.iter().zip(&handler_slots) {
            if handler.required_stage() == stage {
                updates.push((slot, handler.value(state)?));
            }
        }
        let reporters = self.triggered_reporters.borrow().clone();
        for (reporter, &slot) in reporters.iter().zip(&reporter_slots) {
            if reporter.required_stage() == stage {
                updates.push((slot, reporter.value(state)?));
            }
        }
        if updates.is_empty() {
            return Ok(());
        }

        let id = body.subsystem_id()?;
        let mut values = body.upd_events_by_stage(state, stage)?;
        for (slot, value) in updates {
            let target = values.get_mut(slot).ok_or(SimError::IndexOutOfRange {
                subsystem: id,
                what: "trigger value",
                index: slot,
            });
            *body.scoped("EventRegistry::realize_stage", target)? = value;
        }
        Ok(())
    }
}

impl SubsystemGuts for EventRegistry {
    fn clone_guts(&self) -> Box<dyn SubsystemGuts> {
        let copy = self.clone();
        copy.cache_index.set(None);
        Box::new(copy)
    }

    fn realize_topology(&self, body: &SubsystemBody, state: &mut State) -> Result<(), SimError> {
        let index = body.allocate_cache_entry(state, Stage::Topology, Box::new(EventCache::default()))?;
        self.cache_index.set(Some(index));
        if body.subsystem_id()? == DEFAULT_SUBSYSTEM_ID {
            body.system_link("EventRegistry::realize_topology")?
                .set_event_cache(index);
        }
        Ok(())
    }

    fn realize_model(&self, body: &SubsystemBody, state: &mut State) -> Result<(), SimError> {
        self.own_cache_mut(body, state, "EventRegistry::realize_model")?
            .clear_registrations();

        let scheduled_handler_ids = self
            .scheduled_handlers
            .iter()
            .map(|_| body.create_scheduled_event(state))
            .collect::<Result<Vec<_>, _>>()?;

        let mut triggered_handler_ids = Vec::with_capacity(self.triggered_handlers.len());
        let mut triggered_handler_slots = Vec::with_capacity(self.triggered_handlers.len());
        for handler in &self.triggered_handlers {
            let (id, slot) = body.create_triggered_event(state, handler.required_stage())?;
            triggered_handler_ids.push(id);
            triggered_handler_slots.push(slot);
        }

        let scheduled_reporters = self.scheduled_reporters.borrow().len();
        let scheduled_reporter_ids = (0..scheduled_reporters)
            .map(|_| body.create_scheduled_event(state))
            .collect::<Result<Vec<_>, _>>()?;

        let triggered_reporters = self.triggered_reporters.borrow().clone();
        let mut triggered_reporter_ids = Vec::with_capacity(triggered_reporters.len());
        let mut triggered_reporter_slots = Vec::with_capacity(triggered_reporters.len());
        for reporter in &triggered_reporters {
            let (id, slot) = body.create_triggered_event(state, reporter.required_stage())?;
            triggered_reporter_ids.push(id);
            triggered_reporter_slots.push(slot);
        }

        let mut cache = self.own_cache_mut(body, state, "EventRegistry::realize_model")?;
        cache.scheduled_handler_ids = scheduled_handler_ids;
        cache.triggered_handler_ids = triggered_handler_ids;
        cache.triggered_handler_slots = triggered_handler_slots;
        cache.scheduled_reporter_ids = scheduled_reporter_ids;
        cache.triggered_reporter_ids = triggered_reporter_ids;
        cache.triggered_reporter_slots = triggered_reporter_slots;
        debug!(
            subsystem = %body.label(),
            minted = cache.next_id,
            "event registrations assigned ids"
        );
        Ok(())
    }

    fn realize_instance(&self, body: &SubsystemBody, state: &State) -> Result<(), SimError> {
        self.refresh_trigger_values(body, state, Stage::Instance)
    }

    fn realize_time(&self, body: &SubsystemBody, state: &State) -> Result<(), SimError> {
        self.refresh_trigger_values(body, state, Stage::Time)
    }

    fn realize_position(&self, body: &SubsystemBody, state: &State) -> Result<(), SimError> {
        self.refresh_trigger_values(body, state, Stage::Position)
    }

    fn realize_velocity(&self, body: &SubsystemBody, state: &State) -> Result<(), SimError> {
        self.refresh_trigger_values(body, state, Stage::Velocity)
    }

    fn realize_dynamics(&self, body: &SubsystemBody, state: &State) -> Result<(), SimError> {
        self.refresh_trigger_values(body, state, Stage::Dynamics)
    }

    fn realize_acceleration(&self, body: &SubsystemBody, state: &State) -> Result<(), SimError> {
        self.refresh_trigger_values(body, state, Stage::Acceleration)
    }

    fn realize_report(&self, body: &SubsystemBody, state: &State) -> Result<(), SimError> {
        self.refresh_trigger_values(body, state, Stage::Report)
    }

    fn calc_event_trigger_info(
        &self,
        body: &SubsystemBody,
        state: &State,
    ) -> Result<Vec<EventTriggerInfo>, SimError> {
        let cache = self.own_cache(body, state, "EventRegistry::calc_event_trigger_info")?;
        let mut infos = Vec::with_capacity(
            cache.triggered_handler_ids.len() + cache.triggered_reporter_ids.len(),
        );
        for (handler, &id) in self.triggered_handlers.iter().zip(&cache.triggered_handler_ids) {
            infos.push(self.with_default_window(handler.trigger_info(), id));
        }
        let reporters = self.triggered_reporters.borrow();
        for (reporter, &id) in reporters.iter().zip(&cache.triggered_reporter_ids) {
            infos.push(self.with_default_window(reporter.trigger_info(), id));
        }
        Ok(infos)
    }

    fn calc_time_of_next_scheduled_event(
        &self,
        body: &SubsystemBody,
        state: &State,
    ) -> Result<NextScheduledEvent, SimError> {
        let (handler_ids, reporter_ids) = {
            let cache = self.own_cache(body, state, "EventRegistry::calc_time_of_next_scheduled_event")?;
            (
                cache.scheduled_handler_ids.clone(),
                cache.scheduled_reporter_ids.clone(),
            )
        };

        let now = state.time();
        let mut next = NextScheduledEvent::none();
        for (handler, &id) in self.scheduled_handlers.iter().zip(&handler_ids) {
            next.offer(handler.next_event_time(state)?, now, id);
        }
        let reporters = self.scheduled_reporters.borrow().clone();
        for (reporter, &id) in reporters.iter().zip(&reporter_ids) {
            next.offer(reporter.next_event_time(state)?, now, id);
        }
        Ok(next)
    }

    fn handle_events(
        &self,
        body: &SubsystemBody,
        state: &mut State,
        cause: EventCause,
        event_ids: &[EventId],
        accuracy: f64,
        y_weights: &[f64],
        constraint_tols: &[f64],
    ) -> Result<EventOutcome, SimError> {
        let firing: BTreeSet<EventId> = event_ids.iter().copied().collect();
        let (handler_ids, reporter_ids) = {
            let cache = self.own_cache(body, state, "EventRegistry::handle_events")?;
            match cause {
                EventCause::Scheduled => (
                    cache.scheduled_handler_ids.clone(),
                    cache.scheduled_reporter_ids.clone(),
                ),
                EventCause::Triggered => (
                    cache.triggered_handler_ids.clone(),
                    cache.triggered_reporter_ids.clone(),
                ),
            }
        };

        let mut outcome = EventOutcome::unchanged();
        match cause {
            EventCause::Scheduled => {
                for (handler, id) in self.scheduled_handlers.iter().zip(&handler_ids) {
                    if firing.contains(id) {
                        outcome.merge(handler.handle_event(
                            state,
                            accuracy,
                            y_weights,
                            constraint_tols,
                        )?);
                    }
                }
                let reporters = self.scheduled_reporters.borrow().clone();
                for (reporter, id) in reporters.iter().zip(&reporter_ids) {
                    if firing.contains(id) {
                        reporter.handle_event(state)?;
                    }
                }
            }
            EventCause::Triggered => {
                for (handler, id) in self.triggered_handlers.iter().zip(&handler_ids) {
                    if firing.contains(id) {
                        outcome.merge(handler.handle_event(
                            state,
                            accuracy,
                            y_weights,
                            constraint_tols,
                        )?);
                    }
                }
                let reporters = self.triggered_reporters.borrow().clone();
                for (reporter, id) in reporters.iter().zip(&reporter_ids) {
                    if firing.contains(id) {
                        reporter.handle_event(state)?;
                    }
                }
            }
        }
        trace!(?cause, fired = firing.len(), ?outcome, "registry events handled");
        Ok(outcome)
    }
}

// =============================================================================
// DEFAULT SUBSYSTEM VIEW
// =============================================================================

/// Read-only view of slot 0: the registry plus its body.
///
/// Returned by [`crate::System::default_subsystem`].
#[derive(Debug, Clone, Copy)]
pub struct DefaultSubsystem<'a> {
    body: &'a SubsystemBody,
    registry: &'a EventRegistry,
}

impl<'a> DefaultSubsystem<'a> {
    pub(crate) fn new(body: &'a SubsystemBody, registry: &'a EventRegistry) -> Self {
        Self { body, registry }
    }

    #[must_use]
    pub fn body(&self) -> &'a SubsystemBody {
        self.body
    }

    #[must_use]
    pub fn registry(&self) -> &'a EventRegistry {
        self.registry
    }

    /// Mint an event id owned by `owner` in `state`.
    pub fn create_event_id(&self, owner: SubsystemId, state: &State) -> Result<EventId, SimError> {
        create_event_id(
            self.body.system_link("DefaultSubsystem::create_event_id")?,
            owner,
            state,
        )
    }

    /// The subset of `event_ids` owned by `owner`, in input order.
    pub fn find_subsystem_event_ids(
        &self,
        owner: SubsystemId,
        state: &State,
        event_ids: &[EventId],
    ) -> Result<Vec<EventId>, SimError> {
        find_subsystem_event_ids(
            self.body.system_link("DefaultSubsystem::find_subsystem_event_ids")?,
            owner,
            state,
            event_ids,
        )
    }

    /// Slot that minted `id` in `state`.
    pub fn event_owner(&self, id: EventId, state: &State) -> Result<SubsystemId, SimError> {
        event_owner(
            self.body.system_link("DefaultSubsystem::event_owner")?,
            id,
            state,
        )
    }

    pub fn add_scheduled_event_reporter<R: ScheduledEventReporter + 'static>(&self, reporter: R) {
        self.registry.add_scheduled_event_reporter(reporter);
    }

    pub fn add_triggered_event_reporter<R: TriggeredEventReporter + 'static>(&self, reporter: R) {
        self.registry.add_triggered_event_reporter(reporter);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::System;

    #[derive(Debug)]
    struct At(f64);

    impl ScheduledEventHandler for At {
        fn next_event_time(&self, _state: &State) -> Result<f64, SimError> {
            Ok(self.0)
        }

        fn handle_event(
            &self,
            _state: &mut State,
            _accuracy: f64,
            _y_weights: &[f64],
            _constraint_tols: &[f64],
        ) -> Result<EventOutcome, SimError> {
            Ok(EventOutcome::modified(Stage::Velocity))
        }
    }

    struct Crossing {
        stage: Stage,
        offset: f64,
    }

    impl TriggeredEventHandler for Crossing {
        fn required_stage(&self) -> Stage {
            self.stage
        }

        fn value(&self, state: &State) -> Result<f64, SimError> {
            Ok(state.time() - self.offset)
        }

        fn handle_event(
            &self,
            _state: &mut State,
            _accuracy: f64,
            _y_weights: &[f64],
            _constraint_tols: &[f64],
        ) -> Result<EventOutcome, SimError> {
            Ok(EventOutcome::terminate())
        }
    }

    #[test]
    fn model_mints_one_id_per_registration() {
        let mut system = System::new("sys", "1");
        {
            let registry = system.upd_default_subsystem().unwrap();
            registry.add_scheduled_event_handler(At(1.0));
            registry.add_triggered_event_handler(Crossing {
                stage: Stage::Time,
                offset: 0.5,
            });
        }
        let mut state = system.realize_topology().unwrap();
        system.realize_model(&mut state).unwrap();

        let default = system.default_subsystem().unwrap();
        for raw in 0..2 {
            assert_eq!(
                default.event_owner(EventId(raw), &state).unwrap(),
                DEFAULT_SUBSYSTEM_ID
            );
        }
        assert!(matches!(
            default.event_owner(EventId(2), &state),
            Err(SimError::UnknownEvent(EventId(2)))
        ));
    }

    #[test]
    fn trigger_values_refresh_at_required_stage() {
        let mut system = System::new("sys", "1");
        system
            .upd_default_subsystem()
            .unwrap()
            .add_triggered_event_handler(Crossing {
                stage: Stage::Time,
                offset: 0.5,
            });
        let mut state = system.realize_topology().unwrap();
        state.set_time(2.0);
        system.realize(&mut state, Stage::Instance).unwrap();
        assert_eq!(
            &*state.events_by_stage(DEFAULT_SUBSYSTEM_ID, Stage::Time).unwrap(),
            &[0.0]
        );
        system.realize(&mut state, Stage::Time).unwrap();
        assert_eq!(
            &*state.events_by_stage(DEFAULT_SUBSYSTEM_ID, Stage::Time).unwrap(),
            &[1.5]
        );
    }

    #[test]
    fn trigger_info_gets_id_and_default_window() {
        let mut system = System::new("sys", "1");
        system
            .upd_default_subsystem()
            .unwrap()
            .add_triggered_event_handler(Crossing {
                stage: Stage::Position,
                offset: 0.0,
            });
        let mut state = system.realize_topology().unwrap();
        system.realize_model(&mut state).unwrap();
        let infos = system.calc_event_trigger_info(&state).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].event_id, Some(EventId(0)));
        assert_eq!(
            infos[0].localization_window,
            Some(DEFAULT_LOCALIZATION_WINDOW)
        );
    }

    #[test]
    fn dispatch_is_isolated_by_cause() {
        let mut system = System::new("sys", "1");
        {
            let registry = system.upd_default_subsystem().unwrap();
            registry.add_scheduled_event_handler(At(1.0));
            registry.add_triggered_event_handler(Crossing {
                stage: Stage::Time,
                offset: 0.0,
            });
        }
        let mut state = system.realize_topology().unwrap();
        system.realize_model(&mut state).unwrap();

        // Both ids under the scheduled cause: only the scheduled handler runs.
        let all = [EventId(0), EventId(1)];
        let outcome = system
            .handle_events(&mut state, EventCause::Scheduled, &all, 1e-3, &[], &[])
            .unwrap();
        assert_eq!(outcome.lowest_modified, Stage::Velocity);
        assert!(!outcome.should_terminate);

        let outcome = system
            .handle_events(&mut state, EventCause::Triggered, &all, 1e-3, &[], &[])
            .unwrap();
        assert_eq!(outcome.lowest_modified, Stage::HIGHEST);
        assert!(outcome.should_terminate);
    }

    #[test]
    fn counter_survives_model_rerealization() {
        let mut system = System::new("sys", "1");
        system
            .upd_default_subsystem()
            .unwrap()
            .add_scheduled_event_handler(At(1.0));
        let mut state = system.realize_topology().unwrap();
        system.realize_model(&mut state).unwrap();
        state
            .invalidate_subsystem(DEFAULT_SUBSYSTEM_ID, Stage::Model)
            .unwrap();
        system.realize_model(&mut state).unwrap();

        let default = system.default_subsystem().unwrap();
        let next = system.calc_time_of_next_scheduled_event(&state).unwrap();
        assert_eq!(next.event_ids, vec![EventId(1)]);
        // The first minting stays in the owner map.
        assert_eq!(
            default.event_owner(EventId(0), &state).unwrap(),
            DEFAULT_SUBSYSTEM_ID
        );
    }

    #[test]
    fn registry_clone_forgets_cache_location() {
        let system = System::new("sys", "1");
        let registry = system.default_subsystem().unwrap().registry();
        registry.cache_index.set(Some(3));
        let copy = registry.clone_guts();
        let copy = copy.as_ref().as_any().downcast_ref::<EventRegistry>().unwrap();
        assert_eq!(copy.cache_index.get(), None);
        assert_eq!(copy.localization_window(), registry.localization_window());
    }
}
