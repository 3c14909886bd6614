//! # State
//!
//! Per-subsystem storage a system's subsystems realize into.
//!
//! A `State` has one slot per subsystem. Each slot holds:
//! - the slot's stage marker
//! - continuous variables q, u, z (mutable only through `&mut State`)
//! - derived cache vectors (qdot, udot, zdot, qdotdot, constraint errors,
//!   multipliers) and per-stage event trigger values
//! - discrete variables and cache entries, each a boxed `Any` tagged with a stage
//!
//! ## Logically-const caches
//!
//! Realization past Model runs against `&State`, yet it must record stage
//! progress and fill caches. Everything a realize call may write is held in a
//! `Cell`/`RefCell`. A `State` is single-threaded (`!Sync`); sharing one
//! across threads requires external synchronization.

use crate::{SimError, Stage, SubsystemId};
use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};

// =============================================================================
// SLOT STORAGE
// =============================================================================

/// Derived quantities computed during realization.
#[derive(Debug, Default)]
struct DerivedCache {
    qdot: Vec<f64>,
    udot: Vec<f64>,
    zdot: Vec<f64>,
    qdotdot: Vec<f64>,
    qerr: Vec<f64>,
    uerr: Vec<f64>,
    udoterr: Vec<f64>,
    multipliers: Vec<f64>,
}

/// A discrete variable: changed only by the driving loop or event handlers.
#[derive(Debug)]
struct DiscreteVariable {
    /// Lowest stage invalidated when the value changes.
    stage: Stage,
    value: Box<dyn Any>,
}

/// A cache entry: recomputed during realization, writable through `&State`.
#[derive(Debug)]
struct CacheEntry {
    /// Stage the entry depends on.
    stage: Stage,
    value: RefCell<Box<dyn Any>>,
}

#[derive(Debug)]
struct SubsystemSlot {
    stage: Cell<Stage>,
    q: Vec<f64>,
    u: Vec<f64>,
    z: Vec<f64>,
    derived: RefCell<DerivedCache>,
    discrete: Vec<DiscreteVariable>,
    cache: Vec<CacheEntry>,
    /// Trigger values, one array per stage.
    events: RefCell<Vec<Vec<f64>>>,
}

impl Default for SubsystemSlot {
    fn default() -> Self {
        Self {
            stage: Cell::new(Stage::Empty),
            q: Vec::new(),
            u: Vec::new(),
            z: Vec::new(),
            derived: RefCell::new(DerivedCache::default()),
            discrete: Vec::new(),
            cache: Vec::new(),
            events: RefCell::new(vec![Vec::new(); Stage::COUNT]),
        }
    }
}

impl SubsystemSlot {
    /// Drop this slot below `stage` if it is currently at or above it.
    fn invalidate(&self, stage: Stage) {
        if self.stage.get() >= stage {
            self.stage.set(stage.previous_or_empty());
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Shared, versioned simulation state: one slot per subsystem.
#[derive(Debug, Default)]
pub struct State {
    time: f64,
    topology_version: u64,
    slots: Vec<SubsystemSlot>,
}

impl State {
    /// Create a state with no subsystem slots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state with `count` empty slots.
    #[must_use]
    pub fn with_subsystems(count: usize) -> Self {
        let mut state = Self::new();
        state.slots.resize_with(count, SubsystemSlot::default);
        state
    }

    /// Number of subsystem slots.
    #[must_use]
    pub fn subsystem_count(&self) -> usize {
        self.slots.len()
    }

    /// Topology version of the system this state was built for.
    #[must_use]
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    pub(crate) fn set_topology_version(&mut self, version: u64) {
        self.topology_version = version;
    }

    fn slot(&self, id: SubsystemId) -> Result<&SubsystemSlot, SimError> {
        self.slots.get(id.index()).ok_or(SimError::UnknownSubsystem(id))
    }

    fn slot_mut(&mut self, id: SubsystemId) -> Result<&mut SubsystemSlot, SimError> {
        self.slots
            .get_mut(id.index())
            .ok_or(SimError::UnknownSubsystem(id))
    }

    /// Slot that may still receive permanent allocations (below Model).
    fn allocatable_slot(
        &mut self,
        id: SubsystemId,
        what: &'static str,
    ) -> Result<&mut SubsystemSlot, SimError> {
        let slot = self.slot_mut(id)?;
        let stage = slot.stage.get();
        if stage >= Stage::Model {
            return Err(SimError::AllocationTooLate {
                subsystem: id,
                what,
                stage,
            });
        }
        Ok(slot)
    }

    /// Clear a slot back to a freshly allocated, `Empty` one.
    pub fn reset_subsystem(&mut self, id: SubsystemId) -> Result<(), SimError> {
        *self.slot_mut(id)? = SubsystemSlot::default();
        Ok(())
    }

    // =========================================================================
    // TIME & STAGES
    // =========================================================================

    /// Current simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Set the simulation time; every slot at or above Time drops to Instance.
    pub fn set_time(&mut self, time: f64) {
        self.time = time;
        self.invalidate_all(Stage::Time);
    }

    /// Stage marker of one slot.
    pub fn subsystem_stage(&self, id: SubsystemId) -> Result<Stage, SimError> {
        Ok(self.slot(id)?.stage.get())
    }

    /// Lowest stage across all slots (`Empty` for a state with no slots).
    #[must_use]
    pub fn system_stage(&self) -> Stage {
        self.slots
            .iter()
            .map(|s| s.stage.get())
            .min()
            .unwrap_or(Stage::Empty)
    }

    /// Advance a slot's marker by exactly one stage.
    pub fn advance_subsystem_to_stage(&self, id: SubsystemId, stage: Stage) -> Result<(), SimError> {
        let slot = self.slot(id)?;
        let current = slot.stage.get();
        if current.next() != Some(stage) {
            return Err(SimError::StageMismatch {
                subsystem: id.to_string(),
                operation: "State::advance_subsystem_to_stage",
                expected: stage.previous_or_empty(),
                actual: current,
            });
        }
        slot.stage.set(stage);
        Ok(())
    }

    /// Drop one slot below `stage` if it has reached it.
    pub fn invalidate_subsystem(&self, id: SubsystemId, stage: Stage) -> Result<(), SimError> {
        self.slot(id)?.invalidate(stage);
        Ok(())
    }

    /// Drop every slot below `stage` if it has reached it.
    pub fn invalidate_all(&self, stage: Stage) {
        for slot in &self.slots {
            slot.invalidate(stage);
        }
    }

    // =========================================================================
    // ALLOCATION
    // =========================================================================

    /// Allocate generalized coordinates; returns the slot-local start index.
    pub fn allocate_q(&mut self, id: SubsystemId, init: &[f64]) -> Result<usize, SimError> {
        let slot = self.allocatable_slot(id, "q")?;
        let start = slot.q.len();
        slot.q.extend_from_slice(init);
        let n = slot.q.len();
        let derived = slot.derived.get_mut();
        derived.qdot.resize(n, 0.0);
        derived.qdotdot.resize(n, 0.0);
        Ok(start)
    }

    /// Allocate generalized speeds; returns the slot-local start index.
    pub fn allocate_u(&mut self, id: SubsystemId, init: &[f64]) -> Result<usize, SimError> {
        let slot = self.allocatable_slot(id, "u")?;
        let start = slot.u.len();
        slot.u.extend_from_slice(init);
        let n = slot.u.len();
        slot.derived.get_mut().udot.resize(n, 0.0);
        Ok(start)
    }

    /// Allocate auxiliary continuous variables; returns the slot-local start index.
    pub fn allocate_z(&mut self, id: SubsystemId, init: &[f64]) -> Result<usize, SimError> {
        let slot = self.allocatable_slot(id, "z")?;
        let start = slot.z.len();
        slot.z.extend_from_slice(init);
        let n = slot.z.len();
        slot.derived.get_mut().zdot.resize(n, 0.0);
        Ok(start)
    }

    /// Allocate position constraint errors.
    pub fn allocate_qerr(&mut self, id: SubsystemId, count: usize) -> Result<usize, SimError> {
        let derived = self.allocatable_slot(id, "qerr")?.derived.get_mut();
        let start = derived.qerr.len();
        derived.qerr.resize(start + count, 0.0);
        Ok(start)
    }

    /// Allocate velocity constraint errors.
    pub fn allocate_uerr(&mut self, id: SubsystemId, count: usize) -> Result<usize, SimError> {
        let derived = self.allocatable_slot(id, "uerr")?.derived.get_mut();
        let start = derived.uerr.len();
        derived.uerr.resize(start + count, 0.0);
        Ok(start)
    }

    /// Allocate acceleration constraint errors. Multipliers grow alongside.
    pub fn allocate_udoterr(&mut self, id: SubsystemId, count: usize) -> Result<usize, SimError> {
        let derived = self.allocatable_slot(id, "udoterr")?.derived.get_mut();
        let start = derived.udoterr.len();
        derived.udoterr.resize(start + count, 0.0);
        derived.multipliers.resize(start + count, 0.0);
        Ok(start)
    }

    /// Allocate a discrete variable whose changes invalidate `stage` and above.
    pub fn allocate_discrete_variable(
        &mut self,
        id: SubsystemId,
        stage: Stage,
        value: Box<dyn Any>,
    ) -> Result<usize, SimError> {
        let slot = self.allocatable_slot(id, "discrete variable")?;
        slot.discrete.push(DiscreteVariable { stage, value });
        Ok(slot.discrete.len() - 1)
    }

    /// Allocate a cache entry depending on `stage`.
    pub fn allocate_cache_entry(
        &mut self,
        id: SubsystemId,
        stage: Stage,
        value: Box<dyn Any>,
    ) -> Result<usize, SimError> {
        let slot = self.allocatable_slot(id, "cache entry")?;
        slot.cache.push(CacheEntry {
            stage,
            value: RefCell::new(value),
        });
        Ok(slot.cache.len() - 1)
    }

    /// Allocate `count` event trigger values evaluated at `stage`.
    /// Returns the start index in that stage's trigger array.
    pub fn allocate_event(
        &mut self,
        id: SubsystemId,
        stage: Stage,
        count: usize,
    ) -> Result<usize, SimError> {
        let events = self.allocatable_slot(id, "event")?.events.get_mut();
        let by_stage = &mut events[stage.index()];
        let start = by_stage.len();
        by_stage.resize(start + count, 0.0);
        Ok(start)
    }

    // =========================================================================
    // CONTINUOUS VARIABLES
    // =========================================================================

    /// Generalized coordinates of one slot.
    pub fn q(&self, id: SubsystemId) -> Result<&[f64], SimError> {
        Ok(&self.slot(id)?.q)
    }

    /// Generalized speeds of one slot.
    pub fn u(&self, id: SubsystemId) -> Result<&[f64], SimError> {
        Ok(&self.slot(id)?.u)
    }

    /// Auxiliary variables of one slot.
    pub fn z(&self, id: SubsystemId) -> Result<&[f64], SimError> {
        Ok(&self.slot(id)?.z)
    }

    /// Mutable q; the slot drops below Position.
    pub fn upd_q(&mut self, id: SubsystemId) -> Result<&mut [f64], SimError> {
        let slot = self.slot_mut(id)?;
        slot.invalidate(Stage::Position);
        Ok(&mut slot.q)
    }

    /// Mutable u; the slot drops below Velocity.
    pub fn upd_u(&mut self, id: SubsystemId) -> Result<&mut [f64], SimError> {
        let slot = self.slot_mut(id)?;
        slot.invalidate(Stage::Velocity);
        Ok(&mut slot.u)
    }

    /// Mutable z; the slot drops below Dynamics.
    pub fn upd_z(&mut self, id: SubsystemId) -> Result<&mut [f64], SimError> {
        let slot = self.slot_mut(id)?;
        slot.invalidate(Stage::Dynamics);
        Ok(&mut slot.z)
    }

    /// Start of this slot's q block in the system-wide q vector.
    pub fn q_start(&self, id: SubsystemId) -> Result<usize, SimError> {
        self.offset(id, |s| s.q.len())
    }

    /// Start of this slot's u block in the system-wide u vector.
    pub fn u_start(&self, id: SubsystemId) -> Result<usize, SimError> {
        self.offset(id, |s| s.u.len())
    }

    /// Start of this slot's z block in the system-wide z vector.
    pub fn z_start(&self, id: SubsystemId) -> Result<usize, SimError> {
        self.offset(id, |s| s.z.len())
    }

    /// Start of this slot's qerr block.
    pub fn qerr_start(&self, id: SubsystemId) -> Result<usize, SimError> {
        self.offset(id, |s| s.derived.borrow().qerr.len())
    }

    /// Start of this slot's uerr block.
    pub fn uerr_start(&self, id: SubsystemId) -> Result<usize, SimError> {
        self.offset(id, |s| s.derived.borrow().uerr.len())
    }

    /// Start of this slot's udoterr block.
    pub fn udoterr_start(&self, id: SubsystemId) -> Result<usize, SimError> {
        self.offset(id, |s| s.derived.borrow().udoterr.len())
    }

    /// Start of this slot's multiplier block.
    pub fn multipliers_start(&self, id: SubsystemId) -> Result<usize, SimError> {
        self.offset(id, |s| s.derived.borrow().multipliers.len())
    }

    fn offset(
        &self,
        id: SubsystemId,
        len: impl Fn(&SubsystemSlot) -> usize,
    ) -> Result<usize, SimError> {
        self.slot(id)?;
        Ok(self.slots[..id.index()].iter().map(len).sum())
    }

    /// Number of q entries in one slot.
    pub fn nq(&self, id: SubsystemId) -> Result<usize, SimError> {
        Ok(self.slot(id)?.q.len())
    }

    /// Number of u entries in one slot.
    pub fn nu(&self, id: SubsystemId) -> Result<usize, SimError> {
        Ok(self.slot(id)?.u.len())
    }

    /// Number of z entries in one slot.
    pub fn nz(&self, id: SubsystemId) -> Result<usize, SimError> {
        Ok(self.slot(id)?.z.len())
    }

    /// Number of position constraint errors in one slot.
    pub fn nqerr(&self, id: SubsystemId) -> Result<usize, SimError> {
        Ok(self.slot(id)?.derived.borrow().qerr.len())
    }

    /// Number of velocity constraint errors in one slot.
    pub fn nuerr(&self, id: SubsystemId) -> Result<usize, SimError> {
        Ok(self.slot(id)?.derived.borrow().uerr.len())
    }

    /// Number of acceleration constraint errors in one slot.
    pub fn nudoterr(&self, id: SubsystemId) -> Result<usize, SimError> {
        Ok(self.slot(id)?.derived.borrow().udoterr.len())
    }

    /// Number of Lagrange multipliers in one slot.
    pub fn nmultipliers(&self, id: SubsystemId) -> Result<usize, SimError> {
        Ok(self.slot(id)?.derived.borrow().multipliers.len())
    }

    // =========================================================================
    // DERIVED CACHE
    // =========================================================================

    fn derived(
        &self,
        id: SubsystemId,
        select: fn(&DerivedCache) -> &Vec<f64>,
    ) -> Result<Ref<'_, [f64]>, SimError> {
        let slot = self.slot(id)?;
        Ok(Ref::map(slot.derived.borrow(), |d| select(d).as_slice()))
    }

    fn derived_mut(
        &self,
        id: SubsystemId,
        select: fn(&mut DerivedCache) -> &mut Vec<f64>,
    ) -> Result<RefMut<'_, [f64]>, SimError> {
        let slot = self.slot(id)?;
        Ok(RefMut::map(slot.derived.borrow_mut(), |d| {
            select(d).as_mut_slice()
        }))
    }

    pub fn qdot(&self, id: SubsystemId) -> Result<Ref<'_, [f64]>, SimError> {
        self.derived(id, |d| &d.qdot)
    }

    pub fn udot(&self, id: SubsystemId) -> Result<Ref<'_, [f64]>, SimError> {
        self.derived(id, |d| &d.udot)
    }

    pub fn zdot(&self, id: SubsystemId) -> Result<Ref<'_, [f64]>, SimError> {
        self.derived(id, |d| &d.zdot)
    }

    pub fn qdotdot(&self, id: SubsystemId) -> Result<Ref<'_, [f64]>, SimError> {
        self.derived(id, |d| &d.qdotdot)
    }

    pub fn qerr(&self, id: SubsystemId) -> Result<Ref<'_, [f64]>, SimError> {
        self.derived(id, |d| &d.qerr)
    }

    pub fn uerr(&self, id: SubsystemId) -> Result<Ref<'_, [f64]>, SimError> {
        self.derived(id, |d| &d.uerr)
    }

    pub fn udoterr(&self, id: SubsystemId) -> Result<Ref<'_, [f64]>, SimError> {
        self.derived(id, |d| &d.udoterr)
    }

    pub fn multipliers(&self, id: SubsystemId) -> Result<Ref<'_, [f64]>, SimError> {
        self.derived(id, |d| &d.multipliers)
    }

    pub fn upd_qdot(&self, id: SubsystemId) -> Result<RefMut<'_, [f64]>, SimError> {
        self.derived_mut(id, |d| &mut d.qdot)
    }

    pub fn upd_udot(&self, id: SubsystemId) -> Result<RefMut<'_, [f64]>, SimError> {
        self.derived_mut(id, |d| &mut d.udot)
    }

    pub fn upd_zdot(&self, id: SubsystemId) -> Result<RefMut<'_, [f64]>, SimError> {
        self.derived_mut(id, |d| &mut d.zdot)
    }

    pub fn upd_qdotdot(&self, id: SubsystemId) -> Result<RefMut<'_, [f64]>, SimError> {
        self.derived_mut(id, |d| &mut d.qdotdot)
    }

    pub fn upd_qerr(&self, id: SubsystemId) -> Result<RefMut<'_, [f64]>, SimError> {
        self.derived_mut(id, |d| &mut d.qerr)
    }

    pub fn upd_uerr(&self, id: SubsystemId) -> Result<RefMut<'_, [f64]>, SimError> {
        self.derived_mut(id, |d| &mut d.uerr)
    }

    pub fn upd_udoterr(&self, id: SubsystemId) -> Result<RefMut<'_, [f64]>, SimError> {
        self.derived_mut(id, |d| &mut d.udoterr)
    }

    pub fn upd_multipliers(&self, id: SubsystemId) -> Result<RefMut<'_, [f64]>, SimError> {
        self.derived_mut(id, |d| &mut d.multipliers)
    }

    // =========================================================================
    // DISCRETE VARIABLES & CACHE ENTRIES
    // =========================================================================

    /// Read a discrete variable as `T`.
    pub fn discrete_variable<T: Any>(&self, id: SubsystemId, index: usize) -> Result<&T, SimError> {
        let var = self
            .slot(id)?
            .discrete
            .get(index)
            .ok_or(SimError::IndexOutOfRange {
                subsystem: id,
                what: "discrete variable",
                index,
            })?;
        var.value
            .downcast_ref::<T>()
            .ok_or(SimError::TypeMismatch {
                subsystem: id,
                what: "discrete variable",
                index,
            })
    }

    /// Mutable discrete variable; the slot drops below the variable's stage.
    pub fn upd_discrete_variable<T: Any>(
        &mut self,
        id: SubsystemId,
        index: usize,
    ) -> Result<&mut T, SimError> {
        let slot = self.slot_mut(id)?;
        let stage = slot
            .discrete
            .get(index)
            .map(|v| v.stage)
            .ok_or(SimError::IndexOutOfRange {
                subsystem: id,
                what: "discrete variable",
                index,
            })?;
        slot.invalidate(stage);
        slot.discrete[index]
            .value
            .downcast_mut::<T>()
            .ok_or(SimError::TypeMismatch {
                subsystem: id,
                what: "discrete variable",
                index,
            })
    }

    fn cache_slot(&self, id: SubsystemId, index: usize) -> Result<&CacheEntry, SimError> {
        self.slot(id)?
            .cache
            .get(index)
            .ok_or(SimError::IndexOutOfRange {
                subsystem: id,
                what: "cache entry",
                index,
            })
    }

    /// Stage a cache entry depends on.
    pub fn cache_entry_stage(&self, id: SubsystemId, index: usize) -> Result<Stage, SimError> {
        Ok(self.cache_slot(id, index)?.stage)
    }

    /// Read a cache entry as `T`.
    pub fn cache_entry<T: Any>(&self, id: SubsystemId, index: usize) -> Result<Ref<'_, T>, SimError> {
        let entry = self.cache_slot(id, index)?;
        Ref::filter_map(entry.value.borrow(), |v| (**v).downcast_ref::<T>()).map_err(|_| {
            SimError::TypeMismatch {
                subsystem: id,
                what: "cache entry",
                index,
            }
        })
    }

    /// Write a cache entry through a shared state.
    pub fn upd_cache_entry<T: Any>(
        &self,
        id: SubsystemId,
        index: usize,
    ) -> Result<RefMut<'_, T>, SimError> {
        let entry = self.cache_slot(id, index)?;
        RefMut::filter_map(entry.value.borrow_mut(), |v| (**v).downcast_mut::<T>()).map_err(
            |_| SimError::TypeMismatch {
                subsystem: id,
                what: "cache entry",
                index,
            },
        )
    }

    // =========================================================================
    // EVENT TRIGGER VALUES
    // =========================================================================

    /// Trigger values of one slot evaluated at `stage`.
    pub fn events_by_stage(&self, id: SubsystemId, stage: Stage) -> Result<Ref<'_, [f64]>, SimError> {
        let slot = self.slot(id)?;
        Ok(Ref::map(slot.events.borrow(), |e| e[stage.index()].as_slice()))
    }

    /// Writable trigger values of one slot evaluated at `stage`.
    pub fn upd_events_by_stage(
        &self,
        id: SubsystemId,
        stage: Stage,
    ) -> Result<RefMut<'_, [f64]>, SimError> {
        let slot = self.slot(id)?;
        Ok(RefMut::map(slot.events.borrow_mut(), |e| {
            e[stage.index()].as_mut_slice()
        }))
    }
}

// =============================================================================
// TESTS
// =============================================================================
