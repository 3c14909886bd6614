//! # simstage-core
//!
//! Staged realization engine for multibody-style simulation systems.
//!
//! This crate implements the CORE of a simulation system: the machinery that
//! decides in what order, and how redundantly, each subsystem's contribution
//! to a state is computed and cached.
//!
//! ## Architecture
//!
//! - `system::Stage` - the fixed ladder every subsystem climbs per state
//! - `subsystem` - owning handles over polymorphic bodies, plus the
//!   staged realize state machine
//! - `events` - the default subsystem: event id minting, owner routing,
//!   next-event search and cause-isolated dispatch
//! - `state` - the per-state slots subsystems allocate into
//!
//! ## Architectural Constraints
//!
//! - Single-threaded and synchronous: every operation runs to completion
//! - Caches reached through `&State` use interior mutability, never locks
//! - Calling a later realize before an earlier one completes is a detected
//!   error, never silent corruption
//! - No I/O beyond loading an optional TOML configuration

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod events;
pub mod logging;
pub mod primitives;
pub mod state;
pub mod subsystem;
pub mod system;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    DecorativeGeometry, EventCause, EventId, EventOutcome, EventTriggerInfo, NextScheduledEvent,
    SimError, SubsystemId,
};

// =============================================================================
// RE-EXPORTS: Realization Engine
// =============================================================================

pub use state::State;
pub use subsystem::{AsAny, Subsystem, SubsystemBody, SubsystemGuts};
pub use system::{Stage, System};

// =============================================================================
// RE-EXPORTS: Events
// =============================================================================

pub use events::{
    DefaultSubsystem, EventRegistry, PeriodicEventHandler, PeriodicEventReporter,
    PeriodicSchedule, ScheduledEventHandler, ScheduledEventReporter, TriggeredEventHandler,
    TriggeredEventReporter,
};

// =============================================================================
// RE-EXPORTS: Configuration
// =============================================================================

pub use config::{ConfigError, EventsConfig, LogFormat, LoggingConfig, SystemConfig, SystemSection};
