//! # Stage Ladder
//!
//! The fixed, totally ordered sequence of computation stages every subsystem
//! passes through in a given state.
//!
//! ## Stage Definitions
//!
//! | Stage | Computed here |
//! |-------|---------------|
//! | Empty | nothing; freshly allocated slot |
//! | Topology | permanent allocations (q/u/z slots, cache entries) |
//! | Model | modeling choices, event ids |
//! | Instance | instance parameters |
//! | Time | time-dependent quantities |
//! | Position | kinematics from q |
//! | Velocity | kinematics from u |
//! | Dynamics | forces |
//! | Acceleration | udot, qdotdot, multipliers |
//! | Report | output-only quantities |
//!
//! The ladder carries no logic beyond ordering; the realize state machine in
//! [`crate::subsystem`] is what enforces it.

use serde::{Deserialize, Serialize};

// =============================================================================
// STAGE ENUM
// =============================================================================

/// One rung of the computation ladder.
///
/// Declaration order is the total order: `Empty < Topology < … < Report`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Stage {
    #[default]
    Empty,
    Topology,
    Model,
    Instance,
    Time,
    Position,
    Velocity,
    Dynamics,
    Acceleration,
    Report,
}

impl Stage {
    /// Every stage, lowest first.
    pub const ALL: [Stage; 10] = [
        Stage::Empty,
        Stage::Topology,
        Stage::Model,
        Stage::Instance,
        Stage::Time,
        Stage::Position,
        Stage::Velocity,
        Stage::Dynamics,
        Stage::Acceleration,
        Stage::Report,
    ];

    /// Number of stages on the ladder.
    pub const COUNT: usize = Self::ALL.len();

    /// The first stage that can be realized through a read-only state.
    pub const LOWEST_RUNTIME: Stage = Stage::Instance;

    /// The highest valid stage; also "nothing was invalidated" for event handlers.
    pub const HIGHEST: Stage = Stage::Report;

    /// Get the stage name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Empty => "Empty",
            Stage::Topology => "Topology",
            Stage::Model => "Model",
            Stage::Instance => "Instance",
            Stage::Time => "Time",
            Stage::Position => "Position",
            Stage::Velocity => "Velocity",
            Stage::Dynamics => "Dynamics",
            Stage::Acceleration => "Acceleration",
            Stage::Report => "Report",
        }
    }

    /// Position of this stage on the ladder (`Empty` is 0).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Get the next stage, if any.
    #[must_use]
    pub fn next(&self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Get the previous stage, if any.
    #[must_use]
    pub fn previous(&self) -> Option<Stage> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Previous stage, saturating at `Empty`.
    #[must_use]
    pub fn previous_or_empty(&self) -> Stage {
        self.previous().unwrap_or(Stage::Empty)
    }

    /// Strictly lower on the ladder than `other`.
    #[must_use]
    pub fn precedes(&self, other: Stage) -> bool {
        *self < other
    }

    /// At or above `other` on the ladder.
    #[must_use]
    pub fn is_at_least(&self, other: Stage) -> bool {
        *self >= other
    }

    /// Check if this stage is terminal (Report).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Report)
    }

    /// Stages strictly above `self` up to and including `target`.
    pub fn up_to(self, target: Stage) -> impl Iterator<Item = Stage> {
        Self::ALL
            .into_iter()
            .filter(move |g| *g > self && *g <= target)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// TESTS
// =============================================================================
