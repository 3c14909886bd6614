//! # Primitives
//!
//! Hardcoded runtime constants for the simstage CORE.
//!
//! These values are compiled in and are immutable at runtime. Anything a
//! deployment is expected to tune lives in [`crate::config`] instead.

use crate::SubsystemId;

/// Slot reserved for the event registry in every system.
///
/// The registry is adopted first by `System::new`, so it always owns slot 0
/// and is realized before every other subsystem at each stage.
pub const DEFAULT_SUBSYSTEM_ID: SubsystemId = SubsystemId(0);

/// Name under which the event registry identifies itself in diagnostics.
pub const DEFAULT_SUBSYSTEM_NAME: &str = "DefaultSystemSubsystem";

/// Version string reported by the event registry.
pub const DEFAULT_SUBSYSTEM_VERSION: &str = "0.0.1";

/// `"name version"` of the event registry.
#[must_use]
pub fn default_subsystem_label() -> String {
    format!("{DEFAULT_SUBSYSTEM_NAME} {DEFAULT_SUBSYSTEM_VERSION}")
}

/// Neutral unit weight / tolerance.
///
/// Default weighting treats every q, u, z, qerr and uerr entry alike.
pub const NEUTRAL_UNIT_WEIGHT: f64 = 1.0;

/// Localization window assigned to trigger info that leaves it unset.
pub const DEFAULT_LOCALIZATION_WINDOW: f64 = 0.1;

/// Accuracy handed to event handlers when the caller supplies none.
pub const DEFAULT_EVENT_ACCURACY: f64 = 1e-3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_owns_first_slot() {
        assert_eq!(DEFAULT_SUBSYSTEM_ID, SubsystemId(0));
    }

    #[test]
    fn registry_label_joins_name_and_version() {
        assert_eq!(default_subsystem_label(), "DefaultSystemSubsystem 0.0.1");
    }

    #[test]
    fn neutral_weight_is_one() {
        assert_eq!(NEUTRAL_UNIT_WEIGHT, 1.0);
    }
}
