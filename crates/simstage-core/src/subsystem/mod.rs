//! # Subsystem Handles
//!
//! A [`Subsystem`] is a handle that owns at most one [`SubsystemBody`].
//! The body carries the shared realization machinery; the variant-specific
//! behavior lives behind the body's [`SubsystemGuts`] operation table.
//!
//! ## Ownership
//!
//! - Exactly one handle owns a body; dropping the handle runs the body's
//!   teardown hook.
//! - Cloning a handle clones the body polymorphically. The clone is not in
//!   any system and must have its topology realized again.
//! - The body knows its containing system only through a shared link, so
//!   there is no pointer back to the owning handle.

pub mod body;
pub mod guts;

pub use body::SubsystemBody;
pub use guts::{AsAny, SubsystemGuts};

use crate::SimError;
use std::any::Any;

/// Owning handle for a polymorphic subsystem body.
#[derive(Debug, Default, Clone)]
pub struct Subsystem {
    body: Option<Box<SubsystemBody>>,
}

impl Subsystem {
    /// A handle with no body.
    #[must_use]
    pub fn empty() -> Self {
        Self { body: None }
    }

    /// Take ownership of `body`.
    #[must_use]
    pub fn new(body: SubsystemBody) -> Self {
        Self {
            body: Some(Box::new(body)),
        }
    }

    /// Shorthand for `Subsystem::new(SubsystemBody::new(..))`.
    #[must_use]
    pub fn from_guts<G: SubsystemGuts + 'static>(
        name: impl Into<String>,
        version: impl Into<String>,
        guts: G,
    ) -> Self {
        Self::new(SubsystemBody::new(name, version, guts))
    }

    /// Give an empty handle a body.
    pub fn adopt(&mut self, body: SubsystemBody) -> Result<(), SimError> {
        if self.body.is_some() {
            return Err(SimError::HandleInUse {
                operation: "Subsystem::adopt",
            });
        }
        self.body = Some(Box::new(body));
        Ok(())
    }

    /// True if the handle owns no body.
    #[must_use]
    pub fn is_empty_handle(&self) -> bool {
        self.body.is_none()
    }

    /// True if both handles own the very same body.
    ///
    /// Only one handle can own a body, so this is true only for a handle
    /// compared with itself.
    #[must_use]
    pub fn is_same_subsystem(&self, other: &Subsystem) -> bool {
        match (&self.body, &other.body) {
            (Some(a), Some(b)) => std::ptr::eq(a.as_ref(), b.as_ref()),
            _ => false,
        }
    }

    /// Borrow the body.
    pub fn body(&self) -> Result<&SubsystemBody, SimError> {
        self.body.as_deref().ok_or(SimError::EmptyHandle {
            operation: "Subsystem::body",
        })
    }

    /// Mutably borrow the body.
    pub fn body_mut(&mut self) -> Result<&mut SubsystemBody, SimError> {
        self.body.as_deref_mut().ok_or(SimError::EmptyHandle {
            operation: "Subsystem::body_mut",
        })
    }

    pub fn name(&self) -> Result<&str, SimError> {
        Ok(self.body()?.name())
    }

    pub fn version(&self) -> Result<&str, SimError> {
        Ok(self.body()?.version())
    }

    /// True if the handle owns a body that has been adopted by a system.
    #[must_use]
    pub fn is_in_system(&self) -> bool {
        self.body.as_ref().is_some_and(|b| b.is_in_system())
    }

    /// Downcast the body's operation table.
    pub fn guts_as<T: Any>(&self) -> Result<Option<&T>, SimError> {
        Ok(self.body()?.guts_as::<T>())
    }

    /// Mutably downcast the body's operation table.
    pub fn guts_as_mut<T: Any>(&mut self) -> Result<Option<&mut T>, SimError> {
        Ok(self.body_mut()?.guts_as_mut::<T>())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{Stage, State, SubsystemId, System};
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Default)]
    struct Counter {
        gain: f64,
        destructed: Rc<Cell<usize>>,
    }

    impl SubsystemGuts for Counter {
        fn clone_guts(&self) -> Box<dyn SubsystemGuts> {
            Box::new(self.clone())
        }

        fn destruct(&mut self) {
            self.destructed.set(self.destructed.get() + 1);
        }

        fn realize_topology(&self, body: &SubsystemBody, state: &mut State) -> Result<(), SimError> {
            body.allocate_q(state, &[self.gain])?;
            Ok(())
        }
    }

    #[test]
    fn empty_handle_reports_errors() {
        let handle = Subsystem::empty();
        assert!(handle.is_empty_handle());
        assert!(matches!(handle.body(), Err(SimError::EmptyHandle { .. })));
        assert!(!handle.is_same_subsystem(&Subsystem::empty()));
    }

    #[test]
    fn adopt_twice_fails() {
        let mut handle = Subsystem::empty();
        handle
            .adopt(SubsystemBody::new("counter", "1.0", Counter::default()))
            .unwrap();
        let err = handle
            .adopt(SubsystemBody::new("counter", "1.0", Counter::default()))
            .unwrap_err();
        assert!(matches!(err, SimError::HandleInUse { .. }));
    }

    #[test]
    fn same_subsystem_only_for_itself() {
        let a = Subsystem::from_guts("counter", "1.0", Counter::default());
        let b = a.clone();
        assert!(a.is_same_subsystem(&a));
        assert!(!a.is_same_subsystem(&b));
    }

    #[test]
    fn clone_is_unbound_and_needs_topology() {
        let mut system = System::new("sys", "1");
        let id = system
            .adopt_subsystem(Subsystem::from_guts(
                "counter",
                "1.0",
                Counter {
                    gain: 2.5,
                    ..Counter::default()
                },
            ))
            .unwrap();
        let state = system.realize_topology().unwrap();
        let original = system.subsystem(id).unwrap();
        assert!(original.body().unwrap().topology_has_been_realized());
        assert_eq!(state.q(id).unwrap(), &[2.5]);

        let copy = original.clone();
        let body = copy.body().unwrap();
        assert!(!body.is_in_system());
        assert!(!body.topology_has_been_realized());
        assert_eq!(body.guts_as::<Counter>().unwrap().gain, 2.5);
        assert!(matches!(
            body.subsystem_id(),
            Err(SimError::NotInSystem { .. })
        ));
    }

    #[test]
    fn dropping_handle_runs_teardown_once() {
        let destructed = Rc::new(Cell::new(0));
        let handle = Subsystem::from_guts(
            "counter",
            "1.0",
            Counter {
                gain: 1.0,
                destructed: Rc::clone(&destructed),
            },
        );
        let copy = handle.clone();
        drop(handle);
        assert_eq!(destructed.get(), 1);
        drop(copy);
        assert_eq!(destructed.get(), 2);
    }

    #[test]
    fn guts_downcast_through_handle() {
        let mut handle = Subsystem::from_guts("counter", "1.0", Counter::default());
        handle.guts_as_mut::<Counter>().unwrap().unwrap().gain = 4.0;
        assert_eq!(handle.guts_as::<Counter>().unwrap().unwrap().gain, 4.0);
        assert!(handle.guts_as::<u32>().unwrap().is_none());
        assert_eq!(handle.name().unwrap(), "counter");
        assert_eq!(handle.version().unwrap(), "1.0");
    }

    #[test]
    fn adopted_body_shares_system_with_registry() {
        let mut system = System::new("sys", "1");
        let id = system
            .adopt_subsystem(Subsystem::from_guts("counter", "1.0", Counter::default()))
            .unwrap();
        assert_eq!(id, SubsystemId(1));
        let body = system.subsystem(id).unwrap().body().unwrap();
        assert!(body.is_in_system());
        assert!(body.is_in_same_system(system.subsystem(SubsystemId(0)).unwrap().body().unwrap()));
        assert_eq!(body.stage(&State::with_subsystems(2)).unwrap(), Stage::Empty);
    }
}
