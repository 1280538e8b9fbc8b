use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};

use log::warn;

use crate::{dispatch::InterceptionContext, host::Transform, tracker::ModifierKey};

/// Decides whether a pending mutation is suppressed.
///
/// Receives the pending context and the entity the mutator is invoked on.
pub type SkipPredicate = Arc<dyn Fn(&InterceptionContext, &dyn Transform) -> bool + Send + Sync>;

/// Registered skip predicates and the modifier denylist.
///
/// A pending mutation is skipped if its (caller, calling method) pair is denylisted or if any
/// predicate returns `true`. Predicates are evaluated in registration order and evaluation
/// stops at the first `true`; predicates must not depend on each other.
#[derive(Default)]
pub struct SkipRegistry {
    predicates: RwLock<Vec<SkipPredicate>>,
    denylist: RwLock<HashSet<ModifierKey>>,
}

impl SkipRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        SkipRegistry::default()
    }

    /// Registers `predicate` and returns it for later removal.
    pub fn add_predicate(&self, predicate: SkipPredicate) -> SkipPredicate {
        write_lock!(self.predicates).push(predicate.clone());
        predicate
    }

    /// Removes a predicate previously returned by [`SkipRegistry::add_predicate`].
    ///
    /// Predicates are compared by identity. Returns `false` if it was not registered.
    pub fn remove_predicate(&self, predicate: &SkipPredicate) -> bool {
        let mut predicates = write_lock!(self.predicates);
        match predicates.iter().position(|p| Arc::ptr_eq(p, predicate)) {
            Some(index) => {
                predicates.remove(index);
                true
            }
            None => {
                warn!("Attempted to remove a skip predicate that is not registered");
                false
            }
        }
    }

    /// Suppresses every mutation performed by `modifier`.
    pub fn add_modifier_to_denylist(&self, modifier: ModifierKey) -> bool {
        write_lock!(self.denylist).insert(modifier)
    }

    /// Lifts the suppression of `modifier`.
    pub fn remove_modifier_from_denylist(&self, modifier: &ModifierKey) -> bool {
        write_lock!(self.denylist).remove(modifier)
    }

    /// Returns `true` if `modifier` is denylisted.
    #[must_use]
    pub fn is_modifier_denied(&self, modifier: &ModifierKey) -> bool {
        read_lock!(self.denylist).contains(modifier)
    }

    /// Number of registered predicates.
    #[must_use]
    pub fn predicate_count(&self) -> usize {
        read_lock!(self.predicates).len()
    }

    /// Decides whether the mutation described by `context` is suppressed.
    pub fn should_skip(&self, context: &InterceptionContext, receiver: &dyn Transform) -> bool {
        if self.is_modifier_denied(&ModifierKey::from_context(context)) {
            return true;
        }

        // Evaluate outside the lock, predicates may (un)register other predicates.
        let predicates = read_lock!(self.predicates).clone();
        predicates.iter().any(|predicate| predicate(context, receiver))
    }

    /// Removes every predicate and denylist entry.
    pub fn clear(&self) {
        write_lock!(self.predicates).clear();
        write_lock!(self.denylist).clear();
    }
}
