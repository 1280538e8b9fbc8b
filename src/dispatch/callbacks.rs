use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use log::warn;

use crate::{
    dispatch::InterceptionContext,
    host::EntityId,
    mutators::ChangeKind,
    value::{Quaternion, TransformValue, Vector3},
    Error, Result,
};

/// Receives committed vector values (position, scale).
pub type Vector3Handler = Arc<dyn Fn(&InterceptionContext, Vector3) + Send + Sync>;

/// Receives committed rotation values.
pub type QuaternionHandler = Arc<dyn Fn(&InterceptionContext, Quaternion) + Send + Sync>;

/// Handle of a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

/// A callback, typed by the value it accepts.
#[derive(Clone)]
pub enum CallbackHandler {
    /// Accepts [`TransformValue::Vector3`]
    Vector3(Vector3Handler),
    /// Accepts [`TransformValue::Quaternion`]
    Quaternion(QuaternionHandler),
}

impl CallbackHandler {
    fn call(&self, context: &InterceptionContext, value: TransformValue) -> Result<()> {
        match (self, value) {
            (CallbackHandler::Vector3(handler), TransformValue::Vector3(v)) => handler(context, v),
            (CallbackHandler::Quaternion(handler), TransformValue::Quaternion(q)) => {
                handler(context, q);
            }
            (_, value) => {
                return Err(Error::MissingHandler {
                    kind: context.kind,
                    value_type: value.type_name(),
                })
            }
        }
        Ok(())
    }
}

/// A callback registered for one entity and change kind.
#[derive(Clone)]
pub struct InterceptedCallback {
    /// Registration handle
    pub id: CallbackId,
    /// Change kind the callback listens to
    pub kind: ChangeKind,
    /// The handler
    pub handler: CallbackHandler,
}

impl fmt::Debug for InterceptedCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedCallback")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Per-entity callbacks invoked when an interception completes.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    next_id: AtomicU64,
    by_entity: DashMap<EntityId, Vec<InterceptedCallback>>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        CallbackRegistry::default()
    }

    /// Registers a position callback for `entity`.
    pub fn register_position(&self, entity: EntityId, handler: Vector3Handler) -> CallbackId {
        self.register(entity, ChangeKind::Position, CallbackHandler::Vector3(handler))
    }

    /// Registers a rotation callback for `entity`.
    pub fn register_rotation(&self, entity: EntityId, handler: QuaternionHandler) -> CallbackId {
        self.register(entity, ChangeKind::Rotation, CallbackHandler::Quaternion(handler))
    }

    /// Registers a scale callback for `entity`.
    pub fn register_scale(&self, entity: EntityId, handler: Vector3Handler) -> CallbackId {
        self.register(entity, ChangeKind::Scale, CallbackHandler::Vector3(handler))
    }

    /// Registers `handler` for changes of `kind` on `entity`.
    ///
    /// Registering a second callback for the same entity and kind is allowed but logged, as it
    /// usually means an entity was tracked twice.
    pub fn register(&self, entity: EntityId, kind: ChangeKind, handler: CallbackHandler) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut callbacks = self.by_entity.entry(entity).or_default();
        if callbacks.iter().any(|c| c.kind == kind) {
            warn!("Entity {entity} already has a {kind} callback, adding another one");
        }
        callbacks.push(InterceptedCallback { id, kind, handler });
        id
    }

    /// Removes the callback with the given handle. Returns `false` if it does not exist.
    pub fn remove(&self, id: CallbackId) -> bool {
        let mut removed = false;
        let mut emptied = None;

        for mut entry in self.by_entity.iter_mut() {
            let before = entry.len();
            entry.retain(|c| c.id != id);
            if entry.len() != before {
                removed = true;
                if entry.is_empty() {
                    emptied = Some(*entry.key());
                }
                break;
            }
        }

        if let Some(entity) = emptied {
            self.by_entity.remove_if(&entity, |_, callbacks| callbacks.is_empty());
        }
        removed
    }

    /// Removes every callback of `entity`, returning how many were removed.
    pub fn remove_entity(&self, entity: EntityId) -> usize {
        self.by_entity
            .remove(&entity)
            .map_or(0, |(_, callbacks)| callbacks.len())
    }

    /// Snapshot of the callbacks registered for `entity`.
    #[must_use]
    pub fn callbacks_for(&self, entity: EntityId) -> Vec<InterceptedCallback> {
        self.by_entity
            .get(&entity)
            .map(|callbacks| callbacks.clone())
            .unwrap_or_default()
    }

    /// Invokes every callback of `entity` registered for the context's change kind.
    ///
    /// Handlers run after the registry lock is released, so they may register or remove
    /// callbacks themselves. Returns the number of handlers invoked.
    ///
    /// # Errors
    /// Returns [`Error::MissingHandler`] if a matching callback cannot accept `value`.
    pub fn invoke(
        &self,
        entity: EntityId,
        context: &InterceptionContext,
        value: TransformValue,
    ) -> Result<usize> {
        let callbacks = self.callbacks_for(entity);
        let mut invoked = 0;
        for callback in callbacks.iter().filter(|c| c.kind == context.kind) {
            callback.handler.call(context, value)?;
            invoked += 1;
        }
        Ok(invoked)
    }

    /// Number of entities with at least one callback.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    /// Removes every callback.
    pub fn clear(&self) {
        self.by_entity.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test::pending_context;

    #[test]
    fn invokes_matching_kind_only() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        registry.register_position(
            EntityId(1),
            Arc::new(move |_: &InterceptionContext, v: Vector3| {
                sink.lock().unwrap().push(("position", v));
            }),
        );
        let sink = seen.clone();
        registry.register_scale(
            EntityId(1),
            Arc::new(move |_: &InterceptionContext, v: Vector3| {
                sink.lock().unwrap().push(("scale", v));
            }),
        );

        let context = pending_context(None, "Game.Mover.Update()");
        let invoked = registry
            .invoke(EntityId(1), &context, TransformValue::Vector3(Vector3::ONE))
            .unwrap();

        assert_eq!(invoked, 1);
        assert_eq!(*seen.lock().unwrap(), vec![("position", Vector3::ONE)]);
        assert_eq!(
            registry
                .invoke(EntityId(2), &context, TransformValue::Vector3(Vector3::ONE))
                .unwrap(),
            0
        );
    }

    #[test]
    fn variant_mismatch_is_missing_handler() {
        let registry = CallbackRegistry::new();
        registry.register_position(EntityId(1), Arc::new(|_: &InterceptionContext, _: Vector3| {}));

        let context = pending_context(None, "Game.Mover.Update()");
        let result = registry.invoke(
            EntityId(1),
            &context,
            TransformValue::Quaternion(Quaternion::IDENTITY),
        );
        assert!(matches!(
            result,
            Err(Error::MissingHandler {
                kind: ChangeKind::Position,
                value_type: "Quaternion"
            })
        ));
    }

    #[test]
    fn duplicates_are_kept_and_removable() {
        let registry = CallbackRegistry::new();
        let first = registry.register_position(EntityId(1), Arc::new(|_: &InterceptionContext, _: Vector3| {}));
        let second = registry.register_position(EntityId(1), Arc::new(|_: &InterceptionContext, _: Vector3| {}));
        assert_ne!(first, second);
        assert_eq!(registry.callbacks_for(EntityId(1)).len(), 2);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert!(registry.remove(second));
        assert_eq!(registry.entity_count(), 0);
    }

    #[test]
    fn handlers_may_reenter_registry() {
        let registry = Arc::new(CallbackRegistry::new());
        let inner = registry.clone();
        registry.register_position(
            EntityId(1),
            Arc::new(move |_: &InterceptionContext, _: Vector3| {
                inner.register_scale(
                    EntityId(1),
                    Arc::new(|_: &InterceptionContext, _: Vector3| {}),
                );
            }),
        );

        let context = pending_context(None, "Game.Mover.Update()");
        registry
            .invoke(EntityId(1), &context, TransformValue::Vector3(Vector3::ZERO))
            .unwrap();
        assert_eq!(registry.callbacks_for(EntityId(1)).len(), 2);
    }
}
