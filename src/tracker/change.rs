use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, Weak},
};

use crate::{
    dispatch::InterceptionContext,
    host::{EntityId, EntityRef},
    mutators::ChangeKind,
    value::{Object, TransformValue},
};

/// One committed interception of a tracked entity.
///
/// Records are immutable once created. Each record links to the previous record of the same
/// kind for the same entity. The link is weak and only serves navigation: the store frees
/// evicted frames lazily, so an evicted predecessor may stay reachable for a while. The
/// predecessor's frame and new value are copied into the record when it is created, and
/// [`ChangeRecord::is_mismatch_with_previous`] only looks at that copy.
pub struct ChangeRecord {
    /// The modified entity
    pub entity: EntityRef,
    /// Entity whose method performed the call, `None` for static callers
    pub caller: Option<EntityRef>,
    /// Full name of the method containing the call-site
    pub calling_method: String,
    /// Full name of the intercepted mutator
    pub mutator: String,
    /// The boxed arguments of the mutator call
    pub arguments: Vec<Object>,
    /// Field that was written
    pub kind: ChangeKind,
    /// Value after the call
    pub new_value: TransformValue,
    /// Value before the call
    pub value_before: TransformValue,
    /// Frame in which the change was observed
    pub frame: u64,
    /// `true` if the original call was suppressed
    pub was_skipped: bool,
    previous: Option<Weak<ChangeRecord>>,
    previous_frame: Option<u64>,
    previous_new_value: Option<TransformValue>,
}

impl ChangeRecord {
    /// Builds a record from a completed interception.
    pub(crate) fn from_context(
        entity: EntityRef,
        context: &InterceptionContext,
        new_value: TransformValue,
        frame: u64,
        previous: Option<&Arc<ChangeRecord>>,
    ) -> Self {
        ChangeRecord {
            entity,
            caller: context.caller.clone(),
            calling_method: context.calling_method.clone(),
            mutator: context.mutator.clone(),
            arguments: context.arguments.clone(),
            kind: context.kind,
            new_value,
            value_before: context.value_before,
            frame,
            was_skipped: context.was_skipped(),
            previous: previous.map(Arc::downgrade),
            previous_frame: previous.map(|p| p.frame),
            previous_new_value: previous.map(|p| p.new_value),
        }
    }

    /// The previous record of the same kind for the same entity, if it is still alive.
    ///
    /// A predecessor in an evicted frame may still resolve until the store releases it.
    #[must_use]
    pub fn previous_same_kind(&self) -> Option<Arc<ChangeRecord>> {
        self.previous.as_ref().and_then(Weak::upgrade)
    }

    /// Frame of the previous record of the same kind, evicted or not.
    #[must_use]
    pub fn previous_frame(&self) -> Option<u64> {
        self.previous_frame
    }

    /// New value of the previous record of the same kind, evicted or not.
    #[must_use]
    pub fn previous_new_value(&self) -> Option<TransformValue> {
        self.previous_new_value
    }

    /// Returns `true` if the field changed between the previous record and this one without
    /// being intercepted, i.e. the previous new value differs from this record's value before.
    #[must_use]
    pub fn is_mismatch_with_previous(&self) -> bool {
        self.previous_new_value
            .is_some_and(|previous| previous != self.value_before)
    }

    /// The modifier that performed this change.
    #[must_use]
    pub fn modifier_key(&self) -> ModifierKey {
        ModifierKey::new(self.caller.as_ref().map(|c| c.id()), &self.calling_method)
    }
}

impl fmt::Debug for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRecord")
            .field("entity", &self.entity.id())
            .field("caller", &self.caller.as_ref().map(|c| c.id()))
            .field("calling_method", &self.calling_method)
            .field("mutator", &self.mutator)
            .field("kind", &self.kind)
            .field("value_before", &self.value_before)
            .field("new_value", &self.new_value)
            .field("frame", &self.frame)
            .field("was_skipped", &self.was_skipped)
            .finish_non_exhaustive()
    }
}

/// Identifies a modifier: the calling entity and the calling method.
///
/// This is the comparison-only form used by the skip denylist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModifierKey {
    /// Identity of the calling entity, `None` for static callers
    pub caller: Option<EntityId>,
    /// Full name of the calling method
    pub method_name: String,
}

impl ModifierKey {
    /// Creates a key.
    #[must_use]
    pub fn new(caller: Option<EntityId>, method_name: &str) -> Self {
        ModifierKey {
            caller,
            method_name: method_name.to_string(),
        }
    }

    /// The modifier performing a pending interception.
    #[must_use]
    pub fn from_context(context: &InterceptionContext) -> Self {
        ModifierKey::new(
            context.caller.as_ref().map(|c| c.id()),
            &context.calling_method,
        )
    }
}

/// A call-site origin together with the changes it produced.
///
/// Equality and hashing only consider the [`ModifierKey`].
#[derive(Clone)]
pub struct Modifier {
    /// Identity of the modifier
    pub key: ModifierKey,
    /// The calling entity, `None` for static callers
    pub caller: Option<EntityRef>,
    /// Changes produced by this modifier, in the order they were given
    pub changes: Vec<Arc<ChangeRecord>>,
}

impl Modifier {
    /// Display name of the calling entity, `"None"` for static callers.
    #[must_use]
    pub fn caller_name(&self) -> String {
        self.caller
            .as_ref()
            .map_or_else(|| "None".to_string(), |c| c.name())
    }

    /// Hierarchy path of the calling entity.
    #[must_use]
    pub fn caller_path(&self) -> Option<String> {
        self.caller.as_ref().map(|c| c.hierarchy_path())
    }

    /// Groups `records` by modifier, in order of first occurrence.
    pub fn group(records: impl IntoIterator<Item = Arc<ChangeRecord>>) -> Vec<Modifier> {
        let mut index: HashMap<ModifierKey, usize> = HashMap::new();
        let mut modifiers: Vec<Modifier> = Vec::new();

        for record in records {
            let key = record.modifier_key();
            match index.get(&key) {
                Some(&position) => modifiers[position].changes.push(record),
                None => {
                    index.insert(key.clone(), modifiers.len());
                    modifiers.push(Modifier {
                        key,
                        caller: record.caller.clone(),
                        changes: vec![record],
                    });
                }
            }
        }

        modifiers
    }
}

impl PartialEq for Modifier {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Modifier {}

impl Hash for Modifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modifier")
            .field("key", &self.key)
            .field("changes", &self.changes.len())
            .finish()
    }
}
