//! The supported mutator set and its change-kind mapping.
//!
//! A mutator is a method whose invocation writes one of the monitored fields of a spatial
//! entity. [`MutatorTable`] holds the closed set of mutators the instrumentation looks for,
//! the [`ChangeKind`] each of them affects, and the generic message entry point that rewritten
//! code uses to reach the dispatcher.
//!
//! The mapping is total over the table: resolving a name that is not in it is a configuration
//! error ([`crate::Error::UnknownMutator`]), never a silent miss.
//!
//! # Examples
//!
//! ```rust
//! use mutscope::{ChangeKind, MutatorTable};
//!
//! let table = MutatorTable::transform();
//! let kind = table
//!     .change_kind("UnityEngine.Transform.set_position(UnityEngine.Vector3)")
//!     .unwrap();
//! assert_eq!(kind, ChangeKind::Position);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::{
    host::Transform,
    il::{MethodIdentity, TypeSig},
    value::TransformValue,
    Error, Result,
};

/// Message name the rewritten code sends before a mutator call.
pub const BEFORE_MESSAGE: &str = "$HandleGlobalInterceptorCallback_Before$";

/// Message name the rewritten code sends after a mutator call.
pub const AFTER_MESSAGE: &str = "$HandleGlobalInterceptorCallback_After$";

/// Identity of a mutator method.
pub type MutatorIdentity = MethodIdentity;

/// The monitored field a mutator writes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, Serialize, Deserialize,
)]
pub enum ChangeKind {
    /// World or local position
    Position,
    /// World or local rotation
    Rotation,
    /// Local scale
    Scale,
}

impl ChangeKind {
    /// Reads the current value of this field from `entity`.
    #[must_use]
    pub fn read(&self, entity: &dyn Transform) -> TransformValue {
        match self {
            ChangeKind::Position => TransformValue::Vector3(entity.position()),
            ChangeKind::Rotation => TransformValue::Quaternion(entity.rotation()),
            ChangeKind::Scale => TransformValue::Vector3(entity.local_scale()),
        }
    }
}

const TRANSFORM: &str = "UnityEngine.Transform";
const COMPONENT: &str = "UnityEngine.Component";

fn vector3() -> TypeSig {
    TypeSig::value("UnityEngine.Vector3")
}

fn quaternion() -> TypeSig {
    TypeSig::value("UnityEngine.Quaternion")
}

fn space() -> TypeSig {
    TypeSig::value("UnityEngine.Space")
}

/// The closed set of mutators and their change kinds.
#[derive(Debug, Clone)]
pub struct MutatorTable {
    entries: Vec<(MutatorIdentity, ChangeKind)>,
    by_name: HashMap<String, ChangeKind>,
    message_entry: MethodIdentity,
}

impl MutatorTable {
    /// Creates an empty table whose rewritten code calls `message_entry`.
    ///
    /// The entry point must take a message name and a single object payload.
    #[must_use]
    pub fn new(message_entry: MethodIdentity) -> Self {
        MutatorTable {
            entries: Vec::new(),
            by_name: HashMap::new(),
            message_entry,
        }
    }

    /// The supported transform mutators.
    ///
    /// Position: `set_position`, `set_localPosition` and the three `Translate` overloads.
    /// Rotation: `set_rotation`, `set_localRotation`, `set_eulerAngles`, `set_localEulerAngles`
    /// and the three `Rotate` overloads. Scale: `set_localScale`.
    #[must_use]
    pub fn transform() -> Self {
        let message_entry = MethodIdentity::new(
            COMPONENT,
            "SendMessage",
            vec![TypeSig::string(), TypeSig::object()],
        );

        MutatorTable::new(message_entry)
            .with(MethodIdentity::new(TRANSFORM, "set_position", vec![vector3()]), ChangeKind::Position)
            .with(MethodIdentity::new(TRANSFORM, "set_localPosition", vec![vector3()]), ChangeKind::Position)
            .with(MethodIdentity::new(TRANSFORM, "Translate", vec![vector3()]), ChangeKind::Position)
            .with(MethodIdentity::new(TRANSFORM, "Translate", vec![vector3(), space()]), ChangeKind::Position)
            .with(
                MethodIdentity::new(
                    TRANSFORM,
                    "Translate",
                    vec![TypeSig::single(), TypeSig::single(), TypeSig::single()],
                ),
                ChangeKind::Position,
            )
            .with(MethodIdentity::new(TRANSFORM, "set_rotation", vec![quaternion()]), ChangeKind::Rotation)
            .with(MethodIdentity::new(TRANSFORM, "set_localRotation", vec![quaternion()]), ChangeKind::Rotation)
            .with(MethodIdentity::new(TRANSFORM, "set_eulerAngles", vec![vector3()]), ChangeKind::Rotation)
            .with(MethodIdentity::new(TRANSFORM, "set_localEulerAngles", vec![vector3()]), ChangeKind::Rotation)
            .with(MethodIdentity::new(TRANSFORM, "Rotate", vec![vector3()]), ChangeKind::Rotation)
            .with(MethodIdentity::new(TRANSFORM, "Rotate", vec![vector3(), space()]), ChangeKind::Rotation)
            .with(
                MethodIdentity::new(TRANSFORM, "Rotate", vec![vector3(), TypeSig::single()]),
                ChangeKind::Rotation,
            )
            .with(MethodIdentity::new(TRANSFORM, "set_localScale", vec![vector3()]), ChangeKind::Scale)
    }

    /// Adds `mutator` with the given change kind. A repeated mutator replaces its kind.
    #[must_use]
    pub fn with(mut self, mutator: MutatorIdentity, kind: ChangeKind) -> Self {
        let name = mutator.full_name();
        match self.entries.iter_mut().find(|(m, _)| *m == mutator) {
            Some(entry) => entry.1 = kind,
            None => self.entries.push((mutator, kind)),
        }
        self.by_name.insert(name, kind);
        self
    }

    /// Resolves the change kind for a mutator full name.
    ///
    /// # Errors
    /// Returns [`Error::UnknownMutator`] if the name is not part of the table.
    pub fn change_kind(&self, mutator_full_name: &str) -> Result<ChangeKind> {
        self.by_name
            .get(mutator_full_name)
            .copied()
            .ok_or_else(|| Error::UnknownMutator(mutator_full_name.to_string()))
    }

    /// Returns `true` if `mutator` is part of the table.
    #[must_use]
    pub fn contains(&self, mutator: &MutatorIdentity) -> bool {
        self.entries.iter().any(|(m, _)| m == mutator)
    }

    /// Iterates over the mutators in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&MutatorIdentity, ChangeKind)> {
        self.entries.iter().map(|(m, kind)| (m, *kind))
    }

    /// The method the rewritten code calls to reach the dispatcher.
    #[must_use]
    pub fn message_entry(&self) -> &MethodIdentity {
        &self.message_entry
    }

    /// Number of mutators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table has no mutators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that the table can drive instrumentation.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the table is empty, if the message entry point does not
    /// take `(string, object)`, or if a mutator is a constructor.
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(malformed_error!("Mutator table is empty"));
        }

        if self.message_entry.parameters != [TypeSig::string(), TypeSig::object()] {
            return Err(malformed_error!(
                "Message entry point '{}' must take (System.String, System.Object)",
                self.message_entry
            ));
        }

        if let Some((mutator, _)) = self.entries.iter().find(|(m, _)| m.is_constructor()) {
            return Err(malformed_error!(
                "Constructor '{}' cannot be used as a mutator",
                mutator
            ));
        }

        Ok(())
    }
}
