use std::fmt;

use crate::{
    host::{EntityRef, Transform},
    mutators::{ChangeKind, MutatorTable},
    rewriter::{CONTEXT_SLOTS, SLOT_ARGUMENTS, SLOT_CALLER, SLOT_CALLING_METHOD, SLOT_MUTATOR},
    value::{Object, TransformValue},
    Error, Result,
};

/// State of one intercepted mutator call.
///
/// Created by the "before" hook from the context array the rewritten code builds, completed
/// by the "after" hook with the post-call value, then handed to the callbacks.
#[derive(Clone)]
pub struct InterceptionContext {
    /// Entity whose method performed the call, `None` for static callers
    pub caller: Option<EntityRef>,
    /// Full name of the method containing the call-site
    pub calling_method: String,
    /// The boxed arguments of the original call
    pub arguments: Vec<Object>,
    /// Full name of the intercepted mutator
    pub mutator: String,
    /// Field written by the mutator
    pub kind: ChangeKind,
    /// Whether the original call is executed
    pub should_execute_original: bool,
    /// Value of the field right before the call
    pub value_before: TransformValue,
    /// Value of the field right after the call, set by the "after" hook
    pub new_value: Option<TransformValue>,
}

impl InterceptionContext {
    /// Builds a context from the values of a hook context array.
    ///
    /// `receiver` is the entity the mutator is invoked on; its current value for the change
    /// kind becomes [`InterceptionContext::value_before`].
    ///
    /// # Errors
    /// Returns [`Error::MalformedPayload`] if the array does not have the expected layout, or
    /// [`Error::UnknownMutator`] if the mutator is not part of `mutators`.
    pub fn from_payload(
        values: &[Object],
        mutators: &MutatorTable,
        receiver: &dyn Transform,
    ) -> Result<Self> {
        if values.len() < CONTEXT_SLOTS {
            return Err(Error::MalformedPayload(format!(
                "context array has {} slots, expected {}",
                values.len(),
                CONTEXT_SLOTS
            )));
        }

        let caller = match &values[SLOT_CALLER] {
            Object::Null => None,
            Object::Entity(entity) => Some(entity.clone()),
            other => {
                return Err(Error::MalformedPayload(format!(
                    "caller slot holds a {}",
                    other.type_name()
                )))
            }
        };

        let calling_method = Self::string_slot(values, SLOT_CALLING_METHOD, "calling method")?;
        let mutator = Self::string_slot(values, SLOT_MUTATOR, "mutator")?;

        let arguments = match &values[SLOT_ARGUMENTS] {
            Object::Array(array) => read_lock!(array).clone(),
            Object::Null => Vec::new(),
            other => {
                return Err(Error::MalformedPayload(format!(
                    "argument slot holds a {}",
                    other.type_name()
                )))
            }
        };

        let kind = mutators.change_kind(&mutator)?;

        Ok(InterceptionContext {
            caller,
            calling_method,
            arguments,
            mutator,
            kind,
            should_execute_original: true,
            value_before: kind.read(receiver),
            new_value: None,
        })
    }

    fn string_slot(values: &[Object], slot: usize, what: &str) -> Result<String> {
        values[slot].as_str().map(str::to_string).ok_or_else(|| {
            Error::MalformedPayload(format!(
                "{} slot holds a {}",
                what,
                values[slot].type_name()
            ))
        })
    }

    /// Returns `true` if the original call was suppressed.
    #[must_use]
    pub fn was_skipped(&self) -> bool {
        !self.should_execute_original
    }
}

impl fmt::Debug for InterceptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionContext")
            .field("caller", &self.caller.as_ref().map(|c| c.id()))
            .field("calling_method", &self.calling_method)
            .field("arguments", &self.arguments)
            .field("mutator", &self.mutator)
            .field("kind", &self.kind)
            .field("should_execute_original", &self.should_execute_original)
            .field("value_before", &self.value_before)
            .field("new_value", &self.new_value)
            .finish()
    }
}
