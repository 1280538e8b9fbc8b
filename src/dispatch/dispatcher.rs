use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use log::{debug, warn};

use crate::{
    dispatch::{CallbackRegistry, InterceptionContext, SkipRegistry},
    host::EntityRef,
    mutators::{MutatorTable, AFTER_MESSAGE, BEFORE_MESSAGE},
    rewriter::SLOT_EXECUTE_ORIGINAL,
    value::{Object, ObjectArray},
    Error, Result,
};

/// What the host should do with a message it routed to [`Dispatcher::handle_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// The message was an interception hook and has been handled
    Handled,
    /// Not a hook message, the host performs its default handling
    Forward,
}

struct InFlight {
    context: InterceptionContext,
    receiver: EntityRef,
}

/// Runtime counterpart of the rewritten call-sites.
///
/// The "before" hook builds an [`InterceptionContext`], asks the [`SkipRegistry`] whether the
/// call is suppressed, writes the decision back into the context array and keeps the context
/// in flight. The "after" hook completes the in-flight context with the post-call value and
/// hands it to the [`CallbackRegistry`].
///
/// # Limitations
///
/// There is a single in-flight slot. A second "before" hook arriving before the "after" hook
/// of the first (a mutator invoked from inside a callback, or two threads mutating at the same
/// time) replaces the first context, and the first mutation is then reported with the second
/// one's data. Hosts that need reentrancy must serialize mutations themselves.
pub struct Dispatcher {
    mutators: Arc<MutatorTable>,
    skips: Arc<SkipRegistry>,
    callbacks: Arc<CallbackRegistry>,
    in_flight: Mutex<Option<InFlight>>,
    enabled: AtomicBool,
}

impl Dispatcher {
    /// Creates an enabled dispatcher.
    pub fn new(
        mutators: Arc<MutatorTable>,
        skips: Arc<SkipRegistry>,
        callbacks: Arc<CallbackRegistry>,
    ) -> Self {
        Dispatcher {
            mutators,
            skips,
            callbacks,
            in_flight: Mutex::new(None),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enables or disables interception.
    ///
    /// While disabled, every call executes its original mutator and nothing is published.
    /// Returns the previous state.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    /// Returns `true` if interception is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns `true` while a "before" hook waits for its "after" hook.
    #[must_use]
    pub fn is_awaiting_after(&self) -> bool {
        lock!(self.in_flight).is_some()
    }

    /// Handles the "before" hook for a mutator invoked on `receiver`.
    ///
    /// `payload` is the context array built by the rewritten code. Its execute-original slot is
    /// set before returning.
    ///
    /// # Errors
    /// Returns [`Error::MalformedPayload`] if `payload` is not a context array, or
    /// [`Error::UnknownMutator`] if it names a mutator outside the table.
    pub fn on_before(&self, receiver: &EntityRef, payload: &Object) -> Result<()> {
        let array = payload.as_array().ok_or_else(|| {
            Error::MalformedPayload(format!(
                "expected a context array, got {}",
                payload.type_name()
            ))
        })?;

        if !self.is_enabled() {
            Self::write_decision(array, true)?;
            return Ok(());
        }

        let values = read_lock!(array).clone();
        let mut context =
            InterceptionContext::from_payload(&values, &self.mutators, receiver.as_ref())?;

        let skip = self.skips.should_skip(&context, receiver.as_ref());
        context.should_execute_original = !skip;
        Self::write_decision(array, !skip)?;

        debug!(
            "Intercepted '{}' on {} from '{}' (skip: {})",
            context.mutator,
            receiver.id(),
            context.calling_method,
            skip
        );

        let previous = lock!(self.in_flight).replace(InFlight {
            context,
            receiver: receiver.clone(),
        });
        if let Some(previous) = previous {
            debug!(
                "Overwriting in-flight interception of '{}' on {}",
                previous.context.mutator,
                previous.receiver.id()
            );
        }

        Ok(())
    }

    /// Handles the "after" hook, completing and publishing the in-flight interception.
    ///
    /// Returns the completed context, or `None` while interception is disabled.
    ///
    /// # Errors
    /// Returns [`Error::NoInterceptionInFlight`] if no "before" hook preceded this call, or
    /// [`Error::MissingHandler`] if a callback cannot accept the new value.
    pub fn on_after(&self, receiver: &EntityRef) -> Result<Option<InterceptionContext>> {
        let in_flight = lock!(self.in_flight).take();

        if !self.is_enabled() {
            return Ok(None);
        }

        let InFlight {
            mut context,
            receiver: expected,
        } = in_flight.ok_or(Error::NoInterceptionInFlight)?;

        if expected.id() != receiver.id() {
            warn!(
                "'After' hook for {} does not match the in-flight interception of {}",
                receiver.id(),
                expected.id()
            );
        }

        let new_value = context.kind.read(expected.as_ref());
        context.new_value = Some(new_value);

        self.callbacks.invoke(expected.id(), &context, new_value)?;
        Ok(Some(context))
    }

    /// Routes a message sent through the message entry point.
    ///
    /// The two hook messages are handled, anything else is left to the host.
    ///
    /// # Errors
    /// Propagates the errors of [`Dispatcher::on_before`] and [`Dispatcher::on_after`].
    pub fn handle_message(
        &self,
        receiver: &EntityRef,
        message: &str,
        payload: &Object,
    ) -> Result<MessageDisposition> {
        match message {
            BEFORE_MESSAGE => self.on_before(receiver, payload)?,
            AFTER_MESSAGE => {
                self.on_after(receiver)?;
            }
            _ => return Ok(MessageDisposition::Forward),
        }
        Ok(MessageDisposition::Handled)
    }

    /// Drops any in-flight interception.
    pub fn reset(&self) {
        lock!(self.in_flight).take();
    }

    fn write_decision(array: &ObjectArray, execute_original: bool) -> Result<()> {
        let mut values = write_lock!(array);
        let slot = values.get_mut(SLOT_EXECUTE_ORIGINAL).ok_or_else(|| {
            Error::MalformedPayload("context array has no execute-original slot".to_string())
        })?;
        *slot = Object::Bool(execute_original);
        Ok(())
    }
}
