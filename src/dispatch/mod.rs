//! Runtime interception of mutator calls.
//!
//! Rewritten call-sites send two messages through the host's message entry point: a "before"
//! message carrying the context array, and an "after" message with no payload. The
//! [`Dispatcher`] correlates both into one [`InterceptionContext`], consults the
//! [`SkipRegistry`] to decide whether the original call runs, and publishes the completed
//! context to the [`CallbackRegistry`].
//!
//! # Key Components
//!
//! - [`Dispatcher`] - Before/after hook handling and message routing
//! - [`InterceptionContext`] - State of one intercepted call
//! - [`SkipRegistry`] - Skip predicates and modifier denylist
//! - [`CallbackRegistry`] - Per-entity change callbacks

mod callbacks;
mod context;
mod dispatcher;
mod skip;

pub use callbacks::{
    CallbackHandler, CallbackId, CallbackRegistry, InterceptedCallback, QuaternionHandler,
    Vector3Handler,
};
pub use context::InterceptionContext;
pub use dispatcher::{Dispatcher, MessageDisposition};
pub use skip::{SkipPredicate, SkipRegistry};
