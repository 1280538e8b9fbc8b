//! # mutscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the mutscope library. Import it to get quick access to everything a host needs to
//! set up a session and inspect recorded changes.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all mutscope operations
pub use crate::Error;

/// The result type used throughout mutscope
pub use crate::Result;

/// Session configuration
pub use crate::TrackerConfig;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Owner of all tracking state
pub use crate::TrackingSession;

/// Instrumentation pass driver and its statistics
pub use crate::instrument::{BinaryResult, InstrumentationResult, Instrumenter, PassOutcome};

// ================================================================================================
// Host Integration
// ================================================================================================

/// Interfaces the host implements
pub use crate::host::{
    ChangeHandlers, EntityId, EntityRef, FrameClock, HostServices, ManualFrameClock,
    MethodPatcher, ModuleLoader, NoopHandlers, Transform,
};

// ================================================================================================
// Interception
// ================================================================================================

/// Hook dispatching, skipping and callbacks
pub use crate::dispatch::{
    CallbackId, CallbackRegistry, Dispatcher, InterceptionContext, MessageDisposition,
    SkipPredicate, SkipRegistry,
};

/// Mutators and change kinds
pub use crate::mutators::{ChangeKind, MutatorIdentity, MutatorTable};

// ================================================================================================
// Change History
// ================================================================================================

/// Recorded changes and their store
pub use crate::tracker::{ChangeRecord, ChangeTracker, Modifier, ModifierKey};

/// Values carried by changes and hook payloads
pub use crate::value::{Object, Quaternion, TransformValue, Vector3};

/// Notification lists
pub use crate::events::{EventSource, SubscriptionId};
