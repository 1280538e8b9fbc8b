// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # mutscope
//!
//! Call-site instrumentation and frame-indexed change tracking for the mutators of spatial
//! entities.
//!
//! `mutscope` finds every method of a loaded binary that writes the position, rotation or
//! scale of an entity through one of a fixed set of mutator methods, rewrites those call-sites
//! so they report to an interception dispatcher, and records every intercepted write in a
//! bounded, frame-indexed history. The call-sites themselves are never edited by hand; calls
//! can be observed, grouped by the code that made them, and suppressed at run time.
//!
//! ## Features
//!
//! - **Instrumentation** - Scans method bodies for mutator calls and wraps each call-site
//!   in "before"/"after" hooks routed through one generic message entry point
//! - **Call-site cache** - Remembers where the call-sites of a binary are, keyed by the
//!   binary's last-modified time, and persists that knowledge as JSON
//! - **Interception** - Skip predicates and a modifier denylist decide per call whether the
//!   original mutator runs
//! - **Change history** - Every intercepted write becomes a [`tracker::ChangeRecord`]
//!   linked to the previous one of its kind; only the most recent frames are kept
//!
//! ## Architecture
//!
//! - [`cache`] - Persistent (binary, mutator) to call-site mapping
//! - [`scanner`] - Locates the methods calling a mutator
//! - [`rewriter`] - Rewrites the instruction stream around each call-site
//! - [`instrument`] - Drives scanner, rewriter and host patcher over a batch of binaries
//! - [`dispatch`] - Runtime counterpart of the rewritten code
//! - [`tracker`] - The frame-indexed change store
//! - [`session`] - Owns all of the above for one host run
//! - [`il`], [`mutators`], [`value`], [`host`] - The data model and the host boundary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mutscope::prelude::*;
//!
//! # fn run(host: HostServices, player: EntityRef) -> mutscope::Result<()> {
//! let session = TrackingSession::new(TrackerConfig::default(), host)?;
//! session.track(player.clone(), Arc::new(NoopHandlers));
//! session.initialize(&["Game.dll"])?;
//!
//! // Never let the jitter script move the player
//! session.skips().add_predicate(Arc::new(|ctx: &InterceptionContext, _: &dyn Transform| {
//!     ctx.calling_method.starts_with("Game.Jitter.")
//! }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`] with the crate's [`Error`] type. Failures of
//! single types or methods during a scan are logged and skipped; failures of an
//! instrumentation pass abort the pass and are reported through [`instrument::PassOutcome`].
//!
//! ## Logging
//!
//! Progress and diagnostics are emitted through the [`log`](https://docs.rs/log) facade. The
//! host decides which logger implementation, if any, receives them.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust
/// use mutscope::prelude::*;
///
/// let config = TrackerConfig::default();
/// assert_eq!(config.keep_changes_for_max_frames, 1000);
/// ```
pub mod prelude;

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod host;

/// Method bodies are flat [`il::Instruction`] lists with symbolic [`il::Label`]s as branch
/// targets.
pub mod il;
pub mod instrument;
pub mod mutators;

/// Call-site rewriting.
///
/// # Examples
///
/// ```rust
/// use mutscope::{il::{MethodBody, MethodDef, MethodIdentity}, ExecutionBackend, MutatorTable, Rewriter};
///
/// let table = MutatorTable::transform();
/// let rewriter = Rewriter::new(ExecutionBackend::Jit, &table)?;
///
/// let method = MethodDef::new(
///     MethodIdentity::new("Game.Mover", "Idle", vec![]),
///     MethodBody::default(),
/// );
/// let (mutator, _) = table.iter().next().unwrap();
/// let body = rewriter.rewrite(&method, mutator)?;
/// assert!(body.instructions.is_empty());
/// # Ok::<(), mutscope::Error>(())
/// ```
pub mod rewriter;

/// Call-site discovery.
pub mod scanner;
pub mod session;
pub mod tracker;

/// Spatial values and the boxed object model of hook payloads.
pub mod value;

/// `mutscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `mutscope` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use mutscope::{Error, MutatorTable};
///
/// match MutatorTable::transform().change_kind("Game.Mover.Jump()") {
///     Ok(kind) => println!("{kind}"),
///     Err(Error::UnknownMutator(name)) => println!("not a mutator: {name}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;

pub use cache::{CacheEntry, CacheKey, CacheStore, CachedMethod};
pub use config::TrackerConfig;
pub use dispatch::{
    CallbackId, CallbackRegistry, Dispatcher, InterceptionContext, MessageDisposition,
    SkipPredicate, SkipRegistry,
};
pub use events::{EventSource, PassEvents, SubscriptionId};
pub use host::{
    ChangeHandlers, EntityId, EntityRef, FrameClock, HostServices, ManualFrameClock,
    MethodPatcher, ModuleLoader, NoopHandlers, Transform,
};
pub use instrument::{BinaryResult, InstrumentationResult, Instrumenter, PassOutcome};
pub use mutators::{ChangeKind, MutatorIdentity, MutatorTable, AFTER_MESSAGE, BEFORE_MESSAGE};
pub use rewriter::{ExecutionBackend, Rewriter};
pub use scanner::{CallSiteRecord, CallSiteScanner, ScanOutcome, SkippedUnit};
pub use session::TrackingSession;
pub use tracker::{ChangeRecord, ChangeTracker, Modifier, ModifierKey};
pub use value::{Object, Quaternion, TransformValue, Vector3};
