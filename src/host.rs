//! Interfaces to the host integration.
//!
//! The tracker never talks to a concrete engine. Everything it needs from the outside world
//! is expressed by the traits in this module:
//!
//! - [`ModuleLoader`] - loads a binary module into the [`crate::il`] representation
//! - [`MethodPatcher`] - replaces the executable body of a live method
//! - [`FrameClock`] - the host's monotonically increasing frame counter
//! - [`Transform`] - read access to a monitored entity's fields and identity
//! - [`ChangeHandlers`] - per-entity reaction to committed changes
//!
//! [`HostServices`] bundles the first three so they can be handed to a
//! [`crate::TrackingSession`] in one go.

use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    il::{MethodBody, MethodIdentity, Module},
    tracker::ChangeRecord,
    value::{Quaternion, Vector3},
    Result,
};

/// Stable identity of a host entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read access to a monitored spatial entity.
///
/// Identity is the only property used for comparisons; names and hierarchy paths are for
/// diagnostics.
pub trait Transform: Send + Sync {
    /// Stable identity of the entity
    fn id(&self) -> EntityId;

    /// Display name of the entity
    fn name(&self) -> String;

    /// Full hierarchy path of the entity, `Root/Child/Leaf`
    fn hierarchy_path(&self) -> String {
        self.name()
    }

    /// World-space position
    fn position(&self) -> Vector3;

    /// World-space rotation
    fn rotation(&self) -> Quaternion;

    /// Local scale
    fn local_scale(&self) -> Vector3;
}

/// Shared reference to a host entity.
pub type EntityRef = Arc<dyn Transform>;

/// Loads binary modules for scanning and rewriting.
pub trait ModuleLoader: Send + Sync {
    /// Loads the module stored at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ModuleLoad`] or an I/O error if the module cannot be read.
    fn load_module(&self, path: &Path) -> Result<Module>;
}

/// Replaces the executable behaviour of live methods.
///
/// The tracker calls this at most once per method per session.
pub trait MethodPatcher: Send + Sync {
    /// Atomically installs `body` as the new implementation of `method`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Patch`] if the host refuses the body.
    fn install_body(&self, method: &MethodIdentity, body: MethodBody) -> Result<()>;
}

/// The host's frame counter.
pub trait FrameClock: Send + Sync {
    /// Index of the frame currently being processed
    fn frame(&self) -> u64;
}

/// A [`FrameClock`] driven explicitly by the host loop.
#[derive(Debug, Default)]
pub struct ManualFrameClock {
    frame: AtomicU64,
}

impl ManualFrameClock {
    /// Creates a clock positioned at `frame`.
    #[must_use]
    pub fn new(frame: u64) -> Self {
        ManualFrameClock {
            frame: AtomicU64::new(frame),
        }
    }

    /// Moves the clock to `frame`.
    pub fn set(&self, frame: u64) {
        self.frame.store(frame, Ordering::Release);
    }

    /// Advances the clock by one frame and returns the new index.
    pub fn advance(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl FrameClock for ManualFrameClock {
    fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }
}

/// Capability set invoked for every committed change of a tracked entity.
///
/// Every method has an empty default so implementors only override the kinds they care about.
pub trait ChangeHandlers: Send + Sync {
    /// A position mutator was intercepted
    fn on_position_changed(&self, _change: &Arc<ChangeRecord>) {}

    /// A rotation mutator was intercepted
    fn on_rotation_changed(&self, _change: &Arc<ChangeRecord>) {}

    /// A scale mutator was intercepted
    fn on_scale_changed(&self, _change: &Arc<ChangeRecord>) {}
}

/// [`ChangeHandlers`] that ignore every change.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandlers;

impl ChangeHandlers for NoopHandlers {}

/// The collaborators a session needs from the host.
#[derive(Clone)]
pub struct HostServices {
    /// Binary module loader
    pub loader: Arc<dyn ModuleLoader>,
    /// Method body patcher
    pub patcher: Arc<dyn MethodPatcher>,
    /// Frame counter
    pub clock: Arc<dyn FrameClock>,
}

impl HostServices {
    /// Bundles the given collaborators.
    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        patcher: Arc<dyn MethodPatcher>,
        clock: Arc<dyn FrameClock>,
    ) -> Self {
        HostServices {
            loader,
            patcher,
            clock,
        }
    }
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("frame", &self.clock.frame())
            .finish_non_exhaustive()
    }
}
