//! The lifecycle-scoped tracking context.
//!
//! A [`TrackingSession`] owns every registry the instrumentation and the change store share:
//! the [`SkipRegistry`], the [`CallbackRegistry`], the [`Dispatcher`] the rewritten code talks
//! to, the [`ChangeTracker`], and the [`Instrumenter`] with its call-site cache. Hosts create
//! one session, route the hook messages of the message entry point into
//! [`TrackingSession::handle_message`], and tear it down with [`TrackingSession::shutdown`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mutscope::{HostServices, NoopHandlers, TrackerConfig, TrackingSession};
//!
//! # fn run(host: HostServices, player: mutscope::EntityRef) -> mutscope::Result<()> {
//! let session = TrackingSession::new(TrackerConfig::default(), host)?;
//! session.track(player.clone(), Arc::new(NoopHandlers));
//!
//! if let Some(outcome) = session.initialize(&["Game.dll"])? {
//!     println!("instrumentation completed: {}", outcome.is_completed());
//! }
//!
//! let frame = 42;
//! for change in session.tracker().query_changes(frame, player.id()) {
//!     println!("{} -> {} by {}", change.value_before, change.new_value, change.calling_method);
//! }
//! session.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, info, warn};

use crate::{
    config::TrackerConfig,
    dispatch::{CallbackRegistry, Dispatcher, MessageDisposition, SkipRegistry},
    events::{EventSource, PassEvents},
    host::{ChangeHandlers, EntityId, EntityRef, HostServices},
    instrument::{InstrumentationResult, Instrumenter, PassOutcome},
    mutators::MutatorTable,
    tracker::ChangeTracker,
    value::Object,
    Error, Result,
};

/// Owner of all tracking state for the lifetime of a host run.
pub struct TrackingSession {
    config: TrackerConfig,
    mutators: Arc<MutatorTable>,
    skips: Arc<SkipRegistry>,
    callbacks: Arc<CallbackRegistry>,
    dispatcher: Dispatcher,
    tracker: Arc<ChangeTracker>,
    instrumenter: Instrumenter,
    pass_events: Arc<PassEvents>,
    tracking_enabled_changed: EventSource<bool>,
    initialized: AtomicBool,
}

impl TrackingSession {
    /// Creates a session monitoring the transform mutators.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedBackend`] if the configured backend cannot be instrumented.
    pub fn new(config: TrackerConfig, host: HostServices) -> Result<Self> {
        Self::with_mutators(config, host, MutatorTable::transform())
    }

    /// Creates a session monitoring a custom mutator table.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the table cannot drive instrumentation, or
    /// [`Error::UnsupportedBackend`] if the configured backend cannot be instrumented.
    pub fn with_mutators(
        config: TrackerConfig,
        host: HostServices,
        mutators: MutatorTable,
    ) -> Result<Self> {
        mutators.validate()?;
        let mutators = Arc::new(mutators);

        let pass_events = Arc::new(PassEvents::default());
        let instrumenter = Instrumenter::new(
            host.loader,
            host.patcher,
            mutators.clone(),
            &config,
            pass_events.clone(),
        )?;

        let skips = Arc::new(SkipRegistry::new());
        let callbacks = Arc::new(CallbackRegistry::new());
        let dispatcher = Dispatcher::new(mutators.clone(), skips.clone(), callbacks.clone());
        dispatcher.set_enabled(config.tracking_enabled);

        let tracker = ChangeTracker::new(
            callbacks.clone(),
            host.clock,
            config.keep_changes_for_max_frames,
        );

        Ok(TrackingSession {
            config,
            mutators,
            skips,
            callbacks,
            dispatcher,
            tracker,
            instrumenter,
            pass_events,
            tracking_enabled_changed: EventSource::new(),
            initialized: AtomicBool::new(false),
        })
    }

    /// Runs the first instrumentation pass over `paths`.
    ///
    /// Nothing happens, and the session stays uninitialized, while tracking is disabled or
    /// while no entity is tracked and
    /// [`TrackerConfig::initialize_without_tracked_entities`] is off. In that case `None` is
    /// returned.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyInitialized`] if a previous call already ran the pass.
    pub fn initialize<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Option<PassOutcome>> {
        if self.initialized.load(Ordering::Acquire) {
            return Err(Error::AlreadyInitialized);
        }

        if !self.is_tracking_enabled() {
            info!("Change tracking is disabled, skipping instrumentation");
            return Ok(None);
        }

        if self.tracker.tracked_count() == 0 && !self.config.initialize_without_tracked_entities {
            info!("No entity is tracked, skipping instrumentation");
            return Ok(None);
        }

        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyInitialized);
        }

        let outcome = self.instrumenter.instrument(paths);
        if let Some(result) = outcome.result() {
            info!(
                "Initialized change tracking in {:?}, {} call-sites in {} binaries",
                result.total_time,
                result.call_site_count(),
                result.patched_binary_count()
            );
        }
        Ok(Some(outcome))
    }

    /// Returns `true` once [`TrackingSession::initialize`] ran the instrumentation pass.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Instruments additional binaries at run time.
    ///
    /// While tracking is disabled nothing is patched and an empty result is returned.
    pub fn enable_change_tracking<P: AsRef<Path>>(&self, paths: &[P]) -> PassOutcome {
        if !self.is_tracking_enabled() {
            warn!("Change tracking is disabled, no binary is patched until it is enabled");
            return PassOutcome::Completed(InstrumentationResult::default());
        }
        self.instrumenter.instrument(paths)
    }

    /// Enables or disables interception, notifying listeners on an actual change.
    pub fn set_tracking_enabled(&self, enabled: bool) {
        let previous = self.dispatcher.set_enabled(enabled);
        if previous != enabled {
            debug!("Change tracking {}", if enabled { "enabled" } else { "disabled" });
            self.tracking_enabled_changed.emit(&enabled);
        }
    }

    /// Returns `true` if interception is active.
    #[must_use]
    pub fn is_tracking_enabled(&self) -> bool {
        self.dispatcher.is_enabled()
    }

    /// Routes a message sent through the message entry point, see
    /// [`Dispatcher::handle_message`].
    ///
    /// # Errors
    /// Propagates the dispatcher's errors.
    pub fn handle_message(
        &self,
        receiver: &EntityRef,
        message: &str,
        payload: &Object,
    ) -> Result<MessageDisposition> {
        self.dispatcher.handle_message(receiver, message, payload)
    }

    /// Starts recording the changes of `entity`, see [`ChangeTracker::track`].
    pub fn track(&self, entity: EntityRef, handlers: Arc<dyn ChangeHandlers>) -> bool {
        self.tracker.track(entity, handlers)
    }

    /// Stops recording the changes of `entity`, see [`ChangeTracker::stop_tracking`].
    pub fn stop_tracking(&self, entity: EntityId) -> bool {
        self.tracker.stop_tracking(entity)
    }

    /// The change store.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    /// The skip predicates and modifier denylist.
    #[must_use]
    pub fn skips(&self) -> &Arc<SkipRegistry> {
        &self.skips
    }

    /// The per-entity interception callbacks.
    #[must_use]
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// The hook dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The instrumentation pass driver.
    #[must_use]
    pub fn instrumenter(&self) -> &Instrumenter {
        &self.instrumenter
    }

    /// The monitored mutators.
    #[must_use]
    pub fn mutators(&self) -> &MutatorTable {
        &self.mutators
    }

    /// The configuration the session was created with.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// "Pass started" and "pass completed" notifications.
    #[must_use]
    pub fn pass_events(&self) -> &PassEvents {
        &self.pass_events
    }

    /// Fired with the new state whenever tracking is enabled or disabled.
    #[must_use]
    pub fn tracking_enabled_changed(&self) -> &EventSource<bool> {
        &self.tracking_enabled_changed
    }

    /// Writes the call-site cache to the configured cache file.
    ///
    /// Returns `false` if no cache file is configured.
    ///
    /// # Errors
    /// Returns an I/O or serialization error if the cache cannot be written.
    pub fn save_cache(&self) -> Result<bool> {
        match &self.config.cache_file {
            Some(path) => {
                self.instrumenter.save_cache(path)?;
                debug!("Saved call-site cache to '{}'", path.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tears the session down.
    ///
    /// The cache is persisted when a cache file is configured, then every registry is cleared.
    /// Registries are cleared even if persisting fails.
    ///
    /// # Errors
    /// Returns the error of persisting the cache.
    pub fn shutdown(self) -> Result<()> {
        let saved = self.save_cache();

        self.dispatcher.reset();
        self.tracker.reset();
        self.skips.clear();
        self.callbacks.clear();
        self.pass_events.started.clear();
        self.pass_events.completed.clear();
        self.tracking_enabled_changed.clear();
        debug!("Tracking session shut down");

        saved.map(|_| ())
    }
}

impl fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSession")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}
