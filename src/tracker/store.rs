use std::{
    collections::HashSet,
    fmt,
    ops::Bound,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock, Weak,
    },
};

use crossbeam_skiplist::SkipMap;
use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, warn};

use crate::{
    dispatch::{CallbackId, CallbackRegistry, InterceptionContext},
    events::EventSource,
    host::{ChangeHandlers, EntityId, EntityRef, FrameClock},
    mutators::ChangeKind,
    tracker::{ChangeRecord, Modifier},
    value::{Quaternion, Vector3},
};

/// Changes of one frame, per entity in order of first change.
#[derive(Default)]
pub struct FrameChanges {
    entries: Vec<(EntityRef, Vec<Arc<ChangeRecord>>)>,
}

impl FrameChanges {
    fn push(&mut self, record: Arc<ChangeRecord>) {
        let id = record.entity.id();
        match self.entries.iter_mut().find(|(entity, _)| entity.id() == id) {
            Some((_, records)) => records.push(record),
            None => self.entries.push((record.entity.clone(), vec![record])),
        }
    }

    fn records_of(&self, entity: EntityId) -> Vec<Arc<ChangeRecord>> {
        self.entries
            .iter()
            .find(|(e, _)| e.id() == entity)
            .map(|(_, records)| records.clone())
            .unwrap_or_default()
    }

    fn all_records(&self) -> impl Iterator<Item = &Arc<ChangeRecord>> {
        self.entries.iter().flat_map(|(_, records)| records.iter())
    }
}

/// Frame index to the changes observed in that frame.
pub type FrameMap = SkipMap<u64, RwLock<FrameChanges>>;

struct TrackedEntity {
    entity: EntityRef,
    callbacks: Vec<CallbackId>,
}

type Notify = fn(&dyn ChangeHandlers, &Arc<ChangeRecord>);

/// Bounded, frame-indexed history of intercepted changes.
///
/// Tracking an entity registers one callback per change kind with the [`CallbackRegistry`];
/// each completed interception of that entity becomes a [`ChangeRecord`] appended to the
/// frame it was observed in. At most [`ChangeTracker::max_frames`] frames are retained, the
/// oldest frame is evicted first.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use mutscope::{CallbackRegistry, ChangeTracker, ManualFrameClock};
///
/// let clock = Arc::new(ManualFrameClock::new(0));
/// let tracker = ChangeTracker::new(Arc::new(CallbackRegistry::new()), clock, 1000);
///
/// assert!(tracker.query_changes(42, mutscope::EntityId(1)).is_empty());
/// assert_eq!(tracker.newest_frame_with_data(0), None);
/// ```
pub struct ChangeTracker {
    max_frames: AtomicUsize,
    frames: FrameMap,
    last_change: DashMap<(EntityId, ChangeKind), Arc<ChangeRecord>>,
    tracked: DashMap<EntityId, TrackedEntity>,
    callbacks: Arc<CallbackRegistry>,
    clock: Arc<dyn FrameClock>,
    change_added: EventSource<Arc<ChangeRecord>>,
}

impl ChangeTracker {
    /// Creates an empty store retaining at most `max_frames` frames.
    pub fn new(
        callbacks: Arc<CallbackRegistry>,
        clock: Arc<dyn FrameClock>,
        max_frames: usize,
    ) -> Arc<Self> {
        Arc::new(ChangeTracker {
            max_frames: AtomicUsize::new(max_frames),
            frames: SkipMap::new(),
            last_change: DashMap::new(),
            tracked: DashMap::new(),
            callbacks,
            clock,
            change_added: EventSource::new(),
        })
    }

    /// Starts recording changes of `entity`.
    ///
    /// `handlers` is notified with every record created for the entity. Returns `false` and
    /// logs a warning if the entity is already tracked.
    pub fn track(self: &Arc<Self>, entity: EntityRef, handlers: Arc<dyn ChangeHandlers>) -> bool {
        let id = entity.id();
        let slot = match self.tracked.entry(id) {
            Entry::Occupied(_) => {
                warn!("Entity {} ('{}') is already tracked", id, entity.name());
                return false;
            }
            Entry::Vacant(slot) => slot,
        };

        let position = self.callbacks.register_position(
            id,
            self.vector_recorder(&entity, &handlers, |h, r| h.on_position_changed(r)),
        );
        let rotation = self.callbacks.register_rotation(
            id,
            self.quaternion_recorder(&entity, &handlers, |h, r| h.on_rotation_changed(r)),
        );
        let scale = self.callbacks.register_scale(
            id,
            self.vector_recorder(&entity, &handlers, |h, r| h.on_scale_changed(r)),
        );

        debug!("Tracking changes of {} ('{}')", id, entity.name());
        slot.insert(TrackedEntity {
            entity,
            callbacks: vec![position, rotation, scale],
        });
        true
    }

    /// Stops recording changes of `entity`.
    ///
    /// Already recorded changes stay queryable, and a later [`ChangeTracker::track`] of the same
    /// entity chains its new records to them. Returns `false` and logs a warning if the entity
    /// was not tracked.
    pub fn stop_tracking(&self, entity: EntityId) -> bool {
        let Some((_, tracked)) = self.tracked.remove(&entity) else {
            warn!("Entity {entity} is not tracked");
            return false;
        };

        for callback in tracked.callbacks {
            self.callbacks.remove(callback);
        }
        debug!("Stopped tracking {} ('{}')", entity, tracked.entity.name());
        true
    }

    /// Returns `true` if `entity` is tracked.
    #[must_use]
    pub fn is_tracked(&self, entity: EntityId) -> bool {
        self.tracked.contains_key(&entity)
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    fn vector_recorder(
        self: &Arc<Self>,
        entity: &EntityRef,
        handlers: &Arc<dyn ChangeHandlers>,
        notify: Notify,
    ) -> Arc<dyn Fn(&InterceptionContext, Vector3) + Send + Sync> {
        let tracker = Arc::downgrade(self);
        let entity = entity.clone();
        let handlers = handlers.clone();
        Arc::new(move |context: &InterceptionContext, _: Vector3| {
            Self::record_and_notify(&tracker, &entity, handlers.as_ref(), context, notify);
        })
    }

    fn quaternion_recorder(
        self: &Arc<Self>,
        entity: &EntityRef,
        handlers: &Arc<dyn ChangeHandlers>,
        notify: Notify,
    ) -> Arc<dyn Fn(&InterceptionContext, Quaternion) + Send + Sync> {
        let tracker = Arc::downgrade(self);
        let entity = entity.clone();
        let handlers = handlers.clone();
        Arc::new(move |context: &InterceptionContext, _: Quaternion| {
            Self::record_and_notify(&tracker, &entity, handlers.as_ref(), context, notify);
        })
    }

    fn record_and_notify(
        tracker: &Weak<ChangeTracker>,
        entity: &EntityRef,
        handlers: &dyn ChangeHandlers,
        context: &InterceptionContext,
        notify: Notify,
    ) {
        if let Some(tracker) = tracker.upgrade() {
            let frame = tracker.clock.frame();
            let record = tracker.record_change(entity, context, frame);
            notify(handlers, &record);
        }
    }

    /// Appends a record for a completed interception of `entity` to `frame`.
    ///
    /// The record is chained to the entity's previous record of the same kind, the
    /// change-added listeners are notified, and frames beyond the retention window are evicted.
    pub fn record_change(
        &self,
        entity: &EntityRef,
        context: &InterceptionContext,
        frame: u64,
    ) -> Arc<ChangeRecord> {
        let key = (entity.id(), context.kind);
        let new_value = context
            .new_value
            .unwrap_or_else(|| context.kind.read(entity.as_ref()));
        let previous = self.last_change.get(&key).map(|r| r.value().clone());

        let record = Arc::new(ChangeRecord::from_context(
            entity.clone(),
            context,
            new_value,
            frame,
            previous.as_ref(),
        ));
        self.last_change.insert(key, record.clone());

        let entry = self
            .frames
            .get_or_insert(frame, RwLock::new(FrameChanges::default()));
        write_lock!(entry.value()).push(record.clone());

        self.change_added.emit(&record);
        self.trim();

        record
    }

    fn trim(&self) {
        let max = self.max_frames.load(Ordering::Acquire);
        while self.frames.len() > max {
            match self.frames.pop_front() {
                Some(evicted) => debug!("Evicted changes of frame {}", evicted.key()),
                None => break,
            }
        }
    }

    /// Maximum number of retained frames.
    #[must_use]
    pub fn max_frames(&self) -> usize {
        self.max_frames.load(Ordering::Acquire)
    }

    /// Changes the retention window, evicting immediately if it shrinks.
    pub fn set_max_frames(&self, max_frames: usize) {
        self.max_frames.store(max_frames, Ordering::Release);
        self.trim();
    }

    /// Changes of `entity` in `frame`, empty if there are none.
    #[must_use]
    pub fn query_changes(&self, frame: u64, entity: EntityId) -> Vec<Arc<ChangeRecord>> {
        self.frames
            .get(&frame)
            .map(|entry| read_lock!(entry.value()).records_of(entity))
            .unwrap_or_default()
    }

    /// Changes of every entity in `frame`, per entity in order of first change.
    #[must_use]
    pub fn frame_changes(&self, frame: u64) -> Vec<(EntityRef, Vec<Arc<ChangeRecord>>)> {
        self.frames
            .get(&frame)
            .map(|entry| read_lock!(entry.value()).entries.clone())
            .unwrap_or_default()
    }

    /// The `(skip + 1)`-th most recent frame holding changes.
    #[must_use]
    pub fn newest_frame_with_data(&self, skip: usize) -> Option<u64> {
        self.frames.iter().rev().nth(skip).map(|entry| *entry.key())
    }

    /// Number of retained frames newer than `frame`, `0` if `frame` holds no changes.
    #[must_use]
    pub fn frames_newer_than(&self, frame: u64) -> usize {
        if !self.frames.contains_key(&frame) {
            return 0;
        }
        self.frames
            .range((Bound::Excluded(frame), Bound::Unbounded))
            .count()
    }

    /// Entities with changes in `frame`, or in any retained frame when `frame` is `None`.
    ///
    /// Each entity is listed once, in order of first appearance.
    #[must_use]
    pub fn tracked_entities(&self, frame: Option<u64>) -> Vec<EntityRef> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        self.for_each_frame(frame, |changes| {
            for (entity, _) in &changes.entries {
                if seen.insert(entity.id()) {
                    entities.push(entity.clone());
                }
            }
        });
        entities
    }

    /// Modifiers of the changes in scope.
    ///
    /// `frame` restricts the scope to one frame, `entity` to one modified entity.
    #[must_use]
    pub fn modifiers(&self, frame: Option<u64>, entity: Option<EntityId>) -> Vec<Modifier> {
        let mut records = Vec::new();
        self.for_each_frame(frame, |changes| {
            records.extend(
                changes
                    .all_records()
                    .filter(|r| entity.map_or(true, |id| r.entity.id() == id))
                    .cloned(),
            );
        });
        Self::group_into_modifiers(records)
    }

    /// Groups records by (caller, calling method), in order of first occurrence.
    pub fn group_into_modifiers(
        records: impl IntoIterator<Item = Arc<ChangeRecord>>,
    ) -> Vec<Modifier> {
        Modifier::group(records)
    }

    fn for_each_frame<F>(&self, frame: Option<u64>, mut visit: F)
    where
        F: FnMut(&FrameChanges),
    {
        match frame {
            Some(frame) => {
                if let Some(entry) = self.frames.get(&frame) {
                    visit(&read_lock!(entry.value()));
                }
            }
            None => {
                for entry in &self.frames {
                    visit(&read_lock!(entry.value()));
                }
            }
        }
    }

    /// Number of retained frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if any change is retained.
    #[must_use]
    pub fn has_any_changes(&self) -> bool {
        self.frames
            .iter()
            .any(|entry| read_lock!(entry.value()).all_records().next().is_some())
    }

    /// Removes every recorded change, keeping tracked entities tracked.
    pub fn clear(&self) {
        self.frames.clear();
        self.last_change.clear();
    }

    /// Stops tracking every entity and removes every recorded change.
    pub fn reset(&self) {
        let tracked: Vec<EntityId> = self.tracked.iter().map(|e| *e.key()).collect();
        for entity in tracked {
            self.stop_tracking(entity);
        }
        self.clear();
        self.change_added.clear();
    }

    /// Notification fired for every appended record.
    #[must_use]
    pub fn change_added(&self) -> &EventSource<Arc<ChangeRecord>> {
        &self.change_added
    }
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("max_frames", &self.max_frames())
            .field("frames", &self.frame_count())
            .field("tracked", &self.tracked_count())
            .finish_non_exhaustive()
    }
}
