//! Integration tests for runtime interception and the change history.
//!
//! These tests play the part of instrumented code: every mutator call is wrapped in the two
//! hook messages exactly as the rewritten call-sites send them, and the effects are checked
//! through the public [`TrackingSession`] API.

use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use mutscope::{
    il::{MethodBody, MethodIdentity, Module},
    ChangeKind, EntityId, EntityRef, Error, HostServices, InterceptionContext, ManualFrameClock,
    MessageDisposition, MethodPatcher, ModifierKey, ModuleLoader, NoopHandlers, Object,
    Quaternion, Result, TrackerConfig, TrackingSession, Transform, TransformValue, Vector3,
    AFTER_MESSAGE, BEFORE_MESSAGE,
};

const SET_POSITION: &str = "UnityEngine.Transform.set_position(UnityEngine.Vector3)";
const SET_ROTATION: &str = "UnityEngine.Transform.set_rotation(UnityEngine.Quaternion)";

struct Entity {
    id: EntityId,
    name: String,
    position: RwLock<Vector3>,
    rotation: RwLock<Quaternion>,
}

impl Entity {
    fn new(id: u64, name: &str) -> Arc<Self> {
        Arc::new(Entity {
            id: EntityId(id),
            name: name.to_string(),
            position: RwLock::new(Vector3::ZERO),
            rotation: RwLock::new(Quaternion::IDENTITY),
        })
    }
}

impl Transform for Entity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn position(&self) -> Vector3 {
        *self.position.read().unwrap()
    }

    fn rotation(&self) -> Quaternion {
        *self.rotation.read().unwrap()
    }

    fn local_scale(&self) -> Vector3 {
        Vector3::ONE
    }
}

struct NoModules;

impl ModuleLoader for NoModules {
    fn load_module(&self, path: &Path) -> Result<Module> {
        Err(Error::ModuleLoad {
            path: path.display().to_string(),
            message: "no binaries in this test".to_string(),
        })
    }
}

struct NoPatching;

impl MethodPatcher for NoPatching {
    fn install_body(&self, _method: &MethodIdentity, _body: MethodBody) -> Result<()> {
        Ok(())
    }
}

struct Game {
    session: TrackingSession,
    clock: Arc<ManualFrameClock>,
}

impl Game {
    fn new(config: TrackerConfig) -> Self {
        let clock = Arc::new(ManualFrameClock::new(1));
        let host = HostServices::new(Arc::new(NoModules), Arc::new(NoPatching), clock.clone());
        Game {
            session: TrackingSession::new(config, host).unwrap(),
            clock,
        }
    }

    /// Sends both hooks around a call, running `apply` only when the dispatcher allows it.
    fn hooked_call(
        &self,
        receiver: &Arc<Entity>,
        caller: Option<&Arc<Entity>>,
        calling_method: &str,
        mutator: &str,
        arguments: Vec<Object>,
        apply: impl FnOnce(&Entity),
    ) -> bool {
        let receiver_ref: EntityRef = receiver.clone();
        let caller = caller.map_or(Object::Null, |c| Object::Entity(c.clone()));
        let payload = Object::array_of(vec![
            caller,
            Object::string(calling_method),
            Object::array_of(arguments),
            Object::string(mutator),
            Object::Null,
        ]);

        let disposition = self
            .session
            .handle_message(&receiver_ref, BEFORE_MESSAGE, &payload)
            .unwrap();
        assert_eq!(disposition, MessageDisposition::Handled);

        let execute = payload.as_array().unwrap().read().unwrap()[4]
            .as_bool()
            .unwrap();
        if execute {
            apply(receiver);
        }

        self.session
            .handle_message(&receiver_ref, AFTER_MESSAGE, &Object::Null)
            .unwrap();
        execute
    }

    fn move_to(
        &self,
        receiver: &Arc<Entity>,
        caller: Option<&Arc<Entity>>,
        method: &str,
        to: Vector3,
    ) -> bool {
        self.hooked_call(
            receiver,
            caller,
            method,
            SET_POSITION,
            vec![Object::Vector3(to)],
            |e: &Entity| *e.position.write().unwrap() = to,
        )
    }
}

#[test]
fn records_hooked_writes_per_frame() {
    let game = Game::new(TrackerConfig::default());
    let player = Entity::new(1, "Player");
    let controller = Entity::new(2, "Controller");
    game.session.track(player.clone(), Arc::new(NoopHandlers));

    game.clock.set(10);
    let moved = Vector3::new(1.0, 0.0, 0.0);
    assert!(game.move_to(&player, Some(&controller), "Game.Controller.Update", moved));
    let turned = Quaternion::from_euler_degrees(Vector3::new(0.0, 90.0, 0.0));
    game.hooked_call(
        &player,
        Some(&controller),
        "Game.Controller.Update",
        SET_ROTATION,
        vec![Object::Quaternion(turned)],
        |e: &Entity| *e.rotation.write().unwrap() = turned,
    );

    game.clock.set(11);
    game.move_to(&player, None, "Game.Physics.Step", Vector3::new(2.0, 0.0, 0.0));

    let tracker = game.session.tracker();
    let frame_10 = tracker.query_changes(10, player.id());
    assert_eq!(frame_10.len(), 2);
    assert_eq!(frame_10[0].kind, ChangeKind::Position);
    assert_eq!(frame_10[0].value_before, TransformValue::Vector3(Vector3::ZERO));
    assert_eq!(frame_10[0].new_value, TransformValue::Vector3(moved));
    assert_eq!(frame_10[1].kind, ChangeKind::Rotation);
    assert_eq!(frame_10[1].caller.as_ref().map(|c| c.id()), Some(controller.id()));

    let frame_11 = tracker.query_changes(11, player.id());
    assert_eq!(frame_11.len(), 1);
    let previous = frame_11[0].previous_same_kind().unwrap();
    assert!(Arc::ptr_eq(&previous, &frame_10[0]));
    assert!(!frame_11[0].is_mismatch_with_previous());

    assert_eq!(tracker.newest_frame_with_data(0), Some(11));
    assert_eq!(tracker.newest_frame_with_data(1), Some(10));
    assert_eq!(tracker.frames_newer_than(10), 1);
}

#[test]
fn untracked_entities_are_not_recorded() {
    let game = Game::new(TrackerConfig::default());
    let crate_box = Entity::new(7, "Crate");

    assert!(game.move_to(&crate_box, None, "Game.Spawner.Place", Vector3::ONE));

    assert_eq!(crate_box.position(), Vector3::ONE);
    assert!(!game.session.tracker().has_any_changes());
}

#[test]
fn denied_modifier_is_suppressed_but_recorded() {
    let game = Game::new(TrackerConfig::default());
    let player = Entity::new(1, "Player");
    let jitter = Entity::new(3, "Jitter");
    game.session.track(player.clone(), Arc::new(NoopHandlers));
    game.session
        .skips()
        .add_modifier_to_denylist(ModifierKey::new(Some(jitter.id()), "Game.Jitter.Shake"));

    let shaken = Vector3::new(9.0, 9.0, 9.0);
    assert!(!game.move_to(&player, Some(&jitter), "Game.Jitter.Shake", shaken));
    assert!(game.move_to(&player, None, "Game.Physics.Step", Vector3::new(0.0, 1.0, 0.0)));

    assert_eq!(player.position(), Vector3::new(0.0, 1.0, 0.0));

    let changes = game.session.tracker().query_changes(1, player.id());
    assert_eq!(changes.len(), 2);
    assert!(changes[0].was_skipped);
    assert_eq!(changes[0].new_value, TransformValue::Vector3(Vector3::ZERO));
    assert!(!changes[1].was_skipped);
}

#[test]
fn skip_predicate_sees_the_interception() {
    let game = Game::new(TrackerConfig::default());
    let player = Entity::new(1, "Player");
    game.session.track(player.clone(), Arc::new(NoopHandlers));
    game.session
        .skips()
        .add_predicate(Arc::new(|ctx: &InterceptionContext, receiver: &dyn Transform| {
            ctx.kind == ChangeKind::Position && receiver.name() == "Player" && ctx.caller.is_none()
        }));

    let owner = Entity::new(4, "Owner");
    assert!(!game.move_to(&player, None, "Game.Teleporter.Fire", Vector3::ONE));
    assert!(game.move_to(&player, Some(&owner), "Game.Owner.Carry", Vector3::ONE));
    assert_eq!(player.position(), Vector3::ONE);
}

#[test]
fn history_is_bounded_by_frames() {
    let game = Game::new(TrackerConfig {
        keep_changes_for_max_frames: 3,
        ..TrackerConfig::default()
    });
    let player = Entity::new(1, "Player");
    game.session.track(player.clone(), Arc::new(NoopHandlers));

    for frame in 1..=6u16 {
        game.clock.set(u64::from(frame));
        let to = Vector3::new(f32::from(frame), 0.0, 0.0);
        game.move_to(&player, None, "Game.Mover.Update", to);
    }

    let tracker = game.session.tracker();
    assert_eq!(tracker.frame_count(), 3);
    assert!(tracker.query_changes(3, player.id()).is_empty());
    assert_eq!(tracker.query_changes(4, player.id()).len(), 1);

    // The evicted predecessor is still described by the oldest retained record.
    let oldest = &tracker.query_changes(4, player.id())[0];
    assert_eq!(oldest.previous_frame(), Some(3));
    assert_eq!(
        oldest.previous_new_value(),
        Some(TransformValue::Vector3(Vector3::new(3.0, 0.0, 0.0)))
    );
    assert!(!oldest.is_mismatch_with_previous());
}

#[test]
fn rarely_moved_entity_reveals_untracked_write() {
    let game = Game::new(TrackerConfig {
        keep_changes_for_max_frames: 2,
        ..TrackerConfig::default()
    });
    let player = Entity::new(1, "Player");
    let drone = Entity::new(2, "Drone");
    game.session.track(player.clone(), Arc::new(NoopHandlers));
    game.session.track(drone.clone(), Arc::new(NoopHandlers));

    game.move_to(&player, None, "Game.Spawner.Place", Vector3::new(1.0, 0.0, 0.0));
    for frame in 3..2000u16 {
        game.clock.set(u64::from(frame));
        let to = Vector3::new(f32::from(frame), 0.0, 0.0);
        game.move_to(&drone, None, "Game.Drone.Patrol", to);
    }

    // Moved behind the tracker's back.
    *player.position.write().unwrap() = Vector3::new(5.0, 0.0, 0.0);
    game.clock.set(4000);
    game.move_to(&player, None, "Game.Physics.Step", Vector3::new(6.0, 0.0, 0.0));

    let tracker = game.session.tracker();
    assert!(tracker.query_changes(1, player.id()).is_empty());
    let latest = &tracker.query_changes(4000, player.id())[0];
    assert_eq!(latest.previous_frame(), Some(1));
    assert!(latest.is_mismatch_with_previous());
}

#[test]
fn modifiers_group_by_caller_and_method() {
    let game = Game::new(TrackerConfig::default());
    let player = Entity::new(1, "Player");
    let enemy = Entity::new(2, "Enemy");
    let wind = Entity::new(5, "Wind");
    game.session.track(player.clone(), Arc::new(NoopHandlers));
    game.session.track(enemy.clone(), Arc::new(NoopHandlers));

    game.move_to(&player, Some(&wind), "Game.Wind.Push", Vector3::new(1.0, 0.0, 0.0));
    game.move_to(&enemy, Some(&wind), "Game.Wind.Push", Vector3::new(0.0, 0.0, 1.0));
    game.move_to(&player, None, "Game.Physics.Step", Vector3::new(1.0, -1.0, 0.0));
    game.move_to(&player, Some(&wind), "Game.Wind.Push", Vector3::new(2.0, -1.0, 0.0));

    let tracker = game.session.tracker();
    let all = tracker.modifiers(None, None);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].caller_name(), "Wind");
    assert_eq!(all[0].changes.len(), 3);
    assert_eq!(all[1].caller_name(), "None");

    let enemy_only = tracker.modifiers(Some(1), Some(enemy.id()));
    assert_eq!(enemy_only.len(), 1);
    assert_eq!(enemy_only[0].changes.len(), 1);

    let entities: Vec<EntityId> = tracker
        .tracked_entities(Some(1))
        .iter()
        .map(|e| e.id())
        .collect();
    assert_eq!(entities, vec![player.id(), enemy.id()]);
}

#[test]
fn foreign_messages_are_forwarded() {
    let game = Game::new(TrackerConfig::default());
    let player: EntityRef = Entity::new(1, "Player");

    let disposition = game
        .session
        .handle_message(&player, "OnTriggerEnter", &Object::Null)
        .unwrap();
    assert_eq!(disposition, MessageDisposition::Forward);
}

#[test]
fn disabled_tracking_lets_every_call_through() {
    let game = Game::new(TrackerConfig::default());
    let player = Entity::new(1, "Player");
    game.session.track(player.clone(), Arc::new(NoopHandlers));
    game.session
        .skips()
        .add_predicate(Arc::new(|_: &InterceptionContext, _: &dyn Transform| true));

    game.session.set_tracking_enabled(false);
    assert!(game.move_to(&player, None, "Game.Mover.Update", Vector3::ONE));
    assert!(!game.session.tracker().has_any_changes());

    game.session.set_tracking_enabled(true);
    assert!(!game.move_to(&player, None, "Game.Mover.Update", Vector3::ZERO));
    assert_eq!(player.position(), Vector3::ONE);
    assert!(game.session.tracker().has_any_changes());
}
