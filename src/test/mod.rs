//! Shared fixtures for the unit tests: mock entities, module factories, in-memory host
//! collaborators, and an interpreter that executes (rewritten) method bodies.


use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub use vm::{Interpreter, MessageSink};

use crate::{
    dispatch::InterceptionContext,
    host::{ChangeHandlers, EntityId, MethodPatcher, ModuleLoader, Transform},
    il::{
        Instruction, MethodBody, MethodDef, MethodIdentity, MethodRef, Module, OpCode, Operand,
        TypeDef, TypeSig,
    },
    mutators::ChangeKind,
    tracker::ChangeRecord,
    value::{Object, Quaternion, TransformValue, Vector3},
    Error, Result,
};

/// Path every [`module_with`] module is loaded from.
pub const MODULE_PATH: &str = "Game.dll";

/// Last-modified time of every [`module_with`] module.
pub fn module_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1000)
}

const TRANSFORM: &str = "UnityEngine.Transform";

pub struct MockTransform {
    id: EntityId,
    name: String,
    position: RwLock<Vector3>,
    rotation: RwLock<Quaternion>,
    scale: RwLock<Vector3>,
}

impl MockTransform {
    pub fn new(id: u64) -> Arc<Self> {
        Self::at(id, Vector3::ZERO)
    }

    pub fn at(id: u64, position: Vector3) -> Arc<Self> {
        Arc::new(MockTransform {
            id: EntityId(id),
            name: format!("Entity{id}"),
            position: RwLock::new(position),
            rotation: RwLock::new(Quaternion::IDENTITY),
            scale: RwLock::new(Vector3::ONE),
        })
    }

    pub fn set_position(&self, position: Vector3) {
        *self.position.write().unwrap() = position;
    }

    pub fn set_rotation(&self, rotation: Quaternion) {
        *self.rotation.write().unwrap() = rotation;
    }

    pub fn set_local_scale(&self, scale: Vector3) {
        *self.scale.write().unwrap() = scale;
    }
}

impl Transform for MockTransform {
    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn hierarchy_path(&self) -> String {
        format!("Scene/{}", self.name)
    }

    fn position(&self) -> Vector3 {
        *self.position.read().unwrap()
    }

    fn rotation(&self) -> Quaternion {
        *self.rotation.read().unwrap()
    }

    fn local_scale(&self) -> Vector3 {
        *self.scale.read().unwrap()
    }
}

/// Counts the notifications it receives per change kind.
#[derive(Default)]
pub struct RecordingHandlers {
    positions: AtomicUsize,
    rotations: AtomicUsize,
    scales: AtomicUsize,
}

impl RecordingHandlers {
    pub fn positions(&self) -> usize {
        self.positions.load(Ordering::SeqCst)
    }

    pub fn rotations(&self) -> usize {
        self.rotations.load(Ordering::SeqCst)
    }

    pub fn scales(&self) -> usize {
        self.scales.load(Ordering::SeqCst)
    }
}

impl ChangeHandlers for RecordingHandlers {
    fn on_position_changed(&self, _change: &Arc<ChangeRecord>) {
        self.positions.fetch_add(1, Ordering::SeqCst);
    }

    fn on_rotation_changed(&self, _change: &Arc<ChangeRecord>) {
        self.rotations.fetch_add(1, Ordering::SeqCst);
    }

    fn on_scale_changed(&self, _change: &Arc<ChangeRecord>) {
        self.scales.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn set_position() -> MethodIdentity {
    MethodIdentity::new(TRANSFORM, "set_position", vec![TypeSig::value("UnityEngine.Vector3")])
}

pub fn set_rotation() -> MethodIdentity {
    MethodIdentity::new(TRANSFORM, "set_rotation", vec![TypeSig::value("UnityEngine.Quaternion")])
}

pub fn set_local_scale() -> MethodIdentity {
    MethodIdentity::new(TRANSFORM, "set_localScale", vec![TypeSig::value("UnityEngine.Vector3")])
}

pub fn translate_xyz() -> MethodIdentity {
    MethodIdentity::new(
        TRANSFORM,
        "Translate",
        vec![TypeSig::single(), TypeSig::single(), TypeSig::single()],
    )
}

fn push_argument(instructions: &mut Vec<Instruction>, parameter: &TypeSig) {
    let floats: &[f32] = match parameter.full_name.as_str() {
        "UnityEngine.Vector3" => &[1.0, 0.0, 0.0],
        "UnityEngine.Quaternion" => &[0.0, 0.0, 0.0, 1.0],
        "System.Single" => &[1.0],
        _ => {
            instructions.push(Instruction::with(OpCode::LdcI4, Operand::Int32(0)));
            return;
        }
    };

    for value in floats {
        instructions.push(Instruction::with(OpCode::LdcR4, Operand::Float32(*value)));
    }
    if parameter.full_name != "System.Single" {
        let ctor = MethodIdentity::new(
            &parameter.full_name,
            ".ctor",
            vec![TypeSig::single(); floats.len()],
        );
        instructions.push(Instruction::with(
            OpCode::Newobj,
            Operand::Method(MethodRef::from(ctor)),
        ));
    }
}

/// A type with one instance method `name(UnityEngine.Transform)` that calls each mutator the
/// given number of times on its argument.
pub fn caller_calling(type_name: &str, name: &str, calls: &[(&MethodIdentity, usize)]) -> TypeDef {
    let mut instructions = Vec::new();
    for (mutator, count) in calls {
        for _ in 0..*count {
            instructions.push(Instruction::with(OpCode::Ldarg, Operand::Argument(1)));
            for parameter in &mutator.parameters {
                push_argument(&mut instructions, parameter);
            }
            instructions.push(Instruction::with(
                OpCode::Callvirt,
                Operand::Method(MethodRef::from((*mutator).clone())),
            ));
        }
    }
    instructions.push(Instruction::new(OpCode::Ret));

    let identity = MethodIdentity::new(type_name, name, vec![TypeSig::reference(TRANSFORM)]);
    TypeDef::new(
        type_name,
        vec![MethodDef::new(identity, MethodBody::new(Vec::new(), instructions))],
    )
}

pub fn caller_method(type_name: &str, name: &str, mutator: &MethodIdentity, calls: usize) -> TypeDef {
    caller_calling(type_name, name, &[(mutator, calls)])
}

pub fn module_with(types: Vec<TypeDef>) -> Module {
    Module::new(MODULE_PATH, module_time(), types)
}

/// A context array as the rewritten code builds it, with an empty decision slot.
pub fn context_payload(
    caller: Option<Arc<MockTransform>>,
    calling_method: &str,
    arguments: Vec<Object>,
    mutator: &str,
) -> Object {
    let caller = match caller {
        Some(caller) => Object::Entity(caller),
        None => Object::Null,
    };
    Object::array_of(vec![
        caller,
        Object::string(calling_method),
        Object::array_of(arguments),
        Object::string(mutator),
        Object::Null,
    ])
}

/// A position interception of `set_position` before its "after" hook.
pub fn pending_context(caller: Option<Arc<MockTransform>>, calling_method: &str) -> InterceptionContext {
    InterceptionContext {
        caller: caller.map(|c| c as Arc<dyn Transform>),
        calling_method: calling_method.to_string(),
        arguments: Vec::new(),
        mutator: set_position().full_name(),
        kind: ChangeKind::Position,
        should_execute_original: true,
        value_before: TransformValue::Vector3(Vector3::ZERO),
        new_value: None,
    }
}

/// A [`ModuleLoader`] serving modules from memory.
#[derive(Default)]
pub struct InMemoryLoader {
    modules: RwLock<HashMap<PathBuf, Module>>,
    loads: AtomicUsize,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        InMemoryLoader::default()
    }

    pub fn insert(&self, module: Module) {
        self.modules
            .write()
            .unwrap()
            .insert(module.path.clone(), module);
    }

    /// Changes the last-modified time of a stored module.
    pub fn touch(&self, path: &Path, modified: SystemTime) {
        if let Some(module) = self.modules.write().unwrap().get_mut(path) {
            module.last_modified = modified;
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for InMemoryLoader {
    fn load_module(&self, path: &Path) -> Result<Module> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.modules
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::ModuleLoad {
                path: path.display().to_string(),
                message: "no such module".to_string(),
            })
    }
}

/// A [`MethodPatcher`] that records installed bodies.
#[derive(Default)]
pub struct RecordingPatcher {
    installed: Mutex<Vec<(MethodIdentity, MethodBody)>>,
    failure: Mutex<Option<String>>,
}

impl RecordingPatcher {
    pub fn new() -> Self {
        RecordingPatcher::default()
    }

    /// Makes every further installation fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn installed(&self) -> Vec<(MethodIdentity, MethodBody)> {
        self.installed.lock().unwrap().clone()
    }

    /// The most recently installed body of `method`.
    pub fn body_of(&self, method: &MethodIdentity) -> Option<MethodBody> {
        self.installed
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, body)| body.clone())
    }
}

impl MethodPatcher for RecordingPatcher {
    fn install_body(&self, method: &MethodIdentity, body: MethodBody) -> Result<()> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(Error::Patch {
                method: method.full_name(),
                message,
            });
        }
        self.installed.lock().unwrap().push((method.clone(), body));
        Ok(())
    }
}
