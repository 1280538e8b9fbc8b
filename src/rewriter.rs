//! Instruction stream rewriting around mutator call-sites.
//!
//! The [`Rewriter`] is a pure transformation: it takes a method body and a mutator and returns
//! a new body in which every call to that mutator is wrapped by two hook messages. For a call
//! `receiver.mutator(a, b)` the injected code is equivalent to:
//!
//! ```text
//! stloc b'; stloc a'; stloc recv'              // save operands, last argument first
//! args' = new object[] { box a', box b' }
//! ctx'  = new object[5] { this | null, "<calling method>", args', "<mutator>", null }
//! recv'.SendMessage("$..._Before$", ctx')      // dispatcher writes slot 4
//! if ((bool) ctx'[4]) {
//!     recv'.mutator(a', b')                    // the original call
//! }
//! recv'.SendMessage("$..._After$", null)
//! ```
//!
//! Labels that pointed at the original call instruction are moved to the first injected
//! instruction, so branches into the call-site still run the complete hook sequence.
//! Mutators are expected to be instance methods returning nothing, which holds for every
//! entry of [`MutatorTable::transform`].

use log::debug;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    il::{
        Instruction, InstructionEmitter, Label, MethodBody, MethodDef, MethodIdentity, OpCode,
        Operand, TypeSig, ValueLoader,
    },
    mutators::{MutatorIdentity, MutatorTable, AFTER_MESSAGE, BEFORE_MESSAGE},
    Error, Result,
};

/// Context array slot holding the calling entity, null for static callers.
pub const SLOT_CALLER: usize = 0;
/// Context array slot holding the calling method's full name.
pub const SLOT_CALLING_METHOD: usize = 1;
/// Context array slot holding the boxed original arguments.
pub const SLOT_ARGUMENTS: usize = 2;
/// Context array slot holding the mutator's full name.
pub const SLOT_MUTATOR: usize = 3;
/// Context array slot the dispatcher writes its execute-original decision to.
pub const SLOT_EXECUTE_ORIGINAL: usize = 4;
/// Number of slots of the context array.
pub const CONTEXT_SLOTS: usize = 5;

/// How the host executes code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize)]
pub enum ExecutionBackend {
    /// Just-in-time compiled, method bodies can be replaced at run time
    #[default]
    Jit,
    /// Ahead-of-time compiled, method bodies are fixed
    AheadOfTime,
}

/// Rewrites method bodies so that mutator calls go through the interception hooks.
#[derive(Debug, Clone)]
pub struct Rewriter {
    message_entry: MethodIdentity,
}

impl Rewriter {
    /// Creates a rewriter emitting calls to the message entry point of `mutators`.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedBackend`] for [`ExecutionBackend::AheadOfTime`], where
    /// installed bodies would never run.
    pub fn new(backend: ExecutionBackend, mutators: &MutatorTable) -> Result<Self> {
        if backend == ExecutionBackend::AheadOfTime {
            return Err(Error::UnsupportedBackend(backend));
        }

        Ok(Rewriter {
            message_entry: mutators.message_entry().clone(),
        })
    }

    /// Rewrites every call to `mutator` inside `method`.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the method has no body or its body cannot be decoded.
    pub fn rewrite(&self, method: &MethodDef, mutator: &MutatorIdentity) -> Result<MethodBody> {
        let body = method
            .body()?
            .ok_or_else(|| malformed_error!("Method '{}' has no body to rewrite", method.identity))?;
        self.rewrite_instructions(body, method, mutator)
    }

    /// Rewrites every call to `mutator` inside `body`, which belongs to `method`.
    ///
    /// A body without a matching call-site is returned unchanged.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the method runs out of local slots.
    pub fn rewrite_instructions(
        &self,
        body: &MethodBody,
        method: &MethodDef,
        mutator: &MutatorIdentity,
    ) -> Result<MethodBody> {
        if !body.calls(mutator) {
            return Ok(body.clone());
        }

        let mut locals = MethodBody::new(body.locals.clone(), Vec::new());
        let mut next_label = body.next_free_label().0;
        let mut emitter = InstructionEmitter::new();
        let mut sites = 0usize;

        for instruction in &body.instructions {
            if !instruction.calls(mutator) {
                emitter.emit(instruction.clone());
                continue;
            }

            let skip_label = Label(next_label);
            next_label += 1;
            sites += 1;

            self.emit_call_site(
                &mut emitter,
                &mut locals,
                instruction,
                method,
                mutator,
                skip_label,
            )?;
        }

        debug!(
            "Rewrote {} call-site(s) of '{}' in '{}'",
            sites, mutator, method.identity
        );

        Ok(MethodBody::new(locals.locals, emitter.finish()))
    }

    fn emit_call_site(
        &self,
        emitter: &mut InstructionEmitter,
        locals: &mut MethodBody,
        original: &Instruction,
        method: &MethodDef,
        mutator: &MutatorIdentity,
        skip_label: Label,
    ) -> Result<()> {
        let parameter_slots = mutator
            .parameters
            .iter()
            .map(|ty| locals.declare_local(ty.clone()))
            .collect::<Result<Vec<u16>>>()?;
        let receiver = locals.declare_local(TypeSig::reference(&mutator.declaring_type))?;
        let arguments = locals.declare_local(TypeSig::object_array())?;
        let context = locals.declare_local(TypeSig::object_array())?;

        // Existing branches into the call-site now enter the hook sequence.
        emitter.mark_labels(original.labels.iter().copied());

        for slot in parameter_slots.iter().rev() {
            emitter.store_local(*slot);
        }
        emitter.store_local(receiver);

        let argument_loaders: Vec<ValueLoader<'_>> = parameter_slots
            .iter()
            .zip(&mutator.parameters)
            .map(|(slot, ty)| {
                let slot = *slot;
                Box::new(move |e: &mut InstructionEmitter| {
                    e.load_local_as_object(slot, ty);
                }) as ValueLoader<'_>
            })
            .collect();
        emitter.emit_array_with_values(TypeSig::object(), arguments, argument_loaders, None);

        let is_static = method.is_static();
        let calling_method = method.full_name();
        let mutator_name = mutator.full_name();
        let context_loaders: Vec<ValueLoader<'_>> = vec![
            Box::new(move |e: &mut InstructionEmitter| {
                if is_static {
                    e.op(OpCode::Ldnull);
                } else {
                    e.load_arg(0);
                }
            }) as ValueLoader<'_>,
            Box::new(move |e: &mut InstructionEmitter| {
                e.load_str(&calling_method);
            }),
            Box::new(move |e: &mut InstructionEmitter| {
                e.load_local(arguments);
            }),
            Box::new(move |e: &mut InstructionEmitter| {
                e.load_str(&mutator_name);
            }),
        ];
        emitter.emit_array_with_values(
            TypeSig::object(),
            context,
            context_loaders,
            Some(CONTEXT_SLOTS),
        );

        emitter
            .load_local(receiver)
            .load_str(BEFORE_MESSAGE)
            .load_local(context)
            .call(OpCode::Callvirt, self.message_entry.clone());

        emitter
            .load_local(context)
            .load_i32(SLOT_EXECUTE_ORIGINAL as i32)
            .op(OpCode::LdelemRef)
            .op_with(OpCode::UnboxAny, Operand::Type(TypeSig::boolean()))
            .branch(OpCode::Brfalse, skip_label);

        emitter.load_local(receiver);
        for slot in &parameter_slots {
            emitter.load_local(*slot);
        }
        emitter.op_with(original.opcode, original.operand.clone());

        emitter.mark_label(skip_label);
        emitter
            .load_local(receiver)
            .load_str(AFTER_MESSAGE)
            .op(OpCode::Ldnull)
            .call(OpCode::Callvirt, self.message_entry.clone());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        il::{MethodAttributes, MethodRef},
        test::{caller_method, set_position, translate_xyz},
    };

    fn rewriter() -> Rewriter {
        Rewriter::new(ExecutionBackend::Jit, &MutatorTable::transform()).unwrap()
    }

    fn listing(body: &MethodBody) -> Vec<String> {
        body.instructions.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn aot_backend_is_rejected() {
        let result = Rewriter::new(ExecutionBackend::AheadOfTime, &MutatorTable::transform());
        assert!(matches!(
            result,
            Err(Error::UnsupportedBackend(ExecutionBackend::AheadOfTime))
        ));
    }

    #[test]
    fn body_without_call_site_is_unchanged() {
        let ty = caller_method("Game.Mover", "Idle", &set_position(), 0);
        let method = &ty.methods[0];
        let rewritten = rewriter().rewrite(method, &set_position()).unwrap();
        assert_eq!(Some(&rewritten), method.body().unwrap());
    }

    #[test]
    fn single_call_site_layout() {
        let ty = caller_method("Game.Mover", "Update", &set_position(), 1);
        let method = &ty.methods[0];
        let original = method.body().unwrap().unwrap();
        let rewritten = rewriter().rewrite(method, &set_position()).unwrap();

        // value, receiver, args array, context array
        assert_eq!(rewritten.locals.len(), original.locals.len() + 4);
        let value = original.locals.len();
        let receiver = value + 1;
        let args = value + 2;
        let ctx = value + 3;

        let expected: Vec<String> = vec![
            "ldarg A_1".into(),
            "ldc.r4 1.0".into(),
            "ldc.r4 0.0".into(),
            "ldc.r4 0.0".into(),
            "newobj UnityEngine.Vector3..ctor(System.Single,System.Single,System.Single)".into(),
            format!("stloc V_{value}"),
            format!("stloc V_{receiver}"),
            "ldc.i4 1".into(),
            "newarr System.Object".into(),
            "dup".into(),
            "ldc.i4 0".into(),
            format!("ldloc V_{value}"),
            "box UnityEngine.Vector3".into(),
            "stelem.ref".into(),
            format!("stloc V_{args}"),
            "ldc.i4 5".into(),
            "newarr System.Object".into(),
            "dup".into(),
            "ldc.i4 0".into(),
            "ldarg A_0".into(),
            "stelem.ref".into(),
            "dup".into(),
            "ldc.i4 1".into(),
            "ldstr \"Game.Mover.Update(UnityEngine.Transform)\"".into(),
            "stelem.ref".into(),
            "dup".into(),
            "ldc.i4 2".into(),
            format!("ldloc V_{args}"),
            "stelem.ref".into(),
            "dup".into(),
            "ldc.i4 3".into(),
            "ldstr \"UnityEngine.Transform.set_position(UnityEngine.Vector3)\"".into(),
            "stelem.ref".into(),
            format!("stloc V_{ctx}"),
            format!("ldloc V_{receiver}"),
            "ldstr \"$HandleGlobalInterceptorCallback_Before$\"".into(),
            format!("ldloc V_{ctx}"),
            "callvirt UnityEngine.Component.SendMessage(System.String,System.Object)".into(),
            format!("ldloc V_{ctx}"),
            "ldc.i4 4".into(),
            "ldelem.ref".into(),
            "unbox.any System.Boolean".into(),
            "brfalse IL_L0".into(),
            format!("ldloc V_{receiver}"),
            format!("ldloc V_{value}"),
            "callvirt UnityEngine.Transform.set_position(UnityEngine.Vector3)".into(),
            format!("IL_L0: ldloc V_{receiver}"),
            "ldstr \"$HandleGlobalInterceptorCallback_After$\"".into(),
            "ldnull".into(),
            "callvirt UnityEngine.Component.SendMessage(System.String,System.Object)".into(),
            "ret".into(),
        ];

        assert_eq!(listing(&rewritten), expected);
    }

    #[test]
    fn static_caller_passes_null() {
        let mut ty = caller_method("Game.Util", "Reset", &set_position(), 1);
        ty.methods[0].attributes |= MethodAttributes::STATIC;
        let rewritten = rewriter().rewrite(&ty.methods[0], &set_position()).unwrap();

        let text = listing(&rewritten);
        let caller_slot = text
            .iter()
            .position(|line| line == "ldc.i4 5")
            .map(|i| &text[i + 4])
            .unwrap();
        assert_eq!(caller_slot, "ldnull");
    }

    #[test]
    fn labels_move_to_first_injected_instruction() {
        let mutator = translate_xyz();
        let receiver_type = TypeSig::reference("UnityEngine.Transform");
        let body = MethodBody::new(
            vec![],
            vec![
                Instruction::with(OpCode::Br, Operand::Label(Label(0))),
                Instruction::with(OpCode::Ldarg, Operand::Argument(1)).labeled(Label(1)),
                Instruction::with(OpCode::LdcR4, Operand::Float32(1.0)),
                Instruction::with(OpCode::LdcR4, Operand::Float32(2.0)),
                Instruction::with(OpCode::LdcR4, Operand::Float32(3.0)),
                Instruction::with(OpCode::Callvirt, Operand::Method(MethodRef::from(mutator.clone())))
                    .labeled(Label(0)),
                Instruction::new(OpCode::Ret),
            ],
        );
        let method = MethodDef::new(
            MethodIdentity::new("Game.Mover", "Jump", vec![receiver_type]),
            body.clone(),
        );

        let rewritten = rewriter().rewrite(&method, &mutator).unwrap();

        // Three float saves, the receiver save, then the arrays.
        assert_eq!(rewritten.locals.len(), 6);
        let entry = rewritten.label_position(Label(0)).unwrap();
        assert_eq!(entry, 5);
        assert_eq!(rewritten.instructions[entry].opcode, OpCode::Stloc);
        assert_eq!(rewritten.instructions[entry].operand, Operand::Local(2));

        // The skip label is allocated above every label already in use.
        assert!(rewritten.label_position(Label(2)).is_some());

        // The original call is still present exactly once, without labels.
        assert_eq!(rewritten.call_count(&mutator), 1);
        let call = rewritten
            .instructions
            .iter()
            .find(|i| i.calls(&mutator))
            .unwrap();
        assert!(call.labels.is_empty());
    }

    #[test]
    fn every_call_site_is_wrapped() {
        let ty = caller_method("Game.Mover", "Update", &set_position(), 3);
        let rewritten = rewriter().rewrite(&ty.methods[0], &set_position()).unwrap();
        let entry = MutatorTable::transform().message_entry().clone();

        assert_eq!(rewritten.call_count(&set_position()), 3);
        assert_eq!(rewritten.call_count(&entry), 6);
        for label in 0..3 {
            assert!(rewritten.label_position(Label(label)).is_some());
        }
    }

    #[test]
    fn method_without_body() {
        let mut ty = caller_method("Game.Mover", "Update", &set_position(), 1);
        ty.methods[0].body = crate::il::BodyState::Absent;
        assert!(rewriter().rewrite(&ty.methods[0], &set_position()).is_err());
    }
}
