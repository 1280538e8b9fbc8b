//! Instruction emission helpers.
//!
//! [`InstructionEmitter`] appends instructions to a buffer and takes care of label placement:
//! a label marked with [`InstructionEmitter::mark_label`] is attached to whatever instruction is
//! emitted next. The rewriter uses this to keep existing branch targets pointing at the start
//! of an injected sequence.
//!
//! The array helpers produce the idiomatic stack-machine pattern for building an `object[]`
//! in place:
//!
//! ```text
//! ldc.i4 <len>
//! newarr <elem>
//! dup
//! ldc.i4 <index>
//! <load value>
//! stelem.ref
//! ...
//! ```
//!
//! # Examples
//!
//! ```rust
//! use mutscope::il::{InstructionEmitter, Label, OpCode, TypeSig};
//!
//! let mut emitter = InstructionEmitter::new();
//! emitter.mark_label(Label(7));
//! emitter.emit_new_array(2, TypeSig::object());
//! let instructions = emitter.finish();
//!
//! assert_eq!(instructions[0].opcode, OpCode::LdcI4);
//! assert_eq!(instructions[0].labels, vec![Label(7)]);
//! ```

use crate::il::{Instruction, Label, MethodRef, OpCode, Operand, TypeSig};

/// Emits the instructions that push one value onto the stack.
pub type ValueLoader<'a> = Box<dyn FnOnce(&mut InstructionEmitter) + 'a>;

/// Sequential instruction builder with pending-label support.
#[derive(Debug, Default)]
pub struct InstructionEmitter {
    instructions: Vec<Instruction>,
    pending_labels: Vec<Label>,
}

impl InstructionEmitter {
    /// Creates an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        InstructionEmitter::default()
    }

    /// Attaches `label` to the next emitted instruction.
    pub fn mark_label(&mut self, label: Label) {
        self.pending_labels.push(label);
    }

    /// Attaches several labels to the next emitted instruction.
    pub fn mark_labels(&mut self, labels: impl IntoIterator<Item = Label>) {
        self.pending_labels.extend(labels);
    }

    /// Appends an already built instruction, merging any pending labels into it.
    pub fn emit(&mut self, mut instruction: Instruction) -> &mut Self {
        if !self.pending_labels.is_empty() {
            let mut labels = std::mem::take(&mut self.pending_labels);
            labels.append(&mut instruction.labels);
            instruction.labels = labels;
        }
        self.instructions.push(instruction);
        self
    }

    /// Appends an instruction without operand.
    pub fn op(&mut self, opcode: OpCode) -> &mut Self {
        self.emit(Instruction::new(opcode))
    }

    /// Appends an instruction with the given operand.
    pub fn op_with(&mut self, opcode: OpCode, operand: Operand) -> &mut Self {
        self.emit(Instruction::with(opcode, operand))
    }

    /// `ldc.i4 value`
    pub fn load_i32(&mut self, value: i32) -> &mut Self {
        self.op_with(OpCode::LdcI4, Operand::Int32(value))
    }

    /// `ldstr value`
    pub fn load_str(&mut self, value: &str) -> &mut Self {
        self.op_with(OpCode::Ldstr, Operand::String(value.to_string()))
    }

    /// `ldloc slot`
    pub fn load_local(&mut self, slot: u16) -> &mut Self {
        self.op_with(OpCode::Ldloc, Operand::Local(slot))
    }

    /// `stloc slot`
    pub fn store_local(&mut self, slot: u16) -> &mut Self {
        self.op_with(OpCode::Stloc, Operand::Local(slot))
    }

    /// `ldarg index`
    pub fn load_arg(&mut self, index: u16) -> &mut Self {
        self.op_with(OpCode::Ldarg, Operand::Argument(index))
    }

    /// `call` or `callvirt` to `method`.
    pub fn call(&mut self, opcode: OpCode, method: impl Into<MethodRef>) -> &mut Self {
        self.op_with(opcode, Operand::Method(method.into()))
    }

    /// Branch instruction targeting `label`.
    pub fn branch(&mut self, opcode: OpCode, label: Label) -> &mut Self {
        self.op_with(opcode, Operand::Label(label))
    }

    /// Loads the value stored in `slot`, boxing it when `ty` is a value type.
    pub fn load_local_as_object(&mut self, slot: u16, ty: &TypeSig) -> &mut Self {
        self.load_local(slot);
        if ty.is_value_type {
            self.op_with(OpCode::Box, Operand::Type(ty.clone()));
        }
        self
    }

    /// Pushes a new array of `len` elements of type `element`.
    pub fn emit_new_array(&mut self, len: i32, element: TypeSig) -> &mut Self {
        self.load_i32(len);
        self.op_with(OpCode::Newarr, Operand::Type(element))
    }

    /// Stores into element `index` of the array on top of the stack, keeping the array there.
    ///
    /// `load` emits the instructions that push the value to store.
    pub fn emit_store_element<F>(&mut self, index: i32, load: F) -> &mut Self
    where
        F: FnOnce(&mut InstructionEmitter),
    {
        self.op(OpCode::Dup);
        self.load_i32(index);
        load(self);
        self.op(OpCode::StelemRef)
    }

    /// Builds an array from the given value loaders and stores it into local `store_to`.
    ///
    /// The array has `forced_size` elements when given, otherwise one per loader. Slots without
    /// a loader stay null.
    pub fn emit_array_with_values(
        &mut self,
        element: TypeSig,
        store_to: u16,
        loaders: Vec<ValueLoader<'_>>,
        forced_size: Option<usize>,
    ) -> &mut Self {
        let len = forced_size.unwrap_or(loaders.len()).max(loaders.len());
        self.emit_new_array(i32::try_from(len).unwrap_or(i32::MAX), element);
        for (index, load) in loaders.into_iter().enumerate() {
            self.emit_store_element(i32::try_from(index).unwrap_or(i32::MAX), load);
        }
        self.store_local(store_to)
    }

    /// Number of instructions emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` if nothing has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Consumes the emitter and returns the instructions.
    ///
    /// Labels marked after the last instruction are attached to a trailing `nop` so they keep
    /// a valid target.
    #[must_use]
    pub fn finish(mut self) -> Vec<Instruction> {
        if !self.pending_labels.is_empty() {
            self.op(OpCode::Nop);
        }
        self.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_labels_attach_to_next_instruction() {
        let mut emitter = InstructionEmitter::new();
        emitter.load_i32(1);
        emitter.mark_label(Label(3));
        emitter.emit(Instruction::new(OpCode::Pop).labeled(Label(9)));

        let instructions = emitter.finish();
        assert!(instructions[0].labels.is_empty());
        assert_eq!(instructions[1].labels, vec![Label(3), Label(9)]);
    }

    #[test]
    fn dangling_labels_get_a_nop() {
        let mut emitter = InstructionEmitter::new();
        emitter.op(OpCode::Pop);
        emitter.mark_label(Label(1));

        let instructions = emitter.finish();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[1].opcode, OpCode::Nop);
        assert_eq!(instructions[1].labels, vec![Label(1)]);
    }

    #[test]
    fn array_with_values_layout() {
        let vector = TypeSig::value("UnityEngine.Vector3");
        let mut emitter = InstructionEmitter::new();
        emitter.emit_array_with_values(
            TypeSig::object(),
            5,
            vec![
                Box::new(|e: &mut InstructionEmitter| {
                    e.op(OpCode::Ldnull);
                }) as ValueLoader<'_>,
                Box::new(move |e: &mut InstructionEmitter| {
                    e.load_local_as_object(2, &vector);
                }),
            ],
            Some(3),
        );

        let text: Vec<String> = emitter
            .finish()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            text,
            vec![
                "ldc.i4 3",
                "newarr System.Object",
                "dup",
                "ldc.i4 0",
                "ldnull",
                "stelem.ref",
                "dup",
                "ldc.i4 1",
                "ldloc V_2",
                "box UnityEngine.Vector3",
                "stelem.ref",
                "stloc V_5",
            ]
        );
    }
}
