//! Instruction representation for the rewriting IR.
//!
//! The IR mirrors the stack-machine shape of CIL closely enough that the rewriter can express
//! the same transformation a bytecode patcher would apply, while staying independent of any
//! particular binary encoding. Instructions are plain data: an [`OpCode`], an [`Operand`] and
//! the [`Label`]s that mark the instruction as a branch target.
//!
//! # Key Components
//!
//! - [`Instruction`] - One decoded instruction plus the labels pointing at it
//! - [`OpCode`] - The supported operations
//! - [`Operand`] - Type-safe operand representation
//! - [`FlowType`] - Control flow behaviour classification

use std::fmt;

use strum::Display;

use crate::il::{MethodIdentity, MethodRef, TypeSig};

/// The operations of the rewriting IR.
///
/// Only the subset needed to describe mutator call-sites and the code injected around them is
/// modelled. Mnemonics follow the CIL spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum OpCode {
    /// Do nothing
    #[strum(serialize = "nop")]
    Nop,
    /// Push argument `n`
    #[strum(serialize = "ldarg")]
    Ldarg,
    /// Push local `n`
    #[strum(serialize = "ldloc")]
    Ldloc,
    /// Pop into local `n`
    #[strum(serialize = "stloc")]
    Stloc,
    /// Push the null reference
    #[strum(serialize = "ldnull")]
    Ldnull,
    /// Push a string literal
    #[strum(serialize = "ldstr")]
    Ldstr,
    /// Push a 32-bit integer constant
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    /// Push a 32-bit float constant
    #[strum(serialize = "ldc.r4")]
    LdcR4,
    /// Pop a length, push a new array of the operand's element type
    #[strum(serialize = "newarr")]
    Newarr,
    /// Duplicate the top of the stack
    #[strum(serialize = "dup")]
    Dup,
    /// Pop value, index and array, store the reference element
    #[strum(serialize = "stelem.ref")]
    StelemRef,
    /// Pop index and array, push the reference element
    #[strum(serialize = "ldelem.ref")]
    LdelemRef,
    /// Box the value type on top of the stack
    #[strum(serialize = "box")]
    Box,
    /// Unbox the reference on top of the stack into the operand's value type
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    /// Static or non-virtual call
    #[strum(serialize = "call")]
    Call,
    /// Virtual call
    #[strum(serialize = "callvirt")]
    Callvirt,
    /// Construct a new object
    #[strum(serialize = "newobj")]
    Newobj,
    /// Unconditional branch
    #[strum(serialize = "br")]
    Br,
    /// Branch if the popped value is true / non-null / non-zero
    #[strum(serialize = "brtrue")]
    Brtrue,
    /// Branch if the popped value is false / null / zero
    #[strum(serialize = "brfalse")]
    Brfalse,
    /// Discard the top of the stack
    #[strum(serialize = "pop")]
    Pop,
    /// Return from the method
    #[strum(serialize = "ret")]
    Ret,
}

impl OpCode {
    /// How this operation affects control flow.
    #[must_use]
    pub const fn flow_type(&self) -> FlowType {
        match self {
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj => FlowType::Call,
            OpCode::Br => FlowType::UnconditionalBranch,
            OpCode::Brtrue | OpCode::Brfalse => FlowType::ConditionalBranch,
            OpCode::Ret => FlowType::Return,
            _ => FlowType::Sequential,
        }
    }

    /// Returns `true` for the two method invocation operations.
    ///
    /// `newobj` also invokes a method, but constructors are never mutators.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(self, OpCode::Call | OpCode::Callvirt)
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
}

/// A branch target marker.
///
/// Labels are attached to the instruction they mark (see [`Instruction::labels`]) and referenced
/// by branch instructions through [`Operand::Label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_L{}", self.0)
    }
}

/// Represents an operand in a structured way.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// 32-bit integer constant
    Int32(i32),
    /// 32-bit float constant
    Float32(f32),
    /// String literal
    String(String),
    /// Local variable index
    Local(u16),
    /// Method argument index
    Argument(u16),
    /// Type reference
    Type(TypeSig),
    /// Method reference
    Method(MethodRef),
    /// Branch target
    Label(Label),
}

impl Operand {
    /// Returns a formatted string representation of the operand.
    ///
    /// `None` is returned for [`Operand::None`].
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Operand::None => None,
            Operand::Int32(value) => Some(value.to_string()),
            Operand::Float32(value) => Some(format!("{value:?}")),
            Operand::String(value) => Some(format!("{value:?}")),
            Operand::Local(index) => Some(format!("V_{index}")),
            Operand::Argument(index) => Some(format!("A_{index}")),
            Operand::Type(ty) => Some(ty.full_name.clone()),
            Operand::Method(method) => Some(method.to_string()),
            Operand::Label(label) => Some(label.to_string()),
        }
    }
}

/// One instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation
    pub opcode: OpCode,
    /// The operation's operand
    pub operand: Operand,
    /// Labels marking this instruction as a branch target
    pub labels: Vec<Label>,
}

impl Instruction {
    /// Creates an instruction without operand.
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
            labels: Vec::new(),
        }
    }

    /// Creates an instruction with the given operand.
    #[must_use]
    pub fn with(opcode: OpCode, operand: Operand) -> Self {
        Instruction {
            opcode,
            operand,
            labels: Vec::new(),
        }
    }

    /// Attaches `label` to this instruction.
    #[must_use]
    pub fn labeled(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    /// Returns the resolved target of a `call`/`callvirt`, if any.
    #[must_use]
    pub fn call_target(&self) -> Option<&MethodIdentity> {
        if !self.opcode.is_call() {
            return None;
        }

        match &self.operand {
            Operand::Method(MethodRef::Resolved(method)) => Some(method),
            _ => None,
        }
    }

    /// Returns `true` if this instruction calls exactly `method`.
    #[must_use]
    pub fn calls(&self, method: &MethodIdentity) -> bool {
        self.call_target().is_some_and(|target| target == method)
    }

    /// The branch target of a branch instruction.
    #[must_use]
    pub fn branch_target(&self) -> Option<Label> {
        match (self.opcode.flow_type(), &self.operand) {
            (
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch,
                Operand::Label(label),
            ) => Some(*label),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.labels {
            write!(f, "{label}: ")?;
        }

        match self.operand.as_string() {
            Some(operand) => write!(f, "{} {}", self.opcode, operand),
            None => write!(f, "{}", self.opcode),
        }
    }
}
