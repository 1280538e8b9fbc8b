//! Intermediate representation of loaded modules and method bodies.
//!
//! The host's [`crate::host::ModuleLoader`] decodes binaries into this representation; the
//! scanner reads it and the rewriter produces new [`MethodBody`] values in it, which the host's
//! [`crate::host::MethodPatcher`] then installs.
//!
//! # Key Components
//!
//! - [`Module`], [`TypeDef`], [`MethodDef`] - Definitions of a loaded binary
//! - [`MethodBody`] - Locals and instructions of one method
//! - [`Instruction`], [`OpCode`], [`Operand`], [`Label`] - The instruction stream
//! - [`MethodIdentity`], [`TypeSig`] - Hashable method and type references
//! - [`InstructionEmitter`] - Builder used to generate injected code

mod emitter;
mod identity;
mod instruction;
mod module;

pub use emitter::{InstructionEmitter, ValueLoader};
pub use identity::{MethodIdentity, MethodRef, TypeSig};
pub use instruction::{FlowType, Instruction, Label, OpCode, Operand};
pub use module::{
    BodyState, MethodAttributes, MethodBody, MethodDef, Module, TypeDef, UnresolvedType,
};
