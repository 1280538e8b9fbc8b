//! Loaded modules, types, methods and method bodies.
//!
//! A [`Module`] is what a [`crate::host::ModuleLoader`] produces for one binary: its path and
//! last-modified time (used by the cache staleness check) and the types it defines. Loaders
//! report partial failures in-band instead of failing the whole module: a type that could not
//! be resolved is listed in [`Module::unresolved_types`], a method whose body could not be
//! decoded carries [`BodyState::Malformed`]. The scanner skips such units and keeps going.

use std::{path::PathBuf, time::SystemTime};

use bitflags::bitflags;

use crate::{
    il::{Instruction, Label, MethodIdentity, Operand, TypeSig},
    Result,
};

bitflags! {
    /// Method attribute flags, using the ECMA-335 `MethodAttributes` bit values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodAttributes: u16 {
        /// Method is defined on the type rather than per instance
        const STATIC = 0x0010;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special, e.g. a property accessor
        const SPECIAL_NAME = 0x0800;
        /// Runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x1000;
    }
}

/// Local variables and instructions of one method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodBody {
    /// Types of the declared local variables, indexed by slot
    pub locals: Vec<TypeSig>,
    /// The instruction stream
    pub instructions: Vec<Instruction>,
}

impl MethodBody {
    /// Creates a body from locals and instructions.
    #[must_use]
    pub fn new(locals: Vec<TypeSig>, instructions: Vec<Instruction>) -> Self {
        MethodBody {
            locals,
            instructions,
        }
    }

    /// Declares a new local of type `ty` and returns its slot.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the method already uses every local slot.
    pub fn declare_local(&mut self, ty: TypeSig) -> Result<u16> {
        let slot = u16::try_from(self.locals.len())
            .map_err(|_| malformed_error!("Method exceeds the maximum number of locals"))?;
        self.locals.push(ty);
        Ok(slot)
    }

    /// Returns a label id not used by any instruction of this body.
    #[must_use]
    pub fn next_free_label(&self) -> Label {
        let highest = self
            .instructions
            .iter()
            .flat_map(|instr| {
                let target = match instr.operand {
                    Operand::Label(label) => Some(label),
                    _ => None,
                };
                instr.labels.iter().copied().chain(target)
            })
            .map(|label| label.0)
            .max();

        Label(highest.map_or(0, |h| h + 1))
    }

    /// Returns `true` if any instruction calls `method`.
    #[must_use]
    pub fn calls(&self, method: &MethodIdentity) -> bool {
        self.instructions.iter().any(|instr| instr.calls(method))
    }

    /// Number of instructions calling `method`.
    #[must_use]
    pub fn call_count(&self, method: &MethodIdentity) -> usize {
        self.instructions
            .iter()
            .filter(|instr| instr.calls(method))
            .count()
    }

    /// Returns the index of the instruction marked with `label`.
    #[must_use]
    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.instructions
            .iter()
            .position(|instr| instr.labels.contains(&label))
    }
}

/// Decoding state of a method body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyState {
    /// The method has no body (abstract, extern, runtime-provided)
    Absent,
    /// Successfully decoded body
    Decoded(MethodBody),
    /// The body could not be decoded, with the reason
    Malformed(String),
}

/// A method definition inside a type.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Identity of the method
    pub identity: MethodIdentity,
    /// Attribute flags
    pub attributes: MethodAttributes,
    /// Fully qualified names of custom attributes applied to the method
    pub custom_attributes: Vec<String>,
    /// The method body
    pub body: BodyState,
}

impl MethodDef {
    /// Creates an instance method with a decoded body.
    #[must_use]
    pub fn new(identity: MethodIdentity, body: MethodBody) -> Self {
        MethodDef {
            identity,
            attributes: MethodAttributes::empty(),
            custom_attributes: Vec::new(),
            body: BodyState::Decoded(body),
        }
    }

    /// Full name of the method, see [`MethodIdentity::full_name`].
    #[must_use]
    pub fn full_name(&self) -> String {
        self.identity.full_name()
    }

    /// Returns `true` if the method has no `this` argument.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// Returns `true` if a custom attribute with the given simple or full name is applied.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.custom_attributes.iter().any(|attribute| {
            attribute == name || attribute.rsplit('.').next() == Some(name)
        })
    }

    /// Returns the decoded body, `None` for methods without one.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body could not be decoded.
    pub fn body(&self) -> Result<Option<&MethodBody>> {
        match &self.body {
            BodyState::Absent => Ok(None),
            BodyState::Decoded(body) => Ok(Some(body)),
            BodyState::Malformed(reason) => Err(malformed_error!(
                "Body of '{}' is malformed: {}",
                self.identity,
                reason
            )),
        }
    }
}

/// A type definition and its methods.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Fully qualified type name
    pub full_name: String,
    /// Methods and constructors defined by the type
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// Creates a type definition.
    #[must_use]
    pub fn new(full_name: &str, methods: Vec<MethodDef>) -> Self {
        TypeDef {
            full_name: full_name.to_string(),
            methods,
        }
    }

    /// Finds a method or constructor by its full name.
    #[must_use]
    pub fn method_by_full_name(&self, full_name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.full_name() == full_name)
    }
}

/// A type the loader could not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedType {
    /// Name of the type, as far as it is known
    pub name: String,
    /// Loader supplied reason
    pub reason: String,
}

/// A loaded binary module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Path of the binary on disk
    pub path: PathBuf,
    /// Last-modified time of the binary
    pub last_modified: SystemTime,
    /// Resolved type definitions
    pub types: Vec<TypeDef>,
    /// Types that could not be resolved
    pub unresolved_types: Vec<UnresolvedType>,
}

impl Module {
    /// Creates a module.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, last_modified: SystemTime, types: Vec<TypeDef>) -> Self {
        Module {
            path: path.into(),
            last_modified,
            types,
            unresolved_types: Vec::new(),
        }
    }

    /// Finds a type by its full name.
    #[must_use]
    pub fn type_by_name(&self, full_name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.full_name == full_name)
    }

    /// Finds a method by identity.
    #[must_use]
    pub fn method(&self, identity: &MethodIdentity) -> Option<&MethodDef> {
        self.type_by_name(&identity.declaring_type)?
            .methods
            .iter()
            .find(|m| &m.identity == identity)
    }

    /// Total number of method definitions across all types.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.types.iter().map(|t| t.methods.len()).sum()
    }
}
