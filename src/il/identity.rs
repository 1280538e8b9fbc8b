//! Type and method identities.
//!
//! Identities are plain, hashable values. Two references denote the same method only if the
//! declaring type, the method name and every parameter type match; the method name alone is
//! never enough because mutators are commonly overloaded (`Translate(Vector3)` vs.
//! `Translate(Vector3, Space)`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A reference to a type as it appears in a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSig {
    /// Fully qualified type name, `Namespace.Type`
    pub full_name: String,
    /// `true` for value types, which must be boxed before being stored in an object array
    pub is_value_type: bool,
}

impl TypeSig {
    /// A value type reference.
    #[must_use]
    pub fn value(full_name: &str) -> Self {
        TypeSig {
            full_name: full_name.to_string(),
            is_value_type: true,
        }
    }

    /// A reference type reference.
    #[must_use]
    pub fn reference(full_name: &str) -> Self {
        TypeSig {
            full_name: full_name.to_string(),
            is_value_type: false,
        }
    }

    /// `System.Object`
    #[must_use]
    pub fn object() -> Self {
        TypeSig::reference("System.Object")
    }

    /// `System.Object[]`
    #[must_use]
    pub fn object_array() -> Self {
        TypeSig::reference("System.Object[]")
    }

    /// `System.String`
    #[must_use]
    pub fn string() -> Self {
        TypeSig::reference("System.String")
    }

    /// `System.Boolean`
    #[must_use]
    pub fn boolean() -> Self {
        TypeSig::value("System.Boolean")
    }

    /// `System.Single`
    #[must_use]
    pub fn single() -> Self {
        TypeSig::value("System.Single")
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Stable identity of a method: declaring type, name and parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodIdentity {
    /// Fully qualified name of the declaring type
    pub declaring_type: String,
    /// Method name, `.ctor` for constructors
    pub name: String,
    /// Parameter types in declaration order, excluding `this`
    pub parameters: Vec<TypeSig>,
}

impl MethodIdentity {
    /// Creates a new method identity.
    #[must_use]
    pub fn new(declaring_type: &str, name: &str, parameters: Vec<TypeSig>) -> Self {
        MethodIdentity {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            parameters,
        }
    }

    /// Renders the identity as `Declaring.Type.Name(Param.One,Param.Two)`.
    ///
    /// This string is what rewritten code embeds as a literal and what the dispatcher uses to
    /// look up the change kind, so its format must stay stable.
    #[must_use]
    pub fn full_name(&self) -> String {
        let parameters = self
            .parameters
            .iter()
            .map(|p| p.full_name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}.{}({})", self.declaring_type, self.name, parameters)
    }

    /// Returns `true` for instance and static constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// A method reference operand.
///
/// References the loader could not bind to a concrete method stay `Unresolved` and can never
/// match a mutator.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodRef {
    /// Fully resolved reference
    Resolved(MethodIdentity),
    /// Raw reference text or token the loader could not resolve
    Unresolved(String),
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodRef::Resolved(method) => method.fmt(f),
            MethodRef::Unresolved(raw) => write!(f, "<unresolved {raw}>"),
        }
    }
}

impl From<MethodIdentity> for MethodRef {
    fn from(method: MethodIdentity) -> Self {
        MethodRef::Resolved(method)
    }
}
