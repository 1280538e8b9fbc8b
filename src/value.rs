//! Value types observed by the tracker and the boxed object model used by hook payloads.
//!
//! Monitored fields are either three-component vectors (position, scale) or quaternions
//! (rotation). [`TransformValue`] unifies both so records and contexts can carry either one.
//!
//! Rewritten call-sites hand their state to the dispatcher as an array of boxed values, the
//! same shape the host would produce for an `object[]`. [`Object`] models one such boxed
//! value. Arrays are shared and interior-mutable, because the dispatcher writes its skip
//! decision back into the array the rewritten code reads from afterwards.

use std::{
    fmt,
    ops::{Add, Mul},
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::host::{EntityRef, Transform};

/// A three-component single precision vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vector3 {
    /// The zero vector.
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);
    /// The vector with all components set to one.
    pub const ONE: Vector3 = Vector3::new(1.0, 1.0, 1.0);

    /// Creates a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// A rotation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
    /// W (scalar) component
    pub w: f32,
}

impl Quaternion {
    /// The identity rotation.
    pub const IDENTITY: Quaternion = Quaternion::new(0.0, 0.0, 0.0, 1.0);

    /// Creates a new quaternion from raw components.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Quaternion { x, y, z, w }
    }

    /// Builds a rotation from euler angles in degrees, applied in Z, X, Y order.
    #[must_use]
    pub fn from_euler_degrees(euler: Vector3) -> Self {
        let (sx, cx) = (euler.x.to_radians() * 0.5).sin_cos();
        let (sy, cy) = (euler.y.to_radians() * 0.5).sin_cos();
        let (sz, cz) = (euler.z.to_radians() * 0.5).sin_cos();

        Quaternion::new(
            cy * sx * cz + sy * cx * sz,
            sy * cx * cz - cy * sx * sz,
            cy * cx * sz - sy * sx * cz,
            cy * cx * cz + sy * sx * sz,
        )
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, rhs: Quaternion) -> Quaternion {
        Quaternion::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y + self.y * rhs.w + self.z * rhs.x - self.x * rhs.z,
            self.w * rhs.z + self.z * rhs.w + self.x * rhs.y - self.y * rhs.x,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}

impl fmt::Display for Quaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.3}, {:.3}, {:.3}, {:.3})",
            self.x, self.y, self.z, self.w
        )
    }
}

/// The value of one monitored field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransformValue {
    /// Position or scale
    Vector3(Vector3),
    /// Rotation
    Quaternion(Quaternion),
}

impl TransformValue {
    /// Name of the contained value type, used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            TransformValue::Vector3(_) => "Vector3",
            TransformValue::Quaternion(_) => "Quaternion",
        }
    }

    /// Returns the contained vector, if any.
    #[must_use]
    pub const fn as_vector3(&self) -> Option<Vector3> {
        match self {
            TransformValue::Vector3(v) => Some(*v),
            TransformValue::Quaternion(_) => None,
        }
    }

    /// Returns the contained quaternion, if any.
    #[must_use]
    pub const fn as_quaternion(&self) -> Option<Quaternion> {
        match self {
            TransformValue::Quaternion(q) => Some(*q),
            TransformValue::Vector3(_) => None,
        }
    }
}

impl fmt::Display for TransformValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformValue::Vector3(v) => v.fmt(f),
            TransformValue::Quaternion(q) => q.fmt(f),
        }
    }
}

/// A shared, interior-mutable array of boxed values.
pub type ObjectArray = Arc<RwLock<Vec<Object>>>;

/// A boxed value as it travels through a hook payload.
#[derive(Clone, Default)]
pub enum Object {
    /// The null reference
    #[default]
    Null,
    /// Boxed boolean
    Bool(bool),
    /// Boxed 32-bit integer, also used for enum values
    Int32(i32),
    /// Boxed single precision float
    Float32(f32),
    /// String reference
    String(Arc<str>),
    /// Boxed vector
    Vector3(Vector3),
    /// Boxed quaternion
    Quaternion(Quaternion),
    /// Reference to a host entity
    Entity(EntityRef),
    /// Reference to an object array
    Array(ObjectArray),
}

impl Object {
    /// Allocates a new array of `len` null references.
    #[must_use]
    pub fn new_array(len: usize) -> Object {
        Object::Array(Arc::new(RwLock::new(vec![Object::Null; len])))
    }

    /// Wraps the given values into a new array object.
    #[must_use]
    pub fn array_of(values: Vec<Object>) -> Object {
        Object::Array(Arc::new(RwLock::new(values)))
    }

    /// Creates a string object.
    #[must_use]
    pub fn string(value: &str) -> Object {
        Object::String(Arc::from(value))
    }

    /// Returns `true` for the null reference.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Returns the boolean payload, if this is a boxed boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the referenced entity, if this is an entity reference.
    #[must_use]
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Object::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Returns the referenced array, if this is an array reference.
    #[must_use]
    pub fn as_array(&self) -> Option<&ObjectArray> {
        match self {
            Object::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Evaluates the value the way a conditional branch would.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Object::Null => false,
            Object::Bool(value) => *value,
            Object::Int32(value) => *value != 0,
            _ => true,
        }
    }

    /// Short name of the contained type, used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Bool(_) => "Boolean",
            Object::Int32(_) => "Int32",
            Object::Float32(_) => "Single",
            Object::String(_) => "String",
            Object::Vector3(_) => "Vector3",
            Object::Quaternion(_) => "Quaternion",
            Object::Entity(_) => "Entity",
            Object::Array(_) => "Object[]",
        }
    }
}

impl From<TransformValue> for Object {
    fn from(value: TransformValue) -> Self {
        match value {
            TransformValue::Vector3(v) => Object::Vector3(v),
            TransformValue::Quaternion(q) => Object::Quaternion(q),
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Null, Object::Null) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int32(a), Object::Int32(b)) => a == b,
            (Object::Float32(a), Object::Float32(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Vector3(a), Object::Vector3(b)) => a == b,
            (Object::Quaternion(a), Object::Quaternion(b)) => a == b,
            (Object::Entity(a), Object::Entity(b)) => a.id() == b.id(),
            (Object::Array(a), Object::Array(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Null => write!(f, "null"),
            Object::Bool(value) => write!(f, "{value}"),
            Object::Int32(value) => write!(f, "{value}"),
            Object::Float32(value) => write!(f, "{value}f"),
            Object::String(value) => write!(f, "{value:?}"),
            Object::Vector3(value) => write!(f, "{value}"),
            Object::Quaternion(value) => write!(f, "{value}"),
            Object::Entity(entity) => write!(f, "Entity({}, {:?})", entity.id(), entity.name()),
            Object::Array(array) => match array.read() {
                Ok(values) => f.debug_list().entries(values.iter()).finish(),
                Err(_) => write!(f, "Object[<poisoned>]"),
            },
        }
    }
}
