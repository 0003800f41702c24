//! # Type Descriptors
//!
//! The closed set of kRPC parameter and return types, as published in the service schema.
//!
//! A [`TypeDescriptor`] tells the [codec](crate::codec) how a value is laid out on the wire.
//! Descriptors are produced outside the engine (by whatever reads the schema) and are
//! immutable once built.
use crate::handle::RemoteObject;
use crate::value::{EnumValue, Value};
use std::fmt;

/// Enumeration value used when a zero value is needed for an enumeration type.
pub const ENUM_ZERO: i32 = -1;

/// Wire type of a procedure parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// Signed 32-bit integer, zigzag varint encoded.
    Sint32,
    Bool,
    String,
    /// Single precision float (`FLOAT` in the schema).
    Float32,
    /// Double precision float (`DOUBLE` in the schema).
    Float64,
    List(Box<TypeDescriptor>),
    Tuple(Vec<TypeDescriptor>),
    Enumeration(EnumerationType),
    ClassReference(ClassType),
}

/// An enumeration declared by a service, with its ordered value table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumerationType {
    pub service: String,
    pub name: String,
    pub values: Vec<EnumMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumMember {
    pub name: String,
    pub value: i32,
}

/// A class declared by a service. Values of this type are remote object handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassType {
    pub service: String,
    pub name: String,
}

/// The fixed-arity tuple layouts that appear in the kRPC schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TupleShape {
    /// `(double, double)`
    Point,
    /// `(double, double, double)`
    Vector,
    /// `(double, double, double, double)`
    Quaternion,
    /// `((double, double, double), (double, double, double))`
    BoundingBox,
    /// Any other tuple, by arity.
    Composite(usize),
}

impl TypeDescriptor {
    pub fn list(inner: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(inner))
    }

    pub fn tuple(elements: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        TypeDescriptor::Tuple(elements.into_iter().collect())
    }

    /// A `(double, double, double)` tuple.
    pub fn vector3() -> Self {
        Self::tuple([Self::Float64, Self::Float64, Self::Float64])
    }

    pub fn class(service: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDescriptor::ClassReference(ClassType {
            service: service.into(),
            name: name.into(),
        })
    }

    pub fn enumeration(
        service: impl Into<String>,
        name: impl Into<String>,
        values: impl IntoIterator<Item = (String, i32)>,
    ) -> Self {
        TypeDescriptor::Enumeration(EnumerationType {
            service: service.into(),
            name: name.into(),
            values: values
                .into_iter()
                .map(|(name, value)| EnumMember { name, value })
                .collect(),
        })
    }

    /// Classifies a tuple descriptor by inspecting its children.
    ///
    /// Returns `None` for anything that is not a tuple. Nested tuples are only reported as
    /// [`TupleShape::BoundingBox`] when both children are themselves 3-vectors; a pair whose
    /// first element happens to be a tuple is otherwise a plain composite.
    pub fn tuple_shape(&self) -> Option<TupleShape> {
        let TypeDescriptor::Tuple(elements) = self else {
            return None;
        };

        let all_doubles = elements.iter().all(|e| *e == TypeDescriptor::Float64);
        let shape = match elements.as_slice() {
            [a, b] if a.tuple_shape() == Some(TupleShape::Vector)
                && b.tuple_shape() == Some(TupleShape::Vector) =>
            {
                TupleShape::BoundingBox
            }
            [_, _] if all_doubles => TupleShape::Point,
            [_, _, _] if all_doubles => TupleShape::Vector,
            [_, _, _, _] if all_doubles => TupleShape::Quaternion,
            _ => TupleShape::Composite(elements.len()),
        };

        Some(shape)
    }

    /// The value returned alongside an error, for callers that follow a
    /// "zero value plus error" convention.
    pub fn zero_value(&self) -> Value {
        match self {
            TypeDescriptor::Sint32 => Value::Sint32(0),
            TypeDescriptor::Bool => Value::Bool(false),
            TypeDescriptor::String => Value::String(String::new()),
            TypeDescriptor::Float32 => Value::Float32(0.0),
            TypeDescriptor::Float64 => Value::Float64(0.0),
            TypeDescriptor::List(_) => Value::List(Vec::new()),
            TypeDescriptor::Tuple(elements) => {
                Value::Tuple(elements.iter().map(TypeDescriptor::zero_value).collect())
            }
            TypeDescriptor::Enumeration(_) => Value::Enumeration(EnumValue::Unknown(ENUM_ZERO)),
            TypeDescriptor::ClassReference(_) => Value::Object(RemoteObject::null()),
        }
    }
}

impl EnumerationType {
    /// Maps a wire integer back through the value table.
    pub fn lookup(&self, value: i32) -> EnumValue {
        self.values
            .iter()
            .find(|member| member.value == value)
            .map(|member| EnumValue::Known {
                name: member.name.clone(),
                value,
            })
            .unwrap_or(EnumValue::Unknown(value))
    }

    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.values.iter().find(|member| member.name == name)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Sint32 => write!(f, "int32"),
            TypeDescriptor::Bool => write!(f, "bool"),
            TypeDescriptor::String => write!(f, "string"),
            TypeDescriptor::Float32 => write!(f, "float"),
            TypeDescriptor::Float64 => write!(f, "double"),
            TypeDescriptor::List(inner) => write!(f, "list<{inner}>"),
            TypeDescriptor::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, ")")
            }
            TypeDescriptor::Enumeration(e) => write!(f, "{}.{}", e.service, e.name),
            TypeDescriptor::ClassReference(c) => write!(f, "{}.{}", c.service, c.name),
        }
    }
}
