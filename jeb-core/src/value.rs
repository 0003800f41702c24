//! # Values
//!
//! Runtime values exchanged with the server, shaped by a [`TypeDescriptor`](crate::types::TypeDescriptor).
use crate::handle::RemoteObject;

/// A decoded procedure result or an argument waiting to be encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Sint32(i32),
    Bool(bool),
    String(String),
    Float32(f32),
    Float64(f64),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Enumeration(EnumValue),
    Object(RemoteObject),
}

/// An enumeration value, resolved against the enumeration's value table when possible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnumValue {
    Known { name: String, value: i32 },
    /// A value the local table does not know about, e.g. because the server is newer.
    Unknown(i32),
}

impl EnumValue {
    pub fn value(&self) -> i32 {
        match self {
            EnumValue::Known { value, .. } => *value,
            EnumValue::Unknown(value) => *value,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            EnumValue::Known { name, .. } => Some(name),
            EnumValue::Unknown(_) => None,
        }
    }
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Sint32(_) => "int32",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Float32(_) => "float",
            Value::Float64(_) => "double",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Enumeration(_) => "enumeration",
            Value::Object(_) => "object",
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Sint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Value::Enumeration(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&RemoteObject> {
        match self {
            Value::Object(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<RemoteObject> {
        match self {
            Value::Object(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<(f64, f64)> {
        match self.doubles()?.as_slice() {
            [x, y] => Some((*x, *y)),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<(f64, f64, f64)> {
        match self.doubles()?.as_slice() {
            [x, y, z] => Some((*x, *y, *z)),
            _ => None,
        }
    }

    pub fn as_quaternion(&self) -> Option<(f64, f64, f64, f64)> {
        match self.doubles()?.as_slice() {
            [x, y, z, w] => Some((*x, *y, *z, *w)),
            _ => None,
        }
    }

    /// The `(min, max)` corners of a bounding box.
    pub fn as_bounding_box(&self) -> Option<((f64, f64, f64), (f64, f64, f64))> {
        match self.as_tuple()? {
            [min, max] => Some((min.as_vector()?, max.as_vector()?)),
            _ => None,
        }
    }

    fn doubles(&self) -> Option<Vec<f64>> {
        self.as_tuple()?.iter().map(Value::as_f64).collect()
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Sint32(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<RemoteObject> for Value {
    fn from(handle: RemoteObject) -> Self {
        Value::Object(handle)
    }
}

impl From<(f64, f64, f64)> for Value {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Value::Tuple(vec![x.into(), y.into(), z.into()])
    }
}
