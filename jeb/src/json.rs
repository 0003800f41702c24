//! # JSON Conversion
//!
//! Maps command-line JSON onto typed [`Value`]s and back.
//!
//! Handles are written as their numeric ids (`null` for the null object), enumerations as
//! member names (numbers are accepted on input), tuples and lists as arrays.
use jeb_core::{EnumValue, RemoteObject, TypeDescriptor, Value};
use serde_json::{Number, Value as Json};

#[derive(Debug, thiserror::Error)]
pub enum JsonError {
    #[error("Expected {expected} for '{ty}', found '{found}'")]
    Mismatch {
        ty: String,
        expected: &'static str,
        found: Json,
    },
    #[error("Value '{0}' is out of range for '{1}'")]
    OutOfRange(Json, String),
    #[error("'{0}' is not a member of '{1}'")]
    UnknownMember(String, String),
    #[error("Tuple '{ty}' has {arity} elements, found {found}")]
    Arity {
        ty: String,
        arity: usize,
        found: usize,
    },
    #[error("Procedure takes {expected} arguments, {found} given")]
    ArgumentCount { expected: usize, found: usize },
}

/// Converts a JSON array of arguments, one per parameter type.
pub fn to_arguments(types: &[TypeDescriptor], args: &Json) -> Result<Vec<Value>, JsonError> {
    let args: &[Json] = match args {
        Json::Array(items) => items.as_slice(),
        Json::Null => &[],
        other => {
            return Err(JsonError::Mismatch {
                ty: "arguments".to_string(),
                expected: "an array",
                found: other.clone(),
            });
        }
    };

    if args.len() != types.len() {
        return Err(JsonError::ArgumentCount {
            expected: types.len(),
            found: args.len(),
        });
    }

    types.iter().zip(args).map(|(ty, arg)| to_value(ty, arg)).collect()
}

pub fn to_value(ty: &TypeDescriptor, json: &Json) -> Result<Value, JsonError> {
    let mismatch = |expected| JsonError::Mismatch {
        ty: ty.to_string(),
        expected,
        found: json.clone(),
    };
    let out_of_range = || JsonError::OutOfRange(json.clone(), ty.to_string());

    let value = match ty {
        TypeDescriptor::Sint32 => {
            let n = json.as_i64().ok_or_else(|| mismatch("an integer"))?;
            Value::Sint32(i32::try_from(n).map_err(|_| out_of_range())?)
        }
        TypeDescriptor::Bool => Value::Bool(json.as_bool().ok_or_else(|| mismatch("a boolean"))?),
        TypeDescriptor::String => {
            Value::String(json.as_str().ok_or_else(|| mismatch("a string"))?.to_string())
        }
        TypeDescriptor::Float32 => {
            Value::Float32(json.as_f64().ok_or_else(|| mismatch("a number"))? as f32)
        }
        TypeDescriptor::Float64 => Value::Float64(json.as_f64().ok_or_else(|| mismatch("a number"))?),
        TypeDescriptor::List(inner) => {
            let items = json.as_array().ok_or_else(|| mismatch("an array"))?;
            Value::List(
                items
                    .iter()
                    .map(|item| to_value(inner, item))
                    .collect::<Result<_, _>>()?,
            )
        }
        TypeDescriptor::Tuple(types) => {
            let items = json.as_array().ok_or_else(|| mismatch("an array"))?;
            if items.len() != types.len() {
                return Err(JsonError::Arity {
                    ty: ty.to_string(),
                    arity: types.len(),
                    found: items.len(),
                });
            }
            Value::Tuple(
                types
                    .iter()
                    .zip(items)
                    .map(|(ty, item)| to_value(ty, item))
                    .collect::<Result<_, _>>()?,
            )
        }
        TypeDescriptor::Enumeration(enumeration) => {
            let value = match json {
                Json::String(name) => enumeration
                    .member(name)
                    .map(|member| member.value)
                    .ok_or_else(|| JsonError::UnknownMember(name.clone(), ty.to_string()))?,
                Json::Number(n) => n
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(out_of_range)?,
                _ => return Err(mismatch("a member name")),
            };
            Value::Enumeration(enumeration.lookup(value))
        }
        TypeDescriptor::ClassReference(_) => match json {
            Json::Null => Value::Object(RemoteObject::null()),
            _ => Value::Object(RemoteObject::detached(
                json.as_u64().ok_or_else(|| mismatch("an object id"))?,
            )),
        },
    };

    Ok(value)
}

pub fn from_value(value: &Value) -> Json {
    match value {
        Value::Sint32(v) => Json::from(*v),
        Value::Bool(v) => Json::Bool(*v),
        Value::String(v) => Json::String(v.clone()),
        Value::Float32(v) => float(f64::from(*v)),
        Value::Float64(v) => float(*v),
        Value::List(items) | Value::Tuple(items) => {
            Json::Array(items.iter().map(from_value).collect())
        }
        Value::Enumeration(EnumValue::Known { name, .. }) => Json::String(name.clone()),
        Value::Enumeration(EnumValue::Unknown(v)) => Json::from(*v),
        Value::Object(handle) if handle.is_null() => Json::Null,
        Value::Object(handle) => Json::from(handle.id()),
    }
}

// JSON has no NaN or infinities.
fn float(v: f64) -> Json {
    Number::from_f64(v).map_or(Json::Null, Json::Number)
}
