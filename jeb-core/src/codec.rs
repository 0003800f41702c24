//! # Value Codec
//!
//! Encodes [`Value`]s into kRPC argument bytes and decodes procedure results, driven by a
//! [`TypeDescriptor`].
//!
//! ## Wire layouts
//!
//! | Type | Layout |
//! |---|---|
//! | `Sint32` | zigzag varint |
//! | `Bool` | varint 0 or 1 |
//! | `String` | varint byte length, then UTF-8 bytes |
//! | `Float32` / `Float64` | 4 / 8 byte little-endian IEEE-754, bits untouched |
//! | `List(T)` | `krpc.schema.List`: one length-delimited `items` entry per element |
//! | `Tuple(Ts)` | elements back to back, in declared order; a list may only come last |
//! | `Enumeration` | varint of the integer value |
//! | `ClassReference` | varint of the object id |
//!
//! Encoding is pure. Decoding a `ClassReference` produces a [`RemoteObject`] bound to the
//! connection that performed the decode, or a detached one when called through [`decode`].
use crate::connection::Shared;
use crate::handle::RemoteObject;
use crate::proto;
use crate::types::TypeDescriptor;
use crate::value::Value;
use bytes::{Buf, BufMut};
use prost::Message;
use prost::encoding::{decode_varint, encode_varint};
use std::sync::Weak;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Expected a value of type '{expected}', found {found}")]
    TypeMismatch {
        expected: String,
        found: &'static str,
    },
    #[error("Tuple '{expected}' has {arity} elements, found {found}")]
    ArityMismatch {
        expected: String,
        arity: usize,
        found: usize,
    },
    /// A list runs to the end of the value, so nothing may follow it inside a tuple.
    #[error("List '{list}' must be the last element of tuple '{tuple}'")]
    ListNotLast { list: String, tuple: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed '{type_name}' value: {reason}")]
    Malformed {
        type_name: String,
        reason: &'static str,
    },
    #[error("String value is not valid UTF-8: '{0}'")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("Failed to decode message: '{0}'")]
    Message(#[from] prost::DecodeError),
}

/// Encodes `value` as an argument of type `ty`.
pub fn encode(ty: &TypeDescriptor, value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    write_value(ty, value, true, &mut out)?;
    Ok(out)
}

/// Decodes a complete value of type `ty`.
///
/// Handles in the result are detached; use [`Connection::decode`](crate::connection::Connection::decode)
/// to bind them to a connection.
pub fn decode(ty: &TypeDescriptor, bytes: &[u8]) -> Result<Value, DecodeError> {
    decode_bound(ty, bytes, None)
}

pub(crate) fn decode_bound(
    ty: &TypeDescriptor,
    bytes: &[u8],
    connection: Option<&Weak<Shared>>,
) -> Result<Value, DecodeError> {
    let mut buf = bytes;
    let value = read_value(ty, &mut buf, connection)?;

    if !buf.is_empty() {
        return Err(malformed(ty, "trailing bytes after value"));
    }

    Ok(value)
}

/// `last` is false when more bytes of the enclosing value follow this one.
fn write_value(
    ty: &TypeDescriptor,
    value: &Value,
    last: bool,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    match (ty, value) {
        (TypeDescriptor::Sint32, Value::Sint32(v)) => encode_varint(u64::from(zigzag(*v)), out),
        (TypeDescriptor::Bool, Value::Bool(v)) => encode_varint(u64::from(*v), out),
        (TypeDescriptor::String, Value::String(s)) => {
            encode_varint(s.len() as u64, out);
            out.put_slice(s.as_bytes());
        }
        (TypeDescriptor::Float32, Value::Float32(v)) => out.put_u32_le(v.to_bits()),
        (TypeDescriptor::Float64, Value::Float64(v)) => out.put_u64_le(v.to_bits()),
        (TypeDescriptor::List(inner), Value::List(items)) => {
            let items = items
                .iter()
                .map(|item| encode(inner, item))
                .collect::<Result<Vec<_>, _>>()?;
            proto::List { items }.encode_raw(out);
        }
        (TypeDescriptor::Tuple(types), Value::Tuple(values)) => {
            if types.len() != values.len() {
                return Err(EncodeError::ArityMismatch {
                    expected: ty.to_string(),
                    arity: types.len(),
                    found: values.len(),
                });
            }
            for (index, (element_ty, element)) in types.iter().zip(values).enumerate() {
                let element_last = last && index + 1 == types.len();
                if !element_last && matches!(element_ty, TypeDescriptor::List(_)) {
                    return Err(EncodeError::ListNotLast {
                        list: element_ty.to_string(),
                        tuple: ty.to_string(),
                    });
                }
                write_value(element_ty, element, element_last, out)?;
            }
        }
        // Negative values are sign-extended to ten bytes, as protobuf does for int32.
        (TypeDescriptor::Enumeration(_), Value::Enumeration(v)) => {
            encode_varint(v.value() as u64, out)
        }
        (TypeDescriptor::ClassReference(_), Value::Object(handle)) => {
            encode_varint(handle.id(), out)
        }
        (ty, value) => {
            return Err(EncodeError::TypeMismatch {
                expected: ty.to_string(),
                found: value.kind(),
            });
        }
    }

    Ok(())
}

fn read_value(
    ty: &TypeDescriptor,
    buf: &mut &[u8],
    connection: Option<&Weak<Shared>>,
) -> Result<Value, DecodeError> {
    let value = match ty {
        TypeDescriptor::Sint32 => {
            let raw = read_varint(ty, buf)?;
            let raw = u32::try_from(raw).map_err(|_| malformed(ty, "varint out of range"))?;
            Value::Sint32(unzigzag(raw))
        }
        TypeDescriptor::Bool => Value::Bool(read_varint(ty, buf)? != 0),
        TypeDescriptor::String => {
            let len = read_varint(ty, buf)? as usize;
            if buf.len() < len {
                return Err(malformed(ty, "shorter than its declared length"));
            }
            let (text, rest) = buf.split_at(len);
            *buf = rest;
            Value::String(String::from_utf8(text.to_vec())?)
        }
        TypeDescriptor::Float32 => {
            if buf.len() < 4 {
                return Err(malformed(ty, "needs 4 bytes"));
            }
            Value::Float32(f32::from_bits(buf.get_u32_le()))
        }
        TypeDescriptor::Float64 => {
            if buf.len() < 8 {
                return Err(malformed(ty, "needs 8 bytes"));
            }
            Value::Float64(f64::from_bits(buf.get_u64_le()))
        }
        TypeDescriptor::List(inner) => {
            // A list is a message of its own and always runs to the end of the value.
            let list = proto::List::decode(*buf).map_err(|_| malformed(ty, "invalid list"))?;
            *buf = &[];
            let items = list
                .items
                .iter()
                .map(|item| decode_bound(inner, item, connection))
                .collect::<Result<Vec<_>, _>>()?;
            Value::List(items)
        }
        TypeDescriptor::Tuple(types) => {
            let mut elements = Vec::with_capacity(types.len());
            for element_ty in types {
                elements.push(read_value(element_ty, buf, connection)?);
            }
            Value::Tuple(elements)
        }
        TypeDescriptor::Enumeration(enumeration) => {
            // Negative values arrive sign-extended to 64 bits.
            let raw = read_varint(ty, buf)? as i64;
            let raw = i32::try_from(raw).map_err(|_| malformed(ty, "varint out of range"))?;
            Value::Enumeration(enumeration.lookup(raw))
        }
        TypeDescriptor::ClassReference(_) => {
            let id = read_varint(ty, buf)?;
            Value::Object(match connection {
                Some(shared) => RemoteObject::bound(id, shared.clone()),
                None => RemoteObject::detached(id),
            })
        }
    };

    Ok(value)
}

fn read_varint(ty: &TypeDescriptor, buf: &mut &[u8]) -> Result<u64, DecodeError> {
    decode_varint(buf).map_err(|_| malformed(ty, "truncated varint"))
}

fn malformed(ty: &TypeDescriptor, reason: &'static str) -> DecodeError {
    DecodeError::Malformed {
        type_name: ty.to_string(),
        reason,
    }
}

fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

fn unzigzag(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::EnumValue;

    fn round_trip(ty: &TypeDescriptor, value: Value) -> Value {
        let bytes = encode(ty, &value).unwrap();
        decode(ty, &bytes).unwrap()
    }

    #[test]
    fn test_sint32_round_trip_and_layout() {
        for v in [0, 1, -1, 63, -64, 1000, i32::MAX, i32::MIN] {
            assert_eq!(round_trip(&TypeDescriptor::Sint32, Value::Sint32(v)), Value::Sint32(v));
        }

        assert_eq!(encode(&TypeDescriptor::Sint32, &Value::Sint32(0)).unwrap(), [0x00]);
        assert_eq!(encode(&TypeDescriptor::Sint32, &Value::Sint32(-1)).unwrap(), [0x01]);
        assert_eq!(encode(&TypeDescriptor::Sint32, &Value::Sint32(1)).unwrap(), [0x02]);
        assert_eq!(
            encode(&TypeDescriptor::Sint32, &Value::Sint32(i32::MIN)).unwrap(),
            [0xFF, 0xFF, 0xFF, 0xFF, 0x0F]
        );
    }

    #[test]
    fn test_bool_round_trip() {
        assert_eq!(encode(&TypeDescriptor::Bool, &Value::Bool(true)).unwrap(), [0x01]);
        assert_eq!(encode(&TypeDescriptor::Bool, &Value::Bool(false)).unwrap(), [0x00]);
        assert_eq!(round_trip(&TypeDescriptor::Bool, Value::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn test_string_round_trip() {
        for s in ["", "Jebediah", "Kerbin ☀ Mün 🚀"] {
            assert_eq!(
                round_trip(&TypeDescriptor::String, Value::from(s)),
                Value::from(s)
            );
        }

        let bytes = encode(&TypeDescriptor::String, &Value::from("Mün")).unwrap();
        assert_eq!(bytes, [4, b'M', 0xC3, 0xBC, b'n']);
    }

    #[test]
    fn test_floats_keep_their_bits() {
        for v in [0.0f32, -0.0, 1.5, f32::MAX, f32::INFINITY, f32::NEG_INFINITY, f32::NAN] {
            let decoded = round_trip(&TypeDescriptor::Float32, Value::Float32(v));
            assert_eq!(decoded.as_f32().unwrap().to_bits(), v.to_bits());
        }

        let payload = f64::from_bits(0x7FF8_0000_0000_0001);
        for v in [0.0f64, 1.0, -273.15, f64::INFINITY, f64::NEG_INFINITY, f64::NAN, payload] {
            let decoded = round_trip(&TypeDescriptor::Float64, Value::Float64(v));
            assert_eq!(decoded.as_f64().unwrap().to_bits(), v.to_bits());
        }

        assert_eq!(
            encode(&TypeDescriptor::Float64, &Value::Float64(1.0)).unwrap(),
            [0, 0, 0, 0, 0, 0, 0xF0, 0x3F]
        );
        assert_eq!(
            encode(&TypeDescriptor::Float32, &Value::Float32(1.0)).unwrap(),
            [0, 0, 0x80, 0x3F]
        );
    }

    #[test]
    fn test_list_items_are_length_delimited() {
        let ty = TypeDescriptor::list(TypeDescriptor::Sint32);
        let value = Value::List(vec![Value::Sint32(1), Value::Sint32(-1)]);

        let bytes = encode(&ty, &value).unwrap();

        assert_eq!(bytes, [0x0A, 0x01, 0x02, 0x0A, 0x01, 0x01]);
        assert_eq!(decode(&ty, &bytes).unwrap(), value);
        assert_eq!(decode(&ty, &[]).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_tuples_concatenate_elements_and_nest() {
        let bounding_box = TypeDescriptor::tuple([TypeDescriptor::vector3(), TypeDescriptor::vector3()]);
        let value = Value::Tuple(vec![
            Value::from((-1.0, -2.0, -3.0)),
            Value::from((1.0, 2.0, 3.0)),
        ]);

        let bytes = encode(&bounding_box, &value).unwrap();
        let decoded = decode(&bounding_box, &bytes).unwrap();

        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[..8], (-1.0f64).to_le_bytes());
        assert_eq!(
            decoded.as_bounding_box(),
            Some(((-1.0, -2.0, -3.0), (1.0, 2.0, 3.0)))
        );

        let mixed = TypeDescriptor::tuple([TypeDescriptor::String, TypeDescriptor::Bool]);
        let value = Value::Tuple(vec![Value::from("Kerbin"), Value::Bool(true)]);
        assert_eq!(round_trip(&mixed, value.clone()), value);
    }

    #[test]
    fn test_enumeration_maps_unknown_values() {
        let ty = TypeDescriptor::enumeration(
            "SpaceCenter",
            "VesselSituation",
            [("PreLaunch".to_string(), 0), ("Orbiting".to_string(), 1)],
        );

        let orbiting = decode(&ty, &[0x01]).unwrap();
        let future = decode(&ty, &[0x09]).unwrap();

        assert_eq!(orbiting.as_enum().unwrap().name(), Some("Orbiting"));
        assert_eq!(future, Value::Enumeration(EnumValue::Unknown(9)));
        assert_eq!(encode(&ty, &future).unwrap(), [0x09]);

        let negative = Value::Enumeration(EnumValue::Unknown(-1));
        let bytes = encode(&ty, &negative).unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(decode(&ty, &bytes).unwrap(), negative);
    }

    #[test]
    fn test_enumeration_rejects_values_beyond_int32() {
        let ty = TypeDescriptor::enumeration(
            "SpaceCenter",
            "VesselSituation",
            [("PreLaunch".to_string(), 0), ("Orbiting".to_string(), 1)],
        );

        // 2^32 + 1 would truncate to Orbiting.
        let mut bytes = Vec::new();
        encode_varint((1u64 << 32) + 1, &mut bytes);

        assert!(matches!(
            decode(&ty, &bytes),
            Err(DecodeError::Malformed { reason: "varint out of range", .. })
        ));

        let mut min = Vec::new();
        encode_varint(i64::from(i32::MIN) as u64, &mut min);
        assert_eq!(
            decode(&ty, &min).unwrap(),
            Value::Enumeration(EnumValue::Unknown(i32::MIN))
        );
    }

    #[test]
    fn test_list_must_end_its_tuple() {
        let trailing = TypeDescriptor::tuple([
            TypeDescriptor::Float64,
            TypeDescriptor::list(TypeDescriptor::Sint32),
        ]);
        let value = Value::Tuple(vec![Value::Float64(2.0), Value::List(vec![Value::Sint32(1)])]);
        assert_eq!(round_trip(&trailing, value.clone()), value);

        let leading = TypeDescriptor::tuple([
            TypeDescriptor::list(TypeDescriptor::Sint32),
            TypeDescriptor::Float64,
        ]);
        let value = Value::Tuple(vec![Value::List(vec![Value::Sint32(1)]), Value::Float64(2.0)]);
        assert!(matches!(
            encode(&leading, &value),
            Err(EncodeError::ListNotLast { .. })
        ));

        // The same holds for a tuple nested in front of another element.
        let nested = TypeDescriptor::tuple([trailing.clone(), TypeDescriptor::Bool]);
        let value = Value::Tuple(vec![
            Value::Tuple(vec![Value::Float64(2.0), Value::List(vec![])]),
            Value::Bool(true),
        ]);
        assert!(matches!(
            encode(&nested, &value),
            Err(EncodeError::ListNotLast { .. })
        ));

    }

    #[test]
    fn test_class_reference_decodes_detached_handle() {
        let ty = TypeDescriptor::class("SpaceCenter", "Vessel");

        let value = decode(&ty, &[0x07]).unwrap();
        let handle = value.as_object().unwrap();

        assert_eq!(handle.id(), 7);
        assert!(!handle.is_bound());
        assert!(handle.connection().is_err());
        assert_eq!(encode(&ty, &value).unwrap(), [0x07]);
    }

    #[test]
    fn test_exhausted_bytes_are_malformed() {
        let cases: Vec<(TypeDescriptor, Vec<u8>)> = vec![
            (TypeDescriptor::Sint32, vec![]),
            (TypeDescriptor::Sint32, vec![0x80]),
            (TypeDescriptor::String, vec![5, b'a', b'b']),
            (TypeDescriptor::Float32, vec![0, 0]),
            (TypeDescriptor::Float64, vec![0, 0, 0]),
            (TypeDescriptor::vector3(), vec![0; 16]),
            (TypeDescriptor::class("SpaceCenter", "Vessel"), vec![]),
        ];

        for (ty, bytes) in cases {
            let err = decode(&ty, &bytes).unwrap_err();
            assert!(
                matches!(err, DecodeError::Malformed { .. }),
                "{ty} decoded from {bytes:?}: {err}"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let err = decode(&TypeDescriptor::Bool, &[0x01, 0x00]).unwrap_err();

        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let err = decode(&TypeDescriptor::String, &[2, 0xC3, 0x28]).unwrap_err();

        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }

    #[test]
    fn test_encode_rejects_mismatched_values() {
        let err = encode(&TypeDescriptor::Float64, &Value::Float32(1.0)).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::TypeMismatch { found: "float", .. }
        ));

        let err = encode(&TypeDescriptor::vector3(), &Value::Tuple(vec![Value::Float64(1.0)]))
            .unwrap_err();
        assert!(matches!(
            err,
            EncodeError::ArityMismatch { arity: 3, found: 1, .. }
        ));
    }
}
