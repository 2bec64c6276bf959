//! Structural conversions
//!
//! Host values that do not match a declared type go through a JSON-shaped
//! intermediate. It is the same shape scripts produce with `JSON.stringify`,
//! so script values and mismatched host values share one decoding path.

use super::{millis_to_system_time, system_time_to_millis, HostType, HostValue};
use crate::descriptor::{StructRef, StructType};
use crate::errors::{BridgeError, HostError};
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use tether_script::ffi::{byte_string, string_bytes};
use tether_script::time::{format_iso8601, parse_iso8601};

/// Deepest nesting encoded before the value is treated as cyclic.
const MAX_DEPTH: usize = 64;

/// Fixed-width numeric conversion: integers wrap, floats truncate toward zero.
///
/// `None` when either side is not numeric.
pub fn cast_number(value: &HostValue, ty: &HostType) -> Option<HostValue> {
    if !ty.is_numeric() {
        return None;
    }
    let (int, float) = match value.as_integer() {
        Some(int) => (int, int as f64),
        None => {
            let float = value.as_f64()?;
            let int = if float.is_finite() { float.trunc() as i128 } else { 0 };
            (int, float)
        }
    };
    Some(match ty {
        HostType::I8 => HostValue::I8(int as i8),
        HostType::I16 => HostValue::I16(int as i16),
        HostType::I32 => HostValue::I32(int as i32),
        HostType::I64 => HostValue::I64(int as i64),
        HostType::U8 => HostValue::U8(int as u8),
        HostType::U16 => HostValue::U16(int as u16),
        HostType::U32 => HostValue::U32(int as u32),
        HostType::U64 => HostValue::U64(int as u64),
        HostType::F32 => HostValue::F32(float as f32),
        HostType::F64 => HostValue::F64(float),
        _ => return None,
    })
}

/// Converts a host value to `ty`, going through the structural form when the
/// shapes differ. Nil becomes the zero value of `ty`.
pub fn coerce(value: HostValue, ty: &HostType) -> Result<HostValue, BridgeError> {
    if conforms(&value, ty) {
        return Ok(value);
    }
    if let Some(number) = cast_number(&value, ty) {
        return Ok(number);
    }
    match (&value, ty) {
        (HostValue::Nil, _) => return Ok(ty.zero_value()),
        (HostValue::Pointer(s), HostType::Struct(target)) if target.type_id() == s.ty().type_id() => {
            return Ok(HostValue::Struct(s.duplicate()?));
        }
        (HostValue::Struct(s), HostType::Pointer(inner)) if is_struct(inner, s) => {
            return Ok(HostValue::Pointer(s.duplicate()?));
        }
        _ => {}
    }
    let json = to_json(&value)?;
    from_json(&json, ty)
}

fn is_struct(ty: &HostType, value: &StructRef) -> bool {
    matches!(ty, HostType::Struct(target) if target.type_id() == value.ty().type_id())
}

fn primitive_type(value: &HostValue) -> Option<HostType> {
    Some(match value {
        HostValue::Bool(_) => HostType::Bool,
        HostValue::I8(_) => HostType::I8,
        HostValue::I16(_) => HostType::I16,
        HostValue::I32(_) => HostType::I32,
        HostValue::I64(_) => HostType::I64,
        HostValue::U8(_) => HostType::U8,
        HostValue::U16(_) => HostType::U16,
        HostValue::U32(_) => HostType::U32,
        HostValue::U64(_) => HostType::U64,
        HostValue::F32(_) => HostType::F32,
        HostValue::F64(_) => HostType::F64,
        HostValue::String(_) => HostType::String,
        HostValue::Time(_) => HostType::Time,
        _ => return None,
    })
}

/// Whether `value` already has the shape of `ty`.
fn conforms(value: &HostValue, ty: &HostType) -> bool {
    match (value, ty) {
        (_, HostType::Any) => true,
        (
            HostValue::Nil,
            HostType::Pointer(_) | HostType::Function(_) | HostType::Object | HostType::Error,
        ) => true,
        (HostValue::Struct(s), HostType::Struct(target)) => target.type_id() == s.ty().type_id(),
        (HostValue::Pointer(s), HostType::Pointer(inner)) => is_struct(inner, s),
        (HostValue::Slice(elem, _), HostType::Slice(expected)) => elem == &**expected,
        (HostValue::Map(k, v, _), HostType::Map(ek, ev)) => k == &**ek && v == &**ev,
        (HostValue::Function(_), HostType::Function(_))
        | (HostValue::Object(_), HostType::Object)
        | (HostValue::Error(_), HostType::Error)
        | (HostValue::Opaque(_), HostType::Opaque) => true,
        (_, HostType::Pointer(inner)) if !matches!(**inner, HostType::Struct(_)) => {
            conforms(value, inner)
        }
        _ => primitive_type(value).as_ref() == Some(ty),
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Structural snapshot of a host value.
///
/// Struct keys follow the script-facing field names, times are RFC 3339
/// strings with milliseconds, byte buffers are strings and functions are
/// dropped from objects.
pub fn to_json(value: &HostValue) -> Result<Value, BridgeError> {
    encode(value, 0)
}

fn encode(value: &HostValue, depth: usize) -> Result<Value, BridgeError> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::conversion(
            value.kind_name(),
            "json",
            "nesting too deep or cyclic",
        ));
    }

    Ok(match value {
        HostValue::Nil | HostValue::Function(_) => Value::Null,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::F32(_) | HostValue::F64(_) => value
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        HostValue::I8(_)
        | HostValue::I16(_)
        | HostValue::I32(_)
        | HostValue::I64(_)
        | HostValue::U8(_)
        | HostValue::U16(_)
        | HostValue::U32(_)
        | HostValue::U64(_) => match value.as_integer() {
            Some(int) => match i64::try_from(int) {
                Ok(int) => Value::from(int),
                Err(_) => Value::from(int as u64),
            },
            None => Value::Null,
        },
        HostValue::String(s) => Value::String(s.clone()),
        HostValue::Time(time) => format_iso8601(system_time_to_millis(*time))
            .map(Value::String)
            .unwrap_or(Value::Null),
        HostValue::Struct(s) | HostValue::Pointer(s) => {
            let mut object = Map::new();
            for (index, _) in s.ty().visible_fields() {
                let field = s.field(index)?;
                if matches!(field, HostValue::Function(_)) {
                    continue;
                }
                object.insert(s.ty().field_key(index), encode(&field, depth + 1)?);
            }
            Value::Object(object)
        }
        HostValue::Slice(HostType::U8, bytes) => {
            let bytes: Vec<u8> = bytes.iter().filter_map(byte_of).collect();
            Value::String(byte_string(&bytes))
        }
        HostValue::Slice(_, items) => Value::Array(
            items
                .iter()
                .map(|item| encode(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        HostValue::Map(_, _, pairs) => {
            let mut object = Map::new();
            for (key, item) in pairs {
                if matches!(item, HostValue::Function(_)) {
                    continue;
                }
                object.insert(property_key(key)?, encode(item, depth + 1)?);
            }
            Value::Object(object)
        }
        HostValue::Object(handler) => {
            let mut object = Map::new();
            let keys = handler
                .enumerate(value)
                .map_err(|err| BridgeError::conversion("object", "json", err))?;
            for key in keys {
                let item = handler
                    .get(value, &key, value)
                    .map_err(|err| BridgeError::conversion("object", "json", err))?;
                if matches!(item, HostValue::Function(_)) {
                    continue;
                }
                object.insert(key, encode(&item, depth + 1)?);
            }
            Value::Object(object)
        }
        HostValue::Error(err) => Value::String(err.to_string()),
        HostValue::Opaque(json) => json.clone(),
    })
}

fn byte_of(value: &HostValue) -> Option<u8> {
    match value {
        HostValue::U8(byte) => Some(*byte),
        _ => None,
    }
}

/// Text form of a map key, as used for script property names.
pub(crate) fn property_key(key: &HostValue) -> Result<String, BridgeError> {
    match key {
        HostValue::String(s) => Ok(s.clone()),
        HostValue::Bool(b) => Ok(b.to_string()),
        HostValue::F32(_) | HostValue::F64(_) => Ok(key.as_f64().unwrap_or_default().to_string()),
        other => match other.as_integer() {
            Some(int) => Ok(int.to_string()),
            None => Err(BridgeError::conversion(
                other.kind_name(),
                "string",
                "unsupported map key",
            )),
        },
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Builds a value of type `ty` from its structural form.
///
/// Null yields the zero value. Struct keys resolve like script property
/// names, falling back to a case-insensitive match on the host name; unknown
/// keys are ignored.
pub fn from_json(json: &Value, ty: &HostType) -> Result<HostValue, BridgeError> {
    if json.is_null() {
        return Ok(ty.zero_value());
    }

    match ty {
        HostType::Any => Ok(generic(json)),
        HostType::Bool => json
            .as_bool()
            .map(HostValue::Bool)
            .ok_or_else(|| mismatch(json, ty)),
        ty if ty.is_numeric() => number(json)
            .and_then(|n| cast_number(&n, ty))
            .ok_or_else(|| mismatch(json, ty)),
        HostType::String => json
            .as_str()
            .map(|s| HostValue::String(s.to_string()))
            .ok_or_else(|| mismatch(json, ty)),
        HostType::Time => match json {
            Value::String(text) => parse_iso8601(text)
                .map(|millis| HostValue::Time(millis_to_system_time(millis)))
                .ok_or_else(|| mismatch(json, ty)),
            Value::Number(n) => n
                .as_f64()
                .map(|millis| HostValue::Time(millis_to_system_time(millis)))
                .ok_or_else(|| mismatch(json, ty)),
            _ => Err(mismatch(json, ty)),
        },
        HostType::Struct(target) => decode_struct(json, &target.resolve()).map(HostValue::Struct),
        HostType::Pointer(inner) => match &**inner {
            HostType::Struct(target) => {
                decode_struct(json, &target.resolve()).map(HostValue::Pointer)
            }
            other => from_json(json, other),
        },
        HostType::Slice(elem) => match json {
            Value::String(text) if **elem == HostType::U8 => Ok(HostValue::bytes(string_bytes(text))),
            Value::Array(items) => Ok(HostValue::Slice(
                (**elem).clone(),
                items
                    .iter()
                    .map(|item| from_json(item, elem))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(mismatch(json, ty)),
        },
        HostType::Map(key, value) => match json {
            Value::Object(object) => Ok(HostValue::Map(
                (**key).clone(),
                (**value).clone(),
                object
                    .iter()
                    .map(|(k, v)| Ok((map_key(k, key)?, from_json(v, value)?)))
                    .collect::<Result<_, BridgeError>>()?,
            )),
            _ => Err(mismatch(json, ty)),
        },
        HostType::Error => match json {
            Value::String(message) => Ok(HostValue::Error(HostError::msg(message.clone()))),
            Value::Object(object) => match object.get("message").and_then(Value::as_str) {
                Some(message) => Ok(HostValue::Error(HostError::msg(message.to_string()))),
                None => Err(mismatch(json, ty)),
            },
            _ => Err(mismatch(json, ty)),
        },
        HostType::Opaque => Ok(HostValue::Opaque(json.clone())),
        _ => Err(BridgeError::conversion(
            kind_of(json),
            ty,
            "no structural form",
        )),
    }
}

fn decode_struct(json: &Value, ty: &Arc<StructType>) -> Result<StructRef, BridgeError> {
    let object = json
        .as_object()
        .ok_or_else(|| BridgeError::conversion(kind_of(json), ty.name(), "expected an object"))?;

    let instance = ty.instantiate();
    for (key, value) in object {
        let index = ty.field_index(key).or_else(|| {
            ty.visible_fields()
                .find(|(_, field)| field.name().eq_ignore_ascii_case(key))
                .map(|(index, _)| index)
        });
        let Some(index) = index else {
            continue;
        };
        let field = &ty.fields()[index];
        if !field.is_writable() {
            continue;
        }
        let decoded = from_json(value, field.ty())?;
        instance.set_field(index, decoded)?;
    }
    Ok(instance)
}

fn generic(json: &Value) -> HostValue {
    match json {
        Value::Null => HostValue::Nil,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Number(n) => HostValue::F64(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => HostValue::String(s.clone()),
        Value::Array(items) => HostValue::Slice(HostType::Any, items.iter().map(generic).collect()),
        Value::Object(object) => HostValue::Map(
            HostType::String,
            HostType::Any,
            object
                .iter()
                .map(|(k, v)| (HostValue::String(k.clone()), generic(v)))
                .collect(),
        ),
    }
}

fn number(json: &Value) -> Option<HostValue> {
    let Value::Number(n) = json else {
        return None;
    };
    if let Some(int) = n.as_i64() {
        Some(HostValue::I64(int))
    } else if let Some(int) = n.as_u64() {
        Some(HostValue::U64(int))
    } else {
        n.as_f64().map(HostValue::F64)
    }
}

fn map_key(key: &str, ty: &HostType) -> Result<HostValue, BridgeError> {
    match ty {
        HostType::Any | HostType::String => Ok(HostValue::String(key.to_string())),
        HostType::Bool => key
            .parse()
            .map(HostValue::Bool)
            .map_err(|err| BridgeError::conversion("string", ty, err)),
        ty if ty.is_numeric() => key
            .parse::<f64>()
            .ok()
            .and_then(|n| cast_number(&HostValue::F64(n), ty))
            .ok_or_else(|| BridgeError::conversion("string", ty, "not a number")),
        _ => Err(BridgeError::conversion("string", ty, "unsupported map key")),
    }
}

fn kind_of(json: &Value) -> &'static str {
    match json {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(json: &Value, ty: &HostType) -> BridgeError {
    BridgeError::conversion(kind_of(json), ty, "type mismatch")
}
