//! Host value model
//!
//! [`HostValue`] is the dynamically typed form every host value takes while it
//! crosses the bridge; [`HostType`] is the declared type a script value is
//! converted into.

mod reflect;
pub(crate) mod structural;

pub use reflect::{Json, Reflect, Shared};
pub use structural::{cast_number, coerce, from_json, to_json};

use crate::descriptor::{StructRef, TypeRef};
use crate::errors::HostError;
use crate::function::{HostFunction, Signature};
use crate::proxy::ProxyHandler;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A host value in transit.
#[derive(Clone)]
pub enum HostValue {
    /// Absent value, nil pointer or nil function.
    Nil,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Time(SystemTime),
    /// Struct held by value. Script writes to its fields are rejected.
    Struct(StructRef),
    /// Struct held through a shared pointer. Field writes reach the host.
    Pointer(StructRef),
    /// Ordered sequence with its element type. `Slice(U8, ..)` is a byte buffer.
    Slice(HostType, Vec<HostValue>),
    /// Key/value table with its key and value types.
    Map(HostType, HostType, Vec<(HostValue, HostValue)>),
    Function(HostFunction),
    /// Value that answers property traps itself.
    Object(Rc<dyn ProxyHandler>),
    Error(HostError),
    /// Structured data with no host type of its own.
    Opaque(serde_json::Value),
}

impl HostValue {
    pub fn object(handler: impl ProxyHandler + 'static) -> Self {
        HostValue::Object(Rc::new(handler))
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        HostValue::Slice(
            HostType::U8,
            bytes.into().into_iter().map(HostValue::U8).collect(),
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Bool(_) => "bool",
            HostValue::I8(_) => "i8",
            HostValue::I16(_) => "i16",
            HostValue::I32(_) => "i32",
            HostValue::I64(_) => "i64",
            HostValue::U8(_) => "u8",
            HostValue::U16(_) => "u16",
            HostValue::U32(_) => "u32",
            HostValue::U64(_) => "u64",
            HostValue::F32(_) => "f32",
            HostValue::F64(_) => "f64",
            HostValue::String(_) => "string",
            HostValue::Time(_) => "time",
            HostValue::Struct(_) => "struct",
            HostValue::Pointer(_) => "pointer",
            HostValue::Slice(..) => "slice",
            HostValue::Map(..) => "map",
            HostValue::Function(_) => "function",
            HostValue::Object(_) => "object",
            HostValue::Error(_) => "error",
            HostValue::Opaque(_) => "opaque",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Integer payload widened without loss.
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            HostValue::I8(v) => Some(v.into()),
            HostValue::I16(v) => Some(v.into()),
            HostValue::I32(v) => Some(v.into()),
            HostValue::I64(v) => Some(v.into()),
            HostValue::U8(v) => Some(v.into()),
            HostValue::U16(v) => Some(v.into()),
            HostValue::U32(v) => Some(v.into()),
            HostValue::U64(v) => Some(v.into()),
            _ => None,
        }
    }

    /// Any numeric payload as a double.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            HostValue::F32(v) => Some(v.into()),
            HostValue::F64(v) => Some(v),
            _ => self.as_integer().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructRef> {
        match self {
            HostValue::Struct(s) | HostValue::Pointer(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => f.write_str("Nil"),
            HostValue::Bool(v) => write!(f, "Bool({v})"),
            HostValue::I8(v) => write!(f, "I8({v})"),
            HostValue::I16(v) => write!(f, "I16({v})"),
            HostValue::I32(v) => write!(f, "I32({v})"),
            HostValue::I64(v) => write!(f, "I64({v})"),
            HostValue::U8(v) => write!(f, "U8({v})"),
            HostValue::U16(v) => write!(f, "U16({v})"),
            HostValue::U32(v) => write!(f, "U32({v})"),
            HostValue::U64(v) => write!(f, "U64({v})"),
            HostValue::F32(v) => write!(f, "F32({v})"),
            HostValue::F64(v) => write!(f, "F64({v})"),
            HostValue::String(v) => write!(f, "String({v:?})"),
            HostValue::Time(v) => write!(f, "Time({v:?})"),
            HostValue::Struct(s) => write!(f, "Struct({})", s.ty().name()),
            HostValue::Pointer(s) => write!(f, "Pointer({})", s.ty().name()),
            HostValue::Slice(ty, items) => f.debug_tuple("Slice").field(ty).field(items).finish(),
            HostValue::Map(k, v, pairs) => {
                f.debug_tuple("Map").field(k).field(v).field(pairs).finish()
            }
            HostValue::Function(function) => write!(f, "Function({:?})", function.signature()),
            HostValue::Object(_) => f.write_str("Object"),
            HostValue::Error(err) => write!(f, "Error({err})"),
            HostValue::Opaque(json) => write!(f, "Opaque({json})"),
        }
    }
}

/// Primitives compare by value; structs, functions and objects by identity.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        use HostValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F32(a), F32(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (Struct(a), Struct(b)) | (Pointer(a), Pointer(b)) => a.ptr_eq(b),
            (Slice(ta, a), Slice(tb, b)) => ta == tb && a == b,
            (Map(ka, va, a), Map(kb, vb, b)) => ka == kb && va == vb && a == b,
            (Function(a), Function(b)) => a.ptr_eq(b),
            (Object(a), Object(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            (Error(a), Error(b)) => a.ptr_eq(b),
            (Opaque(a), Opaque(b)) => a == b,
            _ => false,
        }
    }
}

/// Declared type of a host value.
#[derive(Debug, Clone, PartialEq)]
pub enum HostType {
    /// No declared type: script values take their natural host form.
    Any,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Time,
    Struct(TypeRef),
    Pointer(Box<HostType>),
    Slice(Box<HostType>),
    Map(Box<HostType>, Box<HostType>),
    Function(Arc<Signature>),
    Object,
    Error,
    Opaque,
}

impl HostType {
    pub fn slice_of(elem: HostType) -> Self {
        HostType::Slice(Box::new(elem))
    }

    pub fn pointer_to(elem: HostType) -> Self {
        HostType::Pointer(Box::new(elem))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            HostType::I8
                | HostType::I16
                | HostType::I32
                | HostType::I64
                | HostType::U8
                | HostType::U16
                | HostType::U32
                | HostType::U64
                | HostType::F32
                | HostType::F64
        )
    }

    /// `[]u8`
    pub fn is_bytes(&self) -> bool {
        matches!(self, HostType::Slice(elem) if **elem == HostType::U8)
    }

    /// The value a missing argument or an undefined script value becomes.
    pub fn zero_value(&self) -> HostValue {
        match self {
            HostType::Bool => HostValue::Bool(false),
            HostType::I8 => HostValue::I8(0),
            HostType::I16 => HostValue::I16(0),
            HostType::I32 => HostValue::I32(0),
            HostType::I64 => HostValue::I64(0),
            HostType::U8 => HostValue::U8(0),
            HostType::U16 => HostValue::U16(0),
            HostType::U32 => HostValue::U32(0),
            HostType::U64 => HostValue::U64(0),
            HostType::F32 => HostValue::F32(0.0),
            HostType::F64 => HostValue::F64(0.0),
            HostType::String => HostValue::String(String::new()),
            HostType::Time => HostValue::Time(UNIX_EPOCH),
            HostType::Struct(ty) => HostValue::Struct(ty.resolve().instantiate()),
            HostType::Slice(elem) => HostValue::Slice((**elem).clone(), Vec::new()),
            HostType::Map(key, value) => {
                HostValue::Map((**key).clone(), (**value).clone(), Vec::new())
            }
            HostType::Opaque => HostValue::Opaque(serde_json::Value::Null),
            HostType::Any
            | HostType::Pointer(_)
            | HostType::Function(_)
            | HostType::Object
            | HostType::Error => HostValue::Nil,
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Any => f.write_str("any"),
            HostType::Bool => f.write_str("bool"),
            HostType::I8 => f.write_str("i8"),
            HostType::I16 => f.write_str("i16"),
            HostType::I32 => f.write_str("i32"),
            HostType::I64 => f.write_str("i64"),
            HostType::U8 => f.write_str("u8"),
            HostType::U16 => f.write_str("u16"),
            HostType::U32 => f.write_str("u32"),
            HostType::U64 => f.write_str("u64"),
            HostType::F32 => f.write_str("f32"),
            HostType::F64 => f.write_str("f64"),
            HostType::String => f.write_str("string"),
            HostType::Time => f.write_str("time"),
            HostType::Struct(ty) => f.write_str(ty.name()),
            HostType::Pointer(elem) => write!(f, "*{elem}"),
            HostType::Slice(elem) => write!(f, "[]{elem}"),
            HostType::Map(key, value) => write!(f, "map[{key}]{value}"),
            HostType::Function(_) => f.write_str("func"),
            HostType::Object => f.write_str("object"),
            HostType::Error => f.write_str("error"),
            HostType::Opaque => f.write_str("opaque"),
        }
    }
}

/// Milliseconds since the Unix epoch, truncated.
pub fn system_time_to_millis(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as f64,
        Err(before) => -(before.duration().as_millis() as f64),
    }
}

pub fn millis_to_system_time(millis: f64) -> SystemTime {
    let millis = if millis.is_finite() { millis.trunc() } else { 0.0 };
    if millis >= 0.0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis((-millis) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values() {
        assert_eq!(HostType::I8.zero_value(), HostValue::I8(0));
        assert_eq!(HostType::String.zero_value(), HostValue::String(String::new()));
        assert_eq!(
            HostType::slice_of(HostType::I64).zero_value(),
            HostValue::Slice(HostType::I64, Vec::new())
        );
        assert!(HostType::pointer_to(HostType::I64).zero_value().is_nil());
        assert_eq!(HostType::Time.zero_value(), HostValue::Time(UNIX_EPOCH));
    }

    #[test]
    fn test_type_names() {
        let map = HostType::Map(
            Box::new(HostType::String),
            Box::new(HostType::slice_of(HostType::U8)),
        );
        assert_eq!(map.to_string(), "map[string][]u8");
        assert!(HostType::slice_of(HostType::U8).is_bytes());
        assert!(!HostType::slice_of(HostType::I8).is_bytes());
    }

    #[test]
    fn test_millis_conversions() {
        let time = millis_to_system_time(470_106_123_456.0);
        assert_eq!(system_time_to_millis(time), 470_106_123_456.0);
        assert_eq!(system_time_to_millis(millis_to_system_time(-1500.0)), -1500.0);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(HostValue::U64(u64::MAX).as_integer(), Some(u64::MAX as i128));
        assert_eq!(HostValue::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(HostValue::String("1".into()).as_f64(), None);
    }
}
