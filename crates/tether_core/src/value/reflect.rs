//! Static reflection for host types
//!
//! [`Reflect`] ties a Rust type to its [`HostType`] and converts it to and
//! from [`HostValue`]. Function adapters and struct descriptors are built on
//! top of it.

use super::{cast_number, millis_to_system_time, to_json, HostType, HostValue};
use crate::descriptor::{HostStruct, StructRef, TypeRef};
use crate::errors::{BridgeError, HostError};
use crate::function::{HostFunction, Signature};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;
use std::time::SystemTime;
use tether_script::ffi::string_bytes;
use tether_script::time::parse_iso8601;

/// A Rust type with a host-side representation.
pub trait Reflect: Sized + 'static {
    /// Set on [`crate::Rest`], which collects trailing arguments.
    const VARIADIC: bool = false;

    fn host_type() -> HostType;

    fn into_host(self) -> HostValue;

    fn from_host(value: HostValue) -> Result<Self, BridgeError>;
}

macro_rules! impl_reflect_number {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl Reflect for $ty {
            fn host_type() -> HostType {
                HostType::$variant
            }

            fn into_host(self) -> HostValue {
                HostValue::$variant(self)
            }

            fn from_host(value: HostValue) -> Result<Self, BridgeError> {
                match value {
                    HostValue::$variant(v) => Ok(v),
                    HostValue::Nil => Ok(<$ty>::default()),
                    other => match cast_number(&other, &HostType::$variant) {
                        Some(HostValue::$variant(v)) => Ok(v),
                        _ => Err(BridgeError::conversion(
                            other.kind_name(),
                            stringify!($ty),
                            "not a number",
                        )),
                    },
                }
            }
        }
    )*};
}

impl_reflect_number! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl Reflect for usize {
    fn host_type() -> HostType {
        HostType::U64
    }

    fn into_host(self) -> HostValue {
        HostValue::U64(self as u64)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        u64::from_host(value).map(|v| v as usize)
    }
}

impl Reflect for isize {
    fn host_type() -> HostType {
        HostType::I64
    }

    fn into_host(self) -> HostValue {
        HostValue::I64(self as i64)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        i64::from_host(value).map(|v| v as isize)
    }
}

impl Reflect for bool {
    fn host_type() -> HostType {
        HostType::Bool
    }

    fn into_host(self) -> HostValue {
        HostValue::Bool(self)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Bool(v) => Ok(v),
            HostValue::Nil => Ok(false),
            other => Err(BridgeError::conversion(other.kind_name(), "bool", "not a boolean")),
        }
    }
}

impl Reflect for String {
    fn host_type() -> HostType {
        HostType::String
    }

    fn into_host(self) -> HostValue {
        HostValue::String(self)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::String(v) => Ok(v),
            HostValue::Nil => Ok(String::new()),
            HostValue::Slice(HostType::U8, bytes) => {
                let bytes = bytes
                    .into_iter()
                    .map(u8::from_host)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => Err(BridgeError::conversion(other.kind_name(), "string", "not a string")),
        }
    }
}

impl Reflect for SystemTime {
    fn host_type() -> HostType {
        HostType::Time
    }

    fn into_host(self) -> HostValue {
        HostValue::Time(self)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Time(v) => Ok(v),
            HostValue::Nil => Ok(SystemTime::UNIX_EPOCH),
            HostValue::String(text) => parse_iso8601(&text)
                .map(millis_to_system_time)
                .ok_or_else(|| {
                    BridgeError::conversion("string", "time", format!("invalid date {text:?}"))
                }),
            other => match other.as_f64() {
                Some(millis) => Ok(millis_to_system_time(millis)),
                None => Err(BridgeError::conversion(other.kind_name(), "time", "not a date")),
            },
        }
    }
}

impl Reflect for HostValue {
    fn host_type() -> HostType {
        HostType::Any
    }

    fn into_host(self) -> HostValue {
        self
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        Ok(value)
    }
}

impl Reflect for HostFunction {
    fn host_type() -> HostType {
        HostType::Function(Arc::new(Signature::dynamic()))
    }

    fn into_host(self) -> HostValue {
        HostValue::Function(self)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Function(function) => Ok(function),
            other => Err(BridgeError::conversion(other.kind_name(), "func", "not a function")),
        }
    }
}

impl Reflect for HostError {
    fn host_type() -> HostType {
        HostType::Error
    }

    fn into_host(self) -> HostValue {
        HostValue::Error(self)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Error(err) => Ok(err),
            HostValue::String(message) => Ok(HostError::msg(message)),
            other => Err(BridgeError::conversion(other.kind_name(), "error", "not an error")),
        }
    }
}

impl Reflect for serde_json::Value {
    fn host_type() -> HostType {
        HostType::Opaque
    }

    fn into_host(self) -> HostValue {
        HostValue::Opaque(self)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Opaque(json) => Ok(json),
            other => to_json(&other),
        }
    }
}

// ============================================================================
// Containers
// ============================================================================

impl<T: Reflect> Reflect for Vec<T> {
    fn host_type() -> HostType {
        HostType::slice_of(T::host_type())
    }

    fn into_host(self) -> HostValue {
        HostValue::Slice(T::host_type(), self.into_iter().map(T::into_host).collect())
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Slice(_, items) => items.into_iter().map(T::from_host).collect(),
            HostValue::Nil => Ok(Vec::new()),
            HostValue::String(text) if T::host_type() == HostType::U8 => string_bytes(&text)
                .into_iter()
                .map(|byte| T::from_host(HostValue::U8(byte)))
                .collect(),
            other => Err(BridgeError::conversion(
                other.kind_name(),
                Self::host_type(),
                "not a sequence",
            )),
        }
    }
}

/// Nullable pointer to a non-struct, or a nullable struct pointer.
impl<T: Reflect> Reflect for Option<T> {
    fn host_type() -> HostType {
        match T::host_type() {
            pointer @ HostType::Pointer(_) => pointer,
            other => HostType::pointer_to(other),
        }
    }

    fn into_host(self) -> HostValue {
        match self {
            Some(value) => value.into_host(),
            None => HostValue::Nil,
        }
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Nil => Ok(None),
            other => T::from_host(other).map(Some),
        }
    }
}

/// Owned pointer to a non-struct: seen from script as its pointee.
impl<T: Reflect> Reflect for Box<T> {
    fn host_type() -> HostType {
        T::host_type()
    }

    fn into_host(self) -> HostValue {
        (*self).into_host()
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        T::from_host(value).map(Box::new)
    }
}

fn map_from_host<K, V, M>(value: HostValue, ty: fn() -> HostType) -> Result<M, BridgeError>
where
    K: Reflect,
    V: Reflect,
    M: FromIterator<(K, V)>,
{
    match value {
        HostValue::Map(_, _, pairs) => pairs
            .into_iter()
            .map(|(k, v)| Ok((K::from_host(k)?, V::from_host(v)?)))
            .collect(),
        HostValue::Nil => Ok(std::iter::empty().collect()),
        other => Err(BridgeError::conversion(other.kind_name(), ty(), "not a map")),
    }
}

impl<K, V> Reflect for HashMap<K, V>
where
    K: Reflect + Eq + Hash,
    V: Reflect,
{
    fn host_type() -> HostType {
        HostType::Map(Box::new(K::host_type()), Box::new(V::host_type()))
    }

    fn into_host(self) -> HostValue {
        HostValue::Map(
            K::host_type(),
            V::host_type(),
            self.into_iter().map(|(k, v)| (k.into_host(), v.into_host())).collect(),
        )
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        map_from_host(value, Self::host_type)
    }
}

impl<K, V> Reflect for BTreeMap<K, V>
where
    K: Reflect + Ord,
    V: Reflect,
{
    fn host_type() -> HostType {
        HostType::Map(Box::new(K::host_type()), Box::new(V::host_type()))
    }

    fn into_host(self) -> HostValue {
        HostValue::Map(
            K::host_type(),
            V::host_type(),
            self.into_iter().map(|(k, v)| (k.into_host(), v.into_host())).collect(),
        )
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        map_from_host(value, Self::host_type)
    }
}

// ============================================================================
// Shared structs
// ============================================================================

/// Host struct behind a shared pointer.
///
/// Handing a `Shared<T>` to script exposes the same instance: field writes
/// from script are visible to the host and the other way around.
pub struct Shared<T>(Rc<RefCell<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn from_rc(cell: Rc<RefCell<T>>) -> Self {
        Self(cell)
    }

    pub fn rc(&self) -> &Rc<RefCell<T>> {
        &self.0
    }

    /// # Panics
    /// When the instance is mutably borrowed, e.g. by a running method.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// # Panics
    /// When the instance is already borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Shared<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(value) => f.debug_tuple("Shared").field(&*value).finish(),
            Err(_) => f.write_str("Shared(<borrowed>)"),
        }
    }
}

impl<T: HostStruct> Reflect for Shared<T> {
    fn host_type() -> HostType {
        HostType::pointer_to(HostType::Struct(TypeRef::of::<T>()))
    }

    fn into_host(self) -> HostValue {
        HostValue::Pointer(StructRef::new(self.0))
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Pointer(s) => s
                .downcast::<T>()
                .map(Shared)
                .ok_or_else(|| BridgeError::conversion(s.ty().name(), T::NAME, "type mismatch")),
            // A by-value struct becomes a fresh instance.
            HostValue::Struct(s) => {
                let copy = s.duplicate()?;
                copy.downcast::<T>()
                    .map(Shared)
                    .ok_or_else(|| BridgeError::conversion(s.ty().name(), T::NAME, "type mismatch"))
            }
            other => Err(BridgeError::conversion(other.kind_name(), T::NAME, "not a struct pointer")),
        }
    }
}

// ============================================================================
// Serde interop
// ============================================================================

/// Any serde type, carried as structured data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Json<T>(pub T);

impl<T> Reflect for Json<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn host_type() -> HostType {
        HostType::Opaque
    }

    fn into_host(self) -> HostValue {
        match serde_json::to_value(&self.0) {
            Ok(json) => HostValue::Opaque(json),
            Err(err) => {
                tracing::warn!(%err, "value has no structured form");
                HostValue::Nil
            }
        }
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        let json = match value {
            HostValue::Opaque(json) => json,
            other => to_json(&other)?,
        };
        serde_json::from_value(json)
            .map(Json)
            .map_err(|err| BridgeError::conversion("opaque", std::any::type_name::<T>(), err))
    }
}
