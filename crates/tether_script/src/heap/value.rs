//! Heap values and objects

use super::HeapEngine;
use crate::engine::{Finalizer, NativeFunction};
use crate::ffi::ScriptHandle;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// A script value owned by a [`HeapEngine`].
#[derive(Clone, Default)]
pub enum HeapValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Pointer(ScriptHandle),
    Object(ObjectRef),
}

impl HeapValue {
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            HeapValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// ECMAScript `ToBoolean`.
    pub fn is_truthy(&self) -> bool {
        match self {
            HeapValue::Undefined | HeapValue::Null => false,
            HeapValue::Bool(b) => *b,
            HeapValue::Number(n) => *n != 0.0 && !n.is_nan(),
            HeapValue::String(s) => !s.is_empty(),
            HeapValue::Pointer(p) => !p.is_null(),
            HeapValue::Object(_) => true,
        }
    }
}

impl fmt::Debug for HeapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapValue::Undefined => f.write_str("undefined"),
            HeapValue::Null => f.write_str("null"),
            HeapValue::Bool(b) => write!(f, "{b}"),
            HeapValue::Number(n) => write!(f, "{n}"),
            HeapValue::String(s) => write!(f, "{s:?}"),
            HeapValue::Pointer(p) => write!(f, "pointer({p})"),
            HeapValue::Object(object) => write!(f, "{object:?}"),
        }
    }
}

impl From<bool> for HeapValue {
    fn from(value: bool) -> Self {
        HeapValue::Bool(value)
    }
}

impl From<f64> for HeapValue {
    fn from(value: f64) -> Self {
        HeapValue::Number(value)
    }
}

impl From<&str> for HeapValue {
    fn from(value: &str) -> Self {
        HeapValue::String(Rc::from(value))
    }
}

impl From<ObjectRef> for HeapValue {
    fn from(object: ObjectRef) -> Self {
        HeapValue::Object(object)
    }
}

/// Shared reference to a heap object
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<ObjectData>>);

impl ObjectRef {
    pub(crate) fn new(kind: ObjectKind) -> Self {
        Self(Rc::new(RefCell::new(ObjectData {
            kind,
            properties: Vec::new(),
            hidden: Vec::new(),
            finalizers: Vec::new(),
        })))
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn borrow(&self) -> Ref<'_, ObjectData> {
        self.0.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, ObjectData> {
        self.0.borrow_mut()
    }

    /// `(target, handler)` when this object is a Proxy.
    pub(crate) fn proxy_parts(&self) -> Option<(HeapValue, HeapValue)> {
        match &self.borrow().kind {
            ObjectKind::Proxy { target, handler } => Some((target.clone(), handler.clone())),
            _ => None,
        }
    }

    pub(crate) fn native_body(&self) -> Option<NativeFunction<HeapEngine>> {
        match &self.borrow().kind {
            ObjectKind::Function { body, .. } => Some(body.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(data) => write!(f, "[{} {:p}]", data.kind.class_name(), Rc::as_ptr(&self.0)),
            Err(_) => write!(f, "[object {:p}]", Rc::as_ptr(&self.0)),
        }
    }
}

pub(crate) enum ObjectKind {
    Plain,
    Array(Vec<HeapValue>),
    Function {
        name: String,
        body: NativeFunction<HeapEngine>,
    },
    Date(f64),
    Error,
    Proxy {
        target: HeapValue,
        handler: HeapValue,
    },
}

impl ObjectKind {
    pub(crate) fn class_name(&self) -> &'static str {
        match self {
            ObjectKind::Plain => "object Object",
            ObjectKind::Array(_) => "object Array",
            ObjectKind::Function { .. } => "function",
            ObjectKind::Date(_) => "object Date",
            ObjectKind::Error => "object Error",
            ObjectKind::Proxy { .. } => "object Proxy",
        }
    }
}

pub(crate) struct ObjectData {
    pub(crate) kind: ObjectKind,
    /// Own properties in insertion order.
    pub(crate) properties: Vec<(String, HeapValue)>,
    pub(crate) hidden: Vec<(String, HeapValue)>,
    finalizers: Vec<Finalizer>,
}

impl ObjectData {
    pub(crate) fn property(&self, key: &str) -> Option<&HeapValue> {
        self.properties
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Inserts or overwrites, returning the previous value so it is dropped
    /// after the borrow ends.
    pub(crate) fn put_property(&mut self, key: &str, value: HeapValue) -> Option<HeapValue> {
        match self.properties.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.properties.push((key.to_string(), value));
                None
            }
        }
    }

    pub(crate) fn hidden(&self, key: &str) -> Option<&HeapValue> {
        self.hidden
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub(crate) fn put_hidden(&mut self, key: &str, value: HeapValue) -> Option<HeapValue> {
        match self.hidden.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.hidden.push((key.to_string(), value));
                None
            }
        }
    }

    pub(crate) fn add_finalizer(&mut self, finalizer: Finalizer) {
        self.finalizers.push(finalizer);
    }
}

impl Drop for ObjectData {
    fn drop(&mut self) {
        for finalizer in self.finalizers.drain(..) {
            finalizer();
        }
    }
}
