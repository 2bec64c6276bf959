//! Primitive engine API
//!
//! Everything the bridge needs from an embedded script engine. Operations that
//! may run script code (property access through proxies, calls, `toJSON`
//! hooks, module loading) are protected: they return `Err(thrown)` instead of
//! unwinding, and the caller decides what to do with the thrown value.

use crate::ffi::ScriptHandle;
use std::fmt;
use std::rc::Rc;

/// Result of a protected engine operation. `Err` carries the thrown value.
pub type Completion<E> = Result<<E as ScriptEngine>::Value, <E as ScriptEngine>::Value>;

/// Native function callable from script: `(engine, this, arguments)`.
pub type NativeFunction<E> = Rc<
    dyn Fn(&E, &<E as ScriptEngine>::Value, &[<E as ScriptEngine>::Value]) -> Completion<E>,
>;

/// Module search hook: resolves a module id to its exports, `Ok(None)` when unknown.
pub type ModuleLoader<E> = Rc<
    dyn Fn(&E, &str) -> Result<Option<<E as ScriptEngine>::Value>, <E as ScriptEngine>::Value>,
>;

/// Callback run once when the engine releases an object.
pub type Finalizer = Box<dyn FnOnce()>;

/// Kind of a script value
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Function,
    Pointer,
    Date,
    Error,
}

impl ValueType {
    /// True for every kind that can carry properties.
    pub fn is_object(self) -> bool {
        matches!(
            self,
            ValueType::Object
                | ValueType::Array
                | ValueType::Function
                | ValueType::Date
                | ValueType::Error
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Undefined => "undefined",
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Object => "object",
            ValueType::Array => "array",
            ValueType::Function => "function",
            ValueType::Pointer => "pointer",
            ValueType::Date => "date",
            ValueType::Error => "error",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An embedded script engine instance.
///
/// Cloning yields another handle to the same engine instance. Engines are
/// single threaded; nothing here is `Send`.
pub trait ScriptEngine: Clone + 'static {
    type Value: Clone + fmt::Debug + 'static;

    // ========================================================================
    // Construction
    // ========================================================================

    fn undefined(&self) -> Self::Value;

    fn null(&self) -> Self::Value;

    fn boolean(&self, value: bool) -> Self::Value;

    /// Numbers are doubles; integers up to 2^53 are represented exactly.
    fn number(&self, value: f64) -> Self::Value;

    fn string(&self, value: &str) -> Self::Value;

    /// A string built from raw bytes, without any transfer encoding.
    fn byte_string(&self, bytes: &[u8]) -> Self::Value;

    fn object(&self) -> Self::Value;

    fn array(&self) -> Self::Value;

    fn pointer(&self, handle: ScriptHandle) -> Self::Value;

    fn function(&self, name: &str, body: NativeFunction<Self>) -> Self::Value;

    /// `new Proxy(target, handler)`
    fn proxy(&self, target: &Self::Value, handler: &Self::Value) -> Completion<Self>;

    /// `new Date(millis)`
    fn date(&self, millis: f64) -> Completion<Self>;

    /// `new Error(message)`
    fn error(&self, message: &str) -> Self::Value;

    fn global(&self) -> Self::Value;

    // ========================================================================
    // Queries
    // ========================================================================

    fn type_of(&self, value: &Self::Value) -> ValueType;

    fn as_bool(&self, value: &Self::Value) -> Option<bool>;

    fn as_number(&self, value: &Self::Value) -> Option<f64>;

    fn as_string(&self, value: &Self::Value) -> Option<String>;

    fn as_pointer(&self, value: &Self::Value) -> Option<ScriptHandle>;

    /// Milliseconds since the epoch of a date object.
    fn date_millis(&self, value: &Self::Value) -> Option<f64>;

    /// String conversion that never throws.
    fn to_display_string(&self, value: &Self::Value) -> String;

    /// Array length, string length, or 0.
    fn length(&self, value: &Self::Value) -> usize;

    /// Identity for objects, value equality for primitives.
    fn same_value(&self, a: &Self::Value, b: &Self::Value) -> bool;

    fn is_callable(&self, value: &Self::Value) -> bool {
        self.type_of(value) == ValueType::Function
    }

    fn is_nullish(&self, value: &Self::Value) -> bool {
        matches!(self.type_of(value), ValueType::Undefined | ValueType::Null)
    }

    // ========================================================================
    // Properties
    // ========================================================================

    fn get(&self, object: &Self::Value, key: &str) -> Completion<Self>;

    /// Returns `Ok(false)` when the write was rejected without an exception.
    fn set(
        &self,
        object: &Self::Value,
        key: &str,
        value: Self::Value,
    ) -> Result<bool, Self::Value>;

    fn has(&self, object: &Self::Value, key: &str) -> Result<bool, Self::Value>;

    fn keys(&self, object: &Self::Value) -> Result<Vec<String>, Self::Value>;

    fn get_index(&self, object: &Self::Value, index: usize) -> Completion<Self>;

    fn set_index(
        &self,
        object: &Self::Value,
        index: usize,
        value: Self::Value,
    ) -> Result<bool, Self::Value>;

    /// Internal slot, invisible to traps, enumeration and JSON.
    fn get_hidden(&self, object: &Self::Value, key: &str) -> Option<Self::Value>;

    fn set_hidden(&self, object: &Self::Value, key: &str, value: Self::Value) -> bool;

    // ========================================================================
    // Calls
    // ========================================================================

    fn call(
        &self,
        function: &Self::Value,
        this: &Self::Value,
        args: &[Self::Value],
    ) -> Completion<Self>;

    fn construct(&self, constructor: &Self::Value, args: &[Self::Value]) -> Completion<Self>;

    // ========================================================================
    // Structural codec
    // ========================================================================

    /// `JSON.stringify`; `None` when the value has no JSON form.
    fn json_encode(&self, value: &Self::Value) -> Result<Option<String>, Self::Value>;

    /// `JSON.parse`
    fn json_decode(&self, text: &str) -> Completion<Self>;

    // ========================================================================
    // Modules and lifetime
    // ========================================================================

    fn set_module_loader(&self, loader: ModuleLoader<Self>);

    /// `require(id)`; resolved modules are cached per engine.
    fn require(&self, id: &str) -> Completion<Self>;

    /// Returns false when `object` cannot carry a finalizer.
    fn set_finalizer(&self, object: &Self::Value, finalizer: Finalizer) -> bool;

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Wraps a closure as a script function.
    fn native<F>(&self, name: &str, body: F) -> Self::Value
    where
        F: Fn(&Self, &Self::Value, &[Self::Value]) -> Completion<Self> + 'static,
    {
        self.function(name, Rc::new(body))
    }

    fn global_get(&self, name: &str) -> Completion<Self> {
        self.get(&self.global(), name)
    }

    fn global_set(&self, name: &str, value: Self::Value) -> Result<bool, Self::Value> {
        self.set(&self.global(), name, value)
    }

    fn array_from(&self, values: Vec<Self::Value>) -> Completion<Self> {
        let array = self.array();
        for (index, value) in values.into_iter().enumerate() {
            self.set_index(&array, index, value)?;
        }
        Ok(array)
    }

    fn array_to_vec(&self, array: &Self::Value) -> Result<Vec<Self::Value>, Self::Value> {
        (0..self.length(array))
            .map(|index| self.get_index(array, index))
            .collect()
    }
}
