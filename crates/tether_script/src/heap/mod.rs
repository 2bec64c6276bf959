//! Test double engine over a reference counted object heap
//!
//! `HeapEngine` implements the full [`ScriptEngine`] surface without a
//! language front end, so bridge tests can drive the engine API directly and
//! observe releases deterministically (see [`crate::runtime::ScriptRuntime`]).
//! Objects are released as soon as the last reference goes away, which is when
//! finalizers run. Script code runs on [`crate::quickjs::QuickJsEngine`].

mod json;
mod value;

pub use value::{HeapValue, ObjectRef};

use crate::engine::{Completion, Finalizer, ModuleLoader, NativeFunction, ScriptEngine, ValueType};
use crate::ffi::{self, ScriptHandle};
use crate::time;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use value::ObjectKind;

/// Maximum nesting of native calls before a RangeError is thrown.
pub const MAX_CALL_DEPTH: usize = 256;

struct EngineState {
    global: ObjectRef,
    modules: RefCell<HashMap<String, HeapValue>>,
    loader: RefCell<Option<ModuleLoader<HeapEngine>>>,
    depth: Cell<usize>,
}

/// Single threaded in-process script engine.
#[derive(Clone)]
pub struct HeapEngine {
    state: Rc<EngineState>,
}

impl HeapEngine {
    pub fn new() -> Self {
        Self {
            state: Rc::new(EngineState {
                global: ObjectRef::new(ObjectKind::Plain),
                modules: RefCell::new(HashMap::new()),
                loader: RefCell::new(None),
                depth: Cell::new(0),
            }),
        }
    }

    /// `new <name>(message)` for the built-in error constructors.
    pub fn named_error(&self, name: &str, message: &str) -> HeapValue {
        let object = ObjectRef::new(ObjectKind::Error);
        {
            let mut data = object.borrow_mut();
            data.put_property("name", HeapValue::from(name));
            data.put_property("message", HeapValue::from(message));
        }
        HeapValue::Object(object)
    }

    pub(crate) fn type_error(&self, message: impl AsRef<str>) -> HeapValue {
        self.named_error("TypeError", message.as_ref())
    }

    fn date_builtin(&self, key: &str) -> Option<HeapValue> {
        let value = match key {
            "getTime" | "valueOf" => self.native(key, |engine, this, _| {
                engine
                    .date_millis(this)
                    .map(HeapValue::Number)
                    .ok_or_else(|| engine.type_error("this is not a Date object"))
            }),
            "toISOString" | "toJSON" => {
                let lenient = key == "toJSON";
                self.native(key, move |engine, this, _| {
                    let millis = engine
                        .date_millis(this)
                        .ok_or_else(|| engine.type_error("this is not a Date object"))?;
                    match time::format_iso8601(millis) {
                        Some(text) => Ok(engine.string(&text)),
                        None if lenient => Ok(HeapValue::Null),
                        None => Err(engine.named_error("RangeError", "invalid time value")),
                    }
                })
            }
            _ => return None,
        };
        Some(value)
    }

    fn own_property(&self, object: &ObjectRef, key: &str) -> HeapValue {
        let data = object.borrow();
        if let Some(value) = data.property(key) {
            return value.clone();
        }
        match &data.kind {
            ObjectKind::Array(items) if key == "length" => {
                return HeapValue::Number(items.len() as f64)
            }
            ObjectKind::Array(items) => {
                return key
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index).cloned())
                    .unwrap_or_default()
            }
            ObjectKind::Function { name, .. } if key == "name" => {
                return HeapValue::from(name.as_str())
            }
            _ => {}
        }
        let is_date = matches!(data.kind, ObjectKind::Date(_));
        drop(data);

        if is_date {
            self.date_builtin(key).unwrap_or_default()
        } else {
            HeapValue::Undefined
        }
    }

    fn enter_call(&self) -> Result<CallGuard, HeapValue> {
        let depth = self.state.depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(self.named_error("RangeError", "maximum call stack size exceeded"));
        }
        self.state.depth.set(depth + 1);
        Ok(CallGuard {
            state: self.state.clone(),
        })
    }
}

impl Default for HeapEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct CallGuard {
    state: Rc<EngineState>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.state.depth.set(self.state.depth.get().saturating_sub(1));
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{n}")
    }
}

impl ScriptEngine for HeapEngine {
    type Value = HeapValue;

    fn undefined(&self) -> HeapValue {
        HeapValue::Undefined
    }

    fn null(&self) -> HeapValue {
        HeapValue::Null
    }

    fn boolean(&self, value: bool) -> HeapValue {
        HeapValue::Bool(value)
    }

    fn number(&self, value: f64) -> HeapValue {
        HeapValue::Number(value)
    }

    fn string(&self, value: &str) -> HeapValue {
        HeapValue::from(value)
    }

    fn byte_string(&self, bytes: &[u8]) -> HeapValue {
        HeapValue::from(ffi::byte_string(bytes).as_str())
    }

    fn object(&self) -> HeapValue {
        HeapValue::Object(ObjectRef::new(ObjectKind::Plain))
    }

    fn array(&self) -> HeapValue {
        HeapValue::Object(ObjectRef::new(ObjectKind::Array(Vec::new())))
    }

    fn pointer(&self, handle: ScriptHandle) -> HeapValue {
        HeapValue::Pointer(handle)
    }

    fn function(&self, name: &str, body: NativeFunction<Self>) -> HeapValue {
        HeapValue::Object(ObjectRef::new(ObjectKind::Function {
            name: name.to_string(),
            body,
        }))
    }

    fn proxy(&self, target: &HeapValue, handler: &HeapValue) -> Completion<Self> {
        if target.as_object().is_none() || handler.as_object().is_none() {
            return Err(self.type_error("cannot create proxy with a non-object as target or handler"));
        }
        Ok(HeapValue::Object(ObjectRef::new(ObjectKind::Proxy {
            target: target.clone(),
            handler: handler.clone(),
        })))
    }

    fn date(&self, millis: f64) -> Completion<Self> {
        let millis = if millis.is_finite() && millis.abs() <= time::MAX_TIME_MS {
            millis.trunc()
        } else {
            f64::NAN
        };
        Ok(HeapValue::Object(ObjectRef::new(ObjectKind::Date(millis))))
    }

    fn error(&self, message: &str) -> HeapValue {
        self.named_error("Error", message)
    }

    fn global(&self) -> HeapValue {
        HeapValue::Object(self.state.global.clone())
    }

    fn type_of(&self, value: &HeapValue) -> ValueType {
        match value {
            HeapValue::Undefined => ValueType::Undefined,
            HeapValue::Null => ValueType::Null,
            HeapValue::Bool(_) => ValueType::Boolean,
            HeapValue::Number(_) => ValueType::Number,
            HeapValue::String(_) => ValueType::String,
            HeapValue::Pointer(_) => ValueType::Pointer,
            HeapValue::Object(object) => match &object.borrow().kind {
                ObjectKind::Plain => ValueType::Object,
                ObjectKind::Array(_) => ValueType::Array,
                ObjectKind::Function { .. } => ValueType::Function,
                ObjectKind::Date(_) => ValueType::Date,
                ObjectKind::Error => ValueType::Error,
                ObjectKind::Proxy { target, .. } => match self.type_of(target) {
                    ValueType::Function => ValueType::Function,
                    ValueType::Array => ValueType::Array,
                    _ => ValueType::Object,
                },
            },
        }
    }

    fn as_bool(&self, value: &HeapValue) -> Option<bool> {
        match value {
            HeapValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_number(&self, value: &HeapValue) -> Option<f64> {
        match value {
            HeapValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn as_string(&self, value: &HeapValue) -> Option<String> {
        match value {
            HeapValue::String(s) => Some(s.to_string()),
            _ => None,
        }
    }

    fn as_pointer(&self, value: &HeapValue) -> Option<ScriptHandle> {
        match value {
            HeapValue::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    fn date_millis(&self, value: &HeapValue) -> Option<f64> {
        match &value.as_object()?.borrow().kind {
            ObjectKind::Date(millis) => Some(*millis),
            _ => None,
        }
    }

    fn to_display_string(&self, value: &HeapValue) -> String {
        let object = match value {
            HeapValue::Undefined => return "undefined".to_string(),
            HeapValue::Null => return "null".to_string(),
            HeapValue::Bool(b) => return b.to_string(),
            HeapValue::Number(n) => return format_number(*n),
            HeapValue::String(s) => return s.to_string(),
            HeapValue::Pointer(p) => return p.to_string(),
            HeapValue::Object(object) => object,
        };

        if object.proxy_parts().is_some() {
            let text = self
                .get(value, "toString")
                .ok()
                .filter(|f| self.is_callable(f))
                .and_then(|f| self.call(&f, value, &[]).ok())
                .and_then(|text| self.as_string(&text));
            return text.unwrap_or_else(|| "[object Object]".to_string());
        }

        let items = match &object.borrow().kind {
            ObjectKind::Array(items) => Some(items.clone()),
            _ => None,
        };
        if let Some(items) = items {
            return items
                .iter()
                .map(|item| {
                    if self.is_nullish(item) {
                        String::new()
                    } else {
                        self.to_display_string(item)
                    }
                })
                .collect::<Vec<_>>()
                .join(",");
        }

        let data = object.borrow();
        match &data.kind {
            ObjectKind::Plain | ObjectKind::Array(_) | ObjectKind::Proxy { .. } => {
                "[object Object]".to_string()
            }
            ObjectKind::Function { name, .. } => {
                format!("function {name}() {{ [native code] }}")
            }
            ObjectKind::Date(millis) => {
                time::format_iso8601(*millis).unwrap_or_else(|| "Invalid Date".to_string())
            }
            ObjectKind::Error => {
                let name = data
                    .property("name")
                    .map(|v| self.to_display_string(v))
                    .unwrap_or_else(|| "Error".to_string());
                let message = data
                    .property("message")
                    .map(|v| self.to_display_string(v))
                    .unwrap_or_default();
                if message.is_empty() {
                    name
                } else {
                    format!("{name}: {message}")
                }
            }
        }
    }

    fn length(&self, value: &HeapValue) -> usize {
        match value {
            HeapValue::String(s) => s.encode_utf16().count(),
            HeapValue::Object(object) => {
                if let Some((target, _)) = object.proxy_parts() {
                    return self
                        .get(value, "length")
                        .ok()
                        .and_then(|len| self.as_number(&len))
                        .map(|len| len as usize)
                        .unwrap_or_else(|| self.length(&target));
                }
                match &object.borrow().kind {
                    ObjectKind::Array(items) => items.len(),
                    _ => 0,
                }
            }
            _ => 0,
        }
    }

    fn same_value(&self, a: &HeapValue, b: &HeapValue) -> bool {
        match (a, b) {
            (HeapValue::Undefined, HeapValue::Undefined) => true,
            (HeapValue::Null, HeapValue::Null) => true,
            (HeapValue::Bool(a), HeapValue::Bool(b)) => a == b,
            (HeapValue::Number(a), HeapValue::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (HeapValue::String(a), HeapValue::String(b)) => a == b,
            (HeapValue::Pointer(a), HeapValue::Pointer(b)) => a == b,
            (HeapValue::Object(a), HeapValue::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    fn get(&self, object: &HeapValue, key: &str) -> Completion<Self> {
        let target_object = match object {
            HeapValue::Object(target_object) => target_object,
            HeapValue::String(s) if key == "length" => {
                return Ok(HeapValue::Number(s.encode_utf16().count() as f64))
            }
            HeapValue::Undefined | HeapValue::Null => {
                return Err(self.type_error(format!(
                    "cannot read property '{key}' of {}",
                    self.to_display_string(object)
                )))
            }
            _ => return Ok(HeapValue::Undefined),
        };

        if let Some((target, handler)) = target_object.proxy_parts() {
            let trap = self.get(&handler, "get")?;
            if self.is_callable(&trap) {
                return self.call(
                    &trap,
                    &handler,
                    &[target, self.string(key), object.clone()],
                );
            }
            return self.get(&target, key);
        }

        Ok(self.own_property(target_object, key))
    }

    fn set(&self, object: &HeapValue, key: &str, value: HeapValue) -> Result<bool, HeapValue> {
        let target_object = match object {
            HeapValue::Object(target_object) => target_object,
            HeapValue::Undefined | HeapValue::Null => {
                return Err(self.type_error(format!(
                    "cannot set property '{key}' of {}",
                    self.to_display_string(object)
                )))
            }
            _ => return Ok(false),
        };

        if let Some((target, handler)) = target_object.proxy_parts() {
            let trap = self.get(&handler, "set")?;
            if self.is_callable(&trap) {
                let accepted = self.call(
                    &trap,
                    &handler,
                    &[target, self.string(key), value, object.clone()],
                )?;
                return Ok(accepted.is_truthy());
            }
            return self.set(&target, key, value);
        }

        let mut displaced = Vec::new();
        {
            let mut data = target_object.borrow_mut();
            let index = key.parse::<usize>().ok();
            let is_array = matches!(data.kind, ObjectKind::Array(_));
            if is_array && (key == "length" || index.is_some()) {
                if let ObjectKind::Array(items) = &mut data.kind {
                    match index {
                        Some(index) => {
                            if index >= items.len() {
                                items.resize(index + 1, HeapValue::Undefined);
                            }
                            displaced.push(std::mem::replace(&mut items[index], value));
                        }
                        None => {
                            let len = match value {
                                HeapValue::Number(n) if n >= 0.0 && n == n.trunc() => n as usize,
                                _ => {
                                    return Err(self.named_error("RangeError", "invalid array length"))
                                }
                            };
                            displaced = items.split_off(len.min(items.len()));
                            items.resize(len, HeapValue::Undefined);
                        }
                    }
                }
            } else if let Some(previous) = data.put_property(key, value) {
                displaced.push(previous);
            }
        }
        drop(displaced);
        Ok(true)
    }

    fn has(&self, object: &HeapValue, key: &str) -> Result<bool, HeapValue> {
        let target_object = object.as_object().ok_or_else(|| {
            self.type_error(format!(
                "cannot use 'in' operator to search for '{key}' in {}",
                self.to_display_string(object)
            ))
        })?;

        if let Some((target, handler)) = target_object.proxy_parts() {
            let trap = self.get(&handler, "has")?;
            if self.is_callable(&trap) {
                let found = self.call(&trap, &handler, &[target, self.string(key)])?;
                return Ok(found.is_truthy());
            }
            return self.has(&target, key);
        }

        let data = target_object.borrow();
        if data.property(key).is_some() {
            return Ok(true);
        }
        Ok(match &data.kind {
            ObjectKind::Array(items) => {
                key == "length" || key.parse::<usize>().is_ok_and(|index| index < items.len())
            }
            _ => false,
        })
    }

    fn keys(&self, object: &HeapValue) -> Result<Vec<String>, HeapValue> {
        let Some(target_object) = object.as_object() else {
            return Ok(Vec::new());
        };

        if let Some((target, handler)) = target_object.proxy_parts() {
            let mut trap = self.get(&handler, "ownKeys")?;
            if !self.is_callable(&trap) {
                trap = self.get(&handler, "enumerate")?;
            }
            if !self.is_callable(&trap) {
                return self.keys(&target);
            }
            let names = self.call(&trap, &handler, &[target])?;
            if self.type_of(&names) != ValueType::Array {
                return Err(self.type_error("ownKeys trap result must be an array"));
            }
            return self
                .array_to_vec(&names)?
                .iter()
                .map(|name| {
                    self.as_string(name)
                        .ok_or_else(|| self.type_error("ownKeys trap result must contain strings"))
                })
                .collect();
        }

        let data = target_object.borrow();
        let mut names = Vec::new();
        if let ObjectKind::Array(items) = &data.kind {
            names.extend((0..items.len()).map(|index| index.to_string()));
        }
        names.extend(data.properties.iter().map(|(name, _)| name.clone()));
        Ok(names)
    }

    fn get_index(&self, object: &HeapValue, index: usize) -> Completion<Self> {
        self.get(object, &index.to_string())
    }

    fn set_index(&self, object: &HeapValue, index: usize, value: HeapValue) -> Result<bool, HeapValue> {
        self.set(object, &index.to_string(), value)
    }

    fn get_hidden(&self, object: &HeapValue, key: &str) -> Option<HeapValue> {
        object.as_object()?.borrow().hidden(key).cloned()
    }

    fn set_hidden(&self, object: &HeapValue, key: &str, value: HeapValue) -> bool {
        let Some(target_object) = object.as_object() else {
            return false;
        };
        let previous = target_object.borrow_mut().put_hidden(key, value);
        drop(previous);
        true
    }

    fn call(&self, function: &HeapValue, this: &HeapValue, args: &[HeapValue]) -> Completion<Self> {
        let Some(object) = function.as_object() else {
            return Err(self.type_error(format!(
                "{} is not a function",
                self.to_display_string(function)
            )));
        };

        if let Some((target, _)) = object.proxy_parts() {
            return self.call(&target, this, args);
        }

        let body = object.native_body().ok_or_else(|| {
            self.type_error(format!("{} is not a function", self.to_display_string(function)))
        })?;

        let _guard = self.enter_call()?;
        body(self, this, args)
    }

    fn construct(&self, constructor: &HeapValue, args: &[HeapValue]) -> Completion<Self> {
        if !self.is_callable(constructor) {
            return Err(self.type_error(format!(
                "{} is not a constructor",
                self.to_display_string(constructor)
            )));
        }
        let this = self.object();
        let result = self.call(constructor, &this, args)?;
        Ok(if result.as_object().is_some() { result } else { this })
    }

    fn json_encode(&self, value: &HeapValue) -> Result<Option<String>, HeapValue> {
        let mut stack = Vec::new();
        let Some(json) = json::encode(self, value, "", &mut stack)? else {
            return Ok(None);
        };
        serde_json::to_string(&json)
            .map(Some)
            .map_err(|err| self.type_error(err.to_string()))
    }

    fn json_decode(&self, text: &str) -> Completion<Self> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|err| self.named_error("SyntaxError", &err.to_string()))?;
        json::decode(self, &json)
    }

    fn set_module_loader(&self, loader: ModuleLoader<Self>) {
        *self.state.loader.borrow_mut() = Some(loader);
    }

    fn require(&self, id: &str) -> Completion<Self> {
        if let Some(exports) = self.state.modules.borrow().get(id) {
            return Ok(exports.clone());
        }

        let loader = self.state.loader.borrow().clone();
        let exports = match loader {
            Some(loader) => loader(self, id)?,
            None => None,
        };

        match exports {
            Some(exports) => {
                tracing::debug!(module = id, "module loaded");
                self.state
                    .modules
                    .borrow_mut()
                    .insert(id.to_string(), exports.clone());
                Ok(exports)
            }
            None => Err(self.error(&format!("cannot find module '{id}'"))),
        }
    }

    fn set_finalizer(&self, object: &HeapValue, finalizer: Finalizer) -> bool {
        match object.as_object() {
            Some(target_object) => {
                target_object.borrow_mut().add_finalizer(finalizer);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recording_handler(engine: &HeapEngine, log: Rc<RefCell<Vec<String>>>) -> HeapValue {
        let handler = engine.object();

        let get_log = log.clone();
        let get = engine.native("get", move |engine, _, args| {
            let key = engine.as_string(&args[1]).unwrap_or_default();
            get_log.borrow_mut().push(format!("get {key}"));
            Ok(engine.string(&key.to_uppercase()))
        });
        engine.set(&handler, "get", get).unwrap();

        let set_log = log.clone();
        let set = engine.native("set", move |engine, _, args| {
            let key = engine.as_string(&args[1]).unwrap_or_default();
            set_log.borrow_mut().push(format!("set {key}"));
            Ok(engine.boolean(key != "readonly"))
        });
        engine.set(&handler, "set", set).unwrap();

        let keys = engine.native("ownKeys", |engine, _, _| {
            engine.array_from(vec![engine.string("a"), engine.string("b")])
        });
        engine.set(&handler, "ownKeys", keys).unwrap();

        handler
    }

    #[test]
    fn test_plain_object_properties_keep_insertion_order() {
        let engine = HeapEngine::new();
        let object = engine.object();
        engine.set(&object, "b", engine.number(1.0)).unwrap();
        engine.set(&object, "a", engine.number(2.0)).unwrap();
        engine.set(&object, "b", engine.number(3.0)).unwrap();

        assert_eq!(engine.keys(&object).unwrap(), vec!["b", "a"]);
        assert_eq!(engine.as_number(&engine.get(&object, "b").unwrap()), Some(3.0));
        assert!(engine.has(&object, "a").unwrap());
        assert!(!engine.has(&object, "c").unwrap());
    }

    #[test]
    fn test_arrays_grow_and_report_length() {
        let engine = HeapEngine::new();
        let array = engine.array();
        engine.set_index(&array, 2, engine.string("x")).unwrap();

        assert_eq!(engine.length(&array), 3);
        assert_eq!(engine.type_of(&engine.get_index(&array, 0).unwrap()), ValueType::Undefined);
        assert_eq!(engine.to_display_string(&array), ",,x");
    }

    #[test]
    fn test_proxy_traps_intercept_access() {
        let engine = HeapEngine::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let handler = recording_handler(&engine, log.clone());
        let proxy = engine.proxy(&engine.object(), &handler).unwrap();

        let value = engine.get(&proxy, "foo").unwrap();
        assert_eq!(engine.as_string(&value).as_deref(), Some("FOO"));
        assert!(engine.set(&proxy, "bar", engine.null()).unwrap());
        assert!(!engine.set(&proxy, "readonly", engine.null()).unwrap());
        assert_eq!(engine.keys(&proxy).unwrap(), vec!["a", "b"]);
        assert_eq!(*log.borrow(), vec!["get foo", "set bar", "set readonly"]);
    }

    #[test]
    fn test_proxy_without_traps_forwards_to_target() {
        let engine = HeapEngine::new();
        let target = engine.object();
        engine.set(&target, "x", engine.number(7.0)).unwrap();
        let proxy = engine.proxy(&target, &engine.object()).unwrap();

        assert_eq!(engine.as_number(&engine.get(&proxy, "x").unwrap()), Some(7.0));
        assert!(engine.has(&proxy, "x").unwrap());
        engine.set(&proxy, "y", engine.boolean(true)).unwrap();
        assert_eq!(engine.as_bool(&engine.get(&target, "y").unwrap()), Some(true));
    }

    #[test]
    fn test_hidden_slots_are_invisible() {
        let engine = HeapEngine::new();
        let object = engine.object();
        engine.set_hidden(&object, "handle", engine.pointer(ScriptHandle(9)));

        assert!(engine.keys(&object).unwrap().is_empty());
        assert_eq!(engine.json_encode(&object).unwrap().as_deref(), Some("{}"));
        let hidden = engine.get_hidden(&object, "handle").unwrap();
        assert_eq!(engine.as_pointer(&hidden), Some(ScriptHandle(9)));
    }

    #[test]
    fn test_call_reports_thrown_values() {
        let engine = HeapEngine::new();
        let thrower = engine.native("thrower", |engine, _, _| Err(engine.error("Deliberate error")));

        let thrown = engine.call(&thrower, &engine.undefined(), &[]).unwrap_err();
        assert_eq!(engine.type_of(&thrown), ValueType::Error);
        assert_eq!(engine.to_display_string(&thrown), "Error: Deliberate error");

        let not_callable = engine.call(&engine.number(1.0), &engine.undefined(), &[]);
        assert!(not_callable.is_err());
    }

    #[test]
    fn test_runaway_recursion_is_a_range_error() {
        let engine = HeapEngine::new();
        let recurse = engine.native("recurse", |engine, _, _| {
            let me = engine.global_get("recurse")?;
            engine.call(&me, &engine.undefined(), &[])
        });
        engine.global_set("recurse", recurse).unwrap();

        let me = engine.global_get("recurse").unwrap();
        let thrown = engine.call(&me, &engine.undefined(), &[]).unwrap_err();
        assert!(engine.to_display_string(&thrown).starts_with("RangeError"));
        assert_eq!(engine.state.depth.get(), 0);
    }

    #[test]
    fn test_dates_expose_time_and_iso_string() {
        let engine = HeapEngine::new();
        let date = engine.date(86_400_000.0).unwrap();

        let get_time = engine.get(&date, "getTime").unwrap();
        let millis = engine.call(&get_time, &date, &[]).unwrap();
        assert_eq!(engine.as_number(&millis), Some(86_400_000.0));
        assert_eq!(
            engine.json_encode(&date).unwrap().as_deref(),
            Some("\"1970-01-02T00:00:00.000Z\"")
        );
    }

    #[test]
    fn test_finalizer_runs_when_last_reference_drops() {
        let engine = HeapEngine::new();
        let released = Rc::new(Cell::new(false));
        let object = engine.object();
        let flag = released.clone();
        assert!(engine.set_finalizer(&object, Box::new(move || flag.set(true))));

        engine.global_set("keep", object.clone()).unwrap();
        drop(object);
        assert!(!released.get());

        engine.global_set("keep", engine.null()).unwrap();
        assert!(released.get());
    }

    #[test]
    fn test_require_consults_loader_once() {
        let engine = HeapEngine::new();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        engine.set_module_loader(Rc::new(move |engine: &HeapEngine, id: &str| -> Result<Option<HeapValue>, HeapValue> {
            counter.set(counter.get() + 1);
            Ok((id == "answer").then(|| engine.number(42.0)))
        }));

        assert_eq!(engine.as_number(&engine.require("answer").unwrap()), Some(42.0));
        assert_eq!(engine.as_number(&engine.require("answer").unwrap()), Some(42.0));
        assert_eq!(calls.get(), 1);
        assert!(engine.require("missing").is_err());
    }

    #[test]
    fn test_construct_returns_object_results() {
        let engine = HeapEngine::new();
        let ctor = engine.native("Point", |engine, this, _| {
            engine.set(this, "x", engine.number(1.0))?;
            Ok(engine.undefined())
        });

        let instance = engine.construct(&ctor, &[]).unwrap();
        assert_eq!(engine.as_number(&engine.get(&instance, "x").unwrap()), Some(1.0));
    }
}
