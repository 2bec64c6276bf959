//! QuickJS engine
//!
//! [`QuickJsEngine`] implements [`ScriptEngine`] over an embedded QuickJS
//! runtime. Most operations go through a small strict-mode prelude so that
//! property access, Proxy traps, dates and JSON follow the language exactly.
//! Hidden slots and finalizers are kept in weak maps keyed by the object, so
//! a finalizer runs when the engine collects the object it was attached to.

use crate::engine::{Completion, Finalizer, ModuleLoader, NativeFunction, ScriptEngine, ValueType};
use crate::ffi::{self, ScriptHandle};
use rquickjs::function::{IntoArgs, Rest, This};
use rquickjs::{Context, Ctx, Function, Object, Persistent, Runtime, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

const PRELUDE: &str = include_str!("prelude.js");

// Field order is drop order: everything holding script values goes before
// the context and runtime.
struct Inner {
    prelude: Persistent<Object<'static>>,
    loader: RefCell<Option<ModuleLoader<QuickJsEngine>>>,
    /// Contexts of the `with` scopes currently on the stack.
    active: RefCell<Vec<Ctx<'static>>>,
    context: Context,
    runtime: Runtime,
}

/// Single threaded QuickJS engine.
#[derive(Clone)]
pub struct QuickJsEngine {
    inner: Rc<Inner>,
}

/// A rooted script value.
#[derive(Clone)]
pub struct JsValue {
    value: Persistent<Value<'static>>,
    engine: Rc<Inner>,
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = QuickJsEngine {
            inner: self.engine.clone(),
        };
        write!(f, "JsValue({})", engine.type_of(self))
    }
}

/// Keeps `ctx` reachable for nested engine calls until dropped.
struct ActiveScope<'a> {
    inner: &'a Inner,
}

impl<'a> ActiveScope<'a> {
    fn enter(inner: &'a Inner, ctx: &Ctx<'_>) -> Self {
        // SAFETY: the entry is popped when the scope drops, which happens
        // before the borrowed context goes out of use.
        let ctx: Ctx<'static> = unsafe { std::mem::transmute(ctx.clone()) };
        inner.active.borrow_mut().push(ctx);
        Self { inner }
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        self.inner.active.borrow_mut().pop();
    }
}

struct FinalizerGuard(RefCell<Option<Finalizer>>);

impl FinalizerGuard {
    fn keep(&self) {}
}

impl Drop for FinalizerGuard {
    fn drop(&mut self) {
        if let Some(finalizer) = self.0.borrow_mut().take() {
            finalizer();
        }
    }
}

/// Turns an engine error into the value script code would have caught.
fn caught<'js>(ctx: &Ctx<'js>, err: rquickjs::Error) -> Value<'js> {
    if let rquickjs::Error::Exception = err {
        return ctx.catch();
    }
    let message = err.to_string();
    ctx.globals()
        .get::<_, Function>("Error")
        .and_then(|error| error.call::<_, Value>((message,)))
        .unwrap_or_else(|_| Value::new_undefined(ctx.clone()))
}

fn number_of(value: &Value<'_>) -> Option<f64> {
    value
        .as_int()
        .map(f64::from)
        .or_else(|| value.as_float())
}

fn string_of(value: &Value<'_>) -> Option<String> {
    value.as_string().and_then(|text| text.to_string().ok())
}

fn value_type(kind: &str) -> ValueType {
    match kind {
        "undefined" => ValueType::Undefined,
        "null" => ValueType::Null,
        "boolean" => ValueType::Boolean,
        "number" => ValueType::Number,
        "string" => ValueType::String,
        "array" => ValueType::Array,
        "function" => ValueType::Function,
        "pointer" => ValueType::Pointer,
        "date" => ValueType::Date,
        "error" => ValueType::Error,
        _ => ValueType::Object,
    }
}

impl QuickJsEngine {
    pub fn new() -> Result<Self, rquickjs::Error> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;
        let prelude = context.with(|ctx| {
            let prelude = ctx.eval::<Object, _>(PRELUDE)?;
            Ok::<_, rquickjs::Error>(Persistent::save(&ctx, prelude))
        })?;
        tracing::debug!("QuickJS engine created");

        Ok(Self {
            inner: Rc::new(Inner {
                prelude,
                loader: RefCell::new(None),
                active: RefCell::new(Vec::new()),
                context,
                runtime,
            }),
        })
    }

    /// Evaluates `source` as a global script and returns its completion value.
    pub fn eval(&self, source: &str) -> Completion<Self> {
        self.enter(|ctx| {
            let result = ctx
                .eval::<Value, _>(source)
                .map_err(|err| caught(ctx, err));
            self.complete(ctx, result)
        })
    }

    /// Runs a full collection. Returns false when called from inside script code.
    pub fn collect_garbage(&self) -> bool {
        if !self.inner.active.borrow().is_empty() {
            return false;
        }
        self.inner.runtime.run_gc();
        true
    }

    fn enter<R>(&self, f: impl for<'js> FnOnce(&Ctx<'js>) -> R) -> R {
        let current = self.inner.active.borrow().last().cloned();
        match current {
            Some(ctx) => f(&ctx),
            None => self.inner.context.with(|ctx| {
                let _scope = ActiveScope::enter(&self.inner, &ctx);
                f(&ctx)
            }),
        }
    }

    fn save<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> JsValue {
        JsValue {
            value: Persistent::save(ctx, value),
            engine: self.inner.clone(),
        }
    }

    fn restore<'js>(&self, ctx: &Ctx<'js>, value: &JsValue) -> Value<'js> {
        match value.value.clone().restore(ctx) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%err, "value belongs to another engine");
                Value::new_undefined(ctx.clone())
            }
        }
    }

    fn complete<'js>(&self, ctx: &Ctx<'js>, result: Result<Value<'js>, Value<'js>>) -> Completion<Self> {
        result
            .map(|value| self.save(ctx, value))
            .map_err(|thrown| self.save(ctx, thrown))
    }

    /// Calls the prelude function `name`.
    fn helper<'js, A>(&self, ctx: &Ctx<'js>, name: &str, args: A) -> Result<Value<'js>, Value<'js>>
    where
        A: IntoArgs<'js>,
    {
        let prelude = self
            .inner
            .prelude
            .clone()
            .restore(ctx)
            .map_err(|err| caught(ctx, err))?;
        let function = prelude
            .get::<_, Function>(name)
            .map_err(|err| caught(ctx, err))?;
        function.call(args).map_err(|err| caught(ctx, err))
    }

    fn helper_bool<'js, A>(&self, ctx: &Ctx<'js>, name: &str, args: A) -> Result<bool, JsValue>
    where
        A: IntoArgs<'js>,
    {
        match self.helper(ctx, name, args) {
            Ok(result) => Ok(result.as_bool().unwrap_or(false)),
            Err(thrown) => Err(self.save(ctx, thrown)),
        }
    }

    fn native_function<'js>(
        &self,
        ctx: &Ctx<'js>,
        body: NativeFunction<Self>,
    ) -> rquickjs::Result<Function<'js>> {
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, this: This<Value<'js>>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let Some(inner) = weak.upgrade() else {
                    return Err(ctx.throw(Value::new_undefined(ctx.clone())));
                };
                let engine = QuickJsEngine { inner };
                let _scope = ActiveScope::enter(&engine.inner, &ctx);
                let this = engine.save(&ctx, this.0);
                let args: Vec<JsValue> = args.0.into_iter().map(|arg| engine.save(&ctx, arg)).collect();
                match body(&engine, &this, &args) {
                    Ok(result) => Ok(engine.restore(&ctx, &result)),
                    Err(thrown) => Err(ctx.throw(engine.restore(&ctx, &thrown))),
                }
            },
        )
    }

    fn cached_module(&self, id: &str) -> Option<JsValue> {
        self.enter(|ctx| {
            let cached = self.helper(ctx, "moduleHas", (id,)).ok()?.as_bool()?;
            if !cached {
                return None;
            }
            let exports = self.helper(ctx, "moduleGet", (id,)).ok()?;
            Some(self.save(ctx, exports))
        })
    }
}

impl ScriptEngine for QuickJsEngine {
    type Value = JsValue;

    fn undefined(&self) -> JsValue {
        self.enter(|ctx| self.save(ctx, Value::new_undefined(ctx.clone())))
    }

    fn null(&self) -> JsValue {
        self.enter(|ctx| self.save(ctx, Value::new_null(ctx.clone())))
    }

    fn boolean(&self, value: bool) -> JsValue {
        self.enter(|ctx| self.save(ctx, Value::new_bool(ctx.clone(), value)))
    }

    fn number(&self, value: f64) -> JsValue {
        self.enter(|ctx| self.save(ctx, Value::new_number(ctx.clone(), value)))
    }

    fn string(&self, value: &str) -> JsValue {
        self.enter(|ctx| match rquickjs::String::from_str(ctx.clone(), value) {
            Ok(text) => self.save(ctx, text.into_value()),
            Err(err) => {
                let thrown = caught(ctx, err);
                self.save(ctx, thrown)
            }
        })
    }

    fn byte_string(&self, bytes: &[u8]) -> JsValue {
        self.string(&ffi::byte_string(bytes))
    }

    fn object(&self) -> JsValue {
        self.enter(|ctx| match Object::new(ctx.clone()) {
            Ok(object) => self.save(ctx, object.into_value()),
            Err(err) => {
                let thrown = caught(ctx, err);
                self.save(ctx, thrown)
            }
        })
    }

    fn array(&self) -> JsValue {
        self.enter(|ctx| match rquickjs::Array::new(ctx.clone()) {
            Ok(array) => self.save(ctx, array.into_value()),
            Err(err) => {
                let thrown = caught(ctx, err);
                self.save(ctx, thrown)
            }
        })
    }

    fn pointer(&self, handle: ScriptHandle) -> JsValue {
        self.enter(|ctx| {
            let bits = handle.to_bits().to_string();
            let pointer = self.helper(ctx, "pointer", (bits,)).unwrap_or_else(|thrown| thrown);
            self.save(ctx, pointer)
        })
    }

    fn function(&self, name: &str, body: NativeFunction<Self>) -> JsValue {
        self.enter(|ctx| {
            let wrapped = self
                .native_function(ctx, body)
                .map_err(|err| caught(ctx, err))
                .and_then(|native| self.helper(ctx, "wrap", (native.into_value(), name)));
            match wrapped {
                Ok(function) => self.save(ctx, function),
                Err(thrown) => {
                    tracing::warn!(name, "failed to create native function");
                    self.save(ctx, thrown)
                }
            }
        })
    }

    fn proxy(&self, target: &JsValue, handler: &JsValue) -> Completion<Self> {
        self.enter(|ctx| {
            let args = (self.restore(ctx, target), self.restore(ctx, handler));
            let result = self.helper(ctx, "proxy", args);
            self.complete(ctx, result)
        })
    }

    fn date(&self, millis: f64) -> Completion<Self> {
        self.enter(|ctx| {
            let result = self.helper(ctx, "date", (millis,));
            self.complete(ctx, result)
        })
    }

    fn error(&self, message: &str) -> JsValue {
        self.enter(|ctx| {
            let error = self.helper(ctx, "error", (message,)).unwrap_or_else(|thrown| thrown);
            self.save(ctx, error)
        })
    }

    fn global(&self) -> JsValue {
        self.enter(|ctx| self.save(ctx, ctx.globals().into_value()))
    }

    fn type_of(&self, value: &JsValue) -> ValueType {
        self.enter(|ctx| {
            let kind = self.helper(ctx, "kind", (self.restore(ctx, value),));
            match kind.ok().as_ref().and_then(string_of) {
                Some(kind) => value_type(&kind),
                None => ValueType::Undefined,
            }
        })
    }

    fn as_bool(&self, value: &JsValue) -> Option<bool> {
        self.enter(|ctx| self.restore(ctx, value).as_bool())
    }

    fn as_number(&self, value: &JsValue) -> Option<f64> {
        self.enter(|ctx| number_of(&self.restore(ctx, value)))
    }

    fn as_string(&self, value: &JsValue) -> Option<String> {
        self.enter(|ctx| string_of(&self.restore(ctx, value)))
    }

    fn as_pointer(&self, value: &JsValue) -> Option<ScriptHandle> {
        self.enter(|ctx| {
            let bits = self
                .helper(ctx, "pointerBits", (self.restore(ctx, value),))
                .ok()?;
            let bits = string_of(&bits)?.parse::<u64>().ok()?;
            Some(ScriptHandle::from(bits))
        })
    }

    fn date_millis(&self, value: &JsValue) -> Option<f64> {
        self.enter(|ctx| {
            let millis = self
                .helper(ctx, "dateMillis", (self.restore(ctx, value),))
                .ok()?;
            number_of(&millis)
        })
    }

    fn to_display_string(&self, value: &JsValue) -> String {
        if let Some(handle) = self.as_pointer(value) {
            return handle.to_string();
        }
        self.enter(|ctx| {
            self.helper(ctx, "display", (self.restore(ctx, value),))
                .ok()
                .as_ref()
                .and_then(string_of)
                .unwrap_or_default()
        })
    }

    fn length(&self, value: &JsValue) -> usize {
        self.enter(|ctx| {
            self.helper(ctx, "length", (self.restore(ctx, value),))
                .ok()
                .as_ref()
                .and_then(number_of)
                .map_or(0, |length| length as usize)
        })
    }

    fn same_value(&self, a: &JsValue, b: &JsValue) -> bool {
        if let (Some(a), Some(b)) = (self.as_pointer(a), self.as_pointer(b)) {
            return a == b;
        }
        self.enter(|ctx| {
            let args = (self.restore(ctx, a), self.restore(ctx, b));
            self.helper(ctx, "same", args)
                .ok()
                .and_then(|same| same.as_bool())
                .unwrap_or(false)
        })
    }

    fn get(&self, object: &JsValue, key: &str) -> Completion<Self> {
        self.enter(|ctx| {
            let result = self.helper(ctx, "get", (self.restore(ctx, object), key));
            self.complete(ctx, result)
        })
    }

    fn set(&self, object: &JsValue, key: &str, value: JsValue) -> Result<bool, JsValue> {
        self.enter(|ctx| {
            let args = (self.restore(ctx, object), key, self.restore(ctx, &value));
            self.helper_bool(ctx, "set", args)
        })
    }

    fn has(&self, object: &JsValue, key: &str) -> Result<bool, JsValue> {
        self.enter(|ctx| self.helper_bool(ctx, "has", (self.restore(ctx, object), key)))
    }

    fn keys(&self, object: &JsValue) -> Result<Vec<String>, JsValue> {
        self.enter(|ctx| {
            let names = self
                .helper(ctx, "keys", (self.restore(ctx, object),))
                .map_err(|thrown| self.save(ctx, thrown))?;
            let Some(names) = names.as_array() else {
                return Ok(Vec::new());
            };
            let mut keys = Vec::with_capacity(names.len());
            for index in 0..names.len() {
                let name = names
                    .get::<Value>(index)
                    .map_err(|err| self.save(ctx, caught(ctx, err)))?;
                keys.push(string_of(&name).unwrap_or_default());
            }
            Ok(keys)
        })
    }

    fn get_index(&self, object: &JsValue, index: usize) -> Completion<Self> {
        self.enter(|ctx| {
            let result = self.helper(ctx, "get", (self.restore(ctx, object), index as f64));
            self.complete(ctx, result)
        })
    }

    fn set_index(&self, object: &JsValue, index: usize, value: JsValue) -> Result<bool, JsValue> {
        self.enter(|ctx| {
            let args = (self.restore(ctx, object), index as f64, self.restore(ctx, &value));
            self.helper_bool(ctx, "set", args)
        })
    }

    fn get_hidden(&self, object: &JsValue, key: &str) -> Option<JsValue> {
        self.enter(|ctx| {
            let value = self
                .helper(ctx, "getHidden", (self.restore(ctx, object), key))
                .ok()?;
            if value.is_undefined() {
                return None;
            }
            Some(self.save(ctx, value))
        })
    }

    fn set_hidden(&self, object: &JsValue, key: &str, value: JsValue) -> bool {
        self.enter(|ctx| {
            let args = (self.restore(ctx, object), key, self.restore(ctx, &value));
            self.helper_bool(ctx, "setHidden", args).unwrap_or(false)
        })
    }

    fn call(&self, function: &JsValue, this: &JsValue, args: &[JsValue]) -> Completion<Self> {
        let args = self.array_from(args.to_vec())?;
        self.enter(|ctx| {
            let args = (
                self.restore(ctx, function),
                self.restore(ctx, this),
                self.restore(ctx, &args),
            );
            let result = self.helper(ctx, "apply", args);
            self.complete(ctx, result)
        })
    }

    fn construct(&self, constructor: &JsValue, args: &[JsValue]) -> Completion<Self> {
        let args = self.array_from(args.to_vec())?;
        self.enter(|ctx| {
            let args = (self.restore(ctx, constructor), self.restore(ctx, &args));
            let result = self.helper(ctx, "construct", args);
            self.complete(ctx, result)
        })
    }

    fn json_encode(&self, value: &JsValue) -> Result<Option<String>, JsValue> {
        self.enter(|ctx| {
            let text = self
                .helper(ctx, "stringify", (self.restore(ctx, value),))
                .map_err(|thrown| self.save(ctx, thrown))?;
            Ok(string_of(&text))
        })
    }

    fn json_decode(&self, text: &str) -> Completion<Self> {
        self.enter(|ctx| {
            let result = self.helper(ctx, "parse", (text,));
            self.complete(ctx, result)
        })
    }

    fn set_module_loader(&self, loader: ModuleLoader<Self>) {
        *self.inner.loader.borrow_mut() = Some(loader);
    }

    fn require(&self, id: &str) -> Completion<Self> {
        if let Some(exports) = self.cached_module(id) {
            return Ok(exports);
        }
        let loader = self.inner.loader.borrow().clone();
        let exports = match loader {
            Some(loader) => loader(self, id)?,
            None => None,
        };
        let Some(exports) = exports else {
            return Err(self.error(&format!("cannot find module '{id}'")));
        };
        self.enter(|ctx| {
            let args = (id, self.restore(ctx, &exports));
            self.helper(ctx, "moduleSet", args)
                .map(|_| ())
                .map_err(|thrown| self.save(ctx, thrown))
        })?;
        tracing::debug!(id, "module loaded");
        Ok(exports)
    }

    fn set_finalizer(&self, object: &JsValue, finalizer: Finalizer) -> bool {
        if !self.type_of(object).is_object() {
            return false;
        }
        self.enter(|ctx| {
            let guard = FinalizerGuard(RefCell::new(Some(finalizer)));
            let holder = match Function::new(ctx.clone(), move || guard.keep()) {
                Ok(holder) => holder,
                Err(err) => {
                    tracing::warn!(%err, "failed to attach finalizer");
                    return false;
                }
            };
            let args = (self.restore(ctx, object), holder.into_value());
            self.helper_bool(ctx, "addFinalizer", args).unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ScriptRuntime;
    use std::cell::Cell;

    fn engine() -> QuickJsEngine {
        QuickJsEngine::new().unwrap()
    }

    fn eval_number(engine: &QuickJsEngine, source: &str) -> f64 {
        let value = engine.eval(source).unwrap();
        engine.as_number(&value).unwrap()
    }

    fn eval_string(engine: &QuickJsEngine, source: &str) -> String {
        let value = engine.eval(source).unwrap();
        engine.as_string(&value).unwrap()
    }

    #[test]
    fn test_eval_and_primitive_queries() {
        let engine = engine();
        assert_eq!(eval_number(&engine, "1 + 2"), 3.0);
        assert_eq!(eval_number(&engine, "0.5 * 3"), 1.5);
        assert_eq!(eval_string(&engine, "'te' + 'ther'"), "tether");

        let yes = engine.eval("true").unwrap();
        assert_eq!(engine.as_bool(&yes), Some(true));
        assert_eq!(engine.type_of(&engine.eval("null").unwrap()), ValueType::Null);
        assert_eq!(engine.type_of(&engine.eval("[1, 2]").unwrap()), ValueType::Array);
        assert_eq!(engine.type_of(&engine.eval("new Date(0)").unwrap()), ValueType::Date);
        assert_eq!(
            engine.type_of(&engine.eval("new TypeError('x')").unwrap()),
            ValueType::Error
        );
        assert_eq!(engine.type_of(&engine.eval("(() => 1)").unwrap()), ValueType::Function);
    }

    #[test]
    fn test_values_round_trip_through_globals() {
        let engine = engine();
        let object = engine.object();
        engine.set(&object, "name", engine.string("ada")).unwrap();
        engine.set(&object, "age", engine.number(36.0)).unwrap();
        engine.global_set("person", object).unwrap();

        assert_eq!(eval_string(&engine, "person.name + ':' + person.age"), "ada:36");
        assert_eq!(eval_string(&engine, "Object.keys(person).join()"), "name,age");

        let array = engine.eval("[10, 20, 30]").unwrap();
        assert_eq!(engine.length(&array), 3);
        let items = engine.array_to_vec(&array).unwrap();
        assert_eq!(engine.as_number(&items[2]), Some(30.0));
    }

    #[test]
    fn test_native_functions_see_this_and_arguments() {
        let engine = engine();
        let sum = engine.native("sum", |engine, _, args| {
            let total: f64 = args.iter().filter_map(|a| engine.as_number(a)).sum();
            Ok(engine.number(total))
        });
        engine.global_set("sum", sum).unwrap();

        assert_eq!(eval_number(&engine, "sum(1, 2, 3)"), 6.0);
        assert_eq!(eval_string(&engine, "sum.name"), "sum");
        assert_eq!(eval_string(&engine, "typeof new sum()"), "object");

        let label = engine.native("label", |engine, this, _| engine.get(this, "label"));
        engine.global_set("label", label).unwrap();
        assert_eq!(eval_string(&engine, "({ label: 'x', read: label }).read()"), "x");
    }

    #[test]
    fn test_native_errors_are_catchable() {
        let engine = engine();
        let fail = engine.native("fail", |engine, _, _| {
            let error = engine.error("boom");
            engine.set(&error, "code", engine.string("demo:boom"))?;
            Err(error)
        });
        engine.global_set("fail", fail).unwrap();

        assert_eq!(
            eval_string(&engine, "try { fail() } catch (e) { e.code + ' ' + e.message }"),
            "demo:boom boom"
        );

        let runtime = ScriptRuntime::new(engine.clone());
        let err = runtime.call("fail", &[]).unwrap_err();
        assert_eq!(err.code(), Some("demo:boom"));
        assert_eq!(err.to_string(), "uncaught Error: boom");
    }

    #[test]
    fn test_nested_calls_reenter_the_engine() {
        let engine = engine();
        let twice = engine.native("twice", |engine, _, args| {
            let callback = args.first().cloned().unwrap_or_else(|| engine.undefined());
            let once = engine.call(&callback, &engine.undefined(), &[engine.number(1.0)])?;
            let again = engine.call(&callback, &engine.undefined(), &[once])?;
            Ok(again)
        });
        engine.global_set("twice", twice).unwrap();

        assert_eq!(eval_number(&engine, "twice(x => x * 10)"), 100.0);
    }

    #[test]
    fn test_proxy_traps_receive_string_keys() {
        let engine = engine();
        let handler = engine.object();
        let get = engine.native("get", |engine, _, args| {
            let key = args.get(1).and_then(|k| engine.as_string(k)).unwrap_or_default();
            Ok(engine.string(&format!("<{key}>")))
        });
        let keys = engine.native("ownKeys", |engine, _, _| {
            engine.array_from(vec![engine.string("b"), engine.string("a")])
        });
        engine.set(&handler, "get", get).unwrap();
        engine.set(&handler, "ownKeys", keys).unwrap();
        let proxy = engine.proxy(&engine.object(), &handler).unwrap();
        engine.global_set("p", proxy).unwrap();

        assert_eq!(eval_string(&engine, "p.anything"), "<anything>");
        assert_eq!(eval_string(&engine, "Object.keys(p).join()"), "b,a");
        assert_eq!(eval_string(&engine, "typeof p[Symbol.iterator]"), "undefined");
    }

    #[test]
    fn test_hidden_slots_stay_out_of_script_view() {
        let engine = engine();
        let object = engine.object();
        assert!(engine.set_hidden(&object, "tether.handle", engine.number(7.0)));
        engine.global_set("o", object.clone()).unwrap();

        assert_eq!(eval_string(&engine, "JSON.stringify(o)"), "{}");
        let hidden = engine.get_hidden(&object, "tether.handle").unwrap();
        assert_eq!(engine.as_number(&hidden), Some(7.0));
        assert!(engine.get_hidden(&object, "other").is_none());
    }

    #[test]
    fn test_pointers_keep_their_handle() {
        let engine = engine();
        let handle = ScriptHandle::from(0xdead_beef);
        let pointer = engine.pointer(handle);

        assert_eq!(engine.type_of(&pointer), ValueType::Pointer);
        assert_eq!(engine.as_pointer(&pointer), Some(handle));
        assert!(engine.same_value(&pointer, &engine.pointer(handle)));
        assert!(!engine.same_value(&pointer, &engine.pointer(ScriptHandle::from(1))));
        assert_eq!(engine.as_pointer(&engine.object()), None);
    }

    #[test]
    fn test_dates_and_json() {
        let engine = engine();
        let date = engine.date(86_400_000.0).unwrap();
        assert_eq!(engine.date_millis(&date), Some(86_400_000.0));
        assert_eq!(
            engine.json_encode(&date).unwrap().as_deref(),
            Some("\"1970-01-02T00:00:00.000Z\"")
        );

        let decoded = engine.json_decode(r#"{"a":[1,true,null]}"#).unwrap();
        assert_eq!(engine.json_encode(&decoded).unwrap().as_deref(), Some(r#"{"a":[1,true,null]}"#));
        assert_eq!(engine.json_encode(&engine.undefined()).unwrap(), None);
        assert!(engine.json_decode("{oops").is_err());
    }

    #[test]
    fn test_set_on_null_throws() {
        let engine = engine();
        let thrown = engine.set(&engine.null(), "x", engine.number(1.0)).unwrap_err();
        assert!(engine.to_display_string(&thrown).starts_with("TypeError"));
        assert!(engine.has(&engine.number(1.0), "x").is_err());
    }

    #[test]
    fn test_require_caches_loader_results() {
        let engine = engine();
        let calls = Rc::new(Cell::new(0));
        let counted = calls.clone();
        engine.set_module_loader(Rc::new(move |engine: &QuickJsEngine, id: &str| -> Result<Option<JsValue>, JsValue> {
            counted.set(counted.get() + 1);
            Ok((id == "greeting").then(|| engine.string("hello")))
        }));

        let first = engine.require("greeting").unwrap();
        let second = engine.require("greeting").unwrap();
        assert_eq!(engine.as_string(&first).as_deref(), Some("hello"));
        assert!(engine.same_value(&first, &second));
        assert_eq!(calls.get(), 1);

        let missing = engine.require("nope").unwrap_err();
        assert_eq!(engine.to_display_string(&missing), "Error: cannot find module 'nope'");
    }

    #[test]
    fn test_finalizer_runs_after_collection() {
        let engine = engine();
        let released = Rc::new(Cell::new(false));
        let flag = released.clone();
        {
            let object = engine.object();
            assert!(engine.set_finalizer(&object, Box::new(move || flag.set(true))));
        }
        assert!(!engine.set_finalizer(&engine.number(1.0), Box::new(|| {})));

        assert!(engine.collect_garbage());
        assert!(released.get());
    }
}
