//! Bridge between the host and one script engine instance
//!
//! A [`Bridge`] owns the handle registry and the host-side state of one
//! script session: the namespace object, the shared trap handler, the error
//! factory and the last host error. Natives installed in the engine only hold
//! weak references to that state, so dropping or tearing down the bridge
//! turns them into functions that throw.

use crate::adapter::raise;
use crate::config::BridgeConfig;
use crate::descriptor::{HostStruct, TypeRef};
use crate::errors::{BridgeError, HostError};
use crate::function::{Callback, FromResults, HostFunction, IntoArgs, IntoHostFunction};
use crate::package::{package_pusher, Member, Package};
use crate::proxy::{ProxyHandler, ReflectProxy};
use crate::registry::{Entry, Handle, HandleRegistry};
use crate::value::{HostType, HostValue, Reflect};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tether_script::{Completion, ScriptEngine, ScriptHandle, ScriptRuntime};

/// Hidden slot carrying the handle bits on proxies and their targets.
pub(crate) const HANDLE_SLOT: &str = "tether.handle";
const FUNCTIONS_KEY: &str = "_functions";
const CALL_KEY: &str = "_call";

static NEXT_BRIDGE_ID: AtomicU16 = AtomicU16::new(1);

/// Turns a thrown script value into a host error.
pub type ErrorFactory<E> = Rc<dyn Fn(&E, &<E as ScriptEngine>::Value) -> anyhow::Error>;

pub(crate) struct BridgeState<E: ScriptEngine> {
    pub(crate) id: u16,
    pub(crate) config: BridgeConfig,
    pub(crate) registry: RefCell<HandleRegistry>,
    /// Handles whose proxies were finalized, drained on the next registry use.
    pub(crate) released: Rc<RefCell<Vec<Handle>>>,
    pub(crate) last_error: RefCell<Option<HostError>>,
    pub(crate) error_factory: RefCell<Option<ErrorFactory<E>>>,
    pub(crate) require_function: RefCell<Option<HostFunction>>,
    pub(crate) namespace: RefCell<Option<E::Value>>,
    pub(crate) trap_handler: RefCell<Option<E::Value>>,
    pub(crate) reflect_proxy: Rc<dyn ProxyHandler>,
    pub(crate) next_function_id: Cell<u64>,
    pub(crate) torn_down: Cell<bool>,
}

#[derive(Debug, Copy, Clone)]
enum Trap {
    Has,
    Get,
    Set,
    Keys,
}

/// Host side of one script session.
pub struct Bridge<E: ScriptEngine> {
    pub(crate) engine: E,
    pub(crate) state: Rc<BridgeState<E>>,
}

impl<E: ScriptEngine> Bridge<E> {
    pub fn new(engine: E) -> Result<Self, BridgeError> {
        Self::with_config(engine, BridgeConfig::default())
    }

    pub fn with_config(engine: E, config: BridgeConfig) -> Result<Self, BridgeError> {
        let id = NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed);
        let state = Rc::new(BridgeState {
            id,
            reflect_proxy: Rc::new(ReflectProxy::new(config.proxy_marker.clone())),
            config,
            registry: RefCell::new(HandleRegistry::new(id)),
            released: Rc::new(RefCell::new(Vec::new())),
            last_error: RefCell::new(None),
            error_factory: RefCell::new(None),
            require_function: RefCell::new(None),
            namespace: RefCell::new(None),
            trap_handler: RefCell::new(None),
            next_function_id: Cell::new(1),
            torn_down: Cell::new(false),
        });

        let bridge = Self { engine, state };
        bridge.install_module_loader();
        bridge.install_namespace()?;
        tracing::debug!(bridge = id, namespace = %bridge.state.config.namespace, "bridge created");
        Ok(bridge)
    }

    /// Rebuilds a bridge from the weak reference held by an installed native.
    pub(crate) fn attach(engine: &E, state: &Weak<BridgeState<E>>) -> Option<Self> {
        let state = state.upgrade()?;
        if state.torn_down.get() {
            return None;
        }
        Some(Self {
            engine: engine.clone(),
            state,
        })
    }

    pub(crate) fn weak(&self) -> Weak<BridgeState<E>> {
        Rc::downgrade(&self.state)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    pub fn id(&self) -> u16 {
        self.state.id
    }

    /// Script-side driver over the same engine.
    pub fn runtime(&self) -> ScriptRuntime<E> {
        ScriptRuntime::new(self.engine.clone())
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publishes `value` by reference: script reads and writes reach the host value.
    pub fn push_global_proxy(&self, name: &str, value: impl Reflect) -> Result<(), BridgeError> {
        let proxy = self.push_proxy(value)?;
        self.set_global(name, proxy)
    }

    pub fn push_proxy(&self, value: impl Reflect) -> Result<E::Value, BridgeError> {
        self.proxy_for(value.into_host())
    }

    /// Publishes a one-time copy of a struct's fields and bound methods.
    pub fn push_global_struct(&self, name: &str, value: impl Reflect) -> Result<(), BridgeError> {
        let object = self.push_struct(value)?;
        self.set_global(name, object)
    }

    pub fn push_struct(&self, value: impl Reflect) -> Result<E::Value, BridgeError> {
        self.snapshot(&value.into_host())
    }

    /// Publishes a constructor stamping out fresh zero-valued `T` instances.
    pub fn push_global_type<T: HostStruct>(&self, name: &str) -> Result<(), BridgeError> {
        let constructor = self.push_type::<T>();
        self.set_global(name, constructor)
    }

    pub fn push_type<T: HostStruct>(&self) -> E::Value {
        self.constructor(TypeRef::of::<T>())
    }

    /// Publishes a value through the regular conversion rules.
    pub fn push_global_value(&self, name: &str, value: impl Reflect) -> Result<(), BridgeError> {
        let value = self.push_value(value)?;
        self.set_global(name, value)
    }

    pub fn push_value(&self, value: impl Reflect) -> Result<E::Value, BridgeError> {
        self.to_script(&value.into_host())
    }

    pub fn push_global_function<Args>(
        &self,
        name: &str,
        function: impl IntoHostFunction<Args>,
    ) -> Result<(), BridgeError> {
        let function = self.wrap_named(name, function.into_host_function());
        self.set_global(name, function)
    }

    pub fn push_function<Args>(&self, function: impl IntoHostFunction<Args>) -> E::Value {
        self.wrap_host_function(function.into_host_function())
    }

    /// Publishes the exports of a registered package under `alias`.
    pub fn push_global_package(&self, name: &str, alias: &str) -> Result<(), BridgeError> {
        let exports = self.package_exports(name)?;
        self.set_global(alias, exports)
    }

    /// Host function consulted first when script requires a module. It gets
    /// the module id and returns the exports, or nil to fall back to packages.
    pub fn set_require_function<Args>(&self, function: impl IntoHostFunction<Args>) {
        *self.state.require_function.borrow_mut() = Some(function.into_host_function());
    }

    pub fn set_error_factory<F>(&self, factory: F)
    where
        F: Fn(&E, &E::Value) -> anyhow::Error + 'static,
    {
        *self.state.error_factory.borrow_mut() = Some(Rc::new(factory));
    }

    /// Most recent error returned by a host function called from script.
    pub fn last_error(&self) -> Option<HostError> {
        self.state.last_error.borrow().clone()
    }

    pub fn consume_last_error(&self) -> Option<HostError> {
        self.state.last_error.borrow_mut().take()
    }

    // ========================================================================
    // Reading back
    // ========================================================================

    pub fn get_value<T: Reflect>(&self, value: &E::Value) -> Result<T, BridgeError> {
        let value = self.to_host(value, &T::host_type())?;
        T::from_host(value)
    }

    pub fn get_global<T: Reflect>(&self, name: &str) -> Result<T, BridgeError> {
        let value = self
            .engine
            .global_get(name)
            .map_err(|thrown| self.script_failure(&thrown))?;
        self.get_value(&value)
    }

    /// Calls a script function with typed arguments.
    ///
    /// # Panics
    /// When the function throws and `R` has no error slot.
    pub fn call_function<A, R>(&self, function: &E::Value, args: A) -> Result<R, BridgeError>
    where
        A: IntoArgs + 'static,
        R: FromResults + 'static,
    {
        if !self.engine.is_callable(function) {
            return Err(BridgeError::conversion(
                self.engine.type_of(function),
                "func",
                "not callable",
            ));
        }
        let signature = Arc::new(Callback::<A, R>::signature());
        let callback = Callback::<A, R>::from_host(HostValue::Function(
            self.script_callback(function.clone(), signature),
        ))?;
        Ok(callback.call(args))
    }

    pub fn call_global<A, R>(&self, name: &str, args: A) -> Result<R, BridgeError>
    where
        A: IntoArgs + 'static,
        R: FromResults + 'static,
    {
        let function = self
            .engine
            .global_get(name)
            .map_err(|thrown| self.script_failure(&thrown))?;
        self.call_function(&function, args)
    }

    // ========================================================================
    // Lifetime
    // ========================================================================

    /// Registered host values still reachable from script.
    pub fn live_handles(&self) -> usize {
        self.collect_released();
        self.state.registry.borrow().len()
    }

    /// Releases every registered value. Proxies left in the engine throw on
    /// access afterwards. Returns how many values were released.
    pub fn teardown(self) -> usize {
        self.state.torn_down.set(true);
        let entries = self.state.registry.borrow_mut().drain();
        let released = entries.len();
        drop(entries);

        self.state.released.borrow_mut().clear();
        let require = self.state.require_function.borrow_mut().take();
        let factory = self.state.error_factory.borrow_mut().take();
        let handler = self.state.trap_handler.borrow_mut().take();
        let namespace = self.state.namespace.borrow_mut().take();
        drop((require, factory, handler, namespace));

        tracing::debug!(bridge = self.state.id, released, "bridge torn down");
        released
    }

    pub(crate) fn collect_released(&self) {
        loop {
            let pending = std::mem::take(&mut *self.state.released.borrow_mut());
            if pending.is_empty() {
                return;
            }
            let entries: Vec<Entry> = {
                let mut registry = self.state.registry.borrow_mut();
                pending
                    .into_iter()
                    .filter_map(|handle| registry.remove(handle))
                    .collect()
            };
            tracing::trace!(count = entries.len(), "released handles collected");
            // Dropping entries may finalize further proxies.
            drop(entries);
        }
    }

    // ========================================================================
    // Proxies
    // ========================================================================

    /// Registers `value` and returns a live proxy for it.
    pub(crate) fn proxy_for(&self, value: HostValue) -> Result<E::Value, BridgeError> {
        self.collect_released();
        let handler = match &value {
            HostValue::Object(custom) => custom.clone(),
            _ => self.state.reflect_proxy.clone(),
        };
        let handle = self.state.registry.borrow_mut().insert(value, handler);
        let pointer = self.engine.pointer(ScriptHandle::from(handle.to_bits()));

        let target = self.engine.object();
        self.engine.set_hidden(&target, HANDLE_SLOT, pointer.clone());
        let released = Rc::clone(&self.state.released);
        self.engine.set_finalizer(
            &target,
            Box::new(move || released.borrow_mut().push(handle)),
        );

        let handler = self.trap_handler()?;
        let proxy = self
            .engine
            .proxy(&target, &handler)
            .map_err(|thrown| self.script_failure(&thrown))?;
        self.engine.set_hidden(&proxy, HANDLE_SLOT, pointer);
        tracing::trace!(%handle, "proxy registered");
        Ok(proxy)
    }

    /// Handle carried by a proxy of this bridge.
    pub(crate) fn handle_of(&self, value: &E::Value) -> Option<Handle> {
        if !self.engine.type_of(value).is_object() {
            return None;
        }
        let pointer = self.engine.get_hidden(value, HANDLE_SLOT)?;
        let handle = Handle::from_bits(self.engine.as_pointer(&pointer)?.to_bits());
        (handle.bridge() == self.state.id).then_some(handle)
    }

    /// Host value behind a proxy, if `value` is one.
    pub(crate) fn registered_value(
        &self,
        value: &E::Value,
    ) -> Option<Result<HostValue, BridgeError>> {
        let handle = self.handle_of(value)?;
        Some(self.entry(handle).map(|entry| entry.value))
    }

    fn entry(&self, handle: Handle) -> Result<Entry, BridgeError> {
        self.state
            .registry
            .borrow()
            .get(handle)
            .cloned()
            .ok_or_else(|| BridgeError::StaleHandle {
                handle: handle.to_string(),
            })
    }

    /// The handler object shared by every proxy of this bridge.
    fn trap_handler(&self) -> Result<E::Value, BridgeError> {
        if let Some(handler) = self.state.trap_handler.borrow().as_ref() {
            return Ok(handler.clone());
        }

        let handler = self.engine.object();
        let traps = [
            ("has", Trap::Has),
            ("get", Trap::Get),
            ("set", Trap::Set),
            ("ownKeys", Trap::Keys),
            ("enumerate", Trap::Keys),
        ];
        for (name, trap) in traps {
            let weak = self.weak();
            let function = self.engine.native(name, move |engine, _this, args| {
                let bridge = Bridge::attach(engine, &weak)
                    .ok_or_else(|| raise(engine, &BridgeError::TornDown.into()))?;
                bridge.dispatch_trap(trap, args)
            });
            self.set_property(&handler, name, function)?;
        }

        *self.state.trap_handler.borrow_mut() = Some(handler.clone());
        Ok(handler)
    }

    fn dispatch_trap(&self, trap: Trap, args: &[E::Value]) -> Completion<E> {
        let undefined = self.engine.undefined();
        let arg = |index: usize| args.get(index).unwrap_or(&undefined);

        let handle = self.handle_of(arg(0)).ok_or_else(|| {
            self.raise(&BridgeError::StaleHandle {
                handle: "none".to_string(),
            }
            .into())
        })?;
        let Entry { value, handler } = self.entry(handle).map_err(|err| self.raise(&err.into()))?;
        let key = self.engine.to_display_string(arg(1));

        match trap {
            Trap::Has => Ok(self.engine.boolean(handler.has(&value, &key))),
            Trap::Get => {
                let receiver = self.receiver(arg(2));
                let result = handler
                    .get(&value, &key, &receiver)
                    .map_err(|err| self.raise(&err))?;
                self.to_script(&result).map_err(|err| self.raise(&err.into()))
            }
            Trap::Set => {
                let incoming = self
                    .to_host(arg(2), &HostType::Any)
                    .map_err(|err| self.raise(&err.into()))?;
                let receiver = self.receiver(arg(3));
                let accepted = handler
                    .set(&value, &key, incoming, &receiver)
                    .map_err(|err| self.raise(&err))?;
                Ok(self.engine.boolean(accepted))
            }
            Trap::Keys => {
                let names = handler.enumerate(&value).map_err(|err| self.raise(&err))?;
                let names = names.iter().map(|name| self.engine.string(name)).collect();
                self.engine.array_from(names)
            }
        }
    }

    fn receiver(&self, value: &E::Value) -> HostValue {
        match self.registered_value(value) {
            Some(Ok(receiver)) => receiver,
            _ => HostValue::Nil,
        }
    }

    // ========================================================================
    // Snapshots and constructors
    // ========================================================================

    /// Plain object with bound methods and current field values. Nil pointer
    /// fields are left out.
    pub(crate) fn snapshot(&self, value: &HostValue) -> Result<E::Value, BridgeError> {
        let (owner, through_pointer) = match value {
            HostValue::Pointer(owner) => (owner, true),
            HostValue::Struct(owner) => (owner, false),
            other => {
                return Err(BridgeError::conversion(
                    other.kind_name(),
                    "struct",
                    "only structs can be copied",
                ))
            }
        };

        let ty = owner.ty();
        let object = self.engine.object();
        for method in ty.method_set(through_pointer) {
            let name = crate::naming::to_script(method.name());
            let function = self.wrap_named(&name, method.bind(owner)?);
            self.set_property(&object, &name, function)?;
        }
        for (index, field) in ty.visible_fields() {
            let current = owner.field(index)?;
            if current.is_nil() && matches!(field.ty(), HostType::Pointer(_)) {
                continue;
            }
            let converted = self.to_script(&current)?;
            self.set_property(&object, &ty.field_key(index), converted)?;
        }
        Ok(object)
    }

    pub(crate) fn constructor(&self, ty: TypeRef) -> E::Value {
        let weak = self.weak();
        self.engine.native(ty.name(), move |engine, _this, _args| {
            let bridge = Bridge::attach(engine, &weak)
                .ok_or_else(|| raise(engine, &BridgeError::TornDown.into()))?;
            let instance = HostValue::Pointer(ty.resolve().instantiate());
            bridge
                .proxy_for(instance)
                .map_err(|err| bridge.raise(&err.into()))
        })
    }

    // ========================================================================
    // Namespace and modules
    // ========================================================================

    fn install_namespace(&self) -> Result<(), BridgeError> {
        let namespace = self.engine.object();

        let weak = self.weak();
        let require = self.engine.native("require", move |engine, _this, args| {
            Bridge::attach(engine, &weak)
                .ok_or_else(|| raise(engine, &BridgeError::TornDown.into()))?;
            let id = args
                .first()
                .map(|id| engine.to_display_string(id))
                .unwrap_or_default();
            engine.require(&id)
        });
        self.set_property(&namespace, "require", require)?;

        let weak = self.weak();
        let proxy = self.engine.native("proxy", move |engine, _this, args| {
            let bridge = Bridge::attach(engine, &weak)
                .ok_or_else(|| raise(engine, &BridgeError::TornDown.into()))?;
            let function = args.first().cloned().unwrap_or_else(|| engine.undefined());
            let handle = bridge
                .register_callback(&function)
                .map_err(|err| bridge.raise(&err.into()))?;
            Ok(engine.pointer(handle))
        });
        self.set_property(&namespace, "proxy", proxy)?;

        self.set_property(&namespace, FUNCTIONS_KEY, self.engine.object())?;

        let weak = self.weak();
        let call = self.engine.native(CALL_KEY, move |engine, _this, args| {
            let bridge = Bridge::attach(engine, &weak)
                .ok_or_else(|| raise(engine, &BridgeError::TornDown.into()))?;
            bridge.dispatch_call(args)
        });
        self.set_property(&namespace, CALL_KEY, call)?;

        if self.state.config.install_namespace {
            self.set_global(&self.state.config.namespace, namespace.clone())?;
        }
        *self.state.namespace.borrow_mut() = Some(namespace);
        Ok(())
    }

    pub(crate) fn namespace(&self) -> Result<E::Value, BridgeError> {
        self.state
            .namespace
            .borrow()
            .clone()
            .ok_or(BridgeError::TornDown)
    }

    fn functions_table(&self) -> Result<E::Value, BridgeError> {
        let namespace = self.namespace()?;
        self.engine
            .get(&namespace, FUNCTIONS_KEY)
            .map_err(|thrown| self.script_failure(&thrown))
    }

    /// Stores a script function in the dispatch table, keyed by identity.
    fn register_callback(&self, function: &E::Value) -> Result<ScriptHandle, BridgeError> {
        if !self.engine.is_callable(function) {
            return Err(BridgeError::conversion(
                self.engine.type_of(function),
                "func",
                "not callable",
            ));
        }

        let table = self.functions_table()?;
        let keys = self
            .engine
            .keys(&table)
            .map_err(|thrown| self.script_failure(&thrown))?;
        for key in keys {
            let existing = self
                .engine
                .get(&table, &key)
                .map_err(|thrown| self.script_failure(&thrown))?;
            if self.engine.same_value(&existing, function) {
                if let Ok(id) = key.parse::<u64>() {
                    return Ok(ScriptHandle(id));
                }
            }
        }

        let id = self.state.next_function_id.get();
        self.state.next_function_id.set(id + 1);
        self.set_property(&table, &id.to_string(), function.clone())?;
        tracing::trace!(id, "script function registered");
        Ok(ScriptHandle(id))
    }

    /// `_call(pointer, args)`: invokes a function from the dispatch table.
    fn dispatch_call(&self, args: &[E::Value]) -> Completion<E> {
        let handle = args
            .first()
            .and_then(|pointer| self.engine.as_pointer(pointer))
            .ok_or_else(|| {
                self.raise(&BridgeError::conversion("value", "pointer", "not a function pointer").into())
            })?;
        let table = self.functions_table().map_err(|err| self.raise(&err.into()))?;
        let function = self.engine.get(&table, &handle.to_bits().to_string())?;
        if !self.engine.is_callable(&function) {
            return Err(self.raise(
                &BridgeError::conversion("pointer", "func", format!("unknown function {handle}")).into(),
            ));
        }
        let call_args = match args.get(1) {
            Some(list) if !self.engine.is_nullish(list) => self.engine.array_to_vec(list)?,
            _ => Vec::new(),
        };
        self.engine.call(&function, &self.engine.undefined(), &call_args)
    }

    fn install_module_loader(&self) {
        let weak = self.weak();
        self.engine.set_module_loader(Rc::new(move |engine: &E, id: &str| {
            let Some(bridge) = Bridge::attach(engine, &weak) else {
                return Ok(None);
            };
            bridge
                .load_module(id)
                .map(Some)
                .map_err(|err| raise(engine, &err))
        }));
    }

    fn load_module(&self, id: &str) -> Result<E::Value, HostError> {
        let require = self.state.require_function.borrow().clone();
        if let Some(require) = require {
            let results = require.call(vec![HostValue::String(id.to_string())])?;
            if let Some(exports) = results.into_iter().next().filter(|v| !v.is_nil()) {
                tracing::debug!(id, "module resolved by require function");
                return Ok(self.to_script(&exports)?);
            }
        }
        Ok(self.package_exports(id)?)
    }

    /// Runs the registered pusher for `name` and builds its exports.
    pub(crate) fn package_exports(&self, name: &str) -> Result<E::Value, BridgeError> {
        let pusher = package_pusher(name).ok_or_else(|| BridgeError::PackageNotFound {
            name: name.to_string(),
        })?;
        let mut package = Package::new(name);
        pusher(&mut package);
        let (exports, members) = package.into_parts();

        if let Some(exports) = exports {
            if !members.is_empty() {
                tracing::warn!(package = name, "package exports replace its members");
            }
            return self.to_script(&exports);
        }

        let object = self.engine.object();
        for (key, member) in members {
            let value = match member {
                Member::Value(value) => self.to_script(&value)?,
                Member::Snapshot(value) => self.snapshot(&value)?,
                Member::Type(ty) => self.constructor(ty),
            };
            self.set_property(&object, &key, value)?;
        }
        tracing::debug!(package = name, "package loaded");
        Ok(object)
    }

    // ========================================================================
    // Engine helpers
    // ========================================================================

    pub(crate) fn set_property(
        &self,
        object: &E::Value,
        key: &str,
        value: E::Value,
    ) -> Result<(), BridgeError> {
        match self.engine.set(object, key, value) {
            Ok(true) => Ok(()),
            Ok(false) => Err(BridgeError::Script {
                message: format!("cannot assign property '{key}'"),
            }),
            Err(thrown) => Err(self.script_failure(&thrown)),
        }
    }

    fn set_global(&self, name: &str, value: E::Value) -> Result<(), BridgeError> {
        let global = self.engine.global();
        self.set_property(&global, name, value)
    }
}
