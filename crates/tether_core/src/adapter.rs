//! Function adapters
//!
//! Host functions become script natives that convert their arguments, fill
//! missing ones with zero values and hand failures back as thrown errors.
//! Script functions become [`HostFunction`]s that convert the other way and
//! check the returned values against the expected result types.

use crate::bridge::Bridge;
use crate::errors::{BridgeError, HostError};
use crate::function::{HostFunction, Signature};
use crate::value::{HostType, HostValue};
use std::sync::Arc;
use tether_script::{Completion, ScriptEngine, ScriptHandle, ValueType};

/// Builds the thrown value for a host error, with its code attached.
pub(crate) fn raise<E: ScriptEngine>(engine: &E, err: &HostError) -> E::Value {
    let error = engine.error(&err.to_string());
    if let Some(code) = err.code() {
        let _ = engine.set(&error, "code", engine.string(code));
    }
    error
}

impl<E: ScriptEngine> Bridge<E> {
    pub(crate) fn raise(&self, err: &HostError) -> E::Value {
        raise(&self.engine, err)
    }

    /// Failure of the engine itself, reported with the thrown value's text.
    pub(crate) fn script_failure(&self, thrown: &E::Value) -> BridgeError {
        BridgeError::Script {
            message: self.engine.to_display_string(thrown),
        }
    }

    /// A thrown script value as a host error, through the error factory when set.
    pub(crate) fn script_error(&self, thrown: &E::Value) -> HostError {
        let factory = self.state.error_factory.borrow().clone();
        match factory {
            Some(factory) => HostError::new(factory(&self.engine, thrown)),
            None => HostError::from(self.script_failure(thrown)),
        }
    }

    // ========================================================================
    // Host functions called from script
    // ========================================================================

    pub(crate) fn wrap_host_function(&self, function: HostFunction) -> E::Value {
        self.wrap_named("", function)
    }

    pub(crate) fn wrap_named(&self, name: &str, function: HostFunction) -> E::Value {
        let weak = self.weak();
        self.engine.native(name, move |engine, _this, args| {
            let bridge = Bridge::attach(engine, &weak)
                .ok_or_else(|| raise(engine, &BridgeError::TornDown.into()))?;
            bridge.invoke(&function, args)
        })
    }

    fn invoke(&self, function: &HostFunction, args: &[E::Value]) -> Completion<E> {
        // Each host call starts with a clean slate.
        self.state.last_error.borrow_mut().take();
        let values = self
            .host_args(function.signature(), args)
            .map_err(|err| self.raise(&err.into()))?;

        match function.call(values) {
            Ok(results) => self
                .pack_results(results)
                .map_err(|err| self.raise(&err.into())),
            Err(err) => {
                tracing::debug!(%err, "host function failed");
                *self.state.last_error.borrow_mut() = Some(err.clone());
                Err(self.raise(&err))
            }
        }
    }

    /// Converts script arguments to the parameter types. Missing fixed
    /// arguments become zero values, extra ones are dropped unless the
    /// function is variadic.
    fn host_args(
        &self,
        signature: &Signature,
        args: &[E::Value],
    ) -> Result<Vec<HostValue>, BridgeError> {
        let fixed = signature.fixed_count();
        let mut values = Vec::with_capacity(signature.params().len());
        for (index, ty) in signature.params()[..fixed].iter().enumerate() {
            let value = match args.get(index) {
                Some(arg) => self.to_host(arg, ty)?,
                None => ty.zero_value(),
            };
            values.push(value);
        }

        if let Some(elem) = signature.variadic_elem() {
            let rest = args
                .iter()
                .skip(fixed)
                .map(|arg| self.to_host(arg, elem))
                .collect::<Result<Vec<_>, _>>()?;
            values.push(HostValue::Slice(elem.clone(), rest));
        }
        Ok(values)
    }

    /// No results give `undefined`, one gives the value, more give an array.
    fn pack_results(&self, results: Vec<HostValue>) -> Result<E::Value, BridgeError> {
        match results.as_slice() {
            [] => Ok(self.engine.undefined()),
            [single] => self.to_script(single),
            many => {
                let values = many
                    .iter()
                    .map(|value| self.to_script(value))
                    .collect::<Result<Vec<_>, _>>()?;
                self.engine
                    .array_from(values)
                    .map_err(|thrown| self.script_failure(&thrown))
            }
        }
    }

    // ========================================================================
    // Script functions called from the host
    // ========================================================================

    /// Host function calling `function` directly.
    pub(crate) fn script_callback(
        &self,
        function: E::Value,
        signature: Arc<Signature>,
    ) -> HostFunction {
        let weak = self.weak();
        let engine = self.engine.clone();
        HostFunction::with_signature(signature.clone(), move |args| {
            let bridge = Bridge::attach(&engine, &weak).ok_or(BridgeError::TornDown)?;
            let args = bridge.script_args(&signature, args)?;
            let outcome = engine.call(&function, &engine.undefined(), &args);
            bridge.callback_results(&signature, outcome)
        })
    }

    /// Host function calling a script function through the `_call` dispatcher.
    pub(crate) fn dispatch_callback(
        &self,
        handle: ScriptHandle,
        signature: Arc<Signature>,
    ) -> HostFunction {
        let weak = self.weak();
        let engine = self.engine.clone();
        HostFunction::with_signature(signature.clone(), move |args| {
            let bridge = Bridge::attach(&engine, &weak).ok_or(BridgeError::TornDown)?;
            let namespace = bridge.namespace()?;
            let call = engine
                .get(&namespace, "_call")
                .map_err(|thrown| bridge.script_error(&thrown))?;
            let args = bridge.script_args(&signature, args)?;
            let list = engine
                .array_from(args)
                .map_err(|thrown| bridge.script_error(&thrown))?;
            let outcome = engine.call(&call, &namespace, &[engine.pointer(handle), list]);
            bridge.callback_results(&signature, outcome)
        })
    }

    /// Host arguments for a script call; a variadic tail is spread.
    fn script_args(
        &self,
        signature: &Signature,
        args: Vec<HostValue>,
    ) -> Result<Vec<E::Value>, BridgeError> {
        let mut values = Vec::with_capacity(args.len());
        let last = args.len().saturating_sub(1);
        for (index, arg) in args.into_iter().enumerate() {
            match arg {
                HostValue::Slice(_, items) if signature.is_variadic() && index == last => {
                    for item in &items {
                        values.push(self.to_script(item)?);
                    }
                }
                other => values.push(self.to_script(&other)?),
            }
        }
        Ok(values)
    }

    /// Reads a script call's outcome back as the signature's results.
    ///
    /// # Panics
    /// When the script threw and the signature has no error slot, or when the
    /// number of returned values does not match.
    fn callback_results(
        &self,
        signature: &Signature,
        outcome: Completion<E>,
    ) -> Result<Vec<HostValue>, HostError> {
        let value = match outcome {
            Ok(value) => value,
            Err(thrown) => {
                let err = self.script_error(&thrown);
                if signature.returns_error() {
                    return Err(err);
                }
                panic!("unhandled error in script callback: {err}");
            }
        };

        match signature.results() {
            [] => Ok(Vec::new()),
            [single] => Ok(vec![self.to_host(&value, single)?]),
            many => {
                let items = if self.engine.type_of(&value) == ValueType::Array {
                    self.engine
                        .array_to_vec(&value)
                        .map_err(|thrown| self.script_error(&thrown))?
                } else {
                    vec![value]
                };
                if items.len() != many.len() {
                    panic!(
                        "{}",
                        BridgeError::ResultArity {
                            expected: many.len(),
                            actual: items.len(),
                        }
                    );
                }
                items
                    .iter()
                    .zip(many)
                    .map(|(item, ty): (&E::Value, &HostType)| Ok(self.to_host(item, ty)?))
                    .collect()
            }
        }
    }
}
