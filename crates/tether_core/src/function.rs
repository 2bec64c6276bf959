//! Host functions
//!
//! Typed Rust closures are adapted once, at registration, into a
//! [`HostFunction`]: a [`Signature`] plus a body over [`HostValue`]s. Script
//! functions travel the other way as [`Callback`]s.

use crate::errors::{BridgeError, HostError};
use crate::value::{HostType, HostValue, Reflect};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

/// Parameter and result types of a host function.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    params: Vec<HostType>,
    variadic: bool,
    results: Vec<HostType>,
    returns_error: bool,
}

impl Signature {
    /// `results` excludes the trailing error slot, flagged by `returns_error`.
    /// A variadic signature takes its last parameter as a slice type.
    pub fn new(
        params: Vec<HostType>,
        variadic: bool,
        results: Vec<HostType>,
        returns_error: bool,
    ) -> Self {
        let variadic = variadic && matches!(params.last(), Some(HostType::Slice(_)));
        Self {
            params,
            variadic,
            results,
            returns_error,
        }
    }

    /// `func(...any) (any, error)`
    pub fn dynamic() -> Self {
        Self::new(
            vec![HostType::slice_of(HostType::Any)],
            true,
            vec![HostType::Any],
            true,
        )
    }

    pub fn params(&self) -> &[HostType] {
        &self.params
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn results(&self) -> &[HostType] {
        &self.results
    }

    pub fn returns_error(&self) -> bool {
        self.returns_error
    }

    /// Number of positional parameters before the variadic tail.
    pub fn fixed_count(&self) -> usize {
        if self.variadic {
            self.params.len() - 1
        } else {
            self.params.len()
        }
    }

    /// Element type of the variadic tail.
    pub fn variadic_elem(&self) -> Option<&HostType> {
        match (self.variadic, self.params.last()) {
            (true, Some(HostType::Slice(elem))) => Some(elem),
            _ => None,
        }
    }
}

type Body = dyn Fn(Vec<HostValue>) -> Result<Vec<HostValue>, HostError>;

/// A callable on the host side of the bridge.
///
/// The body receives one value per declared parameter, the variadic tail
/// packed as a slice, and returns one value per declared result.
#[derive(Clone)]
pub struct HostFunction {
    signature: Arc<Signature>,
    body: Rc<Body>,
}

impl HostFunction {
    pub fn new<F>(signature: Signature, body: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<Vec<HostValue>, HostError> + 'static,
    {
        Self::with_signature(Arc::new(signature), body)
    }

    pub fn with_signature<F>(signature: Arc<Signature>, body: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<Vec<HostValue>, HostError> + 'static,
    {
        Self {
            signature,
            body: Rc::new(body),
        }
    }

    /// Adapts a typed closure.
    pub fn wrap<Args, F: IntoHostFunction<Args>>(f: F) -> Self {
        f.into_host_function()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn signature_arc(&self) -> &Arc<Signature> {
        &self.signature
    }

    pub fn call(&self, args: Vec<HostValue>) -> Result<Vec<HostValue>, HostError> {
        (self.body)(args)
    }

    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostFunction").field(&self.signature).finish()
    }
}

// ============================================================================
// Typed adapters
// ============================================================================

/// Trailing arguments collected into a sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rest<T>(pub Vec<T>);

impl<T: Reflect> Reflect for Rest<T> {
    const VARIADIC: bool = true;

    fn host_type() -> HostType {
        HostType::slice_of(T::host_type())
    }

    fn into_host(self) -> HostValue {
        self.0.into_host()
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        Vec::<T>::from_host(value).map(Rest)
    }
}

/// Closures that can become a [`HostFunction`].
pub trait IntoHostFunction<Args> {
    fn into_host_function(self) -> HostFunction;
}

/// Return values of host closures.
pub trait IntoResults {
    const RETURNS_ERROR: bool = false;

    fn result_types() -> Vec<HostType>;

    fn into_results(self) -> Result<Vec<HostValue>, HostError>;
}

impl IntoResults for () {
    fn result_types() -> Vec<HostType> {
        Vec::new()
    }

    fn into_results(self) -> Result<Vec<HostValue>, HostError> {
        Ok(Vec::new())
    }
}

impl<T: Reflect> IntoResults for T {
    fn result_types() -> Vec<HostType> {
        vec![T::host_type()]
    }

    fn into_results(self) -> Result<Vec<HostValue>, HostError> {
        Ok(vec![self.into_host()])
    }
}

impl<T, E> IntoResults for Result<T, E>
where
    T: IntoResults,
    E: Into<anyhow::Error>,
{
    const RETURNS_ERROR: bool = true;

    fn result_types() -> Vec<HostType> {
        T::result_types()
    }

    fn into_results(self) -> Result<Vec<HostValue>, HostError> {
        self.map_err(HostError::new)?.into_results()
    }
}

macro_rules! impl_tuple_results {
    ($($name:ident),+) => {
        impl<$($name: Reflect),+> IntoResults for ($($name,)+) {
            fn result_types() -> Vec<HostType> {
                vec![$($name::host_type()),+]
            }

            #[allow(non_snake_case)]
            fn into_results(self) -> Result<Vec<HostValue>, HostError> {
                let ($($name,)+) = self;
                Ok(vec![$($name.into_host()),+])
            }
        }
    };
}

impl_tuple_results!(A, B);
impl_tuple_results!(A, B, C);
impl_tuple_results!(A, B, C, D);

fn is_variadic(flags: &[bool]) -> bool {
    flags.last().copied().unwrap_or(false)
}

macro_rules! impl_into_host_function {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> IntoHostFunction<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + 'static,
            R: IntoResults,
            $($arg: Reflect,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_host_function(self) -> HostFunction {
                let signature = Signature::new(
                    vec![$($arg::host_type()),*],
                    is_variadic(&[$($arg::VARIADIC),*]),
                    R::result_types(),
                    R::RETURNS_ERROR,
                );
                HostFunction::new(signature, move |args: Vec<HostValue>| {
                    let mut args = args.into_iter();
                    $(let $arg = $arg::from_host(args.next().unwrap_or(HostValue::Nil))?;)*
                    (self)($($arg),*).into_results()
                })
            }
        }
    };
}

impl_into_host_function!();
impl_into_host_function!(A1);
impl_into_host_function!(A1, A2);
impl_into_host_function!(A1, A2, A3);
impl_into_host_function!(A1, A2, A3, A4);
impl_into_host_function!(A1, A2, A3, A4, A5);
impl_into_host_function!(A1, A2, A3, A4, A5, A6);
impl_into_host_function!(A1, A2, A3, A4, A5, A6, A7);
impl_into_host_function!(A1, A2, A3, A4, A5, A6, A7, A8);

// ============================================================================
// Callbacks
// ============================================================================

/// Argument lists for calling a [`Callback`].
pub trait IntoArgs {
    fn arg_types() -> Vec<HostType>;

    fn into_args(self) -> Vec<HostValue>;
}

impl IntoArgs for () {
    fn arg_types() -> Vec<HostType> {
        Vec::new()
    }

    fn into_args(self) -> Vec<HostValue> {
        Vec::new()
    }
}

macro_rules! impl_into_args {
    ($($name:ident),+) => {
        impl<$($name: Reflect),+> IntoArgs for ($($name,)+) {
            fn arg_types() -> Vec<HostType> {
                vec![$($name::host_type()),+]
            }

            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<HostValue> {
                let ($($name,)+) = self;
                vec![$($name.into_host()),+]
            }
        }
    };
}

impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);

/// Results read back from a [`Callback`].
///
/// Without an error slot, a failing call is fatal: the callback panics.
pub trait FromResults: Sized {
    const RETURNS_ERROR: bool = false;

    fn result_types() -> Vec<HostType>;

    fn try_from_results(values: Vec<HostValue>) -> Result<Self, HostError>;

    fn from_outcome(outcome: Result<Vec<HostValue>, HostError>) -> Self {
        match outcome.and_then(Self::try_from_results) {
            Ok(value) => value,
            Err(err) => panic!("unhandled error in script callback: {err}"),
        }
    }
}

impl FromResults for () {
    fn result_types() -> Vec<HostType> {
        Vec::new()
    }

    fn try_from_results(_: Vec<HostValue>) -> Result<Self, HostError> {
        Ok(())
    }
}

impl<T: Reflect> FromResults for T {
    fn result_types() -> Vec<HostType> {
        vec![T::host_type()]
    }

    fn try_from_results(values: Vec<HostValue>) -> Result<Self, HostError> {
        let value = values.into_iter().next().unwrap_or(HostValue::Nil);
        Ok(T::from_host(value)?)
    }
}

impl<T: FromResults> FromResults for Result<T, HostError> {
    const RETURNS_ERROR: bool = true;

    fn result_types() -> Vec<HostType> {
        T::result_types()
    }

    fn try_from_results(values: Vec<HostValue>) -> Result<Self, HostError> {
        Ok(T::try_from_results(values))
    }

    fn from_outcome(outcome: Result<Vec<HostValue>, HostError>) -> Self {
        outcome.and_then(T::try_from_results)
    }
}

macro_rules! impl_tuple_from_results {
    ($($name:ident),+) => {
        impl<$($name: Reflect),+> FromResults for ($($name,)+) {
            fn result_types() -> Vec<HostType> {
                vec![$($name::host_type()),+]
            }

            fn try_from_results(values: Vec<HostValue>) -> Result<Self, HostError> {
                let mut values = values.into_iter();
                Ok(($($name::from_host(values.next().unwrap_or(HostValue::Nil))?,)+))
            }
        }
    };
}

impl_tuple_from_results!(A, B);
impl_tuple_from_results!(A, B, C);
impl_tuple_from_results!(A, B, C, D);

/// A script function held by the host, called with typed arguments.
pub struct Callback<A, R> {
    function: HostFunction,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A: IntoArgs, R: FromResults> Callback<A, R> {
    pub fn signature() -> Signature {
        Signature::new(A::arg_types(), false, R::result_types(), R::RETURNS_ERROR)
    }

    /// # Panics
    /// When the script function throws and `R` has no error slot.
    pub fn call(&self, args: A) -> R {
        R::from_outcome(self.function.call(args.into_args()))
    }

    pub fn function(&self) -> &HostFunction {
        &self.function
    }
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self {
            function: self.function.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(self.function.signature()).finish()
    }
}

impl<A, R> Reflect for Callback<A, R>
where
    A: IntoArgs + 'static,
    R: FromResults + 'static,
{
    fn host_type() -> HostType {
        HostType::Function(Arc::new(Self::signature()))
    }

    fn into_host(self) -> HostValue {
        HostValue::Function(self.function)
    }

    fn from_host(value: HostValue) -> Result<Self, BridgeError> {
        match value {
            HostValue::Function(function) => Ok(Self {
                function,
                _marker: PhantomData,
            }),
            other => Err(BridgeError::conversion(other.kind_name(), "func", "not a function")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_of_typed_closures() {
        let add = HostFunction::wrap(|a: i32, b: i32| a + b);
        assert_eq!(add.signature().params(), &[HostType::I32, HostType::I32]);
        assert_eq!(add.signature().results(), &[HostType::I32]);
        assert!(!add.signature().returns_error());
        assert!(!add.signature().is_variadic());

        let join = HostFunction::wrap(|sep: String, parts: Rest<String>| -> Result<String, BridgeError> {
            Ok(parts.0.join(&sep))
        });
        assert!(join.signature().is_variadic());
        assert_eq!(join.signature().fixed_count(), 1);
        assert_eq!(join.signature().variadic_elem(), Some(&HostType::String));
        assert!(join.signature().returns_error());
    }

    #[test]
    fn test_missing_arguments_are_zero() {
        let add = HostFunction::wrap(|a: i32, b: i32| a + b);
        assert_eq!(add.call(vec![HostValue::I32(2)]).unwrap(), vec![HostValue::I32(2)]);
    }

    #[test]
    fn test_errors_and_multiple_results() {
        let split = HostFunction::wrap(|n: i64| -> anyhow::Result<(i64, String)> {
            anyhow::ensure!(n >= 0, "negative input");
            Ok((n * 2, n.to_string()))
        });
        assert_eq!(
            split.call(vec![HostValue::I64(3)]).unwrap(),
            vec![HostValue::I64(6), HostValue::String("3".into())]
        );
        let err = split.call(vec![HostValue::I64(-1)]).unwrap_err();
        assert_eq!(err.to_string(), "negative input");
        assert_eq!(split.signature().results().len(), 2);
    }

    #[test]
    fn test_unit_and_conversion_failures() {
        let noop = HostFunction::wrap(|| {});
        assert!(noop.call(Vec::new()).unwrap().is_empty());

        let strict = HostFunction::wrap(|s: String| s.len());
        let err = strict.call(vec![HostValue::I32(1)]).unwrap_err();
        assert_eq!(err.code(), Some(crate::errors::ERROR_CODE_CONVERSION));
    }

    #[test]
    fn test_callback_results() {
        let double = Callback::<(i64,), i64>::from_host(HostValue::Function(HostFunction::wrap(|n: i64| n * 2))).unwrap();
        assert_eq!(double.call((21,)), 42);

        let failing = HostFunction::new(Callback::<(), Result<i64, HostError>>::signature(), |_| {
            Err(HostError::msg("nope"))
        });
        let fallible = Callback::<(), Result<i64, HostError>>::from_host(HostValue::Function(failing)).unwrap();
        assert_eq!(fallible.call(()).unwrap_err().to_string(), "nope");
    }

    #[test]
    #[should_panic(expected = "unhandled error in script callback: nope")]
    fn test_callback_without_error_slot_panics() {
        let failing = HostFunction::new(Signature::new(Vec::new(), false, vec![HostType::I64], false), |_| {
            Err(HostError::msg("nope"))
        });
        let callback = Callback::<(), i64>::from_host(HostValue::Function(failing)).unwrap();
        callback.call(());
    }
}
