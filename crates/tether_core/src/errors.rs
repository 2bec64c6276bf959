//! Bridge error taxonomy
//!
//! Resolution and conversion failures are ordinary values; they only become
//! script exceptions at the script-facing boundary, and script exceptions only
//! become [`HostError`]s at the host-facing boundary.

use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Returned when a proxied object has no property with the requested name.
pub const ERROR_CODE_UNDEFINED_PROPERTY: &str = "tether:undefinedproperty";
/// Returned when `require` names a package with no registered pusher.
pub const ERROR_CODE_PACKAGE_NOT_FOUND: &str = "tether:packagenotfound";
pub const ERROR_CODE_CONVERSION: &str = "tether:conversion";
pub const ERROR_CODE_SCRIPT: &str = "tether:script";
pub const ERROR_CODE_STALE_HANDLE: &str = "tether:stalehandle";
pub const ERROR_CODE_BORROWED: &str = "tether:borrowed";
pub const ERROR_CODE_TORN_DOWN: &str = "tether:torndown";
pub const ERROR_CODE_RESULT_ARITY: &str = "tether:resultarity";

/// Errors raised by the bridge itself.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("undefined property '{key}'")]
    UndefinedProperty { key: String },

    #[error("unable to find the requested package '{name}'")]
    PackageNotFound { name: String },

    #[error("cannot convert {from} into {to}: {reason}")]
    Conversion {
        from: String,
        to: String,
        reason: String,
    },

    #[error("{message}")]
    Script { message: String },

    #[error("handle {handle} is not registered")]
    StaleHandle { handle: String },

    #[error("{type_name} is already mutably borrowed")]
    Borrowed { type_name: String },

    #[error("the bridge has been torn down")]
    TornDown,

    #[error("invalid count of return values from script function: expected {expected}, got {actual}")]
    ResultArity { expected: usize, actual: usize },
}

impl BridgeError {
    pub fn conversion(
        from: impl fmt::Display,
        to: impl fmt::Display,
        reason: impl fmt::Display,
    ) -> Self {
        BridgeError::Conversion {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn undefined_property(key: &str) -> Self {
        BridgeError::UndefinedProperty {
            key: key.to_string(),
        }
    }

    /// Stable code exposed to scripts as the `code` property of thrown errors.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::UndefinedProperty { .. } => ERROR_CODE_UNDEFINED_PROPERTY,
            BridgeError::PackageNotFound { .. } => ERROR_CODE_PACKAGE_NOT_FOUND,
            BridgeError::Conversion { .. } => ERROR_CODE_CONVERSION,
            BridgeError::Script { .. } => ERROR_CODE_SCRIPT,
            BridgeError::StaleHandle { .. } => ERROR_CODE_STALE_HANDLE,
            BridgeError::Borrowed { .. } => ERROR_CODE_BORROWED,
            BridgeError::TornDown => ERROR_CODE_TORN_DOWN,
            BridgeError::ResultArity { .. } => ERROR_CODE_RESULT_ARITY,
        }
    }
}

/// Returns the bridge error code carried by `err`, if any.
pub fn error_code(err: &anyhow::Error) -> Option<&'static str> {
    err.downcast_ref::<BridgeError>().map(BridgeError::code)
}

/// An error produced on the host side of the bridge.
///
/// Host functions fail with any `anyhow`-compatible error; the bridge shares
/// it so it can be both raised into script and kept as the last error.
#[derive(Clone)]
pub struct HostError(Rc<anyhow::Error>);

impl HostError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        HostError(Rc::new(err.into()))
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        HostError(Rc::new(anyhow::Error::msg(message)))
    }

    pub fn code(&self) -> Option<&'static str> {
        error_code(&self.0)
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &HostError) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<anyhow::Error> for HostError {
    fn from(err: anyhow::Error) -> Self {
        HostError(Rc::new(err))
    }
}

impl From<BridgeError> for HostError {
    fn from(err: BridgeError) -> Self {
        HostError::new(err)
    }
}
