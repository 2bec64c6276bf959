//! Tether Bridge Core
//!
//! Marshals host values into an embedded script engine and back:
//! - Value conversion in both directions
//! - Live proxies over host structs, with generation-checked handles
//! - Host functions callable from script, script functions callable from the host
//! - Naming translation between host and script conventions
//! - Process-wide package registry behind `require`

pub mod bridge;
pub mod config;
pub mod descriptor;
pub mod errors;
pub mod function;
pub mod naming;
pub mod package;
pub mod proxy;
pub mod registry;
pub mod value;

mod adapter;
mod convert;

#[cfg(test)]
pub(crate) mod fixtures;
#[cfg(test)]
mod script_tests;

pub use bridge::{Bridge, ErrorFactory};
pub use config::BridgeConfig;
pub use descriptor::{HostStruct, StructBuilder, StructRef, TypeRef};
pub use errors::{error_code, BridgeError, HostError};
pub use function::{
    Callback, FromResults, HostFunction, IntoArgs, IntoHostFunction, IntoResults, Rest, Signature,
};
pub use package::{register_package_pusher, registered_packages, Package};
pub use proxy::{ProxyHandler, ReflectProxy};
pub use registry::Handle;
pub use value::{HostType, HostValue, Json, Reflect, Shared};

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
