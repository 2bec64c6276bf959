//! Package registry
//!
//! Packages are named initializers registered once per process, usually at
//! startup. A bridge runs the initializer whenever script requires the package
//! and publishes whatever it declared.

use crate::descriptor::{HostStruct, TypeRef};
use crate::function::{HostFunction, IntoHostFunction};
use crate::value::{HostValue, Reflect};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Initializer filling a [`Package`] with its members.
pub type PackagePusher = Arc<dyn Fn(&mut Package) + Send + Sync>;

static PACKAGES: Lazy<RwLock<HashMap<String, PackagePusher>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `pusher` under `name`, replacing any previous registration.
pub fn register_package_pusher<F>(name: &str, pusher: F)
where
    F: Fn(&mut Package) + Send + Sync + 'static,
{
    let previous = PACKAGES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_string(), Arc::new(pusher));
    if previous.is_some() {
        tracing::warn!(package = name, "package pusher replaced");
    } else {
        tracing::debug!(package = name, "package pusher registered");
    }
}

pub fn package_pusher(name: &str) -> Option<PackagePusher> {
    PACKAGES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Names of every registered package, sorted.
pub fn registered_packages() -> Vec<String> {
    let mut names: Vec<String> = PACKAGES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

pub(crate) enum Member {
    Value(HostValue),
    Snapshot(HostValue),
    Type(TypeRef),
}

/// Exports under construction.
///
/// Members are published as properties of a fresh object, in declaration
/// order. [`Package::set_exports`] replaces that object with a single value.
pub struct Package {
    name: String,
    exports: Option<HostValue>,
    members: Vec<(String, Member)>,
}

impl Package {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exports: None,
            members: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member converted like any other host value; structs become proxies.
    pub fn value(&mut self, name: &str, value: impl Reflect) -> &mut Self {
        self.members
            .push((name.to_string(), Member::Value(value.into_host())));
        self
    }

    pub fn function<Args>(&mut self, name: &str, function: impl IntoHostFunction<Args>) -> &mut Self {
        let function = HostFunction::wrap(function);
        self.members
            .push((name.to_string(), Member::Value(HostValue::Function(function))));
        self
    }

    /// Member copied once, fields and bound methods.
    pub fn structure(&mut self, name: &str, value: impl Reflect) -> &mut Self {
        self.members
            .push((name.to_string(), Member::Snapshot(value.into_host())));
        self
    }

    /// Constructor for fresh `T` instances.
    pub fn ty<T: HostStruct>(&mut self, name: &str) -> &mut Self {
        self.members
            .push((name.to_string(), Member::Type(TypeRef::of::<T>())));
        self
    }

    pub fn set_exports(&mut self, value: impl Reflect) -> &mut Self {
        self.exports = Some(value.into_host());
        self
    }

    pub(crate) fn into_parts(self) -> (Option<HostValue>, Vec<(String, Member)>) {
        (self.exports, self.members)
    }
}
