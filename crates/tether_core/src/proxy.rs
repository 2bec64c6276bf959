//! Proxy trap handler
//!
//! Script proxies forward their `has`, `get`, `set` and key enumeration traps
//! to a [`ProxyHandler`] together with the registered host value.
//! [`ReflectProxy`] answers them for structs, struct pointers and maps.

use crate::descriptor::{MethodDef, StructRef};
use crate::errors::{BridgeError, HostError};
use crate::function::{HostFunction, Signature};
use crate::value::structural::property_key;
use crate::value::{coerce, to_json, HostType, HostValue};

/// The four traps a proxied host value answers.
pub trait ProxyHandler {
    /// `key in proxy`
    fn has(&self, target: &HostValue, key: &str) -> bool;

    /// `proxy[key]`
    fn get(&self, target: &HostValue, key: &str, receiver: &HostValue)
        -> Result<HostValue, HostError>;

    /// `proxy[key] = value`; `Ok(false)` rejects the write without raising.
    fn set(
        &self,
        target: &HostValue,
        key: &str,
        value: HostValue,
        receiver: &HostValue,
    ) -> Result<bool, HostError>;

    /// Visible property names, in order.
    fn enumerate(&self, target: &HostValue) -> Result<Vec<String>, HostError>;
}

enum Resolved<'a> {
    Field {
        owner: &'a StructRef,
        index: usize,
        writable: bool,
    },
    Method {
        owner: &'a StructRef,
        method: &'a MethodDef,
    },
    Entry(&'a HostValue),
}

/// Reflection-driven handler used for every host value without its own.
#[derive(Debug, Clone)]
pub struct ReflectProxy {
    marker: String,
}

impl ReflectProxy {
    /// `marker` is what `toString` reports for proxied values.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    fn resolve<'a>(&self, target: &'a HostValue, key: &str) -> Option<Resolved<'a>> {
        match target {
            HostValue::Pointer(owner) => {
                let ty = owner.ty();
                if let Some(method) = ty.method(key, true) {
                    return Some(Resolved::Method { owner, method });
                }
                ty.field_index(key).map(|index| Resolved::Field {
                    owner,
                    index,
                    writable: ty.fields()[index].is_writable(),
                })
            }
            HostValue::Struct(owner) => {
                let ty = owner.ty();
                if let Some(index) = ty.field_index(key) {
                    return Some(Resolved::Field {
                        owner,
                        index,
                        writable: false,
                    });
                }
                ty.method(key, false)
                    .map(|method| Resolved::Method { owner, method })
            }
            HostValue::Map(_, _, pairs) => pairs
                .iter()
                .find(|(k, _)| property_key(k).is_ok_and(|k| k == key))
                .map(|(_, value)| Resolved::Entry(value)),
            _ => None,
        }
    }

    /// Script protocol hooks answered when nothing else matches.
    fn reserved(&self, target: &HostValue, key: &str) -> Option<HostValue> {
        match key {
            "toJSON" => {
                let target = target.clone();
                let signature = Signature::new(
                    vec![HostType::slice_of(HostType::Any)],
                    true,
                    vec![HostType::Opaque],
                    true,
                );
                Some(HostValue::Function(HostFunction::new(signature, move |_| {
                    Ok(vec![HostValue::Opaque(to_json(&target)?)])
                })))
            }
            "valueOf" => Some(HostValue::Nil),
            "toString" => {
                let marker = self.marker.clone();
                let signature = Signature::new(Vec::new(), false, vec![HostType::String], false);
                Some(HostValue::Function(HostFunction::new(signature, move |_| {
                    Ok(vec![HostValue::String(marker.clone())])
                })))
            }
            _ => None,
        }
    }
}

impl ProxyHandler for ReflectProxy {
    fn has(&self, target: &HostValue, key: &str) -> bool {
        self.resolve(target, key).is_some()
    }

    fn get(
        &self,
        target: &HostValue,
        key: &str,
        _receiver: &HostValue,
    ) -> Result<HostValue, HostError> {
        match self.resolve(target, key) {
            Some(Resolved::Field { owner, index, .. }) => Ok(owner.field(index)?),
            Some(Resolved::Method { owner, method }) => Ok(HostValue::Function(method.bind(owner)?)),
            Some(Resolved::Entry(value)) => Ok(value.clone()),
            None => self
                .reserved(target, key)
                .ok_or_else(|| BridgeError::undefined_property(key).into()),
        }
    }

    fn set(
        &self,
        target: &HostValue,
        key: &str,
        value: HostValue,
        _receiver: &HostValue,
    ) -> Result<bool, HostError> {
        let Some(Resolved::Field {
            owner,
            index,
            writable: true,
        }) = self.resolve(target, key)
        else {
            tracing::trace!(key, kind = target.kind_name(), "write rejected");
            return Ok(false);
        };

        let field = &owner.ty().fields()[index];
        let value = match coerce(value, field.ty()) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(key, %err, "write rejected");
                return Ok(false);
            }
        };
        owner.set_field(index, value)?;
        Ok(true)
    }

    fn enumerate(&self, target: &HostValue) -> Result<Vec<String>, HostError> {
        let (owner, through_pointer) = match target {
            HostValue::Pointer(owner) => (owner, true),
            HostValue::Struct(owner) => (owner, false),
            _ => return Ok(Vec::new()),
        };

        let ty = owner.ty();
        let mut names: Vec<String> = ty
            .visible_fields()
            .map(|(index, _)| ty.field_key(index))
            .collect();
        for method in ty.method_set(through_pointer) {
            let name = crate::naming::to_script(method.name());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ERROR_CODE_UNDEFINED_PROPERTY;
    use crate::fixtures::{my_struct, MyStruct};
    use crate::value::{Reflect, Shared};
    use std::collections::HashMap;

    fn proxy() -> ReflectProxy {
        ReflectProxy::new("[tether Proxy]")
    }

    #[test]
    fn test_get_fields_and_methods() {
        let shared = Shared::new(my_struct());
        let target = shared.clone().into_host();
        let handler = proxy();

        assert_eq!(handler.get(&target, "int", &target).unwrap(), HostValue::I64(42));
        assert_eq!(
            handler.get(&target, "string", &target).unwrap(),
            HostValue::String("foo".into())
        );

        let HostValue::Function(multiply) = handler.get(&target, "multiply", &target).unwrap() else {
            panic!("multiply is not a function");
        };
        assert_eq!(multiply.call(vec![HostValue::I64(2)]).unwrap(), vec![HostValue::I64(84)]);
    }

    #[test]
    fn test_missing_keys() {
        let target = Shared::new(my_struct()).into_host();
        let handler = proxy();

        let err = handler.get(&target, "baz", &target).unwrap_err();
        assert_eq!(err.code(), Some(ERROR_CODE_UNDEFINED_PROPERTY));
        assert!(!handler.has(&target, "baz"));
        assert!(handler.has(&target, "int"));
        assert!(!handler.set(&target, "baz", HostValue::I64(1), &target).unwrap());
    }

    #[test]
    fn test_reserved_keys() {
        let target = Shared::new(my_struct()).into_host();
        let handler = proxy();

        let HostValue::Function(to_json) = handler.get(&target, "toJSON", &target).unwrap() else {
            panic!("toJSON is not a function");
        };
        let results = to_json.call(Vec::new()).unwrap();
        let [HostValue::Opaque(snapshot)] = &results[..] else {
            panic!("toJSON returned no snapshot");
        };
        assert_eq!(snapshot["int"], serde_json::json!(42));

        assert!(handler.get(&target, "valueOf", &target).unwrap().is_nil());
        let HostValue::Function(to_string) = handler.get(&target, "toString", &target).unwrap() else {
            panic!("toString is not a function");
        };
        assert_eq!(
            to_string.call(Vec::new()).unwrap(),
            vec![HostValue::String("[tether Proxy]".into())]
        );
        assert!(!handler.has(&target, "toJSON"));
    }

    #[test]
    fn test_set_narrows_numbers() {
        let shared = Shared::new(my_struct());
        let target = shared.clone().into_host();
        let handler = proxy();

        assert!(handler.set(&target, "int8", HostValue::F64(300.0), &target).unwrap());
        assert_eq!(shared.borrow().int8, 44);
        assert_eq!(handler.get(&target, "int8", &target).unwrap(), HostValue::I8(44));

        assert!(handler.set(&target, "float32", HostValue::F64(1.5), &target).unwrap());
        assert_eq!(shared.borrow().float32, 1.5);
    }

    #[test]
    fn test_set_structural_values() {
        let shared = Shared::new(my_struct());
        let target = shared.clone().into_host();
        let handler = proxy();

        let slice = HostValue::Slice(HostType::Any, vec![HostValue::F64(1.0), HostValue::F64(2.0)]);
        assert!(handler.set(&target, "slice", slice, &target).unwrap());
        assert_eq!(shared.borrow().slice, vec![1, 2]);

        let nested = HostValue::Map(
            HostType::String,
            HostType::Any,
            vec![(HostValue::String("int".into()), HostValue::F64(5.0))],
        );
        assert!(handler.set(&target, "nested", nested, &target).unwrap());
        assert_eq!(shared.borrow().nested.as_ref().map(|n| n.borrow().int), Some(5));

        assert!(!handler.set(&target, "int", HostValue::String("x".into()), &target).unwrap());
        assert!(!handler.set(&target, "multiply", HostValue::Nil, &target).unwrap());
    }

    #[test]
    fn test_by_value_structs_are_read_only() {
        let target = my_struct().into_host();
        let handler = proxy();

        assert_eq!(handler.get(&target, "int", &target).unwrap(), HostValue::I64(42));
        assert!(!handler.set(&target, "int", HostValue::I64(1), &target).unwrap());
        assert!(!handler.has(&target, "multiply"));
        assert!(handler.has(&target, "describe"));
    }

    #[test]
    fn test_enumerate_fields_then_methods() {
        let handler = proxy();
        let pointer = Shared::new(my_struct()).into_host();
        let names = handler.enumerate(&pointer).unwrap();

        assert_eq!(names.first().map(String::as_str), Some("bool"));
        assert_eq!(&names[names.len() - 2..], ["describe", "multiply"]);
        assert!(!names.iter().any(|n| n == "private"));
        for name in &names {
            assert!(handler.get(&pointer, name, &pointer).is_ok(), "{name} does not resolve");
        }

        let value = MyStruct::default().into_host();
        assert!(!handler.enumerate(&value).unwrap().contains(&"multiply".to_string()));
    }

    #[test]
    fn test_maps_use_exact_keys() {
        let mut map = HashMap::new();
        map.insert("FooBar".to_string(), 1_i32);
        let target = map.into_host();
        let handler = proxy();

        assert_eq!(handler.get(&target, "FooBar", &target).unwrap(), HostValue::I32(1));
        assert!(!handler.has(&target, "fooBar"));
        assert!(handler.enumerate(&target).unwrap().is_empty());
        assert!(!handler.set(&target, "FooBar", HostValue::I32(2), &target).unwrap());
    }
}
