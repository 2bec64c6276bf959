//! Value converter
//!
//! The two directions of the bridge: [`Bridge::to_script`] turns host values
//! into engine values, registering proxies for structs and wrapping functions;
//! [`Bridge::to_host`] reads engine values back as a declared [`HostType`],
//! returning the original host value for proxies and falling back to the JSON
//! form for everything structural.

use crate::adapter::raise;
use crate::bridge::Bridge;
use crate::errors::BridgeError;
use crate::function::Signature;
use crate::value::structural::property_key;
use crate::value::{
    cast_number, from_json, millis_to_system_time, system_time_to_millis, HostType, HostValue,
};
use std::sync::Arc;
use tether_script::ffi::string_bytes;
use tether_script::{ScriptEngine, ValueType};

impl<E: ScriptEngine> Bridge<E> {
    /// Host value to engine value.
    ///
    /// Structs and custom objects become live proxies, byte buffers become raw
    /// strings, times become dates and 64-bit integers become doubles.
    pub fn to_script(&self, value: &HostValue) -> Result<E::Value, BridgeError> {
        let engine = &self.engine;
        Ok(match value {
            HostValue::Nil => engine.null(),
            HostValue::Bool(b) => engine.boolean(*b),
            HostValue::I8(_)
            | HostValue::I16(_)
            | HostValue::I32(_)
            | HostValue::I64(_)
            | HostValue::U8(_)
            | HostValue::U16(_)
            | HostValue::U32(_)
            | HostValue::U64(_)
            | HostValue::F32(_)
            | HostValue::F64(_) => engine.number(value.as_f64().unwrap_or_default()),
            HostValue::String(s) => engine.string(s),
            HostValue::Time(time) => engine
                .date(system_time_to_millis(*time))
                .map_err(|thrown| self.script_failure(&thrown))?,
            HostValue::Struct(_) | HostValue::Pointer(_) | HostValue::Object(_) => {
                self.proxy_for(value.clone())?
            }
            HostValue::Function(function) => self.wrap_host_function(function.clone()),
            HostValue::Slice(HostType::U8, items) => {
                let bytes: Vec<u8> = items
                    .iter()
                    .filter_map(|item| match item {
                        HostValue::U8(byte) => Some(*byte),
                        _ => None,
                    })
                    .collect();
                engine.byte_string(&bytes)
            }
            HostValue::Slice(_, items) => {
                let values = items
                    .iter()
                    .map(|item| self.to_script(item))
                    .collect::<Result<Vec<_>, _>>()?;
                engine
                    .array_from(values)
                    .map_err(|thrown| self.script_failure(&thrown))?
            }
            HostValue::Map(_, _, pairs) => {
                let object = engine.object();
                for (key, item) in pairs {
                    let converted = self.to_script(item)?;
                    self.set_property(&object, &property_key(key)?, converted)?;
                }
                object
            }
            HostValue::Error(err) => raise(engine, err),
            HostValue::Opaque(json) => engine
                .json_decode(&json.to_string())
                .map_err(|thrown| self.script_failure(&thrown))?,
        })
    }

    /// Engine value to a host value of type `ty`.
    ///
    /// Proxies resolve to the registered host value itself. Script functions
    /// become callbacks, undefined and null become the zero value, and
    /// structural values go through their JSON form.
    pub fn to_host(&self, value: &E::Value, ty: &HostType) -> Result<HostValue, BridgeError> {
        if let Some(registered) = self.registered_value(value) {
            return registered;
        }

        let engine = &self.engine;
        let kind = engine.type_of(value);
        tracing::trace!(%kind, %ty, "converting script value");

        match ty {
            HostType::Function(signature) => {
                if engine.is_callable(value) {
                    return Ok(HostValue::Function(
                        self.script_callback(value.clone(), signature.clone()),
                    ));
                }
                if let Some(handle) = engine.as_pointer(value).filter(|h| !h.is_null()) {
                    return Ok(HostValue::Function(
                        self.dispatch_callback(handle, signature.clone()),
                    ));
                }
                if engine.is_nullish(value) {
                    return Ok(HostValue::Nil);
                }
                return Err(BridgeError::conversion(kind, ty, "not callable"));
            }
            HostType::Any => return self.to_host_any(value, kind),
            HostType::Error if kind == ValueType::Error => {
                return Ok(HostValue::Error(self.script_error(value)));
            }
            HostType::Time => {
                if let Some(millis) = engine.date_millis(value) {
                    return Ok(HostValue::Time(millis_to_system_time(millis)));
                }
            }
            _ => {}
        }

        match kind {
            ValueType::Undefined | ValueType::Null => return Ok(ty.zero_value()),
            ValueType::Boolean if *ty == HostType::Bool => {
                return Ok(HostValue::Bool(engine.as_bool(value).unwrap_or_default()));
            }
            ValueType::String if *ty == HostType::String => {
                return Ok(HostValue::String(engine.as_string(value).unwrap_or_default()));
            }
            ValueType::String if ty.is_bytes() => {
                let text = engine.as_string(value).unwrap_or_default();
                return Ok(HostValue::bytes(string_bytes(&text)));
            }
            ValueType::Number if ty.is_numeric() => {
                let number = HostValue::F64(engine.as_number(value).unwrap_or_default());
                return cast_number(&number, ty)
                    .ok_or_else(|| BridgeError::conversion(kind, ty, "not a number"));
            }
            _ => {}
        }

        self.structural(value, kind, ty)
    }

    /// Dynamic conversion for untyped destinations.
    fn to_host_any(&self, value: &E::Value, kind: ValueType) -> Result<HostValue, BridgeError> {
        let engine = &self.engine;
        Ok(match kind {
            ValueType::Undefined | ValueType::Null => HostValue::Nil,
            ValueType::Boolean => HostValue::Bool(engine.as_bool(value).unwrap_or_default()),
            ValueType::Number => HostValue::F64(engine.as_number(value).unwrap_or_default()),
            ValueType::String => HostValue::String(engine.as_string(value).unwrap_or_default()),
            ValueType::Function => HostValue::Function(
                self.script_callback(value.clone(), Arc::new(Signature::dynamic())),
            ),
            ValueType::Pointer => {
                HostValue::U64(engine.as_pointer(value).map(|h| h.to_bits()).unwrap_or_default())
            }
            ValueType::Error => HostValue::Error(self.script_error(value)),
            ValueType::Date => HostValue::Time(millis_to_system_time(
                engine.date_millis(value).unwrap_or_default(),
            )),
            ValueType::Object | ValueType::Array => {
                return self.structural(value, kind, &HostType::Any)
            }
        })
    }

    /// Round trip through the engine's JSON encoder.
    fn structural(
        &self,
        value: &E::Value,
        kind: ValueType,
        ty: &HostType,
    ) -> Result<HostValue, BridgeError> {
        let text = self
            .engine
            .json_encode(value)
            .map_err(|thrown| BridgeError::conversion(kind, ty, self.engine.to_display_string(&thrown)))?;
        let Some(text) = text else {
            return Ok(ty.zero_value());
        };
        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|err| BridgeError::conversion(kind, ty, err))?;
        from_json(&json, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{my_struct, MyNestedStruct, MyStruct};
    use crate::value::Shared;
    use std::collections::HashMap;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tether_script::HeapEngine;

    fn bridge() -> Bridge<HeapEngine> {
        Bridge::new(HeapEngine::new()).unwrap()
    }

    #[test]
    fn test_integers_survive_the_round_trip() {
        let bridge = bridge();
        for x in [0_i64, 1, -1, 42, i64::from(i32::MAX), (1 << 53) - 1, -(1 << 53) + 1] {
            let script = bridge.to_script(&HostValue::I64(x)).unwrap();
            assert_eq!(bridge.get_value::<i64>(&script).unwrap(), x);
        }
        let script = bridge.to_script(&HostValue::U8(200)).unwrap();
        assert_eq!(bridge.engine().as_number(&script), Some(200.0));
    }

    #[test]
    fn test_primitives_map_to_script_kinds() {
        let bridge = bridge();
        let engine = bridge.engine();

        assert_eq!(engine.type_of(&bridge.to_script(&HostValue::Nil).unwrap()), ValueType::Null);
        let text = bridge.to_script(&HostValue::bytes(*b"raw")).unwrap();
        assert_eq!(engine.as_string(&text).as_deref(), Some("raw"));

        let list = bridge.push_value(vec![1_i32, 2, 3]).unwrap();
        assert_eq!(engine.type_of(&list), ValueType::Array);
        assert_eq!(engine.length(&list), 3);
        assert_eq!(engine.as_number(&engine.get_index(&list, 2).unwrap()), Some(3.0));

        let time = UNIX_EPOCH + Duration::from_millis(1_500);
        let date = bridge.push_value(time).unwrap();
        assert_eq!(engine.date_millis(&date), Some(1_500.0));
        assert_eq!(bridge.get_value::<SystemTime>(&date).unwrap(), time);
    }

    #[test]
    fn test_byte_buffers_travel_as_raw_bytes() {
        let bridge = bridge();
        let raw = vec![0xff_u8, 0x61, 0x00, 0xc3];

        let text = bridge.to_script(&HostValue::bytes(raw.clone())).unwrap();
        assert_eq!(bridge.engine().length(&text), raw.len());
        assert_eq!(bridge.get_value::<Vec<u8>>(&text).unwrap(), raw);

        let copy = bridge.push_struct(MyStruct {
            bytes: raw.clone(),
            ..my_struct()
        });
        let bytes = bridge.engine().get(&copy.unwrap(), "bytes").unwrap();
        assert_eq!(bridge.get_value::<Vec<u8>>(&bytes).unwrap(), raw);
    }

    #[test]
    fn test_maps_become_plain_objects() {
        let bridge = bridge();
        let engine = bridge.engine();
        let mut map = HashMap::new();
        map.insert("FooBar".to_string(), 1_i32);

        let object = bridge.push_value(map.clone()).unwrap();
        assert_eq!(engine.type_of(&object), ValueType::Object);
        assert_eq!(engine.as_number(&engine.get(&object, "FooBar").unwrap()), Some(1.0));
        assert_eq!(bridge.get_value::<HashMap<String, i32>>(&object).unwrap(), map);
    }

    #[test]
    fn test_proxies_return_the_registered_value() {
        let bridge = bridge();
        let shared = Shared::new(my_struct());
        let proxy = bridge.push_proxy(shared.clone()).unwrap();

        let back = bridge.get_value::<Shared<MyStruct>>(&proxy).unwrap();
        assert!(back.ptr_eq(&shared));
        let copy = bridge.get_value::<MyStruct>(&proxy).unwrap();
        assert_eq!(copy.int, 42);
    }

    #[test]
    fn test_structural_fallback_builds_fresh_values() {
        let bridge = bridge();
        let engine = bridge.engine();
        let object = engine.json_decode(r#"{"int": 9, "nested": {"string": "in"}, "structSlice": [{"x": 3}]}"#).unwrap();

        let value = bridge.get_value::<MyStruct>(&object).unwrap();
        assert_eq!(value.int, 9);
        assert_eq!(value.nested.as_ref().map(|n| n.borrow().string.clone()).as_deref(), Some("in"));
        assert_eq!(value.struct_slice, vec![MyNestedStruct { x: 3 }]);

        assert!(bridge.get_value::<i32>(&engine.string("nope")).is_err());
        assert_eq!(bridge.get_value::<String>(&engine.undefined()).unwrap(), "");
    }

    #[test]
    fn test_untyped_values() {
        let bridge = bridge();
        let engine = bridge.engine();
        let array = engine.json_decode(r#"[1, "two", true]"#).unwrap();

        let value = bridge.to_host(&array, &HostType::Any).unwrap();
        assert_eq!(
            value,
            HostValue::Slice(
                HostType::Any,
                vec![
                    HostValue::F64(1.0),
                    HostValue::String("two".into()),
                    HostValue::Bool(true)
                ]
            )
        );

        let function = engine.native("f", |engine, _, _| Ok(engine.number(1.0)));
        assert!(matches!(
            bridge.to_host(&function, &HostType::Any).unwrap(),
            HostValue::Function(_)
        ));
    }

    #[test]
    fn test_script_errors_become_host_errors() {
        let bridge = bridge();
        let error = bridge.engine().error("broken");
        let HostValue::Error(err) = bridge.to_host(&error, &HostType::Error).unwrap() else {
            panic!("expected an error value");
        };
        assert_eq!(err.to_string(), "Error: broken");
    }

    #[test]
    fn test_number_narrowing_wraps() {
        let bridge = bridge();
        let number = bridge.engine().number(300.0);
        assert_eq!(bridge.get_value::<i8>(&number).unwrap(), 44);
        assert_eq!(bridge.get_value::<u8>(&bridge.engine().number(-1.0)).unwrap(), 255);
    }
}
