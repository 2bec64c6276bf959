//! `JSON.stringify` / `JSON.parse` over heap values

use super::{HeapEngine, HeapValue, ObjectRef};
use crate::engine::{ScriptEngine, ValueType};
use serde_json::{Map, Number, Value};

/// Largest integer a double holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(super) fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n == n.trunc() && n.abs() <= MAX_SAFE_INTEGER {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Encodes `value` as stored under `key`; `None` means "omit".
pub(super) fn encode(
    engine: &HeapEngine,
    value: &HeapValue,
    key: &str,
    stack: &mut Vec<ObjectRef>,
) -> Result<Option<Value>, HeapValue> {
    let mut value = value.clone();
    if value.as_object().is_some() {
        let to_json = engine.get(&value, "toJSON")?;
        if engine.is_callable(&to_json) {
            value = engine.call(&to_json, &value, &[engine.string(key)])?;
        }
    }

    let object = match &value {
        HeapValue::Undefined => return Ok(None),
        HeapValue::Null | HeapValue::Pointer(_) => return Ok(Some(Value::Null)),
        HeapValue::Bool(b) => return Ok(Some(Value::Bool(*b))),
        HeapValue::Number(n) => return Ok(Some(number_to_json(*n))),
        HeapValue::String(s) => return Ok(Some(Value::String(s.to_string()))),
        HeapValue::Object(object) => object.clone(),
    };

    if stack.iter().any(|seen| seen.ptr_eq(&object)) {
        return Err(engine.type_error("cannot serialize cyclic structure"));
    }

    let encoded = match engine.type_of(&value) {
        ValueType::Function => None,
        ValueType::Array => {
            stack.push(object);
            let mut items = Vec::new();
            for index in 0..engine.length(&value) {
                let item = engine.get_index(&value, index)?;
                items.push(encode(engine, &item, &index.to_string(), stack)?.unwrap_or(Value::Null));
            }
            stack.pop();
            Some(Value::Array(items))
        }
        _ => {
            stack.push(object);
            let mut map = Map::new();
            for name in engine.keys(&value)? {
                let item = engine.get(&value, &name)?;
                if let Some(json) = encode(engine, &item, &name, stack)? {
                    map.insert(name, json);
                }
            }
            stack.pop();
            Some(Value::Object(map))
        }
    };
    Ok(encoded)
}

pub(super) fn decode(engine: &HeapEngine, json: &Value) -> Result<HeapValue, HeapValue> {
    Ok(match json {
        Value::Null => HeapValue::Null,
        Value::Bool(b) => HeapValue::Bool(*b),
        Value::Number(n) => HeapValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => engine.string(s),
        Value::Array(items) => {
            let values = items
                .iter()
                .map(|item| decode(engine, item))
                .collect::<Result<Vec<_>, _>>()?;
            engine.array_from(values)?
        }
        Value::Object(map) => {
            let object = engine.object();
            for (name, item) in map {
                engine.set(&object, name, decode(engine, item)?)?;
            }
            object
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_encode_without_fraction() {
        assert_eq!(number_to_json(42.0), Value::from(42));
        assert_eq!(number_to_json(-0.5), Value::from(-0.5));
        assert_eq!(number_to_json(f64::INFINITY), Value::Null);
    }

    #[test]
    fn test_stringify_skips_functions_and_undefined() {
        let engine = HeapEngine::new();
        let object = engine.object();
        engine.set(&object, "a", engine.number(1.0)).unwrap();
        engine.set(&object, "f", engine.native("f", |engine, _, _| Ok(engine.undefined()))).unwrap();
        engine.set(&object, "u", engine.undefined()).unwrap();
        let array = engine.array_from(vec![engine.undefined(), engine.boolean(true)]).unwrap();
        engine.set(&object, "list", array).unwrap();

        let text = engine.json_encode(&object).unwrap().unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, serde_json::json!({ "a": 1, "list": [null, true] }));
        assert_eq!(engine.json_encode(&engine.undefined()).unwrap(), None);
    }

    #[test]
    fn test_stringify_honours_to_json() {
        let engine = HeapEngine::new();
        let object = engine.object();
        let hook = engine.native("toJSON", |engine, _, _| Ok(engine.string("snapshot")));
        engine.set(&object, "toJSON", hook).unwrap();

        assert_eq!(engine.json_encode(&object).unwrap().as_deref(), Some("\"snapshot\""));
    }

    #[test]
    fn test_stringify_rejects_cycles() {
        let engine = HeapEngine::new();
        let object = engine.object();
        engine.set(&object, "me", object.clone()).unwrap();
        assert!(engine.json_encode(&object).is_err());
        engine.set(&object, "me", engine.null()).unwrap();
    }

    #[test]
    fn test_parse_builds_nested_values() {
        let engine = HeapEngine::new();
        let value = engine.json_decode(r#"{"list":[1,"two",null],"flag":false}"#).unwrap();

        let list = engine.get(&value, "list").unwrap();
        assert_eq!(engine.length(&list), 3);
        assert_eq!(engine.as_string(&engine.get_index(&list, 1).unwrap()).as_deref(), Some("two"));
        assert_eq!(engine.as_bool(&engine.get(&value, "flag").unwrap()), Some(false));
        assert!(engine.json_decode("{oops").is_err());
    }
}
