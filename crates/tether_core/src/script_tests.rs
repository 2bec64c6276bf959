//! Bridge behavior observed from real script code on the QuickJS engine.

use crate::errors::{ERROR_CODE_PACKAGE_NOT_FOUND, ERROR_CODE_TORN_DOWN, ERROR_CODE_UNDEFINED_PROPERTY};
use crate::fixtures::my_struct;
use crate::function::{Callback, Rest};
use crate::package::register_package_pusher;
use crate::value::{HostValue, Shared};
use crate::Bridge;
use tether_script::{QuickJsEngine, ScriptEngine, ScriptError};

fn bridge() -> Bridge<QuickJsEngine> {
    Bridge::new(QuickJsEngine::new().unwrap()).unwrap()
}

fn eval_string(bridge: &Bridge<QuickJsEngine>, source: &str) -> String {
    let value = bridge.runtime().execute(source).unwrap();
    bridge.engine().to_display_string(&value)
}

fn eval_err(bridge: &Bridge<QuickJsEngine>, source: &str) -> ScriptError {
    bridge.runtime().execute(source).unwrap_err()
}

#[test]
fn test_unknown_keys_are_absent_and_read_only() {
    let bridge = bridge();
    let shared = Shared::new(my_struct());
    bridge.push_global_proxy("obj", shared.clone()).unwrap();

    assert_eq!(eval_string(&bridge, "'int' in obj"), "true");
    assert_eq!(eval_string(&bridge, "'baz' in obj"), "false");
    assert_eq!(eval_string(&bridge, "Reflect.set(obj, 'baz', 1)"), "false");
    assert_eq!(
        eval_string(
            &bridge,
            "(function () { 'use strict'; try { obj.baz = 1; return 'ok'; } catch (e) { return e.name; } })()"
        ),
        "TypeError"
    );

    assert_eq!(eval_string(&bridge, "obj.int = 7; obj.int"), "7");
    assert_eq!(shared.borrow().int, 7);
}

#[test]
fn test_missing_property_read_throws_with_code() {
    let bridge = bridge();
    bridge.push_global_proxy("obj", Shared::new(my_struct())).unwrap();

    assert_eq!(
        eval_string(&bridge, "try { obj.baz; 'read' } catch (e) { e.code }"),
        ERROR_CODE_UNDEFINED_PROPERTY
    );
    let err = eval_err(&bridge, "obj.baz");
    assert_eq!(err.code(), Some(ERROR_CODE_UNDEFINED_PROPERTY));
}

#[test]
fn test_object_keys_lists_fields_then_methods() {
    let bridge = bridge();
    bridge.push_global_proxy("obj", Shared::new(my_struct())).unwrap();

    assert_eq!(eval_string(&bridge, "Object.keys(obj).slice(0, 3).join()"), "bool,int,int8");
    assert_eq!(
        eval_string(
            &bridge,
            "const keys = Object.keys(obj); keys.indexOf('structMap') < keys.indexOf('multiply')"
        ),
        "true"
    );
    assert_eq!(
        eval_string(&bridge, "Object.keys(obj).every((key) => key in obj)"),
        "true"
    );
}

#[test]
fn test_json_stringify_goes_through_to_json() {
    let bridge = bridge();
    bridge.push_global_proxy("obj", Shared::new(my_struct())).unwrap();

    let text = eval_string(&bridge, "JSON.stringify(obj)");
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["int"], serde_json::json!(42));
    assert_eq!(json["string"], serde_json::json!("foo"));
    assert_eq!(json["date"], serde_json::json!("1970-01-01T00:00:00.000Z"));
    assert_eq!(eval_string(&bridge, "String(obj)"), "[tether Proxy]");
}

#[test]
fn test_require_of_missing_package_raises_its_code() {
    register_package_pusher("script-test-math", |package| {
        package.function("double", |x: i64| x * 2);
    });
    let bridge = bridge();

    assert_eq!(
        eval_string(&bridge, "Tether.require('script-test-math').double(21)"),
        "42"
    );
    assert_eq!(
        eval_string(&bridge, "try { Tether.require('script-test-nope'); 'found' } catch (e) { e.code }"),
        ERROR_CODE_PACKAGE_NOT_FOUND
    );
}

#[test]
fn test_variadic_function_with_too_few_arguments() {
    let bridge = bridge();
    bridge
        .push_global_function("join", |sep: String, parts: Rest<String>| parts.0.join(&sep))
        .unwrap();
    bridge.push_global_function("add", |a: i64, b: i64| a + b).unwrap();

    assert_eq!(eval_string(&bridge, "JSON.stringify(join())"), "\"\"");
    assert_eq!(eval_string(&bridge, "JSON.stringify(join('-'))"), "\"\"");
    assert_eq!(eval_string(&bridge, "join('-', 'a', 'b', 'c')"), "a-b-c");
    assert_eq!(eval_string(&bridge, "add(1)"), "1");
}

#[test]
fn test_byte_buffers_are_one_code_unit_per_byte() {
    let bridge = bridge();
    let raw = vec![0xff_u8, 0x00, 0x61, 0xc3];
    let text = bridge.to_script(&HostValue::bytes(raw.clone())).unwrap();
    bridge.engine().global_set("raw", text).unwrap();

    assert_eq!(
        eval_string(&bridge, "[raw.length, raw.charCodeAt(0), raw.charCodeAt(3)].join()"),
        "4,255,195"
    );
    let back = bridge.runtime().execute("raw.slice(0, 2) + raw.slice(2)").unwrap();
    assert_eq!(bridge.get_value::<Vec<u8>>(&back).unwrap(), raw);
}

#[test]
fn test_script_callbacks_run_from_host_functions() {
    let bridge = bridge();
    bridge
        .push_global_function("twice", |f: Callback<(i64,), i64>, x: i64| f.call((f.call((x,)),)))
        .unwrap();

    assert_eq!(eval_string(&bridge, "twice((x) => x * 3, 2)"), "18");
}

#[test]
fn test_collected_proxies_release_their_handles() {
    let bridge = bridge();
    let before = bridge.live_handles();

    let proxy = bridge.push_proxy(Shared::new(my_struct())).unwrap();
    assert_eq!(bridge.live_handles(), before + 1);
    drop(proxy);
    assert!(bridge.engine().collect_garbage());
    assert_eq!(bridge.live_handles(), before);
}

#[test]
fn test_torn_down_proxies_throw_in_script() {
    let bridge = bridge();
    bridge.push_global_proxy("obj", Shared::new(my_struct())).unwrap();
    let runtime = bridge.runtime();

    bridge.teardown();
    let err = runtime.execute("obj.int").unwrap_err();
    assert_eq!(err.code(), Some(ERROR_CODE_TORN_DOWN));
}
