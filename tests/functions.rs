// tests/functions.rs

use std::collections::BTreeMap;

use serde_json::{Value, json};

use flowdispatch::errors::DispatchError;
use flowdispatch::exec::FunctionRegistry;

fn call(name: &str, args: Vec<Value>) -> Result<Value, String> {
    let registry = FunctionRegistry::with_builtins();
    let f = registry.get(name).expect("builtin");
    f(args, BTreeMap::new())
}

fn call_kw(name: &str, args: Vec<Value>, kwargs: &[(&str, Value)]) -> Result<Value, String> {
    let registry = FunctionRegistry::with_builtins();
    let f = registry.get(name).expect("builtin");
    let kwargs: BTreeMap<String, Value> = kwargs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    f(args, kwargs)
}

#[test]
fn arithmetic_builtins() {
    assert_eq!(call("add", vec![json!(1), json!(2)]), Ok(json!(3)));
    assert_eq!(call("square", vec![json!(3)]), Ok(json!(9)));
    assert_eq!(call("multiply", vec![json!(3), json!(9)]), Ok(json!(27)));
    assert_eq!(call("add", vec![json!(1), json!(0.5)]), Ok(json!(1.5)));
    assert_eq!(
        call_kw("add", vec![json!(1)], &[("y", json!(4))]),
        Ok(json!(5))
    );
}

#[test]
fn overflow_falls_back_to_floats() {
    let big = json!(i64::MAX);
    let out = call("add", vec![big, json!(1)]).unwrap();
    assert!(out.is_f64());
}

#[test]
fn arity_and_type_errors_are_reported() {
    let err = call("square", vec![json!(1), json!(2)]).unwrap_err();
    assert!(err.contains("exactly one argument"));

    let err = call("add", vec![json!("x")]).unwrap_err();
    assert!(err.contains("expected a number"));
}

#[test]
fn getitem_supports_negative_indices_and_keys() {
    assert_eq!(call("getitem", vec![json!([1, 2, 3]), json!(-1)]), Ok(json!(3)));
    assert_eq!(call("getitem", vec![json!({"a": 1}), json!("a")]), Ok(json!(1)));
    assert_eq!(
        call_kw("getitem", vec![json!([5, 6])], &[("key", json!(0))]),
        Ok(json!(5))
    );
    assert!(call("getitem", vec![json!([1]), json!(4)]).is_err());
}

#[test]
fn getattr_reads_object_fields() {
    let obj = json!({ "value": 42 });
    assert_eq!(call("getattr", vec![obj.clone(), json!("value")]), Ok(json!(42)));
    assert_eq!(
        call_kw("getattr", vec![obj.clone()], &[("attr", json!("value"))]),
        Ok(json!(42))
    );
    let err = call("getattr", vec![obj, json!("missing")]).unwrap_err();
    assert!(err.contains("no attribute 'missing'"));
}

#[test]
fn collect_builds_arrays_or_objects() {
    assert_eq!(call("collect", vec![json!(1), json!(2)]), Ok(json!([1, 2])));
    assert_eq!(
        call_kw("collect", vec![], &[("a", json!(1)), ("b", json!(2))]),
        Ok(json!({ "a": 1, "b": 2 }))
    );
}

#[test]
fn unknown_function_is_an_error() {
    let registry = FunctionRegistry::with_builtins();
    assert!(registry.contains("identity"));
    assert!(matches!(
        registry.get("nope"),
        Err(DispatchError::UnknownFunction(name)) if name == "nope"
    ));
}

#[test]
fn custom_functions_can_be_registered() {
    let mut registry = FunctionRegistry::new();
    registry.register("negate", |args, _| {
        args.first()
            .and_then(Value::as_i64)
            .map(|x| json!(-x))
            .ok_or_else(|| "negate needs an integer".to_string())
    });
    let f = registry.get("negate").unwrap();
    assert_eq!(f(vec![json!(4)], BTreeMap::new()), Ok(json!(-4)));
}
