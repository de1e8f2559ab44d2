// src/exec/functions.rs

//! Named callables that node `function` references resolve to.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{DispatchError, Result};

/// Signature of a registered node function.
///
/// Errors are plain strings; they end up as the node's error detail.
pub type NodeFunction =
    Arc<dyn Fn(Vec<Value>, BTreeMap<String, Value>) -> std::result::Result<Value, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, NodeFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `add`, `multiply`, `square`, `identity`,
    /// `getattr`, `getitem` and `collect`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("add", |args, kwargs| sum(args.iter().chain(kwargs.values())));
        reg.register("multiply", |args, kwargs| {
            product(args.iter().chain(kwargs.values()))
        });
        reg.register("square", |args, _| {
            let x = single_arg("square", &args)?;
            product([x, x])
        });
        reg.register("identity", |args, _| Ok(single_arg("identity", &args)?.clone()));
        reg.register("getattr", getattr);
        reg.register("getitem", getitem);
        reg.register("collect", |args, kwargs| {
            if kwargs.is_empty() {
                Ok(Value::Array(args))
            } else {
                Ok(Value::Object(kwargs.into_iter().collect()))
            }
        });
        reg
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<Value>, BTreeMap<String, Value>) -> std::result::Result<Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Result<NodeFunction> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownFunction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

fn single_arg<'a>(name: &str, args: &'a [Value]) -> std::result::Result<&'a Value, String> {
    match args {
        [x] => Ok(x),
        _ => Err(format!("{name} takes exactly one argument ({} given)", args.len())),
    }
}

enum Number {
    Int(i64),
    Float(f64),
}

fn number(v: &Value) -> std::result::Result<Number, String> {
    if let Some(i) = v.as_i64() {
        return Ok(Number::Int(i));
    }
    v.as_f64()
        .map(Number::Float)
        .ok_or_else(|| format!("expected a number, got {v}"))
}

fn fold<'a>(
    values: impl IntoIterator<Item = &'a Value>,
    init: i64,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> std::result::Result<Value, String> {
    let mut acc = Number::Int(init);
    for v in values {
        acc = match (acc, number(v)?) {
            (Number::Int(a), Number::Int(b)) => match int_op(a, b) {
                Some(r) => Number::Int(r),
                None => Number::Float(float_op(a as f64, b as f64)),
            },
            (Number::Int(a), Number::Float(b)) => Number::Float(float_op(a as f64, b)),
            (Number::Float(a), Number::Int(b)) => Number::Float(float_op(a, b as f64)),
            (Number::Float(a), Number::Float(b)) => Number::Float(float_op(a, b)),
        };
    }
    Ok(match acc {
        Number::Int(i) => Value::from(i),
        Number::Float(f) => Value::from(f),
    })
}

fn sum<'a>(values: impl IntoIterator<Item = &'a Value>) -> std::result::Result<Value, String> {
    fold(values, 0, i64::checked_add, |a, b| a + b)
}

fn product<'a>(values: impl IntoIterator<Item = &'a Value>) -> std::result::Result<Value, String> {
    fold(values, 1, i64::checked_mul, |a, b| a * b)
}

/// `getattr(obj, name)`; the name may also be passed as `attr = "..."`.
fn getattr(args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> std::result::Result<Value, String> {
    let obj = args.first().ok_or("getattr needs an object")?;
    let name = args
        .get(1)
        .or_else(|| kwargs.get("attr"))
        .and_then(Value::as_str)
        .ok_or("getattr needs an attribute name")?;
    obj.get(name)
        .cloned()
        .ok_or_else(|| format!("object has no attribute '{name}'"))
}

/// `getitem(container, key)`; the key may also be passed as `key = ...`.
fn getitem(args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> std::result::Result<Value, String> {
    let container = args.first().ok_or("getitem needs a container")?;
    let key = args
        .get(1)
        .or_else(|| kwargs.get("key"))
        .ok_or("getitem needs a key")?;

    let item = match (container, key) {
        (Value::Array(items), Value::Number(n)) => {
            let len = items.len() as i64;
            n.as_i64()
                .map(|i| if i < 0 { len + i } else { i })
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i))
        }
        (Value::Object(map), Value::String(k)) => map.get(k),
        _ => None,
    };
    item.cloned()
        .ok_or_else(|| format!("no item {key} in {container}"))
}

