//! Built-in functions: `add`, `subtract`, `strip`, `equal`.

use super::Function;
use crate::error::{Result, WeaveError};
use crate::variables::display_value;
use serde_json::{Number, Value};

pub(crate) fn functions() -> Vec<Function> {
    vec![
        Function::new("add")
            .param("a")
            .param("b")
            .build(|args| arithmetic("add", &args["a"], &args["b"], i64::checked_add, |a, b| a + b)),
        Function::new("subtract")
            .param("a")
            .param("b")
            .build(|args| {
                arithmetic("subtract", &args["a"], &args["b"], i64::checked_sub, |a, b| a - b)
            }),
        Function::new("strip")
            .param("text")
            .build(|args| Ok(Value::String(display_value(&args["text"]).trim().to_string()))),
        Function::new("equal")
            .param("a")
            .param("b")
            .build(|args| Ok(Value::Bool(equal(&args["a"], &args["b"])))),
    ]
}

/// Integer arithmetic when both sides are integers, float otherwise.
fn arithmetic(
    name: &str,
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64())
        && let Some(result) = int_op(x, y)
    {
        return Ok(Value::from(result));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Number::from_f64(float_op(x, y))
            .map(Value::Number)
            .ok_or_else(|| {
                WeaveError::Configuration(format!("{} produced a non-finite number", name))
            }),
        _ => Err(WeaveError::Configuration(format!(
            "{} expects two numbers, got {} and {}",
            name, a, b
        ))),
    }
}

/// Numbers compare by value so `1` equals `1.0`.
fn equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Args;
    use serde_json::json;

    fn call(name: &str, positional: Vec<Value>) -> Result<Value> {
        let function = functions()
            .into_iter()
            .find(|f| f.name() == name)
            .unwrap();
        function.call(Args::new(positional, Vec::new()))
    }

    #[test]
    fn add_keeps_integers() {
        assert_eq!(call("add", vec![json!(2), json!(3)]).unwrap(), json!(5));
        assert_eq!(call("add", vec![json!(2), json!(0.5)]).unwrap(), json!(2.5));
    }

    #[test]
    fn subtract_numbers() {
        assert_eq!(call("subtract", vec![json!(5), json!(7)]).unwrap(), json!(-2));
    }

    #[test]
    fn arithmetic_rejects_strings() {
        let err = call("add", vec![json!("a"), json!(1)]).unwrap_err();
        assert!(err.to_string().contains("add expects two numbers"));
    }

    #[test]
    fn strip_trims_whitespace() {
        assert_eq!(call("strip", vec![json!("  hi \n")]).unwrap(), json!("hi"));
    }

    #[test]
    fn equal_compares_values() {
        assert_eq!(call("equal", vec![json!("a"), json!("a")]).unwrap(), json!(true));
        assert_eq!(call("equal", vec![json!(1), json!(1.0)]).unwrap(), json!(true));
        assert_eq!(call("equal", vec![json!("1"), json!(1)]).unwrap(), json!(false));
    }
}
