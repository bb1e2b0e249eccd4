//! Plain functions callable as inline tags or sub calls.
//!
//! ```
//! use serde_json::{Value, json};
//! use tagweave::library::Function;
//!
//! let shout = Function::new("shout")
//!     .param("text")
//!     .optional("suffix", json!("!"))
//!     .build(|args| {
//!         let text = args["text"].as_str().unwrap_or_default().to_uppercase();
//!         let suffix = args["suffix"].as_str().unwrap_or_default();
//!         Ok(Value::String(format!("{}{}", text, suffix)))
//!     });
//! assert_eq!(shout.name(), "shout");
//! ```

use super::Args;
use crate::error::{Result, WeaveError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

type Body = Arc<dyn Fn(&BTreeMap<String, Value>) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone)]
struct Param {
    name: String,
    default: Option<Value>,
}

#[derive(Clone)]
pub struct Function {
    name: String,
    params: Vec<Param>,
    body: Body,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

impl Function {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: impl Into<String>) -> FunctionBuilder {
        FunctionBuilder {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind positional then keyword arguments to parameters and invoke.
    pub fn call(&self, args: Args) -> Result<Value> {
        let (positional, keyword) = args.into_parts();
        if positional.len() > self.params.len() {
            return Err(WeaveError::Configuration(format!(
                "function '{}' takes {} argument(s), got {}",
                self.name,
                self.params.len(),
                positional.len()
            )));
        }

        let mut bound: BTreeMap<String, Value> = self
            .params
            .iter()
            .zip(positional)
            .map(|(param, value)| (param.name.clone(), value))
            .collect();

        for (key, value) in keyword {
            if !self.params.iter().any(|p| p.name == key) {
                return Err(WeaveError::Configuration(format!(
                    "function '{}' has no parameter '{}'",
                    self.name, key
                )));
            }
            if bound.insert(key.clone(), value).is_some() {
                return Err(WeaveError::Configuration(format!(
                    "function '{}' got parameter '{}' twice",
                    self.name, key
                )));
            }
        }

        for param in &self.params {
            if bound.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    bound.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(WeaveError::Configuration(format!(
                        "function '{}' is missing argument '{}'",
                        self.name, param.name
                    )));
                }
            }
        }

        (self.body)(&bound)
    }
}

pub struct FunctionBuilder {
    name: String,
    params: Vec<Param>,
}

impl FunctionBuilder {
    /// A required parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    /// A parameter with a default value.
    pub fn optional(mut self, name: impl Into<String>, default: Value) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default),
        });
        self
    }

    pub fn build<F>(self, body: F) -> Function
    where
        F: Fn(&BTreeMap<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Function {
            name: self.name,
            params: self.params,
            body: Arc::new(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn join() -> Function {
        Function::new("join")
            .param("left")
            .optional("sep", json!("-"))
            .param("right")
            .build(|args| {
                Ok(json!(format!(
                    "{}{}{}",
                    args["left"].as_str().unwrap_or_default(),
                    args["sep"].as_str().unwrap_or_default(),
                    args["right"].as_str().unwrap_or_default()
                )))
            })
    }

    fn call(f: &Function, positional: Vec<Value>, keyword: Vec<(&str, Value)>) -> Result<Value> {
        f.call(Args::new(
            positional,
            keyword.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        ))
    }

    #[test]
    fn binds_positional_and_keyword() {
        let f = join();
        assert_eq!(
            call(&f, vec![json!("a"), json!("+"), json!("b")], vec![]).unwrap(),
            json!("a+b")
        );
        assert_eq!(
            call(&f, vec![json!("a")], vec![("right", json!("b"))]).unwrap(),
            json!("a-b")
        );
    }

    #[test]
    fn missing_required_argument() {
        let err = call(&join(), vec![json!("a")], vec![]).unwrap_err();
        assert!(err.to_string().contains("missing argument 'right'"));
    }

    #[test]
    fn unknown_and_duplicate_parameters() {
        let f = join();
        assert!(call(&f, vec![json!("a")], vec![("nope", json!(1))]).is_err());
        let err = call(&f, vec![json!("a")], vec![("left", json!("b"))]).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn too_many_positionals() {
        let err = call(&join(), vec![json!(1), json!(2), json!(3), json!(4)], vec![]).unwrap_err();
        assert!(err.to_string().contains("takes 3 argument(s), got 4"));
    }
}
