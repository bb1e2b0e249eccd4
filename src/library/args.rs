//! Evaluated tag arguments and typed accessors.

use crate::error::{Result, WeaveError};
use crate::variables::is_truthy;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keyword: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    pub fn positional(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub(crate) fn into_parts(self) -> (Vec<Value>, Vec<(String, Value)>) {
        (self.positional, self.keyword)
    }

    /// Reject keywords a tag does not understand and surplus positionals.
    pub fn check(&self, tag: &str, max_positional: usize, known: &[&str]) -> Result<()> {
        if self.positional.len() > max_positional {
            return Err(WeaveError::Configuration(format!(
                "'{}' takes at most {} positional argument(s), got {}",
                tag,
                max_positional,
                self.positional.len()
            )));
        }
        if let Some((key, _)) = self.keyword.iter().find(|(key, _)| !known.contains(&key.as_str())) {
            return Err(WeaveError::Configuration(format!(
                "'{}' does not accept argument '{}'",
                tag, key
            )));
        }
        Ok(())
    }

    /// Argument given by position or by keyword. Null counts as absent.
    pub fn value(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional(index)
            .or_else(|| self.keyword(name))
            .filter(|v| !v.is_null())
    }

    pub fn string(&self, index: usize, name: &str) -> Result<Option<String>> {
        match self.value(index, name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(type_error(name, "a string", other)),
        }
    }

    pub fn keyword_string(&self, name: &str) -> Result<Option<String>> {
        self.string(usize::MAX, name)
    }

    pub fn keyword_u32(&self, name: &str) -> Result<Option<u32>> {
        match self.keyword(name).filter(|v| !v.is_null()) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| type_error(name, "a non-negative integer", value)),
        }
    }

    pub fn keyword_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.keyword(name).filter(|v| !v.is_null()) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| type_error(name, "a number", value)),
        }
    }

    /// Optional boolean; absent or null means `None`.
    pub fn keyword_bool(&self, name: &str) -> Result<Option<bool>> {
        match self.keyword(name).filter(|v| !v.is_null()) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(type_error(name, "a boolean", other)),
        }
    }

    /// Truthiness of a keyword; absent is false.
    pub fn flag(&self, name: &str) -> bool {
        self.keyword(name).is_some_and(is_truthy)
    }
}

fn type_error(name: &str, expected: &str, got: &Value) -> WeaveError {
    WeaveError::Configuration(format!("argument '{}' must be {}, got {}", name, expected, got))
}
