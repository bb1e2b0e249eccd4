//! Variable store shared by every tag evaluated in one program run.
//!
//! Values are `serde_json::Value`s so strings, numbers, lists, nested maps and
//! log-probability records all fit. The store is a stack of scopes: loops push a
//! scope for `this` / `@index`, and everything else lands in the root scope.
//!
//! Names used with [`VariableStore::append`] form an append chain for the rest
//! of the run; overwriting such a name with a non-list value is rejected.

use crate::error::{Result, WeaveError};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct VariableStore {
    scopes: Vec<BTreeMap<String, Value>>,
    append_chains: BTreeSet<String>,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableStore {
    pub fn new() -> Self {
        Self {
            scopes: vec![BTreeMap::new()],
            append_chains: BTreeSet::new(),
        }
    }

    /// Build a store whose root scope holds the given values.
    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Self {
            scopes: vec![values],
            append_chains: BTreeSet::new(),
        }
    }

    /// Look up a name or dotted path (`user.name`, `items.0`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let mut value = self.scopes.iter().rev().find_map(|scope| scope.get(head))?;
        for segment in segments {
            value = match value {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }

    /// Look up a value, falling back to `default` when it is missing.
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).cloned().unwrap_or(default)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a value in the innermost scope that already holds `name`, or the root scope.
    ///
    /// A dotted path writes into a nested map, creating missing maps on the way.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if self.append_chains.contains(name) && !value.is_array() {
            return Err(WeaveError::Configuration(format!(
                "variable '{}' is being appended to and cannot be overwritten with a non-list value",
                name
            )));
        }
        self.put(name, value)
    }

    /// Append to the list stored under `name`, creating an empty list first if needed.
    pub fn append(&mut self, name: &str, value: Value) -> Result<()> {
        let mut items = match self.get(name) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(WeaveError::Configuration(format!(
                    "cannot append to variable '{}': it holds a non-list value",
                    name
                )));
            }
        };
        items.push(value);
        self.append_chains.insert(name.to_string());
        self.put(name, Value::Array(items))
    }

    /// Replace the last element of the list stored under `name`.
    pub fn update_last(&mut self, name: &str, value: Value) -> Result<()> {
        if let Some(Value::Array(items)) = self.get_mut(name)
            && let Some(last) = items.last_mut()
        {
            *last = value;
            return Ok(());
        }
        Err(WeaveError::Configuration(format!(
            "variable '{}' holds no list entry to update",
            name
        )))
    }

    /// Remove a name from the innermost scope that holds it.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.remove(name))
    }

    /// Enter a nested scope holding loop locals.
    pub fn push_scope(&mut self, locals: BTreeMap<String, Value>) {
        self.scopes.push(locals);
    }

    /// Leave the innermost scope. The root scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Flatten all scopes into one map, inner scopes shadowing outer ones.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        let mut merged = BTreeMap::new();
        for scope in &self.scopes {
            for (name, value) in scope {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let mut value = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(head))?;
        for segment in segments {
            value = match value {
                Value::Object(map) => map.get_mut(segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }

    fn put(&mut self, path: &str, value: Value) -> Result<()> {
        let Some((head, rest)) = path.split_once('.') else {
            self.scope_for(path).insert(path.to_string(), value);
            return Ok(());
        };

        let mut slot = self
            .scope_for(head)
            .entry(head.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let mut segments = rest.split('.').peekable();
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            slot = match slot {
                Value::Object(map) if last => {
                    map.insert(segment.to_string(), value);
                    return Ok(());
                }
                Value::Object(map) => map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                Value::Array(items) => {
                    let item = match segment.parse::<usize>() {
                        Ok(index) => items.get_mut(index),
                        Err(_) => None,
                    };
                    match item {
                        Some(item) if last => {
                            *item = value;
                            return Ok(());
                        }
                        Some(item) => item,
                        None => return Err(path_error(path, segment)),
                    }
                }
                _ => return Err(path_error(path, segment)),
            };
        }
        Ok(())
    }

    fn scope_for(&mut self, name: &str) -> &mut BTreeMap<String, Value> {
        let index = self
            .scopes
            .iter()
            .rposition(|scope| scope.contains_key(name))
            .unwrap_or(0);
        &mut self.scopes[index]
    }
}

fn path_error(path: &str, segment: &str) -> WeaveError {
    WeaveError::Configuration(format!(
        "cannot set '{}': no map or list entry for '{}'",
        path, segment
    ))
}

/// Render a value the way it appears in template output.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Truthiness used by `if` / `unless`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_get() {
        let mut store = VariableStore::new();
        store.set("name", json!("Sue")).unwrap();
        assert_eq!(store.get("name"), Some(&json!("Sue")));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn get_or_default() {
        let store = VariableStore::new();
        assert_eq!(store.get_or("items", json!([])), json!([]));
    }

    #[test]
    fn dotted_paths_index_maps_and_lists() {
        let mut store = VariableStore::new();
        store
            .set("user", json!({"name": "Ann", "tags": ["a", "b"]}))
            .unwrap();
        assert_eq!(store.get("user.name"), Some(&json!("Ann")));
        assert_eq!(store.get("user.tags.1"), Some(&json!("b")));
        assert_eq!(store.get("user.tags.9"), None);
        assert_eq!(store.get("user.name.first"), None);
    }

    #[test]
    fn dotted_set_writes_into_nested_maps() {
        let mut store = VariableStore::new();
        store.set("user.name", json!("Ann")).unwrap();
        store.set("user.address.city", json!("Oslo")).unwrap();
        assert_eq!(
            store.get("user"),
            Some(&json!({"name": "Ann", "address": {"city": "Oslo"}}))
        );

        store.set("list", json!(["a", "b"])).unwrap();
        store.set("list.1", json!("B")).unwrap();
        assert_eq!(store.get("list"), Some(&json!(["a", "B"])));
        assert!(store.set("list.5", json!("x")).is_err());
        assert!(store.set("user.name.first", json!("x")).is_err());
    }

    #[test]
    fn dotted_set_targets_the_scope_holding_the_head() {
        let mut store = VariableStore::new();
        let mut locals = BTreeMap::new();
        locals.insert("this".to_string(), json!({}));
        store.push_scope(locals);

        store.set("this.idea", json!("kites")).unwrap();
        store.append("this.tags", json!("fun")).unwrap();
        assert_eq!(
            store.get("this"),
            Some(&json!({"idea": "kites", "tags": ["fun"]}))
        );
        store.pop_scope();
        assert_eq!(store.get("this"), None);
    }

    #[test]
    fn append_creates_and_extends_list() {
        let mut store = VariableStore::new();
        store.append("ideas", json!("one")).unwrap();
        store.append("ideas", json!("two")).unwrap();
        assert_eq!(store.get("ideas"), Some(&json!(["one", "two"])));
    }

    #[test]
    fn append_to_scalar_is_rejected() {
        let mut store = VariableStore::new();
        store.set("name", json!("Sue")).unwrap();
        let err = store.append("name", json!("x")).unwrap_err();
        assert!(err.to_string().contains("non-list value"));
    }

    #[test]
    fn overwriting_append_chain_with_scalar_is_rejected() {
        let mut store = VariableStore::new();
        store.append("ideas", json!("one")).unwrap();
        assert!(store.set("ideas", json!("flat")).is_err());
        assert!(store.set("ideas", json!(["reset"])).is_ok());
    }

    #[test]
    fn update_last_replaces_tail() {
        let mut store = VariableStore::new();
        store.append("ideas", json!("")).unwrap();
        store.update_last("ideas", json!("partial")).unwrap();
        store.update_last("ideas", json!("partial done")).unwrap();
        assert_eq!(store.get("ideas"), Some(&json!(["partial done"])));
        assert!(store.update_last("other", json!("x")).is_err());
    }

    #[test]
    fn scopes_shadow_and_writes_reach_root() {
        let mut store = VariableStore::new();
        store.set("x", json!(1)).unwrap();

        let mut locals = BTreeMap::new();
        locals.insert("this".to_string(), json!("item"));
        store.push_scope(locals);

        assert_eq!(store.get("this"), Some(&json!("item")));
        store.set("x", json!(2)).unwrap();
        store.set("created", json!(true)).unwrap();
        store.pop_scope();

        assert_eq!(store.get("this"), None);
        assert_eq!(store.get("x"), Some(&json!(2)));
        assert_eq!(store.get("created"), Some(&json!(true)));
    }

    #[test]
    fn root_scope_is_never_popped() {
        let mut store = VariableStore::new();
        store.set("x", json!(1)).unwrap();
        store.pop_scope();
        assert_eq!(store.get("x"), Some(&json!(1)));
    }

    #[test]
    fn remove_takes_value_out() {
        let mut store = VariableStore::new();
        store.set("reply", json!("hi")).unwrap();
        assert_eq!(store.remove("reply"), Some(json!("hi")));
        assert!(!store.contains("reply"));
    }

    #[test]
    fn display_values() {
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!("text")), "text");
        assert_eq!(display_value(&json!(3)), "3");
        assert_eq!(display_value(&json!(["a", "b"])), "a, b");
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("no")));
        assert!(is_truthy(&json!(1.5)));
        assert!(is_truthy(&json!({"a": 1})));
    }
}
