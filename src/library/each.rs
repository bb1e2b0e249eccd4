//! `{{#each items}}...{{/each}}`: run the body once per list element.
//!
//! Each iteration sees the element as `this` (or the name given by
//! `item_name`) plus `@index`, `@first` and `@last`. Writes to other names
//! reach the enclosing scopes.

use super::TagCall;
use crate::error::{Result, WeaveError};
use crate::program::Flow;
use serde_json::{Value, json};
use std::collections::BTreeMap;

const KEYWORDS: &[&str] = &["item_name", "hidden"];

pub(crate) fn each(call: &mut TagCall<'_>) -> Result<Flow> {
    call.args.check("each", 1, KEYWORDS)?;
    let body = call.body()?;
    let item_name = call
        .args
        .keyword_string("item_name")?
        .unwrap_or_else(|| "this".to_string());

    let items = match call.args.positional(0) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => {
            return Err(WeaveError::Configuration(format!(
                "each needs a list to iterate over: {}",
                call.tag.source
            )));
        }
        Some(other) => {
            return Err(WeaveError::Configuration(format!(
                "each can only iterate over a list, got {}",
                other
            )));
        }
    };

    let hidden = call.args.flag("hidden");
    let mark = hidden.then(|| call.exec.output().enter_hidden());

    let last = items.len().saturating_sub(1);
    let mut result = Ok(Flow::Continue);
    for (index, item) in items.into_iter().enumerate() {
        let mut locals = BTreeMap::new();
        locals.insert(item_name.clone(), item);
        locals.insert("@index".to_string(), json!(index));
        locals.insert("@first".to_string(), json!(index == 0));
        locals.insert("@last".to_string(), json!(index == last));

        call.exec.variables_mut().push_scope(locals);
        result = call.run_section(body.main());
        call.exec.variables_mut().pop_scope();

        if !matches!(result, Ok(Flow::Continue)) {
            break;
        }
    }

    if let Some(mark) = mark {
        call.exec.output().exit_hidden(mark);
    }
    result
}
