//! `{{set 'name' value}}` and `{{set a=1 b=x}}`.
//!
//! The positional form shows the value unless `hidden=True`; the keyword form
//! assigns silently unless `hidden=False`.

use super::TagCall;
use crate::error::{Result, WeaveError};
use crate::program::Flow;
use crate::variables::display_value;
use serde_json::Value;

pub(crate) fn set(call: &mut TagCall<'_>) -> Result<Flow> {
    call.expect_inline()?;
    let hidden = call.args.keyword_bool("hidden")?;

    let name = match call.args.positional(0) {
        None => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(other) => {
            return Err(WeaveError::Configuration(format!(
                "set takes a variable name as a string, got {}",
                other
            )));
        }
    };

    match name {
        Some(name) => {
            call.args.check("set", 2, &["hidden"])?;
            let value = call.args.positional(1).cloned().ok_or_else(|| {
                WeaveError::Configuration(format!("set '{}' is missing a value", name))
            })?;
            let shown = display_value(&value);
            call.exec.variables_mut().set(&name, value)?;
            if hidden != Some(true) {
                call.exec.output().push(&shown);
            }
        }
        None => {
            let assignments: Vec<_> = call
                .tag
                .args
                .keyword
                .iter()
                .map(|(name, _)| name.as_str())
                .filter(|name| *name != "hidden")
                .collect();
            if assignments.is_empty() {
                return Err(WeaveError::Configuration(
                    "set needs a name and a value".to_string(),
                ));
            }
            for name in assignments {
                let value = call.args.keyword(name).cloned().unwrap_or_default();
                let shown = display_value(&value);
                call.exec.variables_mut().set(name, value)?;
                if hidden == Some(false) {
                    call.exec.output().push(&shown);
                }
            }
        }
    }
    Ok(Flow::Continue)
}
