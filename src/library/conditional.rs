//! `{{#if cond}}...{{else}}...{{/if}}` and its negation `{{#unless}}`.

use super::TagCall;
use crate::error::Result;
use crate::program::Flow;
use crate::variables::is_truthy;
use serde_json::Value;

pub(crate) fn if_(call: &mut TagCall<'_>) -> Result<Flow> {
    branch(call, "if", false)
}

pub(crate) fn unless(call: &mut TagCall<'_>) -> Result<Flow> {
    branch(call, "unless", true)
}

fn branch(call: &mut TagCall<'_>, tag: &str, invert: bool) -> Result<Flow> {
    call.args.check(tag, 1, &[])?;
    let body = call.body()?;
    let condition = is_truthy(call.args.positional(0).unwrap_or(&Value::Null));

    if condition != invert {
        call.run_section(body.main())
    } else if let Some(otherwise) = body.else_section() {
        call.run_section(otherwise)
    } else {
        Ok(Flow::Continue)
    }
}
