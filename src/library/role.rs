//! Chat role blocks: `{{#system}}`, `{{#user}}`, `{{#assistant}}` and the
//! generic `{{#role 'name'}}`.
//!
//! The body is wrapped in the provider's role tokens. Generation inside a role
//! block stops at the role end token when the block closes right after it.

use super::TagCall;
use crate::error::{Result, WeaveError};
use crate::program::Flow;

pub(crate) fn named_role(call: &mut TagCall<'_>) -> Result<Flow> {
    let role = call.name().to_string();
    call.args.check(&role, 0, &["hidden"])?;
    wrap(call, &role)
}

pub(crate) fn role(call: &mut TagCall<'_>) -> Result<Flow> {
    call.args.check("role", 1, &["role_name", "hidden"])?;
    let role = call
        .args
        .string(0, "role_name")?
        .ok_or_else(|| WeaveError::Configuration("role needs a role name".to_string()))?;
    wrap(call, &role)
}

fn wrap(call: &mut TagCall<'_>, role: &str) -> Result<Flow> {
    let body = call.body()?;
    let session = call.exec.session()?;
    let provider = session.provider();
    let hidden = call.args.flag("hidden");

    let mark = hidden.then(|| call.exec.output().enter_hidden());
    call.exec.output().push(&provider.role_start(role));
    call.exec.push_role(role);
    let result = call.run_section(body.main());
    call.exec.pop_role();
    if let Ok(Flow::Continue) = result {
        call.exec.output().push(&provider.role_end(role));
    }
    if let Some(mark) = mark {
        call.exec.output().exit_hidden(mark);
    }
    result
}
