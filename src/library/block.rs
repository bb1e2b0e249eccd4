//! `{{#block}}...{{/block}}`: group content, optionally hiding it or capturing
//! its text into a variable.

use super::TagCall;
use crate::error::Result;
use crate::program::Flow;
use crate::program::markers::plain_text;
use serde_json::Value;

pub(crate) fn block(call: &mut TagCall<'_>) -> Result<Flow> {
    call.args.check("block", 1, &["name", "hidden"])?;
    let body = call.body()?;
    let name = call.args.string(0, "name")?;
    let hidden = call.args.flag("hidden");

    let start = call.exec.output().len();
    let mark = hidden.then(|| call.exec.output().enter_hidden());
    let flow = call.run_section(body.main());

    let captured = name
        .as_ref()
        .map(|_| plain_text(&call.exec.output().text()[start..]));
    if let Some(mark) = mark {
        call.exec.output().exit_hidden(mark);
    }
    if let (Some(name), Some(captured)) = (&name, captured) {
        call.exec
            .variables_mut()
            .set(name, Value::String(captured))?;
    }
    flow
}
