//! `{{#geneach 'items'}}...{{/geneach}}`: let the model decide how many times
//! the body runs.
//!
//! Each iteration starts with an empty map as `this` (plus `@index` and
//! `@first`); whatever the body writes into `this` is appended to the list.
//! Before every iteration past `min_iterations` the model is asked, at
//! temperature 0, to continue the text; if the continuation starts with the
//! stop text the loop ends. The stop text defaults to the text that follows the
//! block. `num_iterations` fixes the count and skips that check.

use super::TagCall;
use crate::error::{Result, WeaveError};
use crate::grammar::Body;
use crate::llm::{CallRequest, Response};
use crate::program::Flow;
use log::debug;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

const KEYWORDS: &[&str] = &[
    "list_name",
    "stop",
    "max_iterations",
    "min_iterations",
    "num_iterations",
    "hidden",
    "join",
];

struct Plan {
    list_name: String,
    stop: Option<String>,
    min_iterations: u32,
    max_iterations: u32,
    join: String,
}

pub(crate) fn geneach(call: &mut TagCall<'_>) -> Result<Flow> {
    call.args.check("geneach", 1, KEYWORDS)?;
    let body = call.body()?;
    let plan = read_plan(call)?;
    debug!(
        "geneach '{}': stop={:?}, iterations {}..={}",
        plan.list_name, plan.stop, plan.min_iterations, plan.max_iterations
    );

    call.exec
        .variables_mut()
        .set(&plan.list_name, Value::Array(Vec::new()))?;

    let mark = call
        .args
        .flag("hidden")
        .then(|| call.exec.output().enter_hidden());
    let result = iterate(call, body, &plan);
    if let Some(mark) = mark {
        call.exec.output().exit_hidden(mark);
    }
    result
}

fn read_plan(call: &TagCall<'_>) -> Result<Plan> {
    let args = &call.args;
    let list_name = args.string(0, "list_name")?.ok_or_else(|| {
        WeaveError::Configuration(format!(
            "geneach needs a list name: {}",
            call.tag.source
        ))
    })?;

    let num_iterations = args.keyword_u32("num_iterations")?;
    let max_iterations = match num_iterations {
        Some(count) => count,
        None => args.keyword_u32("max_iterations")?.unwrap_or(100),
    };
    let min_iterations = args.keyword_u32("min_iterations")?.unwrap_or(0);
    if min_iterations > max_iterations {
        return Err(WeaveError::Configuration(format!(
            "geneach min_iterations ({}) exceeds max_iterations ({})",
            min_iterations, max_iterations
        )));
    }

    // `stop=False` or `stop=''` disables the check.
    let stop = match (num_iterations, args.keyword("stop")) {
        (Some(_), _) => None,
        (None, Some(Value::Bool(false))) => None,
        (None, Some(Value::String(stop))) => Some(stop.clone()),
        (None, None | Some(Value::Null)) => call.inferred_stop()?,
        (None, Some(other)) => {
            return Err(WeaveError::Configuration(format!(
                "argument 'stop' must be a string or False, got {}",
                other
            )));
        }
    }
    .filter(|stop| !stop.is_empty());

    Ok(Plan {
        list_name,
        stop,
        min_iterations,
        max_iterations,
        join: args.keyword_string("join")?.unwrap_or_default(),
    })
}

fn iterate(call: &mut TagCall<'_>, body: &Body, plan: &Plan) -> Result<Flow> {
    for index in 0..plan.max_iterations {
        if let Some(stop) = &plan.stop
            && index >= plan.min_iterations
            && reached_stop(call, stop)?
        {
            debug!("geneach '{}' ended after {} item(s)", plan.list_name, index);
            break;
        }
        if index > 0 {
            call.exec.output().push(&plan.join);
        }

        let mut locals = BTreeMap::new();
        locals.insert("this".to_string(), Value::Object(Map::new()));
        locals.insert("@index".to_string(), json!(index));
        locals.insert("@first".to_string(), json!(index == 0));

        call.exec.variables_mut().push_scope(locals);
        let result = call.run_section(body.main());
        let item = call.exec.variables().get_or("this", Value::Null);
        call.exec.variables_mut().pop_scope();

        let flow = result?;
        call.exec.variables_mut().append(&plan.list_name, item)?;
        if flow == Flow::Halt {
            return Ok(Flow::Halt);
        }
    }
    Ok(Flow::Continue)
}

/// Ask the model for a short continuation and check whether it opens with `stop`.
fn reached_stop(call: &mut TagCall<'_>, stop: &str) -> Result<bool> {
    let mut request = CallRequest::new(call.exec.prompt());
    request.max_tokens = stop.chars().count() as u32 + 2;

    let session = call.exec.session()?;
    let caching = call.exec.options().caching;
    let text = match session.call(&request, false, caching)? {
        Response::Complete(completion) => completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .unwrap_or_default(),
        Response::Stream(chunks) => {
            let mut text = String::new();
            for chunk in chunks {
                if let Some(choice) = chunk?.choices.into_iter().next() {
                    text.push_str(&choice.text);
                }
            }
            text
        }
    };

    let trimmed_stop = stop.trim_start();
    Ok(text.starts_with(stop)
        || (!trimmed_stop.is_empty() && text.trim_start().starts_with(trimmed_stop)))
}
