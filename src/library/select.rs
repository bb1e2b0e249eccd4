//! `{{#select 'name'}}a{{or}}b{{/select}}` and `{{select 'name' options=list}}`:
//! let the model pick one option.
//!
//! With a provider that supports pattern constraints, generation is constrained
//! to the alternation of the options. Otherwise the model generates freely up
//! to the length of the longest option and the option sharing the longest
//! prefix with the output wins (first option on ties).

use super::TagCall;
use crate::error::{Result, WeaveError};
use crate::llm::{CallRequest, Feature, Response};
use crate::program::Flow;
use crate::variables::display_value;
use log::debug;
use serde_json::Value;

const KEYWORDS: &[&str] = &["variable_name", "options", "hidden"];

pub(crate) fn select(call: &mut TagCall<'_>) -> Result<Flow> {
    call.args.check("select", 1, KEYWORDS)?;
    let name = call
        .args
        .string(0, "variable_name")?
        .unwrap_or_else(|| "selected".to_string());
    let hidden = call.args.flag("hidden");
    let options = options(call)?;

    let session = call.exec.session()?;
    let supports_pattern = session.provider().supports(Feature::Pattern);
    let longest = options.iter().map(|o| o.chars().count()).max().unwrap_or(0);

    let mut request = CallRequest::new(call.exec.prompt());
    request.max_tokens = u32::try_from(longest).unwrap_or(u32::MAX).max(1);
    if supports_pattern {
        let alternation: Vec<String> = options.iter().map(|o| regex::escape(o)).collect();
        request.pattern = Some(format!("(?:{})", alternation.join("|")));
    } else {
        request.stop = call.inferred_stop()?;
    }

    let caching = call.exec.options().caching;
    let completion = match session.call(&request, false, caching)? {
        Response::Complete(completion) => completion,
        Response::Stream(chunks) => {
            let mut text = String::new();
            for chunk in chunks {
                if let Some(choice) = chunk?.choices.first() {
                    text.push_str(&choice.text);
                }
            }
            crate::llm::Completion::single(text)
        }
    };
    let generated = completion
        .choices
        .first()
        .map(|c| c.text.as_str())
        .unwrap_or_default();

    let chosen = best_option(&options, generated).to_string();
    debug!("select '{}': generated {:?}, chose {:?}", name, generated, chosen);

    call.exec
        .variables_mut()
        .set(&name, Value::String(chosen.clone()))?;
    if !hidden {
        call.exec.output().push(&chosen);
    }
    Ok(Flow::Continue)
}

fn options(call: &TagCall<'_>) -> Result<Vec<String>> {
    let options = match (call.args.keyword("options"), &call.tag.body) {
        (Some(_), Some(_)) => {
            return Err(WeaveError::Configuration(
                "select takes either an options list or a block body, not both".to_string(),
            ));
        }
        (Some(Value::Array(items)), None) => items.iter().map(display_value).collect(),
        (Some(other), None) => {
            return Err(WeaveError::Configuration(format!(
                "select options must be a list, got {}",
                other
            )));
        }
        (None, Some(body)) => body
            .sections
            .iter()
            .map(|section| section.iter().map(|node| node.text()).collect::<String>())
            .collect(),
        (None, None) => Vec::new(),
    };

    if options.is_empty() {
        return Err(WeaveError::Configuration(
            "select needs at least one option".to_string(),
        ));
    }
    Ok(options)
}

/// Exact match first, then the longest shared prefix; earlier options win ties.
fn best_option<'o>(options: &'o [String], generated: &str) -> &'o str {
    if let Some(exact) = options.iter().find(|o| o.as_str() == generated) {
        return exact;
    }
    let mut best = &options[0];
    let mut best_len = 0;
    for option in options {
        let shared = option
            .chars()
            .zip(generated.chars())
            .take_while(|(a, b)| a == b)
            .count();
        if shared > best_len {
            best = option;
            best_len = shared;
        }
    }
    best
}
