//! `{{gen 'name' ...}}`: ask the model for a completion.

use super::TagCall;
use crate::error::{Result, WeaveError};
use crate::grammar::parse;
use crate::llm::{CallRequest, Completion, Response, ResponseStream};
use crate::program::Flow;
use crate::program::markers::many_generate;
use log::debug;
use serde_json::Value;

const KEYWORDS: &[&str] = &[
    "variable_name",
    "stop",
    "stop_regex",
    "max_tokens",
    "n",
    "temperature",
    "top_p",
    "logprobs",
    "pattern",
    "hidden",
    "parse",
    "list_append",
    "save_prompt",
    "token_healing",
];

#[derive(Debug)]
struct GenArgs {
    name: String,
    stop: Option<String>,
    stop_regex: Option<String>,
    max_tokens: u32,
    n: u32,
    temperature: f64,
    top_p: f64,
    logprobs: Option<u32>,
    pattern: Option<String>,
    hidden: bool,
    parse: bool,
    list_append: bool,
    save_prompt: Option<String>,
    token_healing: Option<bool>,
}

fn read_args(call: &TagCall<'_>) -> Result<GenArgs> {
    let args = &call.args;
    args.check("gen", 1, KEYWORDS)?;

    let parsed = GenArgs {
        name: args
            .string(0, "variable_name")?
            .unwrap_or_else(|| "generated".to_string()),
        stop: args.keyword_string("stop")?,
        stop_regex: args.keyword_string("stop_regex")?,
        max_tokens: args.keyword_u32("max_tokens")?.unwrap_or(500),
        n: args.keyword_u32("n")?.unwrap_or(1),
        temperature: args.keyword_f64("temperature")?.unwrap_or(0.0),
        top_p: args.keyword_f64("top_p")?.unwrap_or(1.0),
        logprobs: args
            .keyword_u32("logprobs")?
            .or(call.exec.options().logprobs),
        pattern: args.keyword_string("pattern")?,
        hidden: args.flag("hidden"),
        parse: args.flag("parse"),
        list_append: args.flag("list_append"),
        save_prompt: args.keyword_string("save_prompt")?,
        token_healing: args.keyword_bool("token_healing")?,
    };

    if parsed.n == 0 {
        return Err(WeaveError::Configuration(
            "gen requires n >= 1".to_string(),
        ));
    }
    if parsed.parse && parsed.hidden {
        return Err(WeaveError::Configuration(
            "gen cannot parse generated text while hiding it (parse=True with hidden=True)"
                .to_string(),
        ));
    }
    if parsed.parse && parsed.n > 1 {
        return Err(WeaveError::Configuration(
            "gen can only parse a single completion (parse=True with n > 1)".to_string(),
        ));
    }
    Ok(parsed)
}

pub(crate) fn generate(call: &mut TagCall<'_>) -> Result<Flow> {
    call.expect_inline()?;
    let args = read_args(call)?;

    // An explicit empty stop means no stop, not inference.
    let stop = match &args.stop {
        Some(stop) => Some(stop.clone()),
        None => call.inferred_stop()?,
    }
    .filter(|s| !s.is_empty());

    let cache_seed = call.exec.next_cache_seed(args.temperature);
    let prompt = call.exec.prompt();
    if let Some(target) = &args.save_prompt {
        call.exec
            .variables_mut()
            .set(target, Value::String(prompt.clone()))?;
    }

    let request = CallRequest {
        prompt,
        stop,
        stop_regex: args.stop_regex.clone(),
        max_tokens: args.max_tokens,
        n: args.n,
        temperature: args.temperature,
        top_p: args.top_p,
        logprobs: args.logprobs,
        pattern: args.pattern.clone(),
        token_healing: args.token_healing,
        cache_seed,
    };
    let stream = args.n == 1 && call.exec.options().stream;
    debug!(
        "gen '{}': stop={:?}, seed={}, stream={}",
        args.name, request.stop, cache_seed, stream
    );

    let session = call.exec.session()?;
    let caching = call.exec.options().caching;
    let response = session.call(&request, stream, caching)?;

    match args.n {
        1 => single(call, &args, response),
        _ => many(call, &args, response),
    }
}

/// One completion, possibly streamed. The variable tracks the value as it grows.
fn single(call: &mut TagCall<'_>, args: &GenArgs, response: Response) -> Result<Flow> {
    let chunks: ResponseStream = match response {
        Response::Complete(completion) => Box::new(std::iter::once(Ok(completion))),
        Response::Stream(chunks) => chunks,
    };
    let logprobs_name = format!("{}_logprobs", args.name);
    let echo = !args.hidden && !args.parse;

    if args.list_append {
        let store = call.exec.variables_mut();
        store.append(&args.name, Value::String(String::new()))?;
        if args.logprobs.is_some() {
            store.append(&logprobs_name, Value::Array(Vec::new()))?;
        }
    }

    let mut value = String::new();
    let mut logprobs = Vec::new();
    for chunk in chunks {
        if call.exec.should_stop() {
            break;
        }
        let Some(choice) = chunk?.choices.into_iter().next() else {
            continue;
        };
        value.push_str(&choice.text);
        if echo {
            call.exec.output().push(&choice.text);
        }
        if let Some(record) = choice.logprobs {
            logprobs.push(record);
        }
        store_value(call, args, &value, &logprobs)?;
    }
    store_value(call, args, &value, &logprobs)?;

    if args.parse {
        let template = parse(&value)?;
        return call.exec.run_nodes(&template.nodes, None);
    }
    Ok(Flow::Continue)
}

fn store_value(call: &mut TagCall<'_>, args: &GenArgs, value: &str, logprobs: &[Value]) -> Result<()> {
    let logprobs_name = format!("{}_logprobs", args.name);
    let store = call.exec.variables_mut();
    let value = Value::String(value.to_string());
    let records = Value::Array(logprobs.to_vec());

    if args.list_append {
        store.update_last(&args.name, value)?;
        if args.logprobs.is_some() {
            store.update_last(&logprobs_name, records)?;
        }
    } else {
        store.set(&args.name, value)?;
        if args.logprobs.is_some() {
            store.set(&logprobs_name, records)?;
        }
    }
    Ok(())
}

/// `n` completions in one response. Completion 0 becomes context.
fn many(call: &mut TagCall<'_>, args: &GenArgs, response: Response) -> Result<Flow> {
    let completion = match response {
        Response::Complete(completion) => completion,
        Response::Stream(chunks) => merge_chunks(chunks)?,
    };

    let values: Vec<String> = completion.choices.iter().map(|c| c.text.clone()).collect();
    let list = Value::Array(values.iter().cloned().map(Value::String).collect());
    let records = Value::Array(
        completion
            .choices
            .iter()
            .map(|c| c.logprobs.clone().unwrap_or(Value::Null))
            .collect(),
    );

    let logprobs_name = format!("{}_logprobs", args.name);
    let store = call.exec.variables_mut();
    if args.list_append {
        store.append(&args.name, list)?;
        if args.logprobs.is_some() {
            store.append(&logprobs_name, records)?;
        }
    } else {
        store.set(&args.name, list)?;
        if args.logprobs.is_some() {
            store.set(&logprobs_name, records)?;
        }
    }

    if !args.hidden && !values.is_empty() {
        let id = call.exec.next_marker_id();
        call.exec.output().push(&many_generate(&values, id));
    }
    Ok(Flow::Continue)
}

/// Fold streamed deltas into one completion, concatenating text per choice.
fn merge_chunks(chunks: ResponseStream) -> Result<Completion> {
    let mut merged = Completion::default();
    for chunk in chunks {
        for (i, choice) in chunk?.choices.into_iter().enumerate() {
            match merged.choices.get_mut(i) {
                Some(existing) => existing.text.push_str(&choice.text),
                None => merged.choices.push(choice),
            }
        }
    }
    Ok(merged)
}
