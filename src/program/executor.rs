//! Depth-first tree walker.
//!
//! The executor owns everything one run mutates: the marked output buffer, the
//! variable store, the cache-seed and marker counters. Tags are dispatched through
//! the registry; model calls inside handlers are the only blocking points.

use super::context::Siblings;
use super::markers::{end_marker, plain_text, start_marker};
use super::output::OutputBuffer;
use super::{ProgramOptions, StopHandle};
use crate::error::{Result, WeaveError};
use crate::grammar::{Arguments, Expr, Node, Tag};
use crate::library::{Args, Entry, Registry, TagCall};
use crate::llm::Session;
use crate::variables::{VariableStore, display_value, is_truthy};
use log::debug;
use serde_json::Value;
use std::sync::Arc;

/// Whether the walk continues after a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop the whole run here, keeping everything produced so far.
    Halt,
}

pub struct Executor {
    pub(crate) variables: VariableStore,
    pub(crate) output: OutputBuffer,
    registry: Arc<Registry>,
    session: Option<Arc<Session>>,
    options: ProgramOptions,
    stop: StopHandle,
    seed_counter: u64,
    marker_counter: u64,
    roles: Vec<String>,
}

impl Executor {
    pub(crate) fn new(
        variables: VariableStore,
        output: OutputBuffer,
        registry: Arc<Registry>,
        session: Option<Arc<Session>>,
        options: ProgramOptions,
        stop: StopHandle,
    ) -> Self {
        let seed_counter = options.cache_seed;
        Self {
            variables,
            output,
            registry,
            session,
            options,
            stop,
            seed_counter,
            marker_counter: 0,
            roles: Vec::new(),
        }
    }

    /// Execute `nodes` in order. `closing` is the enclosing block's closing tag.
    pub fn run_nodes(&mut self, nodes: &[Node], closing: Option<&str>) -> Result<Flow> {
        for (i, node) in nodes.iter().enumerate() {
            if self.should_stop() {
                return Ok(Flow::Halt);
            }
            match node {
                Node::Literal(literal) => self.output.push(&literal.text),
                Node::Comment(comment) => self.output.push(&comment.text),
                Node::Tag(tag) => {
                    let siblings = Siblings {
                        prev: i.checked_sub(1).map(|j| &nodes[j]),
                        next: nodes.get(i + 1),
                        closing,
                    };
                    if self.run_tag(tag, siblings)? == Flow::Halt {
                        return Ok(Flow::Halt);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn run_tag(&mut self, tag: &Tag, siblings: Siblings<'_>) -> Result<Flow> {
        let registry = Arc::clone(&self.registry);
        let entry = registry.get(&tag.name);

        if entry.is_none() && tag.args.is_empty() && !tag.is_block() {
            return self.variable_ref(tag);
        }

        let args = self.evaluate_args(&tag.args)?;
        let marked = !args.keyword("hidden").is_some_and(is_truthy);
        let id = self.next_marker_id();
        if marked {
            self.output.push(&start_marker(&tag.name, id, &tag.source));
        }

        debug!("dispatching tag '{}'", tag.name);
        let result = match entry {
            Some(Entry::Tag(handler)) => {
                let mut call = TagCall::new(self, tag, args, siblings);
                handler(&mut call)
            }
            Some(Entry::Function(_)) if tag.is_block() => Err(WeaveError::Configuration(format!(
                "function '{}' cannot be used as a block",
                tag.name
            ))),
            Some(Entry::Function(function)) => function.call(args).map(|value| {
                self.output.push(&display_value(&value));
                Flow::Continue
            }),
            None => Err(WeaveError::Configuration(format!(
                "unknown tag '{}'",
                tag.name
            ))),
        };

        // Close the marker even when the handler failed.
        if marked {
            self.output.push(&end_marker(&tag.name, id));
        }
        result
    }

    fn variable_ref(&mut self, tag: &Tag) -> Result<Flow> {
        let value = self.variables.get(&tag.name).cloned().ok_or_else(|| {
            WeaveError::Configuration(format!("variable '{}' is not defined", tag.name))
        })?;
        let id = self.next_marker_id();
        self.output.push(&start_marker("variable_ref", id, &tag.source));
        self.output.push(&display_value(&value));
        self.output.push(&end_marker("variable_ref", id));
        Ok(Flow::Continue)
    }

    /// Evaluate an argument expression. Missing variables evaluate to null.
    pub fn evaluate(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => Ok(self.variables.get(path).cloned().unwrap_or(Value::Null)),
            Expr::Call { name, args } => match self.registry.get(name) {
                Some(Entry::Function(function)) => function.call(self.evaluate_args(args)?),
                Some(Entry::Tag(_)) => Err(WeaveError::Configuration(format!(
                    "tag '{}' cannot be used as a sub call",
                    name
                ))),
                None => Err(WeaveError::Configuration(format!(
                    "unknown function '{}'",
                    name
                ))),
            },
        }
    }

    pub fn evaluate_args(&self, args: &Arguments) -> Result<Args> {
        let positional = args
            .positional
            .iter()
            .map(|expr| self.evaluate(expr))
            .collect::<Result<Vec<_>>>()?;
        let keyword = args
            .keyword
            .iter()
            .map(|(name, expr)| Ok((name.clone(), self.evaluate(expr)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Args::new(positional, keyword))
    }

    /// The bound model session, required by generation tags.
    pub fn session(&self) -> Result<Arc<Session>> {
        self.session.clone().ok_or_else(|| {
            WeaveError::Configuration("no model session is bound to this program".to_string())
        })
    }

    pub fn options(&self) -> &ProgramOptions {
        &self.options
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableStore {
        &mut self.variables
    }

    pub fn output(&mut self) -> &mut OutputBuffer {
        &mut self.output
    }

    /// Text sent to the model: the output so far without markers or comments.
    pub fn prompt(&self) -> String {
        plain_text(self.output.text())
    }

    pub fn should_stop(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Seed for the next call: 0 at temperature 0, else the next counter value.
    pub fn next_cache_seed(&mut self, temperature: f64) -> u64 {
        if temperature > 0.0 {
            let seed = self.seed_counter;
            self.seed_counter += 1;
            seed
        } else {
            0
        }
    }

    pub fn next_marker_id(&mut self) -> u64 {
        let id = self.marker_counter;
        self.marker_counter += 1;
        id
    }

    pub fn push_role(&mut self, role: &str) {
        self.roles.push(role.to_string());
    }

    pub fn pop_role(&mut self) {
        self.roles.pop();
    }

    /// Innermost open role block.
    pub fn current_role(&self) -> Option<&str> {
        self.roles.last().map(String::as_str)
    }

    pub(crate) fn into_parts(self) -> (VariableStore, OutputBuffer) {
        (self.variables, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse;
    use crate::program::output::OutputBuffer;
    use serde_json::json;

    fn executor() -> Executor {
        Executor::new(
            VariableStore::new(),
            OutputBuffer::new(None),
            Arc::new(Registry::builtins()),
            None,
            ProgramOptions::default(),
            StopHandle::new(),
        )
    }

    #[test]
    fn literals_and_comments_are_copied() {
        let template = parse("a{{! note }}b").unwrap();
        let mut exec = executor();
        assert_eq!(exec.run_nodes(&template.nodes, None).unwrap(), Flow::Continue);
        assert_eq!(exec.output.text(), "a{{! note }}b");
        assert_eq!(exec.prompt(), "ab");
    }

    #[test]
    fn variable_reference_is_marked() {
        let template = parse("Hi {{name}}!").unwrap();
        let mut exec = executor();
        exec.variables.set("name", json!("Ann")).unwrap();
        exec.run_nodes(&template.nodes, None).unwrap();
        assert_eq!(
            exec.output.text(),
            "Hi {{!--GMARKER_START_variable_ref$0$&#123;&#123;name&#125;&#125;$--}}Ann{{!--GMARKER_END_variable_ref$0$--}}!"
        );
        assert_eq!(exec.prompt(), "Hi Ann!");
    }

    #[test]
    fn undefined_variable_is_error() {
        let template = parse("{{missing}}").unwrap();
        let err = executor().run_nodes(&template.nodes, None).unwrap_err();
        assert!(err.to_string().contains("variable 'missing' is not defined"));
    }

    #[test]
    fn unknown_tag_with_arguments_is_error() {
        let template = parse("{{frobnicate 1}}").unwrap();
        let err = executor().run_nodes(&template.nodes, None).unwrap_err();
        assert!(err.to_string().contains("unknown tag 'frobnicate'"));
    }

    #[test]
    fn sub_calls_evaluate_functions() {
        let exec = executor();
        let template = parse("{{set 'x' (add 1 (subtract 5 2))}}").unwrap();
        let Node::Tag(tag) = &template.nodes[0] else {
            panic!("expected tag");
        };
        let args = exec.evaluate_args(&tag.args).unwrap();
        assert_eq!(args.positional(1), Some(&json!(4)));
    }

    #[test]
    fn missing_paths_evaluate_to_null() {
        let exec = executor();
        assert_eq!(
            exec.evaluate(&Expr::Path("nope.deeper".to_string())).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn cache_seed_counter() {
        let mut exec = executor();
        assert_eq!(exec.next_cache_seed(0.0), 0);
        assert_eq!(exec.next_cache_seed(0.7), 0);
        assert_eq!(exec.next_cache_seed(0.7), 1);
        assert_eq!(exec.next_cache_seed(0.0), 0);
        assert_eq!(exec.next_cache_seed(1.0), 2);
    }

    #[test]
    fn stop_flag_halts_before_next_node() {
        let template = parse("a{{set 'x' 1}}b").unwrap();
        let mut exec = executor();
        exec.stop.stop();
        assert_eq!(exec.run_nodes(&template.nodes, None).unwrap(), Flow::Halt);
        assert_eq!(exec.output.text(), "");
        assert!(!exec.variables.contains("x"));
    }

    #[test]
    fn gen_without_session_is_error() {
        let template = parse("{{gen 'x'}}").unwrap();
        let err = executor().run_nodes(&template.nodes, None).unwrap_err();
        assert!(err.to_string().contains("no model session"));
    }
}
