//! Tag and function library.
//!
//! A [`Registry`] maps names to either tag handlers (which see the executor and
//! the tag's body) or plain functions (values in, value out). Programs carry an
//! explicit registry; [`Registry::builtins`] holds the standard set:
//!
//! | Tag | Kind |
//! |---|---|
//! | `gen`, `select`, `set`, `await` | inline |
//! | `each`, `geneach`, `if`, `unless`, `block`, `system`, `user`, `assistant`, `role` | block |
//! | `add`, `subtract`, `strip`, `equal` | function |

mod args;
mod await_;
mod block;
mod conditional;
mod each;
mod function;
mod geneach;
mod generate;
mod role;
mod select;
mod set;
mod strings;

pub use args::Args;
pub use function::{Function, FunctionBuilder};

use crate::error::{Result, WeaveError};
use crate::grammar::{Body, Node, Tag};
use crate::program::{Executor, Flow, Siblings, infer_stop};
use std::collections::HashMap;
use std::sync::Arc;

/// Handler for a tag. Writes to the output and the store through the call.
pub type Handler = Arc<dyn Fn(&mut TagCall<'_>) -> Result<Flow> + Send + Sync>;

#[derive(Clone)]
pub enum Entry {
    Tag(Handler),
    Function(Function),
}

#[derive(Clone, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("entries", &names).finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in tags and functions.
    pub fn builtins() -> Self {
        let mut registry = Self::new();
        registry.register_tag("gen", generate::generate);
        registry.register_tag("select", select::select);
        registry.register_tag("each", each::each);
        registry.register_tag("geneach", geneach::geneach);
        registry.register_tag("if", conditional::if_);
        registry.register_tag("unless", conditional::unless);
        registry.register_tag("set", set::set);
        registry.register_tag("block", block::block);
        registry.register_tag("await", await_::await_);
        for role in ["system", "user", "assistant"] {
            registry.register_tag(role, role::named_role);
        }
        registry.register_tag("role", role::role);
        for function in strings::functions() {
            registry.register_function(function);
        }
        registry
    }

    pub fn register_tag<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut TagCall<'_>) -> Result<Flow> + Send + Sync + 'static,
    {
        self.entries
            .insert(name.to_string(), Entry::Tag(Arc::new(handler)));
        self
    }

    pub fn register_function(&mut self, function: Function) -> &mut Self {
        self.entries
            .insert(function.name().to_string(), Entry::Function(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// Everything a tag handler may touch during one invocation.
pub struct TagCall<'a> {
    pub exec: &'a mut Executor,
    pub tag: &'a Tag,
    pub args: Args,
    siblings: Siblings<'a>,
}

impl<'a> TagCall<'a> {
    pub(crate) fn new(exec: &'a mut Executor, tag: &'a Tag, args: Args, siblings: Siblings<'a>) -> Self {
        Self {
            exec,
            tag,
            args,
            siblings,
        }
    }

    pub fn name(&self) -> &'a str {
        &self.tag.name
    }

    pub fn siblings(&self) -> &Siblings<'a> {
        &self.siblings
    }

    /// The block body; an error for inline use.
    pub fn body(&self) -> Result<&'a Body> {
        let tag: &'a Tag = self.tag;
        tag.body.as_ref().ok_or_else(|| {
            WeaveError::Configuration(format!("'{}' must be used as a block tag", tag.name))
        })
    }

    /// Reject block use of an inline-only tag.
    pub fn expect_inline(&self) -> Result<()> {
        match self.tag.is_block() {
            true => Err(WeaveError::Configuration(format!(
                "'{}' cannot be used as a block tag",
                self.tag.name
            ))),
            false => Ok(()),
        }
    }

    /// Execute a section of this tag's body.
    pub fn run_section(&mut self, nodes: &[Node]) -> Result<Flow> {
        let closing = self.tag.body.as_ref().map(|body| body.closing.as_str());
        self.exec.run_nodes(nodes, closing)
    }

    /// Stop string implied by the text around this tag.
    pub fn inferred_stop(&self) -> Result<Option<String>> {
        let session = self.exec.session()?;
        Ok(infer_stop(
            &self.siblings,
            session.provider(),
            self.exec.current_role(),
        ))
    }
}
