//! Programs: a parsed template plus everything needed to run it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tagweave::llm::{MockProvider, Session};
//! use tagweave::program::Program;
//!
//! let session = Arc::new(Session::new(Arc::new(MockProvider::with_output(" Sue"))));
//! let mut program = Program::new("Hello my name is{{gen 'name' max_tokens=5}}")?
//!     .with_session(session);
//! let executed = program.run().map_err(|e| e.error)?;
//! assert_eq!(executed.text(), "Hello my name is Sue");
//! # Ok::<(), tagweave::error::WeaveError>(())
//! ```

mod context;
mod executor;
pub mod markers;
mod output;


pub use context::{Siblings, infer_stop};
pub use executor::{Executor, Flow};
pub use output::{DisplayEvent, DisplaySink, OutputBuffer};

use crate::error::WeaveError;
use crate::grammar::{Template, parse};
use crate::journal::EventAction;
use crate::library::Registry;
use crate::llm::Session;
use crate::variables::VariableStore;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramOptions {
    /// Stream single-completion generations delta by delta.
    pub stream: bool,
    /// Overrides the session's caching default when set.
    pub caching: Option<bool>,
    /// Starting value of the cache-seed counter.
    pub cache_seed: u64,
    /// Default `logprobs` for generations that do not set it.
    pub logprobs: Option<u32>,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            stream: false,
            caching: None,
            cache_seed: 0,
            logprobs: None,
        }
    }
}

/// Cloneable handle that asks a running program to stop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    /// Output with bookkeeping markers and comments.
    pub marked_text: String,
    pub variables: BTreeMap<String, Value>,
    /// False when the run was stopped or an `await` paused it.
    pub completed: bool,
}

impl Executed {
    /// Output without markers or comments.
    pub fn text(&self) -> String {
        markers::plain_text(&self.marked_text)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

impl std::fmt::Display for Executed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// A failed run: the error plus everything produced before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunError {
    #[source]
    pub error: WeaveError,
    pub partial: Executed,
}

pub struct Program {
    template: Arc<Template>,
    registry: Arc<Registry>,
    session: Option<Arc<Session>>,
    variables: BTreeMap<String, Value>,
    options: ProgramOptions,
    display: Option<DisplaySink>,
    stop: StopHandle,
}

impl Program {
    /// Parse `source` with the built-in tags registered.
    pub fn new(source: &str) -> crate::error::Result<Self> {
        Ok(Self {
            template: Arc::new(parse(source)?),
            registry: Arc::new(Registry::builtins()),
            session: None,
            variables: BTreeMap::new(),
            options: ProgramOptions::default(),
            display: None,
            stop: StopHandle::new(),
        })
    }

    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn with_options(mut self, options: ProgramOptions) -> Self {
        self.options = options;
        self
    }

    /// Install a display sink receiving every visible append and the final text.
    pub fn on_display(mut self, sink: impl FnMut(DisplayEvent<'_>) + Send + 'static) -> Self {
        self.display = Some(Box::new(sink));
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn options(&self) -> &ProgramOptions {
        &self.options
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Execute the template with a fresh store and fresh counters.
    ///
    /// A stop requested before the run starts halts it at the first node. The
    /// stop flag is cleared once the run ends.
    pub fn run(&mut self) -> Result<Executed, RunError> {
        if let Some(session) = &self.session {
            session.record(
                EventAction::RunStart,
                json!({ "template_bytes": self.template.source.len() }),
            );
        }

        let mut executor = Executor::new(
            VariableStore::from_map(self.variables.clone()),
            OutputBuffer::new(self.display.take()),
            Arc::clone(&self.registry),
            self.session.clone(),
            self.options.clone(),
            self.stop.clone(),
        );
        let template = Arc::clone(&self.template);
        let outcome = executor.run_nodes(&template.nodes, None);

        let (variables, output) = executor.into_parts();
        let (marked_text, sink) = output.finish();
        self.display = sink;

        let completed = matches!(outcome, Ok(Flow::Continue)) && !self.stop.is_stopped();
        self.stop.reset();
        let executed = Executed {
            marked_text,
            variables: variables.to_map(),
            completed,
        };

        if let Some(session) = &self.session {
            session.record(
                EventAction::RunComplete,
                json!({
                    "completed": executed.completed,
                    "error": outcome.as_ref().err().map(ToString::to_string),
                }),
            );
        }

        match outcome {
            Ok(_) => Ok(executed),
            Err(error) => Err(RunError {
                error,
                partial: executed,
            }),
        }
    }

    /// Run on a background thread with its own store.
    pub fn spawn(mut self) -> RunHandle {
        let stop = self.stop.clone();
        let thread = thread::spawn(move || self.run());
        RunHandle { stop, thread }
    }
}

/// A program running on its own thread.
pub struct RunHandle {
    stop: StopHandle,
    thread: JoinHandle<Result<Executed, RunError>>,
}

impl RunHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end.
    pub fn join(self) -> Result<Executed, RunError> {
        self.thread.join().unwrap_or_else(|_| {
            Err(RunError {
                error: WeaveError::UserError("program thread panicked".to_string()),
                partial: Executed {
                    marked_text: String::new(),
                    variables: BTreeMap::new(),
                    completed: false,
                },
            })
        })
    }
}
