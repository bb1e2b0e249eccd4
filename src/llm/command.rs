//! Provider that pipes the prompt through a shell command.
//!
//! The command line is rendered from the request (`{max_tokens}`, `{temperature}`,
//! `{top_p}`, `{n}`, `{stop}`, `{seed}`), split with `shell-words`, given the prompt
//! on stdin, and its stdout is taken as the completion. The command runs once per
//! requested completion. Output is cut at `stop` / `stop_regex` locally, so any
//! command works without server-side stop support.

use super::template::render_template;
use super::{
    CallRequest, Choice, ChunkStream, Completion, Feature, Provider, ProviderError,
    compile_stop_regex, truncate_at_stop,
};
use anyhow::{Context, anyhow};
use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CommandProvider {
    command: String,
    timeout: Duration,
    rate_limit_exit_code: Option<i32>,
    role_start: String,
    role_end: String,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(600),
            rate_limit_exit_code: None,
            role_start: "<|im_start|>{role}\n".to_string(),
            role_end: "<|im_end|>".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Treat this exit code as a transient rate-limit rejection.
    pub fn with_rate_limit_exit_code(mut self, code: i32) -> Self {
        self.rate_limit_exit_code = Some(code);
        self
    }

    /// Role delimiters; `{role}` is replaced by the role name.
    pub fn with_role_tokens(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.role_start = start.into();
        self.role_end = end.into();
        self
    }

    /// Render the command with default request values, surfacing template errors early.
    pub fn check(&self) -> Result<(), ProviderError> {
        self.argv(&CallRequest::new("")).map(|_| ())
    }

    fn argv(&self, request: &CallRequest) -> Result<Vec<String>, ProviderError> {
        let values: HashMap<&str, String> = HashMap::from([
            ("max_tokens", request.max_tokens.to_string()),
            ("temperature", request.temperature.to_string()),
            ("top_p", request.top_p.to_string()),
            ("n", "1".to_string()),
            ("stop", request.stop.clone().unwrap_or_default()),
            ("seed", request.cache_seed.to_string()),
        ]);

        let rendered = render_template(&self.command, &values)
            .map_err(|e| anyhow!("provider command template: {}", e))?;
        let args = shell_words::split(&rendered)
            .with_context(|| format!("failed to parse provider command '{}'", rendered))?;
        if args.is_empty() {
            return Err(anyhow!("provider command is empty after parsing: '{}'", rendered).into());
        }
        Ok(args)
    }

    fn spawn(&self, request: &CallRequest) -> Result<Child, ProviderError> {
        let args = self.argv(request)?;
        debug!("running provider command: {}", args.join(" "));

        let mut child = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute provider command '{}'", args[0]))?;

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.clone();
            // A command that ignores stdin closes the pipe early; that is not an error.
            thread::spawn(move || {
                let _ = stdin.write_all(prompt.as_bytes());
            });
        }
        Ok(child)
    }

    fn check_status(&self, status: ExitStatus, stderr: &str) -> Result<(), ProviderError> {
        match status.code() {
            Some(0) => Ok(()),
            Some(code) if Some(code) == self.rate_limit_exit_code => Err(ProviderError::RateLimited(
                format!("command exited with {}: {}", code, stderr.trim()),
            )),
            Some(code) => Err(anyhow!("provider command exited with {}: {}", code, stderr.trim()).into()),
            None => Err(anyhow!("provider command was terminated by a signal").into()),
        }
    }

    /// Run the command once and return its stdout.
    fn run_once(&self, request: &CallRequest) -> Result<String, ProviderError> {
        let mut child = self.spawn(request)?;
        let stdout = child.stdout.take().map(read_to_end);
        let stderr = child.stderr.take().map(read_to_end);

        let status = wait_with_timeout(&mut child, self.timeout)?;
        let stdout = join_reader(stdout)?;
        let stderr = join_reader(stderr)?;

        match status {
            Some(status) => {
                self.check_status(status, &stderr)?;
                Ok(stdout)
            }
            None => Err(anyhow!(
                "provider command timed out after {} seconds",
                self.timeout.as_secs()
            )
            .into()),
        }
    }
}

impl Provider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    fn supports(&self, feature: Feature) -> bool {
        matches!(feature, Feature::StopRegex)
    }

    fn role_start(&self, role: &str) -> String {
        self.role_start.replace("{role}", role)
    }

    fn role_end(&self, role: &str) -> String {
        self.role_end.replace("{role}", role)
    }

    fn complete(&self, request: &CallRequest) -> Result<Completion, ProviderError> {
        let stop_regex = compile_stop_regex(request)?;
        let mut choices = Vec::with_capacity(request.n as usize);
        for _ in 0..request.n.max(1) {
            let output = self.run_once(request)?;
            let (text, _) = truncate_at_stop(&output, request.stop.as_deref(), stop_regex.as_ref());
            choices.push(Choice::text(text));
        }
        Ok(Completion { choices })
    }

    /// Streams stdout line by line. The timeout is not enforced while streaming;
    /// dropping the stream kills the command.
    fn stream(&self, request: &CallRequest) -> Result<ChunkStream, ProviderError> {
        let stop_regex = compile_stop_regex(request)?;
        let mut child = self.spawn(request)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("provider command has no stdout"))?;
        let stderr = child.stderr.take().map(read_to_end);

        Ok(Box::new(LineStream {
            provider: self.clone(),
            child,
            reader: BufReader::new(stdout),
            stderr,
            emitted: String::new(),
            stop: request.stop.clone(),
            stop_regex,
            finished: false,
        }))
    }
}

struct LineStream {
    provider: CommandProvider,
    child: Child,
    reader: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<std::io::Result<String>>>,
    emitted: String,
    stop: Option<String>,
    stop_regex: Option<Regex>,
    finished: bool,
}

impl LineStream {
    fn finish(&mut self) -> Option<Result<Completion, ProviderError>> {
        self.finished = true;
        let status = match self.child.wait() {
            Ok(status) => status,
            Err(e) => return Some(Err(anyhow!("failed to wait for provider command: {}", e).into())),
        };
        let stderr = match join_reader(self.stderr.take()) {
            Ok(stderr) => stderr,
            Err(e) => return Some(Err(e)),
        };
        self.provider.check_status(status, &stderr).err().map(Err)
    }
}

impl Iterator for LineStream {
    type Item = Result<Completion, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => self.finish(),
            Ok(_) => {
                let before = self.emitted.len();
                self.emitted.push_str(&line);
                let (kept, hit) =
                    truncate_at_stop(&self.emitted, self.stop.as_deref(), self.stop_regex.as_ref());
                if hit {
                    self.finished = true;
                    kill_process(&mut self.child);
                    let rest = kept.get(before..).unwrap_or_default();
                    return (!rest.is_empty()).then(|| Ok(Completion::single(rest)));
                }
                Some(Ok(Completion::single(line)))
            }
            Err(e) => {
                self.finished = true;
                kill_process(&mut self.child);
                Some(Err(anyhow!("failed to read provider output: {}", e).into()))
            }
        }
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        if !self.finished {
            kill_process(&mut self.child);
        }
    }
}

fn read_to_end<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join_reader(handle: Option<JoinHandle<std::io::Result<String>>>) -> Result<String, ProviderError> {
    match handle {
        None => Ok(String::new()),
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow!("provider output reader panicked"))?
            .map_err(|e| anyhow!("failed to read provider output: {}", e).into()),
    }
}

/// Wait for the child, killing it once `timeout` elapses. `None` means timed out.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>, ProviderError> {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(20);

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if start.elapsed() >= timeout => {
                kill_process(child);
                return Ok(None);
            }
            Ok(None) => thread::sleep(poll_interval),
            Err(e) => return Err(anyhow!("failed to check provider command status: {}", e).into()),
        }
    }
}

fn kill_process(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
