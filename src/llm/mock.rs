//! Deterministic provider for tests and offline runs.

use super::{
    CallRequest, Choice, ChunkStream, Completion, Feature, Provider, ProviderError,
    compile_stop_regex, truncate_at_stop,
};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Returns fixed outputs: choice `i` is `outputs[i % len]`, or `mock output {i}`
/// when no outputs are configured. Scripted replies, when queued, answer choice 0
/// of successive calls first. Every attempt is recorded.
#[derive(Debug, Default)]
pub struct MockProvider {
    outputs: Vec<String>,
    replies: Mutex<VecDeque<String>>,
    features: HashSet<Feature>,
    rate_limited: AtomicU32,
    failure: Option<String>,
    requests: Mutex<Vec<CallRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(output: impl Into<String>) -> Self {
        Self::with_outputs(vec![output.into()])
    }

    pub fn with_outputs(outputs: Vec<String>) -> Self {
        Self {
            outputs,
            ..Self::default()
        }
    }

    /// Answer successive calls with `replies`, one each, before falling back
    /// to the fixed outputs.
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Advertise support for an optional feature.
    pub fn supporting(mut self, feature: Feature) -> Self {
        self.features.insert(feature);
        self
    }

    /// Reject the first `attempts` calls as rate limited.
    pub fn rate_limited_for(self, attempts: u32) -> Self {
        self.rate_limited.store(attempts, Ordering::SeqCst);
        self
    }

    /// Fail every call with a non-retryable error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Every request seen so far, including rejected attempts.
    pub fn requests(&self) -> Vec<CallRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn attempt(&self, request: &CallRequest) -> Result<Vec<String>, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());

        let rejected = self
            .rate_limited
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(ProviderError::RateLimited("mock rejection".to_string()));
        }
        if let Some(message) = &self.failure {
            return Err(ProviderError::Failed(anyhow::anyhow!("{}", message)));
        }

        let stop_regex = compile_stop_regex(request)?;
        let mut scripted = self
            .replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        Ok((0..request.n.max(1) as usize)
            .map(|i| {
                let raw = match (scripted.take(), self.outputs.is_empty()) {
                    (Some(reply), _) => reply,
                    (None, true) => format!("mock output {}", i),
                    (None, false) => self.outputs[i % self.outputs.len()].clone(),
                };
                truncate_at_stop(&raw, request.stop.as_deref(), stop_regex.as_ref()).0
            })
            .collect())
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    fn complete(&self, request: &CallRequest) -> Result<Completion, ProviderError> {
        let choices = self
            .attempt(request)?
            .into_iter()
            .map(|text| {
                let logprobs = request
                    .logprobs
                    .map(|_| json!({ "tokens": [text.clone()], "token_logprobs": [0.0] }));
                Choice { text, logprobs }
            })
            .collect();
        Ok(Completion { choices })
    }

    fn stream(&self, request: &CallRequest) -> Result<ChunkStream, ProviderError> {
        let text = self.attempt(request)?.into_iter().next().unwrap_or_default();
        let chunks: Vec<_> = split_words(&text)
            .into_iter()
            .map(|piece| Ok(Completion::single(piece)))
            .collect();
        Ok(Box::new(chunks.into_iter()))
    }
}

/// Split text into pieces that each start with their leading whitespace.
fn split_words(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut prev_is_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() && !prev_is_space && !current.trim().is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        prev_is_space = ch.is_whitespace();
        current.push(ch);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
