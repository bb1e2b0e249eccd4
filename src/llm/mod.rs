//! Model-call layer.
//!
//! - **Provider**: the binding to an actual model (`complete` / `stream`)
//! - **Session**: one logical call with feature checks, caching, rate limiting and retry
//! - **Cache**: content-addressed response store (`MemoryCache`, `DiskCache`)
//! - **RateLimiter**: sliding-window call budget shared across runs
//!
//! Two bindings ship with the crate: [`MockProvider`] for tests and offline runs,
//! and [`CommandProvider`], which pipes the prompt through a configured shell command.

mod cache;
mod command;
mod mock;
mod rate_limit;
mod session;
mod template;

pub use cache::{CacheEntry, CacheStore, DiskCache, MemoryCache, cache_key};
pub use command::CommandProvider;
pub use mock::MockProvider;
pub use rate_limit::RateLimiter;
pub use session::{Response, ResponseStream, Session, SessionSettings};
pub use template::{TemplateError, render_template};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Optional capabilities a provider may or may not offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Guided decoding against a regular expression.
    Pattern,
    /// Stopping on a regular expression instead of a literal string.
    StopRegex,
    /// Token healing at the prompt boundary.
    TokenHealing,
    /// Per-token log probabilities.
    Logprobs,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Pattern => write!(f, "pattern constraints"),
            Feature::StopRegex => write!(f, "stop_regex"),
            Feature::TokenHealing => write!(f, "token healing"),
            Feature::Logprobs => write!(f, "logprobs"),
        }
    }
}

/// Every parameter of one model call. The whole struct feeds the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub prompt: String,
    pub stop: Option<String>,
    pub stop_regex: Option<String>,
    pub max_tokens: u32,
    pub n: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub logprobs: Option<u32>,
    pub pattern: Option<String>,
    pub token_healing: Option<bool>,
    pub cache_seed: u64,
}

impl CallRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            stop: None,
            stop_regex: None,
            max_tokens: 500,
            n: 1,
            temperature: 0.0,
            top_p: 1.0,
            logprobs: None,
            pattern: None,
            token_healing: None,
            cache_seed: 0,
        }
    }
}

/// One generated alternative.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Choice {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,
}

impl Choice {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            logprobs: None,
        }
    }
}

/// A provider response, or one streamed delta of it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Completion {
    pub choices: Vec<Choice>,
}

impl Completion {
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice::text(text)],
        }
    }
}

/// Errors a provider may report.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transient rejection; the session retries these.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Anything else. Never retried.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Lazy sequence of deltas; the end of the iterator is the end marker.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Completion, ProviderError>> + Send>;

/// Binding to a concrete model.
pub trait Provider: Send + Sync {
    /// Stable identifier, also used to namespace cache keys.
    fn name(&self) -> &str;

    fn supports(&self, feature: Feature) -> bool {
        let _ = feature;
        false
    }

    /// Text that opens a chat role block.
    fn role_start(&self, role: &str) -> String {
        format!("<|im_start|>{}\n", role)
    }

    /// Text that closes a chat role block. Also the inferred stop for a
    /// generation that ends a role block.
    fn role_end(&self, role: &str) -> String {
        let _ = role;
        "<|im_end|>".to_string()
    }

    fn complete(&self, request: &CallRequest) -> Result<Completion, ProviderError>;

    /// Streamed variant. The default delivers the complete response as one delta.
    fn stream(&self, request: &CallRequest) -> Result<ChunkStream, ProviderError> {
        let completion = self.complete(request)?;
        Ok(Box::new(std::iter::once(Ok(completion))))
    }
}

/// Cut generated text at the first stop string or stop regex match.
///
/// Returns the kept text and whether a stop was hit. Used by bindings that
/// cannot stop server side.
pub fn truncate_at_stop(text: &str, stop: Option<&str>, stop_regex: Option<&Regex>) -> (String, bool) {
    let mut cut = None;
    if let Some(stop) = stop.filter(|s| !s.is_empty()) {
        cut = text.find(stop);
    }
    if let Some(re) = stop_regex
        && let Some(m) = re.find(text)
    {
        cut = Some(cut.map_or(m.start(), |c| c.min(m.start())));
    }
    match cut {
        Some(end) => (text[..end].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Compile a request's `stop_regex`, reporting bad patterns as provider failures.
pub(crate) fn compile_stop_regex(request: &CallRequest) -> Result<Option<Regex>, ProviderError> {
    request
        .stop_regex
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| ProviderError::Failed(anyhow::anyhow!("invalid stop_regex: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_at_stop_string() {
        let (text, hit) = truncate_at_stop("Sue\" said hi", Some("\""), None);
        assert_eq!(text, "Sue");
        assert!(hit);
    }

    #[test]
    fn truncate_keeps_text_without_stop() {
        let (text, hit) = truncate_at_stop("no stop here", Some("END"), None);
        assert_eq!(text, "no stop here");
        assert!(!hit);

        let (text, hit) = truncate_at_stop("empty stop", Some(""), None);
        assert_eq!(text, "empty stop");
        assert!(!hit);
    }

    #[test]
    fn truncate_uses_earliest_of_string_and_regex() {
        let re = Regex::new(r"\d+").unwrap();
        let (text, _) = truncate_at_stop("abc 12 def END", Some("END"), Some(&re));
        assert_eq!(text, "abc ");
    }

    #[test]
    fn call_request_defaults() {
        let request = CallRequest::new("Hi");
        assert_eq!(request.max_tokens, 500);
        assert_eq!(request.n, 1);
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.top_p, 1.0);
        assert_eq!(request.cache_seed, 0);
    }

    #[test]
    fn feature_display() {
        assert_eq!(Feature::StopRegex.to_string(), "stop_regex");
        assert_eq!(Feature::TokenHealing.to_string(), "token healing");
    }
}
