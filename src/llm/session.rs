//! One logical model call: feature checks, cache, rate limit, retry, streaming.

use super::{
    CacheEntry, CacheStore, CallRequest, ChunkStream, Completion, Feature, MemoryCache, Provider,
    ProviderError, RateLimiter, cache_key,
};
use crate::error::{Result, WeaveError};
use crate::journal::{EventAction, Journal};
use log::{debug, warn};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Lazy sequence of deltas delivered to the caller.
pub type ResponseStream = Box<dyn Iterator<Item = Result<Completion>> + Send>;

/// Result of [`Session::call`].
pub enum Response {
    Complete(Completion),
    Stream(ResponseStream),
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Response::Complete(completion) => f.debug_tuple("Complete").field(completion).finish(),
            Response::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Default for calls that do not override caching.
    pub caching: bool,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            caching: true,
            max_retries: 5,
            retry_backoff: Duration::from_secs(3),
        }
    }
}

/// A provider bound to a cache, a rate limiter and retry settings.
///
/// Cheap to share: wrap in an `Arc` and hand it to as many programs as needed.
pub struct Session {
    provider: Arc<dyn Provider>,
    cache: Arc<dyn CacheStore>,
    limiter: Arc<RateLimiter>,
    settings: SessionSettings,
    journal: Option<Arc<Journal>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.provider.name())
            .field("settings", &self.settings)
            .field("journal", &self.journal.as_ref().map(|j| j.path()))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session with an in-memory cache and a 60 calls per minute budget.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            cache: Arc::new(MemoryCache::new()),
            limiter: Arc::new(RateLimiter::per_minute(60)),
            settings: SessionSettings::default(),
            journal: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Record a journal event if a journal is configured.
    pub fn record(&self, action: EventAction, details: serde_json::Value) {
        if let Some(journal) = &self.journal {
            journal.record(action, details);
        }
    }

    /// Perform one call, answering from the cache when possible.
    ///
    /// `caching` overrides the session default for this call.
    pub fn call(&self, request: &CallRequest, stream: bool, caching: Option<bool>) -> Result<Response> {
        self.check_features(request)?;

        let use_cache = caching.unwrap_or(self.settings.caching);
        let key = cache_key(self.provider.name(), request)?;

        if use_cache && let Some(response) = self.lookup(&key, stream)? {
            debug!("cache hit for {}", &key[..12]);
            self.record(EventAction::CacheHit, json!({ "key": key, "stream": stream }));
            return Ok(response);
        }

        debug!(
            "calling provider '{}' (n={}, stream={}, max_tokens={})",
            self.provider.name(),
            request.n,
            stream,
            request.max_tokens
        );

        if stream {
            let chunks = self.with_retries(|| self.provider.stream(request))?;
            self.record_call(request, true);
            let recorder = RecordingStream {
                inner: chunks,
                saved: Vec::new(),
                target: use_cache.then(|| (key, Arc::clone(&self.cache))),
                finished: false,
            };
            return Ok(Response::Stream(Box::new(recorder)));
        }

        let completion = self.with_retries(|| self.provider.complete(request))?;
        self.record_call(request, false);
        if use_cache {
            self.cache.put(
                &key,
                &CacheEntry::Complete {
                    completion: completion.clone(),
                },
            )?;
        }
        Ok(Response::Complete(completion))
    }

    fn check_features(&self, request: &CallRequest) -> Result<()> {
        let mut required = Vec::new();
        if request.pattern.is_some() {
            required.push(Feature::Pattern);
        }
        if request.stop_regex.is_some() {
            required.push(Feature::StopRegex);
        }
        if request.token_healing == Some(true) {
            required.push(Feature::TokenHealing);
        }
        if request.logprobs.is_some() {
            required.push(Feature::Logprobs);
        }

        match required.into_iter().find(|f| !self.provider.supports(*f)) {
            Some(feature) => Err(WeaveError::UnsupportedFeature {
                provider: self.provider.name().to_string(),
                feature,
            }),
            None => Ok(()),
        }
    }

    fn lookup(&self, key: &str, stream: bool) -> Result<Option<Response>> {
        let response = match self.cache.get(key)? {
            Some(CacheEntry::Complete { completion }) if stream => {
                Some(Response::Stream(Box::new(std::iter::once(Ok(completion)))))
            }
            Some(CacheEntry::Complete { completion }) => Some(Response::Complete(completion)),
            Some(CacheEntry::Stream { chunks }) if stream => {
                Some(Response::Stream(Box::new(chunks.into_iter().map(Ok))))
            }
            Some(CacheEntry::Stream { .. }) | None => None,
        };
        Ok(response)
    }

    /// Run `attempt` under the rate limit, retrying rate-limit rejections.
    fn with_retries<T>(&self, mut attempt: impl FnMut() -> std::result::Result<T, ProviderError>) -> Result<T> {
        let mut rejections = 0u32;
        loop {
            let waited = self.limiter.acquire();
            if waited >= Duration::from_millis(10) {
                warn!("rate limit budget exhausted, waited {:?}", waited);
                self.record(
                    EventAction::RateLimitWait,
                    json!({ "waited_ms": waited.as_millis() as u64 }),
                );
            }

            match attempt() {
                Ok(value) => return Ok(value),
                Err(ProviderError::RateLimited(message)) => {
                    rejections += 1;
                    if rejections > self.settings.max_retries {
                        return Err(WeaveError::RetryExhausted {
                            max_retries: self.settings.max_retries,
                        });
                    }
                    warn!(
                        "provider rate limited ({}), retry {} of {} in {:?}",
                        message, rejections, self.settings.max_retries, self.settings.retry_backoff
                    );
                    self.record(
                        EventAction::Retry,
                        json!({ "attempt": rejections, "reason": message }),
                    );
                    thread::sleep(self.settings.retry_backoff);
                }
                Err(ProviderError::Failed(e)) => return Err(WeaveError::Provider(e)),
            }
        }
    }

    fn record_call(&self, request: &CallRequest, stream: bool) {
        self.record(
            EventAction::ModelCall,
            json!({
                "provider": self.provider.name(),
                "n": request.n,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "stream": stream,
                "prompt_bytes": request.prompt.len(),
            }),
        );
    }
}

/// Passes deltas through and stores them once the stream reaches its end.
struct RecordingStream {
    inner: ChunkStream,
    saved: Vec<Completion>,
    target: Option<(String, Arc<dyn CacheStore>)>,
    finished: bool,
}

impl Iterator for RecordingStream {
    type Item = Result<Completion>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Ok(chunk)) => {
                if self.target.is_some() {
                    self.saved.push(chunk.clone());
                }
                Some(Ok(chunk))
            }
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(match e {
                    ProviderError::RateLimited(message) => WeaveError::Provider(anyhow::anyhow!(
                        "rate limited mid-stream: {}",
                        message
                    )),
                    ProviderError::Failed(e) => WeaveError::Provider(e),
                }))
            }
            None => {
                self.finished = true;
                let (key, cache) = self.target.take()?;
                let entry = CacheEntry::Stream {
                    chunks: std::mem::take(&mut self.saved),
                };
                cache.put(&key, &entry).err().map(Err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use std::time::Instant;

    fn fast_settings(max_retries: u32) -> SessionSettings {
        SessionSettings {
            caching: true,
            max_retries,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn drain(response: Response) -> Vec<Completion> {
        match response {
            Response::Stream(chunks) => chunks.collect::<Result<Vec<_>>>().unwrap(),
            Response::Complete(c) => vec![c],
        }
    }

    #[test]
    fn complete_call_is_cached() {
        let mock = Arc::new(MockProvider::with_output(" Sue"));
        let session = Session::new(mock.clone());
        let request = CallRequest::new("Hello my name is");

        let first = session.call(&request, false, None).unwrap();
        let second = session.call(&request, false, None).unwrap();

        assert_eq!(mock.call_count(), 1);
        match (first, second) {
            (Response::Complete(a), Response::Complete(b)) => assert_eq!(a, b),
            other => panic!("unexpected responses: {:?}", other),
        }
    }

    #[test]
    fn caching_override_skips_cache() {
        let mock = Arc::new(MockProvider::with_output("x"));
        let session = Session::new(mock.clone());
        let request = CallRequest::new("p");

        session.call(&request, false, Some(false)).unwrap();
        session.call(&request, false, Some(false)).unwrap();

        assert_eq!(mock.call_count(), 2);
        assert_eq!(session.cache().len().unwrap(), 0);
    }

    #[test]
    fn stream_is_saved_only_after_drain() {
        let mock = Arc::new(MockProvider::with_output(" one two three"));
        let session = Session::new(mock.clone());
        let request = CallRequest::new("p");

        let mut partial = match session.call(&request, true, None).unwrap() {
            Response::Stream(s) => s,
            other => panic!("expected stream, got {:?}", other),
        };
        partial.next().unwrap().unwrap();
        drop(partial);
        assert_eq!(session.cache().len().unwrap(), 0);

        let chunks = drain(session.call(&request, true, None).unwrap());
        assert_eq!(chunks.len(), 3);
        assert_eq!(session.cache().len().unwrap(), 1);

        let replayed = drain(session.call(&request, true, None).unwrap());
        assert_eq!(replayed, chunks);
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn complete_entry_answers_streamed_lookup_but_not_vice_versa() {
        let mock = Arc::new(MockProvider::with_output("a b"));
        let session = Session::new(mock.clone());

        let complete_req = CallRequest::new("complete first");
        session.call(&complete_req, false, None).unwrap();
        let replay = drain(session.call(&complete_req, true, None).unwrap());
        assert_eq!(replay, vec![Completion::single("a b")]);
        assert_eq!(mock.call_count(), 1);

        let stream_req = CallRequest::new("stream first");
        drain(session.call(&stream_req, true, None).unwrap());
        session.call(&stream_req, false, None).unwrap();
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn unsupported_features_fail_before_calling() {
        let mock = Arc::new(MockProvider::new());
        let session = Session::new(mock.clone());

        let mut request = CallRequest::new("p");
        request.pattern = Some("[0-9]+".to_string());
        let err = session.call(&request, false, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "model provider 'mock' does not support pattern constraints"
        );

        let mut request = CallRequest::new("p");
        request.token_healing = Some(true);
        assert!(matches!(
            session.call(&request, false, None).unwrap_err(),
            WeaveError::UnsupportedFeature {
                feature: Feature::TokenHealing,
                ..
            }
        ));

        let mut request = CallRequest::new("p");
        request.stop_regex = Some(r"\d".to_string());
        assert!(matches!(
            session.call(&request, false, None).unwrap_err(),
            WeaveError::UnsupportedFeature {
                feature: Feature::StopRegex,
                ..
            }
        ));

        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn debug_names_provider_without_internals() {
        let session = Session::new(Arc::new(MockProvider::new()));
        let rendered = format!("{:?}", session);
        assert!(rendered.starts_with("Session"));
        assert!(rendered.contains("\"mock\""));
    }

    #[test]
    fn token_healing_false_needs_no_support() {
        let session = Session::new(Arc::new(MockProvider::new()));
        let mut request = CallRequest::new("p");
        request.token_healing = Some(false);
        assert!(session.call(&request, false, None).is_ok());
    }

    #[test]
    fn rate_limited_attempts_are_retried() {
        let mock = Arc::new(MockProvider::with_output("ok").rate_limited_for(2));
        let session = Session::new(mock.clone()).with_settings(fast_settings(5));

        let response = session.call(&CallRequest::new("p"), false, None).unwrap();
        assert!(matches!(response, Response::Complete(_)));
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let mock = Arc::new(MockProvider::with_output("ok").rate_limited_for(10));
        let session = Session::new(mock.clone()).with_settings(fast_settings(2));

        let err = session.call(&CallRequest::new("p"), false, None).unwrap_err();
        assert!(matches!(err, WeaveError::RetryExhausted { max_retries: 2 }));
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn other_provider_errors_are_not_retried() {
        let mock = Arc::new(MockProvider::new().failing("backend down"));
        let session = Session::new(mock.clone()).with_settings(fast_settings(5));

        let err = session.call(&CallRequest::new("p"), false, None).unwrap_err();
        assert!(matches!(err, WeaveError::Provider(_)));
        assert!(err.to_string().contains("backend down"));
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn calls_respect_rate_limit_window() {
        let mock = Arc::new(MockProvider::new());
        let session = Session::new(mock.clone())
            .with_rate_limiter(Arc::new(RateLimiter::new(2, Duration::from_millis(200))));

        let started = Instant::now();
        for i in 0..3 {
            session
                .call(&CallRequest::new(format!("prompt {}", i)), false, Some(false))
                .unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn journal_records_calls_and_hits() {
        let dir = tempfile::TempDir::new().unwrap();
        let journal = Arc::new(Journal::new(dir.path().join("journal.ndjson")));
        let session = Session::new(Arc::new(MockProvider::new())).with_journal(journal.clone());

        let request = CallRequest::new("p");
        session.call(&request, false, None).unwrap();
        session.call(&request, false, None).unwrap();

        let actions: Vec<EventAction> = journal
            .read_all()
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![EventAction::ModelCall, EventAction::CacheHit]);
    }
}
