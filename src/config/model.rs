//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for tagweave runs.
///
/// This struct represents the contents of `tagweave.yaml`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Provider settings
    // =========================================================================
    /// The model provider programs are bound to.
    pub provider: ProviderConfig,

    // =========================================================================
    // Call budget settings
    // =========================================================================
    /// Ceiling on provider attempts in any trailing 60 second window.
    #[serde(default = "default_max_calls_per_min")]
    pub max_calls_per_min: usize,

    /// Consecutive rate-limit rejections tolerated before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between rate-limited attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    // =========================================================================
    // Cache settings
    // =========================================================================
    /// Whether model calls are answered from and stored in the cache.
    #[serde(default = "default_true")]
    pub caching: bool,

    /// Directory for cached responses. Empty keeps the cache in memory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Optional NDJSON journal of model calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,

    // =========================================================================
    // Run settings
    // =========================================================================
    /// Stream single-completion generations.
    #[serde(default)]
    pub stream: bool,

    /// Starting value of the per-run cache-seed counter.
    #[serde(default)]
    pub cache_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            max_calls_per_min: default_max_calls_per_min(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            caching: default_true(),
            cache_dir: default_cache_dir(),
            journal: None,
            stream: false,
            cache_seed: 0,
        }
    }
}

/// The `provider:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Command line for `kind: command`, with `{max_tokens}`-style placeholders.
    #[serde(default)]
    pub command: String,

    /// Kill the command after this many seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Exit code the command uses to signal a rate-limit rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_exit_code: Option<i32>,

    /// Text opening a chat role block; `{role}` is replaced by the role name.
    #[serde(default = "default_role_start")]
    pub role_start: String,

    /// Text closing a chat role block.
    #[serde(default = "default_role_end")]
    pub role_end: String,

    /// Canned outputs for `kind: mock`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mock_outputs: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            command: String::new(),
            timeout_seconds: default_timeout_seconds(),
            rate_limit_exit_code: None,
            role_start: default_role_start(),
            role_end: default_role_end(),
            mock_outputs: Vec::new(),
        }
    }
}
