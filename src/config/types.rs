//! Configuration types and defaults for tagweave.
//!
//! This module defines enums and default value functions used by the Config
//! struct.

use serde::{Deserialize, Serialize};

/// Which model provider a config binds programs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Pipe prompts through a shell command (default).
    #[default]
    Command,
    /// Deterministic canned outputs, for dry runs and tests.
    Mock,
}

// Default value functions for serde
pub(crate) fn default_timeout_seconds() -> u64 {
    600
}
pub(crate) fn default_role_start() -> String {
    "<|im_start|>{role}\n".to_string()
}
pub(crate) fn default_role_end() -> String {
    "<|im_end|>".to_string()
}
pub(crate) fn default_max_calls_per_min() -> usize {
    60
}
pub(crate) fn default_max_retries() -> u32 {
    5
}
pub(crate) fn default_retry_backoff_ms() -> u64 {
    3000
}
pub(crate) fn default_cache_dir() -> String {
    ".tagweave/cache".to_string()
}
pub(crate) fn default_true() -> bool {
    true
}
