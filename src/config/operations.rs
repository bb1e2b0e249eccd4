//! Config loading, resolution, validation, and session construction.

use super::model::Config;
use super::types::ProviderKind;
use crate::error::{Result, WeaveError};
use crate::journal::Journal;
use crate::llm::{
    CacheStore, CommandProvider, DiskCache, MemoryCache, MockProvider, Provider, RateLimiter,
    Session, SessionSettings,
};
use crate::program::ProgramOptions;
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "TAGWEAVE_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tagweave.yaml";

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(WeaveError::UserError)` - Read or parse error, or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            WeaveError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Find and load the config for this process.
    ///
    /// Order: `explicit` path, then `$TAGWEAVE_CONFIG`, then `./tagweave.yaml`
    /// if it exists, then defaults. Returns the path the config came from.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let candidate = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .or_else(|| {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                local.is_file().then_some(local)
            });

        match candidate {
            Some(path) => {
                debug!("loading config from {}", path.display());
                let config = Self::load(&path)?;
                Ok((config, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Parse config from a YAML string.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| WeaveError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| WeaveError::UserError(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `max_calls_per_min` must be positive
    /// - `provider.timeout_seconds` must be positive
    /// - a `provider.command` must render and split cleanly
    pub fn validate(&self) -> Result<()> {
        if self.max_calls_per_min == 0 {
            return Err(WeaveError::UserError(
                "config validation failed: max_calls_per_min must be greater than 0".to_string(),
            ));
        }

        if self.provider.timeout_seconds == 0 {
            return Err(WeaveError::UserError(
                "config validation failed: provider.timeout_seconds must be greater than 0"
                    .to_string(),
            ));
        }

        if self.provider.kind == ProviderKind::Command && !self.provider.command.trim().is_empty() {
            self.command_provider().check().map_err(|e| {
                WeaveError::UserError(format!(
                    "config validation failed: provider.command is invalid: {}",
                    e
                ))
            })?;
        }

        Ok(())
    }

    /// Settings for the session's retry and caching behaviour.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            caching: self.caching,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Run options derived from config.
    pub fn program_options(&self) -> ProgramOptions {
        ProgramOptions {
            stream: self.stream,
            cache_seed: self.cache_seed,
            ..ProgramOptions::default()
        }
    }

    /// The response cache: on disk under `cache_dir`, or in memory when it is empty.
    pub fn cache(&self) -> Arc<dyn CacheStore> {
        match self.cache_dir.trim() {
            "" => Arc::new(MemoryCache::new()),
            dir => Arc::new(DiskCache::new(dir)),
        }
    }

    /// The configured provider.
    pub fn provider(&self) -> Arc<dyn Provider> {
        match self.provider.kind {
            ProviderKind::Command => Arc::new(self.command_provider()),
            ProviderKind::Mock => Arc::new(MockProvider::with_outputs(
                self.provider.mock_outputs.clone(),
            )),
        }
    }

    /// A session wired from this config: provider, cache, rate limiter, journal.
    ///
    /// Fails when `kind: command` has no command configured.
    pub fn session(&self) -> Result<Session> {
        if self.provider.kind == ProviderKind::Command && self.provider.command.trim().is_empty() {
            return Err(WeaveError::UserError(
                "no provider command configured: set provider.command in tagweave.yaml \
                 or use provider.kind: mock"
                    .to_string(),
            ));
        }
        let mut session = Session::new(self.provider())
            .with_cache(self.cache())
            .with_rate_limiter(Arc::new(RateLimiter::per_minute(self.max_calls_per_min)))
            .with_settings(self.session_settings());
        if let Some(journal) = &self.journal {
            session = session.with_journal(Arc::new(Journal::new(journal)));
        }
        Ok(session)
    }

    fn command_provider(&self) -> CommandProvider {
        let provider = &self.provider;
        let command = CommandProvider::new(&provider.command)
            .with_timeout(Duration::from_secs(provider.timeout_seconds))
            .with_role_tokens(&provider.role_start, &provider.role_end);
        match provider.rate_limit_exit_code {
            Some(code) => command.with_rate_limit_exit_code(code),
            None => command,
        }
    }
}
