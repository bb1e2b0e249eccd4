//! Append-only run journal.
//!
//! Model-call activity is recorded as NDJSON (one JSON object per line) in the
//! file named by `journal:` in the config.
//!
//! # Event Format
//!
//! - `ts`: RFC3339 timestamp
//! - `action`: `run_start`, `run_complete`, `model_call`, `cache_hit`, `rate_limit_wait`, `retry`
//! - `actor`: `user@HOST`
//! - `details`: freeform object with action-specific details
//!
//! Journal failures never fail a run; callers log them as warnings.

use crate::error::{Result, WeaveError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    RunStart,
    RunComplete,
    /// A provider call that reached the model.
    ModelCall,
    CacheHit,
    RateLimitWait,
    Retry,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::RunStart => write!(f, "run_start"),
            EventAction::RunComplete => write!(f, "run_complete"),
            EventAction::ModelCall => write!(f, "model_call"),
            EventAction::CacheHit => write!(f, "cache_hit"),
            EventAction::RateLimitWait => write!(f, "rate_limit_wait"),
            EventAction::Retry => write!(f, "retry"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub action: EventAction,
    pub actor: String,
    pub details: Value,
}

impl Event {
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: actor_string(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| WeaveError::UserError(format!("failed to serialize journal event: {}", e)))
    }
}

fn actor_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

/// Handle on a journal file. Appends from concurrent runs are serialized.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single line.
    pub fn append(&self, event: &Event) -> Result<()> {
        let line = event.to_ndjson_line()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                WeaveError::UserError(format!(
                    "failed to create journal directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                WeaveError::UserError(format!(
                    "failed to open journal '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        writeln!(file, "{}", line)
            .map_err(|e| WeaveError::UserError(format!("failed to write journal event: {}", e)))
    }

    /// Append an event, downgrading failures to a warning.
    pub fn record(&self, action: EventAction, details: Value) {
        let event = Event::new(action).with_details(details);
        if let Err(e) = self.append(&event) {
            log::warn!("journal write failed: {}", e);
        }
    }

    /// Read every event back, in append order.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            WeaveError::UserError(format!(
                "failed to read journal '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| {
                    WeaveError::UserError(format!(
                        "failed to parse journal line {}: {}",
                        i + 1,
                        e
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn event_serializes_to_single_line() {
        let event = Event::new(EventAction::ModelCall).with_details(json!({"n": 1}));
        let line = event.to_ndjson_line().unwrap();

        assert!(!line.contains('\n'));
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["action"], "model_call");
        assert_eq!(parsed["details"]["n"], 1);
        assert!(parsed["actor"].as_str().unwrap().contains('@'));
    }

    #[test]
    fn action_display_matches_serde() {
        for action in [
            EventAction::RunStart,
            EventAction::RunComplete,
            EventAction::ModelCall,
            EventAction::CacheHit,
            EventAction::RateLimitWait,
            EventAction::Retry,
        ] {
            let serialized = serde_json::to_value(action).unwrap();
            assert_eq!(serialized, Value::String(action.to_string()));
        }
    }

    #[test]
    fn append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path().join("logs").join("journal.ndjson"));

        journal.record(EventAction::RunStart, json!({"template_bytes": 10}));
        journal.record(EventAction::CacheHit, json!({"key": "abc"}));

        let events = journal.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::RunStart);
        assert_eq!(events[1].details["key"], "abc");
    }

    #[test]
    fn missing_journal_reads_empty() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path().join("none.ndjson"));
        assert!(journal.read_all().unwrap().is_empty());
    }

    #[test]
    fn corrupt_line_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.ndjson");
        fs::write(&path, "not json\n").unwrap();

        let err = Journal::new(&path).read_all().unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
