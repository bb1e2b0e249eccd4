//! Command implementations for tagweave.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations, plus the input helpers they share.

mod cache;
mod check;
mod run;

use crate::cli::{CacheAction, Command};
use crate::error::{Result, WeaveError};
use std::io::Read;
use std::path::Path;

/// Dispatch a command to its implementation.
///
/// `config` is the `--config` path, if one was given.
pub fn dispatch(command: Command, config: Option<&Path>) -> Result<()> {
    match command {
        Command::Run(args) => run::cmd_run(args, config),
        Command::Check(args) => check::cmd_check(args),
        Command::Cache(cache_cmd) => match cache_cmd.action {
            CacheAction::Stats => cache::cmd_cache_stats(config),
            CacheAction::Clear => cache::cmd_cache_clear(config),
        },
    }
}

/// Read a template from a file, or from stdin for `-`.
fn read_template(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .map_err(|e| WeaveError::UserError(format!("failed to read template from stdin: {}", e)))?;
        return Ok(source);
    }

    std::fs::read_to_string(path).map_err(|e| {
        WeaveError::UserError(format!(
            "failed to read template '{}': {}",
            path.display(),
            e
        ))
    })
}
