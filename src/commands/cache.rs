//! Implementation of the `tagweave cache` commands.

use crate::config::Config;
use crate::error::Result;
use std::path::Path;

fn location(config: &Config) -> String {
    match config.cache_dir.trim() {
        "" => "(in memory)".to_string(),
        dir => dir.to_string(),
    }
}

/// Execute the `tagweave cache stats` command.
pub fn cmd_cache_stats(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = Config::resolve(config_path)?;
    let entries = config.cache().len()?;

    println!("Cache: {}", location(&config));
    println!("Entries: {}", entries);
    Ok(())
}

/// Execute the `tagweave cache clear` command.
pub fn cmd_cache_clear(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = Config::resolve(config_path)?;
    let removed = config.cache().clear()?;

    println!("Removed {} cached response(s) from {}", removed, location(&config));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CacheEntry, Completion};
    use crate::test_support::mock_config_yaml;
    use tempfile::TempDir;

    #[test]
    fn stats_and_clear_use_configured_cache() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("tagweave.yaml");
        std::fs::write(&config_path, mock_config_yaml(dir.path(), &[])).unwrap();

        let (config, _) = Config::resolve(Some(&config_path)).unwrap();
        let cache = config.cache();
        let entry = CacheEntry::Complete {
            completion: Completion::single("x"),
        };
        cache.put("a", &entry).unwrap();
        cache.put("b", &entry).unwrap();

        cmd_cache_stats(Some(&config_path)).unwrap();
        cmd_cache_clear(Some(&config_path)).unwrap();
        assert!(config.cache().is_empty().unwrap());
    }

    #[test]
    fn memory_cache_location() {
        let config = Config::from_yaml("cache_dir: \"\"").unwrap();
        assert_eq!(location(&config), "(in memory)");
    }
}
