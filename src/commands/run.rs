//! Implementation of the `tagweave run` command.

use super::read_template;
use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::{Result, WeaveError};
use crate::program::markers::plain_text;
use crate::program::{DisplayEvent, Executed, Program};
use log::{info, warn};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Execute the `tagweave run` command.
pub fn cmd_run(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    let (config, source_path) = Config::resolve(config_path)?;
    if let Some(path) = &source_path {
        info!("using config {}", path.display());
    }

    let live = args.stream && !args.json && !args.marked;
    let executed = execute(&args, &config, live)?;

    if args.json {
        let report = json!({
            "text": executed.text(),
            "variables": executed.variables,
            "completed": executed.completed,
        });
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|e| WeaveError::UserError(format!("failed to render JSON output: {}", e)))?;
        println!("{}", rendered);
    } else if args.marked {
        println!("{}", executed.marked_text);
    } else if live {
        // Text was already printed as it streamed.
        println!();
    } else {
        println!("{}", executed.text());
    }

    if !executed.completed {
        warn!("run stopped before the end of the template");
        eprintln!("Note: the run stopped before the end of the template");
    }
    Ok(())
}

/// Build and run the program described by `args`.
///
/// With `live` set, visible text is written to stdout as it is produced.
pub(crate) fn execute(args: &RunArgs, config: &Config, live: bool) -> Result<Executed> {
    let source = read_template(&args.file)?;
    let variables = parse_vars(&args.vars)?;

    let mut options = config.program_options();
    options.stream |= args.stream;
    if args.no_cache {
        options.caching = Some(false);
    }
    if let Some(seed) = args.cache_seed {
        options.cache_seed = seed;
    }

    let session = Arc::new(config.session()?);
    let mut program = Program::new(&source)?
        .with_session(session)
        .with_variables(variables)
        .with_options(options);

    if live {
        program = program.on_display(|event| {
            if let DisplayEvent::Partial(fragment) = event {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(plain_text(fragment).as_bytes());
                let _ = stdout.flush();
            }
        });
    }

    program.run().map_err(|failed| {
        if !failed.partial.marked_text.is_empty() {
            eprintln!("Partial output:\n{}", failed.partial.text());
        }
        failed.error
    })
}

/// Parse `NAME=VALUE` pairs. Values that parse as JSON keep their type.
pub(crate) fn parse_vars(pairs: &[String]) -> Result<BTreeMap<String, Value>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, raw) = pair.split_once('=').ok_or_else(|| {
                WeaveError::UserError(format!(
                    "invalid --var '{}': expected NAME=VALUE",
                    pair
                ))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(WeaveError::UserError(format!(
                    "invalid --var '{}': name is empty",
                    pair
                )));
            }
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((name.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{EventAction, Journal};
    use crate::test_support::mock_config_yaml;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn run_args(file: PathBuf) -> RunArgs {
        RunArgs {
            file,
            vars: Vec::new(),
            stream: false,
            marked: false,
            json: false,
            no_cache: false,
            cache_seed: None,
        }
    }

    fn setup(outputs: &[&str], template: &str) -> (TempDir, Config, PathBuf) {
        let dir = TempDir::new().unwrap();
        let config = Config::from_yaml(&mock_config_yaml(dir.path(), outputs)).unwrap();
        let file = dir.path().join("template.hbs");
        std::fs::write(&file, template).unwrap();
        (dir, config, file)
    }

    #[test]
    fn parse_vars_keeps_json_types() {
        let vars = parse_vars(&[
            "name=Sue".to_string(),
            "count=3".to_string(),
            "items=[\"a\",\"b\"]".to_string(),
            "eq=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(vars["name"], json!("Sue"));
        assert_eq!(vars["count"], json!(3));
        assert_eq!(vars["items"], json!(["a", "b"]));
        assert_eq!(vars["eq"], json!("a=b"));
    }

    #[test]
    fn parse_vars_rejects_malformed_pairs() {
        assert!(parse_vars(&["novalue".to_string()]).is_err());
        assert!(parse_vars(&["=x".to_string()]).is_err());
    }

    #[test]
    fn execute_runs_template_with_vars() {
        let (_dir, config, file) = setup(&[" Sue"], "{{greeting}} my name is{{gen 'name'}}");
        let mut args = run_args(file);
        args.vars = vec!["greeting=Hello".to_string()];

        let executed = execute(&args, &config, false).unwrap();
        assert_eq!(executed.text(), "Hello my name is Sue");
        assert_eq!(executed.get("name"), Some(&json!(" Sue")));
    }

    #[test]
    fn execute_fills_disk_cache_and_journal() {
        let (dir, config, file) = setup(&[" Sue"], "Hello my name is{{gen 'name'}}");
        let args = run_args(file);

        execute(&args, &config, false).unwrap();
        execute(&args, &config, false).unwrap();
        assert_eq!(config.cache().len().unwrap(), 1);

        let journal = Journal::new(dir.path().join("journal.ndjson"));
        let actions: Vec<EventAction> = journal
            .read_all()
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&EventAction::ModelCall));
        assert!(actions.contains(&EventAction::CacheHit));
    }

    #[test]
    fn no_cache_leaves_cache_empty() {
        let (_dir, config, file) = setup(&[" Sue"], "Hello{{gen 'name'}}");
        let mut args = run_args(file);
        args.no_cache = true;

        execute(&args, &config, false).unwrap();
        assert!(config.cache().is_empty().unwrap());
    }

    #[test]
    fn missing_template_is_user_error() {
        let (dir, config, _) = setup(&[], "");
        let args = run_args(dir.path().join("absent.hbs"));
        let err = execute(&args, &config, false).unwrap_err();
        assert!(matches!(err, WeaveError::UserError(_)));
        assert_eq!(err.exit_code(), crate::exit_codes::USER_ERROR);
    }

    #[test]
    fn syntax_error_maps_to_template_exit_code() {
        let (_dir, config, file) = setup(&[], "{{#if x}}open");
        let err = execute(&run_args(file), &config, false).unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::TEMPLATE_ERROR);
    }

    #[test]
    fn cmd_run_with_explicit_config() {
        let (dir, _, file) = setup(&[" Sue"], "Hello{{gen 'name'}}");
        let config_path = dir.path().join("tagweave.yaml");
        std::fs::write(&config_path, mock_config_yaml(dir.path(), &[" Sue"])).unwrap();

        let mut args = run_args(file);
        args.json = true;
        cmd_run(args, Some(&config_path)).unwrap();
    }
}
