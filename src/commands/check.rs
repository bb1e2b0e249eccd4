//! Implementation of the `tagweave check` command.
//!
//! Parses a template and reports its tags without executing anything. Tags
//! that are neither registered nor plain variable references are errors.

use super::read_template;
use crate::cli::CheckArgs;
use crate::error::{Result, WeaveError};
use crate::grammar::{Node, parse};
use crate::library::Registry;
use std::collections::BTreeMap;

/// Execute the `tagweave check` command.
pub fn cmd_check(args: CheckArgs) -> Result<()> {
    let source = read_template(&args.file)?;
    let summary = summarize(&source, &Registry::builtins())?;

    println!("{}: ok", args.file.display());
    println!("  nodes: {}", summary.nodes);
    for (name, count) in &summary.tags {
        println!("  {:<12} {}", name, count);
    }
    if !summary.references.is_empty() {
        let names: Vec<&str> = summary.references.keys().map(String::as_str).collect();
        println!("  variables: {}", names.join(", "));
    }
    Ok(())
}

/// What a template contains.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Summary {
    pub nodes: usize,
    /// Registered tag name -> number of uses.
    pub tags: BTreeMap<String, usize>,
    /// Variable reference -> number of uses.
    pub references: BTreeMap<String, usize>,
}

pub(crate) fn summarize(source: &str, registry: &Registry) -> Result<Summary> {
    let template = parse(source)?;
    let mut summary = Summary::default();
    walk(&template.nodes, registry, &mut summary)?;
    Ok(summary)
}

fn walk(nodes: &[Node], registry: &Registry, summary: &mut Summary) -> Result<()> {
    for node in nodes {
        summary.nodes += 1;
        let Node::Tag(tag) = node else {
            continue;
        };

        if registry.contains(&tag.name) {
            *summary.tags.entry(tag.name.clone()).or_default() += 1;
        } else if tag.args.is_empty() && !tag.is_block() {
            *summary.references.entry(tag.name.clone()).or_default() += 1;
        } else {
            return Err(WeaveError::Configuration(format!(
                "unknown tag '{}' in {}",
                tag.name, tag.source
            )));
        }

        if let Some(body) = &tag.body {
            for section in &body.sections {
                walk(section, registry, summary)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_tags_and_references() {
        let summary = summarize(
            "Hi {{name}}{{#each items}}- {{this}}{{gen 'x'}}{{/each}}{{gen 'y'}}",
            &Registry::builtins(),
        )
        .unwrap();
        assert_eq!(summary.tags.get("gen"), Some(&2));
        assert_eq!(summary.tags.get("each"), Some(&1));
        assert_eq!(summary.references.get("name"), Some(&1));
        assert_eq!(summary.references.get("this"), Some(&1));
        assert_eq!(summary.nodes, 7);
    }

    #[test]
    fn unknown_tags_are_reported() {
        let err = summarize("{{frob 1}}", &Registry::builtins()).unwrap_err();
        assert!(err.to_string().contains("unknown tag 'frob'"));
    }

    #[test]
    fn syntax_errors_propagate() {
        let err = summarize("{{/each}}", &Registry::builtins()).unwrap_err();
        assert!(matches!(err, WeaveError::Syntax { .. }));
    }
}
