//! CLI argument parsing for tagweave.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tagweave: run handlebars-style templates against a generative model.
///
/// Templates interleave literal text with tags such as `{{gen 'name'}}`,
/// `{{#each items}}` and `{{#if cond}}`. Generated values are captured as
/// named variables and the completed text is printed.
#[derive(Parser, Debug)]
#[command(name = "tagweave")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: $TAGWEAVE_CONFIG, then ./tagweave.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug diagnostics to stderr (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for tagweave.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a template and print the result.
    ///
    /// Model calls go to the configured provider and are cached under
    /// `cache_dir` unless caching is disabled.
    Run(RunArgs),

    /// Parse a template and summarise its tags without calling a model.
    Check(CheckArgs),

    /// Response cache commands.
    Cache(CacheCommand),
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Template file to execute ("-" reads stdin).
    pub file: PathBuf,

    /// Initial variable as NAME=VALUE. VALUE is parsed as JSON when it can be,
    /// otherwise taken as a string.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Stream generated text as it arrives.
    #[arg(long)]
    pub stream: bool,

    /// Print the output with bookkeeping markers and comments.
    #[arg(long, conflicts_with = "json")]
    pub marked: bool,

    /// Print text, variables and completion status as JSON.
    #[arg(long)]
    pub json: bool,

    /// Neither read nor write the response cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Starting cache seed (overrides config).
    #[arg(long)]
    pub cache_seed: Option<u64>,
}

/// Arguments for the `check` command.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Template file to check ("-" reads stdin).
    pub file: PathBuf,
}

/// Cache subcommands.
#[derive(Parser, Debug)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Available cache actions.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show where the cache lives and how many entries it holds.
    Stats,

    /// Remove every cached response.
    Clear,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
