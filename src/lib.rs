//! Tagweave: a handlebars-style template interpreter that drives generative
//! model calls.
//!
//! A template interleaves literal text with tags. Executing it walks the tree
//! in order, calling the model where `gen` or `select` asks for it, and yields
//! the completed text plus the variables the tags captured.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod grammar;
pub mod journal;
pub mod library;
pub mod llm;
pub mod program;
pub mod variables;

#[cfg(test)]
mod test_support;
