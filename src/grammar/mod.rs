//! Template grammar.
//!
//! Templates are plain text with embedded tags:
//!
//! ```text
//! {{#system~}}
//! You are a helpful assistant.
//! {{~/system}}
//! {{#user~}}
//! Name three {{topic}}.
//! {{~/user}}
//! {{#assistant~}}
//! {{gen 'answer' max_tokens=50 temperature=0.7}}
//! {{~/assistant}}
//! ```
//!
//! - `{{name args}}` - inline tag or variable reference
//! - `{{#name args}} ... {{/name}}` - block tag; `{{else}}` / `{{or}}` split sections
//! - `{{! text}}` and `{{!-- text --}}` - comments, kept in the marked output
//! - `{{~` / `~}}` - trim whitespace from the neighbouring literal text
//!
//! Arguments are strings, numbers, booleans, `null`, variable paths, `key=value`
//! pairs and parenthesised sub calls such as `(add x 1)`.

mod ast;
mod lexer;
mod parser;


pub use ast::{Arguments, Body, Comment, Expr, Literal, Node, Span, Tag, Template};
pub use parser::parse;
