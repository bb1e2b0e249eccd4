//! `{placeholder}` substitution for provider command lines.
//!
//! A command template such as `my-model --max-tokens {max_tokens} --stop {stop}`
//! is filled from the request parameters before being split into argv.
//!
//! - `{name}` - substitutes the parameter, shell-quoted so values with spaces stay one argument
//! - `{{` / `}}` - literal `{` / `}`
//!
//! Unknown placeholders are errors rather than silent blanks.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder '{name}' at position {position} in command template")]
    UnknownPlaceholder { name: String, position: usize },

    #[error("unmatched '{{' at position {position} in command template")]
    UnmatchedBrace { position: usize },

    #[error("empty placeholder '{{}}' at position {position} in command template")]
    EmptyPlaceholder { position: usize },
}

/// Fill a command template from `values`, quoting each substituted value.
pub fn render_template(
    template: &str,
    values: &HashMap<&str, String>,
) -> Result<String, TemplateError> {
    let mut rendered = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                rendered.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, c)) => name.push(c),
                        None => return Err(TemplateError::UnmatchedBrace { position: pos }),
                    }
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(TemplateError::EmptyPlaceholder { position: pos });
                }
                let value = values
                    .get(name)
                    .ok_or_else(|| TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                        position: pos,
                    })?;
                rendered.push_str(&shell_words::quote(value));
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                }
                rendered.push('}');
            }
            _ => rendered.push(ch),
        }
    }

    Ok(rendered)
}
