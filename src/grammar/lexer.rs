//! Tokenizer for the inside of a tag: `gen 'name' max_tokens=5 stop="\n"`.

use crate::error::{Result, WeaveError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Eq,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Absolute byte offset in the template source.
    pub offset: usize,
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '@'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '@' || ch == '.'
}

/// Split a tag body into tokens. `base` is the body's offset in `source`,
/// which is only used to report error positions.
pub(crate) fn lex_tag(source: &str, body: &str, base: usize) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        let offset = base + pos;
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token {
                    kind: TokenKind::Eq,
                    offset,
                });
            }
            '(' => {
                chars.next();
                tokens.push(Token {
                    kind: TokenKind::LParen,
                    offset,
                });
            }
            ')' => {
                chars.next();
                tokens.push(Token {
                    kind: TokenKind::RParen,
                    offset,
                });
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, 'r')) => value.push('\r'),
                            Some((_, other)) => value.push(other),
                            None => break,
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(WeaveError::syntax_at(
                        source,
                        offset,
                        "unterminated string literal",
                    ));
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    offset,
                });
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' || (c == '-' && text.is_empty()) {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let kind = if text.contains('.') {
                    text.parse::<f64>().map(TokenKind::Float).ok()
                } else {
                    text.parse::<i64>().map(TokenKind::Int).ok()
                };
                match kind {
                    Some(kind) => tokens.push(Token { kind, offset }),
                    None => {
                        return Err(WeaveError::syntax_at(
                            source,
                            offset,
                            format!("invalid number '{}'", text),
                        ));
                    }
                }
            }
            c if is_ident_start(c) => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if is_ident_continue(c) {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(name),
                    offset,
                });
            }
            other => {
                return Err(WeaveError::syntax_at(
                    source,
                    offset,
                    format!("unexpected character '{}' in tag", other),
                ));
            }
        }
    }

    Ok(tokens)
}
