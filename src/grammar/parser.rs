//! Template parser.
//!
//! The source is walked once, splitting it into literal text, comments and tags.
//! Open block tags live on `stack`; nodes are appended to the current section of
//! the innermost open block (or to the root) until the matching `{{/name}}` pops it.

use super::ast::{Arguments, Body, Comment, Expr, Literal, Node, Span, Tag, Template};
use super::lexer::{Token, TokenKind, lex_tag};
use crate::error::{Result, WeaveError};
use serde_json::Value;

/// Tags that split a block body into sections.
const SEPARATORS: &[&str] = &["else", "or"];

struct Frame {
    name: String,
    args: Arguments,
    source: String,
    open: usize,
    finished: Vec<Vec<Node>>,
    separators: Vec<String>,
    current: Vec<Node>,
}

struct Parser<'s> {
    source: &'s str,
    root: Vec<Node>,
    stack: Vec<Frame>,
}

/// Position and shape of one `{{ ... }}` occurrence.
struct Window<'s> {
    /// Inner text with whitespace-control markers removed.
    body: &'s str,
    body_start: usize,
    span: Span,
    trim_left: bool,
    trim_right: bool,
    comment: bool,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            root: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn target(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(frame) => &mut frame.current,
            None => &mut self.root,
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> WeaveError {
        WeaveError::syntax_at(self.source, offset, message)
    }

    fn parse(mut self) -> Result<Template> {
        let source = self.source;
        let mut cursor = 0usize;
        let mut trim_next = false;

        loop {
            let open = source[cursor..].find("{{").map(|i| cursor + i);
            let text_end = open.unwrap_or(source.len());

            if let Some(stray) = source[cursor..text_end].find("}}") {
                return Err(self.error(cursor + stray, "unmatched '}}' outside of a tag"));
            }
            self.push_literal(cursor, text_end, trim_next);

            let Some(open) = open else {
                break;
            };

            let window = self.read_window(open)?;
            if window.trim_left {
                trim_trailing_whitespace(self.target());
            }
            trim_next = window.trim_right;
            cursor = window.span.end;

            if window.comment {
                let comment = Comment {
                    text: source[window.span.start..window.span.end].to_string(),
                    span: window.span,
                };
                self.target().push(Node::Comment(comment));
            } else {
                self.handle_tag(&window)?;
            }
        }

        if let Some(frame) = self.stack.last() {
            return Err(self.error(
                frame.open,
                format!("unclosed block '{{{{#{}}}}}'", frame.name),
            ));
        }

        Ok(Template {
            nodes: self.root,
            source: source.to_string(),
        })
    }

    fn push_literal(&mut self, start: usize, end: usize, trim_start: bool) {
        let mut text = &self.source[start..end];
        let mut start = start;
        if trim_start {
            let trimmed = text.trim_start();
            start += text.len() - trimmed.len();
            text = trimmed;
        }
        if text.is_empty() {
            return;
        }
        self.target().push(Node::Literal(Literal {
            text: text.to_string(),
            span: Span::new(start, end),
        }));
    }

    /// Locate the end of the tag opened at `open` and classify it.
    fn read_window(&self, open: usize) -> Result<Window<'s>> {
        let source = self.source;
        let rest = &source[open..];

        let long_comment = rest.starts_with("{{!--") || rest.starts_with("{{~!--");
        let short_comment = !long_comment && (rest.starts_with("{{!") || rest.starts_with("{{~!"));

        let close = if long_comment {
            find_comment_close(rest).map(|i| open + i)
        } else if short_comment {
            rest[2..].find("}}").map(|i| open + 2 + i)
        } else {
            find_tag_close(rest).map(|i| open + i)
        };

        let Some(close) = close else {
            return Err(self.error(open, "unclosed tag: missing '}}'"));
        };

        let mut body_start = open + 2;
        let mut body_end = close;
        let trim_left = source[body_start..].starts_with('~');
        if trim_left {
            body_start += 1;
        }
        let trim_right = body_end > body_start && source[..body_end].ends_with('~');
        if trim_right {
            body_end -= 1;
        }

        Ok(Window {
            body: &source[body_start..body_end],
            body_start,
            span: Span::new(open, close + 2),
            trim_left,
            trim_right,
            comment: long_comment || short_comment,
        })
    }

    fn handle_tag(&mut self, window: &Window<'s>) -> Result<()> {
        let leading = window.body.len() - window.body.trim_start().len();
        let body = window.body.trim();
        let body_start = window.body_start + leading;
        let tag_source = self.source[window.span.start..window.span.end].to_string();

        if body.is_empty() {
            return Err(self.error(window.span.start, "empty tag"));
        }

        if let Some(rest) = body.strip_prefix('#') {
            let (name, args) = self.parse_call(rest, body_start + 1)?;
            self.stack.push(Frame {
                name,
                args,
                source: tag_source,
                open: window.span.start,
                finished: Vec::new(),
                separators: Vec::new(),
                current: Vec::new(),
            });
            return Ok(());
        }

        if let Some(rest) = body.strip_prefix('/') {
            let name = rest.trim();
            let Some(frame) = self.stack.pop() else {
                return Err(self.error(
                    window.span.start,
                    format!("closing tag '{}' has no open block", tag_source),
                ));
            };
            if frame.name != name {
                return Err(self.error(
                    window.span.start,
                    format!(
                        "closing tag '{}' does not match open block '{{{{#{}}}}}'",
                        tag_source, frame.name
                    ),
                ));
            }
            let mut sections = frame.finished;
            sections.push(frame.current);
            let tag = Tag {
                name: frame.name,
                args: frame.args,
                body: Some(Body {
                    sections,
                    separators: frame.separators,
                    closing: tag_source,
                }),
                source: frame.source,
                span: Span::new(frame.open, window.span.end),
            };
            self.target().push(Node::Tag(tag));
            return Ok(());
        }

        if SEPARATORS.contains(&body) {
            let Some(frame) = self.stack.last_mut() else {
                return Err(self.error(
                    window.span.start,
                    format!("'{}' used outside of a block", tag_source),
                ));
            };
            let section = std::mem::take(&mut frame.current);
            frame.finished.push(section);
            frame.separators.push(body.to_string());
            return Ok(());
        }

        let (name, args) = self.parse_call(body, body_start)?;
        self.target().push(Node::Tag(Tag {
            name,
            args,
            body: None,
            source: tag_source,
            span: window.span,
        }));
        Ok(())
    }

    /// Parse `name arg arg key=value` into a tag name and its arguments.
    fn parse_call(&self, body: &str, offset: usize) -> Result<(String, Arguments)> {
        let tokens = lex_tag(self.source, body, offset)?;
        let mut iter = TokenStream {
            tokens: &tokens,
            pos: 0,
            source: self.source,
            end: offset + body.len(),
        };
        let name = match iter.next() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => name.clone(),
            Some(token) => return Err(self.error(token.offset, "expected a tag name")),
            None => return Err(self.error(offset, "empty tag")),
        };
        let args = iter.arguments(false)?;
        Ok((name, args))
    }
}

struct TokenStream<'t> {
    tokens: &'t [Token],
    pos: usize,
    source: &'t str,
    end: usize,
}

impl<'t> TokenStream<'t> {
    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn peek(&self, ahead: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> WeaveError {
        WeaveError::syntax_at(self.source, offset, message)
    }

    /// Parse arguments until the end of the tag, or until `)` when `nested`.
    fn arguments(&mut self, nested: bool) -> Result<Arguments> {
        let mut args = Arguments::default();
        loop {
            match self.peek(0) {
                None if nested => return Err(self.error(self.end, "missing ')'")),
                None => return Ok(args),
                Some(Token {
                    kind: TokenKind::RParen,
                    offset,
                }) => {
                    if nested {
                        self.pos += 1;
                        return Ok(args);
                    }
                    return Err(self.error(*offset, "unexpected ')'"));
                }
                Some(Token {
                    kind: TokenKind::Ident(key),
                    ..
                }) if matches!(self.peek(1).map(|t| &t.kind), Some(TokenKind::Eq)) => {
                    self.pos += 2;
                    let value = self.value()?;
                    args.keyword.push((key.clone(), value));
                }
                Some(_) => {
                    if !args.keyword.is_empty() {
                        let offset = self.peek(0).map(|t| t.offset).unwrap_or(self.end);
                        return Err(self.error(
                            offset,
                            "positional arguments must come before keyword arguments",
                        ));
                    }
                    let value = self.value()?;
                    args.positional.push(value);
                }
            }
        }
    }

    fn value(&mut self) -> Result<Expr> {
        let Some(token) = self.next() else {
            return Err(self.error(self.end, "expected a value"));
        };
        let expr = match &token.kind {
            TokenKind::Str(s) => Expr::Literal(Value::String(s.clone())),
            TokenKind::Int(i) => Expr::Literal(Value::from(*i)),
            TokenKind::Float(f) => Expr::Literal(Value::from(*f)),
            TokenKind::Ident(name) => match name.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "null" | "None" => Expr::Literal(Value::Null),
                _ => Expr::Path(name.clone()),
            },
            TokenKind::LParen => {
                let name = match self.next() {
                    Some(Token {
                        kind: TokenKind::Ident(name),
                        ..
                    }) => name.clone(),
                    Some(other) => {
                        return Err(self.error(other.offset, "expected a function name after '('"));
                    }
                    None => return Err(self.error(self.end, "expected a function name after '('")),
                };
                let args = self.arguments(true)?;
                Expr::Call { name, args }
            }
            TokenKind::Eq => return Err(self.error(token.offset, "unexpected '='")),
            TokenKind::RParen => return Err(self.error(token.offset, "unexpected ')'")),
        };
        Ok(expr)
    }
}

/// Find the `}}` closing a tag, skipping over quoted strings. Returns the offset
/// of the closing braces relative to `rest`, which starts at the opening `{{`.
fn find_tag_close(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let mut i = 2;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                } else if b == b'{' && bytes.get(i + 1) == Some(&b'{') {
                    return None;
                }
            }
        }
        i += 1;
    }
    None
}

/// Find the `}}` of a `--}}` (or `--~}}`) comment terminator, relative to `rest`.
fn find_comment_close(rest: &str) -> Option<usize> {
    let opener = if rest.starts_with("{{~") { 6 } else { 5 };
    rest.match_indices("}}").map(|(i, _)| i).find(|&i| {
        let head = &rest[..i];
        i >= opener + 2 && (head.ends_with("--") || head.ends_with("--~"))
    })
}

/// Apply `{{~`: strip trailing whitespace from the last literal, dropping it if empty.
fn trim_trailing_whitespace(nodes: &mut Vec<Node>) {
    let remove = match nodes.last_mut() {
        Some(Node::Literal(lit)) => {
            let trimmed_len = lit.text.trim_end().len();
            lit.text.truncate(trimmed_len);
            lit.span.end = lit.span.start + trimmed_len;
            lit.text.is_empty()
        }
        _ => false,
    };
    if remove {
        nodes.pop();
    }
}

/// Parse template source into a tree.
pub fn parse(source: &str) -> Result<Template> {
    Parser::new(source).parse()
}
