//! Parse tree types.
//!
//! Everything here is immutable once the parser hands it out. Spans are byte
//! offsets into the original source.

use serde_json::Value;

/// Byte range of a node in the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A parsed template: the root node list plus the source it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub nodes: Vec<Node>,
    pub source: String,
}

/// One node of the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Raw text between tags, already whitespace-trimmed.
    Literal(Literal),
    /// A `{{! }}` or `{{!-- --}}` comment, kept verbatim.
    Comment(Comment),
    /// An inline or block tag.
    Tag(Tag),
}

impl Node {
    /// The raw source text of the node. For block tags this is the opening tag only.
    pub fn text(&self) -> &str {
        match self {
            Node::Literal(lit) => &lit.text,
            Node::Comment(comment) => &comment.text,
            Node::Tag(tag) => &tag.source,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Node::Literal(lit) => lit.span,
            Node::Comment(comment) => comment.span,
            Node::Tag(tag) => tag.span,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Node::Literal(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub text: String,
    pub span: Span,
}

/// A tag invocation such as `{{gen 'name' max_tokens=5}}` or `{{#each items}}...{{/each}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub args: Arguments,
    /// Present for block tags.
    pub body: Option<Body>,
    /// Raw source of the opening tag, delimiters included.
    pub source: String,
    pub span: Span,
}

impl Tag {
    pub fn is_block(&self) -> bool {
        self.body.is_some()
    }
}

/// Children of a block tag.
///
/// `{{else}}` and `{{or}}` split the body into sections; `separators[i]` is the
/// separator that opened `sections[i + 1]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    pub sections: Vec<Vec<Node>>,
    pub separators: Vec<String>,
    /// Raw source of the closing tag, e.g. `{{/assistant}}`.
    pub closing: String,
}

impl Body {
    /// The first section: everything before any separator.
    pub fn main(&self) -> &[Node] {
        self.sections.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// The section following the first `{{else}}`, if any.
    pub fn else_section(&self) -> Option<&[Node]> {
        self.separators
            .iter()
            .position(|sep| sep == "else")
            .and_then(|i| self.sections.get(i + 1))
            .map(Vec::as_slice)
    }
}

/// Positional and keyword argument expressions, in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    pub positional: Vec<Expr>,
    pub keyword: Vec<(String, Expr)>,
}

impl Arguments {
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// An argument expression. Evaluated against the variable store at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String, number, boolean or null literal.
    Literal(Value),
    /// Variable reference: `name`, `this.field`, `@index`, `items.0`.
    Path(String),
    /// Parenthesised sub call: `(add x 1)`.
    Call { name: String, args: Arguments },
}
