//! Sibling context of a tag and stop-condition inference.

use crate::grammar::Node;
use crate::llm::Provider;
use regex::Regex;
use std::sync::LazyLock;

static ROLE_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{\{~?/(user|assistant|system|role)~?\}\}").expect("Invalid role close regex")
});

static XML_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<([^>\W]+)[^>]*>").expect("Invalid xml open regex"));

static XML_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^</([^>\W]+)>").expect("Invalid xml close regex"));

const QUOTES: [&str; 6] = ["'''", "\"\"\"", "```", "\"", "'", "`"];

/// The nodes around a tag, as seen from inside its parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Siblings<'a> {
    pub prev: Option<&'a Node>,
    pub next: Option<&'a Node>,
    /// Closing tag of the enclosing block, standing in for a missing next sibling.
    pub closing: Option<&'a str>,
}

impl<'a> Siblings<'a> {
    pub fn prev_text(&self) -> &'a str {
        self.prev.map(Node::text).unwrap_or("")
    }

    pub fn next_text(&self) -> &'a str {
        match self.next {
            Some(node) => node.text(),
            None => self.closing.unwrap_or(""),
        }
    }

    fn next_is_literal(&self) -> bool {
        self.next.is_some_and(Node::is_literal)
    }
}

/// Infer a stop string from the text around a generation tag.
///
/// `role` is the innermost open role, used when the next text closes a generic
/// `{{/role}}` block. Returns `None` when no stop applies.
pub fn infer_stop(siblings: &Siblings<'_>, provider: &dyn Provider, role: Option<&str>) -> Option<String> {
    let next = siblings.next_text();
    let prev = siblings.prev_text();

    if let Some(quote) = QUOTES
        .iter()
        .find(|q| next.starts_with(**q) && prev.ends_with(**q))
    {
        return Some(quote.to_string());
    }

    if let Some(caps) = ROLE_CLOSE_RE.captures(next) {
        let closed = &caps[1];
        let role = match closed {
            "role" => role.unwrap_or(closed),
            named => named,
        };
        return non_empty(provider.role_end(role));
    }

    if let Some(end_tag) = xml_stop(prev, next) {
        return Some(end_tag);
    }

    if siblings.next_is_literal() {
        return non_empty(next.to_string());
    }
    None
}

/// `<name ...></name>` ahead, or `</name>` ahead right after `<name ...>`.
fn xml_stop(prev: &str, next: &str) -> Option<String> {
    if let Some(caps) = XML_OPEN_RE.captures(next) {
        let end_tag = format!("</{}>", &caps[1]);
        if next[caps[0].len()..].starts_with(&end_tag) {
            return Some(end_tag);
        }
    }

    let caps = XML_CLOSE_RE.captures(next)?;
    let name = &caps[1];
    let opens = prev
        .rfind('<')
        .map(|i| &prev[i..])
        .and_then(|tail| XML_OPEN_RE.captures(tail).filter(|c| c[0].len() == tail.len()))
        .is_some_and(|c| &c[1] == name);
    opens.then(|| caps[0].to_string())
}

fn non_empty(stop: String) -> Option<String> {
    (!stop.is_empty()).then_some(stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse;
    use crate::llm::MockProvider;

    /// Infer the stop for the first `gen` tag in `source`, searching nested blocks.
    fn stop_for(source: &str) -> Option<String> {
        let template = parse(source).unwrap();
        let provider = MockProvider::new();
        find(&template.nodes, None, &provider).expect("template has a gen tag")
    }

    fn find(nodes: &[Node], closing: Option<&str>, provider: &MockProvider) -> Option<Option<String>> {
        for (i, node) in nodes.iter().enumerate() {
            if let Node::Tag(tag) = node {
                if tag.name == "gen" {
                    let siblings = Siblings {
                        prev: i.checked_sub(1).map(|j| &nodes[j]),
                        next: nodes.get(i + 1),
                        closing,
                    };
                    return Some(infer_stop(&siblings, provider, Some("user")));
                }
                if let Some(body) = &tag.body
                    && let Some(found) = find(body.main(), Some(&body.closing), provider)
                {
                    return Some(found);
                }
            }
        }
        None
    }

    #[test]
    fn matching_quotes() {
        assert_eq!(stop_for("name: \"{{gen 'x'}}\" ok"), Some("\"".to_string()));
        assert_eq!(stop_for("code: ```{{gen 'x'}}```"), Some("```".to_string()));
        assert_eq!(stop_for("say '{{gen 'x'}}'"), Some("'".to_string()));
    }

    #[test]
    fn unmatched_quote_falls_back_to_literal() {
        assert_eq!(stop_for("name: {{gen 'x'}}\" ok"), Some("\" ok".to_string()));
    }

    #[test]
    fn role_close_uses_role_end() {
        assert_eq!(
            stop_for("{{#assistant~}}{{gen 'x'}}{{~/assistant}}"),
            Some("<|im_end|>".to_string())
        );
        assert_eq!(
            stop_for("{{#user}}{{gen 'x'}}{{/user}}"),
            Some("<|im_end|>".to_string())
        );
    }

    #[test]
    fn xml_pair_ahead() {
        assert_eq!(
            stop_for("{{gen 'x'}}<answer kind=\"a\"></answer>"),
            Some("</answer>".to_string())
        );
    }

    #[test]
    fn xml_close_after_open() {
        assert_eq!(
            stop_for("<answer>{{gen 'x'}}</answer> and more"),
            Some("</answer>".to_string())
        );
    }

    #[test]
    fn xml_close_without_matching_open_is_literal() {
        assert_eq!(
            stop_for("<other>{{gen 'x'}}</answer> and more"),
            Some("</answer> and more".to_string())
        );
    }

    #[test]
    fn fallback_is_next_literal() {
        assert_eq!(stop_for("A{{gen 'x'}}\nB"), Some("\nB".to_string()));
    }

    #[test]
    fn no_next_text_means_no_stop() {
        assert_eq!(stop_for("Hello my name is{{gen 'name'}}"), None);
    }

    #[test]
    fn next_tag_is_not_a_stop() {
        assert_eq!(stop_for("{{gen 'a'}}{{gen 'b'}}"), None);
    }

    #[test]
    fn non_role_closing_block_is_not_a_stop() {
        assert_eq!(stop_for("{{#if x}}{{gen 'a'}}{{/if}}"), None);
    }

    #[test]
    fn generic_role_block_uses_open_role() {
        struct Tokens;
        impl Provider for Tokens {
            fn name(&self) -> &str {
                "tokens"
            }
            fn role_end(&self, role: &str) -> String {
                format!("</{}>", role)
            }
            fn complete(
                &self,
                _request: &crate::llm::CallRequest,
            ) -> Result<crate::llm::Completion, crate::llm::ProviderError> {
                Ok(Default::default())
            }
        }

        let template = parse("{{#role 'system'}}{{gen 'x'}}{{/role}}").unwrap();
        let Node::Tag(role) = &template.nodes[0] else {
            panic!("expected role tag");
        };
        let body = role.body.as_ref().unwrap();
        let siblings = Siblings {
            prev: None,
            next: None,
            closing: Some(&body.closing),
        };
        assert_eq!(
            infer_stop(&siblings, &Tokens, Some("system")),
            Some("</system>".to_string())
        );
    }
}
