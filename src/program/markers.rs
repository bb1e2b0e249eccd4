//! Bookkeeping markers around tag output.
//!
//! Markers are comments starting with the `{{!--G` sentinel, so a marked buffer
//! re-parses as plain text plus comments. They exist for display collaborators;
//! the interpreter never reads them back.

use regex::Regex;
use std::sync::LazyLock;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{!--G.*?--\}\}").expect("Invalid marker regex"));

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{~?!--.*?--~?\}\}|\{\{~?!.*?~?\}\}").expect("Invalid comment regex")
});

/// Escape text for embedding inside a marker: braces and `$` become entities.
pub fn escape_block(text: &str) -> String {
    text.replace('{', "&#123;")
        .replace('}', "&#125;")
        .replace('$', "&#36;")
}

pub fn unescape_block(text: &str) -> String {
    text.replace("&#36;", "$")
        .replace("&#125;", "}")
        .replace("&#123;", "{")
}

pub fn start_marker(name: &str, id: u64, source: &str) -> String {
    format!(
        "{{{{!--GMARKER_START_{}${}${}$--}}}}",
        name,
        id,
        escape_block(source)
    )
}

pub fn end_marker(name: &str, id: u64) -> String {
    format!("{{{{!--GMARKER_END_{}${}$--}}}}", name, id)
}

/// Cyclic block holding `n` alternatives. Only `values[0]` survives marker stripping.
pub fn many_generate(values: &[String], id: u64) -> String {
    let mut out = format!(
        "{{{{!--GMARKERmany_generate_start_True_{}${}$--}}}}",
        values.len(),
        id
    );
    for (i, value) in values.iter().enumerate() {
        if i == 0 {
            out.push_str(value);
        } else {
            out.push_str(&format!(
                "{{{{!--GMARKERmany_generate_True_{}${}$--}}}}{{{{!--G {}--}}}}",
                i,
                id,
                escape_block(value)
            ));
        }
    }
    out.push_str(&format!("{{{{!--GMARKERmany_generate_end${}$--}}}}", id));
    out
}

/// Remove interpreter markers, keeping user comments.
pub fn strip_markers(text: &str) -> String {
    MARKER_RE.replace_all(text, "").into_owned()
}

/// Remove markers and every other comment: the plain text a model sees.
pub fn plain_text(text: &str) -> String {
    COMMENT_RE.replace_all(&strip_markers(text), "").into_owned()
}
