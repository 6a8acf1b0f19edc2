//! Full-text parameters (`q`, `q__and`, `q__or`, `q__title,body__and`) and the
//! pattern escaping shared by every backend's substring operators.

use crate::errors::QueryError;
use crate::schema::ResourceSchema;
use serde_json::Value;

// Basic safety limits
pub const MAX_SEARCH_QUERY_LENGTH: usize = 10_000;

const REQUIRE_ALL: &str = "and";
const REQUIRE_ANY: &str = "or";

/// Parsed `q` key: explicit attribute list and explicit combinator, if any
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullTextKey {
    pub attributes: Vec<String>,
    pub require_all: Option<bool>,
}

/// Full-text match over one or more string attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullText {
    pub param: String,
    pub phrase: String,
    pub attributes: Vec<String>,
    /// Every word must match, instead of any word
    pub require_all: bool,
}

impl FullText {
    /// Words of the phrase, in order
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.phrase.split_whitespace()
    }
}

/// Parse the segments following `q`
pub(crate) fn parse_fulltext_key(key: &str, rest: &[&str]) -> Result<FullTextKey, QueryError> {
    let (attributes, require_all) = match rest {
        [] => (None, None),
        [mode] if *mode == REQUIRE_ALL => (None, Some(true)),
        [mode] if *mode == REQUIRE_ANY => (None, Some(false)),
        [attrs] => (Some(*attrs), None),
        [attrs, mode] if *mode == REQUIRE_ALL => (Some(*attrs), Some(true)),
        [attrs, mode] if *mode == REQUIRE_ANY => (Some(*attrs), Some(false)),
        _ => {
            return Err(QueryError::malformed_parameter(
                key,
                "expected q, q__and, q__or or q__<attributes>[__and|__or]",
            ));
        }
    };

    let attributes = match attributes {
        None => Vec::new(),
        Some(list) => {
            let names: Vec<String> = list.split(',').map(str::trim).map(String::from).collect();
            if names.iter().any(String::is_empty) {
                return Err(QueryError::malformed_parameter(
                    key,
                    "full-text attribute list has an empty name",
                ));
            }
            names
        }
    };

    Ok(FullTextKey {
        attributes,
        require_all,
    })
}

/// Build a full-text node, filling unspecified parts from the resource defaults.
///
/// The value may be a string or a list of strings; lists are joined into one phrase.
pub(crate) fn fulltext_node(
    param: &str,
    key: FullTextKey,
    value: &Value,
    schema: &ResourceSchema,
) -> Result<FullText, QueryError> {
    let phrase = match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let mut words = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => words.push(s.as_str()),
                    _ => {
                        return Err(QueryError::malformed_parameter(
                            param,
                            "full-text terms must be strings",
                        ));
                    }
                }
            }
            words.join(" ")
        }
        _ => {
            return Err(QueryError::malformed_parameter(
                param,
                "full-text query must be a string",
            ));
        }
    };

    let phrase = truncate(phrase.trim(), MAX_SEARCH_QUERY_LENGTH);
    if phrase.is_empty() {
        return Err(QueryError::malformed_parameter(param, "full-text query is empty"));
    }

    let attributes = if key.attributes.is_empty() {
        schema.fulltext.clone()
    } else {
        key.attributes
    };

    Ok(FullText {
        param: param.to_string(),
        phrase: phrase.to_string(),
        attributes,
        require_all: key.require_all.unwrap_or(schema.fulltext_require_all),
    })
}

fn truncate(input: &str, max: usize) -> &str {
    if input.len() <= max {
        return input;
    }
    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

/// Escape LIKE wildcards so user input only ever matches literally.
/// Use with `ESCAPE '\'`.
#[must_use]
pub fn escape_like_wildcards(input: &str) -> String {
    input
        .replace('\\', "\\\\") // Escape backslash first
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Escape regular-expression metacharacters for document-store `$regex` matches
#[must_use]
pub fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape wildcard-query metacharacters for search-index `wildcard` queries
#[must_use]
pub fn escape_wildcard(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('*', "\\*")
        .replace('?', "\\?")
}
