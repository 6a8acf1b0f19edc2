use super::operators::{Arity, Operator};
use super::search::{self, FullTextKey};
use crate::errors::QueryError;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;

/// Separator between path segments and operator suffixes in parameter keys
pub const PATH_SEPARATOR: &str = "__";

pub const PARAM_ORDER: &str = "order";
pub const PARAM_LIMIT: &str = "limit";
pub const PARAM_OFFSET: &str = "offset";
pub const PARAM_RELATIONS: &str = "relations";
pub const PARAM_TOTAL_COUNT: &str = "total_count";
pub const PARAM_TOTALS: &str = "totals";
pub const PARAM_SEARCH: &str = "search";
pub const PARAM_GROUP_BY: &str = "group_by";
pub const PARAM_GROUP_LIMIT: &str = "group_limit";
pub const PARAM_TEXT_QUERY: &str = "q";

/// Keys that are never treated as attribute comparisons
pub const RESERVED_PARAMS: [&str; 9] = [
    PARAM_ORDER,
    PARAM_LIMIT,
    PARAM_OFFSET,
    PARAM_RELATIONS,
    PARAM_TOTAL_COUNT,
    PARAM_TOTALS,
    PARAM_SEARCH,
    PARAM_GROUP_BY,
    PARAM_GROUP_LIMIT,
];

#[must_use]
pub fn is_reserved(key: &str) -> bool {
    RESERVED_PARAMS.contains(&key)
}

/// Ordered multi-map of raw request parameters.
///
/// Keys may repeat; values keep their arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an `application/x-www-form-urlencoded` query string
    #[must_use]
    pub fn from_query_string(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// First value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Distinct keys with all their values, in first-seen order
    #[must_use]
    pub fn grouped(&self) -> Vec<(&str, Vec<&str>)> {
        let mut grouped: Vec<(&str, Vec<&str>)> = Vec::new();
        for (key, value) in &self.pairs {
            match grouped.iter_mut().find(|(k, _)| k == key) {
                Some((_, values)) => values.push(value),
                None => grouped.push((key, vec![value])),
            }
        }
        grouped
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for QueryParams {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_query_string(parts.uri.query().unwrap_or_default()))
    }
}

/// Dotted route from the root resource to an attribute: zero or more relation
/// names followed by an attribute name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath(Vec<String>);

impl AttributePath {
    /// Parse `a__b__c` into segments
    ///
    /// # Errors
    ///
    /// Returns `MalformedParameter` when any segment is empty.
    pub fn parse(param: &str, raw: &str) -> Result<Self, QueryError> {
        let segments: Vec<&str> = raw.split(PATH_SEPARATOR).collect();
        Self::from_segments(param, &segments)
    }

    /// # Errors
    ///
    /// Returns `MalformedParameter` when there are no segments or any is empty.
    pub fn from_segments(param: &str, segments: &[&str]) -> Result<Self, QueryError> {
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(QueryError::malformed_parameter(
                param,
                "attribute path has an empty segment",
            ));
        }
        Ok(Self(segments.iter().map(ToString::to_string).collect()))
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Final segment, the attribute itself
    #[must_use]
    pub fn attribute(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    /// Leading segments, the relations to traverse
    #[must_use]
    pub fn relations(&self) -> &[String] {
        &self.0[..self.0.len().saturating_sub(1)]
    }

    /// Name used for result columns and aggregation labels
    #[must_use]
    pub fn label(&self) -> String {
        self.0.join(PATH_SEPARATOR)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Function chain following a `func` or `sfunc` token.
///
/// With a trailing comparison every name is a transform applied in order,
/// innermost first. Without one, the last name is a predicate that receives the
/// transformed attribute (plus the request value for `func`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub names: Vec<String>,
    pub compare: Option<Operator>,
}

impl FunctionCall {
    /// Functions applied to the attribute before comparing
    #[must_use]
    pub fn transforms(&self) -> &[String] {
        match self.compare {
            Some(_) => &self.names,
            None => &self.names[..self.names.len().saturating_sub(1)],
        }
    }

    /// Predicate function when there is no trailing comparison
    #[must_use]
    pub fn predicate(&self) -> Option<&str> {
        match self.compare {
            Some(_) => None,
            None => self.names.last().map(String::as_str),
        }
    }
}

/// Parsed left-hand side of a filter parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    Comparison {
        path: AttributePath,
        operator: Operator,
        function: Option<FunctionCall>,
    },
    FullText(FullTextKey),
}

impl ParsedKey {
    /// Operator deciding the operand arity
    #[must_use]
    pub fn value_operator(&self) -> Option<Operator> {
        match self {
            Self::Comparison {
                operator, function, ..
            } => Some(function.as_ref().and_then(|f| f.compare).unwrap_or(*operator)),
            Self::FullText(_) => None,
        }
    }
}

/// Split a parameter key into attribute path, operator and optional function chain.
///
/// The trailing segment is taken as the operator when it names one; otherwise the
/// whole key is an attribute path compared with `exact`. A `func`/`sfunc` segment
/// starts a function chain that may itself end with an operator.
///
/// # Errors
///
/// Returns `MalformedParameter` for empty segments or an empty function chain.
pub fn parse_key(key: &str) -> Result<ParsedKey, QueryError> {
    let segments: Vec<&str> = key.split(PATH_SEPARATOR).collect();

    if segments.first() == Some(&PARAM_TEXT_QUERY) {
        return search::parse_fulltext_key(key, &segments[1..]).map(ParsedKey::FullText);
    }

    let function_at = segments
        .iter()
        .skip(1)
        .position(|s| *s == Operator::Func.name() || *s == Operator::SFunc.name())
        .map(|i| i + 1);

    if let Some(at) = function_at {
        let path = AttributePath::from_segments(key, &segments[..at])?;
        let operator = if segments[at] == Operator::SFunc.name() {
            Operator::SFunc
        } else {
            Operator::Func
        };
        let chain = &segments[at + 1..];
        let (names, compare) = match chain.split_last() {
            Some((last, rest)) if !rest.is_empty() => match Operator::lookup(last) {
                Some(op) if op.arity() != Arity::Function => (rest, Some(op)),
                _ => (chain, None),
            },
            _ => (chain, None),
        };
        if names.is_empty() || names.iter().any(|n| n.is_empty()) {
            return Err(QueryError::malformed_parameter(
                key,
                "function chain must name at least one function",
            ));
        }
        if operator == Operator::SFunc && compare.is_some() {
            return Err(QueryError::malformed_parameter(
                key,
                "sfunc predicates cannot be compared",
            ));
        }
        return Ok(ParsedKey::Comparison {
            path,
            operator,
            function: Some(FunctionCall {
                names: names.iter().map(ToString::to_string).collect(),
                compare,
            }),
        });
    }

    if let Some((last, rest)) = segments.split_last()
        && !rest.is_empty()
        && let Some(operator) = Operator::lookup(last)
    {
        return Ok(ParsedKey::Comparison {
            path: AttributePath::from_segments(key, rest)?,
            operator,
            function: None,
        });
    }

    Ok(ParsedKey::Comparison {
        path: AttributePath::from_segments(key, &segments)?,
        operator: Operator::Exact,
        function: None,
    })
}

/// Turn the raw string values of a simple parameter into a JSON operand.
///
/// List and range operators split every value on `separator`; unary operators
/// ignore their value; everything else expects exactly one value.
///
/// # Errors
///
/// Returns `MalformedParameter` when the number of values does not fit the arity.
pub fn parse_simple_value(
    key: &str,
    operator: Operator,
    values: &[&str],
    separator: char,
) -> Result<Value, QueryError> {
    match operator.arity() {
        Arity::Unary => Ok(Value::Null),
        Arity::List | Arity::Range => Ok(Value::Array(
            values
                .iter()
                .flat_map(|v| v.split(separator))
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        )),
        Arity::Function => match values {
            [single] => Ok(Value::String((*single).to_string())),
            many => Ok(Value::Array(
                many.iter().map(|v| Value::String((*v).to_string())).collect(),
            )),
        },
        Arity::Binary => match values {
            [single] => Ok(Value::String((*single).to_string())),
            _ => Err(QueryError::malformed_parameter(
                key,
                format!("operator '{operator}' expects a single value"),
            )),
        },
    }
}
