//! The filter tree: comparisons, logical nodes and full-text matches built from
//! simple parameters and the JSON `search` parameter.

use super::operators::Operator;
use super::params::{self, AttributePath, FunctionCall, ParsedKey};
use super::search::{self, FullText};
use crate::config::QueryOptions;
use crate::errors::QueryError;
use crate::schema::ResourceSchema;
use serde_json::{Map, Value};

// Basic safety limits
const MAX_FIELD_VALUE_LENGTH: usize = 10_000;
const MAX_FILTER_DEPTH: usize = 32;

pub const LOGICAL_AND: &str = "and";
pub const LOGICAL_OR: &str = "or";
pub const LOGICAL_NOT: &str = "not";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalKind {
    And,
    Or,
    Not,
}

impl LogicalKind {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            LOGICAL_AND => Some(Self::And),
            LOGICAL_OR => Some(Self::Or),
            LOGICAL_NOT => Some(Self::Not),
            _ => None,
        }
    }
}

/// One attribute comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Originating parameter key, or JSON path inside `search`
    pub param: String,
    pub path: AttributePath,
    pub operator: Operator,
    pub function: Option<FunctionCall>,
    /// Raw operand, coerced against the attribute kind during validation
    pub value: Value,
}

impl Comparison {
    /// Operator deciding operand shape: the trailing comparison of a function
    /// chain, otherwise the operator itself
    #[must_use]
    pub fn value_operator(&self) -> Operator {
        self.function
            .as_ref()
            .and_then(|f| f.compare)
            .unwrap_or(self.operator)
    }
}

/// Node of the filter tree.
///
/// `Logical` nodes always have at least one child and `Not` exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Comparison(Comparison),
    Logical {
        kind: LogicalKind,
        children: Vec<FilterNode>,
    },
    FullText(FullText),
}

impl FilterNode {
    /// Combine children with AND; a single child is returned unwrapped
    #[must_use]
    pub fn all(children: Vec<Self>) -> Option<Self> {
        Self::combine(LogicalKind::And, children)
    }

    #[must_use]
    pub fn any(children: Vec<Self>) -> Option<Self> {
        Self::combine(LogicalKind::Or, children)
    }

    /// `NOT` over the conjunction of `children`
    #[must_use]
    pub fn negate(children: Vec<Self>) -> Option<Self> {
        Self::all(children).map(|child| Self::Logical {
            kind: LogicalKind::Not,
            children: vec![child],
        })
    }

    fn combine(kind: LogicalKind, mut children: Vec<Self>) -> Option<Self> {
        match children.len() {
            0 => None,
            1 => children.pop(),
            _ => Some(Self::Logical { kind, children }),
        }
    }

    /// Visit every comparison and full-text leaf, depth first
    pub fn for_each_leaf<'n, E>(
        &'n self,
        f: &mut impl FnMut(&'n Self) -> Result<(), E>,
    ) -> Result<(), E> {
        match self {
            Self::Logical { children, .. } => {
                for child in children {
                    child.for_each_leaf(f)?;
                }
                Ok(())
            }
            leaf => f(leaf),
        }
    }
}

/// Collects simple parameters and the `search` tree into one filter tree.
///
/// Simple parameters are implicitly ANDed. When a `search` tree is also present the
/// root is an AND of the search tree followed by the simple-parameter conjunction.
pub struct FilterTreeBuilder<'a> {
    schema: &'a ResourceSchema,
    options: &'a QueryOptions,
    simple: Vec<FilterNode>,
    search: Option<FilterNode>,
}

impl<'a> FilterTreeBuilder<'a> {
    #[must_use]
    pub fn new(schema: &'a ResourceSchema, options: &'a QueryOptions) -> Self {
        Self {
            schema,
            options,
            simple: Vec::new(),
            search: None,
        }
    }

    /// Add a non-reserved simple parameter with all its values
    ///
    /// # Errors
    ///
    /// Returns `MalformedParameter` for unparseable keys or values.
    pub fn add_param(&mut self, key: &str, values: &[&str]) -> Result<(), QueryError> {
        if values.iter().any(|v| v.len() > MAX_FIELD_VALUE_LENGTH) {
            return Err(QueryError::malformed_parameter(key, "value is too long"));
        }

        let node = match params::parse_key(key)? {
            ParsedKey::FullText(ft) => {
                let value = match values {
                    [single] => Value::String((*single).to_string()),
                    many => Value::Array(many.iter().map(|v| Value::String((*v).to_string())).collect()),
                };
                FilterNode::FullText(search::fulltext_node(key, ft, &value, self.schema)?)
            }
            ParsedKey::Comparison {
                path,
                operator,
                function,
            } => {
                let value_operator = function.as_ref().and_then(|f| f.compare).unwrap_or(operator);
                let value = params::parse_simple_value(
                    key,
                    value_operator,
                    values,
                    self.options.multivalue_separator,
                )?;
                FilterNode::Comparison(Comparison {
                    param: key.to_string(),
                    path,
                    operator,
                    function,
                    value,
                })
            }
        };

        tracing::trace!(param = key, "Parsed filter parameter");
        self.simple.push(node);
        Ok(())
    }

    /// Parse the JSON `search` parameter
    ///
    /// # Errors
    ///
    /// Returns `MalformedFilter` for invalid JSON or an invalid tree shape.
    pub fn add_search(&mut self, raw: &str) -> Result<(), QueryError> {
        let param = params::PARAM_SEARCH;
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| QueryError::malformed_filter(param, format!("invalid JSON: {e}")))?;
        let Value::Object(map) = value else {
            return Err(QueryError::malformed_filter(param, "expected a JSON object"));
        };

        let children = self.parse_object(&map, param, 0)?;
        let node = FilterNode::all(children);
        self.search = match (self.search.take(), node) {
            (Some(existing), Some(node)) => FilterNode::all(vec![existing, node]),
            (existing, node) => existing.or(node),
        };
        Ok(())
    }

    /// Entries of one JSON object, each becoming a sibling node
    fn parse_object(
        &self,
        map: &Map<String, Value>,
        path: &str,
        depth: usize,
    ) -> Result<Vec<FilterNode>, QueryError> {
        if depth > MAX_FILTER_DEPTH {
            return Err(QueryError::malformed_filter(path, "filter is nested too deeply"));
        }

        let mut children = Vec::with_capacity(map.len());
        for (key, value) in map {
            let child_path = format!("{path}.{key}");
            if let Some(kind) = LogicalKind::from_key(key) {
                if let Some(node) = self.parse_logical(kind, value, &child_path, depth + 1)? {
                    children.push(node);
                }
                continue;
            }

            match params::parse_key(key) {
                Ok(ParsedKey::FullText(ft)) => {
                    children.push(FilterNode::FullText(search::fulltext_node(
                        &child_path,
                        ft,
                        value,
                        self.schema,
                    )?));
                }
                Ok(ParsedKey::Comparison {
                    path,
                    operator,
                    function,
                }) => children.push(FilterNode::Comparison(Comparison {
                    param: child_path,
                    path,
                    operator,
                    function,
                    value: value.clone(),
                })),
                Err(err) => {
                    return Err(QueryError::malformed_filter(child_path, err.to_string()));
                }
            }
        }
        Ok(children)
    }

    /// A logical operator's operand is either one object, whose entries are
    /// combined by the operator itself, or a list of objects, each an implicit
    /// AND, combined by the operator
    fn parse_logical(
        &self,
        kind: LogicalKind,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<Option<FilterNode>, QueryError> {
        let children = match value {
            Value::Object(map) => self.parse_object(map, path, depth)?,
            Value::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let Value::Object(map) = item else {
                        return Err(QueryError::malformed_filter(
                            format!("{path}[{index}]"),
                            "expected an object",
                        ));
                    };
                    let grouped = self.parse_object(map, &format!("{path}[{index}]"), depth)?;
                    if let Some(node) = FilterNode::all(grouped) {
                        children.push(node);
                    }
                }
                children
            }
            _ => {
                return Err(QueryError::malformed_filter(
                    path,
                    "expected an object or a list of objects",
                ));
            }
        };

        Ok(match kind {
            LogicalKind::And => FilterNode::all(children),
            LogicalKind::Or => FilterNode::any(children),
            LogicalKind::Not => FilterNode::negate(children),
        })
    }

    /// The combined tree, or `None` when nothing filters
    #[must_use]
    pub fn build(self) -> Option<FilterNode> {
        let simple = FilterNode::all(self.simple);
        match (self.search, simple) {
            (Some(search), Some(simple)) => Some(FilterNode::Logical {
                kind: LogicalKind::And,
                children: vec![search, simple],
            }),
            (search, simple) => search.or(simple),
        }
    }
}
