//! `totals`, `group_by` and `group_limit` parameters.
//!
//! `totals` accepts three spellings:
//!
//! * comma tokens: `totals=count,sum__price`
//! * a JSON object: `totals={"count": null, "sum": ["price"], "group_by": ["category"], "group_limit": 5}`
//! * a JSON array mixing tokens and objects: `totals=["count", {"avg": "price"}]`
//!
//! Grouping without any metric implies `count`.

use super::params::{AttributePath, PARAM_GROUP_BY, PARAM_GROUP_LIMIT, PARAM_TOTALS, PATH_SEPARATOR};
use crate::errors::QueryError;
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl MetricFunction {
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for MetricFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One aggregated value; `path` is `None` only for a bare row count
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metric {
    pub function: MetricFunction,
    pub path: Option<AttributePath>,
}

impl Metric {
    /// Result key, e.g. `count` or `sum_price`
    #[must_use]
    pub fn label(&self) -> String {
        match &self.path {
            None => self.function.name().to_string(),
            Some(path) => format!("{}_{}", self.function, path.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregateSpec {
    pub metrics: Vec<Metric>,
    pub group_by: Vec<AttributePath>,
    /// Keep only the top N groups per parent group, ranked by metric
    pub group_limit: Option<u64>,
}

impl AggregateSpec {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.group_by.is_empty()
    }

    fn push_metric(&mut self, metric: Metric) {
        if !self.metrics.contains(&metric) {
            self.metrics.push(metric);
        }
    }

    fn push_group(&mut self, path: AttributePath) {
        if !self.group_by.contains(&path) {
            self.group_by.push(path);
        }
    }
}

/// Parse all aggregation parameters into one spec
///
/// # Errors
///
/// Returns `MalformedAggregate` for unknown metric functions, metrics missing
/// their attribute, invalid group limits, or a group limit without grouping.
pub fn parse_aggregate(
    totals: &[&str],
    group_by: &[&str],
    group_limit: Option<&str>,
) -> Result<AggregateSpec, QueryError> {
    let mut spec = AggregateSpec::default();

    for raw in totals {
        let raw = raw.trim();
        if raw.starts_with('{') || raw.starts_with('[') {
            let value: Value = serde_json::from_str(raw).map_err(|e| {
                QueryError::malformed_aggregate(PARAM_TOTALS, format!("invalid JSON: {e}"))
            })?;
            match value {
                Value::Object(map) => parse_object(&mut spec, &map)?,
                Value::Array(items) => {
                    for item in items {
                        match item {
                            Value::String(token) => spec.push_metric(parse_token(&token)?),
                            Value::Object(map) => parse_object(&mut spec, &map)?,
                            _ => {
                                return Err(QueryError::malformed_aggregate(
                                    PARAM_TOTALS,
                                    "expected metric names or objects",
                                ));
                            }
                        }
                    }
                }
                _ => {
                    return Err(QueryError::malformed_aggregate(
                        PARAM_TOTALS,
                        "expected a JSON object or array",
                    ));
                }
            }
        } else {
            for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                spec.push_metric(parse_token(token)?);
            }
        }
    }

    for raw in group_by {
        for name in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            spec.push_group(group_path(PARAM_GROUP_BY, name)?);
        }
    }

    if let Some(raw) = group_limit {
        spec.group_limit = Some(parse_group_limit(PARAM_GROUP_LIMIT, &Value::String(raw.to_string()))?);
    }

    if spec.group_limit.is_some() && spec.group_by.is_empty() {
        return Err(QueryError::malformed_aggregate(
            PARAM_GROUP_LIMIT,
            "group_limit requires group_by",
        ));
    }

    if spec.metrics.is_empty() && !spec.group_by.is_empty() {
        spec.metrics.push(Metric {
            function: MetricFunction::Count,
            path: None,
        });
    }

    tracing::trace!(
        metrics = spec.metrics.len(),
        groups = spec.group_by.len(),
        "Parsed aggregation parameters"
    );
    Ok(spec)
}

/// `count`, `count__id`, `sum__price`, `avg__category__rank`
fn parse_token(token: &str) -> Result<Metric, QueryError> {
    let (name, rest) = token
        .split_once(PATH_SEPARATOR)
        .map_or((token, None), |(name, rest)| (name, Some(rest)));
    metric(name, rest)
}

fn metric(function_name: &str, attribute: Option<&str>) -> Result<Metric, QueryError> {
    let function = MetricFunction::lookup(function_name).ok_or_else(|| {
        QueryError::malformed_aggregate(
            PARAM_TOTALS,
            format!("'{function_name}' is not an aggregate function"),
        )
    })?;

    let path = match attribute {
        None => None,
        Some(raw) => Some(AttributePath::parse(PARAM_TOTALS, raw).map_err(|_| {
            QueryError::malformed_aggregate(PARAM_TOTALS, format!("'{raw}' is not an attribute path"))
        })?),
    };

    if path.is_none() && function != MetricFunction::Count {
        return Err(QueryError::malformed_aggregate(
            PARAM_TOTALS,
            format!("'{function}' needs an attribute"),
        ));
    }

    Ok(Metric { function, path })
}

fn parse_object(spec: &mut AggregateSpec, map: &Map<String, Value>) -> Result<(), QueryError> {
    for (key, value) in map {
        match key.as_str() {
            PARAM_GROUP_BY => {
                let names = string_list(value).ok_or_else(|| {
                    QueryError::malformed_aggregate(
                        PARAM_GROUP_BY,
                        "expected an attribute name or a list of names",
                    )
                })?;
                if names.is_empty() {
                    return Err(QueryError::malformed_aggregate(PARAM_GROUP_BY, "is empty"));
                }
                for name in names {
                    spec.push_group(group_path(PARAM_GROUP_BY, name)?);
                }
            }
            PARAM_GROUP_LIMIT => {
                spec.group_limit = Some(parse_group_limit(PARAM_GROUP_LIMIT, value)?);
            }
            function => {
                let attributes = match value {
                    Value::Null => Vec::new(),
                    other => string_list(other).ok_or_else(|| {
                        QueryError::malformed_aggregate(
                            PARAM_TOTALS,
                            format!("'{function}' expects null, an attribute or a list of attributes"),
                        )
                    })?,
                };
                if attributes.is_empty() {
                    spec.push_metric(metric(function, None)?);
                }
                for attribute in attributes {
                    spec.push_metric(metric(function, Some(attribute))?);
                }
            }
        }
    }
    Ok(())
}

fn string_list(value: &Value) -> Option<Vec<&str>> {
    match value {
        Value::String(s) => Some(s.split(',').map(str::trim).filter(|t| !t.is_empty()).collect()),
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        _ => None,
    }
}

fn group_path(param: &str, raw: &str) -> Result<AttributePath, QueryError> {
    AttributePath::parse(param, raw).map_err(|_| {
        QueryError::malformed_aggregate(param, format!("'{raw}' is not an attribute path"))
    })
}

fn parse_group_limit(param: &str, value: &Value) -> Result<u64, QueryError> {
    let limit = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match limit {
        Some(n) if n > 0 => Ok(n),
        _ => Err(QueryError::malformed_aggregate(
            param,
            "group_limit must be a positive integer",
        )),
    }
}
