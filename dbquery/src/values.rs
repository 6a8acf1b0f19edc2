//! Typed operands.
//!
//! Raw operands arrive as JSON (simple parameters are strings, `search` values may
//! be any JSON). Before compiling, each operand is coerced against the kind of the
//! attribute it is compared with, so every backend sees the same typed values.

use crate::errors::QueryError;
use crate::filtering::conditions::Comparison;
use crate::filtering::operators::{Arity, Operator};
use crate::schema::{AttributeDef, AttributeKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Uuid(Uuid),
    Json(Value),
}

impl Scalar {
    /// Untyped conversion, used where no attribute kind applies
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n.as_i64().map_or_else(|| Self::Float(n.as_f64().unwrap_or_default()), Self::Int),
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.clone()),
        }
    }

    /// JSON rendering used by the document and search-index backends
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Text(s) => Value::String(s.clone()),
            Self::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            Self::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::Uuid(u) => Value::String(u.to_string()),
            Self::Json(v) => v.clone(),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<Scalar> for sea_orm::Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Null => Self::from(None::<String>),
            Scalar::Bool(b) => Self::from(b),
            Scalar::Int(i) => Self::from(i),
            Scalar::Float(f) => Self::from(f),
            Scalar::Text(s) => Self::from(s),
            Scalar::Date(d) => Self::from(d),
            Scalar::DateTime(dt) => Self::from(dt),
            Scalar::Uuid(u) => Self::from(u),
            Scalar::Json(v) => Self::from(v),
        }
    }
}

/// Coerced right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Unary operators and argument-less functions
    None,
    One(Scalar),
    Many(Vec<Scalar>),
    /// Range bounds, always `low <= high` when comparable
    Bounds(Scalar, Scalar),
}

impl Operand {
    #[must_use]
    pub fn into_values(self) -> Vec<Scalar> {
        match self {
            Self::None => Vec::new(),
            Self::One(s) => vec![s],
            Self::Many(v) => v,
            Self::Bounds(a, b) => vec![a, b],
        }
    }
}

/// Coerce the operand of `comparison` against `attribute`.
///
/// After a function transform the attribute's kind no longer applies, so the
/// operand passes through untyped.
///
/// # Errors
///
/// Returns `MalformedParameter` when the operand has the wrong shape for the
/// operator or cannot be converted to the attribute's kind.
pub fn coerce(comparison: &Comparison, attribute: &AttributeDef) -> Result<Operand, QueryError> {
    let param = comparison.param.as_str();
    match &comparison.function {
        Some(_) if comparison.operator == Operator::SFunc => Ok(Operand::None),
        Some(function) => match function.compare {
            Some(op) => coerce_for(param, op, AttributeKind::Scalar, AttributeKind::Scalar, &comparison.value),
            None => Ok(match &comparison.value {
                Value::Null => Operand::None,
                Value::Array(items) => Operand::Many(items.iter().map(Scalar::from_json).collect()),
                other => Operand::One(Scalar::from_json(other)),
            }),
        },
        None => coerce_for(
            param,
            comparison.operator,
            attribute.kind,
            attribute.element_kind,
            &comparison.value,
        ),
    }
}

fn coerce_for(
    param: &str,
    operator: Operator,
    kind: AttributeKind,
    element_kind: AttributeKind,
    value: &Value,
) -> Result<Operand, QueryError> {
    match operator.arity() {
        Arity::Unary | Arity::Function => Ok(Operand::None),
        Arity::Range => {
            let items = list(param, operator, value)?;
            let [low, high] = items else {
                return Err(QueryError::malformed_parameter(
                    param,
                    format!("'{operator}' expects exactly two values"),
                ));
            };
            let low = coerce_scalar(param, kind, low)?;
            let high = coerce_scalar(param, kind, high)?;
            Ok(match low.compare(&high) {
                Some(Ordering::Greater) => Operand::Bounds(high, low),
                _ => Operand::Bounds(low, high),
            })
        }
        Arity::List => {
            let item_kind = match operator.positive() {
                Operator::HasAll | Operator::HasAny => AttributeKind::String,
                Operator::Contains | Operator::Overlap if kind == AttributeKind::Collection => element_kind,
                Operator::Contains => AttributeKind::Json,
                _ => kind,
            };
            let items = list(param, operator, value)?;
            items
                .iter()
                .map(|item| coerce_scalar(param, item_kind, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Operand::Many)
        }
        Arity::Binary => {
            let scalar = match operator.positive() {
                Operator::Year | Operator::Month | Operator::Day => Scalar::Int(integer(param, value)?),
                Operator::HasKey => coerce_scalar(param, AttributeKind::String, value)?,
                Operator::Exact | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                    if matches!(value, Value::Array(_) | Value::Object(_)) && kind.is_scalar() {
                        return Err(QueryError::malformed_parameter(
                            param,
                            format!("'{operator}' expects a single value"),
                        ));
                    }
                    coerce_scalar(param, kind, value)?
                }
                // Text matching operators
                _ => coerce_scalar(param, AttributeKind::String, value)?,
            };
            Ok(Operand::One(scalar))
        }
    }
}

fn list<'v>(param: &str, operator: Operator, value: &'v Value) -> Result<&'v [Value], QueryError> {
    match value {
        Value::Array(items) if !items.is_empty() => Ok(items),
        Value::Array(_) => Err(QueryError::malformed_parameter(
            param,
            format!("'{operator}' expects a non-empty list"),
        )),
        _ => Err(QueryError::malformed_parameter(
            param,
            format!("'{operator}' expects a list"),
        )),
    }
}

fn integer(param: &str, value: &Value) -> Result<i64, QueryError> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| QueryError::malformed_parameter(param, "expected an integer"))
}

/// Convert one JSON operand to `kind`
///
/// # Errors
///
/// Returns `MalformedParameter` when the value does not parse as `kind`.
pub fn coerce_scalar(param: &str, kind: AttributeKind, value: &Value) -> Result<Scalar, QueryError> {
    let invalid = || QueryError::malformed_parameter(param, format!("'{value}' is not a valid {kind} value"));

    if value.is_null() {
        return Err(QueryError::malformed_parameter(
            param,
            "null is not a valid operand, use isnull",
        ));
    }

    match kind {
        AttributeKind::Scalar => Ok(Scalar::from_json(value)),
        AttributeKind::Collection | AttributeKind::Json => Ok(Scalar::Json(value.clone())),
        AttributeKind::String => match value {
            Value::String(s) => Ok(Scalar::Text(s.clone())),
            Value::Number(n) => Ok(Scalar::Text(n.to_string())),
            Value::Bool(b) => Ok(Scalar::Text(b.to_string())),
            _ => Err(invalid()),
        },
        AttributeKind::Numeric => match value {
            Value::Number(_) => Ok(Scalar::from_json(value)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Scalar::Int)
                    .or_else(|_| s.parse::<f64>().map(Scalar::Float))
                    .ok()
                    .filter(|v| !matches!(v, Scalar::Float(f) if !f.is_finite()))
                    .ok_or_else(invalid)
            }
            _ => Err(invalid()),
        },
        AttributeKind::Boolean => match value {
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::Number(n) if n.as_u64() == Some(1) => Ok(Scalar::Bool(true)),
            Value::Number(n) if n.as_u64() == Some(0) => Ok(Scalar::Bool(false)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Scalar::Bool(true)),
                "0" | "false" | "no" | "off" => Ok(Scalar::Bool(false)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        },
        AttributeKind::Date => value
            .as_str()
            .and_then(|s| {
                NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                    .ok()
                    .or_else(|| parse_datetime(s).map(|dt| dt.date()))
            })
            .map(Scalar::Date)
            .ok_or_else(invalid),
        AttributeKind::DateTime => value
            .as_str()
            .and_then(parse_datetime)
            .map(Scalar::DateTime)
            .ok_or_else(invalid),
        AttributeKind::Uuid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Scalar::Uuid)
            .ok_or_else(invalid),
    }
}

/// RFC 3339 (normalized to UTC), common ISO-8601 variants, or a bare date at midnight
fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
