//! Filter tree to `sea-query` conditions.

use super::RelationalCompiler;
use crate::backends::resolver::RelationResolver;
use crate::config::QueryOptions;
use crate::errors::QueryError;
use crate::filtering::conditions::{Comparison, FilterNode, LogicalKind};
use crate::filtering::operators::Operator;
use crate::filtering::search::{FullText, escape_like_wildcards};
use crate::schema::AttributeKind;
use crate::values::{self, Operand, Scalar};
use sea_orm::DatabaseBackend;
use sea_orm::sea_query::{Alias, ArrayType, Condition, Expr, Func, LikeExpr, SimpleExpr};

const LIKE_ESCAPE: char = '\\';

impl RelationalCompiler {
    /// Translate a validated filter tree, registering joins on `resolver`
    pub(super) fn condition(
        &self,
        options: &QueryOptions,
        resolver: &mut RelationResolver<'_>,
        node: &FilterNode,
    ) -> Result<Condition, QueryError> {
        match node {
            FilterNode::Logical { kind, children } => {
                let mut condition = match kind {
                    LogicalKind::Or => Condition::any(),
                    LogicalKind::And | LogicalKind::Not => Condition::all(),
                };
                for child in children {
                    condition = condition.add(self.condition(options, resolver, child)?);
                }
                Ok(if *kind == LogicalKind::Not {
                    condition.not()
                } else {
                    condition
                })
            }
            FilterNode::Comparison(comparison) => self.comparison(options, resolver, comparison),
            FilterNode::FullText(fulltext) => Ok(self.fulltext(options, resolver, fulltext)),
        }
    }

    fn comparison(
        &self,
        options: &QueryOptions,
        resolver: &mut RelationResolver<'_>,
        comparison: &Comparison,
    ) -> Result<Condition, QueryError> {
        let param = comparison.param.as_str();
        let attribute = resolver.resolve_attribute(param, &comparison.path)?.attribute;
        let mut lhs = self.attribute_expr(resolver, param, &comparison.path)?;
        let operand = values::coerce(comparison, attribute)?;
        let mut kind = attribute.kind;

        if let Some(function) = &comparison.function {
            for name in function.transforms() {
                lhs = self.call(param, name, vec![lhs])?;
            }
            if let Some(name) = function.predicate() {
                let mut args = vec![lhs];
                args.extend(operand.into_values().into_iter().map(value));
                return Ok(Condition::all().add(self.call(param, name, args)?));
            }
            kind = AttributeKind::Scalar;
        }

        let operator = comparison.value_operator();
        let predicate = self.predicate(options, param, operator.positive(), kind, lhs, operand)?;
        let condition = Condition::all().add(predicate);
        Ok(if operator.is_negated() {
            condition.not()
        } else {
            condition
        })
    }

    fn call(&self, param: &str, name: &str, args: Vec<SimpleExpr>) -> Result<SimpleExpr, QueryError> {
        if !self.supports_function(name) {
            return Err(self.unsupported(param, format_args!("function '{name}'")));
        }
        let mut call = Func::cust(Alias::new(name.to_ascii_lowercase()));
        for arg in args {
            call = call.arg(arg);
        }
        Ok(call.into())
    }

    /// Predicate for a positive operator
    #[allow(clippy::too_many_lines)]
    fn predicate(
        &self,
        options: &QueryOptions,
        param: &str,
        operator: Operator,
        kind: AttributeKind,
        lhs: SimpleExpr,
        operand: Operand,
    ) -> Result<SimpleExpr, QueryError> {
        let postgres = self.backend == DatabaseBackend::Postgres;
        let language = options.fulltext_language.replace('\'', "''");

        Ok(match operator {
            Operator::Exact => Expr::expr(lhs).eq(value(single(operand))),
            Operator::Gt => Expr::expr(lhs).gt(value(single(operand))),
            Operator::Gte => Expr::expr(lhs).gte(value(single(operand))),
            Operator::Lt => Expr::expr(lhs).lt(value(single(operand))),
            Operator::Lte => Expr::expr(lhs).lte(value(single(operand))),
            Operator::Range => {
                let Operand::Bounds(low, high) = operand else {
                    return Err(QueryError::malformed_parameter(param, "'range' expects two values"));
                };
                Expr::expr(lhs).between(value(low), value(high))
            }
            Operator::In => Expr::expr(lhs).is_in(operand.into_values().into_iter().map(value)),
            Operator::IsNull => Expr::expr(lhs).is_null(),
            Operator::IsNotNull => Expr::expr(lhs).is_not_null(),
            Operator::IExact => Expr::expr(Func::upper(lhs)).eq(text(single(operand)).to_uppercase()),
            Operator::IContains | Operator::IStartsWith | Operator::IEndsWith => {
                let pattern = like_pattern(operator, &text(single(operand)).to_uppercase());
                Expr::expr(Func::upper(lhs)).like(LikeExpr::new(pattern).escape(LIKE_ESCAPE))
            }
            Operator::StartsWith | Operator::EndsWith => {
                let needle = text(single(operand));
                match self.backend {
                    DatabaseBackend::Postgres => {
                        Expr::expr(lhs).like(LikeExpr::new(like_pattern(operator, &needle)).escape(LIKE_ESCAPE))
                    }
                    // LIKE ignores case on SQLite, GLOB does not
                    DatabaseBackend::Sqlite => {
                        let pattern = match operator {
                            Operator::StartsWith => format!("{}*", escape_glob(&needle)),
                            _ => format!("*{}", escape_glob(&needle)),
                        };
                        self.custom("{} GLOB {}", vec![lhs, value(Scalar::Text(pattern))])
                    }
                    DatabaseBackend::MySql => self.custom(
                        "{} LIKE BINARY {}",
                        vec![lhs, value(Scalar::Text(like_pattern(operator, &needle)))],
                    ),
                }
            }
            Operator::Match => match self.backend {
                DatabaseBackend::Postgres => self.custom(
                    &format!("to_tsvector('{language}', CAST({{}} AS TEXT)) @@ plainto_tsquery('{language}', {{}})"),
                    vec![lhs, value(single(operand))],
                ),
                DatabaseBackend::MySql => self.custom(
                    "MATCH ({}) AGAINST ({} IN NATURAL LANGUAGE MODE)",
                    vec![lhs, value(single(operand))],
                ),
                DatabaseBackend::Sqlite => return Err(self.unsupported(param, "'match'")),
            },
            Operator::Year | Operator::Month | Operator::Day => {
                Expr::expr(self.date_part(operator, lhs)).eq(value(single(operand)))
            }
            Operator::Contains if postgres && kind == AttributeKind::Collection => {
                self.array_predicate("@>", lhs, operand.into_values())
            }
            Operator::Contains if postgres => {
                let items = operand.into_values();
                let template = vec!["{} @> {}"; items.len()].join(" AND ");
                let exprs = items
                    .into_iter()
                    .flat_map(|item| [lhs.clone(), value(item)])
                    .collect();
                self.custom(&template, exprs)
            }
            Operator::Overlap if postgres => self.array_predicate("&&", lhs, operand.into_values()),
            Operator::HasAll if postgres => self.array_predicate("?&", lhs, keys(operand)),
            Operator::HasAny if postgres => self.array_predicate("?|", lhs, keys(operand)),
            Operator::HasKey if postgres => self.custom("{} ? {}", vec![lhs, value(single(operand))]),
            other => return Err(self.unsupported(param, format_args!("'{other}'"))),
        })
    }

    /// `lhs <op> $n` with the items bound as one array value
    fn array_predicate(&self, op: &str, lhs: SimpleExpr, items: Vec<Scalar>) -> SimpleExpr {
        self.custom(&format!("{{}} {op} {{}}"), vec![lhs, SimpleExpr::Value(array_value(items))])
    }

    fn date_part(&self, operator: Operator, expr: SimpleExpr) -> SimpleExpr {
        let (sql_part, strftime) = match operator {
            Operator::Year => ("YEAR", "%Y"),
            Operator::Month => ("MONTH", "%m"),
            _ => ("DAY", "%d"),
        };
        match self.backend {
            DatabaseBackend::Postgres => self.custom(&format!("CAST(EXTRACT({sql_part} FROM {{}}) AS INTEGER)"), vec![expr]),
            DatabaseBackend::MySql => Func::cust(Alias::new(sql_part)).arg(expr).into(),
            DatabaseBackend::Sqlite => {
                self.custom(&format!("CAST(strftime('{strftime}', {{}}) AS INTEGER)"), vec![expr])
            }
        }
    }

    /// Full-text search over root attributes
    fn fulltext(&self, options: &QueryOptions, resolver: &RelationResolver<'_>, fulltext: &FullText) -> Condition {
        let root = resolver.root();
        let columns: Vec<SimpleExpr> = fulltext
            .attributes
            .iter()
            .filter_map(|name| root.attribute(name))
            .map(|attribute| super::column(&root.storage, attribute.column_name()))
            .collect();
        let language = options.fulltext_language.replace('\'', "''");

        match self.backend {
            DatabaseBackend::Postgres => {
                let document = vec!["{}"; columns.len()].join(", ");
                let words: Vec<&str> = if fulltext.require_all {
                    vec![fulltext.phrase.as_str()]
                } else {
                    fulltext.words().collect()
                };
                let tsquery = vec![format!("plainto_tsquery('{language}', {{}})"); words.len()].join(" || ");
                let mut exprs = columns;
                exprs.extend(words.into_iter().map(|w| value(Scalar::Text(w.to_string()))));
                Condition::all().add(self.custom(
                    &format!("to_tsvector('{language}', concat_ws(' ', {document})) @@ ({tsquery})"),
                    exprs,
                ))
            }
            DatabaseBackend::MySql => {
                let Some(terms) = boolean_mode_terms(fulltext) else {
                    return like_fallback(&columns, fulltext);
                };
                let targets = vec!["{}"; columns.len()].join(", ");
                let mut exprs = columns;
                exprs.push(value(Scalar::Text(terms)));
                Condition::all().add(self.custom(&format!("MATCH ({targets}) AGAINST ({{}} IN BOOLEAN MODE)"), exprs))
            }
            _ => like_fallback(&columns, fulltext),
        }
    }
}

/// Every word must appear (or any word, per `require_all`) in at least one column
fn like_fallback(columns: &[SimpleExpr], fulltext: &FullText) -> Condition {
    let mut condition = if fulltext.require_all {
        Condition::all()
    } else {
        Condition::any()
    };
    for word in fulltext.words() {
        let pattern = format!("%{}%", escape_like_wildcards(word).to_uppercase());
        let mut any_column = Condition::any();
        for column in columns {
            any_column = any_column
                .add(Expr::expr(Func::upper(column.clone())).like(LikeExpr::new(pattern.clone()).escape(LIKE_ESCAPE)));
        }
        condition = condition.add(any_column);
    }
    condition
}

/// Words stripped of boolean-mode operators, `+`-prefixed when all are required
fn boolean_mode_terms(fulltext: &FullText) -> Option<String> {
    let terms: Vec<String> = fulltext
        .words()
        .map(|word| {
            word.chars()
                .filter(|c| !matches!(c, '+' | '-' | '<' | '>' | '(' | ')' | '~' | '*' | '"' | '@'))
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .map(|word| if fulltext.require_all { format!("+{word}") } else { word })
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

fn value(scalar: Scalar) -> SimpleExpr {
    SimpleExpr::Value(scalar.into())
}

/// Postgres array of the items' common element type, text when they differ
fn array_value(items: Vec<Scalar>) -> sea_orm::Value {
    let uniform = items
        .first()
        .is_none_or(|first| items.iter().all(|item| std::mem::discriminant(item) == std::mem::discriminant(first)));
    let element = match items.first() {
        Some(Scalar::Bool(_)) if uniform => ArrayType::Bool,
        Some(Scalar::Int(_)) if uniform => ArrayType::BigInt,
        Some(Scalar::Float(_)) if uniform => ArrayType::Double,
        Some(Scalar::Date(_)) if uniform => ArrayType::ChronoDate,
        Some(Scalar::DateTime(_)) if uniform => ArrayType::ChronoDateTime,
        Some(Scalar::Uuid(_)) if uniform => ArrayType::Uuid,
        _ => ArrayType::String,
    };
    let values: Vec<sea_orm::Value> = if matches!(element, ArrayType::String) {
        items.into_iter().map(|item| sea_orm::Value::from(text(item))).collect()
    } else {
        items.into_iter().map(sea_orm::Value::from).collect()
    };
    sea_orm::Value::Array(element, Some(Box::new(values)))
}

/// JSON keys are always text
fn keys(operand: Operand) -> Vec<Scalar> {
    operand.into_values().into_iter().map(|item| Scalar::Text(text(item))).collect()
}

fn single(operand: Operand) -> Scalar {
    operand.into_values().into_iter().next().unwrap_or(Scalar::Null)
}

fn text(scalar: Scalar) -> String {
    match scalar {
        Scalar::Text(s) => s,
        other => match other.to_json() {
            serde_json::Value::String(s) => s,
            json => json.to_string(),
        },
    }
}

fn like_pattern(operator: Operator, needle: &str) -> String {
    let escaped = escape_like_wildcards(needle);
    match operator {
        Operator::StartsWith | Operator::IStartsWith => format!("{escaped}%"),
        Operator::EndsWith | Operator::IEndsWith => format!("%{escaped}"),
        _ => format!("%{escaped}%"),
    }
}

/// Bracket GLOB metacharacters so they match literally
fn escape_glob(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' | '?' | '[' => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
