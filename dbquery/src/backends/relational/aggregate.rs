//! Grouped totals.
//!
//! Every group and metric becomes an aliased column of one `GROUP BY` query. A
//! `group_limit` keeps the top N rows per parent group by ranking the grouped
//! rows with `ROW_NUMBER()` in a subquery.

use super::{FilterPart, RelationalCompiler};
use crate::backends::CompileContext;
use crate::errors::QueryError;
use crate::filtering::aggregate::{AggregateSpec, MetricFunction};
use crate::filtering::params::{PARAM_GROUP_BY, PARAM_TOTALS};
use sea_orm::sea_query::{Alias, Asterisk, Expr, Func, Order, Query, SelectStatement, SimpleExpr};

/// Alias prefix for joins owned by the totals query
const TOTALS_PREFIX: &str = "totals_";
const GROUPED: &str = "grouped";
const ROW_NUMBER: &str = "group_rank";

/// Grouped aggregate query and the layout of its result rows
#[derive(Debug, Clone)]
pub struct TotalsQuery {
    pub statement: SelectStatement,
    /// Columns holding group values, outermost group first
    pub dimensions: Vec<String>,
    /// Columns holding metric values
    pub metrics: Vec<String>,
}

impl RelationalCompiler {
    pub(super) fn totals(
        &self,
        ctx: &CompileContext<'_>,
        filter: &FilterPart,
        spec: &AggregateSpec,
    ) -> Result<Option<TotalsQuery>, QueryError> {
        if spec.is_empty() {
            return Ok(None);
        }
        let root = ctx.schema;
        let mut resolver = ctx.resolver().with_prefix(TOTALS_PREFIX);

        let mut dimensions = Vec::with_capacity(spec.group_by.len());
        for path in &spec.group_by {
            dimensions.push((path.label(), self.attribute_expr(&mut resolver, PARAM_GROUP_BY, path)?));
        }
        let mut arguments = Vec::with_capacity(spec.metrics.len());
        for metric in &spec.metrics {
            let argument = match &metric.path {
                Some(path) => Some(self.attribute_expr(&mut resolver, PARAM_TOTALS, path)?),
                None => None,
            };
            arguments.push((metric, argument));
        }

        // A bare count must not count the rows a to-many group join adds
        let distinct_count = resolver.has_to_many() && root.primary_key.len() == 1;
        let metrics: Vec<(String, SimpleExpr)> = arguments
            .into_iter()
            .map(|(metric, argument)| {
                let expr = match (metric.function, argument) {
                    (MetricFunction::Count, None) if distinct_count => {
                        Func::count_distinct(super::column(&root.storage, &root.primary_key[0]))
                    }
                    (MetricFunction::Count, None) => Func::count(Expr::col(Asterisk)),
                    (MetricFunction::Count, Some(arg)) => Func::count(arg),
                    (MetricFunction::Sum, Some(arg)) => Func::sum(arg),
                    (MetricFunction::Avg, Some(arg)) => Func::avg(arg),
                    (MetricFunction::Min, Some(arg)) => Func::min(arg),
                    (MetricFunction::Max, Some(arg)) => Func::max(arg),
                    (_, None) => Func::count(Expr::col(Asterisk)),
                };
                (metric.label(), expr.into())
            })
            .collect();

        let mut select = Query::select();
        select.from(Alias::new(&root.storage));
        filter.apply(&mut select);
        for join in self.table_joins(&resolver, PARAM_TOTALS)? {
            join.apply(&mut select);
        }
        for (label, expr) in &dimensions {
            select.expr_as(expr.clone(), Alias::new(label));
        }
        if !dimensions.is_empty() {
            select.add_group_by(dimensions.iter().map(|(_, expr)| expr.clone()));
        }
        for (label, expr) in &metrics {
            select.expr_as(expr.clone(), Alias::new(label));
        }

        let statement = match (spec.group_limit, dimensions.split_last()) {
            (Some(limit), Some((_, parents))) => {
                let mut template = String::from("ROW_NUMBER() OVER (");
                let mut exprs: Vec<SimpleExpr> = Vec::with_capacity(parents.len() + metrics.len());
                if !parents.is_empty() {
                    template.push_str("PARTITION BY ");
                    template.push_str(&vec!["{}"; parents.len()].join(", "));
                    template.push(' ');
                    exprs.extend(parents.iter().map(|(_, expr)| expr.clone()));
                }
                template.push_str("ORDER BY ");
                template.push_str(&vec!["{} DESC"; metrics.len()].join(", "));
                template.push(')');
                exprs.extend(metrics.iter().map(|(_, expr)| expr.clone()));
                select.expr_as(self.custom(&template, exprs), Alias::new(ROW_NUMBER));

                let mut outer = Query::select();
                for (label, _) in dimensions.iter().chain(&metrics) {
                    outer.column((Alias::new(GROUPED), Alias::new(label)));
                }
                outer
                    .from_subquery(select, Alias::new(GROUPED))
                    .and_where(
                        Expr::col((Alias::new(GROUPED), Alias::new(ROW_NUMBER))).lte(i64::try_from(limit).unwrap_or(i64::MAX)),
                    );
                let ranked = |label: &str| -> SimpleExpr { super::column(GROUPED, label) };
                order_groups(&mut outer, &dimensions, &metrics, ranked);
                outer
            }
            _ => {
                let exprs: Vec<(String, SimpleExpr)> = dimensions.iter().chain(&metrics).cloned().collect();
                order_groups(&mut select, &dimensions, &metrics, |label| {
                    exprs
                        .iter()
                        .find(|(l, _)| l == label)
                        .map_or_else(|| Expr::col(Alias::new(label)).into(), |(_, expr)| expr.clone())
                });
                select
            }
        };

        tracing::trace!(
            resource = %root.name,
            groups = dimensions.len(),
            metrics = metrics.len(),
            "Relational totals"
        );
        Ok(Some(TotalsQuery {
            statement,
            dimensions: dimensions.into_iter().map(|(label, _)| label).collect(),
            metrics: metrics.into_iter().map(|(label, _)| label).collect(),
        }))
    }
}

/// Parent groups ascending, then metrics descending, then the innermost group
fn order_groups(
    select: &mut SelectStatement,
    dimensions: &[(String, SimpleExpr)],
    metrics: &[(String, SimpleExpr)],
    expr: impl Fn(&str) -> SimpleExpr,
) {
    let Some(((innermost, _), parents)) = dimensions.split_last() else {
        return;
    };
    for (label, _) in parents {
        select.order_by_expr(expr(label), Order::Asc);
    }
    for (label, _) in metrics {
        select.order_by_expr(expr(label), Order::Desc);
    }
    select.order_by_expr(expr(innermost), Order::Asc);
}
