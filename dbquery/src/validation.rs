//! Schema validation
//!
//! Checks a parsed [`ListQuery`] against the resource schema before any backend
//! sees it: every attribute path must resolve, every operator must accept the
//! attribute's kind, and every operand must coerce. Validation stops at the first
//! problem.
//!
//! # Example
//!
//! ```rust,ignore
//! let query = resource.parse(&params)?;
//! dbquery::validation::validate(&registry, resource.schema(), &query)?;
//! ```

use crate::backends::resolver::RelationResolver;
use crate::errors::QueryError;
use crate::filtering::aggregate::MetricFunction;
use crate::filtering::conditions::{Comparison, FilterNode};
use crate::filtering::params::{PARAM_GROUP_BY, PARAM_ORDER, PARAM_TEXT_QUERY, PARAM_TOTALS};
use crate::filtering::search::FullText;
use crate::query::ListQuery;
use crate::registry::SchemaRegistry;
use crate::schema::{AttributeKind, ResourceSchema};
use crate::values;

/// Validate every part of `query`
///
/// # Errors
///
/// Returns `UnknownAttribute`, `InvalidRelationPath`, `UnsupportedOperator` or
/// `MalformedParameter` for the first invalid node.
pub fn validate(
    registry: &SchemaRegistry,
    schema: &ResourceSchema,
    query: &ListQuery,
) -> Result<(), QueryError> {
    let mut validator = SchemaValidator {
        resolver: RelationResolver::new(registry, schema),
    };

    if let Some(filter) = &query.filter {
        filter.for_each_leaf(&mut |leaf| validator.leaf(leaf))?;
    }
    validator.order(query)?;
    validator.aggregate(query)?;
    validator.resolver.resolve_fetch(&query.relations)?;
    Ok(())
}

struct SchemaValidator<'a> {
    resolver: RelationResolver<'a>,
}

impl SchemaValidator<'_> {
    fn leaf(&mut self, leaf: &FilterNode) -> Result<(), QueryError> {
        match leaf {
            FilterNode::Comparison(comparison) => self.comparison(comparison),
            FilterNode::FullText(fulltext) => self.fulltext(fulltext),
            FilterNode::Logical { .. } => Ok(()),
        }
    }

    fn comparison(&mut self, comparison: &Comparison) -> Result<(), QueryError> {
        let resolved = self
            .resolver
            .resolve_attribute(&comparison.param, &comparison.path)?;
        let attribute = resolved.attribute;

        if !comparison.operator.accepts(attribute.kind) {
            return Err(QueryError::unsupported_operator(
                &comparison.param,
                comparison.operator.name(),
                &attribute.name,
                attribute.kind,
            ));
        }

        values::coerce(comparison, attribute)?;
        Ok(())
    }

    fn fulltext(&mut self, fulltext: &FullText) -> Result<(), QueryError> {
        if fulltext.attributes.is_empty() {
            return Err(QueryError::unsupported_operator(
                &fulltext.param,
                PARAM_TEXT_QUERY,
                &self.resolver.root().name,
                "resource without full-text attributes",
            ));
        }

        let root = self.resolver.root();
        for name in &fulltext.attributes {
            let attribute = root
                .attribute(name)
                .ok_or_else(|| QueryError::unknown_attribute(&fulltext.param, name))?;
            if attribute.kind != AttributeKind::String {
                return Err(QueryError::unsupported_operator(
                    &fulltext.param,
                    PARAM_TEXT_QUERY,
                    name,
                    attribute.kind,
                ));
            }
        }
        Ok(())
    }

    fn order(&mut self, query: &ListQuery) -> Result<(), QueryError> {
        for item in query.order.iter() {
            let resolved = self.resolver.resolve_attribute(PARAM_ORDER, &item.path)?;
            if !resolved.attribute.kind.is_scalar() {
                return Err(QueryError::unsupported_operator(
                    PARAM_ORDER,
                    PARAM_ORDER,
                    item.path.to_string(),
                    resolved.attribute.kind,
                ));
            }
        }
        Ok(())
    }

    fn aggregate(&mut self, query: &ListQuery) -> Result<(), QueryError> {
        for metric in &query.aggregate.metrics {
            let Some(path) = &metric.path else {
                continue;
            };
            let kind = self.resolver.resolve_attribute(PARAM_TOTALS, path)?.attribute.kind;
            let accepted = match metric.function {
                MetricFunction::Count => true,
                MetricFunction::Sum | MetricFunction::Avg => kind == AttributeKind::Numeric,
                MetricFunction::Min | MetricFunction::Max => kind.is_ordered(),
            };
            if !accepted {
                return Err(QueryError::unsupported_operator(
                    PARAM_TOTALS,
                    metric.function.name(),
                    path.to_string(),
                    kind,
                ));
            }
        }

        for path in &query.aggregate.group_by {
            let kind = self.resolver.resolve_attribute(PARAM_GROUP_BY, path)?.attribute.kind;
            if !kind.is_scalar() {
                return Err(QueryError::unsupported_operator(
                    PARAM_GROUP_BY,
                    PARAM_GROUP_BY,
                    path.to_string(),
                    kind,
                ));
            }
        }
        Ok(())
    }
}
