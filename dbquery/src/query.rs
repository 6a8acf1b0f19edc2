use crate::config::QueryOptions;
use crate::errors::QueryError;
use crate::filtering::aggregate::{AggregateSpec, parse_aggregate};
use crate::filtering::conditions::{FilterNode, FilterTreeBuilder};
use crate::filtering::joined::{RelationFetchSpec, parse_relations};
use crate::filtering::pagination::{PaginationSpec, parse_pagination};
use crate::filtering::params::{
    PARAM_GROUP_BY, PARAM_GROUP_LIMIT, PARAM_LIMIT, PARAM_OFFSET, PARAM_ORDER, PARAM_RELATIONS,
    PARAM_SEARCH, PARAM_TOTAL_COUNT, PARAM_TOTALS, QueryParams,
};
use crate::filtering::sort::{OrderSpec, parse_order};
use crate::schema::ResourceSchema;

/// Backend-independent model of one list request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListQuery {
    pub filter: Option<FilterNode>,
    pub order: OrderSpec,
    pub pagination: PaginationSpec,
    pub aggregate: AggregateSpec,
    pub relations: RelationFetchSpec,
}

impl ListQuery {
    /// Route every parameter to its builder.
    ///
    /// Reserved keys go to the order, pagination, aggregation and relation
    /// parsers; `search` and everything else feed the filter tree.
    ///
    /// # Errors
    ///
    /// Returns the first `Malformed*` error encountered.
    pub fn parse(
        params: &QueryParams,
        schema: &ResourceSchema,
        options: &QueryOptions,
    ) -> Result<Self, QueryError> {
        let mut filters = FilterTreeBuilder::new(schema, options);
        let mut order = Vec::new();
        let mut totals = Vec::new();
        let mut group_by = Vec::new();
        let mut relations = Vec::new();
        let mut limit = None;
        let mut offset = None;
        let mut total_count = None;
        let mut group_limit = None;

        for (key, values) in params.grouped() {
            match key {
                PARAM_ORDER => order.extend(values),
                PARAM_TOTALS => totals.extend(values),
                PARAM_GROUP_BY => group_by.extend(values),
                PARAM_RELATIONS => relations.extend(values),
                PARAM_LIMIT => limit = Some(single(key, &values)?),
                PARAM_OFFSET => offset = Some(single(key, &values)?),
                PARAM_TOTAL_COUNT => total_count = Some(single(key, &values)?),
                PARAM_GROUP_LIMIT => group_limit = Some(single(key, &values)?),
                PARAM_SEARCH => {
                    for raw in values {
                        filters.add_search(raw)?;
                    }
                }
                _ => filters.add_param(key, &values)?,
            }
        }

        let query = Self {
            filter: filters.build(),
            order: parse_order(&order)?,
            pagination: parse_pagination(limit, offset, total_count, schema, options)?,
            aggregate: parse_aggregate(&totals, &group_by, group_limit)?,
            relations: parse_relations(&relations),
        };

        tracing::trace!(
            resource = %schema.name,
            filtered = query.filter.is_some(),
            order = query.order.0.len(),
            limit = ?query.pagination.limit,
            "Parsed list request"
        );
        Ok(query)
    }
}

fn single<'v>(key: &str, values: &[&'v str]) -> Result<&'v str, QueryError> {
    match values {
        [value] => Ok(value),
        _ => Err(QueryError::malformed_parameter(key, "given more than once")),
    }
}
