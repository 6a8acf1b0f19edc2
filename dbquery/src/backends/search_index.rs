//! Search-index backend producing Elasticsearch-style request bodies.
//!
//! Only embedded relations exist here: to-one relations are object fields
//! addressed with dotted paths, to-many relations are `nested` fields. Sibling
//! predicates on the same nested path inside one logical node share a single
//! `nested` query so they must hold for the same nested object.

use super::document::dotted;
use super::resolver::{JoinHandle, RelationResolver};
use super::{BackendKind, CompileContext, QueryCompiler};
use crate::errors::QueryError;
use crate::filtering::aggregate::{AggregateSpec, MetricFunction};
use crate::filtering::conditions::{Comparison, FilterNode, LogicalKind};
use crate::filtering::operators::Operator;
use crate::filtering::params::{AttributePath, PARAM_GROUP_BY, PARAM_ORDER, PARAM_TOTALS};
use crate::filtering::search::{FullText, escape_wildcard};
use crate::filtering::sort::Direction;
use crate::query::ListQuery;
use crate::schema::{AttributeDef, AttributeKind};
use crate::values::{self, Operand, Scalar};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Bucket count for every group level but the last, and for the last when no
/// `group_limit` is given
const DEFAULT_BUCKETS: u64 = 10_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchIndexCompiler;

impl SearchIndexCompiler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn field<'a>(
        &self,
        resolver: &mut RelationResolver<'a>,
        param: &str,
        path: &AttributePath,
    ) -> Result<Field<'a>, QueryError> {
        let resolved = resolver.resolve_attribute(param, path)?;
        let (prefix, nested) = match resolved.join {
            Some(handle) => {
                let (prefix, nested) = self.locate(resolver, handle, param)?;
                (Some(prefix), nested)
            }
            None => (None, Vec::new()),
        };
        let path = dotted(prefix, resolved.attribute.column_name());
        let term = match &resolved.attribute.keyword_field {
            Some(keyword) => format!("{path}.{keyword}"),
            None => path.clone(),
        };
        Ok(Field {
            path,
            term,
            nested,
            attribute: resolved.attribute,
        })
    }

    /// Object path of a relation and the nested paths enclosing it, outermost first
    fn locate(
        &self,
        resolver: &RelationResolver<'_>,
        handle: JoinHandle,
        param: &str,
    ) -> Result<(String, Vec<String>), QueryError> {
        let join = self.resolve_relation(resolver, handle, param)?;
        let mut nested = match resolver.join(handle).parent {
            Some(parent) => self.locate(resolver, parent, param)?.1,
            None => Vec::new(),
        };
        if let SearchIndexJoin::Nested { path } = &join {
            nested.push(path.clone());
        }
        Ok((join.path().to_string(), nested))
    }

    fn clause(&self, resolver: &mut RelationResolver<'_>, node: &FilterNode) -> Result<Clause, QueryError> {
        match node {
            FilterNode::Comparison(comparison) => self.comparison(resolver, comparison),
            FilterNode::FullText(fulltext) => Ok(Clause::plain(fulltext_query(resolver, fulltext))),
            FilterNode::Logical { kind, children } => {
                let mut groups: Vec<(Vec<String>, Vec<Value>)> = Vec::new();
                let mut plain = Vec::new();
                for child in children {
                    let clause = self.clause(resolver, child)?;
                    if clause.nested.is_empty() {
                        plain.push(clause.query);
                    } else if let Some((_, queries)) = groups.iter_mut().find(|(path, _)| *path == clause.nested) {
                        queries.push(clause.query);
                    } else {
                        groups.push((clause.nested, vec![clause.query]));
                    }
                }

                let mut queries = Vec::with_capacity(plain.len() + groups.len());
                for (nested, grouped) in groups {
                    let inner = match kind {
                        LogicalKind::Or => combine(LogicalKind::Or, grouped),
                        LogicalKind::And | LogicalKind::Not => combine(LogicalKind::And, grouped),
                    };
                    queries.push(wrap_nested(&nested, inner));
                }
                queries.extend(plain);

                Ok(Clause::plain(match kind {
                    LogicalKind::Not => json!({ "bool": { "must_not": queries } }),
                    other => combine(*other, queries),
                }))
            }
        }
    }

    fn comparison(&self, resolver: &mut RelationResolver<'_>, comparison: &Comparison) -> Result<Clause, QueryError> {
        let param = comparison.param.as_str();
        if comparison.function.is_some() {
            return Err(QueryError::unsupported_by_backend(
                param,
                BackendKind::SearchIndex,
                format!("'{}'", comparison.operator),
            ));
        }
        let field = self.field(resolver, param, &comparison.path)?;
        let operand = values::coerce(comparison, field.attribute)?;
        let operator = comparison.operator;
        let query = predicate(param, operator.positive(), &field, operand)?;
        Ok(Clause {
            query: if operator.is_negated() {
                json!({ "bool": { "must_not": [query] } })
            } else {
                query
            },
            nested: field.nested,
        })
    }

    fn sort(&self, resolver: &mut RelationResolver<'_>, query: &ListQuery) -> Result<Vec<Value>, QueryError> {
        let mut sort = Vec::with_capacity(query.order.0.len());
        for item in query.order.iter() {
            let field = self.field(resolver, PARAM_ORDER, &item.path)?;
            let mut spec = Map::new();
            spec.insert(
                "order".into(),
                json!(match item.direction {
                    Direction::Asc => "asc",
                    Direction::Desc => "desc",
                }),
            );
            if let Some(nested) = nested_sort(&field.nested) {
                spec.insert("nested".into(), nested);
            }
            sort.push(json!({ field.term: spec }));
        }
        Ok(sort)
    }

    fn aggregations(
        &self,
        ctx: &CompileContext<'_>,
        spec: &AggregateSpec,
    ) -> Result<Option<(Value, Vec<String>, Vec<String>)>, QueryError> {
        if spec.is_empty() {
            return Ok(None);
        }
        let mut resolver = ctx.resolver();

        let mut dimensions = Vec::with_capacity(spec.group_by.len());
        for path in &spec.group_by {
            let field = self.field(&mut resolver, PARAM_GROUP_BY, path)?;
            if !field.nested.is_empty() {
                return Err(nested_aggregate(PARAM_GROUP_BY, path));
            }
            dimensions.push((path.label(), field.term));
        }

        let mut metrics = Map::new();
        let mut order = Vec::new();
        let mut labels = Vec::with_capacity(spec.metrics.len());
        for metric in &spec.metrics {
            let label = metric.label();
            labels.push(label.clone());
            let Some(path) = &metric.path else {
                if dimensions.is_empty() {
                    metrics.insert(label, json!({ "filter": { "match_all": {} } }));
                } else {
                    order.push(json!({ "_count": "desc" }));
                }
                continue;
            };
            let field = self.field(&mut resolver, PARAM_TOTALS, path)?;
            if !field.nested.is_empty() {
                return Err(nested_aggregate(PARAM_TOTALS, path));
            }
            let function = match metric.function {
                MetricFunction::Count => "value_count",
                other => other.name(),
            };
            metrics.insert(label.clone(), json!({ function: { "field": field.term } }));
            order.push(json!({ label: "desc" }));
        }
        order.push(json!({ "_key": "asc" }));

        // Parent levels by group value, the innermost level by its metrics
        let mut aggs = metrics;
        for (depth, (label, term)) in dimensions.iter().enumerate().rev() {
            let innermost = depth + 1 == dimensions.len();
            let size = match spec.group_limit {
                Some(limit) if innermost => limit,
                _ => DEFAULT_BUCKETS,
            };
            let order = if innermost {
                Value::Array(order.clone())
            } else {
                json!([{ "_key": "asc" }])
            };
            let mut bucket = Map::new();
            bucket.insert("terms".into(), json!({ "field": term, "size": size, "order": order }));
            if !aggs.is_empty() {
                bucket.insert("aggs".into(), Value::Object(aggs));
            }
            aggs = Map::new();
            aggs.insert(label.clone(), Value::Object(bucket));
        }

        Ok(Some((
            Value::Object(aggs),
            dimensions.into_iter().map(|(label, _)| label).collect(),
            labels,
        )))
    }
}

impl QueryCompiler for SearchIndexCompiler {
    type Output = SearchIndexQuery;
    type Join = SearchIndexJoin;

    fn kind(&self) -> BackendKind {
        BackendKind::SearchIndex
    }

    fn compile(&self, ctx: &CompileContext<'_>, query: &ListQuery) -> Result<SearchIndexQuery, QueryError> {
        let mut resolver = ctx.resolver();

        let filter = match &query.filter {
            Some(node) => {
                let clause = self.clause(&mut resolver, node)?;
                Some(wrap_nested(&clause.nested, clause.query))
            }
            None => None,
        };
        let sort = self.sort(&mut resolver, query)?;

        let mut body = Map::new();
        let query_clause = match filter {
            // Relevance no longer decides the ranking
            Some(filter) if !sort.is_empty() => json!({ "constant_score": { "filter": filter } }),
            Some(filter) => filter,
            None => json!({ "match_all": {} }),
        };
        body.insert("query".into(), query_clause);
        if !sort.is_empty() {
            body.insert("sort".into(), Value::Array(sort));
        }
        body.insert("from".into(), json!(query.pagination.offset));
        if let Some(limit) = query.pagination.limit {
            body.insert("size".into(), json!(limit));
        }
        if query.pagination.want_total {
            body.insert("track_total_hits".into(), json!(true));
        }

        let (dimensions, metrics) = match self.aggregations(ctx, &query.aggregate)? {
            Some((aggs, dimensions, metrics)) => {
                body.insert("aggs".into(), aggs);
                (dimensions, metrics)
            }
            None => (Vec::new(), Vec::new()),
        };

        tracing::trace!(resource = %ctx.schema.name, "Search-index request body");
        Ok(SearchIndexQuery {
            index: ctx.schema.storage.clone(),
            body: Value::Object(body),
            dimensions,
            metrics,
        })
    }

    fn resolve_relation(
        &self,
        resolver: &RelationResolver<'_>,
        handle: JoinHandle,
        param: &str,
    ) -> Result<SearchIndexJoin, QueryError> {
        let plan = resolver.join(handle);
        if !plan.relation.embedded {
            return Err(QueryError::unsupported_by_backend(
                param,
                BackendKind::SearchIndex,
                format!("reference relation '{}'", plan.relation.name),
            ));
        }
        let parent = match plan.parent {
            Some(parent) => Some(self.resolve_relation(resolver, parent, param)?.path().to_string()),
            None => None,
        };
        let path = dotted(parent, &plan.relation.name);
        Ok(if plan.relation.many {
            SearchIndexJoin::Nested { path }
        } else {
            SearchIndexJoin::Object { path }
        })
    }
}

/// How an embedded relation is stored in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchIndexJoin {
    Object { path: String },
    Nested { path: String },
}

impl SearchIndexJoin {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Object { path } | Self::Nested { path } => path,
        }
    }
}

/// Search request for one list call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchIndexQuery {
    pub index: String,
    pub body: Value,
    /// Terms aggregations, outermost first
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
}

impl SearchIndexQuery {
    /// Flatten the `aggregations` section of a search response into one row per
    /// innermost bucket, keyed like relational totals rows
    #[must_use]
    pub fn totals_rows(&self, aggregations: &Value) -> Vec<Map<String, Value>> {
        let mut rows = Vec::new();
        self.collect_rows(aggregations, 0, &Map::new(), &mut rows);
        rows
    }

    fn collect_rows(&self, node: &Value, depth: usize, row: &Map<String, Value>, rows: &mut Vec<Map<String, Value>>) {
        let Some(dimension) = self.dimensions.get(depth) else {
            let mut row = row.clone();
            for metric in &self.metrics {
                let value = match node.get(metric) {
                    Some(agg) => agg.get("value").or_else(|| agg.get("doc_count")),
                    None => node.get("doc_count"),
                };
                row.insert(metric.clone(), value.cloned().unwrap_or(Value::Null));
            }
            rows.push(row);
            return;
        };
        let buckets = node
            .get(dimension)
            .and_then(|agg| agg.get("buckets"))
            .and_then(Value::as_array);
        for bucket in buckets.into_iter().flatten() {
            let mut row = row.clone();
            row.insert(dimension.clone(), bucket.get("key").cloned().unwrap_or(Value::Null));
            self.collect_rows(bucket, depth + 1, &row, rows);
        }
    }
}

struct Field<'a> {
    /// Full dotted path, used for full-text and range queries
    path: String,
    /// Keyword sub-field when one exists, used for term-level queries
    term: String,
    nested: Vec<String>,
    attribute: &'a AttributeDef,
}

/// Compiled query plus the nested paths it still has to be wrapped in
struct Clause {
    query: Value,
    nested: Vec<String>,
}

impl Clause {
    fn plain(query: Value) -> Self {
        Self {
            query,
            nested: Vec::new(),
        }
    }
}

fn predicate(param: &str, operator: Operator, field: &Field<'_>, operand: Operand) -> Result<Value, QueryError> {
    let term = field.term.as_str();
    Ok(match operator {
        Operator::Exact => json!({ "term": { term: single(operand) } }),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            json!({ "range": { term: { operator.name(): single(operand) } } })
        }
        Operator::Range => match operand {
            Operand::Bounds(low, high) => json!({ "range": { term: { "gte": low.to_json(), "lte": high.to_json() } } }),
            _ => return Err(QueryError::malformed_parameter(param, "'range' expects two values")),
        },
        Operator::In | Operator::Overlap => json!({ "terms": { term: many(operand) } }),
        Operator::IsNull => json!({ "bool": { "must_not": [{ "exists": { "field": field.path } }] } }),
        Operator::IsNotNull => json!({ "exists": { "field": field.path } }),
        Operator::IExact => json!({ "term": { term: { "value": single(operand), "case_insensitive": true } } }),
        Operator::StartsWith | Operator::IStartsWith => json!({
            "prefix": { term: { "value": single(operand), "case_insensitive": operator == Operator::IStartsWith } }
        }),
        Operator::EndsWith | Operator::IEndsWith | Operator::IContains => {
            let needle = escape_wildcard(&text(single(operand)));
            let pattern = if operator == Operator::IContains {
                format!("*{needle}*")
            } else {
                format!("*{needle}")
            };
            json!({
                "wildcard": { term: { "value": pattern, "case_insensitive": operator != Operator::EndsWith } }
            })
        }
        Operator::Match => json!({ "match": { field.path.as_str(): { "query": single(operand) } } }),
        Operator::Contains if field.attribute.kind == AttributeKind::Collection => {
            let terms: Vec<Value> = many(operand)
                .into_iter()
                .map(|item| json!({ "term": { term: item } }))
                .collect();
            combine(LogicalKind::And, terms)
        }
        Operator::Contains => {
            let mut terms = Vec::new();
            for item in many(operand) {
                if let Value::Object(entries) = item {
                    terms.extend(
                        entries
                            .into_iter()
                            .map(|(key, value)| json!({ "term": { format!("{}.{key}", field.path): value } })),
                    );
                } else {
                    terms.push(json!({ "term": { term: item } }));
                }
            }
            combine(LogicalKind::And, terms)
        }
        Operator::HasKey => json!({ "exists": { "field": format!("{}.{}", field.path, text(single(operand))) } }),
        Operator::HasAll | Operator::HasAny => {
            let exists: Vec<Value> = many(operand)
                .iter()
                .map(|key| json!({ "exists": { "field": format!("{}.{}", field.path, text(key.clone())) } }))
                .collect();
            let kind = if operator == Operator::HasAll {
                LogicalKind::And
            } else {
                LogicalKind::Or
            };
            combine(kind, exists)
        }
        Operator::Year | Operator::Month | Operator::Day => {
            let getter = match operator {
                Operator::Year => "getYear",
                Operator::Month => "getMonthValue",
                _ => "getDayOfMonth",
            };
            json!({
                "script": {
                    "script": {
                        "source": format!(
                            "doc[params.field].size() != 0 && doc[params.field].value.{getter}() == params.value"
                        ),
                        "params": { "field": field.path, "value": single(operand) }
                    }
                }
            })
        }
        other => {
            return Err(QueryError::unsupported_by_backend(
                param,
                BackendKind::SearchIndex,
                format!("'{other}'"),
            ));
        }
    })
}

fn fulltext_query(resolver: &RelationResolver<'_>, fulltext: &FullText) -> Value {
    let root = resolver.root();
    let fields: Vec<&str> = fulltext
        .attributes
        .iter()
        .filter_map(|name| root.attribute(name))
        .map(AttributeDef::column_name)
        .collect();
    json!({
        "multi_match": {
            "query": fulltext.phrase,
            "fields": fields,
            "operator": if fulltext.require_all { "and" } else { "or" },
        }
    })
}

/// Single queries pass through unwrapped
fn combine(kind: LogicalKind, mut queries: Vec<Value>) -> Value {
    if queries.len() == 1 {
        return queries.remove(0);
    }
    match kind {
        LogicalKind::Or => json!({ "bool": { "should": queries, "minimum_should_match": 1 } }),
        LogicalKind::And => json!({ "bool": { "must": queries } }),
        LogicalKind::Not => json!({ "bool": { "must_not": queries } }),
    }
}

fn wrap_nested(paths: &[String], query: Value) -> Value {
    paths
        .iter()
        .rev()
        .fold(query, |query, path| json!({ "nested": { "path": path, "query": query } }))
}

fn nested_sort(paths: &[String]) -> Option<Value> {
    paths.iter().rev().fold(None, |inner, path| {
        let mut spec = Map::new();
        spec.insert("path".into(), json!(path));
        if let Some(inner) = inner {
            spec.insert("nested".into(), inner);
        }
        Some(Value::Object(spec))
    })
}

fn nested_aggregate(param: &str, path: &AttributePath) -> QueryError {
    QueryError::unsupported_by_backend(
        param,
        BackendKind::SearchIndex,
        format!("aggregating over nested path '{path}'"),
    )
}

fn single(operand: Operand) -> Value {
    operand
        .into_values()
        .first()
        .map_or(Value::Null, Scalar::to_json)
}

fn many(operand: Operand) -> Vec<Value> {
    operand.into_values().iter().map(Scalar::to_json).collect()
}

fn text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Backend, CompiledQuery};
    use crate::errors::ErrorKind;
    use crate::filtering::params::QueryParams;
    use crate::registry::SchemaRegistry;
    use crate::schema::{RelationDef, ResourceSchema};

    fn registry() -> SchemaRegistry {
        let articles = ResourceSchema::new("articles", "articles-v1")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
            .with_attribute(AttributeDef::new("title", AttributeKind::String).keyword("raw"))
            .with_attribute(AttributeDef::new("body", AttributeKind::String))
            .with_attribute(AttributeDef::new("tags", AttributeKind::Collection))
            .with_attribute(AttributeDef::new("meta", AttributeKind::Json))
            .with_attribute(AttributeDef::new("published", AttributeKind::DateTime))
            .with_relation(RelationDef::embedded("author", "authors", false))
            .with_relation(RelationDef::embedded("comments", "comments", true))
            .with_relation(RelationDef::to_one("publisher", "publishers", "publisher_id", "id"))
            .with_fulltext(&["title", "body"], false);
        let authors = ResourceSchema::new("authors", "authors")
            .with_attribute(AttributeDef::new("name", AttributeKind::String).keyword("raw"));
        let comments = ResourceSchema::new("comments", "comments")
            .with_attribute(AttributeDef::new("author", AttributeKind::String).keyword("raw"))
            .with_attribute(AttributeDef::new("votes", AttributeKind::Numeric));
        let publishers = ResourceSchema::new("publishers", "publishers")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric));
        SchemaRegistry::builder()
            .register(articles, Backend::search_index())
            .register(authors, Backend::search_index())
            .register(comments, Backend::search_index())
            .register(publishers, Backend::search_index())
            .build()
            .unwrap()
    }

    fn compile(query: &str) -> Result<SearchIndexQuery, QueryError> {
        let registry = registry();
        match registry
            .resource("articles")
            .unwrap()
            .compile(&QueryParams::from_query_string(query))?
        {
            CompiledQuery::SearchIndex(query) => Ok(query),
            other => panic!("expected search-index query, got {:?}", other.kind()),
        }
    }

    fn query_clause(query: &str) -> Value {
        compile(query).unwrap().body["query"].clone()
    }

    #[test]
    fn test_unfiltered_page() {
        let query = compile("limit=10&offset=20&total_count=1").unwrap();
        assert_eq!(query.index, "articles-v1");
        assert_eq!(
            query.body,
            json!({"query": {"match_all": {}}, "from": 20, "size": 10, "track_total_hits": true})
        );
    }

    #[test]
    fn test_term_queries_use_keyword_fields() {
        assert_eq!(query_clause("title=Rust"), json!({"term": {"title.raw": "Rust"}}));
        assert_eq!(query_clause("id__gte=3"), json!({"range": {"id": {"gte": 3}}}));
        assert_eq!(query_clause("id__range=9,3"), json!({"range": {"id": {"gte": 3, "lte": 9}}}));
        assert_eq!(query_clause("tags__in=a,b"), json!({"terms": {"tags": ["a", "b"]}}));
        assert_eq!(query_clause("body__isnotnull=1"), json!({"exists": {"field": "body"}}));
    }

    #[test]
    fn test_text_operators() {
        assert_eq!(
            query_clause("title__icontains=ru*st"),
            json!({"wildcard": {"title.raw": {"value": "*ru\\*st*", "case_insensitive": true}}})
        );
        assert_eq!(
            query_clause("title__startswith=Ru"),
            json!({"prefix": {"title.raw": {"value": "Ru", "case_insensitive": false}}})
        );
        assert_eq!(query_clause("body__match=async io"), json!({"match": {"body": {"query": "async io"}}}));
    }

    #[test]
    fn test_negated_operator() {
        assert_eq!(
            query_clause("title__notexact=x"),
            json!({"bool": {"must_not": [{"term": {"title.raw": "x"}}]}})
        );
    }

    #[test]
    fn test_logical_nodes() {
        assert_eq!(
            query_clause(r#"search={"or":[{"id":1},{"id":2}]}"#),
            json!({"bool": {"should": [{"term": {"id": 1}}, {"term": {"id": 2}}], "minimum_should_match": 1}})
        );
        assert_eq!(
            query_clause(r#"search={"not":{"id":1}}"#),
            json!({"bool": {"must_not": [{"term": {"id": 1}}]}})
        );
    }

    #[test]
    fn test_ordered_filter_uses_constant_score() {
        let body = compile("title=Rust&order=-published").unwrap().body;
        assert_eq!(body["query"], json!({"constant_score": {"filter": {"term": {"title.raw": "Rust"}}}}));
        assert_eq!(body["sort"], json!([{"published": {"order": "desc"}}]));
    }

    #[test]
    fn test_object_relation_is_a_dotted_path() {
        assert_eq!(query_clause("author__name=Ann"), json!({"term": {"author.name.raw": "Ann"}}));
    }

    #[test]
    fn test_nested_siblings_share_one_nested_query() {
        assert_eq!(
            query_clause("comments__author=ann&comments__votes__gt=3"),
            json!({"nested": {"path": "comments", "query": {"bool": {"must": [
                {"term": {"comments.author.raw": "ann"}},
                {"range": {"comments.votes": {"gt": 3}}}
            ]}}}})
        );
    }

    #[test]
    fn test_nested_sort() {
        let body = compile("order=comments__votes").unwrap().body;
        assert_eq!(
            body["sort"],
            json!([{"comments.votes": {"order": "asc", "nested": {"path": "comments"}}}])
        );
        assert_eq!(body["query"], json!({"match_all": {}}));
    }

    #[test]
    fn test_unsupported_constructs() {
        let err = compile("publisher__id=1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedByBackend);
        assert_eq!(err.param(), "publisher__id");

        let err = compile("title__func__lower__exact=x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedByBackend);

        let err = compile("group_by=comments__author").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedByBackend);
        assert_eq!(err.param(), "group_by");
    }

    #[test]
    fn test_fulltext_multi_match() {
        assert_eq!(
            query_clause("q=rust async"),
            json!({"multi_match": {"query": "rust async", "fields": ["title", "body"], "operator": "or"}})
        );
    }

    #[test]
    fn test_date_part_script() {
        let clause = query_clause("published__month=3");
        assert_eq!(clause["script"]["script"]["params"], json!({"field": "published", "value": 3}));
        assert!(clause["script"]["script"]["source"].as_str().unwrap().contains("getMonthValue()"));
    }

    #[test]
    fn test_grouped_aggregations() {
        let query = compile("totals=avg__id&group_by=author__name&group_limit=3").unwrap();
        assert_eq!(
            query.body["aggs"],
            json!({"author__name": {
                "terms": {"field": "author.name.raw", "size": 3, "order": [{"avg_id": "desc"}, {"_key": "asc"}]},
                "aggs": {"avg_id": {"avg": {"field": "id"}}}
            }})
        );
        assert_eq!(query.dimensions, vec!["author__name"]);
        assert_eq!(query.metrics, vec!["avg_id"]);
    }

    #[test]
    fn test_bare_count_aggregations() {
        let query = compile("totals=count").unwrap();
        assert_eq!(query.body["aggs"], json!({"count": {"filter": {"match_all": {}}}}));

        let query = compile("group_by=title,author__name").unwrap();
        assert_eq!(
            query.body["aggs"]["title"]["terms"],
            json!({"field": "title.raw", "size": 10_000, "order": [{"_key": "asc"}]})
        );
        assert_eq!(
            query.body["aggs"]["title"]["aggs"]["author__name"]["terms"]["order"],
            json!([{"_count": "desc"}, {"_key": "asc"}])
        );
    }

    #[test]
    fn test_totals_rows() {
        let query = compile("totals=count,sum__id&group_by=title").unwrap();
        let rows = query.totals_rows(&json!({
            "title": {"buckets": [
                {"key": "a", "doc_count": 4, "sum_id": {"value": 10.0}},
                {"key": "b", "doc_count": 1, "sum_id": {"value": 7.0}}
            ]}
        }));
        assert_eq!(rows.len(), 2);
        assert_eq!(Value::Object(rows[0].clone()), json!({"title": "a", "count": 4, "sum_id": 10.0}));

        let query = compile("totals=count").unwrap();
        let rows = query.totals_rows(&json!({"count": {"doc_count": 12}}));
        assert_eq!(Value::Object(rows[0].clone()), json!({"count": 12}));
    }
}
