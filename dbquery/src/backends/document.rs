//! Document-store backend producing MongoDB-style aggregation pipelines.
//!
//! Embedded relations become dotted field paths. Reference relations become
//! `$lookup` stages (followed by `$unwind` for to-one references) placed ahead
//! of the `$match`, and the looked-up fields are removed again with `$unset`
//! before the page is returned.

use super::resolver::{JoinHandle, RelationResolver};
use super::{BackendKind, CompileContext, QueryCompiler};
use crate::errors::QueryError;
use crate::filtering::aggregate::{AggregateSpec, MetricFunction};
use crate::filtering::conditions::{Comparison, FilterNode, LogicalKind};
use crate::filtering::operators::Operator;
use crate::filtering::params::{AttributePath, PARAM_GROUP_BY, PARAM_ORDER, PARAM_RELATIONS, PARAM_TOTALS};
use crate::filtering::search::{FullText, escape_regex};
use crate::filtering::sort::Direction;
use crate::query::ListQuery;
use crate::schema::{AttributeDef, AttributeKind, RelationDef};
use crate::values::{self, Operand, Scalar};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

const TOTALS_PREFIX: &str = "totals_";

const DEFAULT_FUNCTIONS: [(&str, &str); 8] = [
    ("lower", "$toLower"),
    ("upper", "$toUpper"),
    ("length", "$strLenCP"),
    ("abs", "$abs"),
    ("floor", "$floor"),
    ("ceil", "$ceil"),
    ("round", "$round"),
    ("size", "$size"),
];

/// Compiles list queries into aggregation pipelines.
///
/// `func`/`sfunc` names map to aggregation expression operators; the defaults
/// cover the common string and number helpers.
#[derive(Debug, Clone)]
pub struct DocumentCompiler {
    functions: BTreeMap<String, String>,
}

impl Default for DocumentCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: DEFAULT_FUNCTIONS
                .iter()
                .map(|(name, operator)| ((*name).to_string(), (*operator).to_string()))
                .collect(),
        }
    }

    /// Map function `name` to the expression operator `operator` (e.g. `$trunc`)
    #[must_use]
    pub fn with_function(mut self, name: impl Into<String>, operator: impl Into<String>) -> Self {
        self.functions.insert(name.into().to_ascii_lowercase(), operator.into());
        self
    }

    fn field<'a>(
        resolver: &mut RelationResolver<'a>,
        param: &str,
        path: &AttributePath,
    ) -> Result<(String, &'a AttributeDef), QueryError> {
        let resolved = resolver.resolve_attribute(param, path)?;
        let prefix = resolved.join.map(|handle| relation_path(resolver, handle));
        Ok((dotted(prefix, resolved.attribute.column_name()), resolved.attribute))
    }

    /// `$lookup` stages for every reference join, with the fields they add
    fn lookups(&self, resolver: &RelationResolver<'_>, param: &str) -> Result<(Vec<Value>, Vec<String>), QueryError> {
        let mut stages = Vec::new();
        let mut added = Vec::new();
        for handle in resolver.handles() {
            if let DocumentJoin::Lookup { path, stages: lookup } = self.resolve_relation(resolver, handle, param)? {
                stages.extend(lookup);
                added.push(path);
            }
        }
        Ok((stages, added))
    }

    fn filter(&self, resolver: &mut RelationResolver<'_>, node: &FilterNode) -> Result<Value, QueryError> {
        match node {
            FilterNode::Logical { kind, children } => {
                let children = children
                    .iter()
                    .map(|child| self.filter(resolver, child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match kind {
                    LogicalKind::And => json!({ "$and": children }),
                    LogicalKind::Or => json!({ "$or": children }),
                    LogicalKind::Not => json!({ "$nor": children }),
                })
            }
            FilterNode::Comparison(comparison) => self.comparison(resolver, comparison),
            FilterNode::FullText(fulltext) => Ok(fulltext_filter(resolver, fulltext)),
        }
    }

    fn comparison(&self, resolver: &mut RelationResolver<'_>, comparison: &Comparison) -> Result<Value, QueryError> {
        let param = comparison.param.as_str();
        let (field, attribute) = Self::field(resolver, param, &comparison.path)?;
        let operand = values::coerce(comparison, attribute)?;

        let Some(function) = &comparison.function else {
            let operator = comparison.operator;
            let predicate = self.predicate(param, operator.positive(), attribute, &field, operand)?;
            return Ok(negate_if(operator.is_negated(), predicate));
        };

        let mut expr = Value::String(format!("${field}"));
        for name in function.transforms() {
            expr = self.call(param, name, vec![expr])?;
        }
        if let Some(name) = function.predicate() {
            let mut args = vec![expr];
            args.extend(operand.into_values().iter().map(Scalar::to_json));
            return Ok(json!({ "$expr": self.call(param, name, args)? }));
        }
        let operator = comparison.value_operator();
        let predicate = self.expr_predicate(param, operator.positive(), expr, operand)?;
        Ok(negate_if(operator.is_negated(), json!({ "$expr": predicate })))
    }

    fn call(&self, param: &str, name: &str, mut args: Vec<Value>) -> Result<Value, QueryError> {
        let operator = self.functions.get(&name.to_ascii_lowercase()).ok_or_else(|| {
            QueryError::unsupported_by_backend(param, BackendKind::Document, format!("function '{name}'"))
        })?;
        let args = if args.len() == 1 { args.remove(0) } else { Value::Array(args) };
        Ok(json!({ operator.as_str(): args }))
    }

    /// Query-language predicate on a field path
    fn predicate(
        &self,
        param: &str,
        operator: Operator,
        attribute: &AttributeDef,
        field: &str,
        operand: Operand,
    ) -> Result<Value, QueryError> {
        let on_field = |condition: Value| json!({ field: condition });
        Ok(match operator {
            Operator::Exact => on_field(json!({ "$eq": single(operand) })),
            Operator::Gt => on_field(json!({ "$gt": single(operand) })),
            Operator::Gte => on_field(json!({ "$gte": single(operand) })),
            Operator::Lt => on_field(json!({ "$lt": single(operand) })),
            Operator::Lte => on_field(json!({ "$lte": single(operand) })),
            Operator::Range => {
                let [low, high] = bounds(param, operand)?;
                on_field(json!({ "$gte": low, "$lte": high }))
            }
            Operator::In | Operator::Overlap => on_field(json!({ "$in": many(operand) })),
            Operator::IsNull => on_field(json!({ "$eq": null })),
            Operator::IsNotNull => on_field(json!({ "$ne": null })),
            Operator::IExact
            | Operator::IContains
            | Operator::StartsWith
            | Operator::IStartsWith
            | Operator::EndsWith
            | Operator::IEndsWith => {
                let (pattern, options) = regex(operator, &text(single(operand)));
                on_field(json!({ "$regex": pattern, "$options": options }))
            }
            Operator::Contains if attribute.kind == AttributeKind::Collection => {
                on_field(json!({ "$all": many(operand) }))
            }
            Operator::Contains => {
                let mut clauses = Vec::new();
                for item in many(operand) {
                    match item {
                        Value::Object(entries) => {
                            clauses.extend(entries.into_iter().map(|(key, value)| json!({ format!("{field}.{key}"): value })));
                        }
                        other => clauses.push(on_field(json!({ "$eq": other }))),
                    }
                }
                all_of(clauses)
            }
            Operator::HasKey => json!({ format!("{field}.{}", text(single(operand))): { "$exists": true } }),
            Operator::HasAll | Operator::HasAny => {
                let clauses: Vec<Value> = many(operand)
                    .iter()
                    .map(|key| json!({ format!("{field}.{}", json_text(key)): { "$exists": true } }))
                    .collect();
                if operator == Operator::HasAll {
                    all_of(clauses)
                } else {
                    json!({ "$or": clauses })
                }
            }
            Operator::Year | Operator::Month | Operator::Day => {
                json!({ "$expr": { "$eq": [{ date_operator(operator): format!("${field}") }, single(operand)] } })
            }
            other => {
                return Err(QueryError::unsupported_by_backend(
                    param,
                    BackendKind::Document,
                    format!("'{other}'"),
                ));
            }
        })
    }

    /// Aggregation-expression predicate on a computed value
    fn expr_predicate(&self, param: &str, operator: Operator, expr: Value, operand: Operand) -> Result<Value, QueryError> {
        let compare = |op: &str, value: Value| json!({ op: [expr.clone(), value] });
        Ok(match operator {
            Operator::Exact => compare("$eq", single(operand)),
            Operator::Gt => compare("$gt", single(operand)),
            Operator::Gte => compare("$gte", single(operand)),
            Operator::Lt => compare("$lt", single(operand)),
            Operator::Lte => compare("$lte", single(operand)),
            Operator::Range => {
                let [low, high] = bounds(param, operand)?;
                json!({ "$and": [compare("$gte", low), compare("$lte", high)] })
            }
            Operator::In => compare("$in", Value::Array(many(operand))),
            Operator::IsNull => compare("$eq", Value::Null),
            Operator::IsNotNull => compare("$ne", Value::Null),
            Operator::IExact
            | Operator::IContains
            | Operator::StartsWith
            | Operator::IStartsWith
            | Operator::EndsWith
            | Operator::IEndsWith => {
                let (pattern, options) = regex(operator, &text(single(operand)));
                json!({ "$regexMatch": { "input": expr, "regex": pattern, "options": options } })
            }
            Operator::Year | Operator::Month | Operator::Day => {
                json!({ "$eq": [{ date_operator(operator): expr }, single(operand)] })
            }
            other => {
                return Err(QueryError::unsupported_by_backend(
                    param,
                    BackendKind::Document,
                    format!("'{other}' after a function"),
                ));
            }
        })
    }

    /// Stages loading the requested relations onto each returned document
    fn fetch_stages(&self, ctx: &CompileContext<'_>, query: &ListQuery) -> Result<Vec<Value>, QueryError> {
        let mut stages = Vec::new();
        for relation in ctx.resolver().resolve_fetch(&query.relations)? {
            if relation.embedded {
                continue;
            }
            let target = ctx
                .registry
                .schema(&relation.target)
                .ok_or_else(|| QueryError::invalid_relation_path(PARAM_RELATIONS, &relation.name))?;
            stages.extend(lookup_stages(relation, &target.storage, &relation.local_key, &relation.name));
        }
        Ok(stages)
    }

    fn totals(
        &self,
        ctx: &CompileContext<'_>,
        base: &[Value],
        spec: &AggregateSpec,
    ) -> Result<Option<DocumentTotals>, QueryError> {
        if spec.is_empty() {
            return Ok(None);
        }
        let mut resolver = ctx.resolver().with_prefix(TOTALS_PREFIX);
        let mut dimensions = Vec::with_capacity(spec.group_by.len());
        for path in &spec.group_by {
            dimensions.push((path.label(), Self::field(&mut resolver, PARAM_GROUP_BY, path)?.0));
        }
        let mut metrics = Vec::with_capacity(spec.metrics.len());
        for metric in &spec.metrics {
            let field = match &metric.path {
                Some(path) => Some(Self::field(&mut resolver, PARAM_TOTALS, path)?.0),
                None => None,
            };
            metrics.push((metric.label(), metric.function, field));
        }

        let mut pipeline = base.to_vec();
        let (lookups, _) = self.lookups(&resolver, PARAM_TOTALS)?;
        pipeline.extend(lookups);
        // Group per element of to-many references
        for plan in resolver.joins() {
            if plan.relation.many && !plan.relation.embedded {
                pipeline.push(json!({ "$unwind": { "path": format!("${}", plan.alias), "preserveNullAndEmptyArrays": true } }));
            }
        }
        let distinct_count = resolver.has_to_many();

        let mut group = Map::new();
        group.insert(
            "_id".into(),
            if dimensions.is_empty() {
                Value::Null
            } else {
                Value::Object(
                    dimensions
                        .iter()
                        .map(|(label, field)| (label.clone(), Value::String(format!("${field}"))))
                        .collect(),
                )
            },
        );
        let mut sizes = Map::new();
        for (label, function, field) in &metrics {
            let accumulator = match (function, field) {
                (MetricFunction::Count, None) if distinct_count => {
                    sizes.insert(label.clone(), json!({ "$size": format!("${label}") }));
                    json!({ "$addToSet": "$_id" })
                }
                (MetricFunction::Count, None) => json!({ "$sum": 1 }),
                (MetricFunction::Count, Some(field)) => {
                    json!({ "$sum": { "$cond": [{ "$gt": [format!("${field}"), null] }, 1, 0] } })
                }
                (function, Some(field)) => json!({ format!("${}", function.name()): format!("${field}") }),
                (_, None) => json!({ "$sum": 1 }),
            };
            group.insert(label.clone(), accumulator);
        }
        pipeline.push(json!({ "$group": group }));
        if !sizes.is_empty() {
            pipeline.push(json!({ "$set": sizes }));
        }

        let mut sort = Map::new();
        if let Some(((innermost, _), parents)) = dimensions.split_last() {
            for (label, _) in parents {
                sort.insert(format!("_id.{label}"), json!(1));
            }
            for (label, ..) in &metrics {
                sort.insert(label.clone(), json!(-1));
            }
            sort.insert(format!("_id.{innermost}"), json!(1));
            pipeline.push(json!({ "$sort": sort }));

            if let Some(limit) = spec.group_limit {
                if parents.is_empty() {
                    pipeline.push(json!({ "$limit": limit }));
                } else {
                    let parent_id: Map<String, Value> = parents
                        .iter()
                        .map(|(label, _)| (label.clone(), Value::String(format!("$_id.{label}"))))
                        .collect();
                    pipeline.extend([
                        json!({ "$group": { "_id": parent_id, "rows": { "$push": "$$ROOT" } } }),
                        json!({ "$project": { "rows": { "$slice": ["$rows", limit] } } }),
                        json!({ "$unwind": "$rows" }),
                        json!({ "$replaceRoot": { "newRoot": "$rows" } }),
                        json!({ "$sort": sort }),
                    ]);
                }
            }
        }

        let mut project = Map::new();
        project.insert("_id".into(), json!(0));
        for (label, _) in &dimensions {
            project.insert(label.clone(), Value::String(format!("$_id.{label}")));
        }
        for (label, ..) in &metrics {
            project.insert(label.clone(), json!(1));
        }
        pipeline.push(json!({ "$project": project }));

        Ok(Some(DocumentTotals {
            pipeline,
            dimensions: dimensions.into_iter().map(|(label, _)| label).collect(),
            metrics: metrics.into_iter().map(|(label, ..)| label).collect(),
        }))
    }
}

impl QueryCompiler for DocumentCompiler {
    type Output = DocumentQuery;
    type Join = DocumentJoin;

    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn compile(&self, ctx: &CompileContext<'_>, query: &ListQuery) -> Result<DocumentQuery, QueryError> {
        let root = ctx.schema;
        let mut resolver = ctx.resolver();

        let filter = query
            .filter
            .as_ref()
            .map(|node| self.filter(&mut resolver, node))
            .transpose()?;

        let mut sort = Map::new();
        for item in query.order.iter() {
            let (field, _) = Self::field(&mut resolver, PARAM_ORDER, &item.path)?;
            let direction = match item.direction {
                Direction::Asc => 1,
                Direction::Desc => -1,
            };
            sort.insert(field, json!(direction));
        }
        if sort.is_empty() {
            for pk in &root.primary_key {
                sort.insert(pk.clone(), json!(1));
            }
        }

        let (mut base, added) = self.lookups(&resolver, &root.name)?;
        if let Some(filter) = filter {
            base.push(json!({ "$match": filter }));
        }

        let mut pipeline = base.clone();
        pipeline.push(json!({ "$sort": sort }));
        if query.pagination.offset > 0 {
            pipeline.push(json!({ "$skip": query.pagination.offset }));
        }
        if let Some(limit) = query.pagination.limit {
            pipeline.push(json!({ "$limit": limit }));
        }
        if !added.is_empty() {
            pipeline.push(json!({ "$unset": added }));
        }
        pipeline.extend(self.fetch_stages(ctx, query)?);

        let count_pipeline = query.pagination.want_total.then(|| {
            let mut count = base.clone();
            count.push(json!({ "$count": "total" }));
            count
        });
        let totals = self.totals(ctx, &base, &query.aggregate)?;

        tracing::trace!(resource = %root.name, stages = pipeline.len(), "Document pipeline");
        Ok(DocumentQuery {
            collection: root.storage.clone(),
            pipeline,
            count_pipeline,
            totals,
        })
    }

    fn resolve_relation(
        &self,
        resolver: &RelationResolver<'_>,
        handle: JoinHandle,
        _param: &str,
    ) -> Result<DocumentJoin, QueryError> {
        let plan = resolver.join(handle);
        if plan.relation.embedded {
            return Ok(DocumentJoin::Embedded {
                path: relation_path(resolver, handle),
            });
        }
        let parent = plan.parent.map(|parent| relation_path(resolver, parent));
        let local_field = dotted(parent, &plan.relation.local_key);
        Ok(DocumentJoin::Lookup {
            path: plan.alias.clone(),
            stages: lookup_stages(plan.relation, &plan.target.storage, &local_field, &plan.alias),
        })
    }
}

/// How a relation is reached inside a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentJoin {
    /// Sub-document stored under `path`
    Embedded { path: String },
    /// Referenced documents pulled in under `path`
    Lookup { path: String, stages: Vec<Value> },
}

/// Compiled aggregation pipelines for one list request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentQuery {
    pub collection: String,
    /// Pipeline returning the page of documents
    pub pipeline: Vec<Value>,
    /// Pipeline returning `{"total": n}`, when the total was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_pipeline: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<DocumentTotals>,
}

/// Grouped aggregate pipeline; each output document has one field per
/// dimension and metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentTotals {
    pub pipeline: Vec<Value>,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
}

fn lookup_stages(relation: &RelationDef, from: &str, local_field: &str, alias: &str) -> Vec<Value> {
    let mut stages = vec![json!({
        "$lookup": {
            "from": from,
            "localField": local_field,
            "foreignField": relation.foreign_key,
            "as": alias,
        }
    })];
    if !relation.many {
        stages.push(json!({ "$unwind": { "path": format!("${alias}"), "preserveNullAndEmptyArrays": true } }));
    }
    stages
}

/// Field prefix under which a relation's attributes live
fn relation_path(resolver: &RelationResolver<'_>, handle: JoinHandle) -> String {
    let plan = resolver.join(handle);
    if plan.relation.embedded {
        let parent = plan.parent.map(|parent| relation_path(resolver, parent));
        dotted(parent, &plan.relation.name)
    } else {
        plan.alias.clone()
    }
}

pub(super) fn dotted(prefix: Option<String>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{name}"),
        None => name.to_string(),
    }
}

fn fulltext_filter(resolver: &RelationResolver<'_>, fulltext: &FullText) -> Value {
    let root = resolver.root();
    let fields: Vec<&str> = fulltext
        .attributes
        .iter()
        .filter_map(|name| root.attribute(name))
        .map(AttributeDef::column_name)
        .collect();
    let words: Vec<Value> = fulltext
        .words()
        .map(|word| {
            let pattern = escape_regex(word);
            let any_field: Vec<Value> = fields
                .iter()
                .map(|field| json!({ *field: { "$regex": pattern, "$options": "i" } }))
                .collect();
            json!({ "$or": any_field })
        })
        .collect();
    if fulltext.require_all {
        json!({ "$and": words })
    } else {
        json!({ "$or": words })
    }
}

fn negate_if(negated: bool, predicate: Value) -> Value {
    if negated {
        json!({ "$nor": [predicate] })
    } else {
        predicate
    }
}

fn all_of(mut clauses: Vec<Value>) -> Value {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        json!({ "$and": clauses })
    }
}

fn regex(operator: Operator, needle: &str) -> (String, &'static str) {
    let escaped = escape_regex(needle);
    let pattern = match operator {
        Operator::IExact => format!("^{escaped}$"),
        Operator::StartsWith | Operator::IStartsWith => format!("^{escaped}"),
        Operator::EndsWith | Operator::IEndsWith => format!("{escaped}$"),
        _ => escaped,
    };
    let options = match operator {
        Operator::IExact | Operator::IContains | Operator::IStartsWith | Operator::IEndsWith => "i",
        _ => "",
    };
    (pattern, options)
}

fn date_operator(operator: Operator) -> &'static str {
    match operator {
        Operator::Year => "$year",
        Operator::Month => "$month",
        _ => "$dayOfMonth",
    }
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

fn bounds(param: &str, operand: Operand) -> Result<[Value; 2], QueryError> {
    match operand {
        Operand::Bounds(low, high) => Ok([low.to_json(), high.to_json()]),
        _ => Err(QueryError::malformed_parameter(param, "'range' expects two values")),
    }
}

fn text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn json_text(value: &Value) -> String {
    value.as_str().map_or_else(|| value.to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Backend, CompiledQuery};
    use crate::errors::ErrorKind;
    use crate::filtering::params::QueryParams;
    use crate::registry::SchemaRegistry;
    use crate::schema::{AttributeKind, ResourceSchema};

    fn registry() -> SchemaRegistry {
        let products = ResourceSchema::new("products", "products")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
            .with_attribute(AttributeDef::new("name", AttributeKind::String))
            .with_attribute(AttributeDef::new("price", AttributeKind::Numeric))
            .with_attribute(AttributeDef::new("tags", AttributeKind::Collection))
            .with_attribute(AttributeDef::new("specs", AttributeKind::Json))
            .with_attribute(AttributeDef::new("created", AttributeKind::DateTime))
            .with_relation(RelationDef::to_one("category", "categories", "category_id", "id"))
            .with_relation(RelationDef::embedded("variants", "variants", true))
            .with_fulltext(&["name"], true);
        let categories = ResourceSchema::new("categories", "categories")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
            .with_attribute(AttributeDef::new("name", AttributeKind::String));
        let variants = ResourceSchema::new("variants", "variants")
            .with_attribute(AttributeDef::new("sku", AttributeKind::String))
            .with_attribute(AttributeDef::new("stock", AttributeKind::Numeric));
        SchemaRegistry::builder()
            .register(products, Backend::document())
            .register(categories, Backend::document())
            .register(variants, Backend::document())
            .build()
            .unwrap()
    }

    fn compile(query: &str) -> Result<DocumentQuery, QueryError> {
        let registry = registry();
        match registry
            .resource("products")
            .unwrap()
            .compile(&QueryParams::from_query_string(query))?
        {
            CompiledQuery::Document(query) => Ok(query),
            other => panic!("expected document query, got {:?}", other.kind()),
        }
    }

    fn matched(query: &str) -> Value {
        compile(query)
            .unwrap()
            .pipeline
            .into_iter()
            .find_map(|stage| stage.get("$match").cloned())
            .unwrap()
    }

    #[test]
    fn test_page_pipeline() {
        let query = compile("price__gte=10&order=-price&limit=5&offset=10").unwrap();
        assert_eq!(query.collection, "products");
        assert_eq!(
            query.pipeline,
            vec![
                json!({"$match": {"price": {"$gte": 10}}}),
                json!({"$sort": {"price": -1}}),
                json!({"$skip": 10}),
                json!({"$limit": 5}),
            ]
        );
        assert!(query.count_pipeline.is_none());
    }

    #[test]
    fn test_default_sort_and_count() {
        let query = compile("total_count=true").unwrap();
        assert_eq!(query.pipeline, vec![json!({"$sort": {"id": 1}})]);
        assert_eq!(query.count_pipeline, Some(vec![json!({"$count": "total"})]));
    }

    #[test]
    fn test_operators() {
        assert_eq!(matched("price__range=9,3"), json!({"price": {"$gte": 3, "$lte": 9}}));
        assert_eq!(matched("price__in=1,2"), json!({"price": {"$in": [1, 2]}}));
        assert_eq!(matched("name__isnull=1"), json!({"name": {"$eq": null}}));
        assert_eq!(
            matched("name__icontains=a.b"),
            json!({"name": {"$regex": "a\\.b", "$options": "i"}})
        );
        assert_eq!(matched("name__startswith=Ch"), json!({"name": {"$regex": "^Ch", "$options": ""}}));
        assert_eq!(matched("tags__contains=a,b"), json!({"tags": {"$all": ["a", "b"]}}));
        assert_eq!(matched("tags__overlap=a,b"), json!({"tags": {"$in": ["a", "b"]}}));
        assert_eq!(matched("specs__haskey=color"), json!({"specs.color": {"$exists": true}}));
        assert_eq!(
            matched("created__year=2024"),
            json!({"$expr": {"$eq": [{"$year": "$created"}, 2024]}})
        );
    }

    #[test]
    fn test_negation_uses_nor() {
        assert_eq!(matched("name__notexact=x"), json!({"$nor": [{"name": {"$eq": "x"}}]}));
        assert_eq!(
            matched(r#"search={"not":{"price__gt":1}}"#),
            json!({"$nor": [{"price": {"$gt": 1}}]})
        );
    }

    #[test]
    fn test_json_contains_matches_sub_fields() {
        assert_eq!(
            matched(r#"search={"specs__contains":[{"color":"red","size":2}]}"#),
            json!({"$and": [{"specs.color": "red"}, {"specs.size": 2}]})
        );
    }

    #[test]
    fn test_functions() {
        assert_eq!(
            matched("name__func__lower__exact=chair"),
            json!({"$expr": {"$eq": [{"$toLower": "$name"}, "chair"]}})
        );
        assert_eq!(
            matched("tags__sfunc__size="),
            json!({"$expr": {"$size": "$tags"}})
        );
        let err = compile("name__func__soundex=x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedByBackend);
    }

    #[test]
    fn test_match_is_unsupported() {
        let err = compile("name__match=chair").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedByBackend);
        assert_eq!(err.param(), "name__match");
    }

    #[test]
    fn test_embedded_relation_is_a_dotted_path() {
        assert_eq!(matched("variants__stock__gt=0"), json!({"variants.stock": {"$gt": 0}}));
    }

    #[test]
    fn test_reference_relation_uses_lookup() {
        let query = compile("category__name=Chairs").unwrap();
        assert_eq!(
            query.pipeline[0],
            json!({"$lookup": {"from": "categories", "localField": "category_id", "foreignField": "id", "as": "rel_category"}})
        );
        assert_eq!(
            query.pipeline[1],
            json!({"$unwind": {"path": "$rel_category", "preserveNullAndEmptyArrays": true}})
        );
        assert_eq!(query.pipeline[2], json!({"$match": {"rel_category.name": {"$eq": "Chairs"}}}));
        assert_eq!(query.pipeline.last(), Some(&json!({"$unset": ["rel_category"]})));
    }

    #[test]
    fn test_fetching_relations() {
        let query = compile("relations=_all").unwrap();
        assert_eq!(query.pipeline.len(), 3);
        assert_eq!(query.pipeline[1]["$lookup"]["as"], json!("category"));
    }

    #[test]
    fn test_fulltext_regex() {
        assert_eq!(
            matched("q=oak chair"),
            json!({"$and": [
                {"$or": [{"name": {"$regex": "oak", "$options": "i"}}]},
                {"$or": [{"name": {"$regex": "chair", "$options": "i"}}]}
            ]})
        );
    }

    #[test]
    fn test_totals_pipeline() {
        let totals = compile("totals=sum__price&group_by=category__name").unwrap().totals.unwrap();
        assert_eq!(totals.dimensions, vec!["category__name"]);
        assert_eq!(totals.metrics, vec!["sum_price"]);
        assert_eq!(totals.pipeline[0]["$lookup"]["as"], json!("totals_category"));
        assert!(totals.pipeline.contains(&json!({"$group": {
            "_id": {"category__name": "$totals_category.name"},
            "sum_price": {"$sum": "$price"}
        }})));
        assert!(totals.pipeline.contains(&json!({"$sort": {"sum_price": -1, "_id.category__name": 1}})));
        assert_eq!(
            totals.pipeline.last(),
            Some(&json!({"$project": {"_id": 0, "category__name": "$_id.category__name", "sum_price": 1}}))
        );
    }

    #[test]
    fn test_group_limit_per_parent() {
        let totals = compile("group_by=name,variants__sku&group_limit=2").unwrap().totals.unwrap();
        assert!(totals.pipeline.contains(&json!({"$project": {"rows": {"$slice": ["$rows", 2]}}})));

        let totals = compile("group_by=name&group_limit=2").unwrap().totals.unwrap();
        assert!(totals.pipeline.contains(&json!({"$limit": 2})));
    }
}
