//! Relational backend built on `sea-query`.
//!
//! A list query compiles into up to three select statements sharing the same
//! filter: the page itself, an optional `COUNT(*)`, and an optional grouped
//! totals query. Relation paths become `LEFT JOIN`s aliased per path. When the
//! filter reaches through a to-many relation it is moved into a
//! `pk IN (SELECT pk ...)` semi-join so the page and the count never see
//! duplicated rows.

mod aggregate;
mod conditions;
mod eager;

pub use aggregate::TotalsQuery;
pub use eager::{EagerLoad, EagerStrategy};

use super::resolver::{JoinHandle, RelationResolver};
use super::{BackendKind, CompileContext, QueryCompiler};
use crate::errors::QueryError;
use crate::filtering::params::{AttributePath, PARAM_ORDER};
use crate::filtering::sort::Direction;
use crate::query::ListQuery;
use crate::schema::ResourceSchema;
use sea_orm::sea_query::{
    Alias, Asterisk, Condition, Expr, Func, JoinType, MysqlQueryBuilder, PostgresQueryBuilder, Query,
    QueryStatementWriter, SelectStatement, SimpleExpr, SqliteQueryBuilder,
};
use sea_orm::{DatabaseBackend, Statement};
use std::collections::BTreeSet;

/// Alias of the row count column
pub const COUNT_ALIAS: &str = "total";

const COMMON_FUNCTIONS: [&str; 8] = ["lower", "upper", "length", "trim", "ltrim", "rtrim", "abs", "round"];
const POSTGRES_FUNCTIONS: [&str; 6] = ["char_length", "starts_with", "floor", "ceil", "md5", "initcap"];
const MYSQL_FUNCTIONS: [&str; 6] = ["char_length", "floor", "ceil", "md5", "date", "reverse"];
const SQLITE_FUNCTIONS: [&str; 4] = ["date", "hex", "instr", "unicode"];

/// Compiles list queries for one SQL dialect.
///
/// `func`/`sfunc` parameters may only call functions on the compiler's
/// whitelist. Every dialect starts with a small default set that can be
/// extended:
///
/// ```rust,ignore
/// let compiler = RelationalCompiler::new(DatabaseBackend::Postgres).with_function("unaccent");
/// ```
#[derive(Debug, Clone)]
pub struct RelationalCompiler {
    backend: DatabaseBackend,
    functions: BTreeSet<String>,
}

impl RelationalCompiler {
    #[must_use]
    pub fn new(backend: DatabaseBackend) -> Self {
        let dialect: &[&str] = match backend {
            DatabaseBackend::Postgres => &POSTGRES_FUNCTIONS,
            DatabaseBackend::MySql => &MYSQL_FUNCTIONS,
            DatabaseBackend::Sqlite => &SQLITE_FUNCTIONS,
        };
        let functions = COMMON_FUNCTIONS
            .iter()
            .chain(dialect)
            .map(ToString::to_string)
            .collect();
        Self { backend, functions }
    }

    /// Allow `func`/`sfunc` to call `name`
    #[must_use]
    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.functions.insert(name.into().to_ascii_lowercase());
        self
    }

    #[must_use]
    pub const fn database_backend(&self) -> DatabaseBackend {
        self.backend
    }

    #[must_use]
    pub fn supports_function(&self, name: &str) -> bool {
        self.functions.contains(&name.to_ascii_lowercase())
    }

    /// Column expression for `path`, registering (and checking) the joins it needs
    fn attribute_expr(
        &self,
        resolver: &mut RelationResolver<'_>,
        param: &str,
        path: &AttributePath,
    ) -> Result<SimpleExpr, QueryError> {
        let resolved = resolver.resolve_attribute(param, path)?;
        let table = match resolved.join {
            Some(handle) => {
                self.check_chain(resolver, handle, param)?;
                resolver.join(handle).alias.clone()
            }
            None => resolver.root().storage.clone(),
        };
        Ok(column(&table, resolved.attribute.column_name()))
    }

    fn check_chain(&self, resolver: &RelationResolver<'_>, handle: JoinHandle, param: &str) -> Result<(), QueryError> {
        let mut current = Some(handle);
        while let Some(handle) = current {
            self.resolve_relation(resolver, handle, param)?;
            current = resolver.join(handle).parent;
        }
        Ok(())
    }

    /// Every join registered so far, parents first
    fn table_joins(&self, resolver: &RelationResolver<'_>, param: &str) -> Result<Vec<TableJoin>, QueryError> {
        resolver
            .handles()
            .map(|handle| self.resolve_relation(resolver, handle, param))
            .collect()
    }

    /// Wrap `template` in a custom expression, numbering `{}` placeholders the
    /// way the dialect expects
    fn custom(&self, template: &str, exprs: Vec<SimpleExpr>) -> SimpleExpr {
        let mut sql = String::with_capacity(template.len() + exprs.len() * 2);
        for (index, part) in template.split("{}").enumerate() {
            if index > 0 {
                match self.backend {
                    DatabaseBackend::Postgres => sql.push_str(&format!("${index}")),
                    _ => sql.push('?'),
                }
            }
            sql.push_str(part);
        }
        Expr::cust_with_exprs(sql, exprs)
    }

    fn unsupported(&self, param: &str, feature: impl std::fmt::Display) -> QueryError {
        QueryError::unsupported_by_backend(param, self.kind(), format!("{feature} on {:?}", self.backend))
    }
}

impl QueryCompiler for RelationalCompiler {
    type Output = RelationalQuery;
    type Join = TableJoin;

    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn compile(&self, ctx: &CompileContext<'_>, query: &ListQuery) -> Result<RelationalQuery, QueryError> {
        let root = ctx.schema;
        let mut resolver = ctx.resolver();

        let condition = query
            .filter
            .as_ref()
            .map(|node| self.condition(ctx.options(), &mut resolver, node))
            .transpose()?;

        let filter = if resolver.has_to_many() {
            let mut keys = Query::select();
            keys.from(Alias::new(&root.storage));
            for pk in &root.primary_key {
                keys.column((Alias::new(&root.storage), Alias::new(pk)));
            }
            FilterPart {
                joins: self.table_joins(&resolver, &root.name)?,
                condition,
            }
            .apply(&mut keys);

            resolver = ctx.resolver();
            FilterPart {
                joins: Vec::new(),
                condition: Some(Condition::all().add(primary_key(root).in_subquery(keys))),
            }
        } else {
            FilterPart {
                joins: self.table_joins(&resolver, &root.name)?,
                condition,
            }
        };

        let mut order = Vec::with_capacity(query.order.0.len());
        for item in query.order.iter() {
            // A to-many join would repeat every row once per related row
            let resolved = resolver.resolve_attribute(PARAM_ORDER, &item.path)?;
            if resolved.join.is_some_and(|handle| resolver.is_to_many(handle)) {
                return Err(self.unsupported(PARAM_ORDER, format_args!("ordering by to-many relation '{}'", item.path)));
            }
            order.push((self.attribute_expr(&mut resolver, PARAM_ORDER, &item.path)?, item.direction));
        }

        let mut select = Query::select();
        select
            .column((Alias::new(&root.storage), Asterisk))
            .from(Alias::new(&root.storage));
        for join in self.table_joins(&resolver, PARAM_ORDER)? {
            join.apply(&mut select);
        }
        if let Some(condition) = &filter.condition {
            select.cond_where(condition.clone());
        }
        if order.is_empty() {
            for pk in &root.primary_key {
                select.order_by((Alias::new(&root.storage), Alias::new(pk)), Direction::Asc.into());
            }
        }
        for (expr, direction) in order {
            select.order_by_expr(expr, direction.into());
        }
        if let Some(limit) = query.pagination.limit {
            select.limit(limit);
        }
        if query.pagination.offset > 0 {
            select.offset(query.pagination.offset);
        }

        let count = query.pagination.want_total.then(|| {
            let mut count = Query::select();
            count
                .expr_as(Func::count(Expr::col(Asterisk)), Alias::new(COUNT_ALIAS))
                .from(Alias::new(&root.storage));
            filter.apply(&mut count);
            count
        });

        let totals = self.totals(ctx, &filter, &query.aggregate)?;
        let eager = self.eager_loads(ctx, query)?;

        let compiled = RelationalQuery {
            backend: self.backend,
            select,
            count,
            totals,
            eager,
        };
        tracing::trace!(resource = %root.name, sql = %compiled.to_sql(), "Relational query");
        Ok(compiled)
    }

    fn resolve_relation(
        &self,
        resolver: &RelationResolver<'_>,
        handle: JoinHandle,
        param: &str,
    ) -> Result<TableJoin, QueryError> {
        let plan = resolver.join(handle);
        if plan.relation.embedded {
            return Err(self.unsupported(param, format_args!("embedded relation '{}'", plan.relation.name)));
        }
        let parent = plan
            .parent
            .map_or(resolver.root().storage.as_str(), |parent| resolver.join(parent).alias.as_str());
        Ok(TableJoin {
            table: plan.target.storage.clone(),
            alias: plan.alias.clone(),
            on: Expr::col((Alias::new(&plan.alias), Alias::new(&plan.relation.foreign_key)))
                .equals((Alias::new(parent), Alias::new(&plan.relation.local_key))),
        })
    }
}

/// `LEFT JOIN table AS alias ON ...`
#[derive(Debug, Clone)]
pub struct TableJoin {
    pub table: String,
    pub alias: String,
    pub on: SimpleExpr,
}

impl TableJoin {
    fn apply(self, select: &mut SelectStatement) {
        select.join_as(JoinType::LeftJoin, Alias::new(self.table), Alias::new(self.alias), self.on);
    }
}

/// Filter condition plus the joins it needs, applicable to any select over the root table
#[derive(Debug, Clone)]
struct FilterPart {
    joins: Vec<TableJoin>,
    condition: Option<Condition>,
}

impl FilterPart {
    fn apply(&self, select: &mut SelectStatement) {
        for join in &self.joins {
            join.clone().apply(select);
        }
        if let Some(condition) = &self.condition {
            select.cond_where(condition.clone());
        }
    }
}

/// Compiled relational list query
#[derive(Debug, Clone)]
pub struct RelationalQuery {
    pub backend: DatabaseBackend,
    /// The page of rows
    pub select: SelectStatement,
    /// `SELECT COUNT(*) AS total`, present when the total was requested
    pub count: Option<SelectStatement>,
    pub totals: Option<TotalsQuery>,
    pub eager: Vec<EagerLoad>,
}

impl RelationalQuery {
    /// Parameterized page statement, ready for `sea-orm`
    #[must_use]
    pub fn statement(&self) -> Statement {
        self.backend.build(&self.select)
    }

    #[must_use]
    pub fn count_statement(&self) -> Option<Statement> {
        self.count.as_ref().map(|count| self.backend.build(count))
    }

    #[must_use]
    pub fn totals_statement(&self) -> Option<Statement> {
        self.totals.as_ref().map(|totals| self.backend.build(&totals.statement))
    }

    /// Page statement with values inlined, for logging and tests
    #[must_use]
    pub fn to_sql(&self) -> String {
        render(self.backend, &self.select)
    }
}

/// Render a statement with inlined values
#[must_use]
pub fn render(backend: DatabaseBackend, statement: &SelectStatement) -> String {
    match backend {
        DatabaseBackend::Postgres => statement.to_string(PostgresQueryBuilder),
        DatabaseBackend::MySql => statement.to_string(MysqlQueryBuilder),
        DatabaseBackend::Sqlite => statement.to_string(SqliteQueryBuilder),
    }
}

fn column(table: &str, column: &str) -> SimpleExpr {
    Expr::col((Alias::new(table), Alias::new(column))).into()
}

/// Primary key of the root as a column or a row value
fn primary_key(root: &ResourceSchema) -> Expr {
    match root.primary_key.as_slice() {
        [single] => Expr::col((Alias::new(&root.storage), Alias::new(single))),
        columns => Expr::tuple(columns.iter().map(|pk| column(&root.storage, pk))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Backend, CompiledQuery};
    use crate::errors::ErrorKind;
    use crate::filtering::params::QueryParams;
    use crate::registry::SchemaRegistry;
    use crate::schema::{AttributeDef, AttributeKind, RelationDef};

    pub(super) fn registry(backend: DatabaseBackend) -> SchemaRegistry {
        let products = ResourceSchema::new("products", "products")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
            .with_attribute(AttributeDef::new("name", AttributeKind::String))
            .with_attribute(AttributeDef::new("price", AttributeKind::Numeric))
            .with_attribute(AttributeDef::new("tags", AttributeKind::Collection).elements(AttributeKind::String))
            .with_attribute(AttributeDef::new("specs", AttributeKind::Json))
            .with_attribute(AttributeDef::new("created", AttributeKind::DateTime).column("created_at"))
            .with_relation(RelationDef::to_one("category", "categories", "category_id", "id"))
            .with_relation(RelationDef::to_many("reviews", "reviews", "id", "product_id"))
            .with_fulltext(&["name"], false);
        let categories = ResourceSchema::new("categories", "categories")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
            .with_attribute(AttributeDef::new("name", AttributeKind::String))
            .with_relation(RelationDef::to_one("parent", "categories", "parent_id", "id"));
        let reviews = ResourceSchema::new("reviews", "reviews")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
            .with_attribute(AttributeDef::new("rating", AttributeKind::Numeric));

        let compiler = Backend::relational(backend);
        SchemaRegistry::builder()
            .register(products, compiler.clone())
            .register(categories, compiler.clone())
            .register(reviews, compiler)
            .build()
            .unwrap()
    }

    pub(super) fn compile(backend: DatabaseBackend, query: &str) -> Result<RelationalQuery, QueryError> {
        let registry = registry(backend);
        let compiled = registry
            .resource("products")
            .unwrap()
            .compile(&QueryParams::from_query_string(query))?;
        match compiled {
            CompiledQuery::Relational(query) => Ok(query),
            other => panic!("expected relational query, got {:?}", other.kind()),
        }
    }

    pub(super) fn sql(query: &str) -> String {
        compile(DatabaseBackend::Postgres, query).unwrap().to_sql()
    }

    #[test]
    fn test_default_order_is_primary_key() {
        assert_eq!(
            sql(""),
            r#"SELECT "products".* FROM "products" ORDER BY "products"."id" ASC"#
        );
    }

    #[test]
    fn test_pagination_and_order() {
        let sql = sql("order=-price,name&limit=10&offset=20");
        assert!(
            sql.ends_with(r#"ORDER BY "products"."price" DESC, "products"."name" ASC LIMIT 10 OFFSET 20"#),
            "{sql}"
        );
    }

    #[test]
    fn test_to_one_join_is_attached_directly() {
        let sql = sql("category__name=Chairs");
        assert!(
            sql.contains(
                r#"LEFT JOIN "categories" AS "rel_category" ON "rel_category"."id" = "products"."category_id""#
            ),
            "{sql}"
        );
        assert!(sql.contains(r#"WHERE "rel_category"."name" = 'Chairs'"#), "{sql}");
    }

    #[test]
    fn test_repeated_relation_is_joined_once() {
        let sql = sql("category__name=Chairs&category__id__gt=2&order=category__name");
        assert_eq!(sql.matches("LEFT JOIN").count(), 1, "{sql}");
    }

    #[test]
    fn test_nested_relation_join_chain() {
        let sql = sql("category__parent__name=Home");
        assert!(
            sql.contains(
                r#"LEFT JOIN "categories" AS "rel_category__parent" ON "rel_category__parent"."id" = "rel_category"."parent_id""#
            ),
            "{sql}"
        );
    }

    #[test]
    fn test_to_many_filter_uses_semi_join() {
        let sql = sql("reviews__rating__gte=4");
        assert!(
            sql.contains(r#"WHERE "products"."id" IN (SELECT "products"."id" FROM "products" LEFT JOIN "reviews" AS "rel_reviews""#),
            "{sql}"
        );
        assert!(!sql.contains("DISTINCT"), "{sql}");
    }

    #[test]
    fn test_to_many_order_is_rejected() {
        for query in ["order=reviews__rating", "order=name,-reviews__rating", "reviews__rating=5&order=reviews__id"] {
            let err = compile(DatabaseBackend::Postgres, query).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedByBackend, "{query}");
            assert_eq!(err.param(), "order", "{query}");
        }

        // To-one chains still order through joins
        let sql = sql("order=category__parent__name");
        assert_eq!(sql.matches("LEFT JOIN").count(), 2, "{sql}");
    }

    #[test]
    fn test_count_only_when_requested() {
        let query = compile(DatabaseBackend::Postgres, "price__gt=5").unwrap();
        assert!(query.count.is_none());

        let query = compile(DatabaseBackend::Postgres, "price__gt=5&total_count=true&order=category__name").unwrap();
        let count = render(DatabaseBackend::Postgres, query.count.as_ref().unwrap());
        assert_eq!(
            count,
            r#"SELECT COUNT(*) AS "total" FROM "products" WHERE "products"."price" > 5"#
        );
    }

    #[test]
    fn test_statement_is_parameterized() {
        let query = compile(DatabaseBackend::Postgres, "name=chair").unwrap();
        let statement = query.statement();
        assert!(statement.sql.contains("$1"), "{}", statement.sql);
        assert_eq!(statement.values.map(|v| v.0.len()), Some(1));
    }

    #[test]
    fn test_embedded_relations_are_unsupported() {
        let products = ResourceSchema::new("products", "products")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
            .with_relation(RelationDef::embedded("dims", "dims", false));
        let dims = ResourceSchema::new("dims", "dims").with_attribute(AttributeDef::new("width", AttributeKind::Numeric));
        let backend = Backend::relational(DatabaseBackend::Sqlite);
        let registry = SchemaRegistry::builder()
            .register(products, backend.clone())
            .register(dims, backend)
            .build()
            .unwrap();
        let err = registry
            .resource("products")
            .unwrap()
            .compile(&QueryParams::from_query_string("dims__width__gt=3"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedByBackend);
        assert_eq!(err.param(), "dims__width__gt");
    }

    #[test]
    fn test_function_whitelist() {
        let compiler = RelationalCompiler::new(DatabaseBackend::Sqlite);
        assert!(compiler.supports_function("LOWER"));
        assert!(!compiler.supports_function("unaccent"));
        assert!(compiler.with_function("Unaccent").supports_function("unaccent"));
    }
}
