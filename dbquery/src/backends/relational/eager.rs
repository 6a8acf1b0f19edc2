use super::RelationalCompiler;
use crate::backends::{BackendKind, CompileContext};
use crate::errors::QueryError;
use crate::filtering::params::PARAM_RELATIONS;
use crate::query::ListQuery;
use sea_orm::Value;
use sea_orm::sea_query::{Alias, Asterisk, Expr, Query, SelectStatement};

/// How related rows are fetched for a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EagerStrategy {
    /// One `IN (...)` query for the whole page
    Batched,
    /// One query per parent row, used for unlimited pages and pages at or
    /// below `eager_limit`
    PerRow,
}

/// Follow-up query loading one relation for a page of parent rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EagerLoad {
    /// Key the related rows are attached under
    pub relation: String,
    pub table: String,
    /// Column of the parent row holding the join value
    pub local_key: String,
    /// Column of the related table matched against `local_key`
    pub foreign_key: String,
    pub many: bool,
    pub strategy: EagerStrategy,
}

impl EagerLoad {
    /// `SELECT * FROM table WHERE foreign_key IN (keys)`
    #[must_use]
    pub fn statement(&self, keys: impl IntoIterator<Item = Value>) -> SelectStatement {
        Query::select()
            .column(Asterisk)
            .from(Alias::new(&self.table))
            .and_where(Expr::col(Alias::new(&self.foreign_key)).is_in(keys))
            .order_by(Alias::new(&self.foreign_key), sea_orm::Order::Asc)
            .to_owned()
    }
}

impl RelationalCompiler {
    pub(super) fn eager_loads(&self, ctx: &CompileContext<'_>, query: &ListQuery) -> Result<Vec<EagerLoad>, QueryError> {
        let relations = ctx.resolver().resolve_fetch(&query.relations)?;
        let strategy = match (ctx.options().eager_limit, query.pagination.limit) {
            (Some(eager_limit), limit) if limit.is_none_or(|limit| limit <= eager_limit) => EagerStrategy::PerRow,
            _ => EagerStrategy::Batched,
        };

        relations
            .into_iter()
            .map(|relation| {
                if relation.embedded {
                    return Err(QueryError::unsupported_by_backend(
                        PARAM_RELATIONS,
                        BackendKind::Relational,
                        format!("embedded relation '{}'", relation.name),
                    ));
                }
                let target = ctx
                    .registry
                    .schema(&relation.target)
                    .ok_or_else(|| QueryError::invalid_relation_path(PARAM_RELATIONS, &relation.name))?;
                Ok(EagerLoad {
                    relation: relation.name.clone(),
                    table: target.storage.clone(),
                    local_key: relation.local_key.clone(),
                    foreign_key: relation.foreign_key.clone(),
                    many: relation.many,
                    strategy,
                })
            })
            .collect()
    }
}
