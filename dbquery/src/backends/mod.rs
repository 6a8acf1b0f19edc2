//! # Backend Query Compilers
//!
//! One compiler per storage family turns a validated [`ListQuery`] into that
//! backend's native query:
//!
//! - [`relational`]: `sea-query` select statements (Postgres, MySQL, SQLite)
//! - [`document`]: MongoDB-style aggregation pipelines
//! - [`search_index`]: Elasticsearch-style request bodies
//!
//! Each resource is registered with exactly one [`Backend`] variant; nothing is
//! inspected at runtime to pick a compiler.

pub mod document;
pub mod relational;
pub mod resolver;
pub mod search_index;

use crate::config::QueryOptions;
use crate::errors::QueryError;
use crate::query::ListQuery;
use crate::registry::SchemaRegistry;
use crate::schema::ResourceSchema;
use document::{DocumentCompiler, DocumentQuery};
use relational::{RelationalCompiler, RelationalQuery};
use resolver::{JoinHandle, RelationResolver};
use sea_orm::DatabaseBackend;
use search_index::{SearchIndexCompiler, SearchIndexQuery};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Relational,
    Document,
    SearchIndex,
}

impl BackendKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Document => "document",
            Self::SearchIndex => "search_index",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a compiler needs to know besides the query itself
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub schema: &'a ResourceSchema,
}

impl<'a> CompileContext<'a> {
    #[must_use]
    pub fn options(&self) -> &'a QueryOptions {
        self.registry.options()
    }

    /// Fresh resolver rooted at the compiled resource
    #[must_use]
    pub fn resolver(&self) -> RelationResolver<'a> {
        RelationResolver::new(self.registry, self.schema)
    }
}

/// Capability set every backend provides
pub trait QueryCompiler {
    /// Executable query produced by [`compile`](Self::compile)
    type Output;
    /// Backend-native form of one resolved relation
    type Join;

    fn kind(&self) -> BackendKind;

    /// Translate a validated query
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedByBackend` for constructs the backend cannot express.
    fn compile(&self, ctx: &CompileContext<'_>, query: &ListQuery) -> Result<Self::Output, QueryError>;

    /// Turn a resolved relation into a join, lookup or nested path
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedByBackend` when the relation style (reference or
    /// embedded) does not exist on this backend.
    fn resolve_relation(
        &self,
        resolver: &RelationResolver<'_>,
        handle: JoinHandle,
        param: &str,
    ) -> Result<Self::Join, QueryError>;
}

/// Backend chosen for a resource at registration
#[derive(Debug, Clone)]
pub enum Backend {
    Relational(RelationalCompiler),
    Document(DocumentCompiler),
    SearchIndex(SearchIndexCompiler),
}

impl Backend {
    #[must_use]
    pub fn relational(backend: DatabaseBackend) -> Self {
        Self::Relational(RelationalCompiler::new(backend))
    }

    #[must_use]
    pub fn document() -> Self {
        Self::Document(DocumentCompiler::new())
    }

    #[must_use]
    pub fn search_index() -> Self {
        Self::SearchIndex(SearchIndexCompiler::new())
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Relational(c) => c.kind(),
            Self::Document(c) => c.kind(),
            Self::SearchIndex(c) => c.kind(),
        }
    }

    /// # Errors
    ///
    /// Propagates the selected compiler's error.
    pub fn compile(&self, ctx: &CompileContext<'_>, query: &ListQuery) -> Result<CompiledQuery, QueryError> {
        match self {
            Self::Relational(c) => c.compile(ctx, query).map(CompiledQuery::Relational),
            Self::Document(c) => c.compile(ctx, query).map(CompiledQuery::Document),
            Self::SearchIndex(c) => c.compile(ctx, query).map(CompiledQuery::SearchIndex),
        }
    }
}

impl From<RelationalCompiler> for Backend {
    fn from(compiler: RelationalCompiler) -> Self {
        Self::Relational(compiler)
    }
}

impl From<DocumentCompiler> for Backend {
    fn from(compiler: DocumentCompiler) -> Self {
        Self::Document(compiler)
    }
}

impl From<SearchIndexCompiler> for Backend {
    fn from(compiler: SearchIndexCompiler) -> Self {
        Self::SearchIndex(compiler)
    }
}

/// Executable query handed to the resource layer
#[derive(Debug, Clone)]
pub enum CompiledQuery {
    Relational(RelationalQuery),
    Document(DocumentQuery),
    SearchIndex(SearchIndexQuery),
}

impl CompiledQuery {
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Relational(_) => BackendKind::Relational,
            Self::Document(_) => BackendKind::Document,
            Self::SearchIndex(_) => BackendKind::SearchIndex,
        }
    }

    #[must_use]
    pub fn as_relational(&self) -> Option<&RelationalQuery> {
        match self {
            Self::Relational(q) => Some(q),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_document(&self) -> Option<&DocumentQuery> {
        match self {
            Self::Document(q) => Some(q),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_search_index(&self) -> Option<&SearchIndexQuery> {
        match self {
            Self::SearchIndex(q) => Some(q),
            _ => None,
        }
    }
}
