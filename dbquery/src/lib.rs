//! # dbquery
//!
//! Turn the query string of a REST list endpoint into a native query for a
//! relational database, a document store or a search index.
//!
//! A request goes through three steps:
//!
//! 1. **Parse**: [`QueryParams`] are split into a filter tree, an ordering,
//!    pagination, an aggregation request and the relations to load
//!    ([`ListQuery`]).
//! 2. **Validate**: every attribute path, operator and operand is checked
//!    against the resource's [`ResourceSchema`].
//! 3. **Compile**: the resource's [`Backend`] produces a [`CompiledQuery`]:
//!    `sea-query` statements, an aggregation pipeline or a search request body.
//!
//! ```rust,ignore
//! use dbquery::{Backend, QueryParams, SchemaRegistry};
//!
//! let registry = SchemaRegistry::builder()
//!     .register(products, Backend::relational(DatabaseBackend::Sqlite))
//!     .register(categories, Backend::relational(DatabaseBackend::Sqlite))
//!     .build()?;
//!
//! async fn list_products(
//!     State(state): State<AppState>,
//!     params: QueryParams,
//! ) -> Result<ListResponse<serde_json::Value>, ExecutionError> {
//!     let resource = state.registry.resource("products").unwrap();
//!     let compiled = resource.compile(&params)?;
//!     let query = compiled.as_relational().unwrap();
//!     Ok(query.execute(&state.db).await?.into())
//! }
//! ```
//!
//! Rejected requests surface as [`QueryError`], which renders as a `400` JSON
//! body naming the offending parameter.

pub mod backends;
pub mod config;
pub mod core;
pub mod errors;
pub mod filtering;
pub mod models;
pub mod query;
pub mod registry;
pub mod schema;
pub mod validation;
pub mod values;

pub use backends::{Backend, BackendKind, CompiledQuery, QueryCompiler};
pub use config::QueryOptions;
pub use crate::core::{ListExecutor, ListResult, shape_totals};
pub use errors::{ErrorKind, ExecutionError, QueryError};
pub use filtering::QueryParams;
pub use models::ListResponse;
pub use query::ListQuery;
pub use registry::{Resource, SchemaRegistry};
pub use schema::{AttributeDef, AttributeKind, RelationDef, ResourceSchema, SchemaError};
